//! Identifier normalization and type inference (`spec.md §4.6`,
//! "Identifier normalization").

use casegraph_types::error::CaseGraphError;
use casegraph_types::model::IdentifierType;

/// Normalize `value_raw` per its [`IdentifierType`]; reject a value whose
/// normalized form is empty.
pub fn normalize(kind: IdentifierType, value_raw: &str) -> Result<String, CaseGraphError> {
    let normalized = match kind {
        IdentifierType::Phone => normalize_phone(value_raw),
        IdentifierType::Email => value_raw.trim().to_ascii_lowercase(),
        IdentifierType::SocialHandle => normalize_handle(value_raw),
        IdentifierType::Other => value_raw.trim().to_string(),
    };
    if normalized.is_empty() {
        return Err(CaseGraphError::InvalidArgument(format!(
            "identifier value normalizes to empty: {value_raw:?}"
        )));
    }
    Ok(normalized)
}

fn normalize_phone(value_raw: &str) -> String {
    let trimmed = value_raw.trim();
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if has_plus {
        format!("+{digits}")
    } else {
        digits
    }
}

fn normalize_handle(value_raw: &str) -> String {
    value_raw.trim().trim_start_matches('@').to_ascii_lowercase()
}

/// Infer an [`IdentifierType`] from a raw participant token
/// (`spec.md §4.6`, "LinkMessageParticipant"): phone if it has at least
/// seven digits, else email if it contains `@`, else a social handle.
pub fn infer_identifier_type(value_raw: &str) -> IdentifierType {
    let digit_count = value_raw.chars().filter(|c| c.is_ascii_digit()).count();
    if digit_count >= 7 {
        IdentifierType::Phone
    } else if value_raw.contains('@') {
        IdentifierType::Email
    } else {
        IdentifierType::SocialHandle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_keeps_leading_plus_and_strips_punctuation() {
        assert_eq!(normalize(IdentifierType::Phone, "+1 (555) 123-4567").unwrap(), "+15551234567");
        assert_eq!(normalize(IdentifierType::Phone, "555.123.4567").unwrap(), "5551234567");
    }

    #[test]
    fn email_lowercases_and_trims() {
        assert_eq!(normalize(IdentifierType::Email, "  Alice@Example.COM ").unwrap(), "alice@example.com");
    }

    #[test]
    fn handle_strips_at_and_lowercases() {
        assert_eq!(normalize(IdentifierType::SocialHandle, "@Alice_99").unwrap(), "alice_99");
    }

    #[test]
    fn empty_normalized_is_rejected() {
        assert!(normalize(IdentifierType::Phone, "+++").is_err());
        assert!(normalize(IdentifierType::SocialHandle, "@").is_err());
    }

    #[test]
    fn infers_phone_email_and_handle() {
        assert_eq!(infer_identifier_type("+15551234567"), IdentifierType::Phone);
        assert_eq!(infer_identifier_type("alice@example.com"), IdentifierType::Email);
        assert_eq!(infer_identifier_type("alice_handle"), IdentifierType::SocialHandle);
    }
}
