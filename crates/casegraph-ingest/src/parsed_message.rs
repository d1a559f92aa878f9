//! The parser-agnostic intermediate representation every source format
//! parser emits (`spec.md §4.5`), and the normalization helpers shared by
//! all of them.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sha2::{Digest, Sha256};

use casegraph_types::model::{Direction, Platform};

/// One message extracted from a source file, before it has been grouped
/// into threads or assigned database ids.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub platform: Platform,
    /// Caller-supplied thread key if the source carries one, otherwise the
    /// deterministic derived key (see [`derive_thread_key`]).
    pub thread_key: String,
    pub timestamp_utc: Option<DateTime<Utc>>,
    pub direction: Direction,
    pub sender: Option<String>,
    pub recipients: Option<String>,
    pub body: Option<String>,
    pub is_deleted: bool,
    pub source_locator: String,
}

/// Map a free-form platform token (an explicit `platform` cell, or a sheet
/// name used as a fallback) to a canonical [`Platform`] by substring match.
pub fn normalize_platform(raw: &str) -> Platform {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("imessage") {
        Platform::IMessage
    } else if lower.contains("whatsapp") {
        Platform::WhatsApp
    } else if lower.contains("signal") {
        Platform::Signal
    } else if lower.contains("instagram") {
        Platform::Instagram
    } else if lower.contains("sms") || lower.contains("mms") || lower.contains("chat") {
        Platform::Sms
    } else {
        Platform::Other
    }
}

/// Map a free-form direction token to a canonical [`Direction`] by
/// substring match. `"out"` is checked before `"in"` since "outgoing"
/// contains the substring `"in"`.
pub fn normalize_direction(raw: &str) -> Direction {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("out") {
        Direction::Outgoing
    } else if lower.contains("in") {
        Direction::Incoming
    } else {
        Direction::Unknown
    }
}

/// `true` if `raw` (trimmed, case-insensitively) is one of the truthy
/// deletion markers `{1,true,yes,y,deleted}`.
pub fn is_truthy_deleted(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "deleted"
    )
}

/// Canonicalize a `sender`/`recipients` cell into a sorted, deduplicated,
/// lowercase token set, splitting on `,`, `;`, or `|`.
pub fn canonical_identifier_set(raw: &str) -> Vec<String> {
    let mut tokens: Vec<String> = raw
        .split(|c| c == ',' || c == ';' || c == '|')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Derive the deterministic `v1:<12-byte-hex>` thread key from
/// `platform|canonical(sender)|canonical(recipients)`, per `spec.md §4.5`.
pub fn derive_thread_key(platform: Platform, sender: &str, recipients: &str) -> String {
    let sender_set = canonical_identifier_set(sender).join(",");
    let recipients_set = canonical_identifier_set(recipients).join(",");
    let input = format!("{platform}|{sender_set}|{recipients_set}");
    let digest = Sha256::digest(input.as_bytes());
    format!("v1:{}", hex::encode(&digest[..12]))
}

/// Parse a timestamp cell that may be ISO-8601-like text or an Excel/OLE
/// automation serial day-count (days since 1899-12-30, as Excel's buggy
/// epoch has it).
pub fn parse_flexible_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(serial) = trimmed.parse::<f64>() {
        return ole_automation_date_to_utc(serial);
    }
    None
}

fn ole_automation_date_to_utc(serial: f64) -> Option<DateTime<Utc>> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let whole_days = serial.trunc() as i64;
    let fractional_seconds = (serial.fract() * 86_400.0).round() as i64;
    let naive = epoch
        .checked_add_signed(chrono::Duration::days(whole_days))?
        .checked_add_signed(chrono::Duration::seconds(fractional_seconds))?;
    Some(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_key_matches_documented_example() {
        let key = derive_thread_key(Platform::Sms, "+15551234567", "+15557654321");
        let expected_input = "SMS|+15551234567|+15557654321";
        let expected = format!("v1:{}", hex::encode(&Sha256::digest(expected_input.as_bytes())[..12]));
        assert_eq!(key, expected);
    }

    #[test]
    fn direction_prefers_out_over_in_substring() {
        assert_eq!(normalize_direction("Outgoing"), Direction::Outgoing);
        assert_eq!(normalize_direction("Incoming"), Direction::Incoming);
        assert_eq!(normalize_direction("sideways"), Direction::Unknown);
    }

    #[test]
    fn canonical_set_dedupes_and_sorts() {
        assert_eq!(
            canonical_identifier_set("Bob,alice;BOB|carol"),
            vec!["alice".to_string(), "bob".to_string(), "carol".to_string()]
        );
    }

    #[test]
    fn parses_iso_and_ole_serial_timestamps() {
        let iso = parse_flexible_timestamp("2024-01-01T10:00:00Z").unwrap();
        assert_eq!(iso.to_rfc3339(), "2024-01-01T10:00:00+00:00");

        // 45000 OLE days ≈ 2023-03-15.
        let serial = parse_flexible_timestamp("45000").unwrap();
        assert_eq!(serial.format("%Y-%m-%d").to_string(), "2023-03-15");
    }
}
