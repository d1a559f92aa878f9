//! Workbook header normalization (`spec.md §4.5`, Workbook parser step 1).

/// The canonical header keys every recognized column maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKey {
    Timestamp,
    Direction,
    Sender,
    Recipients,
    Body,
    Deleted,
    ThreadKey,
    Platform,
    ThreadTitle,
}

/// Reduce a header cell to a canonical, lower-case alphanumeric form
/// (`"Sent At"` → `"sentat"`) so synonym lookup is whitespace/punctuation
/// insensitive.
pub fn canonical_header_form(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Map a canonicalized header form to a [`HeaderKey`], if recognized.
pub fn lookup_header_key(canonical: &str) -> Option<HeaderKey> {
    match canonical {
        "timestamp" | "date" | "sentat" | "createdat" | "datetime" | "time" => {
            Some(HeaderKey::Timestamp)
        }
        "direction" | "dir" | "msgdirection" => Some(HeaderKey::Direction),
        "sender" | "from" | "fromaddress" => Some(HeaderKey::Sender),
        "recipients" | "recipient" | "to" | "toaddress" => Some(HeaderKey::Recipients),
        "body" | "message" | "text" | "content" => Some(HeaderKey::Body),
        "deleted" | "isdeleted" => Some(HeaderKey::Deleted),
        "threadkey" | "conversationid" | "chatid" | "threadid" => Some(HeaderKey::ThreadKey),
        "platform" | "service" | "app" => Some(HeaderKey::Platform),
        "threadtitle" | "chatname" | "conversationname" | "title" => Some(HeaderKey::ThreadTitle),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_and_maps_known_synonyms() {
        assert_eq!(canonical_header_form("Sent At"), "sentat");
        assert_eq!(lookup_header_key("sentat"), Some(HeaderKey::Timestamp));
        assert_eq!(lookup_header_key(&canonical_header_form("Created-At")), Some(HeaderKey::Timestamp));
        assert_eq!(lookup_header_key("unknowncolumn"), None);
    }
}
