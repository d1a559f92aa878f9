//! The UFDR/ZIP archive parser (`spec.md §4.5`, "Archive parser"): gathers
//! JSON and XML entries that look like message exports and extracts
//! [`ParsedMessage`]s from them by synonym lookup, the same table the
//! workbook parser uses for header cells.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use serde_json::Value;
use zip::ZipArchive;

use casegraph_types::model::Direction;

use crate::header::{canonical_header_form, lookup_header_key, HeaderKey};
use crate::parsed_message::{
    derive_thread_key, is_truthy_deleted, normalize_direction, normalize_platform,
    parse_flexible_timestamp, ParsedMessage,
};

/// Substrings an archive entry's path must contain (case-insensitively) to
/// be considered a message-export candidate.
const CANDIDATE_PATH_MARKERS: &[&str] =
    &["message", "sms", "imessage", "whatsapp", "chat", "conversation"];

/// Substrings that mark a candidate entry as likely encrypted rather than
/// merely an unsupported shape, for the empty-batch reason classification.
const ENCRYPTED_MARKERS: &[&str] = &["encrypt", "cipher", "protected"];

/// Result of parsing one UFDR/ZIP archive.
#[derive(Debug, Default)]
pub struct ArchiveParseResult {
    pub messages: Vec<ParsedMessage>,
    pub empty_reason: Option<String>,
}

/// Parse a UFDR (treated as a ZIP container) at `path`, looking for JSON and
/// XML entries that resemble message exports.
pub fn parse_archive(
    path: &Path,
    file_name: &str,
    mut on_progress: impl FnMut(f64),
) -> Result<ArchiveParseResult, crate::error::IngestError> {
    let file = std::fs::File::open(path).map_err(|e| crate::error::IngestError::UnreadableSource {
        path: path.display().to_string(),
        format: "ufdr",
        source: e.into(),
    })?;
    let mut archive = ZipArchive::new(file).map_err(|e| crate::error::IngestError::UnreadableSource {
        path: path.display().to_string(),
        format: "ufdr",
        source: e.into(),
    })?;

    let candidate_names: Vec<String> = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_string()))
        .filter(|name| is_candidate_path(name))
        .filter(|name| has_extension(name, "json") || has_extension(name, "xml"))
        .collect();

    if candidate_names.is_empty() {
        return Ok(ArchiveParseResult {
            messages: Vec::new(),
            empty_reason: Some(
                "UFDR message parsing not supported in this build. Generate a Cellebrite XLSX message export and import that."
                    .to_string(),
            ),
        });
    }

    let mut messages = Vec::new();
    let total = candidate_names.len().max(1);
    let mut artifact_counter: u64 = 0;

    for (idx, entry_name) in candidate_names.iter().enumerate() {
        let mut entry = archive
            .by_name(entry_name)
            .map_err(|e| crate::error::IngestError::UnreadableSource {
                path: path.display().to_string(),
                format: "ufdr",
                source: e.into(),
            })?;
        let mut contents = String::new();
        entry
            .read_to_string(&mut contents)
            .map_err(|e| crate::error::IngestError::UnreadableSource {
                path: path.display().to_string(),
                format: "ufdr",
                source: e.into(),
            })?;
        drop(entry);

        if has_extension(entry_name, "json") {
            parse_json_entry(&contents, entry_name, &mut artifact_counter, &mut messages);
        } else {
            parse_xml_entry(&contents, entry_name, &mut messages);
        }

        on_progress(0.03 + ((idx + 1) as f64 / total as f64) * 0.67);
    }

    if messages.is_empty() {
        let encrypted = candidate_names
            .iter()
            .any(|name| ENCRYPTED_MARKERS.iter().any(|m| name.to_ascii_lowercase().contains(m)));
        let reason = if encrypted {
            "Message artifacts appear encrypted; this build cannot decrypt proprietary mobile-extraction archives."
        } else {
            "No message parser is available for this evidence type."
        };
        return Ok(ArchiveParseResult {
            messages: Vec::new(),
            empty_reason: Some(reason.to_string()),
        });
    }

    let _ = file_name;
    Ok(ArchiveParseResult {
        messages,
        empty_reason: None,
    })
}

fn is_candidate_path(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    CANDIDATE_PATH_MARKERS.iter().any(|m| lower.contains(m))
}

fn has_extension(name: &str, ext: &str) -> bool {
    name.to_ascii_lowercase().ends_with(&format!(".{ext}"))
}

/// A partially-extracted message row, gathered field-by-field from either a
/// JSON object's keys or an XML element's attributes/children.
#[derive(Debug, Default)]
struct RawFields {
    fields: HashMap<HeaderKey, String>,
}

impl RawFields {
    fn set_if_absent(&mut self, key: HeaderKey, value: String) {
        if !value.trim().is_empty() {
            self.fields.entry(key).or_insert(value);
        }
    }

    fn get(&self, key: HeaderKey) -> Option<&str> {
        self.fields.get(&key).map(|s| s.as_str())
    }

    fn has_any_message_field(&self) -> bool {
        self.fields.contains_key(&HeaderKey::Body)
            || self.fields.contains_key(&HeaderKey::Sender)
            || self.fields.contains_key(&HeaderKey::Recipients)
    }

    fn into_parsed_message(self, source_locator: String) -> ParsedMessage {
        let sender = self.get(HeaderKey::Sender).map(|s| s.to_string());
        let recipients = self.get(HeaderKey::Recipients).map(|s| s.to_string());
        let platform = self
            .get(HeaderKey::Platform)
            .map(normalize_platform)
            .unwrap_or(casegraph_types::model::Platform::Other);
        let thread_key = self.get(HeaderKey::ThreadKey).map(|s| s.to_string()).unwrap_or_else(|| {
            derive_thread_key(platform, sender.as_deref().unwrap_or_default(), recipients.as_deref().unwrap_or_default())
        });
        ParsedMessage {
            platform,
            thread_key,
            timestamp_utc: self.get(HeaderKey::Timestamp).and_then(parse_flexible_timestamp),
            direction: self.get(HeaderKey::Direction).map(normalize_direction).unwrap_or(Direction::Unknown),
            sender,
            recipients,
            body: self.get(HeaderKey::Body).map(|s| s.to_string()),
            is_deleted: self.get(HeaderKey::Deleted).map(is_truthy_deleted).unwrap_or(false),
            source_locator,
        }
    }
}

fn parse_json_entry(
    contents: &str,
    entry_name: &str,
    artifact_counter: &mut u64,
    out: &mut Vec<ParsedMessage>,
) {
    let Ok(value) = serde_json::from_str::<Value>(contents) else {
        return;
    };
    walk_json_value(&value, entry_name, artifact_counter, out);
}

fn walk_json_value(value: &Value, entry_name: &str, artifact_counter: &mut u64, out: &mut Vec<ParsedMessage>) {
    match value {
        Value::Object(map) => {
            let mut fields = RawFields::default();
            for (key, val) in map {
                if let Some(header_key) = lookup_header_key(&canonical_header_form(key)) {
                    if let Some(text) = json_scalar_text(val) {
                        fields.set_if_absent(header_key, text);
                    }
                }
            }
            if fields.has_any_message_field() {
                *artifact_counter += 1;
                let locator = format!("ufdr:{entry_name}#artifact:{artifact_counter}");
                out.push(fields.into_parsed_message(locator));
            }
            for val in map.values() {
                walk_json_value(val, entry_name, artifact_counter, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_json_value(item, entry_name, artifact_counter, out);
            }
        }
        _ => {}
    }
}

fn json_scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_xml_entry(contents: &str, entry_name: &str, out: &mut Vec<ParsedMessage>) {
    let mut reader = XmlReader::from_str(contents);
    reader.config_mut().trim_text(true);
    let mut occurrence_of: HashMap<String, u64> = HashMap::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) | Ok(Event::Empty(start)) => {
                let local_name = local_name_of(&start);
                if !is_message_like_element(&local_name) {
                    continue;
                }
                let counter = occurrence_of.entry(local_name.clone()).or_insert(0);
                *counter += 1;
                let n = *counter;

                let mut fields = RawFields::default();
                for attr in start.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                    if let Some(header_key) = lookup_header_key(&canonical_header_form(&key)) {
                        if let Ok(val) = attr.unescape_value() {
                            fields.set_if_absent(header_key, val.to_string());
                        }
                    }
                }
                collect_descendant_text_fields(&mut reader, &local_name, &mut fields);

                if fields.has_any_message_field() {
                    let locator = format!("ufdr:{entry_name}#xpath:/{local_name}[{n}]");
                    out.push(fields.into_parsed_message(locator));
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }
}

fn local_name_of(start: &quick_xml::events::BytesStart) -> String {
    let full = String::from_utf8_lossy(start.name().as_ref()).to_string();
    full.rsplit(':').next().unwrap_or(&full).to_string()
}

fn is_message_like_element(local_name: &str) -> bool {
    let lower = local_name.to_ascii_lowercase();
    lower.contains("message") || lower.contains("chat") || lower.contains("sms")
}

/// Consume events until the matching end tag of `root_local_name`,
/// recording text content of each descendant element keyed by its
/// canonicalized local name.
fn collect_descendant_text_fields(reader: &mut XmlReader<&[u8]>, root_local_name: &str, fields: &mut RawFields) {
    let mut depth: u32 = 0;
    let mut current_field_name: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                depth += 1;
                current_field_name = Some(local_name_of(&start));
            }
            Ok(Event::Empty(_)) => {}
            Ok(Event::Text(text)) => {
                if let (Some(name), Ok(unescaped)) = (&current_field_name, text.unescape()) {
                    if let Some(header_key) = lookup_header_key(&canonical_header_form(name)) {
                        fields.set_if_absent(header_key, unescaped.to_string());
                    }
                }
            }
            Ok(Event::End(end)) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).to_string();
                let local = name.rsplit(':').next().unwrap_or(&name).to_string();
                if depth == 0 && local == root_local_name {
                    return;
                }
                if depth > 0 {
                    depth -= 1;
                }
                current_field_name = None;
            }
            Ok(Event::Eof) | Err(_) => return,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_path_matches_known_markers() {
        assert!(is_candidate_path("data/SMS/backup.json"));
        assert!(is_candidate_path("conversations/thread1.xml"));
        assert!(!is_candidate_path("contacts/addressbook.json"));
    }

    #[test]
    fn walks_nested_json_objects_for_message_fields() {
        let value: Value = serde_json::json!({
            "conversation": {
                "messages": [
                    { "body": "hello", "from": "+15551234567" },
                    { "note": "not a message" }
                ]
            }
        });
        let mut counter = 0;
        let mut out = Vec::new();
        walk_json_value(&value, "chat.json", &mut counter, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].body.as_deref(), Some("hello"));
    }

    #[test]
    fn extracts_fields_from_xml_message_element() {
        let xml = r#"<root><sms><sender>+15551234567</sender><body>hi</body></sms></root>"#;
        let mut out = Vec::new();
        parse_xml_entry(xml, "sms.xml", &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sender.as_deref(), Some("+15551234567"));
        assert_eq!(out[0].body.as_deref(), Some("hi"));
    }
}
