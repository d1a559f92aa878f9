//! The XLSX workbook parser (`spec.md §4.5`, "Workbook parser").

use std::collections::HashMap;
use std::path::Path;

use calamine::{open_workbook_auto, DataType, Reader};

use casegraph_types::model::Direction;

use crate::header::{canonical_header_form, lookup_header_key, HeaderKey};
use crate::parsed_message::{
    derive_thread_key, is_truthy_deleted, normalize_direction, normalize_platform,
    parse_flexible_timestamp, ParsedMessage,
};

/// Sheet names considered, in priority order, case-insensitively; the first
/// sheet in the workbook matching any of these is the only one selected per
/// platform family, first occurrence wins (`spec.md §4.5`).
const PREFERRED_SHEET_NAMES: &[&str] = &[
    "Messages", "SMS", "iMessage", "Chats", "Chat", "WhatsApp", "Signal", "Instagram",
];

/// Result of parsing one XLSX workbook.
#[derive(Debug, Default)]
pub struct WorkbookParseResult {
    pub messages: Vec<ParsedMessage>,
    /// Set when the batch is empty and a specific reason is known, per the
    /// literal strings `spec.md §4.5` specifies.
    pub empty_reason: Option<String>,
}

/// Parse an XLSX file at `path`, reporting progress every 5 rows and once
/// at EOF as `0.03 + processed/total * 0.67` via `on_progress`.
pub fn parse_workbook(
    path: &Path,
    file_name: &str,
    mut on_progress: impl FnMut(f64),
) -> Result<WorkbookParseResult, crate::error::IngestError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| crate::error::IngestError::UnreadableSource {
        path: path.display().to_string(),
        format: "xlsx",
        source: e.into(),
    })?;

    let sheet_names = workbook.sheet_names().to_vec();
    let selected_sheets = select_sheets(&sheet_names);
    if selected_sheets.is_empty() {
        return Ok(WorkbookParseResult {
            messages: Vec::new(),
            empty_reason: Some("No message sheets found; verify export settings.".to_string()),
        });
    }

    let mut messages = Vec::new();
    // Total rows across all selected sheets, for progress fraction; computed
    // up front so progress is monotone across sheet boundaries.
    let mut totals = Vec::new();
    for sheet_name in &selected_sheets {
        let range = workbook
            .worksheet_range(sheet_name)
            .map_err(|e| crate::error::IngestError::UnreadableSource {
                path: path.display().to_string(),
                format: "xlsx",
                source: anyhow::anyhow!("{e}"),
            })?;
        totals.push(range.height().saturating_sub(1));
    }
    let total_rows: usize = totals.iter().sum::<usize>().max(1);
    let mut processed_rows: usize = 0;

    for sheet_name in &selected_sheets {
        let range = workbook
            .worksheet_range(sheet_name)
            .map_err(|e| crate::error::IngestError::UnreadableSource {
                path: path.display().to_string(),
                format: "xlsx",
                source: anyhow::anyhow!("{e}"),
            })?;

        let mut rows = range.rows();
        let Some(header_row) = rows.next() else {
            continue;
        };
        let column_map = build_column_map(header_row);

        for (row_index, row) in rows.enumerate() {
            // +2: 1-based, plus the header row itself.
            let row_number = row_index + 2;
            let cell = |key: HeaderKey| -> Option<String> {
                column_map
                    .get(&key)
                    .and_then(|&idx| row.get(idx))
                    .map(cell_text)
                    .filter(|s| !s.is_empty())
            };

            let body = cell(HeaderKey::Body);
            let sender = cell(HeaderKey::Sender);
            let recipients = cell(HeaderKey::Recipients);
            if body.is_none() && sender.is_none() && recipients.is_none() {
                processed_rows += 1;
                continue;
            }

            let platform_raw = cell(HeaderKey::Platform).unwrap_or_else(|| sheet_name.clone());
            let platform = normalize_platform(&platform_raw);
            let thread_key = cell(HeaderKey::ThreadKey).unwrap_or_else(|| {
                derive_thread_key(
                    platform,
                    sender.as_deref().unwrap_or_default(),
                    recipients.as_deref().unwrap_or_default(),
                )
            });
            let direction = cell(HeaderKey::Direction)
                .map(|d| normalize_direction(&d))
                .unwrap_or(Direction::Unknown);
            let timestamp_utc = cell(HeaderKey::Timestamp).and_then(|t| parse_flexible_timestamp(&t));
            let is_deleted = cell(HeaderKey::Deleted).map(|d| is_truthy_deleted(&d)).unwrap_or(false);

            messages.push(ParsedMessage {
                platform,
                thread_key,
                timestamp_utc,
                direction,
                sender,
                recipients,
                body,
                is_deleted,
                source_locator: format!("xlsx:{file_name}#{sheet_name}:R{row_number}"),
            });

            processed_rows += 1;
            if processed_rows % 5 == 0 {
                on_progress(0.03 + (processed_rows as f64 / total_rows as f64) * 0.67);
            }
        }
    }
    on_progress(0.03 + 0.67);

    Ok(WorkbookParseResult {
        empty_reason: None,
        messages,
    })
}

/// Select the subset of `sheet_names` that match [`PREFERRED_SHEET_NAMES`],
/// case-insensitively, preserving workbook order.
fn select_sheets(sheet_names: &[String]) -> Vec<String> {
    sheet_names
        .iter()
        .filter(|name| {
            PREFERRED_SHEET_NAMES
                .iter()
                .any(|preferred| preferred.eq_ignore_ascii_case(name))
        })
        .cloned()
        .collect()
}

fn build_column_map(header_row: &[DataType]) -> HashMap<HeaderKey, usize> {
    let mut map = HashMap::new();
    for (idx, cell) in header_row.iter().enumerate() {
        let canonical = canonical_header_form(&cell_text(cell));
        if let Some(key) = lookup_header_key(&canonical) {
            map.entry(key).or_insert(idx);
        }
    }
    map
}

fn cell_text(cell: &DataType) -> String {
    match cell {
        DataType::Empty => String::new(),
        DataType::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_only_known_sheet_names_preserving_order() {
        let names = vec!["Notes".to_string(), "WhatsApp".to_string(), "Messages".to_string()];
        let selected = select_sheets(&names);
        assert_eq!(selected, vec!["WhatsApp".to_string(), "Messages".to_string()]);
    }

    #[test]
    fn no_matching_sheets_yields_empty_selection() {
        let names = vec!["Contacts".to_string(), "Calls".to_string()];
        assert!(select_sheets(&names).is_empty());
    }
}
