//! Sheet row decoding — header lookup, A1 addressing, attachment links.

use regex::Regex;
use rowcast_core::types::DispatchRecord;
use std::sync::LazyLock;

pub const RECIPIENTS_HEADER: &str = "phone numbers";
pub const BODY_HEADER: &str = "message text";
pub const STATUS_HEADER: &str = "status";
pub const TIME_HEADER: &str = "time";
pub const IMAGE_HEADER: &str = "image";
pub const RUN_HEADER: &str = "run";

/// Headers in the order `MemoryStore::from_records` lays them out.
pub const STANDARD_HEADERS: [&str; 6] = [
    "Phone Numbers",
    "Message Text",
    "Status",
    "Time",
    "Image",
    "Run",
];

static DRIVE_FILE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/d/(.*?)/").expect("static regex"));

/// Column positions resolved from a header row.
#[derive(Debug, Clone)]
pub struct SheetLayout {
    headers: Vec<String>,
}

impl SheetLayout {
    pub fn from_header_row(row: &[String]) -> Self {
        Self {
            headers: row.iter().map(|h| h.trim().to_lowercase()).collect(),
        }
    }

    /// Case-insensitive header lookup.
    pub fn column(&self, name: &str) -> Option<usize> {
        let wanted = name.trim().to_lowercase();
        self.headers.iter().position(|h| *h == wanted)
    }

    /// Decode data rows (everything after the header row). Short rows are
    /// padded with empty cells; row indices start at 2.
    pub fn decode(&self, data_rows: &[Vec<String>]) -> Vec<DispatchRecord> {
        data_rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let row_index = i as u32 + 2;
                let cell = |name: &str| -> String {
                    self.column(name)
                        .and_then(|idx| row.get(idx))
                        .cloned()
                        .unwrap_or_default()
                };
                let scheduled = cell(TIME_HEADER);
                DispatchRecord {
                    recipients: cell(RECIPIENTS_HEADER),
                    body: cell(BODY_HEADER),
                    attachment: normalize_attachment(&cell(IMAGE_HEADER), row_index),
                    status: cell(STATUS_HEADER),
                    scheduled_at: Some(scheduled).filter(|s| !s.trim().is_empty()),
                    run_gate: cell(RUN_HEADER),
                    row_index,
                }
            })
            .collect()
    }
}

/// Map Drive file links to their direct-download form. Other URLs pass
/// through; blanks and unparseable Drive links become `None`.
pub fn normalize_attachment(raw: &str, row_index: u32) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if value.contains("drive.google.com/file/d/") {
        return match DRIVE_FILE_ID.captures(value).and_then(|c| c.get(1)) {
            Some(id) if !id.as_str().is_empty() => Some(format!(
                "https://drive.google.com/uc?export=view&id={}",
                id.as_str()
            )),
            _ => {
                tracing::warn!("Invalid Google Drive link in row {row_index}: {value}");
                None
            }
        };
    }
    Some(value.to_string())
}

/// Sheet titles match case-insensitively, including non-ASCII letters.
pub fn same_title(title: &str, wanted: &str) -> bool {
    title == wanted || title.to_lowercase() == wanted.to_lowercase()
}

/// Zero-based column index to A1 letters (0 → A, 25 → Z, 26 → AA).
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}
