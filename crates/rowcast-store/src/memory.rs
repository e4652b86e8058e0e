//! In-memory record store — dry runs and tests.

use async_trait::async_trait;
use rowcast_core::error::{Result, RowcastError};
use rowcast_core::traits::RecordStore;
use rowcast_core::types::DispatchRecord;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::rows::{STANDARD_HEADERS, SheetLayout, same_title};

/// One cell write, as observed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWrite {
    pub sheet: String,
    pub row_index: u32,
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
struct Sheet {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Sheets held in memory with the same header and row semantics as the
/// Google Sheets adapter.
#[derive(Default)]
pub struct MemoryStore {
    sheets: Mutex<BTreeMap<String, Sheet>>,
    writes: Mutex<Vec<CellWrite>>,
    reads: Mutex<u32>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sheet from raw header and row cells.
    pub fn with_sheet(self, title: &str, header: &[&str], rows: Vec<Vec<String>>) -> Self {
        self.lock_sheets().insert(
            title.to_string(),
            Sheet {
                header: header.iter().map(|h| h.to_string()).collect(),
                rows,
            },
        );
        self
    }

    /// Add a sheet laid out with the standard headers. Row indices of the
    /// given records are ignored; position decides.
    pub fn from_records(title: &str, records: &[DispatchRecord]) -> Self {
        let rows = records
            .iter()
            .map(|r| {
                vec![
                    r.recipients.clone(),
                    r.body.clone(),
                    r.status.clone(),
                    r.scheduled_at.clone().unwrap_or_default(),
                    r.attachment.clone().unwrap_or_default(),
                    r.run_gate.clone(),
                ]
            })
            .collect();
        Self::new().with_sheet(title, &STANDARD_HEADERS, rows)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<CellWrite> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn read_count(&self) -> u32 {
        self.reads.lock().map(|r| *r).unwrap_or_default()
    }

    /// Current value of one cell, by header name.
    pub fn cell(&self, sheet: &str, row_index: u32, field: &str) -> Option<String> {
        let sheets = self.lock_sheets();
        let (_, data) = find_sheet(&sheets, sheet)?;
        let column = SheetLayout::from_header_row(&data.header).column(field)?;
        let row = data.rows.get(row_index.checked_sub(2)? as usize)?;
        Some(row.get(column).cloned().unwrap_or_default())
    }

    fn lock_sheets(&self) -> MutexGuard<'_, BTreeMap<String, Sheet>> {
        self.sheets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn find_sheet<'a>(sheets: &'a BTreeMap<String, Sheet>, name: &str) -> Option<(&'a String, &'a Sheet)> {
    sheets.iter().find(|(title, _)| same_title(title, name))
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_records(&self, sheet: &str) -> Result<Vec<DispatchRecord>> {
        if let Ok(mut reads) = self.reads.lock() {
            *reads += 1;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RowcastError::store("simulated read failure"));
        }

        let sheets = self.lock_sheets();
        let (_, data) = find_sheet(&sheets, sheet)
            .ok_or_else(|| RowcastError::not_found(format!("sheet \"{sheet}\"")))?;
        Ok(SheetLayout::from_header_row(&data.header).decode(&data.rows))
    }

    async fn update_field(&self, sheet: &str, row_index: u32, field: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RowcastError::store("simulated write failure"));
        }

        let mut sheets = self.lock_sheets();
        let data = sheets
            .iter_mut()
            .find(|(title, _)| same_title(title, sheet))
            .map(|(_, data)| data)
            .ok_or_else(|| RowcastError::not_found(format!("sheet \"{sheet}\"")))?;

        let column = SheetLayout::from_header_row(&data.header)
            .column(field)
            .ok_or_else(|| RowcastError::not_found(format!("column \"{field}\"")))?;
        let row = row_index
            .checked_sub(2)
            .and_then(|i| data.rows.get_mut(i as usize))
            .ok_or_else(|| RowcastError::store(format!("row {row_index} out of range")))?;
        if row.len() <= column {
            row.resize(column + 1, String::new());
        }
        row[column] = value.to_string();
        drop(sheets);

        if let Ok(mut writes) = self.writes.lock() {
            writes.push(CellWrite {
                sheet: sheet.to_string(),
                row_index,
                field: field.to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }
}
