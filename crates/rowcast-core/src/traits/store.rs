//! Record store trait — the tabular source of dispatch records.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::DispatchRecord;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// List every data row of `sheet` in sheet order.
    ///
    /// Fails with `StoreNotFound` when no sheet matches `sheet`
    /// case-insensitively.
    async fn list_records(&self, sheet: &str) -> Result<Vec<DispatchRecord>>;

    /// Overwrite one cell. `field` is a column header, matched
    /// case-insensitively; unknown headers fail with `StoreNotFound`.
    async fn update_field(&self, sheet: &str, row_index: u32, field: &str, value: &str)
    -> Result<()>;
}
