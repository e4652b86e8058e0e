//! # Rowcast Store
//!
//! Record store adapters. `GoogleSheetsStore` talks to the Sheets v4 REST
//! API; `MemoryStore` keeps sheets in memory with identical row semantics.

pub mod auth;
pub mod memory;
pub mod rows;
pub mod sheets;

pub use auth::{ServiceAccountKey, SheetsAuth};
pub use memory::{CellWrite, MemoryStore};
pub use sheets::GoogleSheetsStore;
