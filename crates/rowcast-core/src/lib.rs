//! # Rowcast Core
//!
//! Shared error taxonomy, configuration, record types and the adapter
//! traits every other Rowcast crate is written against.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::RowcastConfig;
pub use error::{Result, RowcastError};
pub use traits::{MessageTransport, RecordStore};
pub use types::{DispatchMode, DispatchRecord, DispatchRun};
