//! Shared data types.

pub mod record;
pub mod run;

pub use record::{DispatchRecord, parse_recipients};
pub use run::{DispatchMode, DispatchRun};
