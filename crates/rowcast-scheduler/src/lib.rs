//! # Rowcast Scheduler
//!
//! Turns rows of a sheet into sent messages.
//!
//! ## Architecture
//! ```text
//! RecurrenceController (tokio task per job)
//!   ├── Every(5m) / Cron("*/1 * * * *", Asia/Kolkata)
//!   └── on tick → DispatchEngine::try_run(Scheduled)
//!                   ├── RecordStore::list_records   (fresh every pass)
//!                   ├── due::evaluate                (scheduled rows only)
//!                   ├── ChannelDispatcher::send      (per recipient token)
//!                   └── RecordStore::update_field    ("✅ Sent")
//! ```
//! A job stops itself once a pass reports no scheduled rows remain.

pub mod cron;
pub mod due;
pub mod engine;
pub mod recurrence;

pub use cron::CronExpression;
pub use due::{DueState, is_due, parse_scheduled_time};
pub use engine::DispatchEngine;
pub use recurrence::{AutoStopFn, JobState, RecurrenceController, Schedule, WorkFn};
