//! Dispatch modes and per-invocation results.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::RowcastError;

/// Which records a dispatch pass is allowed to send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Only records without a scheduled time.
    Instant,
    /// Only records whose scheduled time is inside the due window.
    Scheduled,
    /// Everything gated, no due check.
    #[default]
    Combined,
}

impl DispatchMode {
    /// Lenient parse used by the control surface: anything unrecognized
    /// (or missing) runs in combined mode.
    pub fn from_request(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.parse().ok()).unwrap_or_default()
    }
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchMode::Instant => write!(f, "instant"),
            DispatchMode::Scheduled => write!(f, "scheduled"),
            DispatchMode::Combined => write!(f, "combined"),
        }
    }
}

impl FromStr for DispatchMode {
    type Err = RowcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "instant" => Ok(Self::Instant),
            "scheduled" => Ok(Self::Scheduled),
            "combined" => Ok(Self::Combined),
            other => Err(RowcastError::parse(format!("unknown dispatch mode '{other}'"))),
        }
    }
}

/// Summary of one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRun {
    pub sent: u32,
    /// Counted per failing recipient token, not per record.
    pub failed: u32,
    pub skipped: u32,
    /// Outstanding scheduled records. Signed: gate decrements can drive
    /// it below zero when the sheet changes mid-run.
    pub remaining_scheduled: i64,
    pub should_stop_recurrence: bool,
}

impl DispatchRun {
    /// What an empty sheet produces.
    pub fn empty() -> Self {
        Self {
            should_stop_recurrence: true,
            ..Default::default()
        }
    }

    /// Remaining count as reported to operators, clamped at zero.
    pub fn reported_remaining(&self) -> u64 {
        self.remaining_scheduled.max(0) as u64
    }
}
