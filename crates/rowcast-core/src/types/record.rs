//! Dispatch records as read from the record store.

use serde::{Deserialize, Serialize};

/// One row of the message sheet.
///
/// `status` and `run_gate` are free-text cells. They are interpreted with
/// the same fuzzy rules the sheet operators use by hand, so they stay
/// strings rather than enums.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRecord {
    /// Raw recipient cell (comma, semicolon or newline separated).
    pub recipients: String,
    pub body: String,
    /// Direct-fetchable attachment URL, already normalized by the store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<String>,
    pub run_gate: String,
    /// 1-based sheet row. Only valid for the invocation that read it.
    pub row_index: u32,
}

impl DispatchRecord {
    pub fn new(row_index: u32, recipients: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipients: recipients.into(),
            body: body.into(),
            row_index,
            ..Default::default()
        }
    }

    pub fn with_gate(mut self, gate: impl Into<String>) -> Self {
        self.run_gate = gate.into();
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_schedule(mut self, scheduled_at: impl Into<String>) -> Self {
        self.scheduled_at = Some(scheduled_at.into()).filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_attachment(mut self, attachment: impl Into<String>) -> Self {
        self.attachment = Some(attachment.into()).filter(|s| !s.trim().is_empty());
        self
    }

    /// Any status containing "sent", in any case, counts as delivered.
    pub fn is_sent(&self) -> bool {
        self.status.to_lowercase().contains("sent")
    }

    /// Only an exact, case-insensitive "yes" authorizes sending.
    pub fn is_gate_open(&self) -> bool {
        self.run_gate.eq_ignore_ascii_case("yes")
    }

    pub fn is_schedulable(&self) -> bool {
        self.scheduled_at.is_some()
    }

    pub fn recipient_tokens(&self) -> Vec<String> {
        parse_recipients(&self.recipients)
    }
}

/// Split a recipient cell into ordered, trimmed, non-empty tokens.
/// Duplicates are kept: each one is a separate send.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split([',', ';', '\n'])
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
        .collect()
}
