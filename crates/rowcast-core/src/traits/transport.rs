//! Messaging transport trait — one shared, stateful session.

use async_trait::async_trait;

use crate::error::Result;

/// A logged-in messaging session.
///
/// Implementations are not expected to tolerate concurrent sends; callers
/// serialize access.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the session is authenticated and able to send.
    async fn is_ready(&self) -> bool;

    /// Send plain text to a canonical chat address.
    async fn send_text(&self, address: &str, body: &str) -> Result<()>;

    /// Fetch `attachment_url` and send it with `caption`.
    async fn send_media(&self, address: &str, attachment_url: &str, caption: &str) -> Result<()>;

    /// Join (or look up an already joined) group by invite code and
    /// return its chat address.
    async fn resolve_group_invite(&self, code: &str) -> Result<String>;
}
