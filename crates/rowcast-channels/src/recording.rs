//! Recording transport — logs every send instead of delivering it.
//!
//! Backs `rowcast run --dry-run` and the dispatch tests. Individual
//! addresses can be made to fail.

use async_trait::async_trait;
use rowcast_core::error::{Result, RowcastError};
use rowcast_core::traits::MessageTransport;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Text { address: String, body: String },
    Media { address: String, url: String, caption: String },
}

impl SentMessage {
    pub fn address(&self) -> &str {
        match self {
            SentMessage::Text { address, .. } | SentMessage::Media { address, .. } => address,
        }
    }
}

pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    joined: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    fail_media: AtomicBool,
    ready: AtomicBool,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            joined: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            fail_media: AtomicBool::new(false),
            ready: AtomicBool::new(true),
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Hold every send for `delay` before recording it.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every send to `address` fail.
    pub fn fail_address(&self, address: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(address.to_string());
        }
    }

    pub fn fail_media(&self, fail: bool) {
        self.fail_media.store(fail, Ordering::SeqCst);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn joined(&self) -> Vec<String> {
        self.joined.lock().map(|j| j.clone()).unwrap_or_default()
    }

    /// Highest number of sends observed in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn is_failing(&self, address: &str) -> bool {
        self.failing
            .lock()
            .map(|f| f.contains(address))
            .unwrap_or(false)
    }

    async fn record(&self, message: SentMessage) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.is_failing(message.address()) {
            return Err(RowcastError::transport(format!(
                "simulated rejection for {}",
                message.address()
            )));
        }
        tracing::info!("[dry-run] {message:?}");
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
        Ok(())
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn send_text(&self, address: &str, body: &str) -> Result<()> {
        self.record(SentMessage::Text {
            address: address.to_string(),
            body: body.to_string(),
        })
        .await
    }

    async fn send_media(&self, address: &str, attachment_url: &str, caption: &str) -> Result<()> {
        if self.fail_media.load(Ordering::SeqCst) {
            return Err(RowcastError::transport(format!(
                "simulated media failure for {attachment_url}"
            )));
        }
        self.record(SentMessage::Media {
            address: address.to_string(),
            url: attachment_url.to_string(),
            caption: caption.to_string(),
        })
        .await
    }

    async fn resolve_group_invite(&self, code: &str) -> Result<String> {
        if let Ok(mut joined) = self.joined.lock() {
            joined.push(code.to_string());
        }
        Ok(format!("{code}@g.us"))
    }
}
