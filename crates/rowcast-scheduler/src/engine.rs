//! Dispatch engine — one pass over the message sheet.
//!
//! Each pass reads the sheet fresh, counts outstanding scheduled rows,
//! sends every eligible row to all of its recipients and marks fully
//! delivered rows as sent. Passes on one engine never overlap.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use rowcast_channels::ChannelDispatcher;
use rowcast_core::config::RowcastConfig;
use rowcast_core::error::{Result, RowcastError};
use rowcast_core::traits::RecordStore;
use rowcast_core::types::{DispatchMode, DispatchRecord, DispatchRun};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::due::{self, DueState};
use crate::recurrence::WorkFn;

pub const DEFAULT_SENT_MARKER: &str = "✅ Sent";
pub const DEFAULT_STATUS_FIELD: &str = "Status";

pub struct DispatchEngine {
    store: Arc<dyn RecordStore>,
    dispatcher: ChannelDispatcher,
    sheet: String,
    status_field: String,
    sent_marker: String,
    /// Held for the whole pass.
    run_guard: Mutex<()>,
}

impl DispatchEngine {
    pub fn new(store: Arc<dyn RecordStore>, dispatcher: ChannelDispatcher, sheet: impl Into<String>) -> Self {
        Self {
            store,
            dispatcher,
            sheet: sheet.into(),
            status_field: DEFAULT_STATUS_FIELD.into(),
            sent_marker: DEFAULT_SENT_MARKER.into(),
            run_guard: Mutex::new(()),
        }
    }

    pub fn from_config(store: Arc<dyn RecordStore>, dispatcher: ChannelDispatcher, config: &RowcastConfig) -> Self {
        Self::new(store, dispatcher, config.store.sheet_name.clone())
            .with_status_field(config.store.status_field.clone())
            .with_sent_marker(config.dispatch.sent_marker.clone())
    }

    pub fn with_status_field(mut self, field: impl Into<String>) -> Self {
        self.status_field = field.into();
        self
    }

    pub fn with_sent_marker(mut self, marker: impl Into<String>) -> Self {
        self.sent_marker = marker.into();
        self
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    pub fn dispatcher(&self) -> &ChannelDispatcher {
        &self.dispatcher
    }

    /// Whether a pass is in progress right now.
    pub fn is_running(&self) -> bool {
        self.run_guard.try_lock().is_err()
    }

    /// Run one pass, waiting for any in-flight pass to finish first.
    pub async fn run(&self, mode: DispatchMode, tz: Tz, window_minutes: i64) -> Result<DispatchRun> {
        let _guard = self.run_guard.lock().await;
        self.pass(mode, tz, window_minutes, Utc::now()).await
    }

    /// Run one pass unless another is in progress, in which case fail
    /// with `Busy` without touching the sheet.
    pub async fn try_run(&self, mode: DispatchMode, tz: Tz, window_minutes: i64) -> Result<DispatchRun> {
        let _guard = self
            .run_guard
            .try_lock()
            .map_err(|_| RowcastError::Busy(format!("sheet \"{}\"", self.sheet)))?;
        self.pass(mode, tz, window_minutes, Utc::now()).await
    }

    /// `run` with an explicit clock.
    pub async fn run_at(
        &self,
        mode: DispatchMode,
        tz: Tz,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<DispatchRun> {
        let _guard = self.run_guard.lock().await;
        self.pass(mode, tz, window_minutes, now).await
    }

    /// Work function for a recurring job: a scheduled-mode pass that
    /// skips the tick when a pass is already running.
    pub fn scheduled_work(self: &Arc<Self>, tz: Tz, window_minutes: i64) -> WorkFn {
        let engine = Arc::clone(self);
        Arc::new(move || {
            let engine = Arc::clone(&engine);
            async move { engine.try_run(DispatchMode::Scheduled, tz, window_minutes).await }.boxed()
        })
    }

    async fn pass(
        &self,
        mode: DispatchMode,
        tz: Tz,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<DispatchRun> {
        tracing::info!("Processing sheet \"{}\" (mode: {mode})", self.sheet);
        let records = self.store.list_records(&self.sheet).await?;
        if records.is_empty() {
            tracing::info!("No data to process");
            return Ok(DispatchRun::empty());
        }

        let mut run = DispatchRun {
            remaining_scheduled: records
                .iter()
                .filter(|r| !r.is_sent() && r.is_schedulable())
                .count() as i64,
            ..Default::default()
        };

        for record in &records {
            self.process(record, mode, tz, window_minutes, now, &mut run).await;
        }

        run.should_stop_recurrence = run.remaining_scheduled <= 0;
        tracing::info!(
            "Run complete. Sent: {}, Failed: {}, Skipped: {}. Remaining scheduled: {}",
            run.sent,
            run.failed,
            run.skipped,
            run.remaining_scheduled
        );
        Ok(run)
    }

    async fn process(
        &self,
        record: &DispatchRecord,
        mode: DispatchMode,
        tz: Tz,
        window_minutes: i64,
        now: DateTime<Utc>,
        run: &mut DispatchRun,
    ) {
        let row = record.row_index;
        let tokens = record.recipient_tokens();
        if tokens.is_empty() || record.body.is_empty() || record.is_sent() {
            return;
        }

        if !record.is_gate_open() {
            if record.is_schedulable() {
                run.remaining_scheduled -= 1;
            }
            run.skipped += 1;
            return;
        }

        match (mode, record.scheduled_at.as_deref()) {
            (DispatchMode::Instant, Some(_)) => {
                run.skipped += 1;
                return;
            }
            (DispatchMode::Scheduled, None) => {
                run.skipped += 1;
                return;
            }
            (DispatchMode::Scheduled, Some(raw)) => match due::evaluate(raw, tz, now, window_minutes) {
                DueState::Due => {}
                DueState::Pending => {
                    run.skipped += 1;
                    return;
                }
                DueState::Missed => {
                    tracing::warn!(
                        "Row {row}: scheduled time \"{raw}\" is more than {window_minutes} minutes past; it stays pending and will not be sent"
                    );
                    run.skipped += 1;
                    return;
                }
                DueState::Unparsable => {
                    tracing::warn!("Row {row}: cannot parse scheduled time \"{raw}\"");
                    run.skipped += 1;
                    return;
                }
            },
            _ => {}
        }

        tracing::info!("Processing row {row}: sending to {}", tokens.join(", "));
        let mut failed_tokens = 0u32;
        for token in &tokens {
            if let Err(e) = self
                .dispatcher
                .send(token, &record.body, record.attachment.as_deref())
                .await
            {
                failed_tokens += 1;
                tracing::error!("Row {row}: failed to send to {token}: {e}");
            }
        }

        if failed_tokens > 0 {
            run.failed += failed_tokens;
            return;
        }

        run.sent += 1;
        if record.is_schedulable() {
            run.remaining_scheduled -= 1;
        }
        if let Err(e) = self
            .store
            .update_field(&self.sheet, row, &self.status_field, &self.sent_marker)
            .await
        {
            tracing::warn!(
                "Row {row}: delivered but status write failed ({e}); the row will be retried next run"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowcast_channels::{RecordingTransport, SentMessage};
    use rowcast_store::MemoryStore;

    const SHEET: &str = "Messages";

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn tz() -> Tz {
        "UTC".parse().unwrap()
    }

    struct Harness {
        store: Arc<MemoryStore>,
        transport: Arc<RecordingTransport>,
        engine: Arc<DispatchEngine>,
    }

    fn harness(records: &[DispatchRecord]) -> Harness {
        harness_with(records, RecordingTransport::new())
    }

    fn harness_with(records: &[DispatchRecord], transport: RecordingTransport) -> Harness {
        let store = Arc::new(MemoryStore::from_records(SHEET, records));
        let transport = Arc::new(transport);
        let engine = Arc::new(DispatchEngine::new(
            store.clone(),
            ChannelDispatcher::new(transport.clone()),
            SHEET,
        ));
        Harness { store, transport, engine }
    }

    fn record(recipients: &str, body: &str) -> DispatchRecord {
        DispatchRecord::new(0, recipients, body).with_gate("yes")
    }

    #[tokio::test]
    async fn test_instant_two_recipients() {
        let h = harness(&[record("111,222", "hi")]);
        let run = h.engine.run(DispatchMode::Instant, tz(), 60).await.unwrap();

        assert_eq!((run.sent, run.failed, run.skipped), (1, 0, 0));
        assert_eq!(run.remaining_scheduled, 0);
        assert!(run.should_stop_recurrence);
        assert_eq!(h.transport.sent().len(), 2);
        assert_eq!(h.store.cell(SHEET, 2, "Status").as_deref(), Some("✅ Sent"));
    }

    #[tokio::test]
    async fn test_closed_gate_is_skipped_without_side_effects() {
        let h = harness(&[DispatchRecord::new(0, "111,222", "hi").with_gate("no")]);
        let run = h.engine.run(DispatchMode::Combined, tz(), 60).await.unwrap();

        assert_eq!((run.sent, run.failed, run.skipped), (0, 0, 1));
        assert!(h.transport.sent().is_empty());
        assert!(h.store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_sent_records_are_never_touched() {
        let h = harness(&[
            record("111", "hi").with_status("✅ Sent"),
            record("222", "hi").with_status("sent by hand").with_schedule("2026-03-01 10:00"),
            record("333", "hi").with_status("SENT"),
        ]);
        for mode in [DispatchMode::Instant, DispatchMode::Scheduled, DispatchMode::Combined] {
            let run = h
                .engine
                .run_at(mode, tz(), 60, utc("2026-03-01T10:05:00Z"))
                .await
                .unwrap();
            assert_eq!((run.sent, run.failed, run.skipped), (0, 0, 0));
            assert_eq!(run.remaining_scheduled, 0);
        }
        assert!(h.transport.sent().is_empty());
        assert!(h.store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_empty_recipients_or_body_skipped_silently() {
        let h = harness(&[record("", "hi"), record("111", ""), record(" ;, ", "hi")]);
        let run = h.engine.run(DispatchMode::Combined, tz(), 60).await.unwrap();
        assert_eq!((run.sent, run.failed, run.skipped), (0, 0, 0));
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_separator_only_recipients_never_touch_counters() {
        let h = harness(&[
            DispatchRecord::new(0, " ;, ", "hi")
                .with_gate("no")
                .with_schedule("2026-03-01 10:00"),
            DispatchRecord::new(0, " ", "hi")
                .with_gate("no")
                .with_schedule("2026-03-01 10:00"),
        ]);
        let run = h
            .engine
            .run_at(DispatchMode::Scheduled, tz(), 60, utc("2026-03-01T10:05:00Z"))
            .await
            .unwrap();
        assert_eq!((run.sent, run.failed, run.skipped), (0, 0, 0));
        assert_eq!(run.remaining_scheduled, 2);
        assert!(h.store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_counts_failing_tokens() {
        let h = harness(&[record("111,222", "hi")]);
        h.transport.fail_address("222@c.us");

        let run = h.engine.run(DispatchMode::Instant, tz(), 60).await.unwrap();
        assert_eq!((run.sent, run.failed, run.skipped), (0, 1, 0));
        assert!(h.store.writes().is_empty());
        // The successful token was still delivered.
        assert_eq!(h.transport.sent().len(), 1);

        let h = harness(&[record("333,222", "hi").with_schedule("2026-03-01 10:00")]);
        h.transport.fail_address("222@c.us");
        let run = h
            .engine
            .run_at(DispatchMode::Scheduled, tz(), 60, utc("2026-03-01T10:05:00Z"))
            .await
            .unwrap();
        assert_eq!((run.sent, run.failed, run.skipped), (0, 1, 0));
        assert_eq!(run.remaining_scheduled, 1);
        assert!(!run.should_stop_recurrence);
        assert!(h.store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_every_failing_token_counts() {
        let h = harness(&[record("111;222;333", "hi")]);
        h.transport.fail_address("111@c.us");
        h.transport.fail_address("333@c.us");

        let run = h.engine.run(DispatchMode::Combined, tz(), 60).await.unwrap();
        assert_eq!((run.sent, run.failed), (0, 2));
    }

    #[tokio::test]
    async fn test_invalid_token_fails_record() {
        let h = harness(&[record("111, not-a-number", "hi")]);
        let run = h.engine.run(DispatchMode::Combined, tz(), 60).await.unwrap();
        assert_eq!((run.sent, run.failed), (0, 1));
        assert!(h.store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_tokens_send_twice() {
        let h = harness(&[record("111,111", "hi")]);
        let run = h.engine.run(DispatchMode::Combined, tz(), 60).await.unwrap();
        assert_eq!(run.sent, 1);
        assert_eq!(h.transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_mode_partition() {
        let now = utc("2026-03-01T10:10:00Z");
        let records = [
            record("111", "instant"),
            record("222", "scheduled").with_schedule("2026-03-01 10:00"),
        ];

        let h = harness(&records);
        let run = h.engine.run_at(DispatchMode::Instant, tz(), 60, now).await.unwrap();
        assert_eq!((run.sent, run.skipped), (1, 1));
        assert_eq!(run.remaining_scheduled, 1);
        assert!(!run.should_stop_recurrence);
        assert!(h.transport.sent().iter().all(|m| m.address() == "111@c.us"));

        let h = harness(&records);
        let run = h.engine.run_at(DispatchMode::Scheduled, tz(), 60, now).await.unwrap();
        assert_eq!((run.sent, run.skipped), (1, 1));
        assert_eq!(run.remaining_scheduled, 0);
        assert!(run.should_stop_recurrence);
        assert!(h.transport.sent().iter().all(|m| m.address() == "222@c.us"));

        let h = harness(&records);
        let run = h.engine.run_at(DispatchMode::Combined, tz(), 60, now).await.unwrap();
        assert_eq!((run.sent, run.skipped), (2, 0));
    }

    #[tokio::test]
    async fn test_combined_ignores_due_window() {
        let h = harness(&[record("111", "future").with_schedule("2030-01-01 09:00")]);
        let run = h
            .engine
            .run_at(DispatchMode::Combined, tz(), 60, utc("2026-03-01T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(run.sent, 1);
        assert_eq!(run.remaining_scheduled, 0);
    }

    #[tokio::test]
    async fn test_scheduled_pending_stays_remaining() {
        let h = harness(&[record("111", "later").with_schedule("2026-03-01 12:00")]);
        let run = h
            .engine
            .run_at(DispatchMode::Scheduled, tz(), 60, utc("2026-03-01T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!((run.sent, run.skipped), (0, 1));
        assert_eq!(run.remaining_scheduled, 1);
        assert!(!run.should_stop_recurrence);
    }

    #[tokio::test]
    async fn test_missed_record_never_sent_and_stays_counted() {
        let now = utc("2026-03-01T12:00:00Z");
        let h = harness(&[record("111", "missed").with_schedule("2026-03-01 10:00")]);
        let run = h.engine.run_at(DispatchMode::Scheduled, tz(), 60, now).await.unwrap();

        assert_eq!((run.sent, run.skipped), (0, 1));
        assert!(run.remaining_scheduled >= 1);
        assert!(!run.should_stop_recurrence);
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_time_is_skip_not_error() {
        let h = harness(&[record("111", "hi").with_schedule("whenever")]);
        let run = h.engine.run(DispatchMode::Scheduled, tz(), 60).await.unwrap();
        assert_eq!((run.sent, run.failed, run.skipped), (0, 0, 1));
        assert_eq!(run.remaining_scheduled, 1);
    }

    #[tokio::test]
    async fn test_closed_gate_releases_scheduled_count() {
        let h = harness(&[
            DispatchRecord::new(0, "111", "hi").with_schedule("2026-03-01 10:00").with_gate(""),
        ]);
        let run = h.engine.run(DispatchMode::Scheduled, tz(), 60).await.unwrap();
        assert_eq!(run.skipped, 1);
        assert_eq!(run.remaining_scheduled, 0);
        assert!(run.should_stop_recurrence);
    }

    #[tokio::test]
    async fn test_scheduled_twice_sends_once() {
        let now = utc("2026-03-01T10:30:00Z");
        let h = harness(&[
            record("111", "a").with_schedule("2026-03-01 10:00"),
            record("222", "b").with_schedule("2026-03-01 10:15"),
            record("333", "c").with_schedule("2026-03-01 18:00"),
        ]);

        let first = h.engine.run_at(DispatchMode::Scheduled, tz(), 60, now).await.unwrap();
        assert_eq!(first.sent, 2);
        assert_eq!(first.remaining_scheduled, 1);

        let second = h.engine.run_at(DispatchMode::Scheduled, tz(), 60, now).await.unwrap();
        assert_eq!(second.sent, 0);
        assert_eq!(second.remaining_scheduled, 1);
        assert_eq!(h.transport.sent().len(), 2);
        assert_eq!(h.store.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_time_zone_applied_to_due_check() {
        let kolkata: Tz = "Asia/Kolkata".parse().unwrap();
        let h = harness(&[record("111", "hi").with_schedule("01/03/2026 10:00")]);
        // 10:00 IST is 04:30 UTC.
        let run = h
            .engine
            .run_at(DispatchMode::Scheduled, kolkata, 60, utc("2026-03-01T04:45:00Z"))
            .await
            .unwrap();
        assert_eq!(run.sent, 1);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_accounting() {
        let h = harness(&[record("111", "hi").with_schedule("2026-03-01 10:00")]);
        h.store.set_fail_writes(true);

        let run = h
            .engine
            .run_at(DispatchMode::Scheduled, tz(), 60, utc("2026-03-01T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(run.sent, 1);
        assert_eq!(run.remaining_scheduled, 0);
        assert!(run.should_stop_recurrence);
        assert_eq!(h.store.cell(SHEET, 2, "Status").as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_read_failure_aborts_run() {
        let h = harness(&[record("111", "hi")]);
        h.store.set_fail_reads(true);
        let err = h.engine.run(DispatchMode::Combined, tz(), 60).await.unwrap_err();
        assert!(matches!(err, RowcastError::Store(_)));
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_sheet_aborts_run() {
        let store = Arc::new(MemoryStore::from_records("Outbox", &[record("111", "hi")]));
        let engine = DispatchEngine::new(
            store,
            ChannelDispatcher::new(Arc::new(RecordingTransport::new())),
            SHEET,
        );
        let err = engine.run(DispatchMode::Combined, tz(), 60).await.unwrap_err();
        assert!(matches!(err, RowcastError::StoreNotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_sheet_stops() {
        let h = harness(&[]);
        let run = h.engine.run(DispatchMode::Scheduled, tz(), 60).await.unwrap();
        assert_eq!(run, DispatchRun::empty());
    }

    #[tokio::test]
    async fn test_attachment_passed_through() {
        let h = harness(&[record("111", "look").with_attachment("https://example.com/a.png")]);
        h.engine.run(DispatchMode::Combined, tz(), 60).await.unwrap();
        assert_eq!(
            h.transport.sent(),
            vec![SentMessage::Media {
                address: "111@c.us".into(),
                url: "https://example.com/a.png".into(),
                caption: "look".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_custom_marker_and_field() {
        let store = Arc::new(MemoryStore::new().with_sheet(
            SHEET,
            &["Phone Numbers", "Message Text", "Run", "Delivery"],
            vec![vec!["111".into(), "hi".into(), "yes".into(), String::new()]],
        ));
        let engine = DispatchEngine::new(
            store.clone(),
            ChannelDispatcher::new(Arc::new(RecordingTransport::new())),
            SHEET,
        )
        .with_status_field("Delivery")
        .with_sent_marker("sent ok");
        engine.run(DispatchMode::Combined, tz(), 60).await.unwrap();
        assert_eq!(store.cell(SHEET, 2, "Delivery").as_deref(), Some("sent ok"));
    }

    #[tokio::test]
    async fn test_passes_never_overlap() {
        let h = harness_with(
            &[record("111,222", "hi"), record("333", "hi")],
            RecordingTransport::new().with_delay(std::time::Duration::from_millis(20)),
        );

        let (a, b) = tokio::join!(
            h.engine.run(DispatchMode::Combined, tz(), 60),
            h.engine.run(DispatchMode::Combined, tz(), 60),
        );
        let total_sent = a.unwrap().sent + b.unwrap().sent;

        // The second pass sees the first pass's writes.
        assert_eq!(total_sent, 2);
        assert_eq!(h.transport.sent().len(), 3);
        assert_eq!(h.transport.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_try_run_reports_busy() {
        let h = harness_with(
            &[record("111", "hi")],
            RecordingTransport::new().with_delay(std::time::Duration::from_millis(50)),
        );
        let engine = h.engine.clone();
        let first = tokio::spawn(async move { engine.run(DispatchMode::Combined, tz(), 60).await });

        while !h.engine.is_running() {
            tokio::task::yield_now().await;
        }
        let err = h.engine.try_run(DispatchMode::Scheduled, tz(), 60).await.unwrap_err();
        assert!(matches!(err, RowcastError::Busy(_)));

        assert_eq!(first.await.unwrap().unwrap().sent, 1);
        assert!(!h.engine.is_running());
    }

    #[tokio::test]
    async fn test_scheduled_work_binds_scheduled_mode() {
        let h = harness(&[record("111", "instant only")]);
        let work = h.engine.scheduled_work(tz(), 60);
        let run = work().await.unwrap();
        assert_eq!((run.sent, run.skipped), (0, 1));
        assert!(run.should_stop_recurrence);
    }
}
