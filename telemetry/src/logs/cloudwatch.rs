//! Durable cloud log sink.
//!
//! Records are serialized to JSON at the call boundary and pushed onto a
//! bounded queue. A background worker drains the queue into batches and ships
//! them through a [`LogIngestionClient`], flushing when a batch is full, on a
//! timer, on demand, and once more at shutdown. A full queue drops records
//! instead of blocking the caller.
//!
//! A batch is full at `BatchSize` events or [`MAX_BATCH_BYTES`], whichever
//! comes first. Events over [`MAX_EVENT_BYTES`] are truncated.
//!
//! Delivery failures are retried with exponential backoff, then logged and
//! counted in [`SinkStats`]. They never reach the code that emitted a record.

use super::sink::LogSink;
use crate::config::CloudWatchSinkSettings;
use crate::config::settings::MAX_BATCH_SIZE;
use crate::error::{DeliveryError, TelemetryError, TelemetryResult};
use crate::models::LogRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Timestamp layout of derived log-stream names.
pub const STREAM_TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-%6f";

/// Largest accepted request: the sum of every event's [`IngestEvent::size`].
pub const MAX_BATCH_BYTES: usize = 1_048_576;

/// Bytes the ingestion API charges per event on top of its message.
pub const EVENT_OVERHEAD_BYTES: usize = 26;

/// Longest message kept in a single event.
pub const MAX_EVENT_BYTES: usize = 262_144 - EVENT_OVERHEAD_BYTES;

/// Derives the log-stream name from the process start time.
///
/// Instances started at different times (microsecond resolution) get
/// distinct streams.
///
/// # Example
///
/// ```
/// use chrono::TimeZone;
/// use telemetry::logs::cloudwatch::log_stream_name;
///
/// let started = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 13, 45, 30).unwrap();
/// assert_eq!(log_stream_name("checkout-", started), "checkout-2024-05-01-13-45-30-000000");
/// ```
#[must_use]
pub fn log_stream_name(prefix: &str, started_at: DateTime<Utc>) -> String {
    format!("{prefix}{}", started_at.format(STREAM_TIME_FORMAT))
}

/// One event as sent to the ingestion API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp_millis: i64,
    /// The serialized record.
    pub message: String,
}

impl IngestEvent {
    /// Serializes a record as one JSON line, cut to [`MAX_EVENT_BYTES`].
    #[must_use]
    pub fn from_record(record: &LogRecord) -> Self {
        let message = serde_json::to_string(record).unwrap_or_else(|_| record.message.clone());
        Self {
            timestamp_millis: record.timestamp.timestamp_millis(),
            message: truncate_message(message),
        }
    }

    /// The bytes this event counts against [`MAX_BATCH_BYTES`].
    #[must_use]
    pub fn size(&self) -> usize {
        self.message.len() + EVENT_OVERHEAD_BYTES
    }
}

fn truncate_message(mut message: String) -> String {
    if message.len() > MAX_EVENT_BYTES {
        let mut end = MAX_EVENT_BYTES;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}

/// How many leading events fit in one request.
///
/// Always at least one, so a lone event never stalls the buffer.
fn batch_len(events: &[IngestEvent], max_events: usize) -> usize {
    let mut bytes = 0;
    let mut len = 0;
    for event in events.iter().take(max_events) {
        if len > 0 && bytes + event.size() > MAX_BATCH_BYTES {
            break;
        }
        bytes += event.size();
        len += 1;
    }
    len
}

/// The cloud log-ingestion API.
#[async_trait]
pub trait LogIngestionClient: Send + Sync {
    /// Creates a log stream. A stream that already exists is not an error.
    async fn create_log_stream(&self, log_group: &str, log_stream: &str)
        -> Result<(), DeliveryError>;

    /// Sends a batch of events, sorted by timestamp.
    async fn put_log_events(
        &self,
        log_group: &str,
        log_stream: &str,
        events: &[IngestEvent],
    ) -> Result<(), DeliveryError>;
}

/// Delivery counters, updated by the sink and its worker.
#[derive(Debug, Default)]
pub struct SinkStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed_batches: AtomicU64,
    retries: AtomicU64,
}

impl SinkStats {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(u64::try_from(n).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// A point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> SinkStatsSnapshot {
        SinkStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStatsSnapshot {
    /// Records queued for delivery.
    pub accepted: u64,
    /// Records dropped: queue full, sink closed, or retries exhausted.
    pub dropped: u64,
    /// Records the client accepted.
    pub delivered: u64,
    /// Batches given up on after the last retry.
    pub failed_batches: u64,
    /// Delivery attempts repeated after a failure.
    pub retries: u64,
}

enum Command {
    Record(IngestEvent),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Batches records into a cloud log group.
pub struct CloudWatchSink {
    log_group: String,
    log_stream: String,
    sender: mpsc::Sender<Command>,
    stats: Arc<SinkStats>,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CloudWatchSink {
    /// Starts the sink and its background worker.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(
        settings: &CloudWatchSinkSettings,
        client: Arc<dyn LogIngestionClient>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let log_stream = log_stream_name(&settings.log_stream_prefix, started_at);
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let stats = Arc::new(SinkStats::default());

        let worker = Worker::new(settings, client, log_stream.clone(), Arc::clone(&stats));
        let handle = tokio::spawn(worker.run(receiver, settings.flush_interval()));

        tracing::info!(
            log_group = %settings.log_group,
            log_stream = %log_stream,
            batch_size = settings.batch_size,
            "Durable log sink started"
        );

        Self {
            log_group: settings.log_group.clone(),
            log_stream,
            sender,
            stats,
            closed: AtomicBool::new(false),
            worker: Mutex::new(Some(handle)),
        }
    }

    /// The target log group.
    #[must_use]
    pub fn log_group(&self) -> &str {
        &self.log_group
    }

    /// The derived log-stream name.
    #[must_use]
    pub fn log_stream(&self) -> &str {
        &self.log_stream
    }

    /// Current delivery counters.
    #[must_use]
    pub fn stats(&self) -> SinkStatsSnapshot {
        self.stats.snapshot()
    }

    async fn request(&self, make: fn(oneshot::Sender<()>) -> Command) -> TelemetryResult<()> {
        let (ack, done) = oneshot::channel();
        let stopped = || TelemetryError::Sink {
            sink: "cloudwatch".to_string(),
            reason: "background worker has stopped".to_string(),
        };

        self.sender.send(make(ack)).await.map_err(|_| stopped())?;
        done.await.map_err(|_| stopped())
    }
}

impl std::fmt::Debug for CloudWatchSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudWatchSink")
            .field("log_group", &self.log_group)
            .field("log_stream", &self.log_stream)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LogSink for CloudWatchSink {
    fn name(&self) -> &str {
        "cloudwatch"
    }

    fn emit(&self, record: &LogRecord) {
        if self.closed.load(Ordering::Acquire) {
            SinkStats::add(&self.stats.dropped, 1);
            return;
        }

        match self.sender.try_send(Command::Record(IngestEvent::from_record(record))) {
            Ok(()) => SinkStats::add(&self.stats.accepted, 1),
            Err(mpsc::error::TrySendError::Full(_)) => {
                SinkStats::add(&self.stats.dropped, 1);
                tracing::debug!("Durable log sink queue full, dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                SinkStats::add(&self.stats.dropped, 1);
            }
        }
    }

    async fn flush(&self) -> TelemetryResult<()> {
        self.request(Command::Flush).await
    }

    async fn shutdown(&self) -> TelemetryResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.request(Command::Shutdown).await;
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Durable log sink worker ended abnormally");
            }
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            delivered = stats.delivered,
            dropped = stats.dropped,
            failed_batches = stats.failed_batches,
            "Durable log sink stopped"
        );
        result
    }
}

struct Worker {
    client: Arc<dyn LogIngestionClient>,
    log_group: String,
    log_stream: String,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
    stats: Arc<SinkStats>,
    stream_ready: bool,
    buffer: Vec<IngestEvent>,
    buffered_bytes: usize,
}

impl Worker {
    fn new(
        settings: &CloudWatchSinkSettings,
        client: Arc<dyn LogIngestionClient>,
        log_stream: String,
        stats: Arc<SinkStats>,
    ) -> Self {
        Self {
            client,
            log_group: settings.log_group.clone(),
            log_stream,
            batch_size: settings.batch_size.clamp(1, MAX_BATCH_SIZE),
            max_retries: settings.max_retries,
            retry_backoff: settings.retry_backoff(),
            stats,
            stream_ready: false,
            buffer: Vec::new(),
            buffered_bytes: 0,
        }
    }

    fn push(&mut self, event: IngestEvent) {
        self.buffered_bytes += event.size();
        self.buffer.push(event);
    }

    fn is_full(&self) -> bool {
        self.buffer.len() >= self.batch_size || self.buffered_bytes >= MAX_BATCH_BYTES
    }

    async fn run(mut self, mut receiver: mpsc::Receiver<Command>, flush_interval: Duration) {
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(Command::Record(event)) => {
                        self.push(event);
                        if self.is_full() {
                            self.drain().await;
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        self.drain().await;
                        let _ = ack.send(());
                    }
                    Some(Command::Shutdown(ack)) => {
                        receiver.close();
                        let mut acks = vec![ack];
                        while let Ok(command) = receiver.try_recv() {
                            match command {
                                Command::Record(event) => self.push(event),
                                Command::Flush(ack) | Command::Shutdown(ack) => acks.push(ack),
                            }
                        }
                        self.drain().await;
                        for ack in acks {
                            let _ = ack.send(());
                        }
                        break;
                    }
                    None => {
                        self.drain().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.drain().await,
            }
        }
    }

    async fn drain(&mut self) {
        while !self.buffer.is_empty() {
            let take = batch_len(&self.buffer, self.batch_size);
            let mut batch: Vec<IngestEvent> = self.buffer.drain(..take).collect();
            let bytes: usize = batch.iter().map(IngestEvent::size).sum();
            self.buffered_bytes = self.buffered_bytes.saturating_sub(bytes);
            batch.sort_by_key(|event| event.timestamp_millis);
            self.deliver(&batch).await;
        }
    }

    async fn deliver(&mut self, batch: &[IngestEvent]) {
        let mut attempt = 0;
        loop {
            match self.try_deliver(batch).await {
                Ok(()) => {
                    SinkStats::add(&self.stats.delivered, batch.len());
                    return;
                }
                Err(e) if attempt < self.max_retries => {
                    let delay = self.retry_backoff.saturating_mul(2_u32.saturating_pow(attempt));
                    tracing::debug!(error = %e, attempt, ?delay, "Retrying log delivery");
                    SinkStats::add(&self.stats.retries, 1);
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        events = batch.len(),
                        log_group = %self.log_group,
                        "Dropping log batch after failed delivery"
                    );
                    SinkStats::add(&self.stats.failed_batches, 1);
                    SinkStats::add(&self.stats.dropped, batch.len());
                    return;
                }
            }
        }
    }

    async fn try_deliver(&mut self, batch: &[IngestEvent]) -> Result<(), DeliveryError> {
        if !self.stream_ready {
            self.client
                .create_log_stream(&self.log_group, &self.log_stream)
                .await?;
            self.stream_ready = true;
            tracing::debug!(log_stream = %self.log_stream, "Log stream ready");
        }
        self.client
            .put_log_events(&self.log_group, &self.log_stream, batch)
            .await
    }
}

#[cfg(feature = "cloudwatch")]
pub use aws::AwsCloudWatchLogsClient;

#[cfg(feature = "cloudwatch")]
mod aws {
    use super::{DeliveryError, IngestEvent, LogIngestionClient};
    use async_trait::async_trait;
    use aws_sdk_cloudwatchlogs::config::Region;
    use aws_sdk_cloudwatchlogs::error::DisplayErrorContext;
    use aws_sdk_cloudwatchlogs::types::InputLogEvent;
    use aws_sdk_cloudwatchlogs::Client;

    /// [`LogIngestionClient`] backed by the AWS CloudWatch Logs SDK.
    #[derive(Debug, Clone)]
    pub struct AwsCloudWatchLogsClient {
        client: Client,
    }

    impl AwsCloudWatchLogsClient {
        /// Loads AWS configuration from the environment, optionally pinning the region.
        pub async fn from_env(region: Option<&str>) -> Self {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(Region::new(region.to_string()));
            }
            let config = loader.load().await;

            tracing::debug!(region = ?config.region(), "Loaded AWS configuration");
            Self::new(Client::new(&config))
        }

        /// Wraps an existing SDK client.
        #[must_use]
        pub fn new(client: Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl LogIngestionClient for AwsCloudWatchLogsClient {
        async fn create_log_stream(
            &self,
            log_group: &str,
            log_stream: &str,
        ) -> Result<(), DeliveryError> {
            match self
                .client
                .create_log_stream()
                .log_group_name(log_group)
                .log_stream_name(log_stream)
                .send()
                .await
            {
                Ok(_) => Ok(()),
                Err(err) => {
                    let service_error = err.into_service_error();
                    if service_error.is_resource_already_exists_exception() {
                        Ok(())
                    } else {
                        Err(DeliveryError::CreateStream {
                            stream: log_stream.to_string(),
                            reason: DisplayErrorContext(&service_error).to_string(),
                        })
                    }
                }
            }
        }

        async fn put_log_events(
            &self,
            log_group: &str,
            log_stream: &str,
            events: &[IngestEvent],
        ) -> Result<(), DeliveryError> {
            let failed = |reason: String| DeliveryError::PutEvents {
                count: events.len(),
                reason,
            };

            let log_events = events
                .iter()
                .map(|event| {
                    InputLogEvent::builder()
                        .timestamp(event.timestamp_millis)
                        .message(&event.message)
                        .build()
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| failed(e.to_string()))?;

            self.client
                .put_log_events()
                .log_group_name(log_group)
                .log_stream_name(log_stream)
                .set_log_events(Some(log_events))
                .send()
                .await
                .map(|_| ())
                .map_err(|e| failed(DisplayErrorContext(&e).to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogLevel;
    use chrono::TimeZone;
    use tokio::sync::Mutex as AsyncMutex;

    /// Records calls and fails the first `failures` put attempts.
    #[derive(Default)]
    struct FakeClient {
        streams: AsyncMutex<Vec<String>>,
        batches: AsyncMutex<Vec<Vec<IngestEvent>>>,
        failures: AsyncMutex<u32>,
    }

    impl FakeClient {
        fn failing(failures: u32) -> Self {
            Self {
                failures: AsyncMutex::new(failures),
                ..Self::default()
            }
        }
    }

    fn request_bytes(events: &[IngestEvent]) -> usize {
        events.iter().map(|e| e.message.len() + EVENT_OVERHEAD_BYTES).sum()
    }

    #[async_trait]
    impl LogIngestionClient for FakeClient {
        async fn create_log_stream(&self, _: &str, log_stream: &str) -> Result<(), DeliveryError> {
            self.streams.lock().await.push(log_stream.to_string());
            Ok(())
        }

        async fn put_log_events(
            &self,
            _: &str,
            _: &str,
            events: &[IngestEvent],
        ) -> Result<(), DeliveryError> {
            if request_bytes(events) > MAX_BATCH_BYTES
                || events.iter().any(|e| e.message.len() > MAX_EVENT_BYTES)
            {
                return Err(DeliveryError::PutEvents {
                    count: events.len(),
                    reason: "request too large".into(),
                });
            }
            let mut failures = self.failures.lock().await;
            if *failures > 0 {
                *failures -= 1;
                return Err(DeliveryError::PutEvents {
                    count: events.len(),
                    reason: "throttled".into(),
                });
            }
            self.batches.lock().await.push(events.to_vec());
            Ok(())
        }
    }

    fn settings() -> CloudWatchSinkSettings {
        CloudWatchSinkSettings {
            log_stream_prefix: "checkout-".into(),
            batch_size: 2,
            flush_interval_seconds: 3600,
            retry_backoff_ms: 0,
            ..CloudWatchSinkSettings::for_group("/app/checkout")
        }
    }

    fn record(message: &str) -> LogRecord {
        LogRecord::new(LogLevel::Info, "app", message)
    }

    #[test]
    fn test_stream_names_differ_by_start_time() {
        let first = Utc.with_ymd_and_hms(2024, 5, 1, 13, 45, 30).unwrap();
        let second = first + chrono::Duration::microseconds(1);

        assert_ne!(log_stream_name("app-", first), log_stream_name("app-", second));
        assert_eq!(log_stream_name("", first), "2024-05-01-13-45-30-000000");
    }

    #[tokio::test]
    async fn test_full_batches_ship_and_flush_sends_remainder() {
        let client = Arc::new(FakeClient::default());
        let sink = CloudWatchSink::start(&settings(), client.clone(), Utc::now());

        for i in 0..5 {
            sink.emit(&record(&format!("event {i}")));
        }
        sink.flush().await.unwrap();

        let batches = client.batches.lock().await;
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(batches[0][0].message.contains("\"message\":\"event 0\""));
        assert_eq!(client.streams.lock().await.len(), 1);
        assert_eq!(sink.stats().delivered, 5);
        assert!(sink.log_stream().starts_with("checkout-"));
    }

    #[tokio::test]
    async fn test_batches_are_sorted_by_timestamp() {
        let client = Arc::new(FakeClient::default());
        let sink = CloudWatchSink::start(&settings(), client.clone(), Utc::now());

        let later = record("later").with_timestamp(Utc.timestamp_millis_opt(2_000).unwrap());
        let earlier = record("earlier").with_timestamp(Utc.timestamp_millis_opt(1_000).unwrap());
        sink.emit(&later);
        sink.emit(&earlier);
        sink.flush().await.unwrap();

        let batches = client.batches.lock().await;
        assert_eq!(batches[0][0].timestamp_millis, 1_000);
        assert_eq!(batches[0][1].timestamp_millis, 2_000);
    }

    #[tokio::test]
    async fn test_failures_are_retried() {
        let client = Arc::new(FakeClient::failing(2));
        let sink = CloudWatchSink::start(&settings(), client.clone(), Utc::now());

        sink.emit(&record("retry me"));
        sink.flush().await.unwrap();

        let stats = sink.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed_batches, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_drop_the_batch() {
        let client = Arc::new(FakeClient::failing(u32::MAX));
        let sink = CloudWatchSink::start(&settings(), client.clone(), Utc::now());

        sink.emit(&record("lost"));
        sink.flush().await.unwrap();

        let stats = sink.stats();
        assert_eq!(stats.retries, 3);
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.dropped, 1);
        assert!(client.batches.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let client = Arc::new(FakeClient::default());
        let settings = CloudWatchSinkSettings {
            queue_capacity: 1,
            batch_size: 100,
            ..settings()
        };
        let sink = CloudWatchSink::start(&settings, client, Utc::now());

        for i in 0..50 {
            sink.emit(&record(&format!("burst {i}")));
        }

        let stats = sink.stats();
        assert_eq!(stats.accepted + stats.dropped, 50);
        assert!(stats.dropped > 0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_closes() {
        let client = Arc::new(FakeClient::default());
        let sink = CloudWatchSink::start(&settings(), client.clone(), Utc::now());

        sink.emit(&record("last words"));
        sink.shutdown().await.unwrap();
        sink.emit(&record("too late"));
        sink.shutdown().await.unwrap();

        assert_eq!(client.batches.lock().await.len(), 1);
        assert_eq!(sink.stats().delivered, 1);
        assert_eq!(sink.stats().dropped, 1);
        assert!(sink.flush().await.is_err());
    }

    #[tokio::test]
    async fn test_large_records_are_split_under_the_request_byte_limit() {
        let client = Arc::new(FakeClient::default());
        let settings = CloudWatchSinkSettings {
            batch_size: 100,
            ..settings()
        };
        let sink = CloudWatchSink::start(&settings, client.clone(), Utc::now());

        let payload = "x".repeat(20_000);
        for _ in 0..100 {
            sink.emit(&record(&payload));
        }
        sink.flush().await.unwrap();

        let stats = sink.stats();
        assert_eq!(stats.failed_batches, 0);
        assert_eq!(stats.delivered, 100);
        let batches = client.batches.lock().await;
        assert!(batches.len() >= 2);
        assert!(batches.iter().all(|batch| request_bytes(batch) <= MAX_BATCH_BYTES));
    }

    #[tokio::test]
    async fn test_oversized_record_is_truncated_and_delivered() {
        let client = Arc::new(FakeClient::default());
        let sink = CloudWatchSink::start(&settings(), client.clone(), Utc::now());

        sink.emit(&record(&"é".repeat(MAX_EVENT_BYTES)));
        sink.flush().await.unwrap();

        assert_eq!(sink.stats().delivered, 1);
        let batches = client.batches.lock().await;
        assert!(batches[0][0].message.len() <= MAX_EVENT_BYTES);
        assert!(batches[0][0].message.starts_with('{'));
    }

    #[test]
    fn test_batch_len_always_takes_one_event() {
        let event = IngestEvent {
            timestamp_millis: 0,
            message: "x".repeat(MAX_BATCH_BYTES),
        };
        assert_eq!(batch_len(&[event.clone(), event], 10), 1);
        assert_eq!(batch_len(&[], 10), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_acks_every_queued_command() {
        let client = Arc::new(FakeClient::default());
        let stats = Arc::new(SinkStats::default());
        let worker = Worker::new(
            &settings(),
            client.clone(),
            "checkout-test".to_string(),
            Arc::clone(&stats),
        );
        let (sender, receiver) = mpsc::channel(8);
        let (shutdown_ack, shutdown_done) = oneshot::channel();
        let (flush_ack, flush_done) = oneshot::channel();

        let event = |message: &str| Command::Record(IngestEvent::from_record(&record(message)));
        sender.send(event("first")).await.unwrap();
        sender.send(Command::Shutdown(shutdown_ack)).await.unwrap();
        sender.send(Command::Flush(flush_ack)).await.unwrap();
        sender.send(event("second")).await.unwrap();

        worker.run(receiver, Duration::from_secs(3600)).await;

        assert!(shutdown_done.await.is_ok());
        assert!(flush_done.await.is_ok());
        assert_eq!(stats.snapshot().delivered, 2);
        assert_eq!(client.batches.lock().await.len(), 1);
    }
}
