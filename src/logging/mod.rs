//! Observability: a fixed-capacity in-memory event ring (for the on-demand
//! debug overlay) plus a bounded-channel JSONL logger with a single drain
//! worker. Neither ever blocks the caller or panics on backpressure — a full
//! channel just drops the event and bumps a counter.

use crate::models::QueryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Metadata, Subscriber};
use tracing_subscriber::layer::Context as LayerContext;
use tracing_subscriber::Layer;

/// Default ring buffer capacity.
pub const DEFAULT_RING_CAPACITY: usize = 1024;

/// Depth of the logger's bounded channel before events start being dropped.
const LOG_CHANNEL_CAPACITY: usize = 2048;

/// One observability event, the JSONL schema on disk and the in-memory ring
/// buffer's element type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    /// Dot-delimited subsystem.action, e.g. `search.cosine_rerank`.
    pub kind: String,
    pub component: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(rename = "dur_ms", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<HashMap<String, String>>,
}

impl LogEvent {
    pub fn new(kind: impl Into<String>, component: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: kind.into(),
            component: component.into(),
            session_id: session_id.into(),
            query_id: None,
            duration_ms: None,
            message: None,
            error: None,
            extra: None,
        }
    }

    pub fn with_query_id(mut self, query_id: QueryId) -> Self {
        self.query_id = Some(query_id.as_hex());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A random 64-bit hex session identifier, stamped on every event, minted
/// once at process start.
pub fn generate_session_id() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    let entropy = RandomState::new().build_hasher().finish();
    format!("{entropy:016x}")
}

/// Fixed-capacity circular buffer of recent events, overwriting the oldest
/// on overflow. Every operation is guarded by one mutex; none of them can
/// block for long since the buffer only ever holds plain data.
#[derive(Clone)]
pub struct EventRing {
    capacity: usize,
    entries: Arc<Mutex<VecDeque<LogEvent>>>,
    total_pushed: Arc<AtomicU64>,
}

/// Snapshot counters for the ring's lifetime (not just its current contents).
#[derive(Debug, Clone, Copy, Default)]
pub struct RingStats {
    pub total_pushed: u64,
    pub current_len: usize,
    pub capacity: usize,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.max(1)))),
            total_pushed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Push an event, shallow-copying its `extra` map so the caller's own
    /// copy can't be mutated afterward through this one.
    pub fn push(&self, mut event: LogEvent) {
        event.extra = event.extra.clone();
        let mut entries = self.entries.lock().expect("event ring mutex poisoned");
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(event);
        self.total_pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Most recent `n` events, oldest first.
    pub fn snapshot(&self, n: usize) -> Vec<LogEvent> {
        let entries = self.entries.lock().expect("event ring mutex poisoned");
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn last(&self) -> Option<LogEvent> {
        self.entries.lock().expect("event ring mutex poisoned").back().cloned()
    }

    pub fn stats(&self) -> RingStats {
        let entries = self.entries.lock().expect("event ring mutex poisoned");
        RingStats {
            total_pushed: self.total_pushed.load(Ordering::Relaxed),
            current_len: entries.len(),
            capacity: self.capacity,
        }
    }
}

impl Default for EventRing {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

/// Bounded-channel logger: a cheap handle (clone freely) that sends events
/// to a single drain worker writing JSONL to disk. Never blocks; a full
/// channel just drops the event and increments `dropped`.
#[derive(Clone)]
pub struct Logger {
    sender: mpsc::Sender<LogEvent>,
    dropped: Arc<AtomicU64>,
    ring: Option<EventRing>,
}

pub struct LoggerHandle {
    pub logger: Logger,
    drain: JoinHandle<()>,
}

impl Logger {
    /// Spawn the drain worker and return a handle. `ring`, if given, is also
    /// fed every event for the in-memory debug overlay.
    pub fn spawn(log_dir: PathBuf, session_id: String, ring: Option<EventRing>) -> std::io::Result<LoggerHandle> {
        fs::create_dir_all(&log_dir)?;
        let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let dropped = Arc::new(AtomicU64::new(0));
        let logger = Logger { sender: tx, dropped: dropped.clone(), ring: ring.clone() };

        let log_path = log_dir.join(format!("feedreader-{session_id}.jsonl"));
        let drain = tokio::spawn(drain_loop(rx, log_path));

        Ok(LoggerHandle { logger, drain })
    }

    /// Enqueue an event. Drops it silently (incrementing `dropped`) if the
    /// channel is full or the drain worker has already exited.
    pub fn log(&self, event: LogEvent) {
        if let Some(ring) = &self.ring {
            ring.push(event.clone());
        }
        if self.sender.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl LoggerHandle {
    /// Flush by closing the channel and waiting for the drain worker to
    /// finish writing whatever was already queued.
    pub async fn close(self) {
        drop(self.logger.sender);
        let _ = self.drain.await;
    }
}

async fn drain_loop(mut rx: mpsc::Receiver<LogEvent>, log_path: PathBuf) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = write_event(&log_path, &event) {
            tracing::error!("failed to write log event: {e}");
        }
    }
}

fn write_event(log_path: &PathBuf, event: &LogEvent) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(log_path)?;
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    writeln!(file, "{json}")?;
    file.flush()
}

/// A `tracing_subscriber::Layer` that captures events into an [`EventRing`]
/// instead of letting them print over the alternate screen.
pub struct RingLogLayer {
    ring: EventRing,
    session_id: String,
}

impl RingLogLayer {
    pub fn new(ring: EventRing, session_id: String) -> Self {
        Self { ring, session_id }
    }
}

impl<S> Layer<S> for RingLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: LayerContext<'_, S>) {
        let metadata = event.metadata();
        let mut message = String::new();
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        let mut log_event = LogEvent::new(metadata.target().to_string(), metadata.target().to_string(), self.session_id.clone());
        log_event.message = Some(message);
        log_event.extra = Some(HashMap::from([("level".to_string(), metadata.level().to_string())]));
        self.ring.push(log_event);
    }

    fn enabled(&self, _metadata: &Metadata<'_>, _ctx: LayerContext<'_, S>) -> bool {
        true
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{value:?}");
            if self.0.starts_with('"') && self.0.ends_with('"') {
                *self.0 = self.0[1..self.0.len() - 1].to_string();
            }
        }
    }
}

/// Whether the per-message verbose tracing flag is set.
pub fn verbose_tracing_enabled() -> bool {
    std::env::var("FEEDREADER_VERBOSE_TRACE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_overwrites_oldest_on_overflow() {
        let ring = EventRing::new(2);
        ring.push(LogEvent::new("a", "c", "s"));
        ring.push(LogEvent::new("b", "c", "s"));
        ring.push(LogEvent::new("c", "c", "s"));

        let snapshot = ring.snapshot(10);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].kind, "b");
        assert_eq!(snapshot[1].kind, "c");
    }

    #[test]
    fn ring_stats_track_total_pushed_beyond_capacity() {
        let ring = EventRing::new(1);
        ring.push(LogEvent::new("a", "c", "s"));
        ring.push(LogEvent::new("b", "c", "s"));
        let stats = ring.stats();
        assert_eq!(stats.total_pushed, 2);
        assert_eq!(stats.current_len, 1);
        assert_eq!(stats.capacity, 1);
    }

    #[test]
    fn last_returns_most_recently_pushed_event() {
        let ring = EventRing::new(4);
        ring.push(LogEvent::new("a", "c", "s"));
        ring.push(LogEvent::new("b", "c", "s"));
        assert_eq!(ring.last().unwrap().kind, "b");
    }

    #[test]
    fn empty_ring_snapshot_and_last_are_empty() {
        let ring = EventRing::new(4);
        assert!(ring.snapshot(10).is_empty());
        assert!(ring.last().is_none());
    }

    #[test]
    fn generated_session_ids_are_hex_and_nonempty() {
        let id = generate_session_id();
        assert!(!id.is_empty());
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn logger_writes_events_to_jsonl_and_closes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let handle = Logger::spawn(dir.path().to_path_buf(), "testsession".to_string(), None).unwrap();
        handle.logger.log(LogEvent::new("sys.startup", "main", "testsession"));
        handle.close().await;

        let path = dir.path().join("feedreader-testsession.jsonl");
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("sys.startup"));
    }

    #[tokio::test]
    async fn logger_also_feeds_the_ring_when_attached() {
        let dir = tempfile::tempdir().unwrap();
        let ring = EventRing::new(16);
        let handle = Logger::spawn(dir.path().to_path_buf(), "ringsession".to_string(), Some(ring.clone())).unwrap();
        handle.logger.log(LogEvent::new("search.start", "pipeline", "ringsession"));
        handle.close().await;

        assert_eq!(ring.stats().current_len, 1);
    }
}
