//! Log Stream Hub: a process-wide, lossy log bus.
//!
//! Constructed once at service start and shared by reference (an `Arc`)
//! across the orchestrator, stages, status reporter, and web surface --
//! no process-global singleton, just one instance built at startup and
//! injected into everything that needs to publish or tail it.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing_subscriber::Layer;

/// Log severity, from the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// Structured context attached to a log event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogContext {
    pub ticket: Option<u64>,
    pub sub_ticket: Option<u64>,
    pub agent: Option<String>,
    pub stage: Option<String>,
    pub tool: Option<String>,
    pub session_id: Option<String>,
}

/// A single log event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(flatten)]
    pub context: LogContext,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            context: LogContext::default(),
        }
    }

    pub fn with_ticket(mut self, ticket: u64) -> Self {
        self.context.ticket = Some(ticket);
        self
    }

    pub fn with_sub_ticket(mut self, sub_ticket: u64) -> Self {
        self.context.sub_ticket = Some(sub_ticket);
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.context.agent = Some(agent.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.context.stage = Some(stage.into());
        self
    }
}

/// Default ring buffer capacity.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// A process-wide, bounded, lossy log bus.
///
/// `publish` is O(1) amortized: it pushes onto a `VecDeque` ring buffer,
/// evicting the oldest entry once full, then broadcasts to subscribers.
/// Broadcast is best-effort: a `tokio::sync::broadcast` channel already
/// drops messages for subscribers that fall behind (they observe
/// `RecvError::Lagged`) and a subscriber's receiver is reclaimed the moment
/// it is dropped, which is exactly the "remove sinks that are not open"
/// behavior expected of a lossy ring buffer.
pub struct LogHub {
    capacity: usize,
    buffer: Mutex<VecDeque<LogEvent>>,
    tx: broadcast::Sender<LogEvent>,
}

impl LogHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(16));
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            tx,
        }
    }

    /// Publish an event: append to the ring buffer (evicting the oldest if
    /// full) and broadcast to all current subscribers.
    pub fn publish(&self, event: LogEvent) {
        {
            let mut buf = self.buffer.lock();
            if buf.len() >= self.capacity {
                buf.pop_front();
            }
            buf.push_back(event.clone());
        }
        // No receivers is not an error -- it just means no one is watching.
        let _ = self.tx.send(event);
    }

    /// Subscribe: returns the current buffer as an "init" snapshot plus a
    /// receiver for events published after this call.
    pub fn subscribe(&self) -> (Vec<LogEvent>, broadcast::Receiver<LogEvent>) {
        // Subscribe first so no event published between the snapshot and
        // the subscribe call is lost to this receiver.
        let rx = self.tx.subscribe();
        let snapshot = self.buffer.lock().iter().cloned().collect();
        (snapshot, rx)
    }

    /// Most recent `k` events, oldest first.
    pub fn recent(&self, k: usize) -> Vec<LogEvent> {
        let buf = self.buffer.lock();
        let len = buf.len();
        let start = len.saturating_sub(k);
        buf.iter().skip(start).cloned().collect()
    }

    pub fn by_ticket(&self, ticket: u64) -> Vec<LogEvent> {
        self.buffer
            .lock()
            .iter()
            .filter(|e| e.context.ticket == Some(ticket))
            .cloned()
            .collect()
    }

    pub fn by_agent(&self, agent: &str) -> Vec<LogEvent> {
        self.buffer
            .lock()
            .iter()
            .filter(|e| e.context.agent.as_deref() == Some(agent))
            .cloned()
            .collect()
    }

    pub fn by_level(&self, level: LogLevel) -> Vec<LogEvent> {
        self.buffer
            .lock()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A `tracing` layer that forwards every event into a [`LogHub`], so every
/// stage's ordinary `info!`/`warn!`/`error!` call is also a published log
/// event -- no stage has to thread the hub through its own call signature.
pub struct LogHubLayer {
    hub: Arc<LogHub>,
}

impl LogHubLayer {
    pub fn new(hub: Arc<LogHub>) -> Self {
        Self { hub }
    }
}

impl<S: tracing::Subscriber> Layer<S> for LogHubLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();

        let level = match *metadata.level() {
            tracing::Level::TRACE | tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        };
        let message = visitor.message.unwrap_or_else(|| metadata.target().to_string());

        let mut log_event = LogEvent::new(level, message);
        log_event.context = LogContext {
            ticket: visitor.ticket,
            sub_ticket: visitor.sub_ticket,
            agent: visitor.agent,
            stage: visitor.stage,
            tool: visitor.tool,
            session_id: visitor.session_id,
        };
        self.hub.publish(log_event);
    }
}

/// Pulls the handful of `LogContext` fields this system's `tracing` calls
/// consistently name (`agent`, `stage`, `tool`, `ticket`/`master_id`,
/// `sub_ticket`, `session_id`) out of an event, plus its formatted message.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    ticket: Option<u64>,
    sub_ticket: Option<u64>,
    agent: Option<String>,
    stage: Option<String>,
    tool: Option<String>,
    session_id: Option<String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "agent" => self.agent = Some(value.to_string()),
            "stage" => self.stage = Some(value.to_string()),
            "tool" => self.tool = Some(value.to_string()),
            "session_id" | "session" => self.session_id = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        match field.name() {
            "ticket" | "ticket_id" | "master_id" => self.ticket = Some(value),
            "sub_ticket" => self.sub_ticket = Some(value),
            _ => {}
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if let Ok(value) = u64::try_from(value) {
            self.record_u64(field, value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" if self.message.is_none() => self.message = Some(format!("{value:?}")),
            "agent" if self.agent.is_none() => self.agent = Some(format!("{value:?}")),
            "stage" if self.stage.is_none() => self.stage = Some(format!("{value:?}")),
            "tool" if self.tool.is_none() => self.tool = Some(format!("{value:?}")),
            "session_id" | "session" if self.session_id.is_none() => {
                self.session_id = Some(format!("{value:?}"))
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_evicts_oldest_when_full() {
        let hub = LogHub::new(3);
        for i in 0..5 {
            hub.publish(LogEvent::new(LogLevel::Info, format!("event {i}")));
        }
        let all = hub.recent(10);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].message, "event 2");
        assert_eq!(all[2].message, "event 4");
    }

    #[tokio::test]
    async fn subscriber_gets_init_snapshot_then_future_events_in_order() {
        let hub = LogHub::new(100);
        hub.publish(LogEvent::new(LogLevel::Info, "a"));
        hub.publish(LogEvent::new(LogLevel::Info, "b"));
        hub.publish(LogEvent::new(LogLevel::Info, "c"));

        let (snapshot, mut rx) = hub.subscribe();
        assert_eq!(snapshot.len(), 3);

        hub.publish(LogEvent::new(LogLevel::Info, "d"));
        hub.publish(LogEvent::new(LogLevel::Info, "e"));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.message, "d");
        assert_eq!(second.message, "e");
    }

    #[test]
    fn filters_by_ticket_agent_and_level() {
        let hub = LogHub::new(100);
        hub.publish(
            LogEvent::new(LogLevel::Info, "planning")
                .with_ticket(7)
                .with_agent("architect"),
        );
        hub.publish(LogEvent::new(LogLevel::Error, "boom").with_ticket(8));

        assert_eq!(hub.by_ticket(7).len(), 1);
        assert_eq!(hub.by_agent("architect").len(), 1);
        assert_eq!(hub.by_level(LogLevel::Error).len(), 1);
    }

    #[test]
    fn layer_forwards_tracing_events_with_known_fields() {
        use tracing_subscriber::layer::SubscriberExt;

        let hub = Arc::new(LogHub::new(100));
        let subscriber = tracing_subscriber::registry().with(LogHubLayer::new(hub.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(agent = "craftsman", sub_ticket = 42u64, "tool completed");
        });

        let events = hub.recent(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "tool completed");
        assert_eq!(events[0].context.agent.as_deref(), Some("craftsman"));
        assert_eq!(events[0].context.sub_ticket, Some(42));
        assert_eq!(events[0].level, LogLevel::Info);
    }
}
