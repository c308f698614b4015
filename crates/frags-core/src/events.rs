//! Run events.
//!
//! Producers never block: events go through a bounded channel with `try_send`,
//! and anything that does not fit is counted and dropped. Every event is also
//! mirrored to `tracing` at its level, whether or not anyone is listening.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::FragsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl FromStr for EventLevel {
    type Err = FragsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(EventLevel::Debug),
            "info" => Ok(EventLevel::Info),
            "warn" | "warning" => Ok(EventLevel::Warn),
            "error" => Ok(EventLevel::Error),
            other => Err(FragsError::Config(format!("Unknown event level '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Generic,
    Progress,
    Result,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Generic => "generic",
            EventType::Progress => "progress",
            EventType::Result => "result",
            EventType::Error => "error",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub component: String,
    pub message: String,
    #[serde(default)]
    pub args: Value,
}

impl Event {
    pub fn new(
        level: EventLevel,
        event_type: EventType,
        component: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            event_type,
            component: component.into(),
            message: message.into(),
            args: Value::Null,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    /// A runner progress record; `action` is one of `session_start`, `phase_start`,
    /// `phase_end`, `session_end` or `error`.
    pub fn progress(action: &str, session: &str, phase: Option<i64>) -> Self {
        let message = match phase {
            Some(phase) => format!("{} {} (phase {})", action, session, phase),
            None => format!("{} {}", action, session),
        };
        let level = if action == "error" {
            EventLevel::Error
        } else {
            EventLevel::Info
        };
        Event::new(level, EventType::Progress, "runner", message).with_args(json!({
            "action": action,
            "session": session,
            "phase": phase,
        }))
    }

    /// Terminal record carrying the run output.
    pub fn result(output: Value) -> Self {
        Event::new(EventLevel::Info, EventType::Result, "runner", "run complete").with_args(output)
    }

    /// Terminal record for a failed run.
    pub fn failure(error: &FragsError) -> Self {
        Event::new(EventLevel::Error, EventType::Error, "runner", error.to_string())
            .with_args(json!({ "kind": error.kind() }))
    }

    fn trace(&self) {
        match self.level {
            EventLevel::Debug => tracing::debug!("[{}] {}", self.component, self.message),
            EventLevel::Info => tracing::info!("[{}] {}", self.component, self.message),
            EventLevel::Warn => tracing::warn!("[{}] {}", self.component, self.message),
            EventLevel::Error => tracing::error!("[{}] {}", self.component, self.message),
        }
    }
}

/// Cloneable producer side of the event channel.
#[derive(Clone)]
pub struct EventEmitter {
    tx: Option<mpsc::Sender<Event>>,
    min_level: EventLevel,
    dropped: Arc<AtomicU64>,
}

impl EventEmitter {
    /// Emitter plus the receiver that consumes its events.
    pub fn channel(capacity: usize, min_level: EventLevel) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let emitter = Self {
            tx: Some(tx),
            min_level,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (emitter, rx)
    }

    /// Emitter that only logs.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            min_level: EventLevel::Error,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(&self, event: Event) {
        event.trace();
        let Some(tx) = &self.tx else {
            return;
        };
        if event.level < self.min_level {
            return;
        }
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn progress(&self, action: &str, session: &str, phase: Option<i64>) {
        self.emit(Event::progress(action, session, phase));
    }

    /// Events discarded because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::disabled()
    }
}
