//! Server-wide event bus.
//!
//! A `tokio::sync::broadcast` channel carrying [`ScrapeEvent`] values for
//! every session. Per-session record streams go through each session's
//! `ProgressPublisher`; this bus only carries lifecycle summaries, so a
//! dashboard can follow all sessions at once. With no subscribers, events
//! are dropped.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use pagewise::{PaginationMode, SessionStatus};

/// Default bus buffer.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScrapeEvent {
    /// The server is accepting requests.
    ServerStarted { version: String, addr: String },
    SessionStarted {
        session_id: String,
        target_url: String,
        mode: PaginationMode,
        timestamp: String,
    },
    /// One page was extracted and published.
    PageScraped {
        session_id: String,
        page_index: u32,
        record_count: usize,
    },
    SessionFinished {
        session_id: String,
        status: SessionStatus,
        pages_scraped: u32,
        record_count: usize,
        timestamp: String,
    },
    SessionFailed {
        session_id: String,
        error: String,
        timestamp: String,
    },
}

impl ScrapeEvent {
    /// The session this event belongs to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ScrapeEvent::SessionStarted { session_id, .. }
            | ScrapeEvent::PageScraped { session_id, .. }
            | ScrapeEvent::SessionFinished { session_id, .. }
            | ScrapeEvent::SessionFailed { session_id, .. } => Some(session_id),
            ScrapeEvent::ServerStarted { .. } => None,
        }
    }

    /// Server-level events match every filter.
    pub fn matches_session(&self, id: &str) -> bool {
        self.session_id().map_or(true, |s| s == id)
    }
}

pub struct EventBus {
    sender: broadcast::Sender<ScrapeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: ScrapeEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScrapeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// RFC 3339 timestamp for the current time.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}
