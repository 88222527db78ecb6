//! Core data types for scrape sessions, records, and progress events.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One extracted item: field name to value.
///
/// A field whose element (or attribute) was missing is simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, String>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Lifecycle status of a scrape session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Exhausted,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A per-page progress event pushed to observers.
///
/// Page events carry the page's records; the single terminal event of a
/// session has `is_final = true`, no records, and the session's end status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub session_id: String,
    /// 1-based, increases by exactly one per event of a session.
    pub page_index: u32,
    pub page_records: Vec<Record>,
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
}

impl ProgressEvent {
    pub fn page(session_id: &str, page_index: u32, records: Vec<Record>) -> Self {
        Self {
            session_id: session_id.to_string(),
            page_index,
            page_records: records,
            is_final: false,
            status: None,
        }
    }

    pub fn terminal(session_id: &str, page_index: u32, status: SessionStatus) -> Self {
        Self {
            session_id: session_id.to_string(),
            page_index,
            page_records: Vec::new(),
            is_final: true,
            status: Some(status),
        }
    }
}

/// How the next page is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaginationMode {
    /// Click a "next" control, up to `maxPages` pages.
    Bounded,
    /// Scroll to the end until the content extent stops growing.
    Continuous,
    /// Anything else: the first page only.
    Unrecognized(String),
}

impl From<String> for PaginationMode {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "bounded" | "next_button" => Self::Bounded,
            "continuous" | "infinite_scroll" => Self::Continuous,
            _ => Self::Unrecognized(s),
        }
    }
}

impl From<PaginationMode> for String {
    fn from(mode: PaginationMode) -> Self {
        mode.to_string()
    }
}

impl std::fmt::Display for PaginationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bounded => write!(f, "bounded"),
            Self::Continuous => write!(f, "continuous"),
            Self::Unrecognized(s) => write!(f, "{s}"),
        }
    }
}

/// State of one running session, owned by the orchestrator run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeSession {
    pub id: String,
    pub target_url: String,
    pub pagination_mode: PaginationMode,
    pub max_pages: Option<u32>,
    pub record_count: usize,
    pub status: SessionStatus,
}

/// Everything a finished session produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    pub pages_scraped: u32,
    pub records: Vec<Record>,
}

/// Failures reported by a page driver.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Browser error: {0}")]
    Backend(String),
}

/// Errors that end (or prevent) a scrape session.
#[derive(thiserror::Error, Debug)]
pub enum ScrapeError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("None of the requested fields are known: {}", .0.join(", "))]
    EmptyTemplate(Vec<String>),

    #[error("Session setup failed: {0}")]
    SessionSetup(#[source] DriverError),
}

/// Convenience result type.
pub type ScrapeResult<T> = Result<T, ScrapeError>;
