//! Wire types for the session endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pagewise::{PaginationMode, Record, SessionStatus};

/// Response to a successful start request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub session_id: String,
}

/// Body of `POST /api/stop`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub session_id: String,
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub target_url: String,
    pub pagination_mode: PaginationMode,
    pub fields: Vec<String>,
    pub status: SessionStatus,
    pub pages_scraped: u32,
    pub record_count: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Omitted from listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<Record>>,
}
