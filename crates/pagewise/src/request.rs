//! Start-session requests and their validation.

use serde::{Deserialize, Serialize};

use crate::types::{PaginationMode, ScrapeError, ScrapeResult};

/// A request to start a scrape session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    #[serde(alias = "url")]
    pub target_url: String,
    pub fields: Vec<String>,
    #[serde(alias = "paginationMethod")]
    pub pagination_mode: PaginationMode,
    #[serde(default, alias = "pagesCount")]
    pub max_pages: Option<i64>,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub target_url: String,
    pub fields: Vec<String>,
    pub pagination_mode: PaginationMode,
    /// Present only in bounded mode.
    pub max_pages: Option<u32>,
}

impl ScrapeRequest {
    pub fn new(
        target_url: impl Into<String>,
        fields: impl IntoIterator<Item = impl Into<String>>,
        pagination_mode: PaginationMode,
        max_pages: Option<i64>,
    ) -> Self {
        Self {
            target_url: target_url.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            pagination_mode,
            max_pages,
        }
    }

    /// Check the request before anything touches a page.
    pub fn validate(&self) -> ScrapeResult<ValidatedRequest> {
        let target_url = self.target_url.trim();
        if target_url.is_empty() {
            return Err(ScrapeError::Validation("targetUrl is required".to_string()));
        }
        if self.fields.iter().all(|f| f.trim().is_empty()) {
            return Err(ScrapeError::Validation(
                "at least one field is required".to_string(),
            ));
        }

        let max_pages = match self.pagination_mode {
            PaginationMode::Bounded => {
                let n = self.max_pages.ok_or_else(|| {
                    ScrapeError::Validation("maxPages is required in bounded mode".to_string())
                })?;
                let n = u32::try_from(n).ok().filter(|n| *n >= 1).ok_or_else(|| {
                    ScrapeError::Validation(format!("maxPages must be at least 1, got {n}"))
                })?;
                Some(n)
            }
            _ => None,
        };

        Ok(ValidatedRequest {
            target_url: target_url.to_string(),
            fields: self
                .fields
                .iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
            pagination_mode: self.pagination_mode.clone(),
            max_pages,
        })
    }
}
