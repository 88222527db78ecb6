//! Page driver abstraction.
//!
//! Defines the `DriverFactory` and `PageDriver` traits that abstract over
//! the browser engine (Chromium via chromiumoxide, or a scripted in-memory
//! driver in tests). Every session owns exactly one `PageDriver`.

#[cfg(feature = "chromium")]
pub mod chromium;
pub mod scripted;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::extract::PageSnapshot;
use crate::types::DriverError;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A browser engine that hands out one driver per session.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Open a new, isolated page (tab).
    async fn open(&self) -> Result<Box<dyn PageDriver>, DriverError>;
    /// Number of drivers currently open.
    fn active_drivers(&self) -> usize;
}

/// Operations the engine needs from a loaded page.
#[async_trait]
pub trait PageDriver: Send {
    /// Navigate and wait for the page to settle.
    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, DriverError>;
    /// Wait until an element matching `locator` is present and visible.
    async fn wait_for(&mut self, locator: &str, timeout: Duration) -> Result<bool, DriverError>;
    /// Evaluate a script in the page and return its JSON result.
    async fn query(&mut self, program: &str) -> Result<serde_json::Value, DriverError>;
    /// Capture the current DOM.
    async fn snapshot(&mut self) -> Result<PageSnapshot, DriverError>;
    /// Click the first element matching `locator`.
    async fn click(&mut self, locator: &str) -> Result<(), DriverError>;
    /// Type text into the first element matching `locator`.
    async fn fill(&mut self, locator: &str, text: &str) -> Result<(), DriverError>;
    /// Scroll the document to its end.
    async fn scroll_to_end(&mut self) -> Result<(), DriverError>;
    /// Current scrollable content height.
    async fn measure_extent(&mut self) -> Result<f64, DriverError>;
    /// Wait for a navigation triggered by the last action to finish.
    async fn wait_for_settle(&mut self) -> Result<(), DriverError>;
    /// Release the page.
    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}

/// A factory used when no browser is available. Every `open` fails.
pub struct NoopFactory;

#[async_trait]
impl DriverFactory for NoopFactory {
    async fn open(&self) -> Result<Box<dyn PageDriver>, DriverError> {
        Err(DriverError::Backend("Browser not available".to_string()))
    }

    fn active_drivers(&self) -> usize {
        0
    }
}
