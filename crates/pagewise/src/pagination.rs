//! Pagination state machine.
//!
//! ```text
//! Init ─▶ HasMore ─▶ (Advancing) ─▶ HasMore | Exhausted
//!   └──────────┴───────────┴──────▶ Stopped        (cancellation)
//! ```
//!
//! `Exhausted` and `Stopped` are terminal. Driver failures while advancing
//! end pagination as `Exhausted`; they are never escalated.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::driver::PageDriver;
use crate::types::{DriverError, PaginationMode};

/// Extents closer than this are considered unchanged.
const EXTENT_EPSILON: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationState {
    Init,
    HasMore,
    Advancing,
    Exhausted,
    Stopped,
}

impl PaginationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exhausted | Self::Stopped)
    }
}

/// Locator and timings used while advancing.
#[derive(Debug, Clone)]
pub struct PaginationSettings {
    /// Locator of the "next" control in bounded mode.
    pub next_control: String,
    /// How long the next control may take to become actionable.
    pub next_wait: Duration,
    /// Pause after scrolling so lazily rendered controls can appear.
    pub reveal_delay: Duration,
    /// Pause between scrolling and re-measuring in continuous mode.
    pub settle_interval: Duration,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            next_control: r#"button[aria-label="Next"]"#.to_string(),
            next_wait: Duration::from_secs(5),
            reveal_delay: Duration::from_secs(1),
            settle_interval: Duration::from_secs(2),
        }
    }
}

/// Decides whether and how a session reaches its next page.
#[derive(Debug)]
pub struct PaginationController {
    mode: PaginationMode,
    max_pages: Option<u32>,
    settings: PaginationSettings,
    state: PaginationState,
}

impl PaginationController {
    pub fn new(mode: PaginationMode, max_pages: Option<u32>, settings: PaginationSettings) -> Self {
        Self {
            mode,
            max_pages,
            settings,
            state: PaginationState::Init,
        }
    }

    pub fn state(&self) -> PaginationState {
        self.state
    }

    /// Record the first page as loaded.
    pub fn begin(&mut self) {
        if self.state == PaginationState::Init {
            self.state = PaginationState::HasMore;
        }
    }

    /// Move to `Stopped` unless already terminal.
    pub fn stop(&mut self) -> PaginationState {
        if !self.state.is_terminal() {
            self.state = PaginationState::Stopped;
        }
        self.state
    }

    /// Try to reach the page after `page_index`.
    ///
    /// Returns `HasMore` when the driver now shows the next page.
    pub async fn advance(
        &mut self,
        driver: &mut dyn PageDriver,
        page_index: u32,
        cancel: &CancellationToken,
    ) -> PaginationState {
        if self.state.is_terminal() {
            return self.state;
        }
        if cancel.is_cancelled() {
            return self.stop();
        }

        self.state = PaginationState::Advancing;
        let outcome = match &self.mode {
            PaginationMode::Bounded => self.click_next(driver, page_index).await,
            PaginationMode::Continuous => self.reveal_more(driver).await,
            PaginationMode::Unrecognized(mode) => {
                tracing::warn!("Unrecognized pagination mode '{mode}', stopping after page 1");
                Ok(PaginationState::Exhausted)
            }
        };

        self.state = outcome.unwrap_or_else(|e| {
            tracing::warn!("Pagination ended after page {page_index}: {e}");
            PaginationState::Exhausted
        });
        self.state
    }

    async fn click_next(
        &self,
        driver: &mut dyn PageDriver,
        page_index: u32,
    ) -> Result<PaginationState, DriverError> {
        let max_pages = self.max_pages.unwrap_or(1);
        if page_index >= max_pages {
            tracing::debug!("Reached page limit ({max_pages})");
            return Ok(PaginationState::Exhausted);
        }

        let next = &self.settings.next_control;
        driver.scroll_to_end().await?;
        tokio::time::sleep(self.settings.reveal_delay).await;

        if !driver.wait_for(next, self.settings.next_wait).await? {
            tracing::info!("Next control not found after page {page_index}");
            return Ok(PaginationState::Exhausted);
        }

        driver.click(next).await?;
        driver.wait_for_settle().await?;
        Ok(PaginationState::HasMore)
    }

    async fn reveal_more(&self, driver: &mut dyn PageDriver) -> Result<PaginationState, DriverError> {
        let before = driver.measure_extent().await?;
        driver.scroll_to_end().await?;
        tokio::time::sleep(self.settings.settle_interval).await;
        let after = driver.measure_extent().await?;

        if (after - before).abs() < EXTENT_EPSILON {
            tracing::info!("Reached end of continuous content");
            Ok(PaginationState::Exhausted)
        } else {
            Ok(PaginationState::HasMore)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::scripted::{DriverCall, ScriptedDriver, ScriptedPage};

    const NEXT: &str = "button.next";

    fn settings() -> PaginationSettings {
        PaginationSettings {
            next_control: NEXT.to_string(),
            ..PaginationSettings::default()
        }
    }

    fn pages(n: usize) -> Vec<ScriptedPage> {
        (0..n).map(|i| ScriptedPage::new(format!("<p>{i}</p>"))).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_clicks_next_until_limit() {
        let mut driver = ScriptedDriver::new(pages(5)).with_next_control(NEXT);
        let log = driver.log();
        let cancel = CancellationToken::new();
        let mut ctl = PaginationController::new(PaginationMode::Bounded, Some(2), settings());
        ctl.begin();

        assert_eq!(ctl.advance(&mut driver, 1, &cancel).await, PaginationState::HasMore);
        assert_eq!(ctl.advance(&mut driver, 2, &cancel).await, PaginationState::Exhausted);
        assert_eq!(log.count(|c| matches!(c, DriverCall::Click(_))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_without_next_control_is_exhausted() {
        let mut driver =
            ScriptedDriver::new(vec![ScriptedPage::new("<p/>").last()]).with_next_control(NEXT);
        let cancel = CancellationToken::new();
        let mut ctl = PaginationController::new(PaginationMode::Bounded, Some(10), settings());
        ctl.begin();

        assert_eq!(ctl.advance(&mut driver, 1, &cancel).await, PaginationState::Exhausted);
        // Terminal states stick.
        assert_eq!(ctl.advance(&mut driver, 1, &cancel).await, PaginationState::Exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_stops_when_extent_unchanged() {
        let mut driver = ScriptedDriver::new(pages(3));
        let cancel = CancellationToken::new();
        let mut ctl = PaginationController::new(PaginationMode::Continuous, None, settings());
        ctl.begin();

        assert_eq!(ctl.advance(&mut driver, 1, &cancel).await, PaginationState::HasMore);
        assert_eq!(ctl.advance(&mut driver, 2, &cancel).await, PaginationState::HasMore);
        assert_eq!(ctl.advance(&mut driver, 3, &cancel).await, PaginationState::Exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_token_preempts_transition() {
        let mut driver = ScriptedDriver::new(pages(3)).with_next_control(NEXT);
        let log = driver.log();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut ctl = PaginationController::new(PaginationMode::Bounded, Some(3), settings());
        ctl.begin();

        assert_eq!(ctl.advance(&mut driver, 1, &cancel).await, PaginationState::Stopped);
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_mode_is_single_page() {
        let mut driver = ScriptedDriver::new(pages(3));
        let cancel = CancellationToken::new();
        let mut ctl =
            PaginationController::new(PaginationMode::Unrecognized("grid".into()), None, settings());
        ctl.begin();
        assert_eq!(ctl.advance(&mut driver, 1, &cancel).await, PaginationState::Exhausted);
    }

    #[test]
    fn test_stop_from_init() {
        let mut ctl = PaginationController::new(PaginationMode::Bounded, Some(1), settings());
        assert_eq!(ctl.stop(), PaginationState::Stopped);
    }
}
