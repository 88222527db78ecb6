//! Scripted in-memory driver for tests and dry runs.
//!
//! A script is a list of pages. Each page serves a sequence of HTML
//! snapshots (the last one repeats), and says whether a "next" control is
//! offered. Clicking next, or scrolling in a page that has a successor,
//! moves to the following page; the content extent grows with each page
//! revealed. Every call is recorded in a shared [`DriverLog`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{DriverFactory, NavigationResult, PageDriver};
use crate::extract::PageSnapshot;
use crate::types::DriverError;

const EXTENT_PER_PAGE: f64 = 1000.0;

/// One page of a script.
#[derive(Debug, Clone)]
pub struct ScriptedPage {
    snapshots: Vec<Result<String, DriverError>>,
    has_next: bool,
}

impl ScriptedPage {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            snapshots: vec![Ok(html.into())],
            has_next: true,
        }
    }

    /// Serve `html` on the next snapshot of this page, after the earlier ones.
    pub fn then(mut self, html: impl Into<String>) -> Self {
        self.snapshots.push(Ok(html.into()));
        self
    }

    /// Make the next snapshot of this page fail.
    pub fn then_fail(mut self, error: DriverError) -> Self {
        self.snapshots.push(Err(error));
        self
    }

    /// A page whose first snapshot fails.
    pub fn failing(error: DriverError) -> Self {
        Self {
            snapshots: vec![Err(error)],
            has_next: true,
        }
    }

    /// Hide the next control on this page.
    pub fn last(mut self) -> Self {
        self.has_next = false;
        self
    }
}

/// A recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Navigate(String),
    WaitFor(String),
    Query(String),
    /// Snapshot taken while on the given 1-based page.
    Snapshot(usize),
    Click(String),
    Fill(String),
    ScrollToEnd,
    MeasureExtent,
    Settle,
    Close,
}

/// Shared, cloneable view of the calls a scripted driver received.
#[derive(Debug, Clone, Default)]
pub struct DriverLog(Arc<Mutex<Vec<DriverCall>>>);

impl DriverLog {
    fn push(&self, call: DriverCall) {
        if let Ok(mut calls) = self.0.lock() {
            calls.push(call);
        }
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.0.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    /// Number of snapshots taken of the given 1-based page.
    pub fn snapshots_of(&self, page: usize) -> usize {
        self.count(|c| *c == DriverCall::Snapshot(page))
    }
}

/// A page driver that replays a script.
pub struct ScriptedDriver {
    pages: Vec<ScriptedPage>,
    served: Vec<usize>,
    current: usize,
    next_control: Option<String>,
    fail_navigation: bool,
    log: DriverLog,
}

impl ScriptedDriver {
    pub fn new(pages: Vec<ScriptedPage>) -> Self {
        let served = vec![0; pages.len()];
        Self {
            pages,
            served,
            current: 0,
            next_control: None,
            fail_navigation: false,
            log: DriverLog::default(),
        }
    }

    /// Make the script click-driven: `locator` is the next control and
    /// scrolling no longer reveals the following page.
    pub fn with_next_control(mut self, locator: impl Into<String>) -> Self {
        self.next_control = Some(locator.into());
        self
    }

    /// Make every navigation fail.
    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub fn log(&self) -> DriverLog {
        self.log.clone()
    }

    fn page(&self) -> Option<&ScriptedPage> {
        self.pages.get(self.current)
    }

    fn can_advance(&self) -> bool {
        self.page().is_some_and(|p| p.has_next) && self.current + 1 < self.pages.len()
    }

    fn is_next_control(&self, locator: &str) -> bool {
        self.next_control.as_deref().map_or(true, |n| n == locator)
    }
}

#[async_trait]
impl PageDriver for ScriptedDriver {
    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, DriverError> {
        self.log.push(DriverCall::Navigate(url.to_string()));
        if self.fail_navigation {
            return Err(DriverError::NavigationFailed(url.to_string()));
        }
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 0,
        })
    }

    async fn wait_for(&mut self, locator: &str, _timeout: Duration) -> Result<bool, DriverError> {
        self.log.push(DriverCall::WaitFor(locator.to_string()));
        if self.is_next_control(locator) {
            Ok(self.can_advance())
        } else {
            Ok(true)
        }
    }

    async fn query(&mut self, program: &str) -> Result<serde_json::Value, DriverError> {
        self.log.push(DriverCall::Query(program.to_string()));
        Ok(serde_json::Value::Null)
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, DriverError> {
        self.log.push(DriverCall::Snapshot(self.current + 1));
        let index = self.current;
        let page = self
            .pages
            .get(index)
            .ok_or_else(|| DriverError::NotFound(format!("scripted page {}", index + 1)))?;
        let served = self.served[index];
        let snapshot = page.snapshots[served.min(page.snapshots.len() - 1)].clone();
        self.served[index] += 1;
        snapshot.map(PageSnapshot::new)
    }

    async fn click(&mut self, locator: &str) -> Result<(), DriverError> {
        self.log.push(DriverCall::Click(locator.to_string()));
        if !self.is_next_control(locator) {
            return Ok(());
        }
        if !self.can_advance() {
            return Err(DriverError::NotFound(locator.to_string()));
        }
        self.current += 1;
        Ok(())
    }

    async fn fill(&mut self, locator: &str, _text: &str) -> Result<(), DriverError> {
        self.log.push(DriverCall::Fill(locator.to_string()));
        Ok(())
    }

    async fn scroll_to_end(&mut self) -> Result<(), DriverError> {
        self.log.push(DriverCall::ScrollToEnd);
        // Only scroll-driven scripts reveal content; a next control is
        // reached with click().
        if self.next_control.is_none() && self.can_advance() {
            self.current += 1;
        }
        Ok(())
    }

    async fn measure_extent(&mut self) -> Result<f64, DriverError> {
        self.log.push(DriverCall::MeasureExtent);
        Ok(EXTENT_PER_PAGE * (self.current + 1) as f64)
    }

    async fn wait_for_settle(&mut self) -> Result<(), DriverError> {
        self.log.push(DriverCall::Settle);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.log.push(DriverCall::Close);
        Ok(())
    }
}

/// Hands out scripted drivers built by a closure.
pub struct ScriptedFactory {
    build: Box<dyn Fn() -> ScriptedDriver + Send + Sync>,
    opened: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(build: impl Fn() -> ScriptedDriver + Send + Sync + 'static) -> Self {
        Self {
            build: Box::new(build),
            opened: AtomicUsize::new(0),
        }
    }

    /// Total drivers handed out so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DriverFactory for ScriptedFactory {
    async fn open(&self) -> Result<Box<dyn PageDriver>, DriverError> {
        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new((self.build)()))
    }

    fn active_drivers(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshots_replay_in_order_and_repeat_last() {
        let mut driver = ScriptedDriver::new(vec![ScriptedPage::new("<p>a</p>").then("<p>b</p>")]);
        assert_eq!(driver.snapshot().await.unwrap().html, "<p>a</p>");
        assert_eq!(driver.snapshot().await.unwrap().html, "<p>b</p>");
        assert_eq!(driver.snapshot().await.unwrap().html, "<p>b</p>");
        assert_eq!(driver.log().snapshots_of(1), 3);
    }

    #[tokio::test]
    async fn test_click_moves_to_next_page_until_last() {
        let mut driver = ScriptedDriver::new(vec![
            ScriptedPage::new("1"),
            ScriptedPage::new("2").last(),
        ])
        .with_next_control("button.next");
        assert!(driver.wait_for("button.next", Duration::ZERO).await.unwrap());
        driver.click("button.next").await.unwrap();
        assert_eq!(driver.snapshot().await.unwrap().html, "2");
        assert!(!driver.wait_for("button.next", Duration::ZERO).await.unwrap());
        assert!(driver.click("button.next").await.is_err());
    }

    #[tokio::test]
    async fn test_scroll_grows_extent_until_end() {
        let mut driver = ScriptedDriver::new(vec![ScriptedPage::new("1"), ScriptedPage::new("2")]);
        let before = driver.measure_extent().await.unwrap();
        driver.scroll_to_end().await.unwrap();
        let after = driver.measure_extent().await.unwrap();
        assert!(after > before);
        driver.scroll_to_end().await.unwrap();
        assert_eq!(driver.measure_extent().await.unwrap(), after);
    }
}
