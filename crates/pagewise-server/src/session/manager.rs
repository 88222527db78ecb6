//! Scrape session lifecycle: start, track, stop, and expire sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use pagewise::{
    DriverFactory, Orchestrator, PageDriver, PreparedSession, ProgressPublisher, ScrapeOutcome,
    ScrapeRequest, ScrapeResult, SessionStatus, Subscription,
};

use crate::events::{now_timestamp, EventBus, ScrapeEvent};
use crate::types::{ServerError, ServerResult, SessionSummary};

/// How long finished sessions stay queryable by default.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

struct SessionEntry {
    summary: SessionSummary,
    cancel: CancellationToken,
    publisher: Arc<ProgressPublisher>,
    finished: Option<Instant>,
}

/// Owns every session started through the server.
///
/// Each session runs as its own task with its own driver, publisher and
/// cancellation token. The table is only touched between pages.
pub struct SessionManager {
    orchestrator: Arc<Orchestrator>,
    factory: Arc<dyn DriverFactory>,
    events: Arc<EventBus>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionManager {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        factory: Arc<dyn DriverFactory>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            orchestrator,
            factory,
            events,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Validate `request`, open a driver for it and start it in the
    /// background.
    ///
    /// Invalid requests fail here, before any browser work happens. When no
    /// driver can be opened the request fails with `BrowserUnavailable` and
    /// no session is recorded.
    pub async fn start(self: &Arc<Self>, request: ScrapeRequest) -> ServerResult<String> {
        let prepared = self.orchestrator.prepare(&request)?;
        let driver = self.factory.open().await.map_err(|e| {
            tracing::warn!("No driver for new session: {e}");
            ServerError::BrowserUnavailable(e.to_string())
        })?;
        let id = prepared.id().to_string();
        let valid = prepared.request();

        let summary = SessionSummary {
            session_id: id.clone(),
            target_url: valid.target_url.clone(),
            pagination_mode: valid.pagination_mode.clone(),
            fields: prepared.fields().to_vec(),
            status: SessionStatus::Running,
            pages_scraped: 0,
            record_count: 0,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            records: Some(Vec::new()),
        };
        let started = ScrapeEvent::SessionStarted {
            session_id: id.clone(),
            target_url: summary.target_url.clone(),
            mode: summary.pagination_mode.clone(),
            timestamp: now_timestamp(),
        };

        let cancel = CancellationToken::new();
        let publisher = Arc::new(ProgressPublisher::default());
        let progress = publisher.subscribe();

        self.sessions.write().await.insert(
            id.clone(),
            SessionEntry {
                summary,
                cancel: cancel.clone(),
                publisher: Arc::clone(&publisher),
                finished: None,
            },
        );
        self.events.emit(started);
        tracing::info!("Session {id} accepted");

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.drive(prepared, driver, publisher, progress, cancel).await;
        });

        Ok(id)
    }

    /// Request cancellation. Stopping a finished or already stopped session
    /// is a no-op.
    pub async fn stop(&self, id: &str) -> ServerResult<()> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(id)
            .ok_or_else(|| ServerError::SessionNotFound(id.to_string()))?;
        if !entry.cancel.is_cancelled() {
            tracing::info!("Stop requested for session {id}");
        }
        entry.cancel.cancel();
        Ok(())
    }

    /// Cancel every running session. Returns how many were running.
    pub async fn stop_all(&self) -> usize {
        let sessions = self.sessions.read().await;
        let mut stopped = 0;
        for entry in sessions.values() {
            if !entry.summary.status.is_terminal() {
                entry.cancel.cancel();
                stopped += 1;
            }
        }
        stopped
    }

    /// Observe a session's progress from now on.
    pub async fn subscribe(&self, id: &str) -> ServerResult<Subscription> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(id)
            .ok_or_else(|| ServerError::SessionNotFound(id.to_string()))?;
        Ok(entry.publisher.subscribe())
    }

    /// Full summary, including the records collected so far.
    pub async fn summary(&self, id: &str) -> ServerResult<SessionSummary> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|entry| entry.summary.clone())
            .ok_or_else(|| ServerError::SessionNotFound(id.to_string()))
    }

    /// All sessions, oldest first, without records.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<SessionSummary> = sessions
            .values()
            .map(|entry| SessionSummary {
                records: None,
                ..entry.summary.clone()
            })
            .collect();
        list.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        list
    }

    pub async fn active_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|entry| !entry.summary.status.is_terminal())
            .count()
    }

    /// Forget sessions that finished more than `retention` ago.
    pub async fn cleanup(&self, retention: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| {
            entry
                .finished
                .map_or(true, |at| at.elapsed() < retention)
        });
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!("Expired {removed} finished sessions");
        }
        removed
    }

    async fn drive(
        self: Arc<Self>,
        prepared: PreparedSession,
        driver: Box<dyn PageDriver>,
        publisher: Arc<ProgressPublisher>,
        progress: Subscription,
        cancel: CancellationToken,
    ) {
        let id = prepared.id().to_string();
        let tracker = tokio::spawn(Arc::clone(&self).track(id.clone(), progress));

        let result = self
            .orchestrator
            .run(prepared, driver, &publisher, cancel)
            .await;

        if let Err(e) = tracker.await {
            tracing::warn!("Session {id}: progress tracker stopped: {e}");
        }
        self.finish(&id, result).await;
    }

    /// Mirror page events into the session table and the event bus.
    async fn track(self: Arc<Self>, id: String, mut progress: Subscription) {
        while let Some(event) = progress.receiver.recv().await {
            if event.is_final {
                break;
            }
            let record_count = event.page_records.len();
            if let Some(entry) = self.sessions.write().await.get_mut(&id) {
                let summary = &mut entry.summary;
                summary.pages_scraped = event.page_index;
                summary.record_count += record_count;
                summary
                    .records
                    .get_or_insert_with(Vec::new)
                    .extend(event.page_records);
            }
            self.events.emit(ScrapeEvent::PageScraped {
                session_id: id.clone(),
                page_index: event.page_index,
                record_count,
            });
        }
    }

    async fn finish(&self, id: &str, result: ScrapeResult<ScrapeOutcome>) {
        let event = {
            let mut sessions = self.sessions.write().await;
            let Some(entry) = sessions.get_mut(id) else {
                return;
            };
            entry.finished = Some(Instant::now());
            let summary = &mut entry.summary;
            summary.finished_at = Some(Utc::now());

            match result {
                Ok(outcome) => {
                    summary.status = outcome.status;
                    summary.pages_scraped = outcome.pages_scraped;
                    summary.record_count = outcome.records.len();
                    summary.records = Some(outcome.records);
                    ScrapeEvent::SessionFinished {
                        session_id: id.to_string(),
                        status: summary.status,
                        pages_scraped: summary.pages_scraped,
                        record_count: summary.record_count,
                        timestamp: now_timestamp(),
                    }
                }
                Err(e) => {
                    summary.status = SessionStatus::Failed;
                    summary.error = Some(e.to_string());
                    ScrapeEvent::SessionFailed {
                        session_id: id.to_string(),
                        error: e.to_string(),
                        timestamp: now_timestamp(),
                    }
                }
            }
        };
        self.events.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagewise::driver::scripted::{ScriptedDriver, ScriptedFactory, ScriptedPage};
    use pagewise::{
        ExtractionConfig, FieldRegistry, FieldSpec, InclusionPredicate, LocatorSpec,
        NoopFactory, PaginationMode, ScrapeSettings,
    };

    fn orchestrator() -> Arc<Orchestrator> {
        let registry: FieldRegistry = [FieldSpec::new("Name", "b")].into_iter().collect();
        let extraction = ExtractionConfig {
            container: "ul".into(),
            locator: LocatorSpec::selector("li").build().unwrap(),
            inclusion: InclusionPredicate::AnyField,
        };
        Arc::new(Orchestrator::new(
            Arc::new(registry),
            extraction,
            ScrapeSettings::default(),
        ))
    }

    fn manager(factory: Arc<dyn DriverFactory>) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            orchestrator(),
            factory,
            Arc::new(EventBus::default()),
        ))
    }

    fn scripted(pages: usize) -> Arc<dyn DriverFactory> {
        Arc::new(ScriptedFactory::new(move || {
            let script = (1..=pages)
                .map(|p| ScriptedPage::new(format!("<ul><li><b>n{p}</b></li></ul>")))
                .collect();
            ScriptedDriver::new(script)
        }))
    }

    fn request() -> ScrapeRequest {
        ScrapeRequest::new("https://example.test", ["Name"], PaginationMode::Continuous, None)
    }

    async fn wait_finished(manager: &SessionManager, id: &str) -> SessionSummary {
        for _ in 0..1000 {
            let summary = manager.summary(id).await.unwrap();
            if summary.finished_at.is_some() {
                return summary;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("session {id} did not finish");
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_runs_to_completion() {
        let manager = manager(scripted(3));
        let mut bus = manager.events().subscribe();
        let id = manager.start(request()).await.unwrap();

        let summary = wait_finished(&manager, &id).await;
        assert_eq!(summary.status, SessionStatus::Exhausted);
        assert_eq!(summary.pages_scraped, 3);
        assert_eq!(summary.record_count, 3);
        assert_eq!(summary.records.unwrap().len(), 3);
        assert_eq!(manager.active_count().await, 0);

        let first = bus.recv().await.unwrap();
        assert!(matches!(first, ScrapeEvent::SessionStarted { .. }));
    }

    #[tokio::test]
    async fn test_invalid_request_creates_no_session() {
        let manager = manager(scripted(1));
        let bad = ScrapeRequest::new("https://example.test", ["Name"], PaginationMode::Bounded, None);
        let err = manager.start(bad).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(manager.list().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let manager = manager(scripted(50));
        let id = manager.start(request()).await.unwrap();

        manager.stop(&id).await.unwrap();
        manager.stop(&id).await.unwrap();
        let summary = wait_finished(&manager, &id).await;
        assert_eq!(summary.status, SessionStatus::Cancelled);

        // Stopping a finished session is still fine.
        manager.stop(&id).await.unwrap();
        assert!(matches!(
            manager.stop("missing").await,
            Err(ServerError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_browser_is_rejected_at_start() {
        let manager = manager(Arc::new(NoopFactory));
        let mut bus = manager.events().subscribe();

        let err = manager.start(request()).await.unwrap_err();
        assert!(matches!(err, ServerError::BrowserUnavailable(_)));
        assert_eq!(err.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
        assert!(manager.list().await.is_empty());
        assert!(bus.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_navigation_fails_session() {
        let factory: Arc<dyn DriverFactory> = Arc::new(ScriptedFactory::new(|| {
            ScriptedDriver::new(Vec::new()).failing_navigation()
        }));
        let manager = manager(factory);
        let id = manager.start(request()).await.unwrap();

        let summary = wait_finished(&manager, &id).await;
        assert_eq!(summary.status, SessionStatus::Failed);
        assert!(summary.error.unwrap().contains("Session setup failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expires_finished_sessions() {
        let manager = manager(scripted(1));
        let id = manager.start(request()).await.unwrap();
        wait_finished(&manager, &id).await;

        assert_eq!(manager.cleanup(DEFAULT_RETENTION).await, 0);
        tokio::time::advance(DEFAULT_RETENTION).await;
        assert_eq!(manager.cleanup(DEFAULT_RETENTION).await, 1);
        assert!(manager.summary(&id).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_omits_records() {
        let manager = manager(scripted(1));
        let id = manager.start(request()).await.unwrap();
        wait_finished(&manager, &id).await;

        let list = manager.list().await;
        assert_eq!(list.len(), 1);
        assert!(list[0].records.is_none());
        assert_eq!(list[0].record_count, 1);
    }
}
