//! The per-session scrape loop.
//!
//! A session is prepared first (request validated, template resolved and
//! compiled) so that nothing reaches a page unless the request is sound.
//! The prepared session is then run against one `PageDriver`:
//!
//! ```text
//! setup ─▶ navigate ─▶ ┌─ extract page n ─▶ publish n ─▶ advance ─┐
//!                      └──────────────── HasMore ◀────────────────┘
//!                                  Exhausted | Stopped ─▶ terminal event
//! ```
//!
//! Every path closes the driver and publishes exactly one terminal event.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::PageDriver;
use crate::extract::{ExtractionConfig, ExtractionStep};
use crate::pagination::{PaginationController, PaginationSettings, PaginationState};
use crate::publisher::ProgressPublisher;
use crate::request::{ScrapeRequest, ValidatedRequest};
use crate::setup::SessionSetup;
use crate::template::FieldRegistry;
use crate::types::{
    DriverError, ProgressEvent, Record, ScrapeError, ScrapeOutcome, ScrapeResult, ScrapeSession,
    SessionStatus,
};

/// Session-level timings.
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    /// Pause before re-reading an empty first page.
    pub retry_backoff: Duration,
    pub pagination: PaginationSettings,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(2),
            pagination: PaginationSettings::default(),
        }
    }
}

/// A validated, compiled session that has not touched a page yet.
#[derive(Debug)]
pub struct PreparedSession {
    id: String,
    request: ValidatedRequest,
    step: ExtractionStep,
    fields: Vec<String>,
}

impl PreparedSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &ValidatedRequest {
        &self.request
    }

    /// Field names that will be extracted, in request order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// Runs scrape sessions for one site profile.
pub struct Orchestrator {
    registry: Arc<FieldRegistry>,
    extraction: ExtractionConfig,
    settings: ScrapeSettings,
    setup: Option<Arc<dyn SessionSetup>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<FieldRegistry>,
        extraction: ExtractionConfig,
        settings: ScrapeSettings,
    ) -> Self {
        Self {
            registry,
            extraction,
            settings,
            setup: None,
        }
    }

    /// Run `setup` on every fresh driver before the target is opened.
    pub fn with_setup(mut self, setup: Arc<dyn SessionSetup>) -> Self {
        self.setup = Some(setup);
        self
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ScrapeSettings {
        &self.settings
    }

    /// Validate `request` and compile its template under a new session id.
    pub fn prepare(&self, request: &ScrapeRequest) -> ScrapeResult<PreparedSession> {
        self.prepare_with_id(uuid::Uuid::new_v4().to_string(), request)
    }

    pub fn prepare_with_id(
        &self,
        id: impl Into<String>,
        request: &ScrapeRequest,
    ) -> ScrapeResult<PreparedSession> {
        let request = request.validate()?;
        let template = self.registry.resolve(request.fields.as_slice())?;
        let fields: Vec<String> = template.names().map(str::to_string).collect();
        if !self.extraction.inclusion.satisfiable_by(&fields) {
            return Err(ScrapeError::Validation(format!(
                "fields {fields:?} can never satisfy the inclusion rule {:?}",
                self.extraction.inclusion
            )));
        }
        let step = ExtractionStep::new(&template, &self.extraction)?;
        Ok(PreparedSession {
            id: id.into(),
            fields,
            request,
            step,
        })
    }

    /// Prepare and run in one call.
    pub async fn scrape(
        &self,
        request: &ScrapeRequest,
        driver: Box<dyn PageDriver>,
        publisher: &ProgressPublisher,
        cancel: CancellationToken,
    ) -> ScrapeResult<ScrapeOutcome> {
        let prepared = self.prepare(request)?;
        self.run(prepared, driver, publisher, cancel).await
    }

    /// Drive one session to its end.
    ///
    /// Returns the outcome for `Exhausted` and `Cancelled` sessions. A
    /// failed setup or first navigation returns `ScrapeError::SessionSetup`
    /// after the `failed` terminal event has been published.
    pub async fn run(
        &self,
        prepared: PreparedSession,
        mut driver: Box<dyn PageDriver>,
        publisher: &ProgressPublisher,
        cancel: CancellationToken,
    ) -> ScrapeResult<ScrapeOutcome> {
        let PreparedSession {
            id, request, step, ..
        } = prepared;
        let mut session = ScrapeSession {
            id,
            target_url: request.target_url,
            pagination_mode: request.pagination_mode,
            max_pages: request.max_pages,
            record_count: 0,
            status: SessionStatus::Running,
        };
        info!(
            "Session {} started: {} ({} mode)",
            session.id, session.target_url, session.pagination_mode
        );

        let mut records = Vec::new();
        let mut pages = 0u32;
        let opened = self.open(driver.as_mut(), &session.target_url).await;
        let result = match opened {
            Ok(()) => {
                let status = self
                    .paginate(
                        &mut session,
                        driver.as_mut(),
                        &step,
                        publisher,
                        &cancel,
                        &mut records,
                        &mut pages,
                    )
                    .await;
                session.status = status;
                Ok(())
            }
            Err(e) => {
                warn!("Session {} setup failed: {e}", session.id);
                session.status = SessionStatus::Failed;
                Err(ScrapeError::SessionSetup(e))
            }
        };

        publisher.publish(ProgressEvent::terminal(&session.id, pages + 1, session.status));
        if let Err(e) = driver.close().await {
            warn!("Session {}: failed to release driver: {e}", session.id);
        }
        info!(
            "Session {} finished: {} after {} pages, {} records",
            session.id, session.status, pages, session.record_count
        );

        result.map(|()| ScrapeOutcome {
            session_id: session.id,
            status: session.status,
            pages_scraped: pages,
            records,
        })
    }

    async fn open(&self, driver: &mut dyn PageDriver, url: &str) -> Result<(), DriverError> {
        if let Some(setup) = &self.setup {
            setup.prepare(driver).await?;
        }
        let nav = driver.navigate(url).await?;
        debug!("Opened {} in {}ms", nav.final_url, nav.load_time_ms);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn paginate(
        &self,
        session: &mut ScrapeSession,
        driver: &mut dyn PageDriver,
        step: &ExtractionStep,
        publisher: &ProgressPublisher,
        cancel: &CancellationToken,
        records: &mut Vec<Record>,
        pages: &mut u32,
    ) -> SessionStatus {
        let mut controller = PaginationController::new(
            session.pagination_mode.clone(),
            session.max_pages,
            self.settings.pagination.clone(),
        );
        controller.begin();

        loop {
            if cancel.is_cancelled() {
                controller.stop();
                info!("Session {} cancelled after page {}", session.id, pages);
                return SessionStatus::Cancelled;
            }

            let page_index = *pages + 1;
            let page_records = match self.extract_page(driver, step, page_index).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("Session {}: page {page_index} unreadable: {e}", session.id);
                    return SessionStatus::Exhausted;
                }
            };

            info!(
                "Session {}: page {page_index} → {} records",
                session.id,
                page_records.len()
            );
            session.record_count += page_records.len();
            records.extend(page_records.iter().cloned());
            publisher.publish(ProgressEvent::page(&session.id, page_index, page_records));
            *pages = page_index;

            match controller.advance(driver, page_index, cancel).await {
                PaginationState::HasMore => continue,
                PaginationState::Stopped => {
                    info!("Session {} cancelled after page {}", session.id, pages);
                    return SessionStatus::Cancelled;
                }
                _ => return SessionStatus::Exhausted,
            }
        }
    }

    /// Read one page. An empty or unreadable first page is re-read once
    /// after the retry backoff.
    async fn extract_page(
        &self,
        driver: &mut dyn PageDriver,
        step: &ExtractionStep,
        page_index: u32,
    ) -> Result<Vec<Record>, DriverError> {
        let first = read_page(driver, step).await;
        if page_index != 1 {
            return first;
        }
        match &first {
            Ok(records) if !records.is_empty() => return first,
            Ok(_) => debug!("Page 1 returned no records"),
            Err(e) => debug!("Page 1 could not be read: {e}"),
        }

        info!(
            "Retrying page 1 in {}ms",
            self.settings.retry_backoff.as_millis()
        );
        tokio::time::sleep(self.settings.retry_backoff).await;
        read_page(driver, step).await
    }
}

async fn read_page(
    driver: &mut dyn PageDriver,
    step: &ExtractionStep,
) -> Result<Vec<Record>, DriverError> {
    let snapshot = driver.snapshot().await?;
    step.run(&snapshot)
}
