//! Chromium-based page driver using chromiumoxide.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;

use super::{DriverFactory, NavigationResult, PageDriver};
use crate::extract::PageSnapshot;
use crate::types::DriverError;

/// Poll interval while waiting for an element to become actionable.
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. PAGEWISE_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("PAGEWISE_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 3. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launch options for the shared browser process.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub navigation_timeout: Duration,
    /// Extra wait after a navigation completes, for client-side rendering.
    pub settle_delay: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            navigation_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// Launches one Chromium process and opens a tab per session.
pub struct ChromiumFactory {
    browser: Browser,
    options: BrowserOptions,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumFactory {
    /// Launch Chromium with the given options.
    pub async fn launch(options: BrowserOptions) -> Result<Self, DriverError> {
        let chrome_path = find_chromium().ok_or_else(|| {
            DriverError::Backend(
                "Chromium not found. Install Chrome or set PAGEWISE_CHROMIUM_PATH.".to_string(),
            )
        })?;

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
        if options.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }
        let config = builder
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .build()
            .map_err(|e| DriverError::Backend(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Backend(format!("failed to launch Chromium: {e}")))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        tracing::info!("Chromium launched (headless: {})", options.headless);

        Ok(Self {
            browser,
            options,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl DriverFactory for ChromiumFactory {
    async fn open(&self) -> Result<Box<dyn PageDriver>, DriverError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Backend(format!("failed to create new page: {e}")))?;

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumDriver {
            page,
            options: self.options.clone(),
            active_count: Arc::clone(&self.active_count),
        }))
    }

    fn active_drivers(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single Chromium tab.
pub struct ChromiumDriver {
    page: Page,
    options: BrowserOptions,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumDriver {
    async fn eval(&self, script: String) -> Result<serde_json::Value, DriverError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| DriverError::Backend(format!("JS execution failed: {e}")))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn is_actionable(&self, locator: &str) -> Result<bool, DriverError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
             const r = el.getBoundingClientRect(); const s = getComputedStyle(el); \
             return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && !el.disabled; }})()",
            sel = js_string(locator)
        );
        Ok(self.eval(script).await?.as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, DriverError> {
        let start = Instant::now();
        let timeout = self.options.navigation_timeout;

        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(DriverError::NavigationFailed(format!("{url}: {e}"))),
            Err(_) => {
                return Err(DriverError::Timeout(format!(
                    "navigation to {url} after {}ms",
                    timeout.as_millis()
                )))
            }
        }
        // `goto` already waited for the load event.
        tokio::time::sleep(self.options.settle_delay).await;

        let final_url = self
            .page
            .url()
            .await
            .unwrap_or_default()
            .unwrap_or_else(|| url.to_string());

        Ok(NavigationResult {
            final_url,
            load_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn wait_for(&mut self, locator: &str, timeout: Duration) -> Result<bool, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_actionable(locator).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    async fn query(&mut self, program: &str) -> Result<serde_json::Value, DriverError> {
        self.eval(program.to_string()).await
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, DriverError> {
        let html = self
            .page
            .content()
            .await
            .map_err(|e| DriverError::Backend(format!("failed to get HTML: {e}")))?;
        let url = self.page.url().await.ok().flatten();
        let snapshot = PageSnapshot::new(html);
        Ok(match url {
            Some(url) => snapshot.with_url(url),
            None => snapshot,
        })
    }

    async fn click(&mut self, locator: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(locator)
            .await
            .map_err(|_| DriverError::NotFound(locator.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| DriverError::Backend(format!("click on {locator} failed: {e}")))?;
        Ok(())
    }

    async fn fill(&mut self, locator: &str, text: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(locator)
            .await
            .map_err(|_| DriverError::NotFound(locator.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| DriverError::Backend(format!("focus on {locator} failed: {e}")))?;
        element
            .type_str(text)
            .await
            .map_err(|e| DriverError::Backend(format!("typing into {locator} failed: {e}")))?;
        Ok(())
    }

    async fn scroll_to_end(&mut self) -> Result<(), DriverError> {
        self.eval("window.scrollTo(0, document.body.scrollHeight)".to_string())
            .await
            .map(|_| ())
    }

    async fn measure_extent(&mut self) -> Result<f64, DriverError> {
        self.eval("document.body.scrollHeight".to_string())
            .await?
            .as_f64()
            .ok_or_else(|| DriverError::Backend("scrollHeight is not a number".to_string()))
    }

    async fn wait_for_settle(&mut self) -> Result<(), DriverError> {
        let timeout = self.options.navigation_timeout;
        match tokio::time::timeout(timeout, self.page.wait_for_navigation()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(DriverError::NavigationFailed(e.to_string())),
            Err(_) => {
                return Err(DriverError::Timeout(format!(
                    "page did not settle within {}ms",
                    timeout.as_millis()
                )))
            }
        }
        tokio::time::sleep(self.options.settle_delay).await;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        self.page
            .close()
            .await
            .map_err(|e| DriverError::Backend(format!("failed to close page: {e}")))
    }
}

/// Quote a string as a JavaScript literal.
fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
