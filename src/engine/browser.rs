//! Long-lived browser process shared by all tabs

use crate::error::{AriadneError, Result};
use crate::models::CrawlConfig;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const WINDOW_WIDTH: u32 = 1920;
const WINDOW_HEIGHT: u32 = 1080;

/// Owns the Chromium process and its CDP connection
pub struct BrowserHandle {
    browser: Mutex<Option<Browser>>,
    handler: JoinHandle<()>,
}

impl BrowserHandle {
    /// Launches Chromium with the crawler's flags
    pub async fn launch(config: &CrawlConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(WINDOW_WIDTH, WINDOW_HEIGHT)
            .arg("--disable-gpu")
            .arg("--ignore-certificate-errors")
            .arg("--disable-images")
            .arg("--disable-web-security")
            .arg("--disable-xss-auditor")
            .arg("--disable-setuid-sandbox")
            .arg("--allow-running-insecure-content")
            .arg("--disable-webgl")
            .arg("--disable-popup-blocking")
            .arg("--disable-dev-shm-usage");

        if !config.headless {
            builder = builder.with_head();
        }
        if config.incognito {
            builder = builder.arg("--incognito");
        }
        if let Some(ref path) = config.chromium_path {
            builder = builder.chrome_executable(path);
        }
        if let Some(ref proxy) = config.proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }

        let browser_config = builder
            .build()
            .map_err(|e| AriadneError::BrowserError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| AriadneError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // Spawn handler as background task
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
            debug!("Browser handler exited");
        });

        info!("Browser launched");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler,
        })
    }

    /// Opens a fresh blank tab
    pub async fn new_tab(&self) -> Result<Page> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| AriadneError::BrowserError("browser already closed".into()))?;
        Ok(browser.new_page("about:blank").await?)
    }

    /// Closes every tab and the browser process. Safe to call twice.
    pub async fn close(&self) {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            info!("Closing browser");
            if let Err(e) = browser.close().await {
                debug!("Browser close: {e}");
            }
            if let Err(e) = browser.wait().await {
                debug!("Browser wait: {e}");
            }
        }
        self.handler.abort();
    }
}
