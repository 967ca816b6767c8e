//! Crawl driver
//!
//! A [`TabRunner`] turns one request into one finished tab; the
//! [`CrawlOrchestrator`] decides which requests get a tab at all.

pub mod orchestrator;
pub mod targets;

pub use orchestrator::{CrawlOptions, CrawlOrchestrator, CrawlReport, OutputSinks};
pub use targets::make_targets;

use crate::engine::{BrowserHandle, CdpDriver, TabOutcome, TabSession};
use crate::error::Result;
use crate::http::HttpClient;
use crate::models::{CrawlConfig, Request};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Timeout of the out-of-band replay used for redirected navigations
pub const REPLAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a single request in a fresh tab
#[async_trait]
pub trait TabRunner: Send + Sync {
    async fn run_tab(&self, req: Request) -> Result<TabOutcome>;
}

/// Opens real Chromium tabs on a shared browser
pub struct BrowserTabRunner {
    browser: Arc<BrowserHandle>,
    config: Arc<CrawlConfig>,
    replay: HttpClient,
}

impl BrowserTabRunner {
    pub fn new(browser: Arc<BrowserHandle>, config: Arc<CrawlConfig>) -> Result<Self> {
        let replay = HttpClient::new(config.proxy.as_deref(), REPLAY_TIMEOUT)?;
        Ok(Self {
            browser,
            config,
            replay,
        })
    }
}

#[async_trait]
impl TabRunner for BrowserTabRunner {
    async fn run_tab(&self, req: Request) -> Result<TabOutcome> {
        let page = self.browser.new_tab().await?;
        let (driver, events) = CdpDriver::attach(page).await?;
        let session = TabSession::new(
            Arc::new(driver),
            events,
            req,
            Arc::clone(&self.config),
            self.replay.clone(),
        );
        Ok(session.run().await)
    }
}
