//! Common test utilities

#![allow(dead_code)]

use ariadne::crawler::TabRunner;
use ariadne::engine::TabOutcome;
use ariadne::error::Result;
use ariadne::models::{CrawlConfig, Request, Source};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// Creates a test CrawlConfig for the given targets
pub fn test_config(targets: &[&str]) -> CrawlConfig {
    CrawlConfig {
        targets: targets.iter().map(|t| t.to_string()).collect(),
        dual_scheme: false,
        max_tab_count: 4,
        ..CrawlConfig::default()
    }
}

pub fn request(method: &str, url: &str) -> Request {
    Request::new(method, Url::parse(url).expect("valid url"))
}

/// Tab runner that answers from a fixed site map instead of a browser
#[derive(Default)]
pub struct SiteMapRunner {
    links: HashMap<String, Vec<(String, Source)>>,
    html: HashMap<String, String>,
    delay: Option<Duration>,
    timed_out: Vec<String>,
    visited: Mutex<Vec<Request>>,
}

impl SiteMapRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page `from` links to `to`
    pub fn link(mut self, from: &str, to: &str, source: Source) -> Self {
        self.links
            .entry(from.to_string())
            .or_default()
            .push((to.to_string(), source));
        self
    }

    pub fn html(mut self, page: &str, html: &str) -> Self {
        self.html.insert(page.to_string(), html.to_string());
        self
    }

    /// Every tab sleeps this long before finishing
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Tabs on this page report a timeout
    pub fn times_out(mut self, page: &str) -> Self {
        self.timed_out.push(page.to_string());
        self
    }

    /// URLs of every tab run so far
    pub fn visited(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .visited
            .lock()
            .expect("lock")
            .iter()
            .map(|r| r.url.to_string())
            .collect();
        urls.sort();
        urls
    }

    pub fn visited_requests(&self) -> Vec<Request> {
        self.visited.lock().expect("lock").clone()
    }
}

#[async_trait]
impl TabRunner for SiteMapRunner {
    async fn run_tab(&self, req: Request) -> Result<TabOutcome> {
        self.visited.lock().expect("lock").push(req.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let page = req.url.to_string();
        let requests = self
            .links
            .get(&page)
            .map(|links| {
                links
                    .iter()
                    .map(|(url, source)| {
                        let mut child = request("GET", url).with_source(*source);
                        child.depth = req.depth + 1;
                        child.task_id = req.task_id.clone();
                        child
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(TabOutcome {
            requests,
            timed_out: self.timed_out.contains(&page),
            html: self.html.get(&page).cloned(),
        })
    }
}
