//! Crawl orchestration
//!
//! Seeds the targets, runs every accepted request in its own tab through
//! the tab pool and feeds each tab's discoveries back through the filter.
//! The crawl ends when no tab is running and nothing new was scheduled.

use super::targets::make_targets;
use super::TabRunner;
use crate::error::{AriadneError, Result};
use crate::filter::{matches_keyword, strict_host_limit, FilterMode, SimpleFilter, SmartFilter};
use crate::http::HttpClient;
use crate::models::{CrawlConfig, Request};
use crate::pool::{ProcessMonitor, ScalingController, TabPool};
use crate::report::{
    CrawlSummary, DomainSink, RequestInfo, RequestSink, ResultSink, ALL_DOMAIN_FILE,
    ALL_REQ_RESULT_FILE, REQ_RESULT_FILE, SUB_DOMAIN_FILE,
};
use crate::tasks::{build_result, result_key, TaskSource, RESULT_FETCH_TIMEOUT};
use crate::urls;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// File sinks of one crawl; each is optional
#[derive(Default)]
pub struct OutputSinks {
    pub req: Option<RequestSink>,
    pub all_req: Option<RequestSink>,
    pub all_domain: Option<DomainSink>,
    pub sub_domain: Option<DomainSink>,
}

impl OutputSinks {
    /// Creates the sinks inside `dir`. Fails if any output file exists.
    pub fn create(dir: &Path, config: &CrawlConfig, root_domain: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            req: Some(RequestSink::create(&dir.join(REQ_RESULT_FILE))?),
            all_req: Some(RequestSink::create(&dir.join(ALL_REQ_RESULT_FILE))?),
            all_domain: if config.collect_all_domains {
                Some(DomainSink::all(&dir.join(ALL_DOMAIN_FILE))?)
            } else {
                None
            },
            sub_domain: if config.collect_sub_domains {
                Some(DomainSink::sub_domains(&dir.join(SUB_DOMAIN_FILE), root_domain)?)
            } else {
                None
            },
        })
    }

    fn save(sink: Option<&dyn ResultSink>, req: &Request) {
        if let Some(sink) = sink {
            if let Err(e) = sink.save(req) {
                warn!("Saving {} failed: {e}", req.url);
            }
        }
    }

    fn close(&self) {
        let sinks: [Option<&dyn ResultSink>; 4] = [
            self.req.as_ref().map(|s| s as &dyn ResultSink),
            self.all_req.as_ref().map(|s| s as &dyn ResultSink),
            self.all_domain.as_ref().map(|s| s as &dyn ResultSink),
            self.sub_domain.as_ref().map(|s| s as &dyn ResultSink),
        ];
        for sink in sinks.into_iter().flatten() {
            if let Err(e) = sink.close() {
                warn!("Closing result sink failed: {e}");
            }
        }
    }
}

/// Optional collaborators of a crawl
#[derive(Default)]
pub struct CrawlOptions {
    /// Shared pool; a pool of `max_tab_count` slots is created when absent
    pub pool: Option<Arc<TabPool>>,
    pub cancel: CancellationToken,
    /// Directory for the result files; nothing is written when absent
    pub output_dir: Option<PathBuf>,
    /// Enables adaptive scaling when `auto_scale` is set
    pub monitor: Option<Arc<dyn ProcessMonitor>>,
    /// Receives results of requests carrying a task id
    pub task_source: Option<Arc<dyn TaskSource>>,
    pub task_id: Option<String>,
}

/// What a finished crawl produced
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub crawl_id: String,
    pub targets: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Requests accepted by the filter
    pub requests: Vec<Request>,
    /// Every in-scope request seen, deduplicated exactly
    pub all_requests: Vec<Request>,
    pub all_domains: Vec<String>,
    pub sub_domains: Vec<String>,
    pub tabs_started: u64,
    pub tab_timeouts: u64,
    pub cancelled: bool,
}

impl CrawlReport {
    pub fn summary(&self) -> CrawlSummary {
        CrawlSummary {
            crawl_id: self.crawl_id.clone(),
            targets: self.targets.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            tabs_started: self.tabs_started,
            tab_timeouts: self.tab_timeouts,
            req_list: self.requests.iter().map(RequestInfo::from).collect(),
            all_req_list: self.all_requests.iter().map(RequestInfo::from).collect(),
            all_domain_list: self.all_domains.clone(),
            sub_domain_list: self.sub_domains.clone(),
        }
    }
}

#[derive(Default)]
struct DomainSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl DomainSet {
    fn insert(&mut self, host: &str) {
        if self.seen.insert(host.to_string()) {
            self.ordered.push(host.to_string());
        }
    }
}

#[derive(Default)]
struct Collected {
    requests: Vec<Request>,
    all_requests: Vec<Request>,
    all_domains: DomainSet,
    sub_domains: DomainSet,
}

struct Shared {
    config: Arc<CrawlConfig>,
    runner: Arc<dyn TabRunner>,
    pool: Arc<TabPool>,
    filter: SmartFilter,
    all_req_filter: SimpleFilter,
    root_domain: String,
    budget: usize,
    crawled: Mutex<usize>,
    collected: Mutex<Collected>,
    sinks: OutputSinks,
    task_source: Option<Arc<dyn TaskSource>>,
    result_client: Option<HttpClient>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

/// Drives one crawl from seeds to drained pool
pub struct CrawlOrchestrator {
    shared: Arc<Shared>,
    targets: Vec<Request>,
    monitor: Option<Arc<dyn ProcessMonitor>>,
}

impl CrawlOrchestrator {
    pub fn new(
        config: Arc<CrawlConfig>,
        runner: Arc<dyn TabRunner>,
        options: CrawlOptions,
    ) -> Result<Self> {
        let targets = make_targets(&config, options.task_id.as_deref())?;
        let first = targets
            .first()
            .ok_or_else(|| AriadneError::ConfigError("no targets given".into()))?;

        let host = first.url.host_str().unwrap_or_default().to_string();
        let host_limit = if config.filter_mode == FilterMode::Strict {
            strict_host_limit(&first.url)
        } else {
            host.clone()
        };
        let root_domain = urls::root_domain(&host);

        let budget = if config.max_crawl_count < targets.len() {
            targets.len() * 100
        } else {
            config.max_crawl_count
        };

        let result_client = match (&options.task_source, config.push_to_proxy.as_deref()) {
            (Some(_), Some(proxy)) => Some(HttpClient::new(Some(proxy), RESULT_FETCH_TIMEOUT)?),
            _ => None,
        };

        let sinks = match options.output_dir {
            Some(ref dir) => OutputSinks::create(dir, &config, &root_domain)?,
            None => OutputSinks::default(),
        };

        let pool = options
            .pool
            .unwrap_or_else(|| TabPool::new(config.max_tab_count));

        info!(
            "Crawl of {} targets, scope {}, filter {}, budget {}",
            targets.len(),
            host_limit,
            config.filter_mode,
            budget
        );

        Ok(Self {
            shared: Arc::new(Shared {
                filter: SmartFilter::new(
                    config.filter_mode,
                    Some(host_limit.clone()),
                    config.repeat_threshold,
                ),
                all_req_filter: SimpleFilter::new(
                    Some(host_limit),
                    config.filter_mode == FilterMode::Strict,
                ),
                config,
                runner,
                pool,
                root_domain,
                budget,
                crawled: Mutex::new(0),
                collected: Mutex::new(Collected::default()),
                sinks,
                task_source: options.task_source,
                result_client,
                tracker: TaskTracker::new(),
                cancel: options.cancel,
            }),
            targets,
            monitor: options.monitor,
        })
    }

    /// Seed requests this crawl starts from
    pub fn targets(&self) -> &[Request] {
        &self.targets
    }

    /// Root domain used for sub-domain collection
    pub fn root_domain(&self) -> &str {
        &self.shared.root_domain
    }

    pub fn pool(&self) -> Arc<TabPool> {
        Arc::clone(&self.shared.pool)
    }

    /// Runs the crawl to completion or cancellation
    pub async fn run(self) -> CrawlReport {
        let Self {
            shared,
            targets,
            monitor,
        } = self;
        let started_at = Utc::now();

        let scaling_cancel = shared.cancel.child_token();
        let scaling = match (shared.config.auto_scale, monitor) {
            (true, Some(monitor)) => {
                let controller = ScalingController::new(
                    Arc::clone(&shared.pool),
                    monitor,
                    shared.config.scale_weights,
                    shared.config.scale_interval(),
                    scaling_cancel.clone(),
                );
                Some(tokio::spawn(controller.run()))
            }
            _ => None,
        };

        for target in &targets {
            shared.save_all(target);
            let mut seed = target.clone();
            // registers the seed's signature; seeds are crawled either way
            if shared.filter.do_filter(&mut seed) {
                debug!("Seed {} already known to the filter", seed.url);
            }
            shared.save_result(&seed).await;
            if matches_keyword(seed.url.as_str(), &shared.config.ignore_keywords) {
                info!("Seed {} matches an ignore keyword, not crawling", seed.url);
                continue;
            }
            shared.add_task(seed);
        }

        shared.tracker.close();
        let mut cancelled = false;
        tokio::select! {
            _ = shared.tracker.wait() => {}
            _ = shared.cancel.cancelled() => {
                warn!("Crawl cancelled, releasing tab pool");
                shared.pool.tune(1);
                shared.pool.release();
                cancelled = true;
            }
        }

        scaling_cancel.cancel();
        if let Some(handle) = scaling {
            let _ = handle.await;
        }
        shared.sinks.close();
        if let Some(ref source) = shared.task_source {
            if let Err(e) = source.close().await {
                warn!("Closing task source failed: {e}");
            }
        }

        let collected = std::mem::take(&mut *shared.lock_collected());
        let report = CrawlReport {
            crawl_id: uuid::Uuid::new_v4().to_string(),
            targets: targets.iter().map(|t| t.url.to_string()).collect(),
            started_at,
            finished_at: Utc::now(),
            requests: collected.requests,
            all_requests: collected.all_requests,
            all_domains: collected.all_domains.ordered,
            sub_domains: collected.sub_domains.ordered,
            tabs_started: shared.pool.tabs_started(),
            tab_timeouts: shared.pool.tab_timeouts(),
            cancelled,
        };
        info!(
            "Crawl finished: {} requests, {} seen, {} tabs ({} timed out)",
            report.requests.len(),
            report.all_requests.len(),
            report.tabs_started,
            report.tab_timeouts
        );
        report
    }
}

impl Shared {
    fn lock_collected(&self) -> std::sync::MutexGuard<'_, Collected> {
        self.collected.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Schedules a tab unless the crawl budget is spent
    fn add_task(self: &Arc<Self>, req: Request) {
        {
            let mut crawled = self.crawled.lock().unwrap_or_else(|e| e.into_inner());
            if *crawled >= self.budget {
                debug!("Crawl budget of {} spent, dropping {}", self.budget, req.url);
                return;
            }
            *crawled += 1;
        }
        let shared = Arc::clone(self);
        self.tracker.spawn(shared.crawl(req));
    }

    fn crawl(self: Arc<Self>, req: Request) -> BoxFuture<'static, ()> {
        async move {
            let slot = match self.pool.acquire().await {
                Ok(slot) => slot,
                Err(_) => {
                    debug!("Tab pool closed, dropping {}", req.url);
                    return;
                }
            };
            if self.cancel.is_cancelled() {
                return;
            }

            let nav = req.clone();
            let outcome = match self.runner.run_tab(req).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Tab for {} failed: {e}", nav.simple_format());
                    return;
                }
            };
            if outcome.timed_out {
                self.pool.record_timeout();
            }
            drop(slot);

            if let (Some(html), Some(task_id)) = (outcome.html, nav.task_id.as_deref()) {
                self.put_task_result(
                    &result_key(task_id, &nav),
                    serde_json::json!({ "url": nav.url.as_str(), "html": html }),
                )
                .await;
            }
            self.handle_results(outcome.requests).await;
        }
        .boxed()
    }

    async fn handle_results(self: &Arc<Self>, requests: Vec<Request>) {
        for req in &requests {
            self.save_all(req);
        }
        let max_depth = self.config.max_depth;
        for mut req in requests {
            if self.filter.do_filter(&mut req) {
                continue;
            }
            self.save_result(&req).await;
            if matches_keyword(req.url.as_str(), &self.config.ignore_keywords) {
                debug!("Not crawling {}: ignore keyword", req.url);
                continue;
            }
            if max_depth > 0 && req.depth > max_depth {
                debug!("Not crawling {}: depth {} over {}", req.url, req.depth, max_depth);
                continue;
            }
            self.add_task(req);
        }
    }

    /// Records a request into the all-requests list and the domain lists
    fn save_all(&self, req: &Request) {
        let host = req.url.host_str().unwrap_or_default().to_ascii_lowercase();
        let mut collected = self.lock_collected();
        if !self.all_req_filter.do_filter(req) {
            collected.all_requests.push(req.clone());
            OutputSinks::save(self.sinks.all_req.as_ref().map(|s| s as &dyn ResultSink), req);
        }
        if host.is_empty() {
            return;
        }
        if self.config.collect_all_domains {
            collected.all_domains.insert(&host);
            OutputSinks::save(self.sinks.all_domain.as_ref().map(|s| s as &dyn ResultSink), req);
        }
        if self.config.collect_sub_domains
            && (host == self.root_domain || host.ends_with(&format!(".{}", self.root_domain)))
        {
            collected.sub_domains.insert(&host);
            OutputSinks::save(self.sinks.sub_domain.as_ref().map(|s| s as &dyn ResultSink), req);
        }
    }

    /// Records an accepted request
    async fn save_result(&self, req: &Request) {
        {
            let mut collected = self.lock_collected();
            collected.requests.push(req.clone());
            OutputSinks::save(self.sinks.req.as_ref().map(|s| s as &dyn ResultSink), req);
        }
        if let (Some(_), Some(task_id)) = (&self.task_source, req.task_id.as_deref()) {
            let value = build_result(req, self.result_client.as_ref()).await;
            self.put_task_result(&result_key(task_id, req), value).await;
        }
    }

    async fn put_task_result(&self, key: &str, value: serde_json::Value) {
        let Some(ref source) = self.task_source else {
            return;
        };
        if let Err(e) = source.put_result(key, &value).await {
            warn!("Storing task result {key} failed: {e}");
        }
    }
}
