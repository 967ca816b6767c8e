//! Tab session: drives one navigation and gathers everything it discovers
//!
//! A session owns the receiving end of its tab's event channel. A dispatch
//! loop drains the channel in order, updates identifier bookkeeping inline
//! and spawns one handler per actionable event on a `TaskTracker`, so the
//! session can wait for every in-flight handler before collecting links.

use super::collect::{comment_urls, encode_query_with_charset, form_fill_config, CollectedLinks};
use super::driver::{TabDriver, TabEvent, TabSetup};
use super::intercept::{charset_from_content_type, SCANNED_MIME_TYPES};
use super::js;
use crate::error::{AriadneError, Result};
use crate::http::HttpClient;
use crate::models::{
    CrawlConfig, Headers, Request, Source, HEADER_COOKIE, HEADER_HOST, HEADER_REFERER,
    HEADER_USER_AGENT,
};
use crate::urls::{self, host_and_port};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

const EVALUATE_TIMEOUT: Duration = Duration::from_secs(5);
const META_CHARSET_TIMEOUT: Duration = Duration::from_millis(500);

/// Lifecycle of a tab session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabPhase {
    Created,
    Navigating,
    Intercepting,
    DomSettled,
    CollectingLinks,
    Closed,
}

/// Result of one tab run
#[derive(Debug, Default)]
pub struct TabOutcome {
    /// Every request the tab discovered, in discovery order
    pub requests: Vec<Request>,
    /// The DOM-ready or tab run deadline was hit
    pub timed_out: bool,
    /// Page source, when HTML capture is enabled
    pub html: Option<String>,
}

#[derive(Debug, Default)]
pub(super) struct TabState {
    pub(super) loader_id: String,
    pub(super) top_frame_id: String,
    pub(super) nav_network_id: String,
    /// The navigation response was a 3xx
    pub(super) found_redirection: bool,
    /// The navigation request is a held redirect awaiting replay
    pub(super) nav_redirected: bool,
    pub(super) page_charset: String,
    pub(super) browser_ua: String,
    static_loads: HashMap<String, usize>,
    dom_loaded: bool,
}

#[derive(Debug, Deserialize)]
struct BindingPayload {
    name: String,
    seq: u64,
    #[serde(default)]
    args: Vec<String>,
}

/// State shared between the session and its event handlers
pub(super) struct TabShared {
    pub(super) driver: Arc<dyn TabDriver>,
    pub(super) config: Arc<CrawlConfig>,
    pub(super) replay: HttpClient,
    pub(super) nav: Request,
    /// Configured extra headers, `Host` excluded
    pub(super) extra_headers: Headers,
    state: Mutex<TabState>,
    results: Mutex<Vec<Request>>,
    phase: Mutex<TabPhase>,
    dom_ready: Notify,
}

impl TabShared {
    pub(super) fn lock_state(&self) -> MutexGuard<'_, TabState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: TabPhase) {
        let mut current = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if *current != phase {
            debug!("Tab {} {:?} -> {:?}", self.nav.url, *current, phase);
            *current = phase;
        }
    }

    fn phase(&self) -> TabPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn remember_user_agent(&self, headers: &Headers) {
        let mut state = self.lock_state();
        if state.browser_ua.is_empty() {
            if let Some(ua) = headers.get(HEADER_USER_AGENT) {
                state.browser_ua = ua.to_string();
            }
        }
    }

    /// Records one more load of a static path and returns the new count
    pub(super) fn count_static_load(&self, path: &str) -> usize {
        let mut state = self.lock_state();
        let count = state.static_loads.entry(path.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub(super) fn is_navigation_network(&self, network_id: &str) -> bool {
        let state = self.lock_state();
        !state.loader_id.is_empty() && state.loader_id == network_id
    }

    fn is_navigation_response(&self, request_id: &str) -> bool {
        let state = self.lock_state();
        !state.nav_network_id.is_empty() && state.nav_network_id == request_id
    }

    /// Resolves a URL found in the page and records it
    pub(super) fn add_result_url(&self, method: &str, raw: &str, source: Source) {
        match urls::resolve_url(raw, &self.nav.url) {
            Ok(url) => {
                let req = self.discovered_request(method, url, String::new());
                self.add_result_request(req, source);
            }
            Err(e) => debug!("Skipping {raw:?}: {e}"),
        }
    }

    /// Request for a link that never passed through interception, with the
    /// host binding, cookie and referer of the navigation applied
    fn discovered_request(&self, method: &str, mut url: Url, post_data: String) -> Request {
        let mut headers = Headers::new();
        let mut referer = self.nav.url.to_string();

        if let Some(host) = self.nav.headers.get(HEADER_HOST) {
            let nav_hostname = self.nav.url.host_str().unwrap_or_default();
            if host != nav_hostname && host_and_port(&url) == host {
                if let Ok(rebound) = urls::with_hostname(&url, nav_hostname) {
                    url = rebound;
                }
                headers.insert(HEADER_HOST, host);
                referer = self
                    .nav
                    .url
                    .as_str()
                    .replacen(&host_and_port(&self.nav.url), host, 1);
            }
        }
        if let Some(cookie) = self.nav.headers.get(HEADER_COOKIE) {
            headers.insert(HEADER_COOKIE, cookie);
        }
        headers.insert(HEADER_REFERER, referer);
        for (key, value) in self.extra_headers.iter() {
            headers.insert(key, value);
        }
        Request::new(method, url)
            .with_headers(headers)
            .with_post_data(post_data)
    }

    /// Stamps inherited fields on a discovered request and stores it
    pub(super) fn add_result_request(&self, mut req: Request, source: Source) {
        for (key, value) in self.extra_headers.iter() {
            req.headers.insert(key, value);
        }
        if !req.headers.contains(HEADER_USER_AGENT) {
            let ua = self.lock_state().browser_ua.clone();
            if !ua.is_empty() {
                req.headers.insert(HEADER_USER_AGENT, ua);
            }
        }
        req.source = source;
        req.task_id = self.nav.task_id.clone();
        req.depth = self.nav.depth + 1;
        req.is_phone_device = self.nav.is_phone_device;

        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(req);
    }

    async fn evaluate(&self, expression: &str, limit: Duration) -> Result<serde_json::Value> {
        match tokio::time::timeout(limit, self.driver.evaluate(expression)).await {
            Ok(result) => result,
            Err(_) => Err(AriadneError::Timeout(limit.as_millis() as u64)),
        }
    }

    async fn navigate(&self) -> Result<()> {
        let setup = TabSetup {
            bindings: vec![js::ADD_LINK_BINDING.to_string(), js::TEST_BINDING.to_string()],
            init_script: js::TAB_INIT_JS.to_string(),
            extra_headers: self.extra_headers.clone(),
            phone_device: self.nav.is_phone_device,
        };
        self.driver.prepare(&setup).await?;
        self.driver.navigate(self.nav.url.as_str()).await?;
        self.set_phase(TabPhase::Intercepting);
        self.dom_ready.notified().await;
        Ok(())
    }

    /// Fills forms, fires inline handlers, then lingers so late requests are seen
    async fn after_dom_run(&self) {
        self.set_phase(TabPhase::DomSettled);
        let fill = js::fill_form_js(&form_fill_config(&self.config));
        if let Err(e) = self.evaluate(&fill, EVALUATE_TIMEOUT).await {
            debug!("Form fill on {}: {e}", self.nav.url);
        }
        let trigger = js::trigger_events_js(self.config.event_trigger_interval_ms);
        if let Err(e) = self.evaluate(&trigger, self.config.tab_run_timeout()).await {
            debug!("Event trigger on {}: {e}", self.nav.url);
        }
        tokio::time::sleep(self.config.before_exit_delay()).await;
    }

    async fn handle_binding_called(&self, payload: String) {
        let call: BindingPayload = match serde_json::from_str(&payload) {
            Ok(call) => call,
            Err(e) => {
                debug!("Binding payload not understood: {e}");
                return;
            }
        };
        if call.name == js::ADD_LINK_BINDING {
            match call.args.as_slice() {
                [url] => self.add_result_url("GET", url, Source::Dom),
                [url, tag, ..] => self.add_result_url("GET", url, Source::from_tag(tag)),
                [] => debug!("addLink called without a url"),
            }
        } else if call.name == js::TEST_BINDING {
            debug!("Test binding called with {:?}", call.args);
        }
        let deliver = js::deliver_result_js(&call.name, call.seq, "s");
        if let Err(e) = self.evaluate(&deliver, EVALUATE_TIMEOUT).await {
            debug!("Deliver binding result: {e}");
        }
    }

    async fn dismiss_dialog(&self) {
        if let Err(e) = self.driver.dismiss_dialog().await {
            debug!("Dismiss dialog: {e}");
        }
    }

    /// Evaluates the collection script and records DOM, comment and form links
    async fn collect_links(&self) -> Option<String> {
        match self.evaluate(js::COLLECT_LINKS_JS, EVALUATE_TIMEOUT).await {
            Ok(value) => {
                let links: CollectedLinks = serde_json::from_value(value).unwrap_or_default();
                debug!(
                    "{}: {} dom links, {} comments, {} forms",
                    self.nav.url,
                    links.dom.len(),
                    links.comments.len(),
                    links.forms.len()
                );
                for raw in &links.dom {
                    self.add_result_url("GET", raw, Source::Dom);
                }
                for raw in comment_urls(&links.comments) {
                    self.add_result_url("GET", &raw, Source::Comment);
                }
                for form in &links.forms {
                    if let Some(submission) = form.submission(&self.nav.url) {
                        let mut req = self.discovered_request(
                            &submission.method,
                            submission.url,
                            submission.post_data,
                        );
                        if req.method == "POST" {
                            req.headers
                                .insert("Content-Type", "application/x-www-form-urlencoded");
                        }
                        self.add_result_request(req, Source::Form);
                    }
                }
            }
            Err(e) => warn!("Collecting links on {} failed: {e}", self.nav.url),
        }

        if !self.config.save_html {
            return None;
        }
        match self.evaluate(js::HTML_JS, EVALUATE_TIMEOUT).await {
            Ok(serde_json::Value::String(html)) => Some(html),
            Ok(_) => None,
            Err(e) => {
                debug!("HTML capture on {} failed: {e}", self.nav.url);
                None
            }
        }
    }

    /// Prefers the `<meta>` charset, then re-encodes result queries
    async fn encode_results_with_charset(&self) {
        if let Ok(serde_json::Value::String(content)) =
            self.evaluate(js::META_CHARSET_JS, META_CHARSET_TIMEOUT).await
        {
            if content.contains("charset=") {
                let charset = charset_from_content_type(&content);
                if !charset.is_empty() {
                    self.lock_state().page_charset = charset;
                }
            }
        }
        let charset = self.lock_state().page_charset.clone();
        if charset.is_empty() || charset == "UTF-8" {
            return;
        }
        debug!("Re-encoding result URLs of {} as {charset}", self.nav.url);
        let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        for req in results.iter_mut() {
            encode_query_with_charset(&mut req.url, &charset);
        }
    }

    fn take_results(&self) -> Vec<Request> {
        std::mem::take(&mut *self.results.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Drains tab events until the channel closes or the session aborts it
async fn dispatch(
    shared: Arc<TabShared>,
    mut events: mpsc::Receiver<TabEvent>,
    tracker: TaskTracker,
) {
    while let Some(event) = events.recv().await {
        match event {
            TabEvent::RequestWillBeSent {
                request_id,
                loader_id,
                frame_id,
                is_document,
            } => {
                let mut state = shared.lock_state();
                if request_id == loader_id && is_document && state.top_frame_id.is_empty() {
                    state.loader_id = loader_id;
                    state.top_frame_id = frame_id.unwrap_or_default();
                }
            }
            TabEvent::RequestPaused(paused) => {
                let handler = Arc::clone(&shared);
                tracker.spawn(async move { handler.intercept_request(paused).await });
            }
            TabEvent::ResponseReceived {
                request_id,
                url,
                mime_type,
                headers,
            } => {
                if shared.is_navigation_response(&request_id) {
                    shared.detect_response_charset(&headers);
                }
                if SCANNED_MIME_TYPES.contains(&mime_type.as_str()) {
                    let handler = Arc::clone(&shared);
                    tracker.spawn(async move { handler.parse_response_urls(request_id, url).await });
                }
            }
            TabEvent::ResponseExtraInfo {
                request_id,
                headers_text,
            } => {
                if shared.is_navigation_response(&request_id) {
                    shared.handle_redirection_response(headers_text.as_deref());
                }
            }
            TabEvent::AuthRequired { request_id } => {
                let handler = Arc::clone(&shared);
                tracker.spawn(async move { handler.handle_auth_required(request_id).await });
            }
            TabEvent::DomContentLoaded | TabEvent::LoadEventFired => {
                let first = {
                    let mut state = shared.lock_state();
                    !std::mem::replace(&mut state.dom_loaded, true)
                };
                if first {
                    let handler = Arc::clone(&shared);
                    tracker.spawn(async move { handler.after_dom_run().await });
                    shared.dom_ready.notify_one();
                }
            }
            TabEvent::DialogOpening => {
                let handler = Arc::clone(&shared);
                tracker.spawn(async move { handler.dismiss_dialog().await });
            }
            TabEvent::BindingCalled { payload, .. } => {
                let handler = Arc::clone(&shared);
                tracker.spawn(async move { handler.handle_binding_called(payload).await });
            }
        }
    }
}

/// One tab crawling one navigation request
pub struct TabSession {
    shared: Arc<TabShared>,
    events: mpsc::Receiver<TabEvent>,
    tracker: TaskTracker,
}

impl TabSession {
    /// The configured extra headers are merged into the navigation request
    pub fn new(
        driver: Arc<dyn TabDriver>,
        events: mpsc::Receiver<TabEvent>,
        mut nav: Request,
        config: Arc<CrawlConfig>,
        replay: HttpClient,
    ) -> Self {
        let mut extra_headers = Headers::new();
        for (key, value) in config.extra_headers.iter() {
            nav.headers.insert(key, value);
            if !key.eq_ignore_ascii_case(HEADER_HOST) {
                extra_headers.insert(key, value);
            }
        }
        let state = TabState {
            nav_redirected: nav.redirection_flag,
            ..Default::default()
        };
        Self {
            shared: Arc::new(TabShared {
                driver,
                config,
                replay,
                nav,
                extra_headers,
                state: Mutex::new(state),
                results: Mutex::new(Vec::new()),
                phase: Mutex::new(TabPhase::Created),
                dom_ready: Notify::new(),
            }),
            events,
            tracker: TaskTracker::new(),
        }
    }

    pub fn phase(&self) -> TabPhase {
        self.shared.phase()
    }

    /// Navigates, waits for handlers, collects links and closes the tab.
    /// Deadlines cut the run short but never fail it.
    pub async fn run(self) -> TabOutcome {
        let Self {
            shared,
            events,
            tracker,
        } = self;
        info!("Crawling {}", shared.nav.simple_format());
        let deadline = tokio::time::Instant::now() + shared.config.tab_run_timeout();
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&shared), events, tracker.clone()));

        shared.set_phase(TabPhase::Navigating);
        let mut timed_out = false;
        match tokio::time::timeout(shared.config.dom_ready_timeout(), shared.navigate()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Navigating {} failed: {e}", shared.nav.url),
            Err(_) => {
                warn!("Navigate timeout {}", shared.nav.url);
                timed_out = true;
            }
        }

        tracker.close();
        if tokio::time::timeout_at(deadline, tracker.wait()).await.is_err() {
            warn!("Tab run timeout {}", shared.nav.url);
            timed_out = true;
        }

        shared.set_phase(TabPhase::CollectingLinks);
        let html = shared.collect_links().await;
        if shared.config.encode_url_with_charset {
            shared.encode_results_with_charset().await;
        }

        dispatcher.abort();
        if let Err(e) = shared.driver.close().await {
            debug!("Closing tab {}: {e}", shared.nav.url);
        }
        shared.set_phase(TabPhase::Closed);

        TabOutcome {
            requests: shared.take_results(),
            timed_out,
            html,
        }
    }
}
