//! Request interception and navigation control for a tab
//!
//! Every request the page makes is paused by the fetch domain and lands
//! here. Ignored and surplus static requests are blocked, the top-level
//! navigation is pinned to the scan target, and everything seen is recorded
//! in the tab's result list.

use super::driver::{FailReason, PausedRequest, RequestOverride};
use super::tab::TabShared;
use crate::error::{AriadneError, Result};
use crate::filter::matches_keyword;
use crate::http::client::REPLAY_RANGE;
use crate::models::{Headers, Request, Source, HEADER_HOST, HEADER_ORIGIN, HEADER_REFERER};
use crate::urls::{self, host_and_port, navigation_url};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

/// Body served in place of a server-side redirect
pub const PLACEHOLDER_BODY: &str = "<html><body>Ariadne</body></html>";
pub const AUTH_USERNAME: &str = "Ariadne";
pub const AUTH_PASSWORD: &str = "Ariadne";

const CONTINUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Quoted strings that look like absolute, relative or scripted URLs
static SUSPECT_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:"|')(((?:[a-zA-Z]{1,10}://|//)[^"'/]{1,}\.[a-zA-Z]{2,}[^"']{0,})|((?:/|\.\./|\./)[^"'><,;|*()(%%$^/\\\[\]][^"'><,;|()]{1,})|([a-zA-Z0-9_\-/]{1,}/[a-zA-Z0-9_\-/]{1,}\.(?:[a-zA-Z]{1,4}|action)(?:[\?|#][^"|']{0,}|))|([a-zA-Z0-9_\-/]{1,}/[a-zA-Z0-9_\-/]{3,}(?:[\?|#][^"|']{0,}|))|([a-zA-Z0-9_\-]{1,}\.(?:php|asp|aspx|jsp|json|action|html|js|txt|xml)(?:[\?|#][^"|']{0,}|)))(?:"|')"#,
    )
    .expect("static regex")
});

static CHARSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("charset=(.+)$").expect("static regex"));

/// MIME types that the URL scan tends to pick up from string literals
const CONTENT_TYPES: &[&str] = &[
    "image/x-icon",
    "text/css",
    "text/javascript",
    "text/html",
    "text/xml",
    "text/plain",
    "application/json",
    "application/x-www-form-urlencoded",
    "multipart/form-data",
];

/// Response MIME types whose bodies are scanned for URLs
pub const SCANNED_MIME_TYPES: &[&str] = &["application/javascript", "text/html", "application/json"];

pub fn is_content_type(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    CONTENT_TYPES.iter().any(|ct| lower.starts_with(ct))
}

/// URL-like string literals in a response body, quotes removed
pub fn suspect_urls(body: &str) -> Vec<String> {
    SUSPECT_URL_RE
        .find_iter(body)
        .filter_map(|m| {
            let quoted = m.as_str();
            let inner = &quoted[1..quoted.len() - 1];
            (!is_content_type(inner)).then(|| inner.to_string())
        })
        .collect()
}

/// Status code from the raw status line of `headersText`, 0 when malformed
pub fn status_from_headers_text(text: &str) -> u16 {
    let line = text.lines().next().unwrap_or_default();
    let parts: Vec<&str> = line.split(' ').collect();
    if parts.len() < 3 {
        return 0;
    }
    parts[1].parse().unwrap_or(0)
}

/// Upper-cased charset label of a `Content-Type` value (`text/html; charset=gbk` -> `GBK`)
pub fn charset_from_content_type(value: &str) -> String {
    CHARSET_RE
        .find(value)
        .map(|m| m.as_str().replace("charset=", "").to_uppercase().trim().to_string())
        .unwrap_or_default()
}

/// Headers for the pinned navigation: navigation headers the page did not
/// send, followed by everything the page sent
pub fn merge_headers(nav: &Headers, page: &Headers) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = nav
        .iter()
        .filter(|(k, _)| !page.contains(k))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    merged.extend(page.to_pairs());
    merged
}

/// Rewrites a request made while visiting a target through a bound `Host`
///
/// When the navigation request carries a `Host` header naming a vhost other
/// than the URL it connects to, requests aimed at that vhost are pointed back
/// at the connect address and keep the vhost in `Host`. `Origin` and
/// `Referer` are made to name the vhost.
pub fn apply_host_binding(req: &mut Request, nav: &Request) {
    let Some(host) = nav.headers.get(HEADER_HOST).map(str::to_string) else {
        return;
    };
    let nav_hostname = nav.url.host_str().unwrap_or_default().to_string();
    let nav_host = host_and_port(&nav.url);
    let req_host = host_and_port(&req.url);

    if nav_hostname != host && req_host == host {
        if let Ok(url) = urls::with_hostname(&req.url, &nav_hostname) {
            req.url = url;
        }
        req.headers.insert(HEADER_HOST, host.clone());
    } else if nav_hostname != host && req_host == nav_host {
        req.headers.insert(HEADER_HOST, host.clone());
    }

    if let Some(origin) = req.headers.get(HEADER_ORIGIN).map(|o| o.replacen(&nav_host, &host, 1)) {
        req.headers.insert(HEADER_ORIGIN, origin);
    }
    let referer = match req.headers.get(HEADER_REFERER) {
        Some(referer) => referer.replacen(&nav_host, &host, 1),
        None => nav.url.as_str().replacen(&nav_host, &host, 1),
    };
    req.headers.insert(HEADER_REFERER, referer);
}

impl TabShared {
    pub(super) async fn intercept_request(&self, paused: PausedRequest) {
        let id = paused.request_id.clone();
        if let Err(e) = self.classify_paused(paused).await {
            debug!("Intercepted request {id} not resolved: {e}");
        }
    }

    async fn classify_paused(&self, paused: PausedRequest) -> Result<()> {
        self.remember_user_agent(&paused.headers);

        let url = match urls::resolve_url(&paused.url, &self.nav.url) {
            Ok(url) => url,
            Err(e) => {
                debug!("Intercepted URL {} not parsed: {e}", paused.url);
                return self
                    .driver
                    .continue_request(&paused.request_id, RequestOverride::default())
                    .await;
            }
        };
        let mut req = Request::new(&paused.method, url)
            .with_headers(paused.headers.clone())
            .with_post_data(paused.post_data.clone().unwrap_or_default());

        if matches_keyword(req.url.as_str(), &self.config.ignore_keywords) {
            debug!("Blocked by ignore keyword: {}", req.url);
            self.add_result_request(req, Source::Xhr);
            return self
                .driver
                .fail_request(&paused.request_id, FailReason::BlockedByClient)
                .await;
        }

        apply_host_binding(&mut req, &self.nav);

        if urls::is_static_suffix(&req.url) {
            let loads = self.count_static_load(req.url.path());
            self.add_result_request(req, Source::StaticResource);
            return if loads <= self.config.static_request_threshold {
                self.driver
                    .continue_request(&paused.request_id, RequestOverride::default())
                    .await
            } else {
                self.driver
                    .fail_request(&paused.request_id, FailReason::BlockedByClient)
                    .await
            };
        }

        if let Some(network_id) = paused.network_id.as_deref() {
            if self.is_navigation_network(network_id) {
                self.lock_state().nav_network_id = network_id.to_string();
                if let Err(e) = self.handle_navigation(&req, &paused).await {
                    debug!("Navigation request {}: {e}", req.url);
                }
                self.add_result_request(req, Source::Navigation);
                return Ok(());
            }
        }

        self.add_result_request(req, Source::Xhr);
        self.driver
            .continue_request(&paused.request_id, RequestOverride::default())
            .await
    }

    async fn handle_navigation(&self, req: &Request, paused: &PausedRequest) -> Result<()> {
        let id = paused.request_id.as_str();
        let (top_frame, found_redirection, nav_redirected) = {
            let state = self.lock_state();
            (
                !state.top_frame_id.is_empty() && state.top_frame_id == paused.frame_id,
                state.found_redirection,
                state.nav_redirected,
            )
        };
        let url_override = RequestOverride {
            url: Some(req.url.to_string()),
            ..Default::default()
        };

        if found_redirection && top_frame {
            debug!("Holding redirected navigation: {}", req.url);
            let fulfilled = self
                .driver
                .fulfill_request(id, 200, Vec::new(), Some(PLACEHOLDER_BODY.as_bytes().to_vec()))
                .await;
            let mut redirected = self.nav.clone();
            redirected.redirection_flag = true;
            self.lock_state().nav_redirected = true;
            self.add_result_request(redirected, Source::Navigation);
            return fulfilled;
        }

        if nav_redirected && top_frame {
            self.lock_state().nav_redirected = false;
            debug!("Replaying redirected navigation: {}", req.url);
            return match self.replay.replay(req, Some(REPLAY_RANGE)).await {
                Ok(response) => {
                    self.driver
                        .fulfill_request(id, 200, response.headers_without_location(), Some(response.body))
                        .await
                }
                Err(e) => {
                    debug!("Replay of {} failed: {e}", req.url);
                    self.driver
                        .fail_request(id, FailReason::ConnectionAborted)
                        .await
                }
            };
        }

        if top_frame && navigation_url(&req.url) == navigation_url(&self.nav.url) {
            debug!("Main navigation: {}", self.nav.url);
            let mut overrides = url_override;
            if matches!(self.nav.method.as_str(), "POST" | "PUT") {
                overrides.post_data = Some(self.nav.post_data.clone());
            }
            overrides.method = Some(self.nav.method.clone());
            overrides.headers = Some(merge_headers(&self.nav.headers, &req.headers));
            return self.continue_bounded(id, overrides).await;
        }

        if !top_frame {
            return self.continue_bounded(id, url_override).await;
        }

        debug!("Front-end navigation answered with 204: {}", req.url);
        self.driver.fulfill_request(id, 204, Vec::new(), None).await
    }

    async fn continue_bounded(&self, id: &str, overrides: RequestOverride) -> Result<()> {
        match tokio::time::timeout(CONTINUE_TIMEOUT, self.driver.continue_request(id, overrides))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(AriadneError::Timeout(CONTINUE_TIMEOUT.as_millis() as u64)),
        }
    }

    /// Scans a script, HTML or JSON response for URL literals
    pub(super) async fn parse_response_urls(&self, request_id: String, url: String) {
        let body = match self.driver.response_body(&request_id).await {
            Ok(body) => body,
            Err(e) => {
                debug!("Response body of {url} unavailable: {e}");
                return;
            }
        };
        let text = String::from_utf8_lossy(&body);
        let found = suspect_urls(&text);
        debug!("{url} find url num: {}", found.len());
        for raw in found {
            self.add_result_url("GET", &raw, Source::JavaScript);
        }
    }

    pub(super) fn detect_response_charset(&self, headers: &Headers) {
        if let Some(content_type) = headers.get("Content-Type") {
            if content_type.contains("charset") {
                self.lock_state().page_charset = charset_from_content_type(content_type);
            }
        }
    }

    pub(super) fn handle_redirection_response(&self, headers_text: Option<&str>) {
        let status = headers_text.map_or(0, status_from_headers_text);
        if (300..400).contains(&status) {
            debug!("Navigation answered with {status}, holding the redirect");
            self.lock_state().found_redirection = true;
        }
    }

    pub(super) async fn handle_auth_required(&self, request_id: String) {
        debug!("Auth required, answering with placeholder credentials");
        if let Err(e) = self
            .driver
            .continue_with_auth(&request_id, AUTH_USERNAME, AUTH_PASSWORD)
            .await
        {
            debug!("Auth continue failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn request(url: &str) -> Request {
        Request::new("GET", Url::parse(url).expect("valid url"))
    }

    #[test]
    fn test_suspect_urls_strip_quotes_and_content_types() {
        let body = r#"var a = "/api/user/list"; var b = 'https://cdn.example.com/x.js';
            var t = "text/html"; var c = "login.php?next=1"; fetch("application/json");"#;
        let urls = suspect_urls(body);
        assert!(urls.contains(&"/api/user/list".to_string()));
        assert!(urls.contains(&"https://cdn.example.com/x.js".to_string()));
        assert!(urls.contains(&"login.php?next=1".to_string()));
        assert!(!urls.iter().any(|u| u == "text/html" || u == "application/json"));
    }

    #[test]
    fn test_status_line() {
        assert_eq!(status_from_headers_text("HTTP/1.1 302 Found\r\nLocation: /x\r\n"), 302);
        assert_eq!(status_from_headers_text("HTTP/1.1 200 OK"), 200);
        assert_eq!(status_from_headers_text("HTTP/2 200"), 0);
        assert_eq!(status_from_headers_text(""), 0);
    }

    #[test]
    fn test_charset() {
        assert_eq!(charset_from_content_type("text/html; charset=gbk"), "GBK");
        assert_eq!(charset_from_content_type("text/html;charset=UTF-8 "), "UTF-8");
        assert_eq!(charset_from_content_type("text/html"), "");
    }

    #[test]
    fn test_merge_headers_prefers_page_values() {
        let nav: Headers = [("Cookie", "a=1"), ("User-Agent", "nav")].into_iter().collect();
        let page: Headers = [("user-agent", "page")].into_iter().collect();
        let merged = merge_headers(&nav, &page);
        assert_eq!(
            merged,
            vec![
                ("Cookie".to_string(), "a=1".to_string()),
                ("user-agent".to_string(), "page".to_string()),
            ]
        );
    }

    #[test]
    fn test_host_binding_rewrites_vhost_requests() {
        let mut nav = request("http://10.0.0.5/index.php");
        nav.headers.insert("Host", "www.example.com");

        let mut req = request("http://www.example.com/api/list?p=1");
        apply_host_binding(&mut req, &nav);
        assert_eq!(req.url.as_str(), "http://10.0.0.5/api/list?p=1");
        assert_eq!(req.headers.get("Host"), Some("www.example.com"));
        assert_eq!(req.headers.get("Referer"), Some("http://www.example.com/index.php"));
    }

    #[test]
    fn test_host_binding_tags_connect_address_requests() {
        let mut nav = request("http://10.0.0.5/");
        nav.headers.insert("Host", "www.example.com");

        let mut req = request("http://10.0.0.5/static/app.js");
        req.headers.insert("Origin", "http://10.0.0.5");
        req.headers.insert("Referer", "http://10.0.0.5/");
        apply_host_binding(&mut req, &nav);
        assert_eq!(req.url.host_str(), Some("10.0.0.5"));
        assert_eq!(req.headers.get("Host"), Some("www.example.com"));
        assert_eq!(req.headers.get("Origin"), Some("http://www.example.com"));
        assert_eq!(req.headers.get("Referer"), Some("http://www.example.com/"));
    }

    #[test]
    fn test_host_binding_without_host_header_is_noop() {
        let nav = request("http://example.com/");
        let mut req = request("http://other.com/a");
        apply_host_binding(&mut req, &nav);
        assert!(req.headers.is_empty());
        assert_eq!(req.url.as_str(), "http://other.com/a");
    }
}
