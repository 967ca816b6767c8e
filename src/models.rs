//! Core data models for the crawler

use crate::filter::{FilterMarks, FilterMode};
use crate::pool::ScaleWeights;
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const HEADER_HOST: &str = "Host";
pub const HEADER_COOKIE: &str = "Cookie";
pub const HEADER_REFERER: &str = "Referer";
pub const HEADER_ORIGIN: &str = "Origin";
pub const HEADER_USER_AGENT: &str = "User-Agent";

/// Text typed into form fields when no custom value matches
pub const DEFAULT_INPUT_TEXT: &str = "Ariadne";

/// How a request was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Target,
    Navigation,
    #[serde(rename = "XHR")]
    Xhr,
    #[serde(rename = "DOM")]
    Dom,
    JavaScript,
    Comment,
    Form,
    StaticResource,
    OpenWindow,
    #[serde(rename = "HistoryAPI")]
    HistoryApi,
    HashChange,
    WebSocket,
    EventSource,
    Fetch,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Target => "Target",
            Source::Navigation => "Navigation",
            Source::Xhr => "XHR",
            Source::Dom => "DOM",
            Source::JavaScript => "JavaScript",
            Source::Comment => "Comment",
            Source::Form => "Form",
            Source::StaticResource => "StaticResource",
            Source::OpenWindow => "OpenWindow",
            Source::HistoryApi => "HistoryAPI",
            Source::HashChange => "HashChange",
            Source::WebSocket => "WebSocket",
            Source::EventSource => "EventSource",
            Source::Fetch => "Fetch",
        }
    }

    /// Maps the source tag reported by the page-side hooks. Unknown tags are DOM links.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "Target" => Source::Target,
            "Navigation" => Source::Navigation,
            "XHR" => Source::Xhr,
            "JavaScript" => Source::JavaScript,
            "Comment" => Source::Comment,
            "Form" => Source::Form,
            "StaticResource" => Source::StaticResource,
            "OpenWindow" => Source::OpenWindow,
            "HistoryAPI" => Source::HistoryApi,
            "HashChange" => Source::HashChange,
            "WebSocket" => Source::WebSocket,
            "EventSource" => Source::EventSource,
            "Fetch" => Source::Fetch,
            _ => Source::Dom,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header map with case-insensitive keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets a header, replacing any existing value in place
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.0.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds headers from a JSON object, stringifying non-string values
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut headers = Headers::new();
        if let Some(obj) = value.as_object() {
            for (key, val) in obj {
                let text = match val {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                headers.insert(key.clone(), text);
            }
        }
        headers
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.0.clone()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let map = BTreeMap::<String, String>::deserialize(deserializer)?;
        Ok(map.into_iter().collect())
    }
}

/// An HTTP request discovered while crawling
#[derive(Debug, Clone)]
pub struct Request {
    /// Upper-case HTTP method
    pub method: String,
    /// Fully resolved URL
    pub url: Url,
    pub headers: Headers,
    pub post_data: String,
    pub source: Source,
    /// Distributed task this request belongs to
    pub task_id: Option<String>,
    pub depth: u32,
    pub is_phone_device: bool,
    /// Set once a server-side redirect was captured for this navigation
    pub redirection_flag: bool,
    /// Filter marks, computed on first filter check
    pub filter: Option<FilterMarks>,
}

impl Request {
    pub fn new(method: impl AsRef<str>, url: Url) -> Self {
        Self {
            method: method.as_ref().to_uppercase(),
            url,
            headers: Headers::new(),
            post_data: String::new(),
            source: Source::Target,
            task_id: None,
            depth: 0,
            is_phone_device: false,
            redirection_flag: false,
            filter: None,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_post_data(mut self, data: impl Into<String>) -> Self {
        self.post_data = data.into();
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    /// Identity of the request ignoring headers
    pub fn no_header_id(&self) -> String {
        sha256_hex(&format!("{}{}{}", self.method, self.url, self.post_data))
    }

    /// Identity used for exact deduplication and result keys
    pub fn unique_id(&self) -> String {
        if self.redirection_flag {
            sha256_hex(&format!("{}Redirection", self.no_header_id()))
        } else {
            self.no_header_id()
        }
    }

    /// One-line `METHOD URL` form used in logs
    pub fn simple_format(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    pub fn is_get_like(&self) -> bool {
        matches!(self.method.as_str(), "GET" | "HEAD" | "DELETE" | "OPTIONS")
    }
}

pub(crate) fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Configuration for one crawl task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Seed URLs (must share one host)
    pub targets: Vec<String>,
    /// Body sent to the seeds; switches them to POST
    #[serde(default)]
    pub post_data: Option<String>,
    /// Maximum number of tabs scheduled in this crawl
    pub max_crawl_count: usize,
    /// Maximum number of concurrently open tabs
    pub max_tab_count: usize,
    /// Maximum crawl depth (0 = unlimited)
    #[serde(default)]
    pub max_depth: u32,
    pub filter_mode: FilterMode,
    /// Occurrences of one signature allowed before it is filtered
    #[serde(default = "default_repeat_threshold")]
    pub repeat_threshold: usize,
    /// Headers added to every request
    #[serde(default)]
    pub extra_headers: Headers,
    pub incognito: bool,
    pub headless: bool,
    #[serde(default)]
    pub chromium_path: Option<String>,
    pub tab_run_timeout_ms: u64,
    pub dom_ready_timeout_ms: u64,
    pub before_exit_delay_ms: u64,
    pub event_trigger_interval_ms: u64,
    #[serde(default)]
    pub encode_url_with_charset: bool,
    /// Requests whose URL contains any of these are blocked and never crawled
    pub ignore_keywords: Vec<String>,
    /// Form fill values keyed by input type
    #[serde(default)]
    pub custom_form_values: HashMap<String, String>,
    /// Form fill values keyed by a fragment of the input name
    #[serde(default)]
    pub custom_form_keyword_values: HashMap<String, String>,
    /// Proxy for the browser and out-of-band requests
    #[serde(default)]
    pub proxy: Option<String>,
    /// Proxy every accepted request is replayed through after the crawl
    #[serde(default)]
    pub push_to_proxy: Option<String>,
    pub push_pool_max: usize,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    pub collect_all_domains: bool,
    pub collect_sub_domains: bool,
    /// Also crawl the other scheme of a single seed
    pub dual_scheme: bool,
    /// Loads of one static resource allowed through per tab
    pub static_request_threshold: usize,
    pub auto_scale: bool,
    pub scale_weights: ScaleWeights,
    pub scale_interval_secs: u64,
    /// JSON file mapping task ids to seed URLs
    #[serde(default)]
    pub task_file: Option<PathBuf>,
    /// Capture page HTML for distributed results
    #[serde(default)]
    pub save_html: bool,
}

fn default_repeat_threshold() -> usize {
    1
}

impl CrawlConfig {
    pub fn tab_run_timeout(&self) -> Duration {
        Duration::from_millis(self.tab_run_timeout_ms)
    }

    pub fn dom_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.dom_ready_timeout_ms)
    }

    pub fn before_exit_delay(&self) -> Duration {
        Duration::from_millis(self.before_exit_delay_ms)
    }

    pub fn scale_interval(&self) -> Duration {
        Duration::from_secs(self.scale_interval_secs.max(1))
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            post_data: None,
            max_crawl_count: 200,
            max_tab_count: 8,
            max_depth: 0,
            filter_mode: FilterMode::Smart,
            repeat_threshold: 1,
            extra_headers: Headers::new(),
            incognito: true,
            headless: true,
            chromium_path: None,
            tab_run_timeout_ms: 20_000,
            dom_ready_timeout_ms: 5_000,
            before_exit_delay_ms: 1_000,
            event_trigger_interval_ms: 100,
            encode_url_with_charset: false,
            ignore_keywords: vec!["logout".to_string(), "quit".to_string(), "exit".to_string()],
            custom_form_values: HashMap::new(),
            custom_form_keyword_values: HashMap::new(),
            proxy: None,
            push_to_proxy: None,
            push_pool_max: 10,
            output_dir: None,
            collect_all_domains: true,
            collect_sub_domains: true,
            dual_scheme: true,
            static_request_threshold: 3,
            auto_scale: false,
            scale_weights: ScaleWeights::default(),
            scale_interval_secs: 10,
            task_file: None,
            save_html: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("valid url")
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");
        headers.insert("content-type", "application/json");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(headers.remove("Content-type").as_deref(), Some("application/json"));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_headers_keep_order() {
        let headers: Headers = [("B", "2"), ("A", "1"), ("C", "3")].into_iter().collect();
        let keys: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["B", "A", "C"]);
        let json = serde_json::to_string(&headers).expect("serialize");
        assert_eq!(json, r#"{"B":"2","A":"1","C":"3"}"#);
    }

    #[test]
    fn test_clone_is_deep() {
        let mut req = Request::new("get", url("http://www.example.com/"));
        req.headers.insert("test", "test");
        let mut copy = req.clone();
        assert_eq!(copy.headers.get("test"), Some("test"));
        copy.headers.insert("test", "changed");
        copy.url.set_path("/other");
        assert_eq!(req.headers.get("test"), Some("test"));
        assert_eq!(req.url.path(), "/");
    }

    #[test]
    fn test_unique_id_ignores_headers_and_tracks_redirection() {
        let a = Request::new("GET", url("http://example.com/a?x=1"));
        let mut b = a.clone();
        b.headers.insert("Cookie", "s=1");
        assert_eq!(a.unique_id(), b.unique_id());
        b.redirection_flag = true;
        assert_ne!(a.unique_id(), b.unique_id());
        let c = Request::new("POST", url("http://example.com/a?x=1"));
        assert_ne!(a.unique_id(), c.unique_id());
    }

    #[test]
    fn test_source_tags() {
        assert_eq!(Source::from_tag("HistoryAPI"), Source::HistoryApi);
        assert_eq!(Source::from_tag("anything"), Source::Dom);
        assert_eq!(
            serde_json::to_string(&Source::Xhr).expect("serialize"),
            "\"XHR\""
        );
        assert_eq!(Source::JavaScript.to_string(), "JavaScript");
    }
}
