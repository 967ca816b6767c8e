//! Request deduplication filters
//!
//! `SimpleFilter` drops exact duplicates, off-scope hosts and static
//! resources. `SmartFilter` additionally generalises volatile path and
//! parameter values so that requests which only differ in page numbers,
//! session tokens and similar noise collapse to one representative.

pub mod mark;
pub mod smart;

use crate::error::{AriadneError, Result};
use crate::models::Request;
use crate::urls;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

pub use smart::{FilterMarks, FilterSignature, SmartFilter};

/// Deduplication policy selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Exact duplicates only
    Simple,
    /// Signature based equivalence
    Smart,
    /// Smart, with exact host:port scope and extra value classes
    Strict,
}

impl FromStr for FilterMode {
    type Err = AriadneError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(FilterMode::Simple),
            "smart" => Ok(FilterMode::Smart),
            "strict" => Ok(FilterMode::Strict),
            other => Err(AriadneError::ConfigError(format!(
                "invalid filter mode {other:?}, expected simple, smart or strict"
            ))),
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterMode::Simple => "simple",
            FilterMode::Smart => "smart",
            FilterMode::Strict => "strict",
        };
        f.write_str(name)
    }
}

/// Exact-match filter with host scope and static resource rejection
#[derive(Debug, Default)]
pub struct SimpleFilter {
    host_limit: Option<String>,
    strict_host: bool,
    seen: Mutex<HashSet<String>>,
}

impl SimpleFilter {
    /// `host_limit` is a hostname, or `host:port` when `strict_host` is set
    pub fn new(host_limit: Option<String>, strict_host: bool) -> Self {
        Self {
            host_limit: host_limit.map(|h| normalize_host_limit(&h, strict_host)),
            strict_host,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Returns true when the request should be dropped
    pub fn do_filter(&self, req: &Request) -> bool {
        if self.domain_filter(req) {
            return true;
        }
        if self.unique_filter(req) {
            return true;
        }
        Self::static_filter(req)
    }

    /// True if this exact request was already seen; records it otherwise
    pub fn unique_filter(&self, req: &Request) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        !seen.insert(req.unique_id())
    }

    /// True if the request is outside the crawl scope
    pub fn domain_filter(&self, req: &Request) -> bool {
        let Some(limit) = self.host_limit.as_deref() else {
            return false;
        };
        if self.strict_host {
            urls::host_with_port(&req.url) != limit
        } else {
            req.url.host_str().unwrap_or_default() != limit
        }
    }

    pub fn static_filter(req: &Request) -> bool {
        urls::is_static_suffix(&req.url)
    }

    pub fn host_limit(&self) -> Option<&str> {
        self.host_limit.as_deref()
    }
}

/// A scope given as a URL becomes its hostname, or `host:port` with the
/// scheme's default port when strict, so `http://a.com` and `a.com:80` compare equal
fn normalize_host_limit(raw: &str, strict: bool) -> String {
    let raw = raw.trim().to_ascii_lowercase();
    match url::Url::parse(&raw) {
        Ok(url) if url.host_str().is_some() && raw.contains("://") => {
            if strict {
                urls::host_with_port(&url)
            } else {
                url.host_str().unwrap_or_default().to_string()
            }
        }
        _ => raw,
    }
}

/// Normalised `host:port` scope for a seed in strict mode
pub fn strict_host_limit(url: &url::Url) -> String {
    urls::host_with_port(url)
}

/// True if the URL contains any of the keywords, case-insensitively
pub fn matches_keyword(url: &str, keywords: &[String]) -> bool {
    let lower = url.to_ascii_lowercase();
    keywords
        .iter()
        .filter(|k| !k.is_empty())
        .any(|k| lower.contains(&k.to_ascii_lowercase()))
}
