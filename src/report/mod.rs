//! Result sinks and crawl summaries
//!
//! Every sink receives requests one at a time through [`ResultSink::save`]
//! and is flushed by [`ResultSink::close`] once the crawl has drained.

pub mod domains;
pub mod json;
pub mod jsonl;
pub mod push;

use crate::error::Result;
use crate::models::{Headers, Request};
use serde::{Deserialize, Serialize};

pub use domains::DomainSink;
pub use json::CrawlSummary;
pub use jsonl::RequestSink;

/// File names written into the output directory
pub const REQ_RESULT_FILE: &str = "req_result.json";
pub const ALL_REQ_RESULT_FILE: &str = "all_req_result.json";
pub const ALL_DOMAIN_FILE: &str = "all_domain.txt";
pub const SUB_DOMAIN_FILE: &str = "sub_domain.txt";
pub const SUMMARY_FILE: &str = "crawl_result.json";

/// Serialised form of a request in every output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub data: String,
    pub source: String,
}

impl From<&Request> for RequestInfo {
    fn from(req: &Request) -> Self {
        Self {
            url: req.url.to_string(),
            method: req.method.clone(),
            headers: req.headers.clone(),
            data: req.post_data.clone(),
            source: req.source.as_str().to_string(),
        }
    }
}

/// Destination for crawl results
pub trait ResultSink: Send + Sync {
    fn save(&self, req: &Request) -> Result<()>;
    fn close(&self) -> Result<()>;
}
