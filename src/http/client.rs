//! HTTP client wrapper for requests issued outside the browser

use crate::error::{AriadneError, Result};
use crate::models::Request;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Range cap applied when replaying a redirected navigation
pub const REPLAY_RANGE: &str = "bytes=0-1048576";

/// Status, headers and body of an out-of-band response
#[derive(Debug, Clone, Default)]
pub struct ReplayResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ReplayResponse {
    /// Response headers with `Location` removed
    pub fn headers_without_location(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case("location"))
            .cloned()
            .collect()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Client that never follows redirects and counts what it sends
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    request_count: Arc<AtomicU64>,
}

impl HttpClient {
    /// Creates a client routed through `proxy` when given
    pub fn new(proxy: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true);

        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| AriadneError::ConfigError(format!("Invalid proxy URL: {e}")))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            client: builder.build()?,
            request_count: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Re-issues a captured request, optionally with a `Range` header
    pub async fn replay(&self, req: &Request, range: Option<&str>) -> Result<ReplayResponse> {
        let response = self.build(req, range).send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await?.to_vec();
        debug!("Replayed {} -> {}", req.simple_format(), status);
        Ok(ReplayResponse {
            status,
            headers,
            body,
        })
    }

    /// Sends a request and discards the body
    pub async fn send(&self, req: &Request) -> Result<u16> {
        let response = self.build(req, None).send().await?;
        Ok(response.status().as_u16())
    }

    /// Returns the total number of requests made
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn build(&self, req: &Request, range: Option<&str>) -> reqwest::RequestBuilder {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let method =
            reqwest::Method::from_bytes(req.method.as_bytes()).unwrap_or(reqwest::Method::GET);
        let mut builder = self.client.request(method, req.url.clone());
        for (key, value) in req.headers.iter() {
            if key.eq_ignore_ascii_case("range") && range.is_some() {
                continue;
            }
            builder = builder.header(key, value);
        }
        if let Some(range) = range {
            builder = builder.header("Range", range);
        }
        if !req.post_data.is_empty() {
            builder = builder.body(req.post_data.clone());
        }
        builder
    }
}
