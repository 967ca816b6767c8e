//! Replays accepted requests through a downstream proxy (typically a
//! passive scanner) once the crawl is complete.

use crate::error::Result;
use crate::http::HttpClient;
use crate::models::Request;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Per-request timeout when pushing
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a push run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushStats {
    pub sent: usize,
    pub failed: usize,
}

/// Sends every request through `proxy` with at most `pool_max` in flight
pub async fn push_requests(requests: &[Request], proxy: &str, pool_max: usize) -> Result<PushStats> {
    let client = HttpClient::new(Some(proxy), PUSH_TIMEOUT)?;
    let semaphore = Arc::new(Semaphore::new(pool_max.max(1)));
    let sent = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(requests.len());
    for req in requests.iter().cloned() {
        let sem = Arc::clone(&semaphore);
        let client = client.clone();
        let sent = Arc::clone(&sent);
        let failed = Arc::clone(&failed);

        handles.push(tokio::spawn(async move {
            let _permit = match sem.acquire().await {
                Ok(p) => p,
                Err(_) => return,
            };
            match client.send(&req).await {
                Ok(status) => {
                    debug!("Pushed {} -> {}", req.simple_format(), status);
                    sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    debug!("Push of {} failed: {e}", req.simple_format());
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    let stats = PushStats {
        sent: sent.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
    };
    info!(
        "Pushed {} requests to {} ({} failed)",
        stats.sent, proxy, stats.failed
    );
    Ok(stats)
}
