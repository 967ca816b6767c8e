//! Seed requests built from the configured targets

use crate::error::{AriadneError, Result};
use crate::models::{CrawlConfig, Request, Source};
use tracing::debug;
use url::Url;

/// Builds the seed requests for a crawl.
///
/// Seeds are POST when post data is configured and carry the extra
/// headers. A single seed also gets a mirror on the other scheme when
/// dual-scheme probing is on.
pub fn make_targets(config: &CrawlConfig, task_id: Option<&str>) -> Result<Vec<Request>> {
    let mut targets = Vec::with_capacity(config.targets.len() + 1);
    for raw in &config.targets {
        let url = Url::parse(raw.trim())
            .map_err(|e| AriadneError::ConfigError(format!("invalid target {raw:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(AriadneError::UnsupportedUrl(raw.clone()));
        }
        targets.push(seed(config, url, task_id));
    }

    if config.dual_scheme && targets.len() == 1 {
        let mut mirror = targets[0].url.clone();
        let other = if mirror.scheme() == "https" { "http" } else { "https" };
        if mirror.set_scheme(other).is_ok() {
            // a non-default port only serves one scheme
            if mirror.port().is_some() {
                debug!("Not mirroring {} with explicit port", targets[0].url);
            } else {
                targets.push(seed(config, mirror, task_id));
            }
        }
    }
    Ok(targets)
}

fn seed(config: &CrawlConfig, url: Url, task_id: Option<&str>) -> Request {
    let method = if config.post_data.is_some() { "POST" } else { "GET" };
    let mut req = Request::new(method, url)
        .with_headers(config.extra_headers.clone())
        .with_source(Source::Target);
    if let Some(ref data) = config.post_data {
        req.post_data = data.clone();
        if !req.headers.contains("Content-Type") {
            req.headers
                .insert("Content-Type", "application/x-www-form-urlencoded");
        }
    }
    req.task_id = task_id.map(str::to_string);
    req
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(targets: &[&str]) -> CrawlConfig {
        CrawlConfig {
            targets: targets.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_target_gets_scheme_mirror() {
        let targets = make_targets(&config(&["http://example.com/index.php"]), None).expect("targets");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].url.as_str(), "http://example.com/index.php");
        assert_eq!(targets[1].url.as_str(), "https://example.com/index.php");
        assert!(targets.iter().all(|t| t.source == Source::Target && t.method == "GET"));
    }

    #[test]
    fn test_mirror_disabled_or_multiple_targets() {
        let mut cfg = config(&["https://example.com/"]);
        cfg.dual_scheme = false;
        assert_eq!(make_targets(&cfg, None).expect("targets").len(), 1);

        let cfg = config(&["http://example.com/a", "http://example.com/b"]);
        assert_eq!(make_targets(&cfg, None).expect("targets").len(), 2);

        let cfg = config(&["http://example.com:8080/"]);
        assert_eq!(make_targets(&cfg, None).expect("targets").len(), 1);
    }

    #[test]
    fn test_post_seed_with_headers_and_task() {
        let mut cfg = config(&["http://example.com/login"]);
        cfg.post_data = Some("user=a".into());
        cfg.extra_headers.insert("Cookie", "sid=1");
        let targets = make_targets(&cfg, Some("job-7")).expect("targets");
        let first = &targets[0];
        assert_eq!(first.method, "POST");
        assert_eq!(first.post_data, "user=a");
        assert_eq!(first.headers.get("cookie"), Some("sid=1"));
        assert_eq!(
            first.headers.get("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(first.task_id.as_deref(), Some("job-7"));
    }

    #[test]
    fn test_invalid_targets() {
        assert!(make_targets(&config(&["not a url"]), None).is_err());
        assert!(matches!(
            make_targets(&config(&["ftp://example.com/"]), None),
            Err(AriadneError::UnsupportedUrl(_))
        ));
    }
}
