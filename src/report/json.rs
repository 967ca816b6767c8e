//! JSON crawl summary

use super::RequestInfo;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Everything a crawl produced, written once at the end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub crawl_id: String,
    pub targets: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tabs_started: u64,
    pub tab_timeouts: u64,
    pub req_list: Vec<RequestInfo>,
    pub all_req_list: Vec<RequestInfo>,
    pub all_domain_list: Vec<String>,
    pub sub_domain_list: Vec<String>,
}

impl CrawlSummary {
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Exports the summary as a pretty-printed JSON file
pub fn export(summary: &CrawlSummary, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(output_path, json)?;
    info!("Crawl summary saved to {}", output_path.display());
    Ok(())
}

/// Loads a summary written by [`export`]
pub fn load(input_path: &Path) -> Result<CrawlSummary> {
    let content = std::fs::read_to_string(input_path)?;
    let summary: CrawlSummary = serde_json::from_str(&content)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Headers;

    #[test]
    fn test_export_and_load() {
        let started_at = Utc::now();
        let summary = CrawlSummary {
            crawl_id: "c1".into(),
            targets: vec!["http://example.com/".into()],
            started_at,
            finished_at: started_at + chrono::Duration::milliseconds(2500),
            tabs_started: 3,
            tab_timeouts: 1,
            req_list: vec![RequestInfo {
                url: "http://example.com/".into(),
                method: "GET".into(),
                headers: Headers::new(),
                data: String::new(),
                source: "Target".into(),
            }],
            all_req_list: Vec::new(),
            all_domain_list: vec!["example.com".into()],
            sub_domain_list: vec!["example.com".into()],
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("crawl_result.json");
        export(&summary, &path).expect("export");
        let loaded = load(&path).expect("load");
        assert_eq!(loaded.crawl_id, "c1");
        assert_eq!(loaded.req_list, summary.req_list);
        assert!((loaded.duration_secs() - 2.5).abs() < 1e-9);
    }
}
