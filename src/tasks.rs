//! Distributed task source
//!
//! A task source hands out `{id, url}` seeds and stores per-request results
//! under `taskID:requestID` keys with a time-to-live. The file backed source
//! reads a JSON object mapping ids to URLs and appends results as JSON lines.

use crate::error::{AriadneError, Result};
use crate::http::HttpClient;
use crate::models::Request;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Time-to-live attached to stored results
pub const RESULT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
/// Timeout for the HTML fetch that accompanies a result
pub const RESULT_FETCH_TIMEOUT: Duration = Duration::from_secs(1);

/// One seed handed out by a task source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub url: String,
}

/// Parses `{"<task id>": "<url>", ...}`; tasks come back ordered by id
pub fn parse_task_map(json: &str) -> Result<Vec<Task>> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| AriadneError::TaskSourceError(format!("task map is not valid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| AriadneError::TaskSourceError("task map must be a JSON object".into()))?;

    let mut tasks = obj
        .iter()
        .map(|(id, url)| {
            let url = url.as_str().ok_or_else(|| {
                AriadneError::TaskSourceError(format!("task {id} must map to a URL string"))
            })?;
            Ok(Task {
                id: id.clone(),
                url: url.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(tasks)
}

/// Key under which a request's result is stored
pub fn result_key(task_id: &str, req: &Request) -> String {
    format!("{}:{}", task_id, req.unique_id())
}

/// `{"url": ..., "html": ...}` for one accepted request. The HTML is fetched
/// out of band when a client is given; failures leave it empty.
pub async fn build_result(req: &Request, client: Option<&HttpClient>) -> serde_json::Value {
    let html = match client {
        Some(client) => match client.replay(req, None).await {
            Ok(response) => response.text(),
            Err(e) => {
                debug!("Result fetch for {} failed: {e}", req.simple_format());
                String::new()
            }
        },
        None => String::new(),
    };
    serde_json::json!({
        "url": req.url.as_str(),
        "html": html,
    })
}

/// Source of distributed crawl tasks and store for their results
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn tasks(&self) -> Result<Vec<Task>>;
    async fn put_result(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    /// Flushes pending results
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct StoredResult<'a> {
    key: &'a str,
    value: &'a serde_json::Value,
    ttl_secs: u64,
}

/// Reads tasks from a JSON map file and appends results to a JSONL file
pub struct FileTaskSource {
    task_path: PathBuf,
    result_path: PathBuf,
    ttl: Duration,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileTaskSource {
    pub fn new(task_path: &Path, result_path: &Path) -> Self {
        Self {
            task_path: task_path.to_path_buf(),
            result_path: result_path.to_path_buf(),
            ttl: RESULT_TTL,
            writer: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn result_path(&self) -> &Path {
        &self.result_path
    }
}

#[async_trait]
impl TaskSource for FileTaskSource {
    async fn tasks(&self) -> Result<Vec<Task>> {
        let content = tokio::fs::read_to_string(&self.task_path).await.map_err(|e| {
            AriadneError::TaskSourceError(format!("{}: {e}", self.task_path.display()))
        })?;
        let tasks = parse_task_map(&content)?;
        info!("Loaded {} tasks from {}", tasks.len(), self.task_path.display());
        Ok(tasks)
    }

    async fn put_result(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let line = serde_json::to_string(&StoredResult {
            key,
            value,
            ttl_secs: self.ttl.as_secs(),
        })?;
        let mut guard = self.writer.lock().await;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.result_path)?;
            *guard = Some(BufWriter::new(file));
        }
        if let Some(writer) = guard.as_mut() {
            writeln!(writer, "{}", line)?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.flush()?;
            info!("Task results saved to {}", self.result_path.display());
        }
        Ok(())
    }
}
