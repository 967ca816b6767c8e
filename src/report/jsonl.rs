//! JSON Lines request sink: one [`RequestInfo`] object per line

use super::{RequestInfo, ResultSink};
use crate::error::{AriadneError, Result};
use crate::models::Request;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

/// Appends requests to a JSONL file that must not exist beforehand
pub struct RequestSink {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
    saved: Mutex<usize>,
}

impl RequestSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    AriadneError::SinkError(format!("{} already exists", path.display()))
                }
                _ => AriadneError::IoError(e),
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(Some(BufWriter::new(file))),
            saved: Mutex::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines written so far
    pub fn saved(&self) -> usize {
        *self.saved.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ResultSink for RequestSink {
    fn save(&self, req: &Request) -> Result<()> {
        let line = serde_json::to_string(&RequestInfo::from(req))?;
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let writer = guard
            .as_mut()
            .ok_or_else(|| AriadneError::SinkError(format!("{} is closed", self.path.display())))?;
        writeln!(writer, "{}", line)?;
        *self.saved.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut writer) = guard.take() {
            writer.flush()?;
            info!("Saved {} requests to {}", self.saved(), self.path.display());
        }
        Ok(())
    }
}

/// Reads back a JSONL request file
pub fn load(path: &Path) -> Result<Vec<RequestInfo>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(AriadneError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn request(url: &str) -> Request {
        Request::new("GET", Url::parse(url).expect("url"))
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("req.json");
        let sink = RequestSink::create(&path).expect("sink");
        sink.save(&request("http://example.com/a")).expect("save");
        sink.save(&request("http://example.com/b?x=1")).expect("save");
        assert_eq!(sink.saved(), 2);
        sink.close().expect("close");
        sink.close().expect("second close is a no-op");

        let lines = load(&path).expect("load");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].url, "http://example.com/b?x=1");
        assert_eq!(lines[1].source, "Target");
    }

    #[test]
    fn test_existing_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("req.json");
        std::fs::write(&path, "").expect("write");
        assert!(matches!(
            RequestSink::create(&path),
            Err(AriadneError::SinkError(_))
        ));
    }

    #[test]
    fn test_save_after_close_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = RequestSink::create(&dir.path().join("req.json")).expect("sink");
        sink.close().expect("close");
        assert!(sink.save(&request("http://example.com/")).is_err());
    }
}
