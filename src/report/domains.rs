//! Plain-text domain lists: every host seen, and the in-scope sub-domains

use super::ResultSink;
use crate::error::{AriadneError, Result};
use crate::models::Request;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

struct DomainState {
    writer: Option<BufWriter<File>>,
    seen: HashSet<String>,
    ordered: Vec<String>,
}

/// Writes each distinct hostname once. With a root domain only hosts
/// under that domain are kept.
pub struct DomainSink {
    path: PathBuf,
    root: Option<String>,
    state: Mutex<DomainState>,
}

impl DomainSink {
    /// Sink for every hostname seen
    pub fn all(path: &Path) -> Result<Self> {
        Self::create(path, None)
    }

    /// Sink for hostnames equal to or ending in `.root`
    pub fn sub_domains(path: &Path, root: &str) -> Result<Self> {
        Self::create(path, Some(root.trim_start_matches('.').to_ascii_lowercase()))
    }

    fn create(path: &Path, root: Option<String>) -> Result<Self> {
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
            root,
            state: Mutex::new(DomainState {
                writer: Some(BufWriter::new(file)),
                seen: HashSet::new(),
                ordered: Vec::new(),
            }),
        })
    }

    fn in_scope(&self, host: &str) -> bool {
        match &self.root {
            None => true,
            Some(root) => host == root || host.ends_with(&format!(".{root}")),
        }
    }

    /// Hostnames recorded so far, in discovery order
    pub fn domains(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ordered
            .clone()
    }
}

impl ResultSink for DomainSink {
    fn save(&self, req: &Request) -> Result<()> {
        let Some(host) = req.url.host_str() else {
            return Ok(());
        };
        let host = host.to_ascii_lowercase();
        if !self.in_scope(&host) {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.seen.insert(host.clone()) {
            return Ok(());
        }
        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| AriadneError::SinkError(format!("{} is closed", self.path.display())))?;
        writeln!(writer, "{}", host)?;
        state.ordered.push(host);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut writer) = state.writer.take() {
            writer.flush()?;
            info!("Saved {} domains to {}", state.ordered.len(), self.path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn request(url: &str) -> Request {
        Request::new("GET", Url::parse(url).expect("url"))
    }

    #[test]
    fn test_all_domains_dedup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("all_domain.txt");
        let sink = DomainSink::all(&path).expect("sink");
        for url in [
            "http://a.example.com/",
            "https://a.example.com/x",
            "http://cdn.other.net/lib.js",
        ] {
            sink.save(&request(url)).expect("save");
        }
        sink.close().expect("close");
        let content = std::fs::read_to_string(&path).expect("read");
        assert_eq!(content, "a.example.com\ncdn.other.net\n");
    }

    #[test]
    fn test_sub_domains_keep_root_suffix_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = DomainSink::sub_domains(&dir.path().join("sub.txt"), "example.com")
            .expect("sink");
        for url in [
            "http://example.com/",
            "http://api.example.com/v1",
            "http://notexample.com/",
            "http://example.com.evil.net/",
        ] {
            sink.save(&request(url)).expect("save");
        }
        assert_eq!(sink.domains(), vec!["example.com", "api.example.com"]);
    }
}
