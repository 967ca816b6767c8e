//! URL helpers shared by the tab engine, filters and sinks

use crate::error::{AriadneError, Result};
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

/// Extensions treated as static resources
pub const STATIC_SUFFIXES: &[&str] = &[
    "png", "gif", "jpg", "mp4", "mp3", "mng", "pct", "bmp", "jpeg", "pst", "psp", "ttf", "tif",
    "tiff", "ai", "drw", "wma", "ogg", "wav", "ra", "aac", "mid", "au", "aiff", "dxf", "eps", "ps",
    "svg", "3gp", "asf", "asx", "avi", "mov", "mpg", "qt", "rm", "wmv", "m4a", "bin", "xls", "xlsx",
    "ppt", "pptx", "doc", "docx", "odt", "ods", "odg", "odp", "exe", "zip", "rar", "tar", "gz",
    "iso", "rss", "pdf", "txt", "dll", "ico", "gz2", "apk", "crt", "woff", "map", "woff2", "webp",
    "less", "dmg", "bz2", "otf", "swf", "flv", "mpeg", "dat", "xsl", "csv", "cab", "exif", "wps",
    "m4v", "rmvb",
];

/// Server-side script extensions
pub const SCRIPT_SUFFIXES: &[&str] = &["php", "asp", "jsp", "asa"];

static STATIC_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| STATIC_SUFFIXES.iter().copied().collect());

/// Two-level public suffixes recognised by `root_domain`
const SECOND_LEVEL_SUFFIXES: &[&str] = &[
    "com.cn", "net.cn", "org.cn", "gov.cn", "edu.cn", "ac.cn", "com.hk", "com.tw", "co.uk",
    "org.uk", "ac.uk", "gov.uk", "co.jp", "ne.jp", "or.jp", "co.kr", "com.au", "net.au", "org.au",
    "co.nz", "com.br", "com.sg", "co.in", "co.za", "com.mx",
];

const UNSUPPORTED_SCHEMES: &[&str] = &["javascript:", "mailto:", "tel:", "data:", "about:"];

/// Resolves a raw reference found in a page against the page URL
pub fn resolve_url(raw: &str, base: &Url) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AriadneError::UnsupportedUrl(String::new()));
    }
    let lower = raw.to_ascii_lowercase();
    if UNSUPPORTED_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return Err(AriadneError::UnsupportedUrl(raw.to_string()));
    }
    let resolved = base.join(raw)?;
    match resolved.scheme() {
        "http" | "https" => Ok(resolved),
        other => Err(AriadneError::UnsupportedUrl(format!("{other}: {raw}"))),
    }
}

/// Lower-case extension of the last path segment, if any
pub fn file_ext(url: &Url) -> Option<String> {
    let last = url.path().rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn is_static_suffix(url: &Url) -> bool {
    file_ext(url).is_some_and(|ext| STATIC_SET.contains(ext.as_str()))
}

/// Path of the parent directory, with a trailing slash
pub fn parent_path(url: &Url) -> String {
    let path = url.path();
    if path == "/" {
        return String::new();
    }
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    match trimmed.rfind('/') {
        Some(idx) => trimmed[..=idx].to_string(),
        None => "/".to_string(),
    }
}

/// URL without its fragment, as compared against intercepted requests
pub fn navigation_url(url: &Url) -> String {
    let mut copy = url.clone();
    copy.set_fragment(None);
    copy.to_string()
}

/// Host with the default port appended when the URL carries none
pub fn host_with_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// `host[:port]` exactly as written in the URL
pub fn host_and_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Registrable domain of a hostname (`a.b.example.co.uk` -> `example.co.uk`)
pub fn root_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() {
        return host;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    let last_two = labels[labels.len() - 2..].join(".");
    let keep = if SECOND_LEVEL_SUFFIXES.contains(&last_two.as_str()) {
        3
    } else {
        2
    };
    labels[labels.len().saturating_sub(keep)..].join(".")
}

/// Replaces the hostname of a URL, keeping scheme, port, path and query
pub fn with_hostname(url: &Url, hostname: &str) -> Result<Url> {
    let mut copy = url.clone();
    copy.set_host(Some(hostname))?;
    Ok(copy)
}
