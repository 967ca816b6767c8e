//! Signature based request deduplication

use super::mark::{self, CUSTOM_VALUE, CUSTOM_VALUE_MARK, FIX_PARAM_REPEAT_MARK, FIX_PATH_MARK};
use super::{FilterMode, SimpleFilter};
use crate::models::Request;
use crate::urls;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

/// Marks derived from a request once and cached on it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterMarks {
    pub marked_path: String,
    /// Marked parameter name to marked value
    pub marked_query: BTreeMap<String, String>,
    pub marked_post: String,
    pub marked_fragment: String,
    /// Marked parameter name to the raw decoded value
    raw_query: BTreeMap<String, String>,
    /// Sorted parameter names, used to group requests of the same shape
    query_keys_id: String,
}

impl FilterMarks {
    pub fn compute(req: &Request, strict: bool) -> Self {
        let (marked_query, raw_query) = mark_query(req.url.query().unwrap_or_default(), strict);
        let query_keys_id = format!(
            "{}{}{}{}",
            req.url.host_str().unwrap_or_default(),
            req.url.path(),
            req.method,
            marked_query.keys().cloned().collect::<Vec<_>>().join(",")
        );
        let marked_post = if req.is_get_like() {
            String::new()
        } else {
            mark_body(req, strict)
        };
        Self {
            marked_path: mark::mark_path(req.url.path()),
            marked_query,
            marked_post,
            marked_fragment: mark_fragment(req.url.fragment().unwrap_or_default(), strict),
            raw_query,
            query_keys_id,
        }
    }
}

/// Equivalence class of a request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterSignature {
    pub method: String,
    pub host: String,
    pub marked_path: String,
    pub marked_query: String,
    pub marked_fragment: String,
    pub marked_post: String,
    pub redirected: bool,
    pub https_root: bool,
}

/// Per-crawl statistics, grown monotonically
#[derive(Debug, Default)]
struct FilterState {
    signatures: HashMap<FilterSignature, usize>,
    /// host+path+method+param slots that once carried the form token
    custom_locations: HashSet<String>,
    key_set_repeats: HashMap<String, usize>,
    key_set_values: HashMap<String, HashSet<String>>,
    path_key_values: HashMap<String, HashSet<String>>,
    path_key_symbols: HashMap<String, usize>,
    path_empty_keys: HashMap<String, HashSet<String>>,
    parent_children: HashMap<String, HashSet<String>>,
}

/// Concurrent smart filter shared by all tabs of a crawl
#[derive(Debug)]
pub struct SmartFilter {
    mode: FilterMode,
    simple: SimpleFilter,
    repeat_threshold: usize,
    state: Mutex<FilterState>,
}

impl SmartFilter {
    pub fn new(mode: FilterMode, host_limit: Option<String>, repeat_threshold: usize) -> Self {
        Self {
            mode,
            simple: SimpleFilter::new(host_limit, mode == FilterMode::Strict),
            repeat_threshold: repeat_threshold.max(1),
            state: Mutex::new(FilterState::default()),
        }
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    /// Returns true when the request belongs to an already crawled class
    pub fn do_filter(&self, req: &mut Request) -> bool {
        if self.mode == FilterMode::Simple {
            return self.simple.do_filter(req);
        }
        if self.simple.domain_filter(req) {
            debug!("Out of scope: {}", req.url);
            return true;
        }
        if SimpleFilter::static_filter(req) {
            return true;
        }

        let strict = self.mode == FilterMode::Strict;
        if req.filter.is_none() {
            req.filter = Some(FilterMarks::compute(req, strict));
        }
        let Some(marks) = req.filter.as_ref() else {
            return false;
        };

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.record(req, marks);
        let signature = state.signature(req, marks, strict);
        let count = state.signatures.entry(signature).or_insert(0);
        *count += 1;
        *count > self.repeat_threshold
    }

    /// Signature of a request under the statistics gathered so far
    pub fn signature(&self, req: &mut Request) -> FilterSignature {
        let strict = self.mode == FilterMode::Strict;
        if req.filter.is_none() {
            req.filter = Some(FilterMarks::compute(req, strict));
        }
        let marks = req.filter.clone().unwrap_or_default();
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.signature(req, &marks, strict)
    }
}

impl FilterState {
    fn record(&mut self, req: &Request, marks: &FilterMarks) {
        let host_path = format!("{}{}", req.url.host_str().unwrap_or_default(), req.url.path());
        let location = format!("{}{}", host_path, req.method);

        for (key, raw) in &marks.raw_query {
            if raw.contains(CUSTOM_VALUE) {
                self.custom_locations.insert(format!("{location}{key}"));
            }
        }

        if req.is_get_like() && !marks.raw_query.is_empty() {
            *self
                .key_set_repeats
                .entry(marks.query_keys_id.clone())
                .or_insert(0) += 1;
            for (key, raw) in &marks.raw_query {
                self.key_set_values
                    .entry(format!("{}{}", marks.query_keys_id, key))
                    .or_default()
                    .insert(raw.clone());
                self.path_key_values
                    .entry(format!("{host_path}{key}"))
                    .or_default()
                    .insert(raw.clone());
                if raw.is_empty() {
                    self.path_empty_keys
                        .entry(host_path.clone())
                        .or_default()
                        .insert(key.clone());
                }
                if marks.marked_query.get(key).map(String::as_str) == Some(mark::MIX_SYMBOL_MARK) {
                    *self
                        .path_key_symbols
                        .entry(format!("{host_path}{key}"))
                        .or_insert(0) += 1;
                }
            }
        }

        let parent = urls::parent_path(&req.url);
        if !parent.is_empty() {
            if let Some(child) = req.url.path().trim_end_matches('/').rsplit('/').next() {
                self.parent_children
                    .entry(format!("{}{}", req.url.host_str().unwrap_or_default(), parent))
                    .or_default()
                    .insert(child.to_string());
            }
        }
    }

    fn signature(&self, req: &Request, marks: &FilterMarks, strict: bool) -> FilterSignature {
        let host_path = format!("{}{}", req.url.host_str().unwrap_or_default(), req.url.path());
        let location = format!("{}{}", host_path, req.method);
        let mut query = marks.marked_query.clone();

        for (key, value) in query.iter_mut() {
            if self.custom_locations.contains(&format!("{location}{key}")) {
                *value = CUSTOM_VALUE_MARK.to_string();
            }
        }

        if self
            .key_set_repeats
            .get(&marks.query_keys_id)
            .is_some_and(|n| *n > mark::MAX_PARAM_KEY_SINGLE_COUNT)
        {
            for (key, value) in query.iter_mut() {
                let distinct = self
                    .key_set_values
                    .get(&format!("{}{}", marks.query_keys_id, key))
                    .map_or(0, HashSet::len);
                if distinct > 3 {
                    *value = FIX_PARAM_REPEAT_MARK.to_string();
                }
            }
        }

        for (key, value) in query.iter_mut() {
            let slot = format!("{host_path}{key}");
            let distinct = self.path_key_values.get(&slot).map_or(0, HashSet::len);
            let symbols = self.path_key_symbols.get(&slot).copied().unwrap_or(0);
            if distinct > mark::MAX_PARAM_KEY_ALL_COUNT
                || symbols > mark::MAX_PATH_PARAM_KEY_SYMBOL_COUNT
            {
                *value = FIX_PARAM_REPEAT_MARK.to_string();
            }
        }

        if self
            .path_empty_keys
            .get(&host_path)
            .is_some_and(|keys| keys.len() > mark::MAX_PATH_PARAM_EMPTY_COUNT)
        {
            let empty: Vec<String> = marks
                .raw_query
                .iter()
                .filter(|(_, raw)| raw.is_empty())
                .map(|(k, _)| k.clone())
                .collect();
            for key in empty {
                query.remove(&key);
                query.insert(FIX_PARAM_REPEAT_MARK.to_string(), String::new());
            }
        }

        let mut marked_path = marks.marked_path.clone();
        let parent = urls::parent_path(&req.url);
        if !parent.is_empty()
            && self
                .parent_children
                .get(&format!("{}{}", req.url.host_str().unwrap_or_default(), parent))
                .is_some_and(|children| children.len() > mark::MAX_PARENT_PATH_COUNT)
        {
            marked_path = format!("{}{}", mark::mark_path(&parent), FIX_PATH_MARK);
        }

        let host = if strict {
            urls::host_with_port(&req.url)
        } else {
            urls::host_and_port(&req.url)
        };

        FilterSignature {
            method: req.method.clone(),
            host,
            marked_path,
            marked_query: join_marks(&query),
            marked_fragment: marks.marked_fragment.clone(),
            marked_post: marks.marked_post.clone(),
            redirected: req.redirection_flag,
            https_root: req.url.scheme() == "https"
                && req.url.path() == "/"
                && req.url.query().is_none(),
        }
    }
}

fn join_marks(marks: &BTreeMap<String, String>) -> String {
    marks
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Marks a raw query string. Returns marked pairs and raw values, both keyed by marked name.
fn mark_query(raw: &str, strict: bool) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let mut marked = BTreeMap::new();
    let mut values = BTreeMap::new();
    if raw.is_empty() {
        return (marked, values);
    }
    // A bare `?token` query is a value without a name
    if !raw.contains('=') && !raw.contains('&') {
        let decoded: String = url::form_urlencoded::parse(raw.as_bytes())
            .map(|(k, _)| k.into_owned())
            .collect();
        marked.insert(String::new(), mark::mark_param_value(&decoded, strict));
        values.insert(String::new(), decoded);
        return (marked, values);
    }
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        let name = mark::mark_param_name(&key);
        marked.insert(name.clone(), mark::mark_param_value(&value, strict));
        values.insert(name, value.into_owned());
    }
    (marked, values)
}

fn mark_body(req: &Request, strict: bool) -> String {
    let body = req.post_data.trim();
    if body.is_empty() {
        return String::new();
    }
    let is_json = req
        .headers
        .get("Content-Type")
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
        || body.starts_with('{')
        || body.starts_with('[');
    if is_json {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            return mark::mark_json_value(&value, strict);
        }
    }
    let (marked, _) = mark_query(body, strict);
    join_marks(&marked)
}

/// Marks a URL fragment. Plain in-page anchors do not change the signature.
pub fn mark_fragment(fragment: &str, strict: bool) -> String {
    if fragment.is_empty() {
        return String::new();
    }
    let (path_part, query_part) = match fragment.split_once('?') {
        Some((path, query)) => (path, query),
        None if fragment.contains('=') && !fragment.contains('/') => ("", fragment),
        None => (fragment, ""),
    };
    if query_part.is_empty() && !path_part.contains('/') {
        return String::new();
    }
    let marked_path = mark::mark_path(path_part);
    let (marked_query, _) = mark_query(query_part, strict);
    if marked_query.is_empty() {
        marked_path
    } else {
        format!("{}?{}", marked_path, join_marks(&marked_query))
    }
}
