//! Configuration management for Ariadne

use crate::error::{AriadneError, Result};
use crate::filter::FilterMode;
use crate::models::{CrawlConfig, Headers};
use crate::pool::ScaleWeights;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Keys accepted by `--custom-form-values`
pub const ALLOWED_FORM_NAMES: &[&str] = &[
    "default", "mail", "code", "phone", "username", "password", "qq", "id_card", "url", "date",
    "number",
];

/// File-based configuration structure, every section optional
#[derive(Debug, Deserialize)]
struct FileConfig {
    crawl: Option<CrawlSection>,
    browser: Option<BrowserSection>,
    filter: Option<FilterSection>,
    output: Option<OutputSection>,
    scaling: Option<ScalingSection>,
}

#[derive(Debug, Deserialize)]
struct CrawlSection {
    max_crawl_count: Option<usize>,
    max_tab_count: Option<usize>,
    max_depth: Option<u32>,
    tab_run_timeout_ms: Option<u64>,
    dom_ready_timeout_ms: Option<u64>,
    before_exit_delay_ms: Option<u64>,
    event_trigger_interval_ms: Option<u64>,
    ignore_keywords: Option<Vec<String>>,
    extra_headers: Option<HashMap<String, String>>,
    custom_form_values: Option<HashMap<String, String>>,
    custom_form_keyword_values: Option<HashMap<String, String>>,
    dual_scheme: Option<bool>,
    static_request_threshold: Option<usize>,
    encode_url_with_charset: Option<bool>,
    task_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct BrowserSection {
    chromium_path: Option<String>,
    headless: Option<bool>,
    incognito: Option<bool>,
    proxy: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FilterSection {
    mode: Option<String>,
    repeat_threshold: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct OutputSection {
    dir: Option<PathBuf>,
    collect_all_domains: Option<bool>,
    collect_sub_domains: Option<bool>,
    push_to_proxy: Option<String>,
    push_pool_max: Option<usize>,
    save_html: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ScalingSection {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    cpu_weight: Option<f64>,
    mem_weight: Option<f64>,
    tab_ttl_weight: Option<f64>,
}

/// Loads configuration from a TOML file and merges with defaults
pub fn load_config(path: &Path) -> Result<CrawlConfig> {
    let content = std::fs::read_to_string(path).map_err(AriadneError::IoError)?;
    parse_config(&content)
}

/// Parses TOML configuration text over the defaults
pub fn parse_config(content: &str) -> Result<CrawlConfig> {
    let file_config: FileConfig = toml::from_str(content)?;
    let mut config = CrawlConfig::default();

    if let Some(crawl) = file_config.crawl {
        if let Some(count) = crawl.max_crawl_count {
            config.max_crawl_count = count;
        }
        if let Some(tabs) = crawl.max_tab_count {
            config.max_tab_count = tabs;
        }
        if let Some(depth) = crawl.max_depth {
            config.max_depth = depth;
        }
        if let Some(ms) = crawl.tab_run_timeout_ms {
            config.tab_run_timeout_ms = ms;
        }
        if let Some(ms) = crawl.dom_ready_timeout_ms {
            config.dom_ready_timeout_ms = ms;
        }
        if let Some(ms) = crawl.before_exit_delay_ms {
            config.before_exit_delay_ms = ms;
        }
        if let Some(ms) = crawl.event_trigger_interval_ms {
            config.event_trigger_interval_ms = ms;
        }
        if let Some(keywords) = crawl.ignore_keywords {
            config.ignore_keywords = keywords;
        }
        if let Some(headers) = crawl.extra_headers {
            config.extra_headers = headers.into_iter().collect();
        }
        if let Some(values) = crawl.custom_form_values {
            check_form_names(values.keys())?;
            config.custom_form_values = values;
        }
        if let Some(values) = crawl.custom_form_keyword_values {
            config.custom_form_keyword_values = values;
        }
        if let Some(dual) = crawl.dual_scheme {
            config.dual_scheme = dual;
        }
        if let Some(threshold) = crawl.static_request_threshold {
            config.static_request_threshold = threshold;
        }
        if let Some(encode) = crawl.encode_url_with_charset {
            config.encode_url_with_charset = encode;
        }
        config.task_file = crawl.task_file;
    }

    if let Some(browser) = file_config.browser {
        config.chromium_path = browser.chromium_path;
        config.proxy = browser.proxy;
        if let Some(headless) = browser.headless {
            config.headless = headless;
        }
        if let Some(incognito) = browser.incognito {
            config.incognito = incognito;
        }
    }

    if let Some(filter) = file_config.filter {
        if let Some(mode) = filter.mode {
            config.filter_mode = mode.parse()?;
        }
        if let Some(threshold) = filter.repeat_threshold {
            config.repeat_threshold = threshold;
        }
    }

    if let Some(output) = file_config.output {
        config.output_dir = output.dir;
        config.push_to_proxy = output.push_to_proxy;
        if let Some(all) = output.collect_all_domains {
            config.collect_all_domains = all;
        }
        if let Some(sub) = output.collect_sub_domains {
            config.collect_sub_domains = sub;
        }
        if let Some(max) = output.push_pool_max {
            config.push_pool_max = max;
        }
        if let Some(save) = output.save_html {
            config.save_html = save;
        }
    }

    if let Some(scaling) = file_config.scaling {
        if let Some(enabled) = scaling.enabled {
            config.auto_scale = enabled;
        }
        if let Some(secs) = scaling.interval_secs {
            config.scale_interval_secs = secs;
        }
        let defaults = ScaleWeights::default();
        config.scale_weights = ScaleWeights::new(
            scaling.cpu_weight.unwrap_or(defaults.cpu),
            scaling.mem_weight.unwrap_or(defaults.mem),
            scaling.tab_ttl_weight.unwrap_or(defaults.tab_ttl),
        )?;
    }

    Ok(config)
}

/// Command-line values that override the file configuration
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub targets: Vec<String>,
    pub post_data: Option<String>,
    pub max_crawl_count: Option<usize>,
    pub max_tab_count: Option<usize>,
    pub max_depth: Option<u32>,
    pub filter_mode: Option<String>,
    pub repeat_threshold: Option<usize>,
    pub custom_headers: Option<String>,
    pub chromium_path: Option<String>,
    pub no_headless: bool,
    pub tab_run_timeout_secs: Option<u64>,
    pub dom_ready_timeout_secs: Option<u64>,
    pub event_trigger_interval_ms: Option<u64>,
    pub before_exit_delay_ms: Option<u64>,
    pub ignore_keywords: Option<Vec<String>>,
    pub form_values: Option<Vec<String>>,
    pub form_keyword_values: Option<Vec<String>>,
    pub proxy: Option<String>,
    pub push_to_proxy: Option<String>,
    pub push_pool_max: Option<usize>,
    pub output_dir: Option<PathBuf>,
    pub no_dual_scheme: bool,
    pub encode_url_with_charset: bool,
    pub auto_scale: bool,
    pub scale_weights: Option<String>,
    pub task_file: Option<PathBuf>,
    pub save_html: bool,
}

/// Merges CLI arguments into an existing CrawlConfig, validating as it goes
pub fn merge_cli_args(config: &mut CrawlConfig, cli: CliOverrides) -> Result<()> {
    if !cli.targets.is_empty() {
        config.targets = cli.targets;
    }
    if cli.post_data.is_some() {
        config.post_data = cli.post_data;
    }
    if let Some(count) = cli.max_crawl_count {
        config.max_crawl_count = count;
    }
    if let Some(tabs) = cli.max_tab_count {
        config.max_tab_count = tabs;
    }
    if let Some(depth) = cli.max_depth {
        config.max_depth = depth;
    }
    if let Some(mode) = cli.filter_mode {
        config.filter_mode = mode.parse::<FilterMode>()?;
    }
    if let Some(threshold) = cli.repeat_threshold {
        config.repeat_threshold = threshold;
    }
    if let Some(json) = cli.custom_headers {
        config.extra_headers = parse_custom_headers(&json)?;
    }
    if cli.chromium_path.is_some() {
        config.chromium_path = cli.chromium_path;
    }
    if cli.no_headless {
        config.headless = false;
    }
    if let Some(secs) = cli.tab_run_timeout_secs {
        config.tab_run_timeout_ms = secs * 1000;
    }
    if let Some(secs) = cli.dom_ready_timeout_secs {
        config.dom_ready_timeout_ms = secs * 1000;
    }
    if let Some(ms) = cli.event_trigger_interval_ms {
        config.event_trigger_interval_ms = ms;
    }
    if let Some(ms) = cli.before_exit_delay_ms {
        config.before_exit_delay_ms = ms;
    }
    if let Some(keywords) = cli.ignore_keywords {
        config.ignore_keywords = keywords;
    }
    if let Some(items) = cli.form_values {
        config.custom_form_values = parse_form_values(&items)?;
    }
    if let Some(items) = cli.form_keyword_values {
        config.custom_form_keyword_values = parse_form_keyword_values(&items)?;
    }
    if cli.proxy.is_some() {
        config.proxy = cli.proxy;
    }
    if cli.push_to_proxy.is_some() {
        config.push_to_proxy = cli.push_to_proxy;
    }
    if let Some(max) = cli.push_pool_max {
        config.push_pool_max = max;
    }
    if cli.output_dir.is_some() {
        config.output_dir = cli.output_dir;
    }
    if cli.no_dual_scheme {
        config.dual_scheme = false;
    }
    if cli.encode_url_with_charset {
        config.encode_url_with_charset = true;
    }
    if cli.auto_scale {
        config.auto_scale = true;
    }
    if let Some(json) = cli.scale_weights {
        config.scale_weights = ScaleWeights::from_json(&json)?;
    }
    if cli.task_file.is_some() {
        config.task_file = cli.task_file;
    }
    if cli.save_html {
        config.save_html = true;
    }
    Ok(())
}

/// Parses a JSON object of header names to string values
pub fn parse_custom_headers(json: &str) -> Result<Headers> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| AriadneError::ConfigError(format!("custom headers are not valid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| AriadneError::ConfigError("custom headers must be a JSON object".into()))?;
    let mut headers = Headers::new();
    for (key, val) in obj {
        let text = val.as_str().ok_or_else(|| {
            AriadneError::ConfigError(format!("custom header {key} must be a string"))
        })?;
        headers.insert(key.clone(), text);
    }
    Ok(headers)
}

fn split_pairs(items: &[String]) -> Result<HashMap<String, String>> {
    let mut values = HashMap::new();
    for item in items {
        let (key, value) = item.split_once('=').ok_or_else(|| {
            AriadneError::ConfigError(format!("invalid form value {item:?}, expected key=value"))
        })?;
        values.insert(key.trim().to_string(), value.to_string());
    }
    Ok(values)
}

fn check_form_names<'a>(keys: impl Iterator<Item = &'a String>) -> Result<()> {
    for key in keys {
        if !ALLOWED_FORM_NAMES.contains(&key.as_str()) {
            return Err(AriadneError::ConfigError(format!(
                "form value key {key:?} is not one of {}",
                ALLOWED_FORM_NAMES.join(", ")
            )));
        }
    }
    Ok(())
}

/// Parses `type=value` pairs for filling inputs by their type
pub fn parse_form_values(items: &[String]) -> Result<HashMap<String, String>> {
    let values = split_pairs(items)?;
    check_form_names(values.keys())?;
    Ok(values)
}

/// Parses `keyword=value` pairs for filling inputs whose name contains the keyword
pub fn parse_form_keyword_values(items: &[String]) -> Result<HashMap<String, String>> {
    split_pairs(items)
}

/// Startup validation of a fully merged configuration
pub fn validate(config: &CrawlConfig) -> Result<()> {
    if config.targets.is_empty() && config.task_file.is_none() {
        return Err(AriadneError::ConfigError("no targets given".into()));
    }
    if config.max_tab_count == 0 {
        return Err(AriadneError::ConfigError("max tab count must be at least 1".into()));
    }
    if config.tab_run_timeout_ms == 0 || config.dom_ready_timeout_ms == 0 {
        return Err(AriadneError::ConfigError("timeouts must be positive".into()));
    }
    Ok(())
}
