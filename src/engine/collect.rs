//! Link collection results and form handling

use crate::models::{CrawlConfig, DEFAULT_INPUT_TEXT};
use encoding_rs::Encoding;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use url::{form_urlencoded, Url};

/// Absolute URLs and script paths mentioned inside HTML comments
static COMMENT_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:https?:)?//[a-zA-Z0-9][a-zA-Z0-9.\-]*(?::\d+)?(?:[/?#][^\s"'<>]*)?|(?:\.{1,2})?/[a-zA-Z0-9_\-./]*[a-zA-Z0-9_\-]\.(?:php|asp|aspx|jsp|do|action|html?|json)(?:\?[^\s"'<>]*)?"#,
    )
    .expect("static regex")
});

/// Built-in form values keyed by input category
pub const DEFAULT_FORM_VALUES: &[(&str, &str)] = &[
    ("default", DEFAULT_INPUT_TEXT),
    ("mail", "ariadne@example.com"),
    ("code", "123a"),
    ("phone", "18812345678"),
    ("username", "ariadne"),
    ("password", "Ariadne6."),
    ("qq", "123456789"),
    ("id_card", "511702197409284963"),
    ("url", "https://www.example.com"),
    ("date", "2018-01-01"),
    ("number", "1"),
];

/// What the link collection script returns
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CollectedLinks {
    pub dom: Vec<String>,
    pub comments: Vec<String>,
    pub forms: Vec<FormData>,
}

/// A form as found in the DOM after filling
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FormData {
    pub action: String,
    pub method: String,
    pub enctype: String,
    pub fields: Vec<(String, String)>,
}

/// Method, URL and body a form submits
#[derive(Debug, Clone, PartialEq)]
pub struct FormSubmission {
    pub method: String,
    pub url: Url,
    pub post_data: String,
}

impl FormData {
    /// Builds the submission the browser would send. Only GET and
    /// urlencoded-compatible POST forms are produced.
    pub fn submission(&self, page: &Url) -> Option<FormSubmission> {
        let mut url = if self.action.trim().is_empty() {
            page.clone()
        } else {
            crate::urls::resolve_url(&self.action, page).ok()?
        };
        url.set_fragment(None);

        let mut encoder = form_urlencoded::Serializer::new(String::new());
        for (name, value) in &self.fields {
            encoder.append_pair(name, value);
        }
        let encoded = encoder.finish();

        if self.method.eq_ignore_ascii_case("POST") {
            Some(FormSubmission {
                method: "POST".to_string(),
                url,
                post_data: encoded,
            })
        } else {
            url.set_query(if encoded.is_empty() { None } else { Some(&encoded) });
            Some(FormSubmission {
                method: "GET".to_string(),
                url,
                post_data: String::new(),
            })
        }
    }
}

/// URLs mentioned in comment text, deduplicated in order
pub fn comment_urls(comments: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    comments
        .iter()
        .flat_map(|c| COMMENT_URL_RE.find_iter(c).map(|m| m.as_str().to_string()))
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

/// `{values, keywords}` passed to the form filling script
pub fn form_fill_config(config: &CrawlConfig) -> serde_json::Value {
    let mut values: BTreeMap<String, String> = DEFAULT_FORM_VALUES
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for (key, value) in &config.custom_form_values {
        values.insert(key.clone(), value.clone());
    }
    serde_json::json!({
        "values": values,
        "keywords": config.custom_form_keyword_values,
    })
}

/// Re-encodes non-ASCII query components in `charset`. Returns false when
/// the label is unknown or nothing changed.
pub fn encode_query_with_charset(url: &mut Url, charset: &str) -> bool {
    let Some(encoding) = Encoding::for_label(charset.trim().as_bytes()) else {
        return false;
    };
    if encoding == encoding_rs::UTF_8 {
        return false;
    }
    let Some(query) = url.query() else {
        return false;
    };

    let mut changed = false;
    let segments: Vec<String> = query
        .split('&')
        .map(|segment| {
            let Some((name, value)) = form_urlencoded::parse(segment.as_bytes()).next() else {
                return segment.to_string();
            };
            if name.is_ascii() && value.is_ascii() {
                return segment.to_string();
            }
            changed = true;
            let name = encode_component(&name, encoding);
            if segment.contains('=') {
                format!("{name}={}", encode_component(&value, encoding))
            } else {
                name
            }
        })
        .collect();

    if changed {
        url.set_query(Some(&segments.join("&")));
    }
    changed
}

fn encode_component(text: &str, encoding: &'static Encoding) -> String {
    let (bytes, _, _) = encoding.encode(text);
    form_urlencoded::byte_serialize(&bytes).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("valid url")
    }

    #[test]
    fn test_get_form_replaces_query() {
        let form = FormData {
            action: "search.php?old=1#top".into(),
            method: "get".into(),
            enctype: String::new(),
            fields: vec![("q".into(), "Ariadne".into()), ("page".into(), "1".into())],
        };
        let sub = form.submission(&url("http://example.com/a/index.php")).expect("form");
        assert_eq!(sub.method, "GET");
        assert_eq!(sub.url.as_str(), "http://example.com/a/search.php?q=Ariadne&page=1");
        assert!(sub.post_data.is_empty());
    }

    #[test]
    fn test_post_form_without_action_targets_page() {
        let form = FormData {
            action: String::new(),
            method: "POST".into(),
            enctype: "application/x-www-form-urlencoded".into(),
            fields: vec![("user".into(), "ariadne".into()), ("pass".into(), "Ariadne6.".into())],
        };
        let sub = form.submission(&url("http://example.com/login")).expect("form");
        assert_eq!(sub.method, "POST");
        assert_eq!(sub.url.as_str(), "http://example.com/login");
        assert_eq!(sub.post_data, "user=ariadne&pass=Ariadne6.");
    }

    #[test]
    fn test_javascript_action_is_skipped() {
        let form = FormData {
            action: "javascript:void(0)".into(),
            method: "GET".into(),
            ..Default::default()
        };
        assert!(form.submission(&url("http://example.com/")).is_none());
    }

    #[test]
    fn test_comment_urls() {
        let comments = vec![
            " <a href=\"/admin/login.php?x=1\">old</a> ".to_string(),
            "see http://dev.example.com/debug and /admin/login.php?x=1".to_string(),
            "plain text".to_string(),
        ];
        let found = comment_urls(&comments);
        assert_eq!(
            found,
            vec![
                "/admin/login.php?x=1".to_string(),
                "http://dev.example.com/debug".to_string(),
            ]
        );
    }

    #[test]
    fn test_form_fill_config_merges_custom_values() {
        let mut config = CrawlConfig::default();
        config.custom_form_values.insert("mail".into(), "me@example.com".into());
        config
            .custom_form_keyword_values
            .insert("captcha".into(), "0000".into());
        let value = form_fill_config(&config);
        assert_eq!(value["values"]["mail"], "me@example.com");
        assert_eq!(value["values"]["default"], "Ariadne");
        assert_eq!(value["keywords"]["captcha"], "0000");
    }

    #[test]
    fn test_encode_query_with_gbk() {
        let mut target = url("http://example.com/s?q=%E4%B8%AD%E6%96%87&page=1");
        assert!(encode_query_with_charset(&mut target, "GBK"));
        assert_eq!(target.query(), Some("q=%D6%D0%CE%C4&page=1"));

        let mut ascii = url("http://example.com/s?q=abc");
        assert!(!encode_query_with_charset(&mut ascii, "GBK"));
        assert!(!encode_query_with_charset(&mut target, "UTF-8"));
        assert!(!encode_query_with_charset(&mut target, "NOT-A-CHARSET"));
    }
}
