//! Value classification marks used to build filter signatures

use regex::Regex;
use std::sync::LazyLock;

pub const CUSTOM_VALUE_MARK: &str = "{{Ariadne}}";
pub const FIX_PARAM_REPEAT_MARK: &str = "{{fix_param}}";
pub const FIX_PATH_MARK: &str = "{{fix_path}}";
pub const TOO_LONG_MARK: &str = "{{long}}";
pub const NUMBER_MARK: &str = "{{number}}";
pub const CHINESE_MARK: &str = "{{chinese}}";
pub const UPPER_MARK: &str = "{{upper}}";
pub const URL_ENCODE_MARK: &str = "{{urlencode}}";
pub const UNICODE_MARK: &str = "{{unicode}}";
pub const BOOL_MARK: &str = "{{bool}}";
pub const LIST_MARK: &str = "{{list}}";
pub const TIME_MARK: &str = "{{time}}";
pub const MIX_ALPHA_NUM_MARK: &str = "{{mix_alpha_num}}";
pub const MIX_SYMBOL_MARK: &str = "{{mix_symbol}}";
pub const MIX_NUM_MARK: &str = "{{mix_num}}";
pub const NO_LOWER_MARK: &str = "{{no_lower}}";
pub const MIX_STRING_MARK: &str = "{{mix_str}}";

/// Token the crawler types into forms
pub const CUSTOM_VALUE: &str = "Ariadne";

pub const MAX_PARENT_PATH_COUNT: usize = 32;
pub const MAX_PARAM_KEY_SINGLE_COUNT: usize = 8;
pub const MAX_PARAM_KEY_ALL_COUNT: usize = 10;
pub const MAX_PATH_PARAM_EMPTY_COUNT: usize = 10;
pub const MAX_PATH_PARAM_KEY_SYMBOL_COUNT: usize = 5;

/// Values at or above this length collapse to the long mark
pub const LONG_VALUE_LEN: usize = 16;
/// Purely alphabetic values at or above this length are treated as long words
pub const LONG_WORD_LEN: usize = 6;
/// Path segments and parameter names at or above this length collapse to the long mark
pub const LONG_SEGMENT_LEN: usize = 32;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static regex")
}

static CHINESE_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"\p{Han}"));
static URL_ENCODE_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?:%[A-Fa-f0-9]{2})+"));
static UNICODE_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?:\\u\w{4})+"));
static ONLY_ALPHA_UPPER_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"^[A-Z]+$"));
static ALPHA_UPPER_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"[A-Z]+"));
static ALPHA_LOWER_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"[a-z]+"));
static SPECIAL_SYMBOL_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"[{}<>'"!$@#^&*()\[\]|\\;:,~`+=]"#));
static ONLY_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"^[0-9]+$"));
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"[0-9]+"));
static ONE_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"[0-9]"));
static ONLY_ALPHA_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"^[A-Za-z]+$"));
static ONLY_ALPHA_NUM_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"^[0-9a-zA-Z]+$"));
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"^(?:\d{4}[-/]\d{1,2}[-/]\d{1,2}(?:[ T]\d{1,2}:\d{1,2}(?::\d{1,2})?)?|\d{1,2}:\d{1,2}(?::\d{1,2})?)$")
});
static HTML_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)^(.+)\.(s?html?)$"));

/// Digits once `.`, `_` and `-` are removed; pagination indices like `-2` count
pub fn is_numeric_like(value: &str) -> bool {
    let stripped: String = value
        .chars()
        .filter(|c| !matches!(c, '.' | '_' | '-'))
        .collect();
    ONLY_NUMBER_RE.is_match(&stripped)
}

fn digit_count(value: &str) -> usize {
    ONE_NUMBER_RE.find_iter(value).count()
}

pub fn has_special_symbol(value: &str) -> bool {
    SPECIAL_SYMBOL_RE.is_match(value)
}

/// Marks one path segment
pub fn mark_path_segment(segment: &str) -> String {
    if segment.is_empty() {
        return String::new();
    }
    if segment.len() >= LONG_SEGMENT_LEN {
        return TOO_LONG_MARK.to_string();
    }
    if is_numeric_like(segment) {
        return NUMBER_MARK.to_string();
    }
    if let Some(caps) = HTML_RE.captures(segment) {
        let name = &caps[1];
        let ext = &caps[2];
        if is_numeric_like(name) {
            return format!("{NUMBER_MARK}.{ext}");
        }
        if digit_count(name) > 3 {
            return format!("{MIX_NUM_MARK}.{ext}");
        }
        return segment.to_string();
    }
    if has_special_symbol(segment) {
        return MIX_SYMBOL_MARK.to_string();
    }
    if CHINESE_RE.is_match(segment) {
        return CHINESE_MARK.to_string();
    }
    if UNICODE_RE.is_match(segment) {
        return UNICODE_MARK.to_string();
    }
    if ONLY_ALPHA_UPPER_RE.is_match(segment) {
        return UPPER_MARK.to_string();
    }
    if digit_count(segment) > 3 {
        return MIX_NUM_MARK.to_string();
    }
    segment.to_string()
}

/// Marks every segment of a URL path
pub fn mark_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return path.to_string();
    }
    path.split('/')
        .map(mark_path_segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// Marks a parameter name; most names are kept verbatim
pub fn mark_param_name(name: &str) -> String {
    if CHINESE_RE.is_match(name) {
        CHINESE_MARK.to_string()
    } else if URL_ENCODE_RE.is_match(name) {
        URL_ENCODE_MARK.to_string()
    } else if UNICODE_RE.is_match(name) {
        UNICODE_MARK.to_string()
    } else if name.len() >= LONG_SEGMENT_LEN {
        TOO_LONG_MARK.to_string()
    } else {
        name.to_string()
    }
}

/// Marks a string parameter value. Strict mode adds the no-lower and mixed classes.
pub fn mark_param_value(value: &str, strict: bool) -> String {
    if value.contains(CUSTOM_VALUE) {
        return CUSTOM_VALUE_MARK.to_string();
    }
    if ONLY_ALPHA_UPPER_RE.is_match(value) {
        return UPPER_MARK.to_string();
    }
    if value.chars().count() >= LONG_VALUE_LEN {
        return TOO_LONG_MARK.to_string();
    }
    if value.len() >= LONG_WORD_LEN && ONLY_ALPHA_RE.is_match(value) {
        return TOO_LONG_MARK.to_string();
    }
    if ONLY_NUMBER_RE.is_match(value) || is_numeric_like(value) {
        return NUMBER_MARK.to_string();
    }
    if CHINESE_RE.is_match(value) {
        return CHINESE_MARK.to_string();
    }
    if URL_ENCODE_RE.is_match(value) {
        return URL_ENCODE_MARK.to_string();
    }
    if UNICODE_RE.is_match(value) {
        return UNICODE_MARK.to_string();
    }
    if TIME_RE.is_match(value) {
        return TIME_MARK.to_string();
    }
    if ONLY_ALPHA_NUM_RE.is_match(value) && NUMBER_RE.is_match(value) {
        return MIX_ALPHA_NUM_MARK.to_string();
    }
    if has_special_symbol(value) {
        return MIX_SYMBOL_MARK.to_string();
    }
    if digit_count(value) >= 3 {
        return MIX_NUM_MARK.to_string();
    }
    if strict {
        if !ALPHA_LOWER_RE.is_match(value) && !value.is_empty() {
            return NO_LOWER_MARK.to_string();
        }
        let classes = [
            ALPHA_UPPER_RE.is_match(value),
            ALPHA_LOWER_RE.is_match(value),
            NUMBER_RE.is_match(value),
            has_special_symbol(value) || value.contains(['-', '_', '.']),
        ];
        if classes.iter().filter(|c| **c).count() >= 3 {
            return MIX_STRING_MARK.to_string();
        }
    }
    value.to_string()
}

/// Marks a JSON body value
pub fn mark_json_value(value: &serde_json::Value, strict: bool) -> String {
    match value {
        serde_json::Value::Bool(_) => BOOL_MARK.to_string(),
        serde_json::Value::Number(_) => NUMBER_MARK.to_string(),
        serde_json::Value::Array(_) => LIST_MARK.to_string(),
        serde_json::Value::String(s) => mark_param_value(s, strict),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Object(obj) => {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}={}", mark_param_name(k), mark_json_value(&obj[k], strict)))
                .collect();
            format!("{{{}}}", inner.join("&"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_segments_collapse() {
        assert_eq!(mark_path("/popular/page/-2"), mark_path("/popular/page/0"));
        assert_eq!(mark_path("/popular/page/-2"), "/popular/page/{{number}}");
        assert_eq!(mark_path("/v/1.2.3"), "/v/{{number}}");
    }

    #[test]
    fn test_path_segment_classes() {
        assert_eq!(mark_path_segment("2021.html"), "{{number}}.html");
        assert_eq!(mark_path_segment("news12345.shtml"), "{{mix_num}}.shtml");
        assert_eq!(mark_path_segment("about.html"), "about.html");
        assert_eq!(mark_path_segment("a;b"), MIX_SYMBOL_MARK);
        assert_eq!(mark_path_segment("新闻"), CHINESE_MARK);
        assert_eq!(mark_path_segment("ABOUT"), UPPER_MARK);
        assert_eq!(mark_path_segment("item12345"), MIX_NUM_MARK);
        assert_eq!(mark_path_segment(&"a".repeat(40)), TOO_LONG_MARK);
        assert_eq!(mark_path_segment("index.php"), "index.php");
    }

    #[test]
    fn test_param_value_classes() {
        assert_eq!(mark_param_value("Ariadne", false), CUSTOM_VALUE_MARK);
        assert_eq!(
            mark_param_value("AriadneAriadneAriadne", false),
            CUSTOM_VALUE_MARK
        );
        assert_eq!(mark_param_value("ABC", false), UPPER_MARK);
        assert_eq!(mark_param_value("0123456789abcdefxyz", false), TOO_LONG_MARK);
        assert_eq!(mark_param_value("42", false), NUMBER_MARK);
        assert_eq!(mark_param_value("-1.5", false), NUMBER_MARK);
        assert_eq!(mark_param_value("中文", false), CHINESE_MARK);
        assert_eq!(mark_param_value("%E4%B8%AD", false), URL_ENCODE_MARK);
        assert_eq!(mark_param_value("2021-01-02", false), NUMBER_MARK);
        assert_eq!(mark_param_value("2021/01/02", false), TIME_MARK);
        assert_eq!(mark_param_value("a1b2", false), MIX_ALPHA_NUM_MARK);
        assert_eq!(mark_param_value("a@b", false), MIX_SYMBOL_MARK);
        assert_eq!(mark_param_value("id-123", false), MIX_NUM_MARK);
        assert_eq!(mark_param_value("news", false), "news");
        assert_eq!(mark_param_value("Crawlergo", false), TOO_LONG_MARK);
        assert_eq!(mark_param_value("Scanner", false), TOO_LONG_MARK);
        assert_eq!(mark_param_value("sport", false), "sport");
    }

    #[test]
    fn test_strict_value_classes() {
        assert_eq!(mark_param_value("A-B", true), NO_LOWER_MARK);
        assert_eq!(mark_param_value("Ab-c", true), MIX_STRING_MARK);
        assert_eq!(mark_param_value("Ab-c", false), "Ab-c");
        assert_eq!(mark_param_value("news", true), "news");
    }

    #[test]
    fn test_param_names() {
        assert_eq!(mark_param_name("id"), "id");
        assert_eq!(mark_param_name("名字"), CHINESE_MARK);
        assert_eq!(mark_param_name("%E4%B8%AD"), URL_ENCODE_MARK);
        assert_eq!(mark_param_name(&"k".repeat(32)), TOO_LONG_MARK);
    }

    #[test]
    fn test_json_values() {
        let value: serde_json::Value =
            serde_json::json!({"page": 3, "on": true, "tags": ["a"], "q": "Ariadne"});
        assert_eq!(
            mark_json_value(&value, false),
            "{on={{bool}}&page={{number}}&q={{Ariadne}}&tags={{list}}}"
        );
    }
}
