//! Integration tests for request deduplication shared across tabs

mod common;

use ariadne::filter::{FilterMode, SimpleFilter, SmartFilter};
use common::request;
use std::sync::Arc;

#[tokio::test]
async fn test_concurrent_tabs_accept_one_representative() {
    let filter = Arc::new(SmartFilter::new(
        FilterMode::Smart,
        Some("shop.example.com".into()),
        1,
    ));

    let mut handles = Vec::new();
    for page in 0..16 {
        let filter = Arc::clone(&filter);
        handles.push(tokio::spawn(async move {
            let mut req = request("GET", &format!("http://shop.example.com/list/page/{page}"));
            !filter.do_filter(&mut req)
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.expect("join") {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
}

#[test]
fn test_modes_differ_on_pagination() {
    let urls = [
        "http://shop.example.com/item.php?id=100",
        "http://shop.example.com/item.php?id=101",
    ];

    let simple = SmartFilter::new(FilterMode::Simple, Some("shop.example.com".into()), 1);
    let smart = SmartFilter::new(FilterMode::Smart, Some("shop.example.com".into()), 1);
    let kept_simple = urls
        .iter()
        .filter(|u| !simple.do_filter(&mut request("GET", u)))
        .count();
    let kept_smart = urls
        .iter()
        .filter(|u| !smart.do_filter(&mut request("GET", u)))
        .count();

    assert_eq!(kept_simple, 2);
    assert_eq!(kept_smart, 1);
}

#[test]
fn test_strict_mode_scopes_by_port() {
    let strict = SmartFilter::new(
        FilterMode::Strict,
        Some("http://shop.example.com".into()),
        1,
    );
    assert!(!strict.do_filter(&mut request("GET", "http://shop.example.com/a")));
    assert!(strict.do_filter(&mut request("GET", "http://shop.example.com:8080/a")));

    let smart = SmartFilter::new(FilterMode::Smart, Some("shop.example.com".into()), 1);
    assert!(!smart.do_filter(&mut request("GET", "http://shop.example.com:8080/a")));
}

#[test]
fn test_simple_filter_records_each_request_once() {
    let filter = SimpleFilter::new(Some("shop.example.com".into()), false);
    let req = request("POST", "http://shop.example.com/cart").with_post_data("id=1");
    assert!(!filter.do_filter(&req));
    assert!(filter.do_filter(&req));
    assert!(!filter.do_filter(&request("POST", "http://shop.example.com/cart").with_post_data("id=2")));
}
