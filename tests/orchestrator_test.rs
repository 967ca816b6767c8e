//! Integration tests for the crawl orchestrator driven by a scripted tab runner

mod common;

use ariadne::crawler::{CrawlOptions, CrawlOrchestrator};
use ariadne::error::AriadneError;
use ariadne::models::Source;
use ariadne::pool::TabPool;
use ariadne::report::{self, ALL_DOMAIN_FILE, REQ_RESULT_FILE, SUB_DOMAIN_FILE};
use ariadne::tasks::{FileTaskSource, TaskSource};
use common::{test_config, SiteMapRunner};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn urls(requests: &[ariadne::models::Request]) -> Vec<String> {
    let mut urls: Vec<String> = requests.iter().map(|r| r.url.to_string()).collect();
    urls.sort();
    urls
}

#[tokio::test]
async fn test_single_seed_gets_scheme_mirror() {
    let mut config = test_config(&["http://example.com/"]);
    config.dual_scheme = true;
    let runner = Arc::new(SiteMapRunner::new());

    let orchestrator =
        CrawlOrchestrator::new(Arc::new(config), runner.clone(), CrawlOptions::default())
            .expect("orchestrator");
    let report = orchestrator.run().await;

    assert_eq!(
        urls(&report.requests),
        vec!["http://example.com/", "https://example.com/"]
    );
    assert!(report.requests.iter().all(|r| r.source == Source::Target));
    assert_eq!(runner.visited(), vec!["http://example.com/", "https://example.com/"]);
    assert_eq!(report.tabs_started, 2);
    assert!(!report.cancelled);
}

#[tokio::test]
async fn test_discoveries_are_filtered_and_crawled() {
    let runner = Arc::new(
        SiteMapRunner::new()
            .link("http://example.com/", "http://example.com/a.php?id=1", Source::Dom)
            .link("http://example.com/", "http://example.com/a.php?id=2", Source::Dom)
            .link("http://example.com/", "http://example.com/logo.png", Source::StaticResource)
            .link("http://example.com/", "http://other.net/x", Source::Dom)
            .link("http://example.com/", "http://example.com/logout.php", Source::Dom)
            .link("http://example.com/a.php?id=1", "http://example.com/", Source::Dom),
    );
    let config = test_config(&["http://example.com/"]);
    let report = CrawlOrchestrator::new(Arc::new(config), runner.clone(), CrawlOptions::default())
        .expect("orchestrator")
        .run()
        .await;

    assert_eq!(
        urls(&report.requests),
        vec![
            "http://example.com/",
            "http://example.com/a.php?id=1",
            "http://example.com/logout.php",
        ]
    );
    assert_eq!(
        runner.visited(),
        vec!["http://example.com/", "http://example.com/a.php?id=1"]
    );
    assert_eq!(
        urls(&report.all_requests),
        vec![
            "http://example.com/",
            "http://example.com/a.php?id=1",
            "http://example.com/a.php?id=2",
            "http://example.com/logout.php",
        ]
    );
    assert_eq!(report.all_domains, vec!["example.com", "other.net"]);
    assert_eq!(report.sub_domains, vec!["example.com"]);
}

#[tokio::test]
async fn test_crawl_budget_limits_tabs() {
    let mut runner = SiteMapRunner::new();
    for word in ["alpha", "beta", "gamma", "delta", "epsilon"] {
        runner = runner.link(
            "http://example.com/",
            &format!("http://example.com/{word}"),
            Source::Dom,
        );
    }
    let runner = Arc::new(runner);
    let mut config = test_config(&["http://example.com/"]);
    config.max_crawl_count = 3;

    let report = CrawlOrchestrator::new(Arc::new(config), runner.clone(), CrawlOptions::default())
        .expect("orchestrator")
        .run()
        .await;

    assert_eq!(runner.visited().len(), 3);
    assert_eq!(report.requests.len(), 6);
}

#[tokio::test]
async fn test_budget_below_target_count_is_raised() {
    let runner = Arc::new(SiteMapRunner::new());
    let mut config = test_config(&["http://example.com/a", "http://example.com/b"]);
    config.max_crawl_count = 1;

    CrawlOrchestrator::new(Arc::new(config), runner.clone(), CrawlOptions::default())
        .expect("orchestrator")
        .run()
        .await;

    assert_eq!(
        runner.visited(),
        vec!["http://example.com/a", "http://example.com/b"]
    );
}

#[tokio::test]
async fn test_depth_limit_stops_traversal() {
    let runner = Arc::new(
        SiteMapRunner::new()
            .link("http://example.com/", "http://example.com/first", Source::Dom)
            .link("http://example.com/first", "http://example.com/second", Source::Dom)
            .link("http://example.com/second", "http://example.com/third", Source::Dom),
    );
    let mut config = test_config(&["http://example.com/"]);
    config.max_depth = 1;

    let report = CrawlOrchestrator::new(Arc::new(config), runner.clone(), CrawlOptions::default())
        .expect("orchestrator")
        .run()
        .await;

    assert_eq!(
        runner.visited(),
        vec!["http://example.com/", "http://example.com/first"]
    );
    let second = report
        .requests
        .iter()
        .find(|r| r.url.path() == "/second")
        .expect("recorded but not crawled");
    assert_eq!(second.depth, 2);
}

#[tokio::test]
async fn test_ignored_seed_is_recorded_not_crawled() {
    let runner = Arc::new(SiteMapRunner::new());
    let config = test_config(&["http://example.com/user/logout"]);
    let report = CrawlOrchestrator::new(Arc::new(config), runner.clone(), CrawlOptions::default())
        .expect("orchestrator")
        .run()
        .await;

    assert_eq!(report.requests.len(), 1);
    assert!(runner.visited().is_empty());
}

#[tokio::test]
async fn test_tab_timeouts_are_counted() {
    let runner = Arc::new(
        SiteMapRunner::new()
            .link("http://example.com/", "http://example.com/slow", Source::Dom)
            .times_out("http://example.com/slow"),
    );
    let pool = TabPool::new(2);
    let report = CrawlOrchestrator::new(
        Arc::new(test_config(&["http://example.com/"])),
        runner,
        CrawlOptions {
            pool: Some(Arc::clone(&pool)),
            ..Default::default()
        },
    )
    .expect("orchestrator")
    .run()
    .await;

    assert_eq!(report.tabs_started, 2);
    assert_eq!(report.tab_timeouts, 1);
    assert!((pool.timeout_ratio() - 0.5).abs() < f64::EPSILON);
    assert_eq!(pool.running(), 0);
}

#[tokio::test]
async fn test_cancellation_releases_pool() {
    let runner = Arc::new(SiteMapRunner::new().delay(Duration::from_secs(60)));
    let cancel = CancellationToken::new();
    let orchestrator = CrawlOrchestrator::new(
        Arc::new(test_config(&["http://example.com/"])),
        runner,
        CrawlOptions {
            cancel: cancel.clone(),
            ..Default::default()
        },
    )
    .expect("orchestrator");
    let pool = orchestrator.pool();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .expect("run returns after cancellation");
    assert!(report.cancelled);
    assert!(pool.is_closed());
}

#[tokio::test]
async fn test_result_files_are_written() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("out");
    let runner = Arc::new(
        SiteMapRunner::new()
            .link("http://www.example.com/", "http://www.example.com/news.php?id=7", Source::Dom)
            .link("http://www.example.com/", "http://api.example.com/v1/items", Source::Xhr)
            .link("http://www.example.com/", "http://cdn.other.net/lib.js", Source::JavaScript),
    );
    let report = CrawlOrchestrator::new(
        Arc::new(test_config(&["http://www.example.com/"])),
        runner,
        CrawlOptions {
            output_dir: Some(out.clone()),
            ..Default::default()
        },
    )
    .expect("orchestrator")
    .run()
    .await;

    let saved = report::jsonl::load(&out.join(REQ_RESULT_FILE)).expect("req results");
    assert_eq!(saved.len(), report.requests.len());
    assert_eq!(saved.len(), 2);
    assert!(saved.iter().any(|r| r.url == "http://www.example.com/news.php?id=7" && r.source == "DOM"));

    let all_domains = std::fs::read_to_string(out.join(ALL_DOMAIN_FILE)).expect("domains");
    assert_eq!(all_domains, "www.example.com\napi.example.com\ncdn.other.net\n");
    let sub_domains = std::fs::read_to_string(out.join(SUB_DOMAIN_FILE)).expect("sub-domains");
    assert_eq!(sub_domains, "www.example.com\napi.example.com\n");

    // a second crawl into the same directory must not clobber the results
    let again = CrawlOrchestrator::new(
        Arc::new(test_config(&["http://www.example.com/"])),
        Arc::new(SiteMapRunner::new()),
        CrawlOptions {
            output_dir: Some(out),
            ..Default::default()
        },
    );
    assert!(matches!(again, Err(AriadneError::SinkError(_))));
}

#[tokio::test]
async fn test_task_results_are_stored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let task_path = dir.path().join("tasks.json");
    let result_path = dir.path().join("results.jsonl");
    std::fs::write(&task_path, r#"{"job": "http://example.com/"}"#).expect("write");
    let source = Arc::new(FileTaskSource::new(&task_path, &result_path));
    let task = source.tasks().await.expect("tasks").remove(0);

    let runner = Arc::new(
        SiteMapRunner::new()
            .link("http://example.com/", "http://example.com/about", Source::Dom)
            .html("http://example.com/", "<html>home</html>"),
    );
    let report = CrawlOrchestrator::new(
        Arc::new(test_config(&[task.url.as_str()])),
        runner.clone(),
        CrawlOptions {
            task_source: Some(source.clone() as Arc<dyn TaskSource>),
            task_id: Some(task.id.clone()),
            ..Default::default()
        },
    )
    .expect("orchestrator")
    .run()
    .await;

    assert!(report
        .requests
        .iter()
        .all(|r| r.task_id.as_deref() == Some("job")));
    assert!(runner
        .visited_requests()
        .iter()
        .all(|r| r.task_id.as_deref() == Some("job")));

    let lines: Vec<serde_json::Value> = std::fs::read_to_string(&result_path)
        .expect("results")
        .lines()
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect();
    // seed, its rendered HTML and the discovered page
    assert_eq!(lines.len(), 3);
    assert!(lines
        .iter()
        .all(|l| l["key"].as_str().expect("key").starts_with("job:")));
    assert!(lines.iter().any(|l| l["value"]["html"] == "<html>home</html>"));
}
