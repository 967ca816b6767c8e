//! Ariadne - browser-driven crawler CLI

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tabled::builder::Builder;
use tabled::settings::Style;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ariadne::config::{self, CliOverrides};
use ariadne::crawler::{BrowserTabRunner, CrawlOptions, CrawlOrchestrator, CrawlReport};
use ariadne::engine::BrowserHandle;
use ariadne::error::AriadneError;
use ariadne::models::CrawlConfig;
use ariadne::pool::{ProcessMonitor, SysinfoMonitor, TabPool};
use ariadne::report::{self, CrawlSummary, RequestInfo};
use ariadne::tasks::{FileTaskSource, TaskSource};

const TASK_RESULT_FILE: &str = "task_results.jsonl";

/// Ariadne - crawls a site in a real browser and reports every request it makes
#[derive(Parser)]
#[command(name = "ariadne", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[allow(clippy::large_enum_variant)]
enum Commands {
    /// Crawl one or more targets
    Crawl {
        /// Target URLs (all on the same host)
        targets: Vec<String>,

        /// Path to configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Body sent to the targets; switches them to POST
        #[arg(long)]
        post_data: Option<String>,

        /// Maximum number of tabs scheduled in the crawl
        #[arg(short = 'm', long)]
        max_crawl_count: Option<usize>,

        /// Maximum number of concurrently open tabs
        #[arg(short = 't', long)]
        max_tab_count: Option<usize>,

        /// Maximum crawl depth (0 = unlimited)
        #[arg(long)]
        max_depth: Option<u32>,

        /// Filter mode (simple, smart, strict)
        #[arg(short = 'f', long)]
        filter_mode: Option<String>,

        /// Occurrences of one signature allowed before it is filtered
        #[arg(long)]
        repeat_threshold: Option<usize>,

        /// Extra headers as a JSON object
        #[arg(long)]
        custom_headers: Option<String>,

        /// Chromium executable
        #[arg(short = 'c', long)]
        chromium_path: Option<String>,

        /// Show the browser window
        #[arg(long)]
        no_headless: bool,

        /// Per-tab run timeout in seconds
        #[arg(long)]
        tab_run_timeout: Option<u64>,

        /// DOM-ready timeout in seconds
        #[arg(long)]
        wait_dom_content_loaded_timeout: Option<u64>,

        /// Delay between triggered events in ms
        #[arg(long)]
        event_trigger_interval: Option<u64>,

        /// Delay before a tab closes in ms
        #[arg(long)]
        before_exit_delay: Option<u64>,

        /// URL keywords never crawled (comma-separated)
        #[arg(long, value_delimiter = ',')]
        ignore_url_keywords: Option<Vec<String>>,

        /// Form values by input type (type=value, comma-separated)
        #[arg(long, value_delimiter = ',')]
        form_values: Option<Vec<String>>,

        /// Form values by name keyword (keyword=value, comma-separated)
        #[arg(long, value_delimiter = ',')]
        form_keyword_values: Option<Vec<String>>,

        /// Proxy for the browser and replayed requests
        #[arg(long)]
        request_proxy: Option<String>,

        /// Replay accepted requests through this proxy after the crawl
        #[arg(long)]
        push_to_proxy: Option<String>,

        /// Concurrent pushes to the proxy
        #[arg(long)]
        push_pool_max: Option<usize>,

        /// Directory for result files
        #[arg(short = 'o', long)]
        output_dir: Option<PathBuf>,

        /// Do not add the other scheme of a single target
        #[arg(long)]
        no_dual_scheme: bool,

        /// Re-encode query strings in the page charset
        #[arg(long)]
        encode_url_with_charset: bool,

        /// Resize the tab pool from process load
        #[arg(long)]
        auto_scale: bool,

        /// Scaling weights as JSON: {"CpuWeight":..,"MemWeight":..,"TabTTLWeight":..}
        #[arg(long)]
        scale_weights: Option<String>,

        /// JSON file mapping task ids to target URLs
        #[arg(long)]
        task_file: Option<PathBuf>,

        /// Capture page HTML for task results
        #[arg(long)]
        save_html: bool,

        /// Log level (debug, info, warn, error)
        #[arg(long, default_value = "info")]
        log_level: String,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the summary of a previous crawl
    Report {
        /// Path to crawl_result.json
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn init_logging(level: &str, verbose: bool) {
    let requested = level.to_ascii_lowercase();
    let level = if verbose {
        "debug"
    } else {
        match requested.as_str() {
            l @ ("debug" | "info" | "warn" | "error") => l,
            _ => "info",
        }
    };
    let filter = format!("ariadne={level}");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}

fn print_banner() {
    let banner = r#"
    ╔═══════════════════════════════════════╗
    ║  ARIADNE v0.1.0                       ║
    ║  Browser-driven crawler               ║
    ╚═══════════════════════════════════════╝
    "#;
    println!("{}", banner.cyan());
}

fn print_summary(summary: &CrawlSummary) {
    println!("\n{}", "  Crawl Summary".bold());
    println!("  {}", "─".repeat(35));

    let mut builder = Builder::default();
    builder.push_record(["Source", "Requests"]);
    let mut by_source: Vec<(String, usize)> = Vec::new();
    for req in &summary.req_list {
        match by_source.iter_mut().find(|(s, _)| *s == req.source) {
            Some(entry) => entry.1 += 1,
            None => by_source.push((req.source.clone(), 1)),
        }
    }
    for (source, count) in &by_source {
        builder.push_record([source.clone(), count.to_string()]);
    }
    builder.push_record(["Total".to_string(), summary.req_list.len().to_string()]);

    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{table}");

    println!(
        "\n  {} {} {} {}",
        format!("{} seen", summary.all_req_list.len()).cyan(),
        format!("{} domains", summary.all_domain_list.len()).blue(),
        format!("{} sub-domains", summary.sub_domain_list.len()).blue(),
        format!(
            "{} tabs ({} timed out) in {:.1}s",
            summary.tabs_started,
            summary.tab_timeouts,
            summary.duration_secs()
        )
        .white(),
    );
}

fn print_requests(requests: &[RequestInfo]) {
    for req in requests {
        let method = if req.method == "GET" {
            req.method.green()
        } else {
            req.method.yellow()
        };
        println!("  {:7} {} {}", method, req.url, format!("[{}]", req.source).dimmed());
    }
}

fn fail(err: AriadneError) -> ! {
    eprintln!("  {} {}", "Error:".red().bold(), err);
    std::process::exit(1);
}

/// Progress spinner fed from the pool counters
fn spawn_spinner(pool: Arc<TabPool>, cancel: CancellationToken) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} {elapsed} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    let bar = pb.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    bar.set_message(format!(
                        "{} tabs running / {} slots, {} started",
                        pool.running(),
                        pool.capacity(),
                        pool.tabs_started()
                    ));
                }
            }
        }
    });
    pb
}

/// Runs one crawl on its own task so a panic still releases the browser
async fn crawl_once(
    config: Arc<CrawlConfig>,
    browser: Arc<BrowserHandle>,
    output_dir: Option<PathBuf>,
    task_source: Option<Arc<dyn TaskSource>>,
    task_id: Option<String>,
    cancel: CancellationToken,
) -> Result<CrawlReport, AriadneError> {
    let runner = Arc::new(BrowserTabRunner::new(Arc::clone(&browser), Arc::clone(&config))?);
    let pool = TabPool::new(config.max_tab_count);

    let monitor: Option<Arc<dyn ProcessMonitor>> = if config.auto_scale {
        Some(Arc::new(SysinfoMonitor::new()))
    } else {
        None
    };

    let orchestrator = CrawlOrchestrator::new(
        Arc::clone(&config),
        runner,
        CrawlOptions {
            pool: Some(Arc::clone(&pool)),
            cancel: cancel.clone(),
            output_dir,
            monitor,
            task_source,
            task_id,
        },
    )?;
    for target in orchestrator.targets() {
        println!("  {} {}", "Target:".bold(), target.simple_format().green());
    }

    let spinner_stop = cancel.child_token();
    let spinner = spawn_spinner(Arc::clone(&pool), spinner_stop.clone());
    let handle = tokio::spawn(orchestrator.run());
    let joined = handle.await;
    spinner_stop.cancel();
    spinner.finish_and_clear();

    match joined {
        Ok(report) => Ok(report),
        Err(e) => {
            if e.is_panic() {
                error!("Crawl panicked: {e}");
            }
            pool.tune(1);
            pool.release();
            browser.close().await;
            Err(AriadneError::BrowserError(format!("crawl task aborted: {e}")))
        }
    }
}

async fn finish_report(config: &CrawlConfig, report: &CrawlReport, output_dir: Option<&Path>) {
    let summary = report.summary();
    if let Some(dir) = output_dir {
        if let Err(e) = report::json::export(&summary, &dir.join(report::SUMMARY_FILE)) {
            warn!("Writing crawl summary failed: {e}");
        }
    }
    if let Some(ref proxy) = config.push_to_proxy {
        if let Err(e) = report::push::push_requests(&report.requests, proxy, config.push_pool_max).await
        {
            warn!("Push to {proxy} failed: {e}");
        }
    }
    print_requests(&summary.req_list);
    print_summary(&summary);
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl {
            targets,
            config: config_path,
            post_data,
            max_crawl_count,
            max_tab_count,
            max_depth,
            filter_mode,
            repeat_threshold,
            custom_headers,
            chromium_path,
            no_headless,
            tab_run_timeout,
            wait_dom_content_loaded_timeout,
            event_trigger_interval,
            before_exit_delay,
            ignore_url_keywords,
            form_values,
            form_keyword_values,
            request_proxy,
            push_to_proxy,
            push_pool_max,
            output_dir,
            no_dual_scheme,
            encode_url_with_charset,
            auto_scale,
            scale_weights,
            task_file,
            save_html,
            log_level,
            verbose,
        } => {
            init_logging(&log_level, verbose);
            print_banner();

            let mut crawl_config = if let Some(ref path) = config_path {
                config::load_config(path).unwrap_or_else(|e| fail(e))
            } else {
                let default_path = Path::new("config/default.toml");
                if default_path.exists() {
                    config::load_config(default_path).unwrap_or_else(|e| fail(e))
                } else {
                    CrawlConfig::default()
                }
            };

            let overrides = CliOverrides {
                targets,
                post_data,
                max_crawl_count,
                max_tab_count,
                max_depth,
                filter_mode,
                repeat_threshold,
                custom_headers,
                chromium_path,
                no_headless,
                tab_run_timeout_secs: tab_run_timeout,
                dom_ready_timeout_secs: wait_dom_content_loaded_timeout,
                event_trigger_interval_ms: event_trigger_interval,
                before_exit_delay_ms: before_exit_delay,
                ignore_keywords: ignore_url_keywords,
                form_values,
                form_keyword_values,
                proxy: request_proxy,
                push_to_proxy,
                push_pool_max,
                output_dir,
                no_dual_scheme,
                encode_url_with_charset,
                auto_scale,
                scale_weights,
                task_file,
                save_html,
            };
            if let Err(e) = config::merge_cli_args(&mut crawl_config, overrides) {
                fail(e);
            }
            if let Err(e) = config::validate(&crawl_config) {
                fail(e);
            }

            println!(
                "  {} {}  {} {}  {} {}\n",
                "Filter:".bold(),
                crawl_config.filter_mode.to_string().cyan(),
                "Tabs:".bold(),
                crawl_config.max_tab_count.to_string().cyan(),
                "Max crawl:".bold(),
                crawl_config.max_crawl_count.to_string().cyan()
            );

            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupted, shutting down");
                        cancel.cancel();
                    }
                });
            }

            let browser = Arc::new(BrowserHandle::launch(&crawl_config).await.unwrap_or_else(|e| fail(e)));
            let output_dir = crawl_config.output_dir.clone();

            if let Some(ref task_path) = crawl_config.task_file {
                let result_path = output_dir
                    .as_deref()
                    .unwrap_or_else(|| Path::new("."))
                    .join(TASK_RESULT_FILE);
                let source = Arc::new(FileTaskSource::new(task_path, &result_path));
                let tasks = match source.tasks().await {
                    Ok(tasks) => tasks,
                    Err(e) => {
                        browser.close().await;
                        fail(e);
                    }
                };

                for task in tasks {
                    if cancel.is_cancelled() {
                        break;
                    }
                    info!("Task {}: {}", task.id, task.url);
                    let mut task_config = crawl_config.clone();
                    task_config.targets = vec![task.url.clone()];
                    let task_dir = output_dir.as_ref().map(|d| d.join(&task.id));
                    let task_source: Arc<dyn TaskSource> = source.clone();
                    match crawl_once(
                        Arc::new(task_config.clone()),
                        Arc::clone(&browser),
                        task_dir.clone(),
                        Some(task_source),
                        Some(task.id.clone()),
                        cancel.clone(),
                    )
                    .await
                    {
                        Ok(report) => finish_report(&task_config, &report, task_dir.as_deref()).await,
                        Err(e) => error!("Task {} failed: {e}", task.id),
                    }
                }
                if let Err(e) = source.close().await {
                    warn!("Closing task results failed: {e}");
                }
            } else {
                let config = Arc::new(crawl_config);
                match crawl_once(
                    Arc::clone(&config),
                    Arc::clone(&browser),
                    output_dir.clone(),
                    None,
                    None,
                    cancel.clone(),
                )
                .await
                {
                    Ok(report) => finish_report(&config, &report, output_dir.as_deref()).await,
                    Err(e) => {
                        browser.close().await;
                        fail(e);
                    }
                }
            }

            browser.close().await;
            if cancel.is_cancelled() {
                std::process::exit(130);
            }
        }

        Commands::Report { input } => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new("ariadne=info"))
                .with_target(false)
                .init();

            print_banner();
            let summary = report::json::load(&input)?;
            print_requests(&summary.req_list);
            print_summary(&summary);
        }
    }

    Ok(())
}
