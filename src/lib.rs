//! Ariadne - Browser-driven crawler for security scanning
//!
//! Renders target pages in a real Chromium, intercepts every request the
//! page issues and follows discovered links and forms within depth and
//! volume budgets. The output is a deduplicated request graph meant to be
//! fed to a vulnerability scanner.

pub mod config;
pub mod crawler;
pub mod engine;
pub mod error;
pub mod filter;
pub mod http;
pub mod models;
pub mod pool;
pub mod report;
pub mod tasks;
pub mod urls;
