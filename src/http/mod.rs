//! Out-of-band HTTP client used for redirect replay and proxy pushing

pub mod client;
pub use client::{HttpClient, ReplayResponse, REPLAY_RANGE};
