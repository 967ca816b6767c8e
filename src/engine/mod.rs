//! Browser engine: the shared Chromium process and per-target tab sessions

pub mod browser;
pub mod cdp;
pub mod collect;
pub mod driver;
pub mod intercept;
pub mod js;
pub mod tab;

pub use browser::BrowserHandle;
pub use cdp::CdpDriver;
pub use driver::{FailReason, PausedRequest, RequestOverride, TabDriver, TabEvent, TabSetup};
pub use tab::{TabOutcome, TabPhase, TabSession};
