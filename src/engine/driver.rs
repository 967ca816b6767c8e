//! Browser automation surface used by a tab session
//!
//! `TabDriver` is the command side of one tab; events flow the other way
//! through a `TabEvent` channel. The CDP implementation lives in `cdp.rs`,
//! tests drive the session with scripted fakes.

use crate::error::Result;
use crate::models::Headers;
use async_trait::async_trait;

/// Why a paused request is failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    BlockedByClient,
    ConnectionAborted,
}

/// Changes applied when continuing a paused request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOverride {
    pub url: Option<String>,
    pub method: Option<String>,
    pub post_data: Option<String>,
    pub headers: Option<Vec<(String, String)>>,
}

/// A request held by the browser awaiting a decision
#[derive(Debug, Clone, Default)]
pub struct PausedRequest {
    pub request_id: String,
    /// Network request id, equal to the loader id for a document navigation
    pub network_id: Option<String>,
    pub frame_id: String,
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub post_data: Option<String>,
}

/// Events a tab session reacts to
#[derive(Debug, Clone)]
pub enum TabEvent {
    RequestWillBeSent {
        request_id: String,
        loader_id: String,
        frame_id: Option<String>,
        is_document: bool,
    },
    RequestPaused(PausedRequest),
    ResponseReceived {
        request_id: String,
        url: String,
        mime_type: String,
        headers: Headers,
    },
    ResponseExtraInfo {
        request_id: String,
        headers_text: Option<String>,
    },
    AuthRequired {
        request_id: String,
    },
    DomContentLoaded,
    LoadEventFired,
    DialogOpening,
    BindingCalled {
        name: String,
        payload: String,
    },
}

/// One-time setup applied before navigation
#[derive(Debug, Clone, Default)]
pub struct TabSetup {
    pub bindings: Vec<String>,
    pub init_script: String,
    pub extra_headers: Headers,
    pub phone_device: bool,
}

#[async_trait]
pub trait TabDriver: Send + Sync {
    /// Enables the network, fetch and runtime domains and installs bindings and scripts
    async fn prepare(&self, setup: &TabSetup) -> Result<()>;

    /// Starts navigation without waiting for the page to load
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn continue_request(&self, request_id: &str, overrides: RequestOverride) -> Result<()>;

    async fn fail_request(&self, request_id: &str, reason: FailReason) -> Result<()>;

    async fn fulfill_request(
        &self,
        request_id: &str,
        status: u16,
        headers: Vec<(String, String)>,
        body: Option<Vec<u8>>,
    ) -> Result<()>;

    async fn continue_with_auth(&self, request_id: &str, username: &str, password: &str)
        -> Result<()>;

    /// Decoded body of a received response
    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>>;

    async fn dismiss_dialog(&self) -> Result<()>;

    /// Evaluates an expression, awaiting promises, and returns its JSON value
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value>;

    async fn close(&self) -> Result<()>;
}
