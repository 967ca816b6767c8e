//! Chrome DevTools Protocol implementation of `TabDriver`

use super::driver::{FailReason, PausedRequest, RequestOverride, TabDriver, TabEvent, TabSetup};
use crate::error::{AriadneError, Result};
use crate::models::Headers;
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EventAuthRequired, EventRequestPaused, FailRequestParams,
    FulfillRequestParams, HeaderEntry,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, ErrorReason, PostDataEntry, EventRequestWillBeSent, EventResponseReceived,
    EventResponseReceivedExtraInfo, GetResponseBodyParams, ResourceType, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    self, AddScriptToEvaluateOnNewDocumentParams, EventDomContentEventFired,
    EventJavascriptDialogOpening, EventLoadEventFired, HandleJavaScriptDialogParams,
    NavigateParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    self, AddBindingParams, EvaluateParams, EventBindingCalled,
};
use chromiumoxide::Page;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const EVENT_BUFFER: usize = 1024;

const PHONE_WIDTH: i64 = 375;
const PHONE_HEIGHT: i64 = 812;
const PHONE_SCALE: f64 = 3.0;
const PHONE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 11_0 like Mac OS X) \
    AppleWebKit/604.1.38 (KHTML, like Gecko) Version/11.0 Mobile/15A372 Safari/604.1";

/// Drives one Chromium page over CDP
pub struct CdpDriver {
    page: Page,
    pump: JoinHandle<()>,
}

impl CdpDriver {
    /// Subscribes to the page's events and returns the driver with its event channel.
    ///
    /// Each event type has its own listener. Order is kept within one type,
    /// ordering across types is best-effort.
    pub async fn attach(page: Page) -> Result<(Self, mpsc::Receiver<TabEvent>)> {
        let streams: Vec<BoxStream<'static, TabEvent>> = vec![
            page.event_listener::<EventRequestWillBeSent>()
                .await?
                .map(|e| TabEvent::RequestWillBeSent {
                    request_id: e.request_id.inner().clone(),
                    loader_id: e.loader_id.inner().clone(),
                    frame_id: e.frame_id.as_ref().map(|f| f.inner().clone()),
                    is_document: matches!(e.r#type, Some(ResourceType::Document)),
                })
                .boxed(),
            page.event_listener::<EventRequestPaused>()
                .await?
                .map(|e| {
                    TabEvent::RequestPaused(PausedRequest {
                        request_id: e.request_id.inner().clone(),
                        network_id: e.network_id.as_ref().map(|n| n.inner().clone()),
                        frame_id: e.frame_id.inner().clone(),
                        method: e.request.method.clone(),
                        url: e.request.url.clone(),
                        headers: Headers::from_json(e.request.headers.inner()),
                        post_data: post_data_from_entries(
                            e.request.post_data_entries.as_deref().unwrap_or_default(),
                        ),
                    })
                })
                .boxed(),
            page.event_listener::<EventResponseReceived>()
                .await?
                .map(|e| TabEvent::ResponseReceived {
                    request_id: e.request_id.inner().clone(),
                    url: e.response.url.clone(),
                    mime_type: e.response.mime_type.clone(),
                    headers: Headers::from_json(e.response.headers.inner()),
                })
                .boxed(),
            page.event_listener::<EventResponseReceivedExtraInfo>()
                .await?
                .map(|e| TabEvent::ResponseExtraInfo {
                    request_id: e.request_id.inner().clone(),
                    headers_text: e.headers_text.clone(),
                })
                .boxed(),
            page.event_listener::<EventAuthRequired>()
                .await?
                .map(|e| TabEvent::AuthRequired {
                    request_id: e.request_id.inner().clone(),
                })
                .boxed(),
            page.event_listener::<EventDomContentEventFired>()
                .await?
                .map(|_| TabEvent::DomContentLoaded)
                .boxed(),
            page.event_listener::<EventLoadEventFired>()
                .await?
                .map(|_| TabEvent::LoadEventFired)
                .boxed(),
            page.event_listener::<EventJavascriptDialogOpening>()
                .await?
                .map(|_| TabEvent::DialogOpening)
                .boxed(),
            page.event_listener::<EventBindingCalled>()
                .await?
                .map(|e| TabEvent::BindingCalled {
                    name: e.name.clone(),
                    payload: e.payload.clone(),
                })
                .boxed(),
        ];

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut merged = stream::select_all(streams);
        let pump = tokio::spawn(async move {
            while let Some(event) = merged.next().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok((Self { page, pump }, rx))
    }
}

fn header_entries(headers: Vec<(String, String)>) -> Vec<HeaderEntry> {
    headers
        .into_iter()
        .map(|(name, value)| HeaderEntry::new(name, value))
        .collect()
}

fn encode_body(body: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(body)
}

/// Rebuilds a request body from its base64 encoded chunks
fn post_data_from_entries(entries: &[PostDataEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let mut body = Vec::new();
    for bytes in entries.iter().filter_map(|entry| entry.bytes.as_ref()) {
        let chunk: &str = bytes.as_ref();
        match base64::engine::general_purpose::STANDARD.decode(chunk) {
            Ok(decoded) => body.extend_from_slice(&decoded),
            Err(e) => debug!("Skipping undecodable post data chunk: {}", e),
        }
    }
    Some(String::from_utf8_lossy(&body).into_owned())
}

#[async_trait]
impl TabDriver for CdpDriver {
    async fn prepare(&self, setup: &TabSetup) -> Result<()> {
        self.page.execute(runtime::EnableParams::default()).await?;
        self.page.execute(network::EnableParams::default()).await?;
        self.page.execute(page::EnableParams::default()).await?;
        self.page
            .execute(fetch::EnableParams {
                patterns: None,
                handle_auth_requests: Some(true),
            })
            .await?;
        for name in &setup.bindings {
            self.page.execute(AddBindingParams::new(name.clone())).await?;
        }
        if setup.phone_device {
            self.page
                .execute(SetDeviceMetricsOverrideParams::new(
                    PHONE_WIDTH,
                    PHONE_HEIGHT,
                    PHONE_SCALE,
                    true,
                ))
                .await?;
            self.page
                .execute(SetUserAgentOverrideParams::new(PHONE_USER_AGENT))
                .await?;
        }
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(
                setup.init_script.clone(),
            ))
            .await?;
        if !setup.extra_headers.is_empty() {
            let json = serde_json::to_value(&setup.extra_headers)?;
            self.page
                .execute(SetExtraHttpHeadersParams::new(network::Headers::new(json)))
                .await?;
        }
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.page.execute(NavigateParams::new(url)).await?;
        Ok(())
    }

    async fn continue_request(&self, request_id: &str, overrides: RequestOverride) -> Result<()> {
        let mut builder = ContinueRequestParams::builder().request_id(request_id.to_string());
        if let Some(url) = overrides.url {
            builder = builder.url(url);
        }
        if let Some(method) = overrides.method {
            builder = builder.method(method);
        }
        if let Some(data) = overrides.post_data {
            builder = builder.post_data(encode_body(data.as_bytes()));
        }
        if let Some(headers) = overrides.headers {
            builder = builder.headers(header_entries(headers));
        }
        let params = builder.build().map_err(AriadneError::CdpError)?;
        self.page.execute(params).await?;
        Ok(())
    }

    async fn fail_request(&self, request_id: &str, reason: FailReason) -> Result<()> {
        let reason = match reason {
            FailReason::BlockedByClient => ErrorReason::BlockedByClient,
            FailReason::ConnectionAborted => ErrorReason::ConnectionAborted,
        };
        self.page
            .execute(FailRequestParams::new(request_id.to_string(), reason))
            .await?;
        Ok(())
    }

    async fn fulfill_request(
        &self,
        request_id: &str,
        status: u16,
        headers: Vec<(String, String)>,
        body: Option<Vec<u8>>,
    ) -> Result<()> {
        let mut builder = FulfillRequestParams::builder()
            .request_id(request_id.to_string())
            .response_code(i64::from(status));
        if !headers.is_empty() {
            builder = builder.response_headers(header_entries(headers));
        }
        if let Some(body) = body {
            builder = builder.body(encode_body(&body));
        }
        let params = builder.build().map_err(AriadneError::CdpError)?;
        self.page.execute(params).await?;
        Ok(())
    }

    async fn continue_with_auth(
        &self,
        request_id: &str,
        username: &str,
        password: &str,
    ) -> Result<()> {
        let challenge = AuthChallengeResponse::builder()
            .response(AuthChallengeResponseResponse::ProvideCredentials)
            .username(username)
            .password(password)
            .build()
            .map_err(AriadneError::CdpError)?;
        self.page
            .execute(ContinueWithAuthParams::new(request_id.to_string(), challenge))
            .await?;
        Ok(())
    }

    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>> {
        let body = self
            .page
            .execute(GetResponseBodyParams::new(request_id.to_string()))
            .await?;
        if body.base64_encoded {
            base64::engine::general_purpose::STANDARD
                .decode(&body.body)
                .map_err(|e| AriadneError::CdpError(format!("response body: {e}")))
        } else {
            Ok(body.body.clone().into_bytes())
        }
    }

    async fn dismiss_dialog(&self) -> Result<()> {
        self.page
            .execute(HandleJavaScriptDialogParams::new(false))
            .await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(AriadneError::CdpError)?;
        let response = self.page.execute(params).await?;
        if let Some(ref exception) = response.exception_details {
            debug!("Evaluate exception: {}", exception.text);
        }
        Ok(response
            .result
            .result
            .value
            .clone()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn close(&self) -> Result<()> {
        self.pump.abort();
        self.page.clone().close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(raw: &[u8]) -> PostDataEntry {
        PostDataEntry::builder().bytes(encode_body(raw)).build()
    }

    #[test]
    fn test_post_data_chunks_are_joined() {
        let entries = vec![entry(b"user=ariadne"), entry(b"&pass=Ariadne6.")];
        assert_eq!(
            post_data_from_entries(&entries).as_deref(),
            Some("user=ariadne&pass=Ariadne6.")
        );
    }

    #[test]
    fn test_missing_post_data_is_none() {
        assert_eq!(post_data_from_entries(&[]), None);
        let empty = PostDataEntry::builder().build();
        assert_eq!(post_data_from_entries(&[empty]).as_deref(), Some(""));
    }
}
