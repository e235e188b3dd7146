//! # HTTP Line Transport
//!
//! Opens a streaming request per `open` call and reads the body as lines.
//! A refused connection, a non-2xx status and a broken body all end the source
//! with a single `LineEvent::Failed`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Method;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::hub::{StreamHub, DEFAULT_LINE_CAPACITY};
use crate::core::source::{LineEvent, LineFramer, LineSink, LineSourceHandle, LineTransport};
use crate::error::TransportError;
use crate::record::RecordDecoder;
use crate::request::{HttpMethod, StreamRequest};

/// HTTP client settings for line sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientSettings {
    pub connect_timeout_ms: u64,
    /// Whole-request timeout. Unset by default: streams are long-lived.
    pub request_timeout_ms: Option<u64>,
    pub user_agent: String,
    /// Retries for transient connection failures before the source fails.
    pub max_retries: u32,
    /// Capacity of the line channel between the transport and the hub.
    pub line_capacity: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            request_timeout_ms: None,
            user_agent: concat!("lib_stream/", env!("CARGO_PKG_VERSION")).to_string(),
            max_retries: 0,
            line_capacity: DEFAULT_LINE_CAPACITY,
        }
    }
}

/// # HTTP Line Transport
///
/// Cheap to clone; the underlying client pools connections.
#[derive(Clone)]
pub struct HttpLineTransport {
    inner: ClientWithMiddleware,
}

impl HttpLineTransport {
    pub fn new(settings: &ClientSettings) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .user_agent(settings.user_agent.clone());
        if let Some(ms) = settings.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(settings.max_retries);
        let inner = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { inner })
    }
}

impl LineTransport for HttpLineTransport {
    fn open(&self, request: &StreamRequest, sink: LineSink) -> LineSourceHandle {
        let handle = LineSourceHandle::new(CancellationToken::new());
        let token = handle.token();
        let client = self.inner.clone();
        let method = match request.method() {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let url = request.url();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    log::debug!("Line source for {} cancelled", url);
                    return;
                }
                outcome = pump(&client, method, &url, &sink) => outcome,
            };
            let terminal = match outcome {
                Ok(()) => LineEvent::Completed,
                Err(e) => {
                    log::warn!("Line source for {} failed: {}", url, e);
                    LineEvent::Failed(e)
                }
            };
            // The hub may already be gone; nothing left to tell.
            let _ = sink.send(terminal).await;
        });

        handle
    }
}

async fn pump(
    client: &ClientWithMiddleware,
    method: Method,
    url: &Url,
    sink: &LineSink,
) -> Result<(), TransportError> {
    let response = client
        .request(method, url.clone())
        .send()
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    if sink.send(LineEvent::Connected).await.is_err() {
        return Ok(());
    }

    let mut framer = LineFramer::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| TransportError::Read(e.to_string()))?;
        for line in framer.push(&chunk) {
            if sink.send(LineEvent::Line(line?)).await.is_err() {
                return Ok(());
            }
        }
    }
    if let Some(line) = framer.flush() {
        let _ = sink.send(LineEvent::Line(line?)).await;
    }
    Ok(())
}

/// Builds a hub backed by `HttpLineTransport`.
pub fn http_hub(settings: &ClientSettings, decoder: Arc<dyn RecordDecoder>) -> Result<StreamHub, TransportError> {
    let transport = HttpLineTransport::new(settings)?;
    Ok(StreamHub::with_line_capacity(Arc::new(transport), decoder, settings.line_capacity))
}
