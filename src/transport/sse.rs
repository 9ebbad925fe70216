//! HTTP+SSE transport for remote MCP servers
//!
//! Outbound frames are POSTed as JSON to the endpoint URL; inbound frames
//! arrive as server-sent events on a long-lived GET of the same origin with
//! `Accept: text/event-stream`. The `endpoint` SSE event, whose data names
//! the path to POST to, is an MCP extension to plain SSE; discovery of it
//! is bounded by a timeout (45 s by default). `Mcp-Session-Id` is echoed on
//! every POST once the server assigns one, and `Last-Event-ID` is offered
//! when reconnecting so the server can resume the event stream.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::io::StreamReader;
use url::Url;

use super::{read_line_limited, FrameStream, Transport, TransportConfig};
use crate::errors::Error;

/// HTTP header for the MCP session ID
const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";
/// HTTP header for SSE stream resumption
const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

const DEFAULT_ENDPOINT_TIMEOUT_SECS: u64 = 45;
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// HTTP+SSE transport for remote MCP servers
pub struct SseTransport {
    origin: Url,
    client: reqwest::Client,
    config: TransportConfig,
    bearer_token: Option<String>,
    endpoint_timeout: Duration,
    post_url: Option<Url>,
    session_id: Option<String>,
    last_event_id: Arc<Mutex<Option<String>>>,
    frame_tx: Option<mpsc::Sender<io::Result<Vec<u8>>>>,
    frame_rx: Option<mpsc::Receiver<io::Result<Vec<u8>>>>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl SseTransport {
    pub fn new(origin: &str, config: TransportConfig) -> Result<Self, Error> {
        let origin = Url::parse(origin)
            .map_err(|err| Error::transport_error(format!("invalid origin URL: {err}")))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| Error::transport_error(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            origin,
            client,
            config,
            bearer_token: None,
            endpoint_timeout: Duration::from_secs(DEFAULT_ENDPOINT_TIMEOUT_SECS),
            post_url: None,
            session_id: None,
            last_event_id: Arc::new(Mutex::new(None)),
            frame_tx: None,
            frame_rx: None,
            reader_task: None,
        })
    }

    /// Attach a JWT sent as `Authorization: Bearer <token>` on every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Override the endpoint-discovery timeout.
    pub fn with_endpoint_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_timeout = timeout;
        self
    }

    /// Session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn base_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.bearer_token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    fn record_session_id(&mut self, headers: &HeaderMap) {
        if let Some(value) = headers.get(MCP_SESSION_ID_HEADER) {
            if let Ok(value) = value.to_str() {
                if self.session_id.as_deref() != Some(value) {
                    tracing::debug!(session_id = value, "established session");
                    self.session_id = Some(value.to_string());
                }
            }
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&mut self) -> Result<(), Error> {
        let mut headers = self.base_headers();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        if let Some(last_id) = self
            .last_event_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
        {
            if let Ok(value) = HeaderValue::from_str(&last_id) {
                headers.insert(LAST_EVENT_ID_HEADER, value);
            }
        }

        let response = self
            .client
            .get(self.origin.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|err| Error::transport_error(format!("SSE connect failed: {err}")))?;

        if !response.status().is_success() {
            return Err(Error::transport_error(format!(
                "SSE connect failed: status {}",
                response.status()
            )));
        }
        self.record_session_id(response.headers());

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (endpoint_tx, endpoint_rx) = oneshot::channel();

        let max_bytes = self.config.max_message_size;
        let last_event_id = Arc::clone(&self.last_event_id);
        let task_tx = frame_tx.clone();
        let task = tokio::spawn(async move {
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(io::Error::other));
            let mut reader = BufReader::new(StreamReader::new(stream));
            pump_sse(
                &mut reader,
                max_bytes,
                &task_tx,
                Some(endpoint_tx),
                &last_event_id,
            )
            .await;
        });

        // Endpoint discovery (MCP extension): the first `endpoint` event
        // names the path that POSTs must target.
        let endpoint = match tokio::time::timeout(self.endpoint_timeout, endpoint_rx).await {
            Ok(Ok(path)) => path,
            Ok(Err(_)) => {
                task.abort();
                return Err(Error::transport_error(
                    "SSE stream ended before the endpoint event arrived",
                ));
            }
            Err(_) => {
                task.abort();
                return Err(Error::transport_error(
                    "timed out waiting for the endpoint event",
                ));
            }
        };
        self.post_url = Some(self.origin.join(&endpoint).map_err(|err| {
            Error::transport_error(format!("invalid endpoint path {endpoint:?}: {err}"))
        })?);

        self.frame_tx = Some(frame_tx);
        self.frame_rx = Some(frame_rx);
        self.reader_task = Some(task);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.frame_tx = None;
        self.frame_rx = None;
        self.post_url = None;
        self.session_id = None;
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), Error> {
        let post_url = self
            .post_url
            .clone()
            .ok_or_else(|| Error::transport_error("transport is not connected"))?;

        let mut headers = self.base_headers();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(session_id) = &self.session_id {
            if let Ok(value) = HeaderValue::from_str(session_id) {
                headers.insert(MCP_SESSION_ID_HEADER, value);
            }
        }

        let response = self
            .client
            .post(post_url)
            .headers(headers)
            .body(frame.to_vec())
            .send()
            .await
            .map_err(|err| Error::transport_error(format!("POST failed: {err}")))?;

        self.record_session_id(response.headers());

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND && self.session_id.is_some() {
            self.session_id = None;
            return Err(Error::internal_error("Session expired"));
        }
        if !status.is_success() {
            return Err(Error::transport_error(format!("POST failed: status {status}")));
        }

        // Some servers answer the POST with the response frame directly
        // instead of (or in addition to) the SSE stream; feed it back into
        // the same inbound channel.
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));
        if is_json {
            let body = response
                .bytes()
                .await
                .map_err(|err| Error::transport_error(format!("POST response read failed: {err}")))?;
            if !body.is_empty() {
                if let Some(tx) = &self.frame_tx {
                    let _ = tx.send(Ok(body.to_vec())).await;
                }
            }
        }

        Ok(())
    }

    fn receive(&mut self) -> Result<FrameStream, Error> {
        let receiver = self
            .frame_rx
            .take()
            .ok_or_else(|| Error::transport_error("transport is not connected"))?;
        Ok(Box::pin(futures_util::stream::unfold(
            receiver,
            |mut receiver| async move { receiver.recv().await.map(|frame| (frame, receiver)) },
        )))
    }
}

/// Read server-sent events and forward their payloads.
///
/// Recognized fields are `event`, `data`, `id`, and `retry`. Multi-line
/// `data` is joined with `\n` per the SSE spec. `event: endpoint` resolves
/// the POST path exactly once; everything else with a payload is a JSON-RPC
/// frame.
async fn pump_sse<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_bytes: usize,
    frame_tx: &mpsc::Sender<io::Result<Vec<u8>>>,
    mut endpoint_tx: Option<oneshot::Sender<String>>,
    last_event_id: &Mutex<Option<String>>,
) {
    let mut event_name = String::new();
    let mut data = String::new();

    loop {
        let line = match read_line_limited(reader, max_bytes).await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                let _ = frame_tx.send(Err(err)).await;
                return;
            }
        };

        if line.is_empty() {
            // Blank line terminates one event.
            if event_name == "endpoint" {
                if let Some(tx) = endpoint_tx.take() {
                    let _ = tx.send(std::mem::take(&mut data));
                }
            } else if !data.is_empty() && data != "[DONE]" {
                if frame_tx
                    .send(Ok(std::mem::take(&mut data).into_bytes()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            event_name.clear();
            data.clear();
            continue;
        }

        let line = String::from_utf8_lossy(&line);
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            // A line with no colon is a field name with an empty value.
            None => (line.as_ref(), ""),
        };

        match field {
            "event" => event_name = value.to_string(),
            "data" => {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(value);
            }
            "id" => {
                *last_event_id
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(value.to_string());
            }
            "retry" => {
                if value.parse::<u64>().is_err() {
                    tracing::debug!(value, "ignoring malformed retry field");
                }
            }
            // Field names starting with ':' are comments; anything else is
            // an unknown field and skipped.
            _ => {}
        }
    }
}
