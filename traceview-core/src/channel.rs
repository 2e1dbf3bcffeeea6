//! Live event channel
//!
//! Subscribes to the session store's push stream (HTTP SSE) and delivers
//! decoded [`WireEvent`]s to the session view. The subscription owns a
//! background task that reads the response body; the consumer drains events
//! with [`Subscription::try_next`] from its own loop, so all session state
//! stays single-owner.
//!
//! Transport failures are not errors to the consumer's control flow; they
//! arrive in-band as [`ChannelItem::TransportError`] so the view can decide
//! whether to resubscribe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::WireEvent;

/// What a subscription can deliver.
#[derive(Debug)]
pub enum ChannelItem {
    /// A decoded event frame.
    Event(WireEvent),
    /// The transport failed or the server closed the stream. The
    /// subscription delivers nothing after this.
    TransportError(String),
}

// ============================================
// SSE frame decoding
// ============================================

/// Incremental SSE line decoder.
///
/// Byte chunks from the wire do not align with frame boundaries, so bytes
/// are buffered until a full line is available. Only `data:` lines matter;
/// comment lines (the server's keepalive is an SSE comment) and field lines
/// are dropped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Feed a chunk of bytes and return every complete data payload it
    /// completes. Partial trailing lines stay buffered for the next chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line_bytes = self.buffer.split_to(newline_pos + 1);
            line_bytes.truncate(line_bytes.len() - 1);
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.truncate(line_bytes.len() - 1);
            }

            let line = match std::str::from_utf8(&line_bytes) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if let Some(data) = extract_data(line) {
                payloads.push(data);
            }
        }

        payloads
    }
}

/// Extract the payload of a `data:` line. Comments, empty lines, and other
/// SSE fields yield nothing.
fn extract_data(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let data = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))?
        .trim();
    if data.is_empty() {
        return None;
    }
    Some(data.to_string())
}

// ============================================
// Subscription
// ============================================

/// A live subscription to one session's event stream.
///
/// Dropping the subscription cancels it.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ChannelItem>,
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Non-blocking poll for the next item. Returns `None` when nothing is
    /// queued or the subscription has been cancelled.
    pub fn try_next(&mut self) -> Option<ChannelItem> {
        if self.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Await the next item. Returns `None` once the stream has ended and
    /// the queue is drained, or after cancellation.
    pub async fn next(&mut self) -> Option<ChannelItem> {
        if self.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        self.rx.recv().await
    }

    /// Tear down the subscription. Synchronous, idempotent, and final: no
    /// item is delivered after this returns, even items already queued.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.handle.abort();
            debug!("Subscription cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ============================================
// Channel
// ============================================

/// Factory for live subscriptions against one session store.
pub struct LiveChannel {
    client: reqwest::Client,
    base_url: String,
}

impl LiveChannel {
    /// Build a channel for the store at `base_url`.
    ///
    /// The HTTP client here deliberately carries no request timeout; the
    /// event stream is expected to stay open for the life of the session,
    /// with only a connect timeout guarding the initial dial.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Channel(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Open a subscription to `session_id`'s event stream.
    ///
    /// The connection is established by the background task, so this never
    /// blocks; a failed dial surfaces as the subscription's first (and only)
    /// item, a [`ChannelItem::TransportError`].
    pub fn subscribe(&self, session_id: &str) -> Subscription {
        let url = format!(
            "{}/api/sessions/{}/events",
            self.base_url,
            urlencoding::encode(session_id)
        );
        let client = self.client.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(async move {
            run_stream(client, url, tx).await;
        });

        Subscription {
            rx,
            cancelled,
            handle,
        }
    }
}

/// Pump the SSE response body into the subscription queue until the stream
/// ends or the receiver goes away.
async fn run_stream(client: reqwest::Client, url: String, tx: mpsc::UnboundedSender<ChannelItem>) {
    debug!(url = %url, "Opening event stream");

    let response = match client
        .get(&url)
        .header("Accept", "text/event-stream")
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            let _ = tx.send(ChannelItem::TransportError(format!(
                "Failed to connect to event stream: {}",
                e
            )));
            return;
        }
    };

    if !response.status().is_success() {
        let _ = tx.send(ChannelItem::TransportError(format!(
            "Event stream returned HTTP {}",
            response.status()
        )));
        return;
    }

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(ChannelItem::TransportError(format!(
                    "Event stream read failed: {}",
                    e
                )));
                return;
            }
        };

        for payload in decoder.push(&chunk) {
            match serde_json::from_str::<WireEvent>(&payload) {
                Ok(event) => {
                    if tx.send(ChannelItem::Event(event)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    // A malformed frame is the server's bug, not ours;
                    // skip it and keep the stream alive.
                    warn!(error = %e, "Skipping undecodable event frame");
                }
            }
        }
    }

    let _ = tx.send(ChannelItem::TransportError("Event stream ended".to_string()));
}
