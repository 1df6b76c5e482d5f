//! # Live Socket Driver
//!
//! Runs one WebSocket connection to a live telemetry source on a Tokio task.
//! Inbound text goes to a [`LiveEvents`] sink tagged with the source that
//! opened it; outbound text is queued on an unbounded channel and written
//! best-effort.
//!
//! When a device id is given the driver joins that device's relay group with
//! a `subscribe` message right after the handshake, before anything queued on
//! the handle.
//!
//! The task holds only a weak reference to its sink and stops when the sink
//! is gone or the socket ends. Closing the handle stops it too.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Weak;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::state::{SourceTag, DISCONNECTED_MESSAGE};
use crate::telemetry::types::ControlsDelta;

/// Receiver of socket lifecycle and payload notifications.
pub trait LiveEvents: Send + Sync + 'static {
    /// The socket finished its handshake.
    fn opened(&self, tag: SourceTag);

    /// A text payload arrived.
    fn payload(&self, tag: SourceTag, text: &str);

    /// The socket failed or closed. No further calls follow for `tag`.
    fn failed(&self, tag: SourceTag, message: String);
}

/// Outbound message to a live source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveMessage {
    /// Join the relay group of a device
    #[serde(rename_all = "camelCase")]
    Subscribe { device_id: String },
    /// Control intent carrying only the changed fields
    #[serde(rename_all = "camelCase")]
    Control {
        ts: i64,
        device_id: String,
        controls: ControlsDelta,
    },
}

/// Handle to a running live connection.
#[derive(Debug)]
pub struct LiveHandle {
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

fn encode(message: &LiveMessage) -> Option<String> {
    serde_json::to_string(message)
        .map_err(|e| warn!("Failed to encode live message: {}", e))
        .ok()
}

impl LiveHandle {
    /// Queue a message for the socket. Returns false once the task has ended.
    pub fn send(&self, message: &LiveMessage) -> bool {
        encode(message).is_some_and(|text| self.outbound.send(text).is_ok())
    }

    /// Close the socket immediately.
    pub fn close(self) {}
}

impl Drop for LiveHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Open `url` on a new task, subscribing to `device_id` once open. Must be
/// called from within a Tokio runtime.
pub fn spawn<S: LiveEvents>(url: String, device_id: Option<String>, tag: SourceTag, sink: Weak<S>) -> LiveHandle {
    let (outbound, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(drive(url, device_id, tag, sink, rx));
    LiveHandle { outbound, task }
}

fn notify<S: LiveEvents>(sink: &Weak<S>, event: impl FnOnce(&S)) -> bool {
    match sink.upgrade() {
        Some(sink) => {
            event(&sink);
            true
        }
        None => false,
    }
}

async fn drive<S: LiveEvents>(
    url: String,
    device_id: Option<String>,
    tag: SourceTag,
    sink: Weak<S>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!("Live connection to {} failed: {}", url, e);
            notify(&sink, |s| s.failed(tag, format!("Connection error: {}", e)));
            return;
        }
    };

    info!("Live connection to {} open", url);
    if !notify(&sink, |s| s.opened(tag)) {
        return;
    }

    let (mut write, mut read) = stream.split();
    let subscribe = device_id.map(|device_id| LiveMessage::Subscribe { device_id });
    if let Some(text) = subscribe.as_ref().and_then(encode) {
        if let Err(e) = write.send(Message::Text(text)).await {
            warn!("Live subscribe on {} failed: {}", url, e);
            notify(&sink, |s| s.failed(tag, format!("Connection error: {}", e)));
            return;
        }
        debug!("Subscribed to device group on {}", url);
    }

    loop {
        tokio::select! {
            incoming = read.next() => {
                let delivered = match incoming {
                    Some(Ok(Message::Text(text))) => notify(&sink, |s| s.payload(tag, &text)),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => notify(&sink, |s| s.payload(tag, &text)),
                        Err(_) => {
                            debug!("Dropping non UTF-8 binary message from {}", url);
                            true
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Live connection to {} closed", url);
                        notify(&sink, |s| s.failed(tag, DISCONNECTED_MESSAGE.to_string()));
                        break;
                    }
                    Some(Ok(_)) => true,
                    Some(Err(e)) => {
                        warn!("Live connection to {} failed: {}", url, e);
                        notify(&sink, |s| s.failed(tag, format!("Connection error: {}", e)));
                        break;
                    }
                };
                if !delivered {
                    break;
                }
            }
            Some(text) = outbound.recv() => {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!("Live send to {} failed: {}", url, e);
                    notify(&sink, |s| s.failed(tag, format!("Connection error: {}", e)));
                    break;
                }
            }
        }
    }
}
