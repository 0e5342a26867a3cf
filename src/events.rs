//! Event Stream Emitter (§4.8): the tagged event vocabulary the Supervisor
//! Orchestrator and Builder Flow emit, each carrying a monotonically
//! increasing sequence number.
//!
//! Grounded on `event.rs`'s tagged-enum `EventHandler` shape and
//! `virtues-os-virtues/apps/tollbooth/src/routes/streaming.rs`'s
//! channel-to-SSE wiring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

/// Status of a single browser action within a `browser_action` event.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrowserActionStatus {
    Navigating,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    Status { message: String },
    ToolCall { tool: String, input_preview: String },
    ToolResult { tool: String, elapsed_ms: u64, preview: String },
    ToolError { tool: String, elapsed_ms: u64, preview: String },
    BrowserAction {
        status: BrowserActionStatus,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        actions: Option<Vec<String>>,
    },
    Chunk { text: String },
    /// `content` is the stringified JSON payload for the builder flow's
    /// terminal artifact (§4.10): kept as a string, not a nested object, to
    /// match the original wire contract verbatim.
    Actions { content: String },
    Error { message: String },
    Done,
}

/// One framed record in the event stream: a body plus the sequence number
/// assigned at send time (§4.8, §8 property 2).
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub seq: u64,
    #[serde(flatten)]
    pub body: EventBody,
}

/// Request-scoped emitter: wraps an `mpsc::Sender<Event>` and stamps each
/// body with the next sequence number. Cloneable so the supervisor loop and
/// any spawned sub-tasks (e.g. a heartbeat) can share one logical stream.
#[derive(Clone)]
pub struct EventEmitter {
    sender: mpsc::Sender<Event>,
    next_seq: Arc<AtomicU64>,
}

impl EventEmitter {
    /// Creates a bounded channel pair; `capacity` bounds how far the
    /// producer can run ahead of a slow consumer.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender,
                next_seq: Arc::new(AtomicU64::new(0)),
            },
            receiver,
        )
    }

    /// Sends `body`, stamping it with the next sequence number. Silently
    /// drops the event if the receiver has already gone away (client
    /// disconnect) — per §4.9, already-emitted events are not rolled back
    /// and there is nothing further to do with an event nobody will read.
    pub async fn emit(&self, body: EventBody) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let _ = self.sender.send(Event { seq, body }).await;
    }

    pub async fn status(&self, message: impl Into<String>) {
        self.emit(EventBody::Status { message: message.into() }).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.emit(EventBody::Error { message: message.into() }).await;
    }

    pub async fn done(&self) {
        self.emit(EventBody::Done).await;
    }

    /// Sends a heartbeat status, reporting whether anyone is still
    /// listening. Used by the Request Edge's periodic heartbeat task
    /// (§4.9) instead of axum's built-in SSE keep-alive, so idle
    /// connections are distinguishable from stalled ones by their repeated
    /// `status` events rather than a framework-level comment ping.
    pub async fn send_heartbeat(&self) -> bool {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.sender
            .send(Event {
                seq,
                body: EventBody::Status { message: "heartbeat".to_string() },
            })
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitted_events_carry_strictly_increasing_sequence_numbers() {
        let (emitter, mut receiver) = EventEmitter::channel(8);
        emitter.status("a").await;
        emitter.status("b").await;
        emitter.done().await;
        drop(emitter);

        let mut seqs = Vec::new();
        while let Some(event) = receiver.recv().await {
            seqs.push(event.seq);
        }
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn emit_after_receiver_drop_does_not_panic() {
        let (emitter, receiver) = EventEmitter::channel(1);
        drop(receiver);
        emitter.status("no one is listening").await;
    }
}
