use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};

use crate::sse::SseFrame;
use crate::types::{ChatId, SearchResult};

/// Identifier for one streaming generation.
///
/// A fresh value is minted for every send so events from an abandoned stream
/// can be recognized and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl StreamId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Routing key carried by every stream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub chat_id: ChatId,
    pub stream_id: StreamId,
}

impl StreamTarget {
    pub const fn new(chat_id: ChatId, stream_id: StreamId) -> Self {
        Self { chat_id, stream_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub target: StreamTarget,
    pub message: String,
    pub document_id: Option<String>,
    pub search: bool,
}

impl StreamRequest {
    pub fn new(target: StreamTarget, message: impl Into<String>) -> Self {
        Self {
            target,
            message: message.into(),
            document_id: None,
            search: false,
        }
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_search(mut self, search: bool) -> Self {
        self.search = search;
        self
    }

    /// Query parameters for the streaming endpoint. Optional flags are omitted when unset.
    pub fn query_pairs(&self, token: &str) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("message", self.message.clone())];
        if let Some(document_id) = &self.document_id {
            pairs.push(("pdf_id", document_id.clone()));
        }
        if self.search {
            pairs.push(("search", "true".to_string()));
        }
        pairs.push(("token", token.to_string()));
        pairs
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventPayload {
    /// The server accepted the request and the body started.
    Opened,
    Content(String),
    SearchResults(Vec<SearchResult>),
    End,
    /// Error reported in-band by the server.
    ServerError(String),
    /// A frame that could not be decoded; consumers skip it.
    Malformed { raw: String, reason: String },
    /// Transport failure; no further events follow.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEventMapped {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Content {
        content: String,
    },
    SearchResults {
        #[serde(default)]
        results: Vec<SearchResult>,
    },
    End,
    Error {
        #[serde(default)]
        message: String,
    },
}

/// Maps one SSE frame onto a payload. Frames with no data and no name yield nothing.
pub fn decode_frame(frame: &SseFrame) -> Option<StreamEventPayload> {
    if frame.is_named("end") {
        return Some(StreamEventPayload::End);
    }

    let data = frame.data.trim();
    if data.is_empty() {
        return None;
    }

    let payload = match serde_json::from_str::<WireEvent>(data) {
        Ok(WireEvent::Content { content }) => StreamEventPayload::Content(content),
        Ok(WireEvent::SearchResults { results }) => StreamEventPayload::SearchResults(results),
        Ok(WireEvent::End) => StreamEventPayload::End,
        Ok(WireEvent::Error { message }) => StreamEventPayload::ServerError(message),
        Err(error) => StreamEventPayload::Malformed {
            raw: data.to_string(),
            reason: error.to_string(),
        },
    };

    Some(payload)
}

pub type StreamWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Consumer side of one generation.
///
/// Dropping it signals the worker to stop reading the body.
pub struct ChatEventStream {
    events: mpsc::UnboundedReceiver<StreamEventMapped>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct StreamHandle {
    pub stream: ChatEventStream,
    pub worker: StreamWorker,
}

impl ChatEventStream {
    pub async fn recv(&mut self) -> Option<StreamEventMapped> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for ChatEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Producer half handed to a worker.
pub struct StreamSender {
    target: StreamTarget,
    events: mpsc::UnboundedSender<StreamEventMapped>,
}

impl StreamSender {
    pub fn target(&self) -> StreamTarget {
        self.target
    }

    /// Returns false once the consumer is gone.
    pub fn send(&self, payload: StreamEventPayload) -> bool {
        self.events
            .send(StreamEventMapped {
                target: self.target,
                payload,
            })
            .is_ok()
    }
}

/// Builds a connected stream triple for `target`.
pub fn make_event_stream(
    target: StreamTarget,
) -> (ChatEventStream, StreamSender, oneshot::Receiver<()>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let stream = ChatEventStream {
        events: event_rx,
        cancel_tx: Some(cancel_tx),
    };
    let sender = StreamSender {
        target,
        events: event_tx,
    };
    (stream, sender, cancel_rx)
}
