//! HTTP transport for the chat service: REST calls for chat records and
//! document ingestion, plus the server-sent event stream that carries
//! assistant output.

mod backend;
mod error;
mod http;
mod sse;
mod stream;
mod types;

pub use backend::{BoxFuture, ChatBackend};
pub use error::{ClientError, ClientResult};
pub use http::{ClientConfig, HttpChatBackend};
pub use sse::{SseDecoder, SseFrame};
pub use stream::{
    ChatEventStream, StreamEventMapped, StreamEventPayload, StreamHandle, StreamId,
    StreamRequest, StreamSender, StreamTarget, StreamWorker, decode_frame, make_event_stream,
};
pub use types::{
    ChatId, ChatRecord, DocumentUpload, MessageRecord, NewChat, SearchResult, UploadedDocument,
    parse_timestamp,
};
