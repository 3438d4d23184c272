use std::future::Future;
use std::pin::Pin;

use crate::error::ClientResult;
use crate::stream::{StreamHandle, StreamRequest};
use crate::types::{ChatId, ChatRecord, DocumentUpload, UploadedDocument};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Remote chat service as seen by the session layer.
///
/// `open_stream` only prepares the stream; nothing is sent until the returned
/// worker is polled.
pub trait ChatBackend: Send + Sync {
    fn list_chats(&self) -> BoxFuture<'_, ClientResult<Vec<ChatRecord>>>;
    fn create_chat(&self, title: String) -> BoxFuture<'_, ClientResult<ChatRecord>>;
    fn get_chat(&self, chat_id: ChatId) -> BoxFuture<'_, ClientResult<ChatRecord>>;
    fn delete_chat(&self, chat_id: ChatId) -> BoxFuture<'_, ClientResult<()>>;
    fn upload_document(
        &self,
        upload: DocumentUpload,
    ) -> BoxFuture<'_, ClientResult<UploadedDocument>>;
    fn open_stream(&self, request: StreamRequest) -> ClientResult<StreamHandle>;
    /// Swaps the bearer credential; `None` detaches it.
    fn set_credential(&self, token: Option<String>);
}
