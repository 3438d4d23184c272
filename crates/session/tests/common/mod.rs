#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use parley_client::{
    BoxFuture, ChatBackend, ChatId, ChatRecord, ClientError, ClientResult, DocumentUpload,
    MessageRecord, StreamEventPayload, StreamHandle, StreamRequest, StreamSender,
    UploadedDocument, make_event_stream,
};

pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + Duration::minutes(minutes)
}

#[derive(Default)]
struct FakeState {
    chats: BTreeMap<i64, ChatRecord>,
    next_chat_id: i64,
    next_message_id: i64,
    requests: Vec<StreamRequest>,
    senders: Vec<Option<StreamSender>>,
    uploads: Vec<String>,
    credential: Option<String>,
    fail_fetches: bool,
    fetch_delay: Option<StdDuration>,
    fail_open: bool,
    get_calls: usize,
    deleted: Vec<i64>,
}

/// In-process backend whose streams are driven by the test.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let backend = Self::default();
        backend.state().next_chat_id = 100;
        backend.state().next_message_id = 1000;
        Arc::new(backend)
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add_chat(&self, id: i64, title: &str, updated_minutes: i64) {
        self.state().chats.insert(
            id,
            ChatRecord {
                id: ChatId::new(id),
                title: title.to_string(),
                created_at: at(0),
                updated_at: at(updated_minutes),
                messages: Vec::new(),
            },
        );
    }

    /// Sets what a canonical fetch of `id` returns.
    pub fn set_transcript(&self, id: i64, messages: &[(&str, &str)]) {
        let mut state = self.state();
        let mut records = Vec::new();
        for (role, content) in messages {
            state.next_message_id += 1;
            records.push(MessageRecord {
                id: state.next_message_id,
                chat_id: ChatId::new(id),
                role: role.to_string(),
                content: content.to_string(),
                created_at: at(1),
            });
        }
        if let Some(chat) = state.chats.get_mut(&id) {
            chat.messages = records;
        }
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.state().fail_fetches = fail;
    }

    /// Makes every `get_chat` wait before answering.
    pub fn delay_fetches(&self, delay: StdDuration) {
        self.state().fetch_delay = Some(delay);
    }

    pub fn fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.state().requests.clone()
    }

    pub fn get_calls(&self) -> usize {
        self.state().get_calls
    }

    pub fn credential(&self) -> Option<String> {
        self.state().credential.clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.state().uploads.clone()
    }

    pub fn deleted(&self) -> Vec<i64> {
        self.state().deleted.clone()
    }

    /// Pushes one event into stream `index`. Returns false once the consumer is gone.
    pub fn emit(&self, index: usize, payload: StreamEventPayload) -> bool {
        self.state()
            .senders
            .get(index)
            .and_then(Option::as_ref)
            .is_some_and(|sender| sender.send(payload))
    }

    pub fn content(&self, index: usize, text: &str) -> bool {
        self.emit(index, StreamEventPayload::Content(text.to_string()))
    }

    /// Ends stream `index` without a terminal event.
    pub fn close(&self, index: usize) {
        if let Some(sender) = self.state().senders.get_mut(index) {
            sender.take();
        }
    }
}

impl ChatBackend for FakeBackend {
    fn list_chats(&self) -> BoxFuture<'_, ClientResult<Vec<ChatRecord>>> {
        Box::pin(async move {
            let mut chats = self
                .state()
                .chats
                .values()
                .map(|chat| ChatRecord {
                    messages: Vec::new(),
                    ..chat.clone()
                })
                .collect::<Vec<_>>();
            chats.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
            Ok(chats)
        })
    }

    fn create_chat(&self, title: String) -> BoxFuture<'_, ClientResult<ChatRecord>> {
        Box::pin(async move {
            let mut state = self.state();
            state.next_chat_id += 1;
            let record = ChatRecord {
                id: ChatId::new(state.next_chat_id),
                title,
                created_at: at(60),
                updated_at: at(60),
                messages: Vec::new(),
            };
            state.chats.insert(record.id.0, record.clone());
            Ok(record)
        })
    }

    fn get_chat(&self, chat_id: ChatId) -> BoxFuture<'_, ClientResult<ChatRecord>> {
        Box::pin(async move {
            let delay = {
                let mut state = self.state();
                state.get_calls += 1;
                state.fetch_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let state = self.state();
            if state.fail_fetches {
                return Err(ClientError::HttpStatus {
                    stage: "get-chat",
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            state
                .chats
                .get(&chat_id.0)
                .cloned()
                .ok_or(ClientError::HttpStatus {
                    stage: "get-chat",
                    status: 404,
                    body: "Chat not found".to_string(),
                })
        })
    }

    fn delete_chat(&self, chat_id: ChatId) -> BoxFuture<'_, ClientResult<()>> {
        Box::pin(async move {
            let mut state = self.state();
            state.chats.remove(&chat_id.0);
            state.deleted.push(chat_id.0);
            Ok(())
        })
    }

    fn upload_document(
        &self,
        upload: DocumentUpload,
    ) -> BoxFuture<'_, ClientResult<UploadedDocument>> {
        Box::pin(async move {
            let mut state = self.state();
            state.uploads.push(upload.file_name.clone());
            Ok(UploadedDocument {
                id: format!("doc-{}", state.uploads.len()),
                filename: upload.file_name,
                status: "processed".to_string(),
            })
        })
    }

    fn open_stream(&self, request: StreamRequest) -> ClientResult<StreamHandle> {
        let mut state = self.state();
        if state.fail_open {
            return Err(ClientError::Unauthorized {
                stage: "open-stream",
                reason: "no credential attached",
            });
        }

        let (stream, sender, cancel_rx) = make_event_stream(request.target);
        state.requests.push(request);
        state.senders.push(Some(sender));
        let worker = Box::pin(async move {
            let _ = cancel_rx.await;
        });
        Ok(StreamHandle { stream, worker })
    }

    fn set_credential(&self, token: Option<String>) {
        self.state().credential = token;
    }
}
