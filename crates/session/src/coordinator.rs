use std::sync::Arc;

use parley_client::{
    ChatBackend, ChatEventStream, DocumentUpload, SearchResult, StreamId, StreamRequest,
    StreamTarget, UploadedDocument,
};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::task::JoinHandle;

use crate::controller::{Directive, StreamController, StreamState};
use crate::error::{
    BackendSnafu, EmptyMessageSnafu, NoActiveSessionSnafu, SendRejectedSnafu, SessionResult,
    StreamInFlightSnafu, UnknownSessionSnafu,
};
use crate::ids::{MessageId, SessionId};
use crate::mode::ModeConfig;
use crate::model::ChatSession;
use crate::notice::Notice;
use crate::reconcile::Reconciler;
use crate::store::SessionStore;

pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Outcome of applying one stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorUpdate {
    Opened {
        session_id: SessionId,
    },
    Delta {
        session_id: SessionId,
        message_id: MessageId,
        text: String,
    },
    SearchResults {
        session_id: SessionId,
        results: Vec<SearchResult>,
    },
    Reconciled {
        session_id: SessionId,
    },
    ReconcileFailed {
        session_id: SessionId,
        notice: Notice,
    },
    StreamFailed {
        session_id: SessionId,
        message: String,
        notice: Notice,
    },
    /// The event changed nothing: malformed or a duplicate.
    Dropped {
        target: StreamTarget,
    },
}

struct ActiveStream {
    controller: StreamController,
    stream: ChatEventStream,
    worker: JoinHandle<()>,
}

/// Single owner of the session state and at most one in-flight stream.
///
/// Every mutation happens through `&mut self`, so stream events are applied
/// one at a time in delivery order.
pub struct ChatCoordinator {
    backend: Arc<dyn ChatBackend>,
    reconciler: Reconciler,
    store: SessionStore,
    modes: ModeConfig,
    active_stream: Option<ActiveStream>,
    /// Finished stream whose transcript fetch has not resolved yet.
    reconciling: Option<StreamController>,
    last_state: StreamState,
    next_stream_id: u64,
    default_title: String,
}

impl ChatCoordinator {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            reconciler: Reconciler::new(backend.clone()),
            backend,
            store: SessionStore::new(),
            modes: ModeConfig::default(),
            active_stream: None,
            reconciling: None,
            last_state: StreamState::Idle,
            next_stream_id: 1,
            default_title: DEFAULT_CHAT_TITLE.to_string(),
        }
    }

    pub fn with_default_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        if !title.trim().is_empty() {
            self.default_title = title.trim().to_string();
        }
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn modes(&self) -> &ModeConfig {
        &self.modes
    }

    pub fn active_session(&self) -> Option<&ChatSession> {
        self.store.active()
    }

    /// True until the current stream is fully settled, including the
    /// transcript fetch that follows a completed reply.
    pub fn is_streaming(&self) -> bool {
        self.current_controller().is_some()
    }

    pub fn streaming_session(&self) -> Option<SessionId> {
        self.current_controller()
            .map(|controller| controller.target().chat_id)
    }

    /// Request of the in-flight stream, as captured when it started.
    pub fn active_request(&self) -> Option<&StreamRequest> {
        self.current_controller()
            .map(|controller| controller.request())
    }

    /// State of the in-flight stream, or of the last one to finish.
    pub fn stream_state(&self) -> &StreamState {
        self.current_controller()
            .map(|controller| controller.state())
            .unwrap_or(&self.last_state)
    }

    fn current_controller(&self) -> Option<&StreamController> {
        self.active_stream
            .as_ref()
            .map(|active| &active.controller)
            .or(self.reconciling.as_ref())
    }

    pub fn set_credential(&self, token: Option<String>) {
        self.backend.set_credential(token);
    }

    pub fn set_document_grounding(&mut self, enabled: bool) {
        self.modes.set_document_grounding(enabled);
    }

    pub fn toggle_web_search(&mut self) -> bool {
        self.modes.toggle_web_search()
    }

    /// Reloads the session list and hydrates the active session if needed.
    pub async fn refresh_sessions(&mut self) -> SessionResult<usize> {
        let records = self
            .backend
            .list_chats()
            .await
            .context(BackendSnafu {
                stage: "refresh-sessions",
            })?;
        let sessions = records
            .into_iter()
            .map(ChatSession::from_record)
            .collect::<Vec<_>>();
        self.store.load_sessions(sessions);

        if let Some(session_id) = self.store.active_session_id()
            && let Err(error) = self.hydrate(session_id).await
        {
            tracing::warn!(session_id = %session_id, error = %error, "failed to load active session");
        }

        tracing::info!(count = self.store.len(), "session list refreshed");
        Ok(self.store.len())
    }

    /// Creates a session, makes it active and resets the request modes.
    pub async fn create_session(&mut self, title: Option<String>) -> SessionResult<SessionId> {
        let title = title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| self.default_title.clone());
        let record = self
            .backend
            .create_chat(title)
            .await
            .context(BackendSnafu {
                stage: "create-session",
            })?;

        self.cancel_active_stream("create-session");
        let session = ChatSession::from_record(record);
        let session_id = session.id;
        self.store.insert_session(session);
        self.store.set_active(session_id)?;
        self.modes.reset();

        tracing::info!(session_id = %session_id, "session created");
        Ok(session_id)
    }

    /// Switches the active session. A stream on another session is cancelled;
    /// a stale target is reconciled before returning.
    pub async fn select_session(&mut self, session_id: SessionId) -> SessionResult<()> {
        ensure!(
            self.store.contains(session_id),
            UnknownSessionSnafu {
                stage: "select-session",
                session_id,
            }
        );

        if self
            .streaming_session()
            .is_some_and(|streaming| streaming != session_id)
        {
            self.cancel_active_stream("select-session");
        }

        self.store.set_active(session_id)?;
        self.hydrate(session_id).await
    }

    /// Deletes a session on the server, then locally. Its stream is cancelled first.
    pub async fn delete_session(&mut self, session_id: SessionId) -> SessionResult<Option<SessionId>> {
        ensure!(
            self.store.contains(session_id),
            UnknownSessionSnafu {
                stage: "delete-session",
                session_id,
            }
        );

        if self.streaming_session() == Some(session_id) {
            self.cancel_active_stream("delete-session");
        }

        self.backend
            .delete_chat(session_id)
            .await
            .context(BackendSnafu {
                stage: "delete-session",
            })?;
        self.store.remove_session(session_id);
        tracing::info!(session_id = %session_id, "session deleted");

        let next_active = self.store.active_session_id();
        if let Some(next) = next_active
            && let Err(error) = self.hydrate(next).await
        {
            tracing::warn!(session_id = %next, error = %error, "failed to load next session");
        }

        Ok(next_active)
    }

    /// Fetches the authoritative transcript of an idle session.
    pub async fn refresh_session(&mut self, session_id: SessionId) -> SessionResult<()> {
        let stage = "refresh-session";
        ensure!(
            self.store.contains(session_id),
            UnknownSessionSnafu { stage, session_id }
        );
        ensure!(
            self.streaming_session() != Some(session_id),
            StreamInFlightSnafu { stage, session_id }
        );

        self.reconciler.reconcile(&mut self.store, session_id).await?;
        Ok(())
    }

    /// Uploads a document and grounds later sends on it, creating a session
    /// first when none is active.
    pub async fn upload_document(
        &mut self,
        upload: DocumentUpload,
    ) -> SessionResult<UploadedDocument> {
        let file_name = upload.file_name.clone();
        let document = self
            .backend
            .upload_document(upload)
            .await
            .context(BackendSnafu {
                stage: "upload-document",
            })?;

        if self.store.active().is_none() {
            self.create_session(None).await?;
        }
        self.modes.attach_document(document.id.clone());

        tracing::info!(
            file_name = %file_name,
            document_id = %document.id,
            status = %document.status,
            "document attached"
        );
        Ok(document)
    }

    /// Appends the pending pair to the active session and opens its stream.
    pub async fn send(&mut self, text: &str) -> SessionResult<StreamTarget> {
        let stage = "send";
        ensure!(!text.trim().is_empty(), EmptyMessageSnafu { stage });
        let session_id = self
            .store
            .active_session_id()
            .context(NoActiveSessionSnafu { stage })?;
        ensure!(
            !self.store.has_pending(session_id) && !self.is_streaming(),
            SendRejectedSnafu { stage, session_id }
        );

        let pair = self.store.append_pending(session_id, text)?;
        let target = StreamTarget::new(session_id, StreamId::new(self.next_stream_id));
        self.next_stream_id += 1;

        let controller = match StreamController::begin(target, pair, text, &self.modes.snapshot()) {
            Ok(controller) => controller,
            Err(error) => {
                self.store.settle_pending(session_id);
                return Err(error);
            }
        };

        let handle = match self.backend.open_stream(controller.request().clone()) {
            Ok(handle) => handle,
            Err(source) => {
                tracing::warn!(session_id = %session_id, error = %source, "failed to open stream");
                self.store.settle_pending(session_id);
                self.last_state = StreamState::Errored {
                    message: source.to_string(),
                };
                return Err(source).context(BackendSnafu { stage });
            }
        };

        let worker = tokio::spawn(handle.worker);
        self.active_stream = Some(ActiveStream {
            controller,
            stream: handle.stream,
            worker,
        });

        tracing::debug!(target = ?target, "stream started");
        Ok(target)
    }

    /// Waits for the next event of the in-flight stream and applies it.
    ///
    /// Returns `None` when no stream is in flight.
    ///
    /// Cancel-safe: dropping the future loses no event, and a transcript fetch
    /// interrupted this way is issued again on the next call.
    pub async fn next_update(&mut self) -> Option<CoordinatorUpdate> {
        if self.reconciling.is_some() {
            return self.resume_reconcile().await;
        }

        let active = self.active_stream.as_mut()?;
        let target = active.controller.target();

        // Each stream owns its channel, so every event carries `target`.
        let directive = match active.stream.recv().await {
            Some(event) => active.controller.on_event(event.payload),
            None => active.controller.on_stream_closed(),
        };

        let update = self.execute(target, directive).await;
        if update.is_none() {
            // Channel closed with nothing left to do.
            self.finish_stream();
        }
        update
    }

    async fn execute(
        &mut self,
        target: StreamTarget,
        directive: Directive,
    ) -> Option<CoordinatorUpdate> {
        let session_id = target.chat_id;
        let update = match directive {
            Directive::None => {
                let closed = self
                    .active_stream
                    .as_ref()
                    .is_none_or(|active| active.controller.state().is_terminal());
                if closed {
                    return None;
                }
                CoordinatorUpdate::Dropped { target }
            }
            Directive::MarkLoading => {
                self.store.set_loading(session_id, true);
                CoordinatorUpdate::Opened { session_id }
            }
            Directive::AppendDelta { message_id, text } => {
                self.store.append_delta(session_id, &message_id, &text);
                CoordinatorUpdate::Delta {
                    session_id,
                    message_id,
                    text,
                }
            }
            Directive::SurfaceSearchResults(results) => {
                tracing::debug!(session_id = %session_id, count = results.len(), "search results");
                CoordinatorUpdate::SearchResults {
                    session_id,
                    results,
                }
            }
            Directive::Fail { message } => {
                self.finish_stream();
                self.store.settle_pending(session_id);
                self.store.set_loading(session_id, false);
                CoordinatorUpdate::StreamFailed {
                    session_id,
                    message,
                    notice: Notice::stream_failed(),
                }
            }
            Directive::Reconcile => {
                // The connection is closed before the fetch so no further event is read.
                if let Some(finished) = self.finish_stream() {
                    finished.worker.abort();
                    self.reconciling = Some(finished.controller);
                }
                return self.resume_reconcile().await;
            }
        };

        Some(update)
    }

    /// Fetches the transcript of the finished stream. The controller stays in
    /// `reconciling` until the fetch resolves.
    async fn resume_reconcile(&mut self) -> Option<CoordinatorUpdate> {
        let session_id = self.reconciling.as_ref()?.target().chat_id;
        let result = self.reconciler.reconcile(&mut self.store, session_id).await;

        let mut finished = self.reconciling.take()?;
        finished.on_reconciled();
        self.last_state = finished.state().clone();
        self.store.set_loading(session_id, false);

        let update = match result {
            Ok(_) => CoordinatorUpdate::Reconciled { session_id },
            Err(error) => {
                tracing::warn!(session_id = %session_id, error = %error, "reconciliation failed");
                self.store.settle_pending(session_id);
                CoordinatorUpdate::ReconcileFailed {
                    session_id,
                    notice: Notice::reconcile_failed(),
                }
            }
        };
        Some(update)
    }

    /// Detaches the in-flight stream and closes its connection.
    fn finish_stream(&mut self) -> Option<ActiveStream> {
        let mut active = self.active_stream.take()?;
        active.stream.cancel();
        self.last_state = active.controller.state().clone();
        Some(active)
    }

    /// Stops the in-flight stream on a session switch. Partial content stays;
    /// the session is marked stale so it is fetched on the next visit.
    fn cancel_active_stream(&mut self, stage: &'static str) {
        let session_id = if let Some(mut active) = self.active_stream.take() {
            active.controller.cancel();
            active.stream.cancel();
            active.worker.abort();
            self.last_state = active.controller.state().clone();
            active.controller.target().chat_id
        } else if let Some(finished) = self.reconciling.take() {
            // The reply is complete; the stale mark fetches it on the next visit.
            self.last_state = StreamState::Cancelled;
            finished.target().chat_id
        } else {
            return;
        };

        self.store.settle_pending(session_id);
        self.store.set_loading(session_id, false);
        self.store.mark_stale(session_id);
        tracing::info!(session_id = %session_id, stage, "stream cancelled");
    }

    async fn hydrate(&mut self, session_id: SessionId) -> SessionResult<()> {
        if !self.store.is_stale(session_id) || self.store.is_loading(session_id) {
            return Ok(());
        }
        self.reconciler.reconcile(&mut self.store, session_id).await?;
        Ok(())
    }
}

impl Drop for ChatCoordinator {
    fn drop(&mut self) {
        if let Some(active) = self.active_stream.take() {
            active.worker.abort();
        }
    }
}
