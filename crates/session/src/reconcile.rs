use std::sync::Arc;

use parley_client::ChatBackend;
use snafu::{ResultExt, ensure};

use crate::error::{BackendSnafu, MismatchedSessionSnafu, SessionResult};
use crate::ids::SessionId;
use crate::model::ChatSession;
use crate::store::SessionStore;

/// Replaces an optimistic transcript with the server's record.
///
/// One fetch per call, no retries. On failure the store is left untouched.
#[derive(Clone)]
pub struct Reconciler {
    backend: Arc<dyn ChatBackend>,
}

impl Reconciler {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    pub async fn fetch(&self, session_id: SessionId) -> SessionResult<ChatSession> {
        let stage = "reconcile";
        let record = self
            .backend
            .get_chat(session_id)
            .await
            .context(BackendSnafu { stage })?;
        ensure!(
            record.id == session_id,
            MismatchedSessionSnafu {
                stage,
                expected: session_id,
                actual: record.id,
            }
        );
        Ok(ChatSession::from_record(record))
    }

    pub async fn reconcile(
        &self,
        store: &mut SessionStore,
        session_id: SessionId,
    ) -> SessionResult<ChatSession> {
        let session = self.fetch(session_id).await?;
        tracing::debug!(
            session_id = %session_id,
            messages = session.messages.len(),
            "reconciled transcript"
        );
        store.replace_session(session.clone());
        Ok(session)
    }
}
