use std::collections::{HashMap, HashSet};

use chrono::Utc;
use snafu::{OptionExt, ensure};

use crate::error::{SendRejectedSnafu, SessionResult, UnknownSessionSnafu};
use crate::ids::{MessageId, SessionId};
use crate::model::{ChatSession, Message, Role};

/// User message and assistant placeholder appended together by one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPair {
    pub user_message_id: MessageId,
    pub assistant_message_id: MessageId,
}

/// In-memory registry of sessions plus the per-session flags the stream
/// lifecycle needs.
///
/// `loading`, the pending marker and `stale` live beside the sessions rather
/// than inside them so that replacing a transcript never has to carry them over.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<SessionId, ChatSession>,
    active_session_id: Option<SessionId>,
    pending: HashMap<SessionId, PendingPair>,
    loading: HashSet<SessionId>,
    stale: HashSet<SessionId>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently updated first; ties fall back to the newer id.
    pub fn list_sessions(&self) -> Vec<&ChatSession> {
        let mut sessions = self.sessions.values().collect::<Vec<_>>();
        sessions.sort_by(|left, right| {
            right
                .updated_at
                .cmp(&left.updated_at)
                .then_with(|| right.id.cmp(&left.id))
        });
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    pub fn session(&self, session_id: SessionId) -> Option<&ChatSession> {
        self.sessions.get(&session_id)
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.active_session_id
    }

    pub fn active(&self) -> Option<&ChatSession> {
        self.active_session_id
            .and_then(|session_id| self.sessions.get(&session_id))
    }

    pub fn set_active(&mut self, session_id: SessionId) -> SessionResult<()> {
        ensure!(
            self.contains(session_id),
            UnknownSessionSnafu {
                stage: "set-active",
                session_id,
            }
        );
        self.active_session_id = Some(session_id);
        Ok(())
    }

    /// Adds a session, overwriting any transcript already held under its id.
    pub fn insert_session(&mut self, session: ChatSession) {
        self.sessions.insert(session.id, session);
    }

    /// Seeds the store from a server listing.
    ///
    /// Sessions missing from the listing are dropped unless a send is pending
    /// on them. A session with a pending pair keeps its local transcript.
    /// Listings that carry no messages mark the session stale so the
    /// transcript is fetched on first visit.
    pub fn load_sessions(&mut self, sessions: Vec<ChatSession>) {
        let listed = sessions
            .iter()
            .map(|session| session.id)
            .collect::<HashSet<_>>();

        self.sessions.retain(|session_id, _| {
            listed.contains(session_id) || self.pending.contains_key(session_id)
        });
        self.loading
            .retain(|session_id| self.sessions.contains_key(session_id) || listed.contains(session_id));
        self.stale.retain(|session_id| listed.contains(session_id));

        for session in sessions {
            let session_id = session.id;
            if self.pending.contains_key(&session_id) {
                tracing::debug!(session_id = %session_id, "keeping local transcript with pending send");
                continue;
            }

            if session.messages.is_empty() {
                match self.sessions.get_mut(&session_id) {
                    Some(existing) if !existing.messages.is_empty() => {
                        existing.title = session.title;
                        existing.created_at = session.created_at;
                        existing.updated_at = session.updated_at;
                    }
                    _ => {
                        self.sessions.insert(session_id, session);
                    }
                }
                self.stale.insert(session_id);
            } else {
                self.sessions.insert(session_id, session);
                self.stale.remove(&session_id);
            }
        }

        let active_missing = self
            .active_session_id
            .is_none_or(|session_id| !self.sessions.contains_key(&session_id));
        if active_missing {
            self.active_session_id = self.most_recent_id();
        }

        tracing::debug!(count = self.sessions.len(), "sessions loaded");
    }

    /// Appends a user message and its assistant placeholder in one step.
    pub fn append_pending(
        &mut self,
        session_id: SessionId,
        user_content: &str,
    ) -> SessionResult<PendingPair> {
        let stage = "append-pending";
        ensure!(
            !self.pending.contains_key(&session_id),
            SendRejectedSnafu { stage, session_id }
        );
        let session = self
            .sessions
            .get_mut(&session_id)
            .context(UnknownSessionSnafu { stage, session_id })?;

        let now = Utc::now();
        let user_message_id = MessageId::new_local();
        let assistant_message_id = user_message_id.assistant_placeholder();

        session.messages.push(Message::new(
            user_message_id.clone(),
            Role::User,
            user_content,
            now,
        ));
        session.messages.push(Message::new(
            assistant_message_id.clone(),
            Role::Assistant,
            String::new(),
            now,
        ));
        session.updated_at = now;

        let pair = PendingPair {
            user_message_id,
            assistant_message_id,
        };
        self.pending.insert(session_id, pair.clone());
        Ok(pair)
    }

    /// Appends streamed text to one message. Returns false when the target is gone.
    pub fn append_delta(
        &mut self,
        session_id: SessionId,
        message_id: &MessageId,
        chunk: &str,
    ) -> bool {
        let Some(message) = self
            .sessions
            .get_mut(&session_id)
            .and_then(|session| session.message_mut(message_id))
        else {
            tracing::warn!(
                session_id = %session_id,
                message_id = %message_id,
                "dropping delta for unknown message"
            );
            return false;
        };

        message.content.push_str(chunk);
        true
    }

    /// Swaps in an authoritative transcript, title and timestamps.
    ///
    /// Inserts the session when it is not held yet.
    pub fn replace_session(&mut self, session: ChatSession) {
        let session_id = session.id;
        self.pending.remove(&session_id);
        self.stale.remove(&session_id);

        match self.sessions.get_mut(&session_id) {
            Some(existing) => {
                existing.title = session.title;
                existing.created_at = session.created_at;
                existing.updated_at = session.updated_at;
                existing.messages = session.messages;
            }
            None => {
                self.sessions.insert(session_id, session);
            }
        }
    }

    /// Removes a session and its flags. If it was active, the next most
    /// recent session becomes active.
    pub fn remove_session(&mut self, session_id: SessionId) -> Option<ChatSession> {
        let removed = self.sessions.remove(&session_id)?;
        self.pending.remove(&session_id);
        self.loading.remove(&session_id);
        self.stale.remove(&session_id);

        if self.active_session_id == Some(session_id) {
            self.active_session_id = self.most_recent_id();
        }

        Some(removed)
    }

    pub fn has_pending(&self, session_id: SessionId) -> bool {
        self.pending.contains_key(&session_id)
    }

    /// Drops the pending marker. Partial content stays in the transcript.
    pub fn settle_pending(&mut self, session_id: SessionId) -> Option<PendingPair> {
        self.pending.remove(&session_id)
    }

    pub fn set_loading(&mut self, session_id: SessionId, loading: bool) {
        if loading {
            self.loading.insert(session_id);
        } else {
            self.loading.remove(&session_id);
        }
    }

    pub fn is_loading(&self, session_id: SessionId) -> bool {
        self.loading.contains(&session_id)
    }

    pub fn mark_stale(&mut self, session_id: SessionId) {
        if self.contains(session_id) {
            self.stale.insert(session_id);
        }
    }

    pub fn is_stale(&self, session_id: SessionId) -> bool {
        self.stale.contains(&session_id)
    }

    fn most_recent_id(&self) -> Option<SessionId> {
        self.list_sessions().first().map(|session| session.id)
    }
}
