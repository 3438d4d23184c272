use parley_client::ClientError;
use snafu::Snafu;

use crate::controller::StreamTransitionRejection;
use crate::ids::SessionId;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("session {session_id} is not known on `{stage}`"))]
    UnknownSession {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("no active session on `{stage}`"))]
    NoActiveSession { stage: &'static str },
    #[snafu(display("refusing to send an empty message"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("session {session_id} is still waiting for a reply"))]
    SendRejected {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("session {session_id} has a stream in flight on `{stage}`"))]
    StreamInFlight {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("illegal stream transition on `{stage}`: {rejection:?}"))]
    Transition {
        stage: &'static str,
        rejection: StreamTransitionRejection,
    },
    #[snafu(display("backend call failed on `{stage}`, {source}"))]
    Backend {
        stage: &'static str,
        source: ClientError,
    },
    #[snafu(display("fetched session {actual} while reconciling {expected}"))]
    MismatchedSession {
        stage: &'static str,
        expected: SessionId,
        actual: SessionId,
    },
}

impl SessionError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Backend { source, .. } if source.is_unauthorized())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
