//! Streaming chat session core.
//!
//! [`SessionStore`] holds the transcripts, [`ModeConfig`] shapes outgoing
//! requests, [`StreamController`] drives one send through its lifecycle and
//! [`Reconciler`] swaps in the server's transcript once a reply ends.
//! [`ChatCoordinator`] owns all of them and is what a shell talks to.

mod controller;
mod coordinator;
mod error;
mod ids;
mod mode;
mod model;
mod notice;
mod reconcile;
mod store;

pub use controller::{
    Directive, StreamController, StreamState, StreamTransition, StreamTransitionRejection,
    StreamTransitionResult,
};
pub use coordinator::{ChatCoordinator, CoordinatorUpdate, DEFAULT_CHAT_TITLE};
pub use error::{SessionError, SessionResult};
pub use ids::{MessageId, SessionId};
pub use mode::{ModeConfig, ModeSnapshot};
pub use model::{ChatSession, Message, Role};
pub use notice::{Notice, NoticeLevel};
pub use reconcile::Reconciler;
pub use store::{PendingPair, SessionStore};
