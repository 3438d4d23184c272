use parley_client::{SearchResult, StreamEventPayload, StreamRequest, StreamTarget};
use snafu::ensure;

use crate::error::{EmptyMessageSnafu, SessionResult, TransitionSnafu};
use crate::ids::MessageId;
use crate::mode::ModeSnapshot;
use crate::store::PendingPair;

/// Lifecycle of one send.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Sending,
    Streaming,
    Finalizing,
    Closed,
    Errored {
        message: String,
    },
    Cancelled,
}

/// State transition input for the stream lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    Send,
    Open,
    End,
    Fail { message: String },
    Cancel,
    Reconciled,
}

/// Rejection reason for illegal stream transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyStarted { state: StreamState },
    NotInFlight { state: StreamState },
    NotFinalizing { state: StreamState },
}

pub type StreamTransitionResult = Result<StreamState, StreamTransitionRejection>;

impl StreamState {
    /// True while the connection may still deliver events.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Sending | Self::Streaming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored { .. } | Self::Cancelled)
    }

    /// Applies one transition deterministically.
    ///
    /// `End` is idempotent once the stream is finalizing or closed.
    pub fn apply(&self, transition: StreamTransition) -> StreamTransitionResult {
        match transition {
            StreamTransition::Send => match self {
                Self::Idle => Ok(Self::Sending),
                _ => Err(StreamTransitionRejection::AlreadyStarted {
                    state: self.clone(),
                }),
            },
            StreamTransition::Open => match self {
                Self::Sending => Ok(Self::Streaming),
                _ => Err(self.not_in_flight()),
            },
            StreamTransition::End => match self {
                Self::Streaming => Ok(Self::Finalizing),
                Self::Finalizing | Self::Closed => Ok(self.clone()),
                _ => Err(self.not_in_flight()),
            },
            StreamTransition::Fail { message } if self.is_in_flight() => {
                Ok(Self::Errored { message })
            }
            StreamTransition::Cancel if self.is_in_flight() => Ok(Self::Cancelled),
            StreamTransition::Fail { .. } | StreamTransition::Cancel => Err(self.not_in_flight()),
            StreamTransition::Reconciled => match self {
                Self::Finalizing => Ok(Self::Closed),
                _ => Err(StreamTransitionRejection::NotFinalizing {
                    state: self.clone(),
                }),
            },
        }
    }

    fn not_in_flight(&self) -> StreamTransitionRejection {
        StreamTransitionRejection::NotInFlight {
            state: self.clone(),
        }
    }
}

/// Side effect the coordinator performs on behalf of the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    None,
    MarkLoading,
    AppendDelta { message_id: MessageId, text: String },
    SurfaceSearchResults(Vec<SearchResult>),
    /// Close the connection and fetch the authoritative transcript.
    Reconcile,
    /// Close the connection, clear loading and surface the failure.
    Fail { message: String },
}

/// Drives one send through `Sending -> Streaming -> Finalizing -> Closed`.
///
/// The controller never touches the store or the network; each callback
/// answers with a [`Directive`].
#[derive(Debug, Clone)]
pub struct StreamController {
    target: StreamTarget,
    pair: PendingPair,
    request: StreamRequest,
    state: StreamState,
}

impl StreamController {
    /// Starts a send. Mode flags are read once, here.
    pub fn begin(
        target: StreamTarget,
        pair: PendingPair,
        message: &str,
        modes: &ModeSnapshot,
    ) -> SessionResult<Self> {
        ensure!(
            !message.trim().is_empty(),
            EmptyMessageSnafu {
                stage: "begin-stream"
            }
        );

        let state = StreamState::Idle
            .apply(StreamTransition::Send)
            .map_err(|rejection| {
                TransitionSnafu {
                    stage: "begin-stream",
                    rejection,
                }
                .build()
            })?;
        let request = modes.apply_to(StreamRequest::new(target, message));

        tracing::debug!(
            target = ?target,
            grounded = request.document_id.is_some(),
            search = request.search,
            "stream controller started"
        );

        Ok(Self {
            target,
            pair,
            request,
            state,
        })
    }

    pub fn target(&self) -> StreamTarget {
        self.target
    }

    pub fn pair(&self) -> &PendingPair {
        &self.pair
    }

    pub fn request(&self) -> &StreamRequest {
        &self.request
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn on_opened(&mut self) -> Directive {
        match self.transition(StreamTransition::Open) {
            Ok(()) => Directive::MarkLoading,
            Err(rejection) => {
                tracing::warn!(target = ?self.target, rejection = ?rejection, "ignoring open");
                Directive::None
            }
        }
    }

    /// Applies one decoded event.
    pub fn on_event(&mut self, payload: StreamEventPayload) -> Directive {
        match payload {
            StreamEventPayload::Opened => self.on_opened(),
            StreamEventPayload::Content(text) => {
                if self.state != StreamState::Streaming {
                    tracing::warn!(target = ?self.target, state = ?self.state, "content outside streaming");
                    return Directive::None;
                }
                Directive::AppendDelta {
                    message_id: self.pair.assistant_message_id.clone(),
                    text,
                }
            }
            StreamEventPayload::SearchResults(results) => {
                if self.state != StreamState::Streaming {
                    return Directive::None;
                }
                Directive::SurfaceSearchResults(results)
            }
            StreamEventPayload::End => match self.state {
                StreamState::Streaming => match self.transition(StreamTransition::End) {
                    Ok(()) => Directive::Reconcile,
                    Err(_) => Directive::None,
                },
                StreamState::Finalizing | StreamState::Closed => {
                    tracing::debug!(target = ?self.target, "duplicate end ignored");
                    Directive::None
                }
                _ => {
                    tracing::warn!(target = ?self.target, state = ?self.state, "end outside streaming");
                    Directive::None
                }
            },
            StreamEventPayload::ServerError(message) => {
                let message = if message.trim().is_empty() {
                    "server reported an error".to_string()
                } else {
                    message
                };
                self.on_transport_error(message)
            }
            StreamEventPayload::Malformed { raw, reason } => {
                tracing::warn!(target = ?self.target, raw = %raw, reason = %reason, "dropping malformed event");
                Directive::None
            }
            StreamEventPayload::Failed(message) => self.on_transport_error(message),
        }
    }

    pub fn on_transport_error(&mut self, message: String) -> Directive {
        match self.transition(StreamTransition::Fail {
            message: message.clone(),
        }) {
            Ok(()) => {
                tracing::warn!(target = ?self.target, error = %message, "stream failed");
                Directive::Fail { message }
            }
            Err(_) => Directive::None,
        }
    }

    /// The event channel closed. Only an error while still in flight.
    pub fn on_stream_closed(&mut self) -> Directive {
        if self.state.is_in_flight() {
            return self.on_transport_error("stream closed before completion".to_string());
        }
        Directive::None
    }

    pub fn on_reconciled(&mut self) -> bool {
        self.transition(StreamTransition::Reconciled).is_ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.transition(StreamTransition::Cancel).is_ok()
    }

    fn transition(&mut self, transition: StreamTransition) -> Result<(), StreamTransitionRejection> {
        self.state = self.state.apply(transition)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parley_client::{ChatId, StreamId};

    use super::*;

    fn controller(modes: &ModeSnapshot) -> StreamController {
        let user_message_id = MessageId::new("local-1");
        let pair = PendingPair {
            assistant_message_id: user_message_id.assistant_placeholder(),
            user_message_id,
        };
        let target = StreamTarget::new(ChatId::new(1), StreamId::new(1));
        StreamController::begin(target, pair, "Hello", modes).unwrap()
    }

    #[test]
    fn happy_path_walks_every_state() {
        let mut controller = controller(&ModeSnapshot::default());
        assert_eq!(controller.state(), &StreamState::Sending);

        assert_eq!(controller.on_opened(), Directive::MarkLoading);
        assert_eq!(
            controller.on_event(StreamEventPayload::Content("Hi".to_string())),
            Directive::AppendDelta {
                message_id: MessageId::new("local-1-assistant"),
                text: "Hi".to_string(),
            }
        );
        assert_eq!(
            controller.on_event(StreamEventPayload::End),
            Directive::Reconcile
        );
        assert_eq!(controller.state(), &StreamState::Finalizing);
        assert_eq!(controller.on_event(StreamEventPayload::End), Directive::None);

        assert!(controller.on_reconciled());
        assert_eq!(controller.state(), &StreamState::Closed);
        assert_eq!(controller.on_event(StreamEventPayload::End), Directive::None);
        assert_eq!(controller.on_stream_closed(), Directive::None);
    }

    #[test]
    fn request_follows_mode_snapshot() {
        let grounded = ModeSnapshot {
            document_id: Some("doc-9".to_string()),
            web_search: true,
        };
        let controller = controller(&grounded);
        assert_eq!(controller.request().document_id.as_deref(), Some("doc-9"));
        assert!(controller.request().search);

        let plain = controller_with_defaults();
        assert_eq!(plain.request().document_id, None);
        assert!(!plain.request().search);
    }

    fn controller_with_defaults() -> StreamController {
        controller(&ModeSnapshot::default())
    }

    #[test]
    fn empty_messages_never_start() {
        let target = StreamTarget::new(ChatId::new(1), StreamId::new(1));
        let pair = PendingPair {
            user_message_id: MessageId::new("a"),
            assistant_message_id: MessageId::new("a-assistant"),
        };
        assert!(StreamController::begin(target, pair, "   ", &ModeSnapshot::default()).is_err());
    }

    #[test]
    fn malformed_events_keep_streaming() {
        let mut controller = controller_with_defaults();
        controller.on_opened();

        let directive = controller.on_event(StreamEventPayload::Malformed {
            raw: "{".to_string(),
            reason: "eof".to_string(),
        });
        assert_eq!(directive, Directive::None);
        assert_eq!(controller.state(), &StreamState::Streaming);
    }

    #[test]
    fn server_error_and_early_close_fail_the_stream() {
        let mut failed = controller_with_defaults();
        failed.on_opened();
        assert_eq!(
            failed.on_event(StreamEventPayload::ServerError("quota".to_string())),
            Directive::Fail {
                message: "quota".to_string()
            }
        );
        assert!(failed.state().is_terminal());
        assert!(!failed.cancel());

        let mut closed = controller_with_defaults();
        assert!(matches!(closed.on_stream_closed(), Directive::Fail { .. }));
        assert!(matches!(closed.state(), StreamState::Errored { .. }));
    }

    #[test]
    fn cancel_only_applies_in_flight() {
        let mut controller = controller_with_defaults();
        controller.on_opened();
        assert!(controller.cancel());
        assert_eq!(controller.state(), &StreamState::Cancelled);
        assert_eq!(
            controller.on_event(StreamEventPayload::Content("late".to_string())),
            Directive::None
        );
    }

    #[test]
    fn transitions_reject_out_of_order_input() {
        assert!(StreamState::Sending.apply(StreamTransition::Send).is_err());
        assert!(StreamState::Idle.apply(StreamTransition::Open).is_err());
        assert!(StreamState::Streaming.apply(StreamTransition::Reconciled).is_err());
        assert!(StreamState::Closed.apply(StreamTransition::Cancel).is_err());
        assert_eq!(
            StreamState::Sending.apply(StreamTransition::Fail {
                message: "refused".to_string()
            }),
            Ok(StreamState::Errored {
                message: "refused".to_string()
            })
        );
    }
}
