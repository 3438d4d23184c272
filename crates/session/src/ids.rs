use std::fmt;

use uuid::Uuid;

/// Sessions are keyed by the server's chat id.
pub use parley_client::ChatId as SessionId;

/// Message identifier.
///
/// Server messages use the server's integer id rendered as text; optimistic
/// messages get a `local-` prefixed id so the two never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn new_local() -> Self {
        Self(format!("local-{}", Uuid::now_v7()))
    }

    pub fn from_server(raw: i64) -> Self {
        Self(raw.to_string())
    }

    /// Id of the assistant placeholder paired with this user message.
    pub fn assistant_placeholder(&self) -> Self {
        Self(format!("{}-assistant", self.0))
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with("local-")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}
