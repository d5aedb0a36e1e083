use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single transcript entry.
///
/// Text only grows while `is_streaming` is set, and the flag is cleared
/// exactly once. Mutation goes through [`Transcript`](super::Transcript).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    text: String,
    role: Role,
    timestamp: DateTime<Utc>,
    is_streaming: bool,
}

impl Message {
    fn new(role: Role, text: String, is_streaming: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            text,
            role,
            timestamp: Utc::now(),
            is_streaming,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text.into(), false)
    }

    /// An empty assistant reply that is still being produced
    pub fn streaming_assistant() -> Self {
        Self::new(Role::Assistant, String::new(), true)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub(super) fn push_text(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }

    pub(super) fn finish_streaming(&mut self) {
        self.is_streaming = false;
    }
}
