use super::types::{Message, Role};
use crate::llm::context::ChatMessage;
use crate::{MurmurError, Result};
use uuid::Uuid;

/// Ordered conversation for the active session.
///
/// Append-only: the only in-place edits are text appends and the final
/// flag flip on the single streaming assistant message.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> Uuid {
        let message = Message::user(text);
        let id = message.id();
        self.messages.push(message);
        id
    }

    /// Append an empty streaming assistant message and return its id.
    ///
    /// Fails while another message is still streaming.
    pub fn begin_assistant(&mut self) -> Result<Uuid> {
        if let Some(open) = self.streaming_message() {
            return Err(MurmurError::TranscriptError(format!(
                "message {} is still streaming",
                open.id()
            )));
        }
        let message = Message::streaming_assistant();
        let id = message.id();
        self.messages.push(message);
        Ok(id)
    }

    pub fn append_chunk(&mut self, id: Uuid, chunk: &str) -> Result<()> {
        let message = self.streaming_mut(id)?;
        message.push_text(chunk);
        Ok(())
    }

    /// Freeze the streaming message, returning its final text
    pub fn finalize(&mut self, id: Uuid) -> Result<String> {
        let message = self.streaming_mut(id)?;
        message.finish_streaming();
        Ok(message.text().to_string())
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id() == id)
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_streaming())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Role/content pairs for every message, in conversation order
    pub fn history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .map(|m| match m.role() {
                Role::User => ChatMessage::user(m.text()),
                Role::Assistant => ChatMessage::assistant(m.text()),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn streaming_mut(&mut self, id: Uuid) -> Result<&mut Message> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id() == id)
            .ok_or_else(|| MurmurError::TranscriptError(format!("unknown message {}", id)))?;
        if !message.is_streaming() {
            return Err(MurmurError::TranscriptError(format!(
                "message {} is already finalized",
                id
            )));
        }
        Ok(message)
    }
}
