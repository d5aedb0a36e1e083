//! Conversation history as sent to the language model
//!
//! The primary provider receives structured role/content pairs; the
//! on-device model receives the same history flattened into one prompt.

use serde::{Deserialize, Serialize};

/// Role of a history entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    fn prompt_tag(&self) -> &'static str {
        match self {
            ChatRole::System => "<|system|>",
            ChatRole::User => "<|user|>",
            ChatRole::Assistant => "<|assistant|>",
        }
    }
}

/// One `{role, content}` pair of conversation history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// Prepend the configured system prompt, if any, to a transcript history
pub fn with_system_prompt(system_prompt: Option<&str>, history: Vec<ChatMessage>) -> Vec<ChatMessage> {
    match system_prompt {
        Some(prompt) if !prompt.trim().is_empty() => {
            let mut messages = Vec::with_capacity(history.len() + 1);
            messages.push(ChatMessage::system(prompt));
            messages.extend(history);
            messages
        }
        _ => history,
    }
}

/// Flatten history into a single role-tagged prompt.
///
/// Turns appear in chronological order and the prompt ends with an open
/// assistant tag so the model continues as the assistant.
pub fn render_prompt(history: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in history {
        prompt.push_str(message.role.prompt_tag());
        prompt.push('\n');
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt.push_str(ChatRole::Assistant.prompt_tag());
    prompt.push('\n');
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_prompt_order_and_trailing_tag() {
        let history = vec![
            ChatMessage::system("Be brief."),
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello!"),
            ChatMessage::user("Weather?"),
        ];

        let prompt = render_prompt(&history);
        assert_eq!(
            prompt,
            "<|system|>\nBe brief.\n<|user|>\nHi\n<|assistant|>\nHello!\n<|user|>\nWeather?\n<|assistant|>\n"
        );
    }

    #[test]
    fn test_render_empty_history() {
        assert_eq!(render_prompt(&[]), "<|assistant|>\n");
    }

    #[test]
    fn test_system_prompt_is_prepended() {
        let history = vec![ChatMessage::user("Hi")];
        let messages = with_system_prompt(Some("You are Val."), history.clone());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ChatMessage::system("You are Val."));

        assert_eq!(with_system_prompt(None, history.clone()), history);
        assert_eq!(with_system_prompt(Some("  "), history.clone()), history);
    }

    #[test]
    fn test_chat_message_wire_shape() {
        let json = serde_json::to_value(ChatMessage::user("Hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "Hi"}));
    }
}
