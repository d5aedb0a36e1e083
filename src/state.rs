//! Observable application state for the voice assistant
//!
//! The orchestrator is the only writer. The presentation layer reads:
//! - **State**: `SharedAppState`, queried synchronously or snapshotted
//! - **Commands**: requests the orchestrator acts on
//! - **Events**: notifications that something changed

use crate::llm::Provider;
use crate::messages::{Message, Transcript};
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

/// Shown as the provider label before any turn has been served
pub const PROVIDER_PENDING_LABEL: &str = "Checking...";

/// Conversation turn state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConversationState {
    #[default]
    Idle,
    /// Speech capture session active
    Listening,
    /// User stopped speaking, waiting for the final transcription
    ProcessingSpeech,
    /// Reply is being streamed
    WaitingForLLM,
    /// Reply is being spoken
    Speaking,
}

impl ConversationState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ConversationState::Idle)
    }

    /// Check if a capture session owns the turn
    pub fn is_capturing(&self) -> bool {
        matches!(
            self,
            ConversationState::Listening | ConversationState::ProcessingSpeech
        )
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationState::Idle => write!(f, "Idle"),
            ConversationState::Listening => write!(f, "Listening"),
            ConversationState::ProcessingSpeech => write!(f, "Processing speech"),
            ConversationState::WaitingForLLM => write!(f, "Waiting for LLM"),
            ConversationState::Speaking => write!(f, "Speaking"),
        }
    }
}

/// Unified application state
#[derive(Clone, Debug, Default)]
pub struct AppState {
    pub conversation: ConversationState,
    pub transcript: Transcript,
    /// Whether the capture adapter has an active session
    pub is_listening: bool,
    /// Advisory error text, cleared on dismissal or timeout
    pub error: Option<String>,
    /// Provider that served the most recent turn
    pub provider: Option<Provider>,
    /// Latest interim hypothesis from the recognizer
    pub partial_transcript: Option<String>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> AppStateSnapshot {
        AppStateSnapshot {
            conversation: self.conversation,
            messages: self.transcript.messages().to_vec(),
            is_listening: self.is_listening,
            error: self.error.clone(),
            provider: self.provider,
            partial_transcript: self.partial_transcript.clone(),
        }
    }

    pub fn provider_label(&self) -> &'static str {
        self.provider
            .map(|p| p.label())
            .unwrap_or(PROVIDER_PENDING_LABEL)
    }
}

/// Immutable copy of application state, read without holding the lock
#[derive(Clone, Debug)]
pub struct AppStateSnapshot {
    pub conversation: ConversationState,
    pub messages: Vec<Message>,
    pub is_listening: bool,
    pub error: Option<String>,
    pub provider: Option<Provider>,
    pub partial_transcript: Option<String>,
}

impl AppStateSnapshot {
    pub fn provider_label(&self) -> &'static str {
        self.provider
            .map(|p| p.label())
            .unwrap_or(PROVIDER_PENDING_LABEL)
    }

    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_streaming()).count()
    }
}

/// Thread-safe shared application state
#[derive(Clone, Default)]
pub struct SharedAppState {
    inner: Arc<RwLock<AppState>>,
}

impl SharedAppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, AppState> {
        self.inner.read()
    }

    /// Only the orchestrator thread mutates shared state
    pub(crate) fn write(&self) -> parking_lot::RwLockWriteGuard<'_, AppState> {
        self.inner.write()
    }

    pub fn snapshot(&self) -> AppStateSnapshot {
        self.inner.read().snapshot()
    }

    // === Convenience read methods ===

    pub fn conversation_state(&self) -> ConversationState {
        self.inner.read().conversation
    }

    pub fn is_listening(&self) -> bool {
        self.inner.read().is_listening
    }

    pub fn error(&self) -> Option<String> {
        self.inner.read().error.clone()
    }

    pub fn provider(&self) -> Option<Provider> {
        self.inner.read().provider
    }

    pub fn provider_label(&self) -> &'static str {
        self.inner.read().provider_label()
    }

    pub fn message_count(&self) -> usize {
        self.inner.read().transcript.len()
    }

    /// Text of the most recent message, if any
    pub fn last_message_text(&self) -> Option<String> {
        self.inner
            .read()
            .transcript
            .last()
            .map(|m| m.text().to_string())
    }
}

impl std::fmt::Debug for SharedAppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedAppState").field(&*self.inner.read()).finish()
    }
}

/// Requests sent to the orchestrator
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppCommand {
    StartListening,
    StopListening,
    /// Submit finalized user text, bypassing speech capture
    SubmitText(String),
    ClearError,
    Shutdown,
}

/// Notifications emitted after state changes.
///
/// State should be read from `SharedAppState`; events only say what moved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppEvent {
    StateChanged(ConversationState),
    /// A message was added or finalized
    TranscriptChanged,
    /// Reply text appended to the streaming message
    MessageChunk { id: Uuid, text: String },
    ListeningChanged(bool),
    ErrorChanged(Option<String>),
    ProviderChanged(Provider),
    PartialTranscript(String),
    Shutdown,
}
