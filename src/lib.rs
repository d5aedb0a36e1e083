pub mod integration;
pub mod llm;
pub mod messages;
pub mod speech;
pub mod state;

use thiserror::Error;

pub use integration::{AssistantConfig, Orchestrator, OrchestratorBuilder, OrchestratorHandle};
pub use llm::{GatewayConfig, Provider, StreamingGateway};
pub use messages::{Message, Role, Transcript};
pub use state::{AppCommand, AppEvent, ConversationState, SharedAppState};

#[derive(Error, Debug, Clone)]
pub enum MurmurError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Model load error: {0}")]
    ModelLoadError(String),

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Speech capture error: {0}")]
    CaptureError(String),

    #[error("Transcript error: {0}")]
    TranscriptError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("IO error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for MurmurError {
    fn from(e: std::io::Error) -> Self {
        MurmurError::IOError(e.to_string())
    }
}

impl From<reqwest::Error> for MurmurError {
    fn from(e: reqwest::Error) -> Self {
        MurmurError::HttpError(e.to_string())
    }
}

impl MurmurError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            MurmurError::ConfigError(_) => false,
            // The gateway falls back on these
            MurmurError::HttpError(_) => true,
            MurmurError::StreamError(_) => true,
            // A broken model file stays broken until replaced
            MurmurError::ModelLoadError(_) => false,
            MurmurError::InferenceError(_) => true,
            MurmurError::CaptureError(_) => true,
            MurmurError::TranscriptError(_) => true,
            MurmurError::ChannelError(_) => false,
            MurmurError::IOError(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            MurmurError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            MurmurError::HttpError(_) | MurmurError::StreamError(_) => {
                "Could not reach the language model server.".to_string()
            }
            MurmurError::ModelLoadError(_) => {
                "Failed to load the on-device model. Please verify the model file.".to_string()
            }
            MurmurError::InferenceError(_) => {
                "AI response generation failed. Please try again.".to_string()
            }
            MurmurError::CaptureError(_) => {
                "Speech recognition failed. Please try again.".to_string()
            }
            MurmurError::TranscriptError(_) => {
                "Conversation update failed. Please try again.".to_string()
            }
            MurmurError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            MurmurError::IOError(_) => "File system error occurred.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MurmurError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(MurmurError::HttpError("refused".into()).is_recoverable());
        assert!(MurmurError::InferenceError("oom".into()).is_recoverable());
        assert!(!MurmurError::ChannelError("closed".into()).is_recoverable());
        assert!(!MurmurError::ConfigError("bad".into()).is_recoverable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: MurmurError = io.into();
        assert!(matches!(err, MurmurError::IOError(ref msg) if msg.contains("missing")));
        assert_eq!(err.user_message(), "File system error occurred.");
    }
}
