//! Speech-to-text capture boundary
//!
//! Recognition itself lives outside this crate. An adapter reports what the
//! recognizer does through a [`CaptureSink`]; the sink posts into the
//! orchestrator's inbox, so adapters may call it from any thread.

use crate::Result;
use std::sync::Arc;
use thiserror::Error;

/// Recognizer failure codes
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Audio recording error")]
    Audio,

    #[error("Client error")]
    Client,

    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Network error")]
    Network,

    #[error("Network timeout")]
    NetworkTimeout,

    #[error("No speech detected")]
    NoMatch,

    #[error("Recognition service busy")]
    RecognizerBusy,

    #[error("Server error")]
    Server,

    #[error("No speech input")]
    SpeechTimeout,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl CaptureError {
    /// Map a platform recognizer's numeric error code
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => CaptureError::NetworkTimeout,
            2 => CaptureError::Network,
            3 => CaptureError::Audio,
            4 => CaptureError::Server,
            5 => CaptureError::Client,
            6 => CaptureError::SpeechTimeout,
            7 => CaptureError::NoMatch,
            8 => CaptureError::RecognizerBusy,
            9 => CaptureError::PermissionDenied,
            other => CaptureError::Unknown(other),
        }
    }

    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

/// Everything a recognizer can report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Recognizer is ready and listening
    Ready,
    /// User started speaking
    BeginningOfSpeech,
    /// User stopped speaking; transcription is pending
    EndOfSpeech,
    /// Interim hypothesis, informational only
    Partial(String),
    /// Final transcription
    Final(String),
    Error(CaptureError),
}

/// Cloneable handle through which an adapter reports events
#[derive(Clone)]
pub struct CaptureSink {
    post: Arc<dyn Fn(CaptureEvent) + Send + Sync>,
}

impl CaptureSink {
    pub fn new(post: impl Fn(CaptureEvent) + Send + Sync + 'static) -> Self {
        Self {
            post: Arc::new(post),
        }
    }

    pub fn emit(&self, event: CaptureEvent) {
        (self.post)(event);
    }

    pub fn ready(&self) {
        self.emit(CaptureEvent::Ready);
    }

    pub fn beginning_of_speech(&self) {
        self.emit(CaptureEvent::BeginningOfSpeech);
    }

    pub fn end_of_speech(&self) {
        self.emit(CaptureEvent::EndOfSpeech);
    }

    pub fn partial(&self, text: impl Into<String>) {
        self.emit(CaptureEvent::Partial(text.into()));
    }

    pub fn final_result(&self, text: impl Into<String>) {
        self.emit(CaptureEvent::Final(text.into()));
    }

    pub fn error(&self, error: CaptureError) {
        self.emit(CaptureEvent::Error(error));
    }
}

impl std::fmt::Debug for CaptureSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSink").finish_non_exhaustive()
    }
}

/// Platform speech recognizer
pub trait SpeechCapture: Send + Sync {
    /// Begin a recognition session reporting into `sink`
    fn start_listening(&self, sink: CaptureSink) -> Result<()>;

    /// Cancel the active recognition session, if any
    fn stop_listening(&self);
}
