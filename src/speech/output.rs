//! Text-to-speech output boundary

use std::fmt;

/// One-shot completion signal for a `speak` call.
///
/// Fires exactly once: explicitly through [`SpeechCompletion::complete`], or
/// on drop if an adapter loses it (a failed playback still completes).
pub struct SpeechCompletion {
    on_complete: Option<Box<dyn FnOnce() + Send>>,
}

impl SpeechCompletion {
    pub fn new(on_complete: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_complete: Some(Box::new(on_complete)),
        }
    }

    pub fn complete(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete();
        }
    }
}

impl Drop for SpeechCompletion {
    fn drop(&mut self) {
        self.fire();
    }
}

impl fmt::Debug for SpeechCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechCompletion")
            .field("pending", &self.on_complete.is_some())
            .finish()
    }
}

/// Platform speech synthesizer
pub trait SpeechOutput: Send + Sync {
    /// Speak `text`, signalling `on_complete` when playback ends or fails
    fn speak(&self, text: &str, on_complete: SpeechCompletion);

    /// Interrupt any playback in progress
    fn stop(&self);
}
