//! Terminal stand-ins for the platform speech adapters
//!
//! `TypedCapture` treats a queued line of text as the next utterance, so
//! the full listen cycle can be driven from a keyboard. `ConsoleSpeaker`
//! "speaks" by logging the reply and completing right away.

use crate::speech::capture::{CaptureError, CaptureSink, SpeechCapture};
use crate::speech::output::{SpeechCompletion, SpeechOutput};
use crate::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Recognizer that hears whatever was queued with [`TypedCapture::say`]
#[derive(Debug, Default)]
pub struct TypedCapture {
    pending: Mutex<VecDeque<String>>,
}

impl TypedCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the utterance the next listen session will recognize
    pub fn say(&self, text: impl Into<String>) {
        self.pending.lock().push_back(text.into());
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl SpeechCapture for TypedCapture {
    fn start_listening(&self, sink: CaptureSink) -> Result<()> {
        sink.ready();

        let Some(utterance) = self.pending.lock().pop_front() else {
            debug!("Nothing queued to hear");
            sink.error(CaptureError::SpeechTimeout);
            return Ok(());
        };

        sink.beginning_of_speech();
        sink.partial(utterance.clone());
        sink.end_of_speech();
        sink.final_result(utterance);
        Ok(())
    }

    fn stop_listening(&self) {
        debug!("Typed capture stopped");
    }
}

/// Synthesizer that writes replies to the log
#[derive(Debug, Default)]
pub struct ConsoleSpeaker;

impl ConsoleSpeaker {
    pub fn new() -> Self {
        Self
    }
}

impl SpeechOutput for ConsoleSpeaker {
    fn speak(&self, text: &str, on_complete: SpeechCompletion) {
        info!("🔊 {}", text);
        on_complete.complete();
    }

    fn stop(&self) {
        debug!("Console speaker stopped");
    }
}
