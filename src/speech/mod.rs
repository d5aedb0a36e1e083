//! Speech adapters
//!
//! Platform speech recognition and synthesis are reached through two
//! traits: [`SpeechCapture`] reports recognizer callbacks as
//! [`CaptureEvent`]s, and [`SpeechOutput`] speaks finished replies.
//! The `console` module provides terminal implementations of both.

pub mod capture;
pub mod console;
pub mod output;

pub use capture::{CaptureError, CaptureEvent, CaptureSink, SpeechCapture};
pub use console::{ConsoleSpeaker, TypedCapture};
pub use output::{SpeechCompletion, SpeechOutput};
