//! Wiring of the conversation: configuration and the orchestrator

pub mod config;
pub mod orchestrator;

pub use config::AssistantConfig;
pub use orchestrator::{ConversationEvent, Orchestrator, OrchestratorBuilder, OrchestratorHandle};
