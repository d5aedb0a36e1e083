//! Streaming LLM gateway
//!
//! - **config**: primary endpoint and fallback model settings
//! - **context**: history entries and prompt flattening
//! - **sse**: decoder for the primary provider's event stream
//! - **local**: on-device model lifecycle
//! - **gateway**: `stream_chat` with health-probe failover
//! - **pipeline**: the gateway on a worker thread, driven by channels
//!
//! # Usage
//!
//! ```rust,ignore
//! use murmur::llm::{ChatMessage, GatewayConfig, StreamingGateway};
//!
//! let mut gateway = StreamingGateway::new(GatewayConfig::new("http://192.168.1.111:8080"))?;
//! let provider = gateway
//!     .stream_chat(
//!         &[ChatMessage::user("Hello!")],
//!         |chunk: &str| print!("{}", chunk),
//!         |provider| println!("[{}]", provider),
//!     )
//!     .await?;
//! ```

pub mod config;
pub mod context;
pub mod gateway;
pub mod local;
pub mod pipeline;
pub mod sse;

pub use config::GatewayConfig;
pub use context::{render_prompt, ChatMessage, ChatRole};
pub use gateway::{Provider, StreamingGateway, UNAVAILABLE_NOTICE};
pub use local::{GgufLoader, LocalModel, ModelLoader};
pub use pipeline::{GatewayCommand, GatewayEvent, GatewayEventSink, GatewayWorker};
