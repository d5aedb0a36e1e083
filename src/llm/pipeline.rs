//! Gateway worker thread
//!
//! Runs the [`StreamingGateway`] on its own thread with a tokio runtime
//! and a channel-based interface, one request at a time. Every event is
//! tagged with the turn it belongs to.

use crate::llm::context::ChatMessage;
use crate::llm::gateway::{Provider, StreamingGateway};
use crate::{MurmurError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Commands accepted by the gateway worker
#[derive(Debug, Clone)]
pub enum GatewayCommand {
    /// Stream a reply for the given history
    Stream {
        turn: Uuid,
        history: Vec<ChatMessage>,
    },

    /// Release the on-device model and stop the worker
    Shutdown,
}

/// Events emitted by the gateway worker
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// The serving provider is known; precedes the turn's first chunk
    ProviderSelected { turn: Uuid, provider: Provider },

    /// Incremental reply text
    Chunk { turn: Uuid, text: String },

    /// The stream is finished; a failure carries the user-facing reason
    Finished {
        turn: Uuid,
        result: std::result::Result<Provider, String>,
    },

    /// Worker has shut down
    Shutdown,
}

impl GatewayEvent {
    pub fn turn(&self) -> Option<Uuid> {
        match self {
            GatewayEvent::ProviderSelected { turn, .. }
            | GatewayEvent::Chunk { turn, .. }
            | GatewayEvent::Finished { turn, .. } => Some(*turn),
            GatewayEvent::Shutdown => None,
        }
    }
}

/// Destination for worker events; returns `false` once nobody listens
pub type GatewayEventSink = Box<dyn Fn(GatewayEvent) -> bool + Send + Sync>;

/// Gateway worker with channel-based communication
pub struct GatewayWorker {
    gateway: StreamingGateway,
    command_tx: Sender<GatewayCommand>,
    command_rx: Receiver<GatewayCommand>,
}

impl GatewayWorker {
    pub fn new(gateway: StreamingGateway) -> Self {
        let (command_tx, command_rx) = bounded(16);
        Self {
            gateway,
            command_tx,
            command_rx,
        }
    }

    /// Get a sender for commands
    pub fn command_sender(&self) -> Sender<GatewayCommand> {
        self.command_tx.clone()
    }

    /// Start the worker thread.
    ///
    /// The thread owns a tokio runtime and serves one `Stream` command at a
    /// time until `Shutdown` arrives or every command sender is dropped.
    pub fn start(self, sink: GatewayEventSink) -> Result<JoinHandle<()>> {
        let runtime = Runtime::new()
            .map_err(|e| MurmurError::ChannelError(format!("Failed to create runtime: {}", e)))?;
        let mut gateway = self.gateway;
        let command_rx = self.command_rx;

        let handle = thread::Builder::new()
            .name("murmur-gateway".to_string())
            .spawn(move || {
                info!("Gateway worker started");

                loop {
                    match command_rx.recv() {
                        Ok(GatewayCommand::Stream { turn, history }) => {
                            debug!("Streaming turn {} ({} history entries)", turn, history.len());

                            let chunk_sink = &sink;
                            let provider_sink = &sink;
                            let result = runtime.block_on(gateway.stream_chat(
                                &history,
                                |text: &str| {
                                    chunk_sink(GatewayEvent::Chunk {
                                        turn,
                                        text: text.to_string(),
                                    });
                                },
                                |provider| {
                                    provider_sink(GatewayEvent::ProviderSelected { turn, provider });
                                },
                            ));

                            let result = result.map_err(|e| {
                                if e.is_recoverable() {
                                    warn!("Turn {} failed: {}", turn, e);
                                } else {
                                    error!("Turn {} failed: {}", turn, e);
                                }
                                e.user_message()
                            });
                            let delivered = sink(GatewayEvent::Finished { turn, result });
                            if !delivered {
                                info!("Event receiver gone, stopping gateway worker");
                                break;
                            }
                        }
                        Ok(GatewayCommand::Shutdown) => {
                            info!("Gateway worker shutting down");
                            break;
                        }
                        Err(_) => {
                            info!("Command channel closed, stopping gateway worker");
                            break;
                        }
                    }
                }

                gateway.shutdown();
                sink(GatewayEvent::Shutdown);
                info!("Gateway worker stopped");
            })?;

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::config::GatewayConfig;
    use crate::llm::gateway::UNAVAILABLE_NOTICE;
    use crate::llm::local::{GgufLoader, LocalModel, ModelLoader};
    use async_trait::async_trait;
    use std::time::Duration;

    struct CrashingModel;

    #[async_trait]
    impl LocalModel for CrashingModel {
        async fn generate(
            &mut self,
            _prompt: &str,
            on_token: &mut (dyn FnMut(&str) + Send),
        ) -> Result<()> {
            on_token("Par");
            Err(MurmurError::InferenceError("kv cache exhausted".into()))
        }
    }

    struct CrashingLoader;

    #[async_trait]
    impl ModelLoader for CrashingLoader {
        async fn load(&self) -> Result<Option<Box<dyn LocalModel>>> {
            Ok(Some(Box::new(CrashingModel)))
        }
    }

    fn offline_gateway() -> StreamingGateway {
        let config = GatewayConfig::new("http://127.0.0.1:9")
            .with_health_timeout(Duration::from_millis(200));
        StreamingGateway::with_loader(config, Box::new(GgufLoader::new("/nonexistent.gguf")))
            .unwrap()
    }

    #[test]
    fn test_event_turn() {
        let turn = Uuid::new_v4();
        let chunk = GatewayEvent::Chunk {
            turn,
            text: "x".into(),
        };
        assert_eq!(chunk.turn(), Some(turn));
        assert_eq!(GatewayEvent::Shutdown.turn(), None);
    }

    #[test]
    fn test_worker_streams_and_shuts_down() {
        let worker = GatewayWorker::new(offline_gateway());
        let command_tx = worker.command_sender();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let handle = worker
            .start(Box::new(move |event| event_tx.send(event).is_ok()))
            .unwrap();

        let turn = Uuid::new_v4();
        command_tx
            .send(GatewayCommand::Stream {
                turn,
                history: vec![ChatMessage::user("Hi")],
            })
            .unwrap();

        let timeout = Duration::from_secs(10);
        assert_eq!(
            event_rx.recv_timeout(timeout).unwrap(),
            GatewayEvent::ProviderSelected {
                turn,
                provider: Provider::Fallback
            }
        );
        assert_eq!(
            event_rx.recv_timeout(timeout).unwrap(),
            GatewayEvent::Chunk {
                turn,
                text: UNAVAILABLE_NOTICE.to_string()
            }
        );
        assert_eq!(
            event_rx.recv_timeout(timeout).unwrap(),
            GatewayEvent::Finished {
                turn,
                result: Ok(Provider::Fallback)
            }
        );

        command_tx.send(GatewayCommand::Shutdown).unwrap();
        assert_eq!(event_rx.recv_timeout(timeout).unwrap(), GatewayEvent::Shutdown);
        handle.join().unwrap();
    }

    #[test]
    fn test_failed_turn_reports_user_message() {
        let config = GatewayConfig::new("http://127.0.0.1:9")
            .with_health_timeout(Duration::from_millis(200));
        let gateway = StreamingGateway::with_loader(config, Box::new(CrashingLoader)).unwrap();
        let worker = GatewayWorker::new(gateway);
        let command_tx = worker.command_sender();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let handle = worker
            .start(Box::new(move |event| event_tx.send(event).is_ok()))
            .unwrap();

        let turn = Uuid::new_v4();
        command_tx
            .send(GatewayCommand::Stream {
                turn,
                history: vec![ChatMessage::user("Hi")],
            })
            .unwrap();

        let finished = loop {
            match event_rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                GatewayEvent::Finished { result, .. } => break result,
                _ => continue,
            }
        };
        assert_eq!(
            finished,
            Err("AI response generation failed. Please try again.".to_string())
        );

        command_tx.send(GatewayCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }
}
