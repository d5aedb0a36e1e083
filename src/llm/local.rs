//! On-device fallback model
//!
//! The gateway owns at most one loaded model. It is acquired lazily through a
//! [`ModelLoader`] the first time the fallback path runs, and released when
//! the gateway shuts down (or is dropped).

use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// A loaded on-device model that can continue a flattened prompt
#[async_trait]
pub trait LocalModel: Send {
    /// Generate a continuation, reporting every token as it is produced
    async fn generate(
        &mut self,
        prompt: &str,
        on_token: &mut (dyn FnMut(&str) + Send),
    ) -> Result<()>;

    /// Free native resources. Called once, before the model is dropped.
    fn release(&mut self) {}
}

/// Acquires the on-device model
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// `Ok(None)` when no model is available on this device
    async fn load(&self) -> Result<Option<Box<dyn LocalModel>>>;
}

/// Loads a GGUF model from a fixed local path
#[derive(Clone, Debug)]
pub struct GgufLoader {
    path: PathBuf,
}

impl GgufLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ModelLoader for GgufLoader {
    async fn load(&self) -> Result<Option<Box<dyn LocalModel>>> {
        if !self.path.is_file() {
            info!("No on-device model at {}", self.path.display());
            return Ok(None);
        }

        #[cfg(feature = "mistral")]
        {
            let model = mistral::MistralModel::load(&self.path).await?;
            Ok(Some(Box::new(model)))
        }

        #[cfg(not(feature = "mistral"))]
        {
            tracing::warn!(
                "Found {} but on-device inference is not compiled in (enable the `mistral` feature)",
                self.path.display()
            );
            Ok(None)
        }
    }
}

#[cfg(feature = "mistral")]
mod mistral {
    use super::LocalModel;
    use crate::{MurmurError, Result};
    use async_trait::async_trait;
    use mistralrs::{
        ChatCompletionChunkResponse, ChunkChoice, Delta, GgufModelBuilder, Response,
        TextMessageRole, TextMessages,
    };
    use std::path::Path;
    use tracing::{debug, info};

    /// GGUF model served by mistral.rs
    pub struct MistralModel {
        model: Option<mistralrs::Model>,
    }

    impl MistralModel {
        pub async fn load(path: &Path) -> Result<Self> {
            let dir = path
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|| ".".to_string());
            let file = path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .ok_or_else(|| {
                    MurmurError::ModelLoadError(format!("not a file: {}", path.display()))
                })?;

            info!("Loading on-device model {}", path.display());
            let model = GgufModelBuilder::new(dir, vec![file])
                .with_logging()
                .build()
                .await
                .map_err(|e| {
                    MurmurError::ModelLoadError(format!("Failed to load GGUF model: {}", e))
                })?;
            info!("On-device model loaded");

            Ok(Self { model: Some(model) })
        }
    }

    #[async_trait]
    impl LocalModel for MistralModel {
        async fn generate(
            &mut self,
            prompt: &str,
            on_token: &mut (dyn FnMut(&str) + Send),
        ) -> Result<()> {
            let model = self
                .model
                .as_ref()
                .ok_or_else(|| MurmurError::InferenceError("model already released".into()))?;

            // The pre-rendered prompt already carries the role tags
            let messages = TextMessages::new().add_message(TextMessageRole::User, prompt);

            let mut stream = model.stream_chat_request(messages).await.map_err(|e| {
                MurmurError::InferenceError(format!("Streaming request failed: {}", e))
            })?;

            while let Some(response) = stream.next().await {
                if !handle_response(response, on_token)? {
                    break;
                }
            }

            debug!("On-device generation finished");
            Ok(())
        }

        fn release(&mut self) {
            if self.model.take().is_some() {
                info!("On-device model released");
            }
        }
    }

    /// Forward one streamed response; `Ok(false)` once generation is complete
    fn handle_response(
        response: Response,
        on_token: &mut (dyn FnMut(&str) + Send),
    ) -> Result<bool> {
        match response {
            Response::Chunk(ChatCompletionChunkResponse { choices, .. }) => {
                if let Some(ChunkChoice {
                    delta:
                        Delta {
                            content: Some(content),
                            ..
                        },
                    ..
                }) = choices.first()
                {
                    on_token(content.as_str());
                }
                Ok(true)
            }
            Response::Done(_) => Ok(false),
            Response::ModelError(message, _) => Err(MurmurError::InferenceError(message)),
            Response::InternalError(e) | Response::ValidationError(e) => {
                Err(MurmurError::InferenceError(e.to_string()))
            }
            _ => {
                debug!("Ignoring non-chat response from on-device model");
                Ok(true)
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn boxed(message: &str) -> Box<dyn std::error::Error + Send + Sync> {
            Box::new(std::io::Error::new(std::io::ErrorKind::Other, message.to_string()))
        }

        #[test]
        fn test_engine_errors_fail_generation() {
            let mut tokens = Vec::new();
            let mut on_token = |t: &str| tokens.push(t.to_string());

            let internal = handle_response(Response::InternalError(boxed("oom")), &mut on_token);
            assert!(matches!(internal, Err(MurmurError::InferenceError(ref m)) if m.contains("oom")));

            let invalid =
                handle_response(Response::ValidationError(boxed("bad prompt")), &mut on_token);
            assert!(matches!(invalid, Err(MurmurError::InferenceError(ref m)) if m.contains("bad prompt")));

            assert!(tokens.is_empty());
        }
    }
}
