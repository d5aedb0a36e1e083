//! Streaming LLM gateway with health-check-driven failover
//!
//! Every call probes the primary (network-hosted) provider first. If the
//! probe fails, or the primary stream fails before producing any text, the
//! whole request is re-run against the on-device fallback model.

use crate::llm::config::GatewayConfig;
use crate::llm::context::{render_prompt, with_system_prompt, ChatMessage};
use crate::llm::local::{GgufLoader, LocalModel, ModelLoader};
use crate::llm::sse;
use crate::Result;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Delivered as the whole reply when no on-device model can be used
pub const UNAVAILABLE_NOTICE: &str =
    "⚠️ On-device model not available. Please download a model to enable offline replies.";

/// Backend that served a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    /// Network-hosted, OpenAI-compatible server
    Primary,
    /// On-device model
    Fallback,
}

impl Provider {
    pub fn label(&self) -> &'static str {
        match self {
            Provider::Primary => "Primary (network)",
            Provider::Fallback => "Fallback (on-device)",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    stream: bool,
    max_tokens: u32,
    temperature: f32,
    messages: &'a [ChatMessage],
}

/// Reports the provider at most once, right before its first chunk
struct Delivery<P> {
    on_provider_change: Option<P>,
    delivered: bool,
}

impl<P: FnOnce(Provider)> Delivery<P> {
    fn new(on_provider_change: P) -> Self {
        Self {
            on_provider_change: Some(on_provider_change),
            delivered: false,
        }
    }

    fn report(&mut self, provider: Provider) {
        if let Some(callback) = self.on_provider_change.take() {
            info!("Serving turn from {}", provider);
            callback(provider);
        }
    }

    fn chunk<C: FnMut(&str)>(&mut self, provider: Provider, text: &str, on_chunk: &mut C) {
        self.report(provider);
        on_chunk(text);
        self.delivered = true;
    }
}

/// Gateway over the primary provider and the on-device fallback.
///
/// Holds no per-turn state; the only long-lived resource is the lazily
/// loaded fallback model, released by [`StreamingGateway::shutdown`].
pub struct StreamingGateway {
    config: GatewayConfig,
    client: reqwest::Client,
    loader: Box<dyn ModelLoader>,
    local: Option<Box<dyn LocalModel>>,
}

impl StreamingGateway {
    /// Create a gateway whose fallback model is read from `config.local_model_path`
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let loader = GgufLoader::new(config.local_model_path.clone());
        Self::with_loader(config, Box::new(loader))
    }

    /// Create a gateway with a custom fallback model loader
    pub fn with_loader(config: GatewayConfig, loader: Box<dyn ModelLoader>) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("murmur/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            config,
            client,
            loader,
            local: None,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Stream a reply for `history`.
    ///
    /// `on_provider_change` fires at most once, before the first `on_chunk`.
    /// Chunks arrive in generation order. Returns the provider that served
    /// the reply; only an on-device generation failure is an error.
    pub async fn stream_chat<C, P>(
        &mut self,
        history: &[ChatMessage],
        mut on_chunk: C,
        on_provider_change: P,
    ) -> Result<Provider>
    where
        C: FnMut(&str) + Send,
        P: FnOnce(Provider),
    {
        let messages = with_system_prompt(self.config.system_prompt.as_deref(), history.to_vec());
        let mut delivery = Delivery::new(on_provider_change);

        if self.probe_primary().await {
            match self
                .stream_primary(&messages, &mut delivery, &mut on_chunk)
                .await
            {
                Ok(()) => {
                    delivery.report(Provider::Primary);
                    return Ok(Provider::Primary);
                }
                Err(e) if !delivery.delivered => {
                    warn!("Primary stream failed before any content, falling back: {}", e);
                }
                Err(e) => {
                    // Committed text cannot be retracted; end the turn with what arrived
                    warn!("Primary stream broke mid-reply, keeping partial text: {}", e);
                    return Ok(Provider::Primary);
                }
            }
        }

        delivery.report(Provider::Fallback);
        self.generate_fallback(&messages, &mut on_chunk).await?;
        Ok(Provider::Fallback)
    }

    /// Reachability check bounded by the configured health timeout
    pub async fn probe_primary(&self) -> bool {
        let url = self.config.health_url();
        let timeout = self.config.health_timeout();

        match tokio::time::timeout(timeout, self.client.get(&url).send()).await {
            Ok(Ok(response)) if response.status().is_success() => {
                debug!("Primary health check passed");
                true
            }
            Ok(Ok(response)) => {
                info!("Primary health check returned {}", response.status());
                false
            }
            Ok(Err(e)) => {
                info!("Primary health check failed: {}", e);
                false
            }
            Err(_) => {
                info!("Primary health check timed out after {:?}", timeout);
                false
            }
        }
    }

    async fn stream_primary<C, P>(
        &self,
        messages: &[ChatMessage],
        delivery: &mut Delivery<P>,
        on_chunk: &mut C,
    ) -> Result<()>
    where
        C: FnMut(&str) + Send,
        P: FnOnce(Provider),
    {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            stream: true,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages,
        };

        let response = self
            .client
            .post(self.config.chat_url())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        debug!("Primary stream established ({})", response.status());

        let deltas = sse::delta_stream(response.bytes_stream());
        futures::pin_mut!(deltas);

        while let Some(delta) = deltas.next().await {
            let delta = delta?;
            delivery.chunk(Provider::Primary, &delta, on_chunk);
        }

        debug!("Primary stream completed");
        Ok(())
    }

    async fn generate_fallback<C>(&mut self, messages: &[ChatMessage], on_chunk: &mut C) -> Result<()>
    where
        C: FnMut(&str) + Send,
    {
        if self.local.is_none() {
            match self.loader.load().await {
                Ok(model) => self.local = model,
                Err(e) => error!("On-device model could not be loaded: {}", e),
            }
        }

        let Some(model) = self.local.as_mut() else {
            on_chunk(UNAVAILABLE_NOTICE);
            return Ok(());
        };

        let prompt = render_prompt(messages);
        debug!("Running on-device generation ({} prompt bytes)", prompt.len());
        model.generate(&prompt, on_chunk).await
    }

    /// Whether the on-device model is currently loaded
    pub fn has_local_model(&self) -> bool {
        self.local.is_some()
    }

    /// Release the on-device model, if loaded
    pub fn shutdown(&mut self) {
        if let Some(mut model) = self.local.take() {
            model.release();
            info!("Gateway released on-device model");
        }
    }
}

impl Drop for StreamingGateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MurmurError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct EchoModel {
        prompts: Arc<Mutex<Vec<String>>>,
        released: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LocalModel for EchoModel {
        async fn generate(
            &mut self,
            prompt: &str,
            on_token: &mut (dyn FnMut(&str) + Send),
        ) -> Result<()> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            for token in ["Off", "line"] {
                on_token(token);
            }
            Ok(())
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default, Clone)]
    struct EchoLoader {
        loads: Arc<AtomicUsize>,
        prompts: Arc<Mutex<Vec<String>>>,
        released: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ModelLoader for EchoLoader {
        async fn load(&self) -> Result<Option<Box<dyn LocalModel>>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Box::new(EchoModel {
                prompts: self.prompts.clone(),
                released: self.released.clone(),
            })))
        }
    }

    struct BrokenLoader;

    #[async_trait]
    impl ModelLoader for BrokenLoader {
        async fn load(&self) -> Result<Option<Box<dyn LocalModel>>> {
            Err(MurmurError::ModelLoadError("corrupt file".into()))
        }
    }

    /// Nothing listens on port 9 on test machines
    fn unreachable_config() -> GatewayConfig {
        GatewayConfig::new("http://127.0.0.1:9").with_health_timeout(Duration::from_millis(200))
    }

    #[test]
    fn test_provider_labels() {
        assert_eq!(Provider::Primary.to_string(), "Primary (network)");
        assert_eq!(Provider::Fallback.label(), "Fallback (on-device)");
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![ChatMessage::user("Hi")];
        let request = ChatCompletionRequest {
            model: "m",
            stream: true,
            max_tokens: 512,
            temperature: 0.5,
            messages: &messages,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "m",
                "stream": true,
                "max_tokens": 512,
                "temperature": 0.5,
                "messages": [{"role": "user", "content": "Hi"}]
            })
        );
    }

    #[tokio::test]
    async fn test_unreachable_primary_without_model_yields_notice() {
        let mut gateway =
            StreamingGateway::with_loader(unreachable_config(), Box::new(GgufLoader::new("/nonexistent.gguf")))
                .unwrap();

        let mut chunks = Vec::new();
        let mut providers = Vec::new();
        let provider = gateway
            .stream_chat(
                &[ChatMessage::user("Hello")],
                |c: &str| chunks.push(c.to_string()),
                |p| providers.push(p),
            )
            .await
            .unwrap();

        assert_eq!(provider, Provider::Fallback);
        assert_eq!(providers, vec![Provider::Fallback]);
        assert_eq!(chunks, vec![UNAVAILABLE_NOTICE.to_string()]);
        assert!(!gateway.has_local_model());
    }

    #[tokio::test]
    async fn test_fallback_renders_prompt_and_streams_tokens() {
        let loader = EchoLoader::default();
        let config = unreachable_config().with_system_prompt("Be brief.");
        let mut gateway = StreamingGateway::with_loader(config, Box::new(loader.clone())).unwrap();

        let mut text = String::new();
        gateway
            .stream_chat(&[ChatMessage::user("Hi")], |c: &str| text.push_str(c), |_| {})
            .await
            .unwrap();

        assert_eq!(text, "Offline");
        let prompts = loader.prompts.lock().unwrap().clone();
        assert_eq!(prompts, vec!["<|system|>\nBe brief.\n<|user|>\nHi\n<|assistant|>\n".to_string()]);
    }

    #[tokio::test]
    async fn test_model_is_loaded_once_and_released_on_shutdown() {
        let loader = EchoLoader::default();
        let mut gateway =
            StreamingGateway::with_loader(unreachable_config(), Box::new(loader.clone())).unwrap();

        for _ in 0..2 {
            gateway
                .stream_chat(&[ChatMessage::user("Hi")], |_: &str| {}, |_| {})
                .await
                .unwrap();
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(gateway.has_local_model());

        gateway.shutdown();
        assert!(!gateway.has_local_model());
        assert_eq!(loader.released.load(Ordering::SeqCst), 1);

        drop(gateway);
        assert_eq!(loader.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_failure_degrades_to_notice() {
        let mut gateway =
            StreamingGateway::with_loader(unreachable_config(), Box::new(BrokenLoader)).unwrap();

        let mut text = String::new();
        let result = gateway
            .stream_chat(&[ChatMessage::user("Hi")], |c: &str| text.push_str(c), |_| {})
            .await;

        assert_eq!(result.unwrap(), Provider::Fallback);
        assert_eq!(text, UNAVAILABLE_NOTICE);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = StreamingGateway::new(GatewayConfig::new("not-a-url"));
        assert!(matches!(result, Err(MurmurError::ConfigError(_))));
    }
}
