//! Streaming gateway configuration

use crate::{MurmurError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the streaming LLM gateway
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the primary (network-hosted) provider
    pub base_url: String,

    /// Model name sent in chat requests
    pub model: String,

    /// Maximum tokens to generate per response
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// How long the health probe may take before the primary counts as down
    pub health_timeout_ms: u64,

    /// GGUF file for the on-device fallback model
    pub local_model_path: PathBuf,

    /// Optional system instructions prepended to every history
    pub system_prompt: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 512,
            temperature: 0.7,
            health_timeout_ms: 2000,
            local_model_path: PathBuf::from("models/llama-3.2-1b-q4.gguf"),
            system_prompt: None,
        }
    }
}

impl GatewayConfig {
    /// Create a configuration pointing at the given primary provider
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_local_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_model_path = path.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url.trim_end_matches('/'))
    }

    pub fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(MurmurError::ConfigError(format!(
                "primary base URL must be http(s): {}",
                self.base_url
            )));
        }
        if self.model.trim().is_empty() {
            return Err(MurmurError::ConfigError("model name is required".to_string()));
        }
        if self.health_timeout_ms == 0 {
            return Err(MurmurError::ConfigError(
                "health timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.health_timeout(), Duration::from_secs(2));
        assert!(config.system_prompt.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_urls_ignore_trailing_slash() {
        let config = GatewayConfig::new("http://10.0.0.2:8080/");
        assert_eq!(config.health_url(), "http://10.0.0.2:8080/health");
        assert_eq!(
            config.chat_url(),
            "http://10.0.0.2:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(GatewayConfig::new("10.0.0.2:8080").validate().is_err());
        assert!(GatewayConfig::default().with_model(" ").validate().is_err());
        assert!(GatewayConfig::default()
            .with_health_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
