//! Configuration for the integration layer
//!
//! Everything the orchestrator needs in one place; readable from a TOML
//! file where every field is optional.

use crate::llm::config::GatewayConfig;
use crate::{MurmurError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the complete assistant
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Streaming gateway configuration
    pub gateway: GatewayConfig,

    /// How long an advisory error stays visible
    pub error_display_ms: u64,

    /// Capacity of the presentation event channel
    pub event_buffer_size: usize,

    /// Orchestrator loop wake-up interval, bounds error expiry latency
    pub tick_ms: u64,

    /// How long shutdown waits for the gateway worker
    pub shutdown_timeout_ms: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            error_display_ms: 5000,
            event_buffer_size: 100,
            tick_ms: 50,
            shutdown_timeout_ms: 5000,
        }
    }
}

impl AssistantConfig {
    /// Read a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MurmurError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| {
            MurmurError::ConfigError(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_error_display(mut self, duration: Duration) -> Self {
        self.error_display_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick_ms = tick.as_millis() as u64;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn error_display(&self) -> Duration {
        Duration::from_millis(self.error_display_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.gateway.validate()?;
        if self.event_buffer_size == 0 {
            return Err(MurmurError::ConfigError(
                "event buffer size must be greater than zero".to_string(),
            ));
        }
        if self.tick_ms == 0 {
            return Err(MurmurError::ConfigError(
                "tick interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AssistantConfig::default();
        assert_eq!(config.error_display(), Duration::from_secs(5));
        assert_eq!(config.event_buffer_size, 100);
        assert_eq!(config.gateway.health_timeout_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = AssistantConfig::default()
            .with_gateway(GatewayConfig::new("http://10.0.0.2:8080"))
            .with_error_display(Duration::from_millis(250))
            .with_tick(Duration::from_millis(10));

        assert_eq!(config.gateway.base_url, "http://10.0.0.2:8080");
        assert_eq!(config.error_display_ms, 250);
        assert_eq!(config.tick(), Duration::from_millis(10));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
error_display_ms = 1500

[gateway]
base_url = "http://192.168.1.111:8080"
system_prompt = "Be brief."
"#
        )
        .unwrap();

        let config = AssistantConfig::load(file.path()).unwrap();
        assert_eq!(config.error_display_ms, 1500);
        assert_eq!(config.tick_ms, 50);
        assert_eq!(config.gateway.base_url, "http://192.168.1.111:8080");
        assert_eq!(config.gateway.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(config.gateway.model, "gpt-3.5-turbo");
    }

    #[test]
    fn test_load_rejects_bad_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "event_buffer_size = 0").unwrap();

        let err = AssistantConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, MurmurError::ConfigError(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AssistantConfig::load("/nonexistent/murmur.toml").unwrap_err();
        assert!(matches!(err, MurmurError::ConfigError(_)));
    }
}
