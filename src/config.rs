use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use config::{Config as ConfigLib, ConfigBuilder, ConfigError, Environment, builder::DefaultState};
use reqwest::Url;
use serde::Deserialize;

use crate::outbound::webhook::{
    ChannelSecret, ClockSyncService, HttpClientError, MAX_RETRIES, RetryStrategy,
    WebhookHttpClient,
};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub clock: ClockConfig,
    pub delivery: DeliveryConfig,
}

/// Process-wide trusted-time settings, read once at startup
#[derive(Debug, Clone, Deserialize)]
pub struct ClockConfig {
    pub timestamp_url: Option<String>,

    /// Base64-encoded HMAC secret shared with the time source
    #[serde(default)]
    pub timestamp_secret: SecretString,

    /// Fixed offset applied instead of a measured one (testing only)
    pub offset_override_ms: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    pub destination_url: Option<String>,

    /// Base64-encoded per-channel secret
    #[serde(default)]
    pub channel_secret: SecretString,

    pub user_agent: String,

    pub timeout_secs: u64,

    pub max_retries: u32,

    pub retry_delay_ms: u64,

    /// Refuse plain-HTTP endpoints. Only disable for local receivers.
    pub https_only: bool,
}

/// String setting whose value never shows up in logs.
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    /// Decode the base64 value into raw bytes.
    pub fn decode(&self) -> Result<Vec<u8>, ConfigError> {
        STANDARD
            .decode(self.0.trim())
            .map_err(|e| ConfigError::Message(format!("secret is not valid base64: {e}")))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(<redacted>)")
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults()?;
        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Should be in the format WEBHOOK_CLOCK__TIMESTAMP_URL or WEBHOOK_DELIVERY__MAX_RETRIES
            builder = builder.add_source(
                Environment::with_prefix("WEBHOOK")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }

    /// Set default values for the configuration.
    /// This is used when no environment variables are provided
    fn set_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        ConfigLib::builder()
            .set_default("clock.timestamp_secret", "")?
            .set_default("delivery.channel_secret", "")?
            .set_default(
                "delivery.user_agent",
                crate::outbound::webhook::default_user_agent(),
            )?
            .set_default("delivery.timeout_secs", 30)?
            .set_default("delivery.max_retries", i64::from(MAX_RETRIES))?
            .set_default("delivery.retry_delay_ms", 1)?
            .set_default("delivery.https_only", true)
    }
}

impl ClockConfig {
    /// Build the shared clock service described by this configuration.
    pub fn build_service(&self) -> Result<ClockSyncService, ConfigError> {
        let url = self.timestamp_url.as_deref().map(parse_url).transpose()?;
        let service = ClockSyncService::new(self.timestamp_secret.decode()?, url);

        Ok(match self.offset_override_ms {
            Some(offset) => service.with_offset_millis(offset),
            None => service,
        })
    }
}

impl DeliveryConfig {
    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn http_client(&self) -> Result<WebhookHttpClient, HttpClientError> {
        WebhookHttpClient::with_settings(
            Duration::from_secs(self.timeout_secs),
            &self.user_agent,
            self.https_only,
        )
    }

    pub fn channel_secret(&self) -> Result<ChannelSecret, ConfigError> {
        self.channel_secret.decode().map(ChannelSecret::new)
    }

    pub fn destination(&self) -> Result<Option<Url>, ConfigError> {
        self.destination_url.as_deref().map(parse_url).transpose()
    }
}

fn parse_url(value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Message(format!("invalid URL {value:?}: {e}")))
}
