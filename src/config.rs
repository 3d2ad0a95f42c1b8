//! # Configuration Management
//!
//! Loads the relay's settings from several layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary
//! - Environment variables with the `APP_` prefix
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converts between these structs and TOML / environment values
//! - **derive macros**: Generate Debug, Clone, Serialize and Deserialize for us
//! - **Result<T, E>**: Loading and validation both report failures as values
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms set these)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_WEATHER__BASE_URL`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each section maps to one concern of the relay: where it listens (`server`),
/// which downstream it talks to (`weather`), and how a client connection
/// behaves (`session`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub weather: WeatherConfig,
    pub session: SessionConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (containers)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Downstream weather provider settings.
///
/// ## Fields:
/// - `base_url`: Prefix for lookups; the percent-encoded city is appended as the
///   last path segment (`<base_url>/<city>`)
/// - `timeout_secs`: Per-request timeout, the only deadline in the system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

/// Per-connection behaviour.
///
/// ## Fields:
/// - `trigger_word`: Utterances must start with this word to be treated as a command
/// - `heartbeat_interval_secs`: How often the server pings each client
/// - `client_timeout_secs`: Silence after which a client is considered gone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub trigger_word: String,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            weather: WeatherConfig {
                // Service name of the forecast backend inside the compose network
                base_url: "http://win-backend:8080/api/weather".to_string(),
                timeout_secs: 10,
            },
            session: SessionConfig {
                trigger_word: "wetter".to_string(),
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
        }
    }
}

impl WeatherConfig {
    /// Request timeout as a `Duration`, ready for the HTTP client builder.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_WEATHER__BASE_URL=http://localhost:8080/api/weather`: Point at a local backend
    /// - `APP_SESSION__TRIGGER_WORD=weather`: Change the trigger word
    ///
    /// A double underscore separates nested keys so that field names which
    /// contain single underscores (`base_url`, `timeout_secs`) survive intact.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - The weather base URL is an absolute http(s) URL
    /// - The request timeout is non-zero
    /// - A trigger word is configured
    /// - The client timeout outlasts at least one heartbeat interval
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        let base_url = self.weather.base_url.trim();
        if base_url.is_empty() {
            return Err(anyhow::anyhow!("Weather base URL cannot be empty"));
        }
        let parsed = reqwest::Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Weather base URL '{}' is invalid: {}", base_url, e))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(anyhow::anyhow!(
                "Weather base URL must use http or https, got '{}'",
                parsed.scheme()
            ));
        }

        if self.weather.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Weather request timeout must be greater than 0"));
        }

        if self.session.trigger_word.trim().is_empty() {
            return Err(anyhow::anyhow!("Trigger word cannot be empty"));
        }

        if self.session.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.session.client_timeout_secs <= self.session.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Client timeout ({}s) must be longer than the heartbeat interval ({}s)",
                self.session.client_timeout_secs,
                self.session.heartbeat_interval_secs
            ));
        }

        Ok(())
    }
}
