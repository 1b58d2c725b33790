//! Configuration for memwire
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

use crate::error::{ClientError, Result};

/// Main configuration for a memwire client
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Server Configuration
    // -------------------------------------------------------------------------
    /// Server host name or IP address
    pub host: String,

    /// Server TCP port
    pub port: u16,

    /// SASL PLAIN username (auth is performed only when both are set)
    pub username: Option<String>,

    /// SASL PLAIN password
    pub password: Option<String>,

    // -------------------------------------------------------------------------
    // Queue Configuration
    // -------------------------------------------------------------------------
    /// Buffer commands issued while the connection is not ready
    pub enable_offline_queue: bool,

    /// In-flight command count at which callers are asked to pause
    pub command_queue_high_water: usize,

    /// In-flight command count at which a saturated queue signals drain
    pub command_queue_low_water: usize,

    // -------------------------------------------------------------------------
    // Protocol Configuration
    // -------------------------------------------------------------------------
    /// Expiration (seconds) used when a store/counter call omits its TTL
    pub default_expiration: u32,

    /// Largest response body accepted by the reply decoder (in bytes)
    pub max_body_size: u32,

    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// Reconnection backoff
    pub retry: RetryConfig,

    /// TCP connect timeout
    pub connect_timeout: Duration,

    /// Bytes queued on the socket writer before writes report "buffered"
    pub write_buffer_high_water: usize,
}

/// Exponential backoff settings for reconnection.
///
/// Each connection loss multiplies the current delay by `multiplier`,
/// capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first multiplication
    pub initial_delay: Duration,

    /// Growth factor applied on every connection loss
    pub multiplier: f64,

    /// Ceiling for the delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(150),
            multiplier: 1.7,
            max_delay: Duration::from_millis(60_000), // 1 minute
        }
    }
}

impl RetryConfig {
    /// Clamp delays to at least 1ms and ensure `initial_delay <= max_delay`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.initial_delay = self.initial_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        if self.initial_delay > self.max_delay {
            std::mem::swap(&mut self.initial_delay, &mut self.max_delay);
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11211,
            username: None,
            password: None,
            enable_offline_queue: true,
            command_queue_high_water: 1000,
            command_queue_low_water: 0,
            default_expiration: 0,
            max_body_size: 64 * 1024 * 1024, // 64 MB
            retry: RetryConfig::default(),
            connect_timeout: Duration::from_secs(5),
            write_buffer_high_water: 16 * 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// `host:port` string used for connecting and in error messages
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Credentials, when both username and password are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user.as_str(), pass.as_str()))
            }
            _ => None,
        }
    }

    /// Check the configuration for values the client cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ClientError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ClientError::Config("port must not be zero".to_string()));
        }
        if !(self.retry.multiplier >= 1.0) {
            return Err(ClientError::Config(format!(
                "retry multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.command_queue_low_water > self.command_queue_high_water {
            return Err(ClientError::Config(format!(
                "command queue low water ({}) exceeds high water ({})",
                self.command_queue_low_water, self.command_queue_high_water
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the server host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the server port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set SASL PLAIN credentials
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Enable or disable offline queueing
    pub fn enable_offline_queue(mut self, enabled: bool) -> Self {
        self.config.enable_offline_queue = enabled;
        self
    }

    /// Set the command queue high water mark
    pub fn command_queue_high_water(mut self, count: usize) -> Self {
        self.config.command_queue_high_water = count;
        self
    }

    /// Set the command queue low water mark
    pub fn command_queue_low_water(mut self, count: usize) -> Self {
        self.config.command_queue_low_water = count;
        self
    }

    /// Set the default expiration (in seconds)
    pub fn default_expiration(mut self, seconds: u32) -> Self {
        self.config.default_expiration = seconds;
        self
    }

    /// Set the largest accepted response body (in bytes)
    pub fn max_body_size(mut self, size: u32) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Set the reconnection backoff
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry.normalized();
        self
    }

    /// Set the TCP connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the socket writer high water mark (in bytes)
    pub fn write_buffer_high_water(mut self, bytes: usize) -> Self {
        self.config.write_buffer_high_water = bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
