//! Configuration handling for the relay.
//!
//! Settings come from, in increasing priority: built-in defaults, the YAML
//! config file, `RELAY_*` environment variables, and command-line flags. A
//! missing or malformed config file is not fatal; defaults are used instead.

use anyhow::Result;
use relay_session::{
    endpoint_url, SessionConfig, DEFAULT_HOST, DEFAULT_PORT, MAX_RECONNECT_ATTEMPTS,
    RECONNECT_DELAY,
};
use relay_wire::{InputFraming, DEFAULT_PREVIEW_LEN};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Relay configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Host of the WebSocket endpoint
    pub host: String,
    /// Port of the WebSocket endpoint
    pub port: u16,
    /// Full endpoint URL; wins over host and port when set
    pub url: Option<String>,
    /// Bound on consecutive reconnect attempts
    pub max_reconnect_attempts: u32,
    /// Delay before each reconnect attempt (milliseconds)
    pub reconnect_delay_ms: u64,
    /// Wait for the peer's close frame (milliseconds)
    pub close_timeout_ms: u64,
    /// Characters kept in log previews of message content
    pub preview_len: usize,
    /// How stdin chunks become messages
    pub framing: InputFraming,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            url: None,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: RECONNECT_DELAY.as_millis() as u64,
            close_timeout_ms: 5000,
            preview_len: DEFAULT_PREVIEW_LEN,
            framing: InputFraming::Chunk,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    relay: Option<FileConfig>,
}

/// Every field optional so partial files only override what they name
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    url: Option<String>,
    max_reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
    close_timeout_ms: Option<u64>,
    preview_len: Option<usize>,
    framing: Option<InputFraming>,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `--host`
    pub host: Option<String>,
    /// `--port`
    pub port: Option<u16>,
    /// `--url`
    pub url: Option<String>,
    /// `--framing`
    pub framing: Option<InputFraming>,
    /// `--reconnect-delay`
    pub reconnect_delay: Option<Duration>,
    /// `--max-reconnect-attempts`
    pub max_reconnect_attempts: Option<u32>,
}

impl RelayConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Load configuration from file, reading `RELAY_*` variables through `lookup`
    pub fn load_with_env<P, F>(config_path: P, lookup: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Try to read the config file
        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}, using defaults: {}",
                        config_path.as_ref(),
                        e
                    );
                }
            }
        } else {
            warn!("Config file {:?} not found, using defaults", config_path.as_ref());
        }

        // Override with environment variables
        config.apply_environment_overrides(lookup);

        Ok(config)
    }

    /// Apply configuration from the root config structure
    fn apply_root_config(&mut self, root_config: RootConfig) {
        let Some(file) = root_config.relay else {
            return;
        };
        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if file.url.is_some() {
            self.url = file.url;
        }
        if let Some(max) = file.max_reconnect_attempts {
            self.max_reconnect_attempts = max;
        }
        if let Some(delay) = file.reconnect_delay_ms {
            self.reconnect_delay_ms = delay;
        }
        if let Some(timeout) = file.close_timeout_ms {
            self.close_timeout_ms = timeout;
        }
        if let Some(len) = file.preview_len {
            self.preview_len = len;
        }
        if let Some(framing) = file.framing {
            self.framing = framing;
        }
    }

    /// Apply environment variable overrides read through `lookup`
    fn apply_environment_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("RELAY_HOST") {
            self.host = host;
            info!("Host overridden by environment: {}", self.host);
        }

        if let Some(port) = lookup("RELAY_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    self.port = port;
                    info!("Port overridden by environment: {}", port);
                }
                Err(_) => warn!("Ignoring RELAY_PORT={:?}: not a port number", port),
            }
        }

        if let Some(url) = lookup("RELAY_URL") {
            info!("Endpoint overridden by environment: {}", url);
            self.url = Some(url);
        }
    }

    /// Apply command-line values, which take priority over everything else
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(host) = &overrides.host {
            self.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(url) = &overrides.url {
            self.url = Some(url.clone());
        }
        if let Some(framing) = overrides.framing {
            self.framing = framing;
        }
        if let Some(delay) = overrides.reconnect_delay {
            self.reconnect_delay_ms = delay.as_millis() as u64;
        }
        if let Some(max) = overrides.max_reconnect_attempts {
            self.max_reconnect_attempts = max;
        }
    }

    /// The resolved WebSocket endpoint
    pub fn endpoint(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => endpoint_url(&self.host, self.port),
        }
    }

    /// Settings handed to the relay runtime
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint(),
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            close_timeout: Duration::from_millis(self.close_timeout_ms),
            preview_len: self.preview_len,
            framing: self.framing,
        }
    }
}
