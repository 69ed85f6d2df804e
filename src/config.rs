//! Process configuration.
//!
//! Read once at startup from `CHECKSYNC_`-prefixed environment variables,
//! immutable thereafter. Anything unset falls back to the defaults below.

use crate::protocol::MAX_INDEX;

pub const ENV_PREFIX: &str = "CHECKSYNC_";

/// Resolved configuration values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Number of checkboxes the clients render.
    pub num_of_checkboxes: usize,
    /// Window in milliseconds between state-diff broadcasts.
    pub broadcast_diff_window_ms: u64,
    /// Address the WebSocket server binds to.
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_of_checkboxes: 1_000_000,
            broadcast_diff_window_ms: 1_000,
            bind_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

impl Config {
    /// Build from the environment, falling back to defaults per field.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            num_of_checkboxes: read_parsed("CHECKSYNC_NUM_OF_CHECKBOXES")?
                .unwrap_or(defaults.num_of_checkboxes),
            broadcast_diff_window_ms: read_parsed("CHECKSYNC_BROADCAST_DIFF_WINDOW_MS")?
                .unwrap_or(defaults.broadcast_diff_window_ms),
            bind_addr: std::env::var("CHECKSYNC_BIND_ADDR").unwrap_or(defaults.bind_addr),
        };
        config.validate()?;
        Ok(config)
    }

    /// Bounds that hold regardless of where the values came from.
    ///
    /// The cell count is capped by the 24-bit index encoding of the wire
    /// protocol.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_of_checkboxes == 0 || self.num_of_checkboxes > MAX_INDEX as usize + 1 {
            return Err(ConfigError::Invalid {
                name: "CHECKSYNC_NUM_OF_CHECKBOXES",
                value: self.num_of_checkboxes.to_string(),
            });
        }
        if self.broadcast_diff_window_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "CHECKSYNC_BROADCAST_DIFF_WINDOW_MS",
                value: self.broadcast_diff_window_ms.to_string(),
            });
        }
        Ok(())
    }
}

fn read_parsed<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors. Startup-time only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { name: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid { name, value } => {
                write!(f, "invalid value {value:?} for {name}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
