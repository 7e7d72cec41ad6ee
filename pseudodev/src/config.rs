use serde::Deserialize;
use std::collections::HashMap;
use std::io;

/// Environment variable holding the device capacity
pub const ENV_CAPACITY: &str = "PSEUDO_CAPACITY";
/// Environment variable selecting the cursor mode (`shared` or `per-handle`)
pub const ENV_CURSOR_MODE: &str = "PSEUDO_CURSOR_MODE";

/// Where the read/write position lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CursorMode {
    /// One position for the device, shared by every open handle
    #[default]
    Shared,
    /// Each handle has its own position, starting at 0 on open
    PerHandle,
}

impl std::str::FromStr for CursorMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "shared" => Ok(Self::Shared),
            "per-handle" => Ok(Self::PerHandle),
            other => Err(ConfigError::InvalidCursorMode(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("capacity must be a positive integer")]
    ZeroCapacity,

    #[error("invalid capacity {0:?}")]
    InvalidCapacity(String),

    #[error("invalid cursor mode {0:?} (expected \"shared\" or \"per-handle\")")]
    InvalidCursorMode(String),

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("failed to parse device config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read device config: {0}")]
    Io(#[from] io::Error),
}

/// Construction parameters of a device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceConfig {
    pub capacity: usize,
    #[serde(default)]
    pub cursor_mode: CursorMode,
}

impl DeviceConfig {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            cursor_mode: CursorMode::Shared,
        }
    }

    #[must_use]
    pub fn with_cursor_mode(mut self, cursor_mode: CursorMode) -> Self {
        self.cursor_mode = cursor_mode;
        self
    }

    /// Check the invariants the device relies on
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ZeroCapacity` if the capacity is 0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }

    /// Read a config from a JSON document such as
    /// `{"capacity": 4096, "cursor_mode": "per-handle"}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the config is invalid.
    pub fn from_json_reader(reader: impl io::Read) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from the process environment
    ///
    /// # Errors
    ///
    /// Returns an error if `PSEUDO_CAPACITY` is missing or invalid, or if
    /// `PSEUDO_CURSOR_MODE` is set to an unknown mode.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k == ENV_CAPACITY || k == ENV_CURSOR_MODE)
            .collect();
        Self::from_map(&vars)
    }

    /// Build a config from key/value settings, as found in the environment
    ///
    /// # Errors
    ///
    /// See [`DeviceConfig::from_env`].
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let raw = vars.get(ENV_CAPACITY).ok_or(ConfigError::Missing(ENV_CAPACITY))?;
        let capacity = raw
            .trim()
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidCapacity(raw.clone()))?;
        let cursor_mode = match vars.get(ENV_CURSOR_MODE) {
            Some(mode) => mode.parse()?,
            None => CursorMode::default(),
        };
        let config = Self {
            capacity,
            cursor_mode,
        };
        config.validate()?;
        Ok(config)
    }
}
