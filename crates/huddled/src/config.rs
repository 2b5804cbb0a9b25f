//! Server configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, a TOML
//! file, `HUDDLED_*` environment variables, and command line flags (applied
//! by `cli`).
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8888
//! idle_timeout_secs = 300
//!
//! [outbox]
//! capacity = 32
//! overflow = "drop-oldest"
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::debug;

use huddle_protocol::{DEFAULT_HOST, DEFAULT_PORT};

/// Environment variable overriding the bind host.
pub const ENV_HOST: &str = "HUDDLED_HOST";

/// Environment variable overriding the bind port.
pub const ENV_PORT: &str = "HUDDLED_PORT";

/// Environment variable naming the config file.
pub const ENV_CONFIG: &str = "HUDDLED_CONFIG";

/// Default idle period before a silent session is kicked (5 minutes).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default deadline for writing one line to a socket.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum inbound line length in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// Default number of queued lines per session.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 32;

/// What a producer does when a session's outbox is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Wait for the writer to free a slot.
    #[default]
    Block,
    /// Discard the oldest queued lines.
    DropOldest,
    /// Evict the slow session.
    Disconnect,
}

/// Per-session outbox settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutboxConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_OUTBOX_CAPACITY,
            overflow: OverflowPolicy::Block,
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Host or IP to bind
    pub host: String,

    /// TCP port to bind (0 picks a free port)
    pub port: u16,

    /// Idle period after which the watchdog kicks a session
    #[serde(rename = "idle_timeout_secs", deserialize_with = "duration_from_secs")]
    pub idle_timeout: Duration,

    /// Deadline for writing a single line to a client
    #[serde(rename = "write_timeout_secs", deserialize_with = "duration_from_secs")]
    pub write_timeout: Duration,

    /// Longest inbound line accepted, in bytes
    pub max_line_length: usize,

    /// Per-session inbound channel settings
    pub outbox: OutboxConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            outbox: OutboxConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `path`, or from the default location when
    /// `path` is `None` and that file exists, then applies environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Read` if an explicitly named file cannot be read
    /// - `ConfigError::Parse` if the file is not valid config TOML
    /// - `ConfigError::Invalid` if an environment override is malformed
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| env::var(key).ok())
    }

    /// Same as [`ServerConfig::load`], reading overrides through `lookup`
    /// instead of the process environment.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| lookup(ENV_CONFIG).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_overrides(lookup)?;
        Ok(config)
    }

    /// Reads and parses one TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), "Loaded config file");
        Self::from_toml(&text)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port.parse().map_err(|_| ConfigError::Invalid {
                field: ENV_PORT,
                reason: format!("'{port}' is not a port number"),
            })?;
        }
        Ok(())
    }

    /// Checks values that would leave the server unable to work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "idle_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.write_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "write_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::Invalid {
                field: "max_line_length",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.outbox.capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "outbox.capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Default config file location (`<config_dir>/huddle/huddled.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("huddle").join("huddled.toml"))
}

fn duration_from_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
