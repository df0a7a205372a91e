//! Configuration for the command server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::protocol::{Decoding, FrameCodec, MAX_FRAME_BYTES};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// How accepted connections are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// One connection at a time, served on the listener thread.
    #[default]
    Serial,
    /// Each connection on its own thread.
    Threaded,
}

/// Command-line arguments for the command server
#[derive(Parser, Debug)]
#[command(name = "command-bridge")]
#[command(author = "command-bridge authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP command server speaking length-prefixed JSON", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:55557)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Milliseconds to sleep between accept polls
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Connection scheduling mode
    #[arg(long, value_enum)]
    pub mode: Option<ConnectionMode>,

    /// Largest accepted request payload in bytes
    #[arg(long)]
    pub max_frame_bytes: Option<usize>,

    /// Disable recovery of payloads with trailing garbage
    #[arg(long)]
    pub strict: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Sleep between accept polls, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub mode: ConnectionMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            poll_interval_ms: default_poll_interval_ms(),
            mode: ConnectionMode::default(),
        }
    }
}

/// Framing configuration
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Retry parsing after cutting trailing bytes off the payload
    #[serde(default = "default_true")]
    pub recovery: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            recovery: true,
        }
    }
}

/// Per-connection socket options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_true")]
    pub nodelay: bool,
    #[serde(default = "default_socket_buffer")]
    pub send_buffer_bytes: usize,
    #[serde(default = "default_socket_buffer")]
    pub recv_buffer_bytes: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            send_buffer_bytes: default_socket_buffer(),
            recv_buffer_bytes: default_socket_buffer(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:55557".to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_frame_bytes() -> usize {
    MAX_FRAME_BYTES
}

fn default_socket_buffer() -> usize {
    64 * 1024
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub poll_interval: Duration,
    pub mode: ConnectionMode,
    pub codec: FrameCodec,
    pub socket: SocketConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Resolve already-parsed CLI args against the file they point at.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents)
                .map_err(|source| ConfigError::TomlParse {
                    path: config_path.clone(),
                    source,
                })?
        } else {
            TomlConfig::default()
        };

        let mut config = Self::from_toml(toml_config);

        // CLI takes precedence
        if let Some(listen) = cli.listen {
            config.listen = listen;
        }
        if let Some(ms) = cli.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(mode) = cli.mode {
            config.mode = mode;
        }
        if let Some(max) = cli.max_frame_bytes {
            config.codec.max_frame_bytes = max;
        }
        if cli.strict {
            config.codec.decoding = Decoding::Strict;
        }
        if cli.log_level != "info" {
            config.log_level = cli.log_level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Resolve file values, filling defaults for anything missing.
    pub fn from_toml(toml_config: TomlConfig) -> Self {
        Config {
            listen: toml_config.server.listen,
            poll_interval: Duration::from_millis(toml_config.server.poll_interval_ms),
            mode: toml_config.server.mode,
            codec: FrameCodec {
                max_frame_bytes: toml_config.protocol.max_frame_bytes,
                decoding: if toml_config.protocol.recovery {
                    Decoding::Lenient
                } else {
                    Decoding::Strict
                },
            },
            socket: toml_config.socket,
            log_level: toml_config.logging.level,
        }
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.codec.max_frame_bytes == 0 || self.codec.max_frame_bytes > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_frame_bytes must be between 1 and {}, got {}",
                u32::MAX,
                self.codec.max_frame_bytes
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
