//! Configuration module
//!
//! Handles loading and saving rfxfer configuration, and checks that the
//! command-line flags describe exactly one role.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{TransferMode, DEFAULT_CHANNEL, DEFAULT_PIPE_ADDRESSES};
use crate::radio::{AutoAck, PipeAddresses, RadioResult, MAX_PIPE_ADDRESS};
use crate::session::{RetryPolicy, Role, DEFAULT_INTERVAL_SECONDS};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Radio link settings
    #[serde(default)]
    pub radio: RadioConfig,

    /// Pipe addresses of the two directions
    #[serde(default)]
    pub pipes: PipeConfig,

    /// Transfer protocol settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Sensor sampling settings
    #[serde(default)]
    pub sensor: SensorConfig,
}

/// Radio link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Channel both ends tune to
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Local UDP address of the link
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// UDP address of the other node
    #[serde(default = "default_peer")]
    pub peer: SocketAddr,
    /// Wait for each ack in microseconds
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_us: u64,
    /// Retransmissions before a send counts as failed
    #[serde(default = "default_auto_retries")]
    pub auto_retries: u8,
}

fn default_channel() -> u8 {
    DEFAULT_CHANNEL
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 24_110))
}

fn default_peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 24_110))
}

fn default_ack_timeout() -> u64 {
    1250
}

fn default_auto_retries() -> u8 {
    15
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            bind: default_bind(),
            peer: default_peer(),
            ack_timeout_us: default_ack_timeout(),
            auto_retries: default_auto_retries(),
        }
    }
}

impl RadioConfig {
    pub fn auto_ack(&self) -> AutoAck {
        AutoAck {
            timeout: Duration::from_micros(self.ack_timeout_us),
            retries: self.auto_retries,
        }
    }
}

/// Pipe address configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeConfig {
    /// Transmitter reads, receiver writes
    #[serde(default = "default_pipe_a")]
    pub a: u64,
    /// Transmitter writes, receiver reads
    #[serde(default = "default_pipe_b")]
    pub b: u64,
}

fn default_pipe_a() -> u64 {
    DEFAULT_PIPE_ADDRESSES[0]
}

fn default_pipe_b() -> u64 {
    DEFAULT_PIPE_ADDRESSES[1]
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            a: default_pipe_a(),
            b: default_pipe_b(),
        }
    }
}

impl PipeConfig {
    pub fn for_role(&self, role: Role) -> RadioResult<PipeAddresses> {
        PipeAddresses::for_role(role, self.a, self.b)
    }
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// What the frames carry unless `--sensor` is given
    #[serde(default)]
    pub mode: TransferMode,
    /// Reception rate measurement interval in seconds
    #[serde(default = "default_measure_seconds")]
    pub measure_seconds: u8,
    /// Retries for an unconfirmed data frame
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay in ms
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Largest retry delay in ms
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Sleep after an empty poll in microseconds
    #[serde(default = "default_poll_idle")]
    pub poll_idle_us: u64,
}

fn default_measure_seconds() -> u8 {
    DEFAULT_INTERVAL_SECONDS
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    1
}

fn default_max_backoff() -> u64 {
    50
}

fn default_poll_idle() -> u64 {
    200
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            mode: TransferMode::default(),
            measure_seconds: default_measure_seconds(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            max_backoff_ms: default_max_backoff(),
            poll_idle_us: default_poll_idle(),
        }
    }
}

impl TransferConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn poll_idle(&self) -> Duration {
        Duration::from_micros(self.poll_idle_us)
    }
}

/// Sensor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Stop after this many samples (unbounded if not set)
    pub sample_limit: Option<u64>,
    /// Seed for the synthetic sensor
    #[serde(default)]
    pub seed: u64,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("rfxfer/config.toml")),
            Some(PathBuf::from("./rfxfer.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check values the protocol cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        for (name, address) in [("a", self.pipes.a), ("b", self.pipes.b)] {
            if address > MAX_PIPE_ADDRESS {
                return Err(ConfigError::Invalid(format!(
                    "pipe {} address {:#x} does not fit in 40 bits",
                    name, address
                )));
            }
        }
        if self.pipes.a == self.pipes.b {
            return Err(ConfigError::Invalid(
                "pipes a and b must differ".to_string(),
            ));
        }
        if self.radio.ack_timeout_us == 0 {
            return Err(ConfigError::Invalid(
                "ack_timeout_us must be at least 1".to_string(),
            ));
        }
        if self.transfer.measure_seconds == 0 {
            return Err(ConfigError::Invalid(
                "measure_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        radio: RadioConfig {
            peer: SocketAddr::from(([192, 168, 1, 20], 24_110)),
            ..Default::default()
        },
        sensor: SensorConfig {
            sample_limit: Some(1000),
            seed: 42,
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

/// Flag combinations that do not describe a runnable transfer
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsageError {
    #[error("Cannot be both transmitter and receiver")]
    BothRoles,

    #[error("A role is required: use -s [source file] or -d [dest file]")]
    NoRole,

    #[error("Cannot measure data reception rate from the transmitter")]
    MeasureOnTransmitter,
}

/// A validated transfer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Transmit { source: PathBuf },
    Receive { dest: PathBuf, measure: bool },
}

impl Invocation {
    /// Turn role flags into a request, before any radio is touched
    pub fn resolve(
        source: Option<PathBuf>,
        dest: Option<PathBuf>,
        measure: bool,
    ) -> Result<Self, UsageError> {
        match (source, dest) {
            (Some(_), Some(_)) => Err(UsageError::BothRoles),
            (None, None) => Err(UsageError::NoRole),
            (Some(_), None) if measure => Err(UsageError::MeasureOnTransmitter),
            (Some(source), None) => Ok(Invocation::Transmit { source }),
            (None, Some(dest)) => Ok(Invocation::Receive { dest, measure }),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Invocation::Transmit { .. } => Role::Transmitter,
            Invocation::Receive { .. } => Role::Receiver,
        }
    }
}
