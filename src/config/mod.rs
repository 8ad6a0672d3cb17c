use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serial::ProtocolTokens;

// Constants from the recorder firmware and its Arduino serial core
const DEFAULT_PORT: &str = "/dev/ttyUSB0";
const DEFAULT_BAUD_RATE: u32 = 115200;
const DEVICE_RX_BUFFER_SIZE: usize = 64;
const DEFAULT_CHUNK_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything needed to open the link and run transfers over it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub link: LinkConfig,
    pub upload: UploadConfig,
    pub download: DownloadConfig,
    pub tokens: ProtocolTokens,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// The board reboots when the port opens (DTR reset).
    pub settle_delay_ms: u64,
    pub handshake_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub chunk_size: usize,
    pub device_buffer_size: usize,
    pub pacing_delay_ms: u64,
    pub final_ack_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub chunk_cap: usize,
    pub inter_file_delay_ms: u64,
    pub destination_dir: PathBuf,
    pub files: Vec<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 2000,
            settle_delay_ms: 3000,
            handshake_timeout_ms: 5000,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            device_buffer_size: DEVICE_RX_BUFFER_SIZE,
            pacing_delay_ms: 10,
            final_ack_timeout_ms: 10_000,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_cap: 2048,
            inter_file_delay_ms: 1000,
            destination_dir: PathBuf::from("downloads"),
            files: Vec::new(),
        }
    }
}

impl LinkConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl UploadConfig {
    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn final_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.final_ack_timeout_ms)
    }
}

impl DownloadConfig {
    pub fn inter_file_delay(&self) -> Duration {
        Duration::from_millis(self.inter_file_delay_ms)
    }
}

impl TransferConfig {
    /// Load from a JSON file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TransferConfig = serde_json::from_str(&text)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link.port.trim().is_empty() {
            return Err(ConfigError::Invalid("port must not be empty".to_string()));
        }
        if self.link.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud rate must be positive".to_string()));
        }
        if self.link.read_timeout_ms == 0 || self.link.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        if self.upload.chunk_size == 0 {
            return Err(ConfigError::Invalid("upload chunk size must be positive".to_string()));
        }
        // Half the device buffer leaves room for the firmware to drain to the card.
        let max_chunk = self.upload.device_buffer_size / 2;
        if self.upload.chunk_size > max_chunk {
            return Err(ConfigError::Invalid(format!(
                "upload chunk size {} exceeds {} (half of the {}-byte device buffer)",
                self.upload.chunk_size, max_chunk, self.upload.device_buffer_size
            )));
        }
        if self.download.chunk_cap == 0 {
            return Err(ConfigError::Invalid("download chunk cap must be positive".to_string()));
        }

        let tokens = [
            ("ready", &self.tokens.ready),
            ("store_command", &self.tokens.store_command),
            ("awaiting_size", &self.tokens.awaiting_size),
            ("data_ready", &self.tokens.data_ready),
            ("transfer_complete", &self.tokens.transfer_complete),
            ("error", &self.tokens.error),
            ("size_header", &self.tokens.size_header),
        ];
        if let Some((name, _)) = tokens.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("token '{}' must not be empty", name)));
        }

        Ok(())
    }
}
