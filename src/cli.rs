use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{ConfigError, TransferConfig};

/// Move files between this host and the SD recorder over a serial link
#[derive(Parser, Debug)]
#[command(name = "serial-courier", version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file; flags below override its values
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Serial port of the device (default: /dev/ttyUSB0)
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Link bit rate, must match the firmware (default: 115200)
    #[arg(short, long, global = true)]
    pub baud: Option<u32>,

    /// Per-read timeout in milliseconds
    #[arg(long, global = true)]
    pub read_timeout_ms: Option<u64>,

    /// How long to wait for each handshake token, in milliseconds
    #[arg(long, global = true)]
    pub handshake_timeout_ms: Option<u64>,

    /// Wait after opening the port while the board resets, in milliseconds
    #[arg(long, global = true)]
    pub settle_delay_ms: Option<u64>,

    /// Print a JSON summary of every transfer on stdout
    #[arg(long, global = true, default_value_t = false)]
    pub summary_json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Store a local file on the device card
    Upload {
        /// File to send; only its base name is used on the card
        file: PathBuf,

        /// Bytes per write, at most half the device receive buffer
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Pause after every chunk, in milliseconds
        #[arg(long)]
        pacing_ms: Option<u64>,

        /// Wait for the final confirmation, in milliseconds
        #[arg(long)]
        final_ack_timeout_ms: Option<u64>,
    },
    /// Fetch files from the device card
    Download {
        /// Names to fetch; defaults to the configured file list
        files: Vec<String>,

        /// Local directory for the downloaded files
        #[arg(short, long)]
        dest: Option<PathBuf>,

        /// Largest single read, in bytes
        #[arg(long)]
        chunk_cap: Option<usize>,

        /// Pause between files, in milliseconds
        #[arg(long)]
        inter_file_delay_ms: Option<u64>,
    },
}

impl Cli {
    /// Configuration file (or defaults) with command-line overrides applied, validated.
    pub fn resolve_config(&self) -> Result<TransferConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => TransferConfig::load(path)?,
            None => TransferConfig::default(),
        };

        if let Some(port) = &self.port {
            config.link.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.link.baud_rate = baud;
        }
        if let Some(ms) = self.read_timeout_ms {
            config.link.read_timeout_ms = ms;
        }
        if let Some(ms) = self.handshake_timeout_ms {
            config.link.handshake_timeout_ms = ms;
        }
        if let Some(ms) = self.settle_delay_ms {
            config.link.settle_delay_ms = ms;
        }

        match &self.command {
            Command::Upload {
                chunk_size,
                pacing_ms,
                final_ack_timeout_ms,
                ..
            } => {
                if let Some(size) = chunk_size {
                    config.upload.chunk_size = *size;
                }
                if let Some(ms) = pacing_ms {
                    config.upload.pacing_delay_ms = *ms;
                }
                if let Some(ms) = final_ack_timeout_ms {
                    config.upload.final_ack_timeout_ms = *ms;
                }
            }
            Command::Download {
                files,
                dest,
                chunk_cap,
                inter_file_delay_ms,
            } => {
                if !files.is_empty() {
                    config.download.files = files.clone();
                }
                if let Some(dir) = dest {
                    config.download.destination_dir = dir.clone();
                }
                if let Some(cap) = chunk_cap {
                    config.download.chunk_cap = *cap;
                }
                if let Some(ms) = inter_file_delay_ms {
                    config.download.inter_file_delay_ms = *ms;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }
}
