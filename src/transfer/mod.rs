pub mod download;
pub mod progress;
pub mod upload;

pub use download::DownloadSession;
pub use progress::{percent_complete, LogProgress, NoProgress, ProgressReporter};
pub use upload::{UploadSession, UploadState};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::serial::SerialError;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Local file not found: {}", .0.display())]
    LocalFileNotFound(PathBuf),

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("Timed out waiting for '{expected}'")]
    HandshakeTimeout { expected: String },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Device reported an error: {0}")]
    RemoteError(String),

    #[error("Partial transfer: received {received} of {expected} bytes")]
    PartialTransfer { expected: u64, received: u64 },

    #[error("Size mismatch: declared {declared} bytes but moved {moved}")]
    SizeMismatch { declared: u64, moved: u64 },

    #[error("Serial link error: {0}")]
    Serial(#[from] SerialError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

#[derive(Debug)]
pub enum TransferStatus {
    Pending,
    Succeeded,
    Failed(TransferError),
}

/// One file crossing the link, owned by the session that moves it.
#[derive(Debug)]
pub struct Transfer {
    pub id: Uuid,
    pub direction: Direction,
    pub filename: String,
    pub declared_size: u64,
    pub bytes_moved: u64,
    pub status: TransferStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    crc32: u32,
}

impl Transfer {
    pub fn new(direction: Direction, filename: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            filename: filename.into(),
            declared_size: 0,
            bytes_moved: 0,
            status: TransferStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            crc32: 0,
        }
    }

    pub(crate) fn record_chunk(&mut self, chunk: &[u8]) {
        self.bytes_moved += chunk.len() as u64;
        let mut hasher = crc32fast::Hasher::new_with_initial(self.crc32);
        hasher.update(chunk);
        self.crc32 = hasher.finalize();
    }

    /// CRC-32 of every byte moved so far.
    pub fn checksum(&self) -> u32 {
        self.crc32
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, TransferStatus::Succeeded)
    }

    pub fn error(&self) -> Option<&TransferError> {
        match &self.status {
            TransferStatus::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Close the transfer with the session's result.
    pub(crate) fn finish(&mut self, result: Result<(), TransferError>) {
        self.status = match result {
            Ok(()) if self.bytes_moved == self.declared_size => TransferStatus::Succeeded,
            Ok(()) => TransferStatus::Failed(TransferError::SizeMismatch {
                declared: self.declared_size,
                moved: self.bytes_moved,
            }),
            Err(err) => TransferStatus::Failed(err),
        };
        self.finished_at = Some(Utc::now());

        match &self.status {
            TransferStatus::Succeeded => log::info!(
                "[{}] {} '{}' succeeded: {} bytes, crc32 {:08x}",
                self.id,
                self.direction.as_str(),
                self.filename,
                self.bytes_moved,
                self.checksum()
            ),
            TransferStatus::Failed(err) => log::error!(
                "[{}] {} '{}' failed after {}/{} bytes: {}",
                self.id,
                self.direction.as_str(),
                self.filename,
                self.bytes_moved,
                self.declared_size,
                err
            ),
            TransferStatus::Pending => {}
        }
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            id: self.id,
            direction: self.direction,
            filename: self.filename.clone(),
            declared_size: self.declared_size,
            bytes_moved: self.bytes_moved,
            succeeded: self.is_success(),
            error: self.error().map(|e| e.to_string()),
            crc32: format!("{:08x}", self.checksum()),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        }
    }
}

/// Serializable record of a finished transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSummary {
    pub id: Uuid,
    pub direction: Direction,
    pub filename: String,
    pub declared_size: u64,
    pub bytes_moved: u64,
    pub succeeded: bool,
    pub error: Option<String>,
    pub crc32: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Strip any directory prefix; the device only knows bare names on its card root.
pub fn basename(name: &str) -> Result<String, TransferError> {
    let base = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        return Err(TransferError::InvalidFileName(name.to_string()));
    }
    Ok(base.to_string())
}

pub(crate) fn path_basename(path: &Path) -> Result<String, TransferError> {
    basename(&path.to_string_lossy())
}
