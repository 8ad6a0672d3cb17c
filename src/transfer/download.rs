use std::path::Path;

use tokio::fs::{self, File};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{basename, Direction, ProgressReporter, Transfer, TransferError};
use crate::config::DownloadConfig;
use crate::serial::{HandshakeProtocol, SerialError, SerialInterface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    Requested,
    HeaderReceived,
    Receiving,
    Succeeded,
    Failed,
}

/// Pulls files off the device card, one request at a time.
pub struct DownloadSession<'a> {
    link: &'a mut SerialInterface,
    protocol: &'a HandshakeProtocol,
    config: &'a DownloadConfig,
    state: DownloadState,
}

impl<'a> DownloadSession<'a> {
    pub fn new(
        link: &'a mut SerialInterface,
        protocol: &'a HandshakeProtocol,
        config: &'a DownloadConfig,
    ) -> Self {
        Self {
            link,
            protocol,
            config,
            state: DownloadState::Idle,
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    /// Fetch a single file into `dest_dir`.
    pub async fn run(
        &mut self,
        name: &str,
        dest_dir: &Path,
        progress: &mut dyn ProgressReporter,
    ) -> Transfer {
        let mut transfer = self.begin(name);
        let result = self.execute(name, dest_dir, &mut transfer, progress).await;
        self.conclude(&mut transfer, result);
        transfer
    }

    /// Fetch a single file into `writer` instead of the destination directory.
    pub async fn run_to_writer<W>(
        &mut self,
        name: &str,
        writer: &mut W,
        progress: &mut dyn ProgressReporter,
    ) -> Transfer
    where
        W: AsyncWrite + Unpin,
    {
        let mut transfer = self.begin(name);
        let result = match self.request(name, &mut transfer).await {
            Ok(filename) => self.stream(&filename, writer, &mut transfer, progress).await,
            Err(e) => Err(e),
        };
        self.conclude(&mut transfer, result);
        transfer
    }

    fn begin(&mut self, name: &str) -> Transfer {
        self.state = DownloadState::Idle;
        let label = basename(name).unwrap_or_else(|_| name.to_string());
        Transfer::new(Direction::Download, label)
    }

    fn conclude(&mut self, transfer: &mut Transfer, result: Result<(), TransferError>) {
        self.state = if result.is_ok() {
            DownloadState::Succeeded
        } else {
            DownloadState::Failed
        };
        transfer.finish(result);
    }

    /// Fetch every name in order. A failed file never stops the ones after it.
    pub async fn run_batch<S: AsRef<str>>(
        &mut self,
        names: &[S],
        dest_dir: &Path,
        progress: &mut dyn ProgressReporter,
    ) -> Vec<Transfer> {
        let mut transfers = Vec::with_capacity(names.len());

        for name in names {
            let name: &str = name.as_ref();
            let transfer = self.run(name, dest_dir, progress).await;
            transfers.push(transfer);

            // Let a slow or failed transfer finish trickling in, then drop it.
            tokio::time::sleep(self.config.inter_file_delay()).await;
            if let Err(e) = self.link.flush_input() {
                log::warn!("Failed to flush input after '{}': {}", name, e);
            }
        }

        let failed = transfers.iter().filter(|t| !t.is_success()).count();
        log::info!(
            "Batch finished: {} of {} files downloaded",
            transfers.len() - failed,
            transfers.len()
        );
        transfers
    }

    async fn execute(
        &mut self,
        name: &str,
        dest_dir: &Path,
        transfer: &mut Transfer,
        progress: &mut dyn ProgressReporter,
    ) -> Result<(), TransferError> {
        let filename = self.request(name, transfer).await?;

        fs::create_dir_all(dest_dir).await?;
        let destination = dest_dir.join(&filename);
        let mut file = File::create(&destination).await?;
        self.stream(&filename, &mut file, transfer, progress).await?;

        log::info!("[{}] Saved {}", transfer.id, destination.display());
        Ok(())
    }

    /// Ask for `name` and read its size header. Returns the requested base name.
    async fn request(
        &mut self,
        name: &str,
        transfer: &mut Transfer,
    ) -> Result<String, TransferError> {
        let filename = basename(name)?;
        log::info!("[{}] Requesting '{}'", transfer.id, filename);
        self.link.write_line(&filename).await?;
        self.state = DownloadState::Requested;

        let within = self.link.read_timeout();
        let header = match self.link.read_line(within).await {
            Ok(line) => line,
            Err(SerialError::Timeout) => {
                return Err(TransferError::HandshakeTimeout {
                    expected: format!("{} <size>", self.protocol.tokens().size_header),
                })
            }
            Err(e) => return Err(e.into()),
        };
        log::debug!("< {}", header);
        transfer.declared_size = self.protocol.parse_size_header(&header)?;
        self.state = DownloadState::HeaderReceived;
        log::info!(
            "[{}] '{}' is {} bytes",
            transfer.id,
            filename,
            transfer.declared_size
        );
        Ok(filename)
    }

    /// Receive the data plane into `writer`, then flush it.
    ///
    /// A receive failure takes precedence over a flush failure.
    async fn stream<W>(
        &mut self,
        filename: &str,
        writer: &mut W,
        transfer: &mut Transfer,
        progress: &mut dyn ProgressReporter,
    ) -> Result<(), TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        self.state = DownloadState::Receiving;
        let received = self.receive(filename, writer, transfer, progress).await;
        let flushed = writer.flush().await;

        if let Err(e) = received {
            if let Err(flush_err) = flushed {
                log::warn!(
                    "[{}] Flush after failed transfer also failed: {}",
                    transfer.id,
                    flush_err
                );
            }
            return Err(e);
        }
        flushed?;
        Ok(())
    }

    /// Copy the data plane into `writer` until the declared size is reached.
    async fn receive<W>(
        &mut self,
        filename: &str,
        writer: &mut W,
        transfer: &mut Transfer,
        progress: &mut dyn ProgressReporter,
    ) -> Result<(), TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        while transfer.bytes_moved < transfer.declared_size {
            let remaining = transfer.declared_size - transfer.bytes_moved;
            let wanted = (remaining as usize).min(self.config.chunk_cap);
            let chunk = self.link.read_bytes(wanted).await?;
            if chunk.is_empty() {
                return Err(TransferError::PartialTransfer {
                    expected: transfer.declared_size,
                    received: transfer.bytes_moved,
                });
            }

            writer.write_all(&chunk).await?;
            transfer.record_chunk(&chunk);
            progress.report(filename, transfer.bytes_moved, transfer.declared_size);
        }
        Ok(())
    }
}
