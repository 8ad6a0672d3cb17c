use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{basename, path_basename, Direction, ProgressReporter, Transfer, TransferError};
use crate::config::UploadConfig;
use crate::serial::{HandshakeProtocol, SerialInterface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    CommandSent,
    SizeRequested,
    SizeSent,
    DataReady,
    Sending,
    AwaitingFinalAck,
    Succeeded,
    Failed,
}

/// Pushes one host file onto the device card.
///
/// The device has no per-chunk acknowledgement, so each chunk is followed by
/// a fixed pause while the firmware drains its receive buffer to the card.
pub struct UploadSession<'a> {
    link: &'a mut SerialInterface,
    protocol: &'a HandshakeProtocol,
    handshake_timeout: Duration,
    config: &'a UploadConfig,
    state: UploadState,
    failed_at: Option<UploadState>,
}

impl<'a> UploadSession<'a> {
    pub fn new(
        link: &'a mut SerialInterface,
        protocol: &'a HandshakeProtocol,
        handshake_timeout: Duration,
        config: &'a UploadConfig,
    ) -> Self {
        Self {
            link,
            protocol,
            handshake_timeout,
            config,
            state: UploadState::Idle,
            failed_at: None,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// The step the last run was in when it failed.
    pub fn failed_at(&self) -> Option<UploadState> {
        self.failed_at
    }

    /// Run the whole exchange. Failures end up in the returned transfer's status.
    pub async fn run(&mut self, source: &Path, progress: &mut dyn ProgressReporter) -> Transfer {
        let name = path_basename(source).unwrap_or_else(|_| source.to_string_lossy().into_owned());
        let mut transfer = Transfer::new(Direction::Upload, name);
        self.reset();

        let result = self.execute(source, &mut transfer, progress).await;
        self.conclude(&mut transfer, result);
        transfer
    }

    /// Upload `declared_size` bytes from `reader` under `filename`.
    ///
    /// A reader that ends early fails the transfer with `SizeMismatch`.
    pub async fn run_reader<R>(
        &mut self,
        filename: &str,
        declared_size: u64,
        reader: R,
        progress: &mut dyn ProgressReporter,
    ) -> Transfer
    where
        R: AsyncRead + Unpin,
    {
        let mut transfer = Transfer::new(Direction::Upload, filename);
        transfer.declared_size = declared_size;
        self.reset();

        let result = match basename(filename) {
            Ok(name) => {
                transfer.filename = name;
                self.transmit(reader, &mut transfer, progress).await
            }
            Err(e) => Err(e),
        };
        self.conclude(&mut transfer, result);
        transfer
    }

    fn reset(&mut self) {
        self.state = UploadState::Idle;
        self.failed_at = None;
    }

    fn conclude(&mut self, transfer: &mut Transfer, result: Result<(), TransferError>) {
        if result.is_ok() {
            self.state = UploadState::Succeeded;
        } else {
            self.failed_at = Some(self.state);
            self.state = UploadState::Failed;
        }
        transfer.finish(result);
    }

    async fn execute(
        &mut self,
        source: &Path,
        transfer: &mut Transfer,
        progress: &mut dyn ProgressReporter,
    ) -> Result<(), TransferError> {
        let metadata = match tokio::fs::metadata(source).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return Err(TransferError::LocalFileNotFound(source.to_path_buf())),
        };
        transfer.filename = path_basename(source)?;
        transfer.declared_size = metadata.len();
        let file = File::open(source).await?;

        log::info!(
            "[{}] Uploading '{}' ({} bytes) from {}",
            transfer.id,
            transfer.filename,
            transfer.declared_size,
            source.display()
        );
        self.transmit(file, transfer, progress).await
    }

    async fn transmit<R>(
        &mut self,
        mut reader: R,
        transfer: &mut Transfer,
        progress: &mut dyn ProgressReporter,
    ) -> Result<(), TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let protocol = self.protocol;
        let tokens = protocol.tokens();
        let command = format!("{} {}", tokens.store_command, transfer.filename);
        self.link.write_line(&command).await?;
        self.state = UploadState::CommandSent;

        protocol
            .expect_token(self.link, &tokens.awaiting_size, self.handshake_timeout)
            .await?;
        self.state = UploadState::SizeRequested;

        self.link
            .write_line(&transfer.declared_size.to_string())
            .await?;
        self.state = UploadState::SizeSent;

        protocol
            .expect_token(self.link, &tokens.data_ready, self.handshake_timeout)
            .await?;
        self.state = UploadState::DataReady;

        let mut buf = vec![0u8; self.config.chunk_size];
        while transfer.bytes_moved < transfer.declared_size {
            let remaining = transfer.declared_size - transfer.bytes_moved;
            let wanted = (remaining as usize).min(buf.len());
            let n = reader.read(&mut buf[..wanted]).await?;
            if n == 0 {
                return Err(TransferError::SizeMismatch {
                    declared: transfer.declared_size,
                    moved: transfer.bytes_moved,
                });
            }

            self.state = UploadState::Sending;
            self.link.write_bytes(&buf[..n]).await?;
            transfer.record_chunk(&buf[..n]);
            tokio::time::sleep(self.config.pacing_delay()).await;
            progress.report(&transfer.filename, transfer.bytes_moved, transfer.declared_size);
        }

        self.state = UploadState::AwaitingFinalAck;
        let ack = protocol
            .expect_token(
                self.link,
                &tokens.transfer_complete,
                self.config.final_ack_timeout(),
            )
            .await?;
        log::debug!("[{}] Device confirmed: {}", transfer.id, ack);

        Ok(())
    }
}
