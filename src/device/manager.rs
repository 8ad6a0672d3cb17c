use std::path::Path;

use crate::config::TransferConfig;
use crate::serial::{HandshakeProtocol, SerialInterface, SerialPortIO};
use crate::transfer::{DownloadSession, ProgressReporter, Transfer, TransferError, UploadSession};

/// Owns the single connection to the recorder for the lifetime of a run.
///
/// Transfers borrow the link mutably, so at most one is ever in flight.
pub struct DeviceManager {
    link: SerialInterface,
    protocol: HandshakeProtocol,
    config: TransferConfig,
}

impl DeviceManager {
    /// Open the configured port and complete the startup handshake.
    pub async fn connect(config: TransferConfig) -> Result<Self, TransferError> {
        log::info!("Attempting to connect to port: {}", config.link.port);
        let link = SerialInterface::open(&config.link).await?;
        Self::handshake(link, config).await
    }

    /// Same as [`connect`](Self::connect) over an already opened transport.
    pub async fn attach(
        port: Box<dyn SerialPortIO>,
        config: TransferConfig,
    ) -> Result<Self, TransferError> {
        let link = SerialInterface::attach(port, &config.link).await?;
        Self::handshake(link, config).await
    }

    async fn handshake(
        mut link: SerialInterface,
        config: TransferConfig,
    ) -> Result<Self, TransferError> {
        let protocol = HandshakeProtocol::new(config.tokens.clone());
        if let Err(e) = protocol
            .await_ready(&mut link, config.link.handshake_timeout())
            .await
        {
            log::error!("Device on {} never became ready: {}", link.port_name(), e);
            return Err(e);
        }

        Ok(Self {
            link,
            protocol,
            config,
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Store a host file on the device card.
    pub async fn upload_file(
        &mut self,
        source: &Path,
        progress: &mut dyn ProgressReporter,
    ) -> Transfer {
        let mut session = UploadSession::new(
            &mut self.link,
            &self.protocol,
            self.config.link.handshake_timeout(),
            &self.config.upload,
        );
        session.run(source, progress).await
    }

    /// Fetch one file from the device card into `dest_dir`.
    pub async fn download_file(
        &mut self,
        name: &str,
        dest_dir: &Path,
        progress: &mut dyn ProgressReporter,
    ) -> Transfer {
        let mut session =
            DownloadSession::new(&mut self.link, &self.protocol, &self.config.download);
        session.run(name, dest_dir, progress).await
    }

    /// Fetch several files in order; failures are isolated per file.
    pub async fn download_files<S: AsRef<str>>(
        &mut self,
        names: &[S],
        dest_dir: &Path,
        progress: &mut dyn ProgressReporter,
    ) -> Vec<Transfer> {
        let mut session =
            DownloadSession::new(&mut self.link, &self.protocol, &self.config.download);
        session.run_batch(names, dest_dir, progress).await
    }

    /// Release the port. Dropping the manager has the same effect.
    pub fn disconnect(mut self) {
        self.link.disconnect();
        log::info!("Disconnected from device");
    }
}
