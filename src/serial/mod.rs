pub mod fake;
pub mod interface;
pub mod protocol;

pub use interface::{NativePort, SerialInterface};
pub use protocol::{HandshakeProtocol, ProtocolTokens, TokenOutcome};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Communication timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;

/// Raw byte transport underneath a [`SerialInterface`].
///
/// `read_data` returns as soon as at least one byte is available and fails
/// with [`SerialError::Timeout`] when nothing arrives within `timeout_ms`.
#[async_trait]
pub trait SerialPortIO: Send {
    async fn send_data(&mut self, data: &[u8]) -> Result<()>;
    async fn read_data(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize>;
    async fn flush(&mut self) -> Result<()>;
    /// Discard anything the OS has received but not yet handed to us.
    fn clear_input(&mut self) -> Result<()>;
}
