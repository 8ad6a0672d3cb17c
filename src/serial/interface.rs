use std::io::{Read, Write};
use std::time::Duration;

use async_trait::async_trait;
use serialport::{ClearBuffer, SerialPort};
use tokio::time::{timeout, Instant};

use super::{Result, SerialError, SerialPortIO};
use crate::config::LinkConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const PORT_TIMEOUT: Duration = Duration::from_millis(100);
const READ_BUFFER_SIZE: usize = 512;

/// `SerialPortIO` over a real OS serial port.
pub struct NativePort {
    port: Box<dyn SerialPort>,
}

impl NativePort {
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|e| SerialError::ConnectionFailed(format!("{}: {}", port_name, e)))?;
        Ok(Self { port })
    }
}

#[async_trait]
impl SerialPortIO for NativePort {
    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize> {
        let port = &mut self.port;

        let read_operation = async {
            loop {
                match port.bytes_to_read() {
                    Ok(0) => tokio::time::sleep(POLL_INTERVAL).await,
                    Ok(available) => {
                        let wanted = (available as usize).min(buffer.len());
                        match port.read(&mut buffer[..wanted]) {
                            Ok(0) => tokio::time::sleep(POLL_INTERVAL).await,
                            Ok(bytes_read) => return Ok(bytes_read),
                            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                            Err(e) => return Err(SerialError::IoError(e)),
                        }
                    }
                    Err(e) => return Err(SerialError::SerialportError(e)),
                }
            }
        };

        timeout(Duration::from_millis(timeout_ms), read_operation)
            .await
            .map_err(|_| SerialError::Timeout)?
    }

    async fn flush(&mut self) -> Result<()> {
        self.port.flush()?;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// Line and byte oriented view of a serial connection.
///
/// Bytes that arrive after a line terminator are kept in `pending` so that a
/// header line and the start of a data stream can share one OS read.
pub struct SerialInterface {
    port: Option<Box<dyn SerialPortIO>>,
    port_name: String,
    read_timeout: Duration,
    pending: Vec<u8>,
}

impl SerialInterface {
    /// Open the configured port and wait out the device's reset-on-open.
    pub async fn open(config: &LinkConfig) -> Result<Self> {
        let port = NativePort::open(&config.port, config.baud_rate)?;
        log::info!("Opened {} at {} baud", config.port, config.baud_rate);
        Self::attach(Box::new(port), config).await
    }

    /// Wrap an already opened transport, applying the same settle delay as `open`.
    pub async fn attach(port: Box<dyn SerialPortIO>, config: &LinkConfig) -> Result<Self> {
        let link = Self::from_io(port, &config.port, config.read_timeout());
        log::debug!(
            "Waiting {:?} for the device on {} to settle",
            config.settle_delay(),
            config.port
        );
        tokio::time::sleep(config.settle_delay()).await;
        Ok(link)
    }

    /// Wrap a transport without any settle delay.
    pub fn from_io(port: Box<dyn SerialPortIO>, port_name: &str, read_timeout: Duration) -> Self {
        Self {
            port: Some(port),
            port_name: port_name.to_string(),
            read_timeout,
            pending: Vec::new(),
        }
    }

    /// Release the port
    pub fn disconnect(&mut self) {
        if self.port.take().is_some() {
            log::info!("Disconnecting from {}", self.port_name);
        }
        self.pending.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPortIO>> {
        self.port.as_mut().ok_or(SerialError::NotConnected)
    }

    pub async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.send_data(data).await?;
        port.flush().await
    }

    /// Write `text` followed by a newline.
    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        log::debug!("> {}", text);
        self.write_bytes(format!("{}\n", text).as_bytes()).await
    }

    /// Read one line, trimmed of its terminator and surrounding whitespace.
    pub async fn read_line(&mut self, within: Duration) -> Result<String> {
        let deadline = Instant::now() + within;

        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=pos).collect();
                return Ok(String::from_utf8_lossy(&raw).trim().to_string());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SerialError::Timeout);
            }
            let remaining_ms = (deadline - now).as_millis().max(1) as u64;

            let mut buf = [0u8; READ_BUFFER_SIZE];
            let bytes_read = self.port_mut()?.read_data(&mut buf, remaining_ms).await?;
            self.pending.extend_from_slice(&buf[..bytes_read]);
        }
    }

    /// Read up to `max_n` bytes, waiting at most the default read timeout.
    ///
    /// Returns fewer bytes (possibly none) if the peer stalls.
    pub async fn read_bytes(&mut self, max_n: usize) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.read_timeout;
        let take = self.pending.len().min(max_n);
        let mut out: Vec<u8> = self.pending.drain(..take).collect();

        while out.len() < max_n {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining_ms = (deadline - now).as_millis().max(1) as u64;

            let mut buf = [0u8; READ_BUFFER_SIZE];
            let wanted = (max_n - out.len()).min(buf.len());
            match self.port_mut()?.read_data(&mut buf[..wanted], remaining_ms).await {
                Ok(bytes_read) => out.extend_from_slice(&buf[..bytes_read]),
                Err(SerialError::Timeout) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(out)
    }

    /// Drop retained bytes and anything buffered by the OS.
    pub fn flush_input(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            log::debug!("Discarding {} buffered bytes", self.pending.len());
            self.pending.clear();
        }
        self.port_mut()?.clear_input()
    }
}

impl Drop for SerialInterface {
    fn drop(&mut self) {
        self.disconnect();
    }
}
