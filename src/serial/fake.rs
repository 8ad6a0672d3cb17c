//! In-memory transports for exercising the link and the sessions without hardware.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ProtocolTokens, Result, SerialError, SerialPortIO};

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Bytes(Vec<u8>),
    /// Nothing arrives for this long.
    Stall(Duration),
}

/// Replays scripted inbound traffic and records everything written to it.
#[derive(Default)]
pub struct ScriptedPort {
    script: VecDeque<ScriptStep>,
    writes: Arc<Mutex<Vec<u8>>>,
    input_clears: Arc<AtomicUsize>,
}

impl ScriptedPort {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script: script.into(),
            ..Self::default()
        }
    }

    /// Script built from device lines, each terminated with `\r\n` like Arduino `println`.
    pub fn from_lines(lines: &[&str]) -> Self {
        Self::new(lines.iter().map(|l| ScriptStep::line(l)).collect())
    }

    /// Shared view of the bytes the host has written.
    pub fn writes(&self) -> Arc<Mutex<Vec<u8>>> {
        self.writes.clone()
    }

    pub fn input_clears(&self) -> Arc<AtomicUsize> {
        self.input_clears.clone()
    }
}

impl ScriptStep {
    pub fn line(text: &str) -> Self {
        ScriptStep::Bytes(format!("{}\r\n", text).into_bytes())
    }
}

#[async_trait]
impl SerialPortIO for ScriptedPort {
    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        self.writes
            .lock()
            .map_err(|_| SerialError::ConnectionFailed("write log poisoned".into()))?
            .extend_from_slice(data);
        Ok(())
    }

    async fn read_data(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize> {
        let mut budget = Duration::from_millis(timeout_ms);

        loop {
            match self.script.pop_front() {
                Some(ScriptStep::Bytes(mut bytes)) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        self.script.push_front(ScriptStep::Bytes(bytes.split_off(n)));
                    }
                    return Ok(n);
                }
                Some(ScriptStep::Stall(stall)) if stall <= budget => {
                    tokio::time::sleep(stall).await;
                    budget -= stall;
                }
                Some(ScriptStep::Stall(stall)) => {
                    tokio::time::sleep(budget).await;
                    self.script.push_front(ScriptStep::Stall(stall - budget));
                    return Err(SerialError::Timeout);
                }
                None => {
                    tokio::time::sleep(budget).await;
                    return Err(SerialError::Timeout);
                }
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.input_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub type DeviceStorage = Arc<Mutex<HashMap<String, Vec<u8>>>>;

enum DeviceState {
    Command,
    AwaitingSize { name: String },
    Receiving { name: String, size: usize, data: Vec<u8> },
}

/// Emulates the recorder firmware: stores uploads and serves download requests
/// from an in-memory card.
pub struct SimulatedDevice {
    tokens: ProtocolTokens,
    storage: DeviceStorage,
    state: DeviceState,
    line: Vec<u8>,
    outbound: VecDeque<u8>,
}

impl SimulatedDevice {
    pub fn new(tokens: ProtocolTokens) -> Self {
        Self::with_storage(tokens, DeviceStorage::default())
    }

    /// Boot against an existing card, announcing readiness like the firmware does.
    pub fn with_storage(tokens: ProtocolTokens, storage: DeviceStorage) -> Self {
        let mut device = Self {
            tokens,
            storage,
            state: DeviceState::Command,
            line: Vec::new(),
            outbound: VecDeque::new(),
        };
        device.emit_line("SD OK");
        let ready = device.tokens.ready.clone();
        device.emit_line(&ready);
        device
    }

    fn emit_line(&mut self, line: &str) {
        self.outbound.extend(line.as_bytes());
        self.outbound.extend(b"\r\n");
    }

    fn store(&mut self, name: String, data: Vec<u8>) {
        if let Ok(mut card) = self.storage.lock() {
            card.insert(name, data);
        }
        let done = self.tokens.transfer_complete.clone();
        self.emit_line(&done);
    }

    fn handle_line(&mut self, line: String) {
        match std::mem::replace(&mut self.state, DeviceState::Command) {
            DeviceState::Command => {
                let store_prefix = format!("{} ", self.tokens.store_command);
                if let Some(name) = line.strip_prefix(store_prefix.as_str()) {
                    self.state = DeviceState::AwaitingSize { name: name.to_string() };
                    let token = self.tokens.awaiting_size.clone();
                    self.emit_line(&token);
                    return;
                }

                let file = self.storage.lock().ok().and_then(|card| card.get(&line).cloned());
                match file {
                    Some(data) => {
                        let header = format!("{} {}", self.tokens.size_header, data.len());
                        self.emit_line(&header);
                        self.outbound.extend(data);
                    }
                    None => {
                        let missing = format!("{}_404", self.tokens.error);
                        self.emit_line(&missing);
                    }
                }
            }
            DeviceState::AwaitingSize { name } => match line.parse::<usize>() {
                Ok(0) => {
                    let token = self.tokens.data_ready.clone();
                    self.emit_line(&token);
                    self.store(name, Vec::new());
                }
                Ok(size) => {
                    let token = self.tokens.data_ready.clone();
                    self.emit_line(&token);
                    self.state = DeviceState::Receiving {
                        name,
                        size,
                        data: Vec::with_capacity(size),
                    };
                }
                Err(_) => {
                    let bad = format!("{}_TAMANHO", self.tokens.error);
                    self.emit_line(&bad);
                }
            },
            DeviceState::Receiving { .. } => {}
        }
    }

    fn accept(&mut self, byte: u8) {
        if let DeviceState::Receiving { data, size, .. } = &mut self.state {
            data.push(byte);
            if data.len() == *size {
                if let DeviceState::Receiving { name, data, .. } =
                    std::mem::replace(&mut self.state, DeviceState::Command)
                {
                    self.store(name, data);
                }
            }
            return;
        }

        if byte == b'\n' {
            let raw = std::mem::take(&mut self.line);
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                self.handle_line(line);
            }
        } else {
            self.line.push(byte);
        }
    }
}

#[async_trait]
impl SerialPortIO for SimulatedDevice {
    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        for &byte in data {
            self.accept(byte);
        }
        Ok(())
    }

    async fn read_data(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize> {
        if self.outbound.is_empty() {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            return Err(SerialError::Timeout);
        }
        let n = self.outbound.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.outbound.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn scripted_port_splits_long_steps() {
        let mut port = ScriptedPort::new(vec![ScriptStep::Bytes(b"abcdef".to_vec())]);
        let mut buf = [0u8; 4];
        assert_eq!(port.read_data(&mut buf, 100).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(port.read_data(&mut buf, 100).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert!(matches!(port.read_data(&mut buf, 100).await, Err(SerialError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_stall_longer_than_timeout_times_out_then_resumes() {
        let mut port = ScriptedPort::new(vec![
            ScriptStep::Stall(Duration::from_millis(300)),
            ScriptStep::line("late"),
        ]);
        let mut buf = [0u8; 16];
        assert!(matches!(port.read_data(&mut buf, 200).await, Err(SerialError::Timeout)));
        let n = port.read_data(&mut buf, 200).await.unwrap();
        assert_eq!(&buf[..n], b"late\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_device_rejects_unknown_file() {
        let mut device = SimulatedDevice::new(ProtocolTokens::default());
        device.clear_input().unwrap();
        device.send_data(b"missing.txt\n").await.unwrap();
        let mut buf = [0u8; 32];
        let n = device.read_data(&mut buf, 100).await.unwrap();
        assert_eq!(&buf[..n], b"ERRO_404\r\n");
    }
}
