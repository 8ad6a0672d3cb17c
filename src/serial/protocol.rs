use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{Result, SerialError, SerialInterface};
use crate::transfer::TransferError;

/// Marker strings shared with the device firmware.
///
/// Defaults match the SD recorder firmware; every field must stay in sync with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolTokens {
    pub ready: String,
    pub store_command: String,
    pub awaiting_size: String,
    pub data_ready: String,
    pub transfer_complete: String,
    pub error: String,
    pub size_header: String,
}

impl Default for ProtocolTokens {
    fn default() -> Self {
        Self {
            ready: "GRAVADOR_PRONTO".to_string(),
            store_command: "GRAVAR".to_string(),
            awaiting_size: "AGUARDANDO_TAMANHO".to_string(),
            data_ready: "OK_MANDE_DADOS".to_string(),
            transfer_complete: "SUCESSO_GRAVACAO_CONCLUIDA".to_string(),
            error: "ERRO".to_string(),
            size_header: "OK".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    Matched(String),
    ErrorSignaled(String),
    TimedOut,
}

impl TokenOutcome {
    /// Turn a non-match into the matching transfer failure.
    pub fn into_result(self, expected: &str) -> std::result::Result<String, TransferError> {
        match self {
            TokenOutcome::Matched(line) => Ok(line),
            TokenOutcome::ErrorSignaled(line) => Err(TransferError::RemoteError(line)),
            TokenOutcome::TimedOut => Err(TransferError::HandshakeTimeout {
                expected: expected.to_string(),
            }),
        }
    }
}

/// Token exchange shared by uploads and downloads.
///
/// Matching is by substring: firmware diagnostics may embed a token mid-line.
#[derive(Debug, Clone, Default)]
pub struct HandshakeProtocol {
    tokens: ProtocolTokens,
}

impl HandshakeProtocol {
    pub fn new(tokens: ProtocolTokens) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &ProtocolTokens {
        &self.tokens
    }

    /// Read lines until one contains `expected`, one contains the error marker,
    /// or `within` elapses.
    pub async fn await_token(
        &self,
        link: &mut SerialInterface,
        expected: &str,
        within: Duration,
    ) -> Result<TokenOutcome> {
        let deadline = Instant::now() + within;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(TokenOutcome::TimedOut);
            }

            let line = match link.read_line(deadline - now).await {
                Ok(line) => line,
                Err(SerialError::Timeout) => return Ok(TokenOutcome::TimedOut),
                Err(e) => return Err(e),
            };
            if line.is_empty() {
                continue;
            }

            if line.contains(expected) {
                log::debug!("< {}", line);
                return Ok(TokenOutcome::Matched(line));
            }
            if line.contains(self.tokens.error.as_str()) {
                log::warn!("Device signalled an error while waiting for '{}': {}", expected, line);
                return Ok(TokenOutcome::ErrorSignaled(line));
            }
            log::trace!("Ignoring line while waiting for '{}': {}", expected, line);
        }
    }

    /// Wait for `expected`, mapping anything else to a transfer error.
    pub async fn expect_token(
        &self,
        link: &mut SerialInterface,
        expected: &str,
        within: Duration,
    ) -> std::result::Result<String, TransferError> {
        self.await_token(link, expected, within)
            .await?
            .into_result(expected)
    }

    /// Startup handshake: the device announces itself once its boot finishes.
    pub async fn await_ready(
        &self,
        link: &mut SerialInterface,
        within: Duration,
    ) -> std::result::Result<(), TransferError> {
        let line = self.expect_token(link, &self.tokens.ready, within).await?;
        log::info!("Device ready on {} ({})", link.port_name(), line);
        link.flush_input()?;
        Ok(())
    }

    /// Parse a download header of the form `OK <size>`.
    ///
    /// Exactly one space separates the marker from a plain decimal size.
    pub fn parse_size_header(&self, line: &str) -> std::result::Result<u64, TransferError> {
        if line.contains(self.tokens.error.as_str()) {
            return Err(TransferError::RemoteError(line.to_string()));
        }

        let rest = line
            .strip_prefix(self.tokens.size_header.as_str())
            .and_then(|rest| rest.strip_prefix(' '))
            .ok_or_else(|| {
                TransferError::ProtocolError(format!("Unexpected response '{}'", line))
            })?;

        let size_field = rest.split(' ').next().unwrap_or_default();
        if size_field.is_empty() || !size_field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TransferError::ProtocolError(format!(
                "Invalid size '{}' in header '{}'",
                size_field, line
            )));
        }

        size_field.parse::<u64>().map_err(|_| {
            TransferError::ProtocolError(format!("Size out of range in header '{}'", line))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_with_size_parses() {
        let protocol = HandshakeProtocol::default();
        assert_eq!(protocol.parse_size_header("OK 1024").unwrap(), 1024);
        assert_eq!(protocol.parse_size_header("OK 0").unwrap(), 0);
    }

    #[test]
    fn header_error_marker_is_remote_error() {
        let protocol = HandshakeProtocol::default();
        let err = protocol.parse_size_header("ERRO_404").unwrap_err();
        assert!(matches!(err, TransferError::RemoteError(ref line) if line == "ERRO_404"));
    }

    #[test]
    fn malformed_headers_are_protocol_errors() {
        let protocol = HandshakeProtocol::default();
        let malformed = [
            "",
            "HELLO 12",
            "OK",
            "OK abc",
            "OK -5",
            "OK +5",
            "OK 99999999999999999999",
        ];
        for header in malformed {
            let err = protocol.parse_size_header(header).unwrap_err();
            assert!(
                matches!(err, TransferError::ProtocolError(_)),
                "header {:?} gave {:?}",
                header,
                err
            );
        }
    }

    #[test]
    fn header_requires_single_space_separator() {
        let protocol = HandshakeProtocol::default();
        for header in ["OK1024", "OK  7", "OK\t7", "OK_MANDE_DADOS"] {
            assert!(
                matches!(
                    protocol.parse_size_header(header),
                    Err(TransferError::ProtocolError(_))
                ),
                "header {:?} was accepted",
                header
            );
        }
        assert_eq!(protocol.parse_size_header("OK 7 bytes").unwrap(), 7);
    }

    #[test]
    fn custom_tokens_drive_header_parsing() {
        let protocol = HandshakeProtocol::new(ProtocolTokens {
            size_header: "SIZE:".to_string(),
            error: "FAIL".to_string(),
            ..ProtocolTokens::default()
        });
        assert_eq!(protocol.parse_size_header("SIZE: 7").unwrap(), 7);
        assert!(matches!(
            protocol.parse_size_header("FAIL no card"),
            Err(TransferError::RemoteError(_))
        ));
    }
}
