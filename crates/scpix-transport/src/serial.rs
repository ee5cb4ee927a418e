//! Serial port transport for bridge communication.
//!
//! This module provides [`SerialTransport`], which implements the
//! [`Transport`] trait for the serial link to the bridge. The bridge shows up
//! either as a USB virtual COM port or behind an optical head; both are plain
//! 8N1 serial lines, 9600 baud unless reconfigured.
//!
//! # Example
//!
//! ```no_run
//! use scpix_transport::SerialTransport;
//! use scpix_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> scpix_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 9600).await?;
//!
//! // Ask the bridge who it is.
//! transport.send(b"*IDN?\r\n").await?;
//!
//! // Receive response with an 800 ms timeout
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_millis(800)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use scpix_core::error::{Error, Result};
use scpix_core::transport::Transport;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

/// Serial port configuration.
///
/// The bridge always talks 8 data bits without flow control; only the
/// baud rate, parity and stop bits vary between optical heads and USB
/// adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    /// Baud rate (the bridge ships at 9600)
    pub baud_rate: u32,
    /// Parity checking
    pub parity: Parity,
    /// Number of stop bits
    pub stop_bits: StopBits,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Serial port transport for the bridge link.
///
/// Implements the [`Transport`] trait. One instance is owned by the session
/// for the whole process lifetime.
pub struct SerialTransport {
    /// The underlying serial port stream
    port: Option<SerialStream>,
    /// Port name for logging/debugging
    port_name: String,
}

impl SerialTransport {
    /// Open a serial port with the given baud rate, no parity and one stop bit.
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/ttyUSB0" on Linux, "COM3" on Windows)
    /// * `baud_rate` - Baud rate (9600 for a factory-default bridge)
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig {
            baud_rate,
            ..Default::default()
        };
        Self::open_with_config(port, config).await
    }

    /// Open a serial port with full configuration control.
    ///
    /// Bytes already waiting in the OS input buffer are discarded so the
    /// first response read belongs to the first command sent.
    pub async fn open_with_config(port: &str, config: SerialConfig) -> Result<Self> {
        tracing::debug!(
            port = %port,
            baud_rate = config.baud_rate,
            parity = ?config.parity,
            stop_bits = ?config.stop_bits,
            "Opening serial port"
        );

        let serial_stream = tokio_serial::new(port, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "Failed to open serial port");
                Error::Transport(format!("Error opening {}: {}", port, e))
            })?;

        if let Err(e) = serial_stream.clear(ClearBuffer::Input) {
            tracing::warn!(port = %port, error = %e, "Failed to discard stale input");
        }

        tracing::info!(port = %port, baud_rate = config.baud_rate, "Serial port opened successfully");

        Ok(Self {
            port: Some(serial_stream),
            port_name: port.to_string(),
        })
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// Map an I/O error on an open port to the engine's error type.
fn classify_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::NotConnected => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(
            port = %self.port_name,
            bytes = data.len(),
            data = ?String::from_utf8_lossy(data),
            "Sending data"
        );

        port.write_all(data).await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "Failed to send data");
            classify_io_error(e)
        })?;

        // Drain: the caller starts its response timer when this returns.
        port.flush().await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "Failed to drain serial port");
            classify_io_error(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            Ok(Ok(0)) => {
                tracing::warn!(port = %self.port_name, "Serial port reported end of stream");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(
                    port = %self.port_name,
                    bytes = n,
                    data = ?String::from_utf8_lossy(&buf[..n]),
                    "Received data"
                );
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %self.port_name, error = %e, "Failed to receive data");
                Err(classify_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            tracing::debug!(port = %self.port_name, "Closing serial port");

            if let Err(e) = port.flush().await {
                tracing::warn!(
                    port = %self.port_name,
                    error = %e,
                    "Failed to flush before closing (continuing anyway)"
                );
            }

            tracing::info!(port = %self.port_name, "Serial port closed");
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
    }

    #[test]
    fn test_classify_broken_pipe() {
        let e = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(classify_io_error(e), Error::ConnectionLost));
    }

    #[test]
    fn test_classify_other_io_error() {
        let e = std::io::Error::other("framing");
        assert!(matches!(classify_io_error(e), Error::Io(_)));
    }

    #[tokio::test]
    async fn test_open_missing_port_is_transport_error() {
        let result = SerialTransport::open("/dev/scpix-does-not-exist", 9600).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
