//! Transport implementations for scpix.
//!
//! This crate provides the concrete [`Transport`](scpix_core::Transport)
//! used against real hardware:
//!
//! - [`SerialTransport`]: the USB virtual COM port or optical-head serial
//!   link to the bridge
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
//! transport.send(b"*IDN?\r\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_millis(800)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{Parity, SerialConfig, SerialTransport, StopBits};
