//! Transport trait for bridge communication.
//!
//! The [`Transport`] trait abstracts over the serial link to the bridge.
//! `scpix-transport` implements it for real serial ports and
//! `scpix-test-harness` provides a scripted mock.
//!
//! The protocol engine in `scpix-modem` operates on a boxed `Transport`
//! rather than on a serial port directly, so every SCPI and AT exchange can
//! be tested deterministically without hardware.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to the bridge.
///
/// Implementations handle buffering and error recovery at the physical
/// layer. Line termination, response matching, and pass-through framing are
/// handled by the protocol engine that consumes this trait.
#[async_trait]
pub trait Transport: Send {
    /// Send raw bytes to the bridge.
    ///
    /// Must not return until every byte has been written and the output
    /// buffer drained. The engine relies on this when it starts response
    /// timers right after a send.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the bridge into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Waits up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing arrives within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
