//! The Line Channel: the only writer on the serial link.
//!
//! Every byte the engine sends goes through [`LineChannel::send`], which
//! appends CRLF unless asked not to, logs the outbound line, and returns
//! only after the transport has drained it. Reads are passed straight
//! through to the transport for the layers above.

use std::time::Duration;

use scpix_core::error::{Error, Result};
use scpix_core::transport::Transport;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Line terminator appended to every non-raw line.
pub const CRLF: &[u8] = b"\r\n";

/// Owner of the serial link for one session.
pub struct LineChannel {
    transport: Box<dyn Transport>,
}

impl LineChannel {
    /// Wrap a transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        LineChannel { transport }
    }

    /// Send a line. When `raw` is false a CRLF terminator is appended.
    ///
    /// Raw mode is for socket payloads, which must reach the modem
    /// byte-for-byte.
    pub async fn send(&mut self, data: &[u8], raw: bool) -> Result<()> {
        debug!("> {}", String::from_utf8_lossy(data));
        if raw {
            self.transport.send(data).await
        } else {
            let mut line = Vec::with_capacity(data.len() + CRLF.len());
            line.extend_from_slice(data);
            line.extend_from_slice(CRLF);
            self.transport.send(&line).await
        }
    }

    /// Send a text line with CRLF termination.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.send(line.as_bytes(), false).await
    }

    /// Receive whatever the bridge sends within `timeout`.
    pub async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.transport.receive(buf, timeout).await
    }

    /// Collect everything that arrives during `window`.
    ///
    /// Silence is not an error here: the window simply ends. Only link
    /// failures propagate.
    pub async fn drain_for(&mut self, window: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + window;
        let mut recv_buf = [0u8; 256];
        let mut drained = Vec::new();

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.transport.receive(&mut recv_buf, deadline - now).await {
                Ok(n) => drained.extend_from_slice(&recv_buf[..n]),
                Err(Error::Timeout) => break,
                Err(e) => return Err(e),
            }
        }

        if !drained.is_empty() {
            trace!(bytes = drained.len(), "drained {:?}", String::from_utf8_lossy(&drained));
        }
        Ok(drained)
    }

    /// Close the underlying transport.
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}
