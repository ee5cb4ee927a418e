//! AT command sender.
//!
//! Once the bridge is in pass-through mode every line reaches the modem,
//! and the modem's replies arrive in arbitrary fragments. The sender
//! accumulates them and checks the buffer every poll interval:
//!
//! 1. A stall sentinel injected by the bridge is stripped and answered
//!    with a filler line so the bridge keeps forwarding.
//! 2. If any expected pattern appears, the command succeeds with the
//!    whole accumulated response.
//! 3. Otherwise, once `timeout` has passed since the last received byte
//!    (or since issuance, if nothing arrived), the command completes:
//!    successfully when no patterns were expected, as
//!    [`Error::CommandFailed`] when some were.
//!
//! Because the timeout restarts on every received byte, a modem that keeps
//! trickling output never times out.

use std::time::Duration;

use scpix_core::command::{CommandSpec, Pattern, find};
use scpix_core::error::{Error, Result};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::line::LineChannel;

/// Default inter-character poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Injected by the bridge when the modem has been silent too long.
pub const STALL_SENTINEL: &[u8] = b"\r\nMODEM TIMEOUT\r\n";

/// Written raw in answer to a stall sentinel.
pub const FILLER_LINE: &[u8] = b" \r\n";

/// Executes one AT command at a time over a [`LineChannel`].
#[derive(Debug, Clone, Copy)]
pub struct AtSender {
    poll_interval: Duration,
}

impl AtSender {
    pub fn new(poll_interval: Duration) -> Self {
        AtSender { poll_interval }
    }

    /// Send `spec.command` and wait for one of its patterns.
    pub async fn send(
        &self,
        channel: &mut LineChannel,
        spec: &CommandSpec,
        raw: bool,
    ) -> Result<Vec<u8>> {
        self.exchange(channel, spec.command.as_bytes(), raw, spec.timeout, &spec.expect)
            .await
    }

    /// Send arbitrary bytes and wait for one of `expect`.
    ///
    /// Returns everything received up to the moment a pattern matched. A
    /// zero `timeout` is rejected.
    pub async fn exchange(
        &self,
        channel: &mut LineChannel,
        request: &[u8],
        raw: bool,
        timeout: Duration,
        expect: &[Pattern],
    ) -> Result<Vec<u8>> {
        if timeout.is_zero() {
            return Err(Error::InvalidParameter(format!(
                "timeout of {} must be positive",
                describe(request, raw)
            )));
        }

        channel.send(request, raw).await?;

        let mut response = Vec::new();
        let mut recv_buf = [0u8; 1024];
        let mut last_rx = Instant::now();
        let mut next_poll = last_rx + self.poll_interval;

        loop {
            let now = Instant::now();
            if now < next_poll {
                match channel.receive(&mut recv_buf, next_poll - now).await {
                    Ok(n) => {
                        if n > 0 {
                            response.extend_from_slice(&recv_buf[..n]);
                            last_rx = Instant::now();
                            trace!(bytes = n, total = response.len(), "AT rx");
                        }
                        continue;
                    }
                    Err(Error::Timeout) => {}
                    Err(e) => return Err(e),
                }
            }
            next_poll = Instant::now() + self.poll_interval;

            if strip_sentinel(&mut response) {
                warn!("[MODEM TIMEOUT]");
                channel.send(FILLER_LINE, true).await?;
            }

            if let Some(pattern) = expect.iter().find(|p| p.is_found_in(&response)) {
                debug!(%pattern, "< {}", printable(&response));
                return Ok(response);
            }

            if last_rx.elapsed() >= timeout {
                if expect.is_empty() {
                    debug!("< {}", printable(&response));
                    return Ok(response);
                }
                debug!(
                    ?timeout,
                    "no expected pattern in {:?}",
                    String::from_utf8_lossy(&response)
                );
                return Err(Error::CommandFailed {
                    command: describe(request, raw),
                    response: String::from_utf8_lossy(&response).into_owned(),
                });
            }
        }
    }
}

/// Remove every stall sentinel from `buf`. Returns whether any was found.
pub fn strip_sentinel(buf: &mut Vec<u8>) -> bool {
    let mut found = false;
    while let Some(pos) = find(buf, STALL_SENTINEL) {
        buf.drain(pos..pos + STALL_SENTINEL.len());
        found = true;
    }
    found
}

/// Name a request for errors: command text, or a byte count for payloads.
fn describe(request: &[u8], raw: bool) -> String {
    if raw {
        format!("<{} payload bytes>", request.len())
    } else {
        String::from_utf8_lossy(request).into_owned()
    }
}

fn printable(response: &[u8]) -> String {
    String::from_utf8_lossy(response).trim().replace("\r\n", "*")
}
