//! SCPI exchanges with the bridge itself.
//!
//! The bridge answers each SCPI command with a single line. A reply is
//! complete once the accumulated bytes end in a line feed; anything less
//! keeps the reader waiting until the timeout.

use std::time::Duration;

use scpix_core::error::{Error, Result};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::line::LineChannel;
use crate::session::Session;

/// Accumulates received bytes into single-line replies.
#[derive(Debug, Default)]
pub struct LineReader {
    buf: Vec<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes. Returns the trimmed reply once the buffer
    /// ends in `\n`, and resets for the next reply.
    pub fn push(&mut self, data: &[u8]) -> Option<String> {
        self.buf.extend_from_slice(data);
        if self.buf.last() != Some(&b'\n') {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        Some(line)
    }

    /// Discard any partial reply.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Wait up to `timeout` for a complete reply line.
///
/// Returns `Ok(None)` when the time runs out without one.
pub async fn read_line(
    channel: &mut LineChannel,
    reader: &mut LineReader,
    timeout: Duration,
) -> Result<Option<String>> {
    let deadline = Instant::now() + timeout;
    let mut recv_buf = [0u8; 256];

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        match channel.receive(&mut recv_buf, deadline - now).await {
            Ok(n) => {
                if let Some(line) = reader.push(&recv_buf[..n]) {
                    return Ok(Some(line));
                }
            }
            Err(Error::Timeout) => return Ok(None),
            Err(e) => return Err(e),
        }
    }
}

/// Send one SCPI command and return its single-line reply.
///
/// Fails with [`Error::NoResponse`] when no complete line arrives within
/// `timeout`.
pub async fn run_scpi(session: &mut Session, command: &str, timeout: Duration) -> Result<String> {
    let channel = session.channel_mut();
    channel.send_line(command).await?;

    let mut reader = LineReader::new();
    match read_line(channel, &mut reader, timeout).await? {
        Some(reply) => {
            info!("< {reply}");
            Ok(reply)
        }
        None => {
            debug!(command, ?timeout, "no SCPI reply");
            Err(Error::NoResponse {
                command: command.to_string(),
            })
        }
    }
}

/// Run a SCPI command whose reply must contain `token`.
///
/// A reply without the token is reported as [`Error::Device`] carrying
/// `failure` and the reply text.
pub async fn run_scpi_expecting(
    session: &mut Session,
    command: &str,
    token: &str,
    failure: &str,
) -> Result<String> {
    let timeout = session.timing().scpi_response;
    let reply = run_scpi(session, command, timeout).await?;
    if reply.contains(token) {
        Ok(reply)
    } else {
        Err(Error::Device(format!("{failure}: {reply}")))
    }
}

/// Pause between consecutive SCPI script commands.
pub const SCPI_SCRIPT_DELAY: Duration = Duration::from_millis(50);

/// One line of a SCPI script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpiStep {
    pub command: String,
    pub timeout: Duration,
}

/// Parse a SCPI script: one `command[;timeout_ms]` per line.
///
/// Blank lines are skipped; steps without a timeout get `default_timeout`.
pub fn parse_scpi_script(text: &str, default_timeout: Duration) -> Result<Vec<ScpiStep>> {
    let mut steps = Vec::new();
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (command, timeout) = match line.split_once(';') {
            Some((command, ms)) if !ms.trim().is_empty() => {
                let ms: u64 = ms.trim().parse().map_err(|_| {
                    Error::InvalidParameter(format!("line {}: bad timeout {ms:?}", number + 1))
                })?;
                (command, Duration::from_millis(ms))
            }
            Some((command, _)) => (command, default_timeout),
            None => (line, default_timeout),
        };
        if timeout.is_zero() {
            return Err(Error::InvalidParameter(format!(
                "line {}: timeout must be positive",
                number + 1
            )));
        }
        steps.push(ScpiStep {
            command: command.trim().to_string(),
            timeout,
        });
    }
    Ok(steps)
}

/// Run SCPI steps in order, stopping at the first one without a reply.
///
/// Returns the replies.
pub async fn run_scpi_script(session: &mut Session, steps: &[ScpiStep]) -> Result<Vec<String>> {
    let mut replies = Vec::with_capacity(steps.len());
    for (index, step) in steps.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(SCPI_SCRIPT_DELAY).await;
        }
        info!(command = %step.command, timeout = ?step.timeout, "exec");
        replies.push(run_scpi(session, &step.command, step.timeout).await?);
    }
    Ok(replies)
}
