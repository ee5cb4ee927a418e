//! Echo round trips over a socket.
//!
//! Ping opens a socket to an echo server, sends a payload, reads until the
//! same number of bytes came back, compares them, and repeats. The socket
//! is closed and the counters are logged however the run ends.

use std::fmt;
use std::time::Duration;

use scpix_core::error::{Error, Result};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::session::Session;
use crate::socket::{self, TransportSession};

/// Parameters of one ping run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingOptions {
    /// Payload size of each message.
    pub size: usize,
    /// Number of round trips.
    pub repeats: u32,
    /// Pause between round trips.
    pub inter_message_delay: Duration,
    /// Pause between opening the socket and the first send.
    pub first_send_delay: Duration,
    /// Pause between reads while the echo is incomplete.
    pub recv_poll_delay: Duration,
}

impl Default for PingOptions {
    fn default() -> Self {
        PingOptions {
            size: 100,
            repeats: 1,
            inter_message_delay: Duration::from_secs(1),
            first_send_delay: Duration::from_secs(2),
            recv_poll_delay: Duration::from_millis(200),
        }
    }
}

/// Counters accumulated over one ping run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub sent_messages: u32,
    pub sent_bytes: usize,
    pub received_messages: u32,
    pub received_bytes: usize,
    pub elapsed: Duration,
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent {} messages ({} bytes), received {} messages ({} bytes) in {:.3}s",
            self.sent_messages,
            self.sent_bytes,
            self.received_messages,
            self.received_bytes,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Run `options.repeats` echo round trips against `ip:port`.
///
/// `payload` produces the bytes of each message given the configured size.
/// Must be called inside a pass-through environment.
pub async fn ping<F>(
    session: &mut Session,
    ip: &str,
    port: u16,
    options: &PingOptions,
    mut payload: F,
) -> Result<TransferStats>
where
    F: FnMut(usize) -> Vec<u8>,
{
    let started = Instant::now();
    let mut stats = TransferStats::default();

    let socket = socket::open(session, ip, port).await?;
    tokio::time::sleep(options.first_send_delay).await;

    let result = round_trips(session, &socket, options, &mut payload, &mut stats).await;
    if let Err(e) = &result {
        error!(error = %e, "ping failed");
    }
    let closed = socket::close(session, socket).await;

    stats.elapsed = started.elapsed();
    info!("{stats}");

    result?;
    closed?;
    Ok(stats)
}

async fn round_trips<F>(
    session: &mut Session,
    socket: &TransportSession,
    options: &PingOptions,
    payload: &mut F,
    stats: &mut TransferStats,
) -> Result<()>
where
    F: FnMut(usize) -> Vec<u8>,
{
    for round in 0..options.repeats {
        if round > 0 {
            tokio::time::sleep(options.inter_message_delay).await;
        }

        let message = payload(options.size);
        socket::send(session, socket, &message).await?;
        stats.sent_messages += 1;
        stats.sent_bytes += message.len();

        let echo = read_echo(session, socket, message.len(), options.recv_poll_delay).await?;
        if echo != message {
            warn!(
                sent = message.len(),
                received = echo.len(),
                "echo differs from message"
            );
            return Err(Error::Mismatch {
                sent: message.len(),
                received: echo.len(),
            });
        }
        stats.received_messages += 1;
        stats.received_bytes += echo.len();
    }
    Ok(())
}

/// Read the echo of a message of `expected` bytes.
///
/// Reading continues while data keeps arriving, and while the echo is still
/// short and the data wait has not run out. Every read is followed by
/// `poll_delay`.
async fn read_echo(
    session: &mut Session,
    socket: &TransportSession,
    expected: usize,
    poll_delay: Duration,
) -> Result<Vec<u8>> {
    let data_wait = session.timing().data_wait;
    let started = Instant::now();
    let mut received = Vec::with_capacity(expected);

    loop {
        let data = socket::recv(session, socket, socket.mtu).await?;
        let arriving = !data.is_empty();
        received.extend_from_slice(&data);

        let incomplete = received.len() < expected && started.elapsed() < data_wait;
        if !arriving && !incomplete {
            return Ok(received);
        }
        tokio::time::sleep(poll_delay).await;
    }
}
