//! TCP sockets over the modem's socket extensions.
//!
//! All operations here assume the bridge is already in pass-through mode;
//! callers wrap them in [`passthrough::run`](crate::passthrough::run).
//!
//! Sending is a two-phase exchange per chunk: announce the length, wait for
//! the prompt, write the payload, wait for `SEND OK`. The chunk is only
//! done once the modem reports zero unacknowledged bytes, which is polled
//! with a bounded number of status queries.
//!
//! Reading uses `AT+QIRD`, whose response is parsed strictly by
//! [`parse_read_frame`].

use std::fmt;
use std::time::Duration;

use scpix_core::command::{CommandSpec, Pattern, find};
use scpix_core::error::{Error, Result};
use tracing::{debug, info, warn};

use crate::session::{Session, SessionSettings};

/// Largest payload the modem accepts in one send or read.
pub const MAX_MTU: usize = 1006;

/// Prompts the modem uses to ask for payload bytes.
pub const PROMPT_TOKENS: [&str; 3] = ["> \r\n", "PROMPT\r\n", "PROMPT \r\n"];

/// Confirmation that a payload was accepted.
pub const SEND_OK: &str = "SEND OK\r\n";

/// Tokens reporting that a payload was refused.
pub const SEND_ERROR_TOKENS: [&str; 2] = ["SEND FAIL", "ERROR"];

/// Start of a socket read response.
pub const READ_MARKER: &[u8] = b"+QIRD: ";

/// End of a socket read response.
pub const READ_TERMINATOR: &[u8] = b"\r\nOK\r\n";

/// Start of a send-status response.
const SEND_STATUS_MARKER: &[u8] = b"+QISEND:";

/// Wait after the first unacknowledged status poll.
pub const ACK_FIRST_WAIT: Duration = Duration::from_millis(300);

/// Wait after every later unacknowledged status poll.
pub const ACK_RETRY_WAIT: Duration = Duration::from_millis(1000);

/// Remote end of a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub ip: String,
    pub port: u16,
}

impl fmt::Display for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// One open socket on the modem.
///
/// Created by [`open`] and consumed by [`close`]. A socket opened by an
/// earlier invocation can be addressed with [`TransportSession::attached`],
/// in which case the remote end is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSession {
    pub remote: Option<Remote>,
    pub connection_id: u8,
    pub pdp_context_id: u8,
    pub mtu: usize,
}

impl TransportSession {
    /// Refer to an already open socket using the session's ids.
    pub fn attached(settings: &SessionSettings) -> Self {
        TransportSession {
            remote: None,
            connection_id: settings.connection_id,
            pdp_context_id: settings.pdp_context_id,
            mtu: settings.mtu,
        }
    }
}

/// Open a TCP socket to `ip:port`.
pub async fn open(session: &mut Session, ip: &str, port: u16) -> Result<TransportSession> {
    let mut socket = TransportSession::attached(session.settings());
    let command = format!(
        "at+qiopen={},{},\"TCP\",\"{ip}\",{port},0,0",
        socket.pdp_context_id, socket.connection_id
    );
    let spec = CommandSpec::new(command, session.timing().socket_open).expect("OK\r\n");
    session.at(&spec).await?;

    socket.remote = Some(Remote {
        ip: ip.to_string(),
        port,
    });
    info!(remote = %format_args!("{ip}:{port}"), id = socket.connection_id, "socket open");
    Ok(socket)
}

/// Close a socket.
///
/// Closing is best effort: a modem that reports the socket already gone,
/// or never answers, does not fail the call. Link failures still do.
pub async fn close(session: &mut Session, socket: TransportSession) -> Result<()> {
    let spec = CommandSpec::new(
        format!("at+qiclose={}", socket.connection_id),
        session.timing().socket_close,
    )
    .expect_any(["OK\r\n", "MODEM TIMEOUT"]);

    match session.at(&spec).await {
        Ok(_) => {
            info!(id = socket.connection_id, "socket closed");
            Ok(())
        }
        Err(e) if e.is_link_failure() => Err(e),
        Err(e) => {
            warn!(id = socket.connection_id, error = %e, "socket close not confirmed");
            Ok(())
        }
    }
}

/// Send `payload`, split into chunks of at most the socket MTU.
///
/// Returns the number of chunks sent. An empty payload sends nothing.
pub async fn send(session: &mut Session, socket: &TransportSession, payload: &[u8]) -> Result<usize> {
    let mut sent = 0;
    for chunk in payload.chunks(socket.mtu) {
        send_chunk(session, socket, chunk).await?;
        wait_for_ack(session, socket).await?;
        sent += 1;
    }
    debug!(bytes = payload.len(), chunks = sent, "payload sent");
    Ok(sent)
}

/// Send one chunk of at most MTU bytes and wait for `SEND OK`.
pub async fn send_chunk(session: &mut Session, socket: &TransportSession, chunk: &[u8]) -> Result<()> {
    if chunk.is_empty() || chunk.len() > socket.mtu {
        return Err(Error::InvalidParameter(format!(
            "chunk of {} bytes does not fit mtu {}",
            chunk.len(),
            socket.mtu
        )));
    }

    let timing = *session.timing();
    let announce = CommandSpec::new(
        format!("at+qisend={},{}", socket.connection_id, chunk.len()),
        timing.at_response,
    )
    .expect_any(PROMPT_TOKENS);
    session.at(&announce).await?;

    let mut expect = vec![Pattern::literal(SEND_OK)];
    expect.extend(SEND_ERROR_TOKENS.into_iter().map(Pattern::literal));
    let raw = !session.settings().line_terminated_payload;
    let response = session
        .at_bytes(chunk, raw, timing.send_timeout, &expect)
        .await?;

    if find(&response, SEND_OK.as_bytes()).is_some() {
        return Ok(());
    }
    let token = SEND_ERROR_TOKENS
        .into_iter()
        .find(|token| find(&response, token.as_bytes()).is_some())
        .unwrap_or("unknown send failure");
    Err(Error::Device(token.to_string()))
}

/// Poll the send status until the modem reports zero unacknowledged bytes.
///
/// Returns the number of polls issued.
pub async fn wait_for_ack(session: &mut Session, socket: &TransportSession) -> Result<u32> {
    let limit = session.settings().ack_poll_limit;
    let spec = CommandSpec::new(
        format!("at+qisend={},0", socket.connection_id),
        session.timing().at_response,
    )
    .expect("OK\r\n");

    let mut unacked = 0;
    for attempt in 1..=limit {
        let response = session.at(&spec).await?;
        unacked = parse_send_status(&response)?;
        if unacked == 0 {
            return Ok(attempt);
        }
        debug!(attempt, unacked, "waiting for ack");
        if attempt < limit {
            let wait = if attempt == 1 { ACK_FIRST_WAIT } else { ACK_RETRY_WAIT };
            tokio::time::sleep(wait).await;
        }
    }

    Err(Error::AckExhausted {
        attempts: limit,
        unacked,
    })
}

/// Read up to `max` bytes. An empty result means nothing is buffered.
pub async fn recv(session: &mut Session, socket: &TransportSession, max: usize) -> Result<Vec<u8>> {
    let max = max.clamp(1, socket.mtu);
    let spec = CommandSpec::new(
        format!("at+qird={},{max}", socket.connection_id),
        session.timing().recv_timeout,
    )
    .expect(READ_TERMINATOR);

    let response = session.at(&spec).await?;
    let data = parse_read_frame(&response)?;
    debug!(bytes = data.len(), "socket read");
    Ok(data.to_vec())
}

/// Extract the payload from a `+QIRD` response.
///
/// The response must carry the marker, a decimal length, CRLF, at least
/// that many payload bytes, and end with the terminator. Exactly the
/// declared number of bytes is returned.
pub fn parse_read_frame(response: &[u8]) -> Result<&[u8]> {
    let start = find(response, READ_MARKER)
        .ok_or_else(|| Error::Framing("no +QIRD header".into()))?
        + READ_MARKER.len();
    if !response.ends_with(READ_TERMINATOR) || response.len() < start + READ_TERMINATOR.len() {
        return Err(Error::Framing("missing OK terminator".into()));
    }
    let body = &response[start..response.len() - READ_TERMINATOR.len()];

    let digits = body.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return Err(Error::Framing("length is not a number".into()));
    }
    let declared: usize = std::str::from_utf8(&body[..digits])
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| Error::Framing("length out of range".into()))?;

    let Some(payload) = body[digits..].strip_prefix(b"\r\n") else {
        return Err(Error::Framing("no CRLF after length".into()));
    };
    if payload.len() < declared {
        return Err(Error::Framing(format!(
            "declared {declared} bytes, got {}",
            payload.len()
        )));
    }
    Ok(&payload[..declared])
}

/// Extract the unacknowledged byte count from a `+QISEND: sent,acked,unacked`
/// status response.
pub fn parse_send_status(response: &[u8]) -> Result<u64> {
    let start = find(response, SEND_STATUS_MARKER)
        .ok_or_else(|| Error::Protocol("no +QISEND status".into()))?
        + SEND_STATUS_MARKER.len();
    let rest = &response[start..];
    let end = find(rest, b"\r\n").unwrap_or(rest.len());
    let line = String::from_utf8_lossy(&rest[..end]);

    line.split(',')
        .nth(2)
        .and_then(|field| field.trim().parse().ok())
        .ok_or_else(|| Error::Protocol(format!("bad send status {:?}", line.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scpix_test_harness::{Chunk, MockTransport};

    fn session(mock: MockTransport) -> Session {
        Session::builder().build(Box::new(mock)).unwrap()
    }

    fn session_with_mtu(mock: MockTransport, mtu: usize) -> Session {
        Session::builder().mtu(mtu).build(Box::new(mock)).unwrap()
    }

    fn socket(s: &Session) -> TransportSession {
        TransportSession::attached(s.settings())
    }

    const ACK: &[u8] = b"\r\n+QISEND: 10,10,0\r\n\r\nOK\r\n";

    // -----------------------------------------------------------------
    // parse_read_frame
    // -----------------------------------------------------------------

    #[test]
    fn frame_exact_length() {
        assert_eq!(parse_read_frame(b"+QIRD: 4\r\nABCD\r\nOK\r\n").unwrap(), b"ABCD");
    }

    #[test]
    fn frame_with_leading_echo() {
        let response = b"\r\n+QIRD: 3\r\nxyz\r\nOK\r\n";
        assert_eq!(parse_read_frame(response).unwrap(), b"xyz");
    }

    #[test]
    fn frame_short_payload_is_error() {
        let err = parse_read_frame(b"+QIRD: 5\r\nABCD\r\nOK\r\n").unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[test]
    fn frame_longer_payload_truncated_to_declared() {
        assert_eq!(parse_read_frame(b"+QIRD: 2\r\nABCD\r\nOK\r\n").unwrap(), b"AB");
    }

    #[test]
    fn frame_zero_length() {
        assert_eq!(parse_read_frame(b"\r\n+QIRD: 0\r\n\r\nOK\r\n").unwrap(), b"");
    }

    #[test]
    fn frame_payload_may_contain_crlf() {
        assert_eq!(
            parse_read_frame(b"+QIRD: 4\r\na\r\nb\r\nOK\r\n").unwrap(),
            b"a\r\nb"
        );
    }

    #[test]
    fn frame_missing_marker() {
        assert!(matches!(
            parse_read_frame(b"\r\nOK\r\n"),
            Err(Error::Framing(_))
        ));
    }

    #[test]
    fn frame_non_numeric_length() {
        assert!(matches!(
            parse_read_frame(b"+QIRD: x\r\nABCD\r\nOK\r\n"),
            Err(Error::Framing(_))
        ));
    }

    #[test]
    fn frame_missing_crlf_after_length() {
        assert!(matches!(
            parse_read_frame(b"+QIRD: 4 ABCD\r\nOK\r\n"),
            Err(Error::Framing(_))
        ));
    }

    #[test]
    fn frame_missing_terminator() {
        assert!(matches!(
            parse_read_frame(b"+QIRD: 4\r\nABCD\r\nOK\r\nURC"),
            Err(Error::Framing(_))
        ));
    }

    // -----------------------------------------------------------------
    // parse_send_status
    // -----------------------------------------------------------------

    #[test]
    fn send_status_fields() {
        assert_eq!(parse_send_status(ACK).unwrap(), 0);
        assert_eq!(
            parse_send_status(b"\r\n+QISEND: 100,60,40\r\n\r\nOK\r\n").unwrap(),
            40
        );
    }

    #[test]
    fn send_status_malformed() {
        assert!(parse_send_status(b"\r\nOK\r\n").is_err());
        assert!(parse_send_status(b"+QISEND: 1,2\r\nOK\r\n").is_err());
    }

    // -----------------------------------------------------------------
    // open / close
    // -----------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn open_reports_remote() {
        let mut mock = MockTransport::new();
        mock.expect(b"at+qiopen=1,0,\"TCP\",\"52.1.2.3\",7,0,0\r\n", b"\r\nOK\r\n");

        let mut s = session(mock);
        let socket = open(&mut s, "52.1.2.3", 7).await.unwrap();
        assert_eq!(socket.remote.as_ref().unwrap().to_string(), "52.1.2.3:7");
        assert_eq!(socket.connection_id, 0);
        assert_eq!(socket.mtu, MAX_MTU);
    }

    #[tokio::test(start_paused = true)]
    async fn close_accepts_stall_token() {
        let mut mock = MockTransport::new();
        mock.expect(b"at+qiclose=0\r\n", b"MODEM TIMEOUT");

        let mut s = session(mock);
        let sock = socket(&s);
        close(&mut s, sock).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn close_swallows_modem_errors() {
        let mut mock = MockTransport::new();
        mock.expect(b"at+qiclose=0\r\n", b"\r\nERROR\r\n");

        let mut s = session(mock);
        let sock = socket(&s);
        assert!(close(&mut s, sock).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn close_propagates_link_failure() {
        let mut mock = MockTransport::new();
        mock.set_connected(false);

        let mut s = session(mock);
        let sock = socket(&s);
        assert!(matches!(close(&mut s, sock).await, Err(Error::NotConnected)));
    }

    // -----------------------------------------------------------------
    // send
    // -----------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn send_chunks_by_mtu_with_one_poll_each() {
        let mut mock = MockTransport::new();
        let log = mock.sent_log();
        for chunk in [&b"01234"[..], &b"56789"[..]] {
            mock.expect(b"at+qisend=0,5\r\n", b"\r\n> \r\n");
            mock.expect(chunk, b"\r\nSEND OK\r\n");
            mock.expect(b"at+qisend=0,0\r\n", ACK);
        }

        let mut s = session_with_mtu(mock, 5);
        let sock = socket(&s);
        let chunks = send(&mut s, &sock, b"0123456789").await.unwrap();

        assert_eq!(chunks, 2);
        assert_eq!(log.count(b"at+qisend=0,5\r\n"), 2);
        assert_eq!(log.count(b"at+qisend=0,0\r\n"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn send_last_chunk_is_remainder() {
        let mut mock = MockTransport::new();
        mock.expect(b"at+qisend=0,4\r\n", b"\r\nPROMPT\r\n");
        mock.expect(b"abcd", b"\r\nSEND OK\r\n");
        mock.expect(b"at+qisend=0,0\r\n", ACK);
        mock.expect(b"at+qisend=0,2\r\n", b"\r\nPROMPT\r\n");
        mock.expect(b"ef", b"\r\nSEND OK\r\n");
        mock.expect(b"at+qisend=0,0\r\n", ACK);

        let mut s = session_with_mtu(mock, 4);
        let sock = socket(&s);
        assert_eq!(send(&mut s, &sock, b"abcdef").await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn send_empty_payload_is_noop() {
        let mock = MockTransport::new();
        let log = mock.sent_log();

        let mut s = session(mock);
        let sock = socket(&s);
        assert_eq!(send(&mut s, &sock, b"").await.unwrap(), 0);
        assert!(log.entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn send_fail_token_is_device_error() {
        let mut mock = MockTransport::new();
        mock.expect(b"at+qisend=0,3\r\n", b"\r\n> \r\n");
        mock.expect(b"abc", b"\r\nSEND FAIL\r\n");

        let mut s = session(mock);
        let sock = socket(&s);
        let err = send(&mut s, &sock, b"abc").await.unwrap_err();
        assert!(matches!(err, Error::Device(ref t) if t == "SEND FAIL"));
    }

    #[tokio::test(start_paused = true)]
    async fn line_terminated_payload_for_optical_head() {
        let mut mock = MockTransport::new();
        mock.expect(b"at+qisend=0,3\r\n", b"\r\n> \r\n");
        mock.expect(b"abc\r\n", b"\r\nSEND OK\r\n");
        mock.expect(b"at+qisend=0,0\r\n", ACK);

        let mut s = Session::builder()
            .line_terminated_payload(true)
            .build(Box::new(mock))
            .unwrap();
        let sock = socket(&s);
        send(&mut s, &sock, b"abc").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_prompt_fails_before_payload() {
        let mut mock = MockTransport::new();
        let log = mock.sent_log();
        mock.expect(b"at+qisend=0,3\r\n", b"\r\nERROR\r\n");

        let mut s = session(mock);
        let sock = socket(&s);
        let err = send(&mut s, &sock, b"abc").await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
        assert_eq!(log.count(b"abc"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_polls_until_zero() {
        let mut mock = MockTransport::new();
        mock.expect(b"at+qisend=0,0\r\n", b"\r\n+QISEND: 10,0,10\r\n\r\nOK\r\n");
        mock.expect(b"at+qisend=0,0\r\n", b"\r\n+QISEND: 10,4,6\r\n\r\nOK\r\n");
        mock.expect(b"at+qisend=0,0\r\n", ACK);

        let mut s = session(mock);
        let sock = socket(&s);
        assert_eq!(wait_for_ack(&mut s, &sock).await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_exhaustion_is_reported() {
        let mut mock = MockTransport::new();
        let log = mock.sent_log();
        let limit = SessionSettings::default().ack_poll_limit;
        for _ in 0..limit {
            mock.expect_chunks(
                b"at+qisend=0,0\r\n",
                vec![Chunk::now(b"\r\n+QISEND: 10,0,10\r\n\r\nOK\r\n")],
            );
        }

        let mut s = session(mock);
        let sock = socket(&s);
        let err = wait_for_ack(&mut s, &sock).await.unwrap_err();
        assert!(matches!(err, Error::AckExhausted { attempts: 30, unacked: 10 }));
        assert_eq!(log.count(b"at+qisend=0,0\r\n"), limit as usize);
    }

    // -----------------------------------------------------------------
    // recv
    // -----------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn recv_returns_declared_payload() {
        let mut mock = MockTransport::new();
        mock.expect(b"at+qird=0,1006\r\n", b"\r\n+QIRD: 4\r\nABCD\r\nOK\r\n");

        let mut s = session(mock);
        let sock = socket(&s);
        assert_eq!(recv(&mut s, &sock, MAX_MTU).await.unwrap(), b"ABCD");
    }

    #[tokio::test(start_paused = true)]
    async fn recv_short_payload_is_framing_error() {
        let mut mock = MockTransport::new();
        mock.expect(b"at+qird=0,1006\r\n", b"\r\n+QIRD: 5\r\nABCD\r\nOK\r\n");

        let mut s = session(mock);
        let sock = socket(&s);
        assert!(matches!(
            recv(&mut s, &sock, MAX_MTU).await,
            Err(Error::Framing(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn recv_request_capped_at_mtu() {
        let mut mock = MockTransport::new();
        mock.expect(b"at+qird=0,16\r\n", b"\r\n+QIRD: 0\r\n\r\nOK\r\n");

        let mut s = session_with_mtu(mock, 16);
        let sock = socket(&s);
        assert!(recv(&mut s, &sock, 4096).await.unwrap().is_empty());
    }
}
