//! Mock transport for deterministic testing of the bridge engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. Each response is a list of [`Chunk`]s, each
//! released after its own delay, so tests can model a modem that answers
//! in fragments, answers late, or never answers at all.
//!
//! All waiting goes through `tokio::time`, so tests that run with
//! `#[tokio::test(start_paused = true)]` finish instantly while still
//! observing exact timing.
//!
//! # Example
//!
//! ```
//! use scpix_test_harness::{Chunk, MockTransport};
//! use std::time::Duration;
//!
//! let mut mock = MockTransport::new();
//! // When the engine sends "AT\r\n", answer "OK" after 30 ms.
//! mock.expect_chunks(b"AT\r\n", vec![Chunk::after(Duration::from_millis(30), b"\r\nOK\r\n")]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scpix_core::error::{Error, Result};
use scpix_core::transport::Transport;

/// A piece of a scripted response, released `delay` after the previous
/// piece was fully read (or after the request, for the first piece).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub delay: Duration,
    pub data: Vec<u8>,
}

impl Chunk {
    /// A chunk available immediately.
    pub fn now(data: &[u8]) -> Self {
        Chunk {
            delay: Duration::ZERO,
            data: data.to_vec(),
        }
    }

    /// A chunk available after `delay`.
    pub fn after(delay: Duration, data: &[u8]) -> Self {
        Chunk {
            delay,
            data: data.to_vec(),
        }
    }
}

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The chunks to release once the matching request is received.
    response: Vec<Chunk>,
}

/// Shared view of everything sent through a [`MockTransport`].
///
/// The engine owns its transport as a `Box<dyn Transport>`, so tests keep
/// one of these handles to inspect traffic after the fact.
#[derive(Debug, Clone, Default)]
pub struct SentLog(Arc<Mutex<Vec<Vec<u8>>>>);

impl SentLog {
    /// Every `send()` payload so far, in order.
    pub fn entries(&self) -> Vec<Vec<u8>> {
        self.0.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Every `send()` payload so far, decoded lossily as text.
    pub fn lines(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|e| String::from_utf8_lossy(e).into_owned())
            .collect()
    }

    /// Number of sends whose payload equals `data` exactly.
    pub fn count(&self, data: &[u8]) -> usize {
        self.entries().iter().filter(|e| e.as_slice() == data).count()
    }

    fn push(&self, data: &[u8]) {
        if let Ok(mut log) = self.0.lock() {
            log.push(data.to_vec());
        }
    }
}

/// A mock [`Transport`] for testing protocol engines without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation; its response
/// chunks are queued behind any chunks still unread. `receive()` releases
/// queued chunks honouring their delays and otherwise sleeps for the full
/// timeout before reporting [`Error::Timeout`], like a quiet serial line.
#[derive(Debug)]
pub struct MockTransport {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Response chunks waiting to be read.
    pending: VecDeque<Chunk>,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all bytes sent through this transport.
    sent_log: SentLog,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            pending: VecDeque::new(),
            connected: true,
            sent_log: SentLog::default(),
        }
    }

    /// Add an expected request with a response delivered in one piece.
    ///
    /// An empty `response` means the bridge stays silent.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expect_chunks(request, vec![Chunk::now(response)]);
    }

    /// Add an expected request with a response delivered in timed chunks.
    pub fn expect_chunks(&mut self, request: &[u8], response: Vec<Chunk>) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.into_iter().filter(|c| !c.data.is_empty()).collect(),
        });
    }

    /// Add an expected CRLF-terminated line with a one-piece response.
    pub fn expect_line(&mut self, line: &str, response: &[u8]) {
        self.expect(format!("{line}\r\n").as_bytes(), response);
    }

    /// A handle to the log of all data sent through this transport.
    pub fn sent_log(&self) -> SentLog {
        self.sent_log.clone()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.sent_log.push(data);

        let Some(expectation) = self.expectations.pop_front() else {
            return Err(Error::Protocol(format!(
                "no more expectations in mock transport (sent {:?})",
                String::from_utf8_lossy(data)
            )));
        };
        if data != expectation.request.as_slice() {
            return Err(Error::Protocol(format!(
                "unexpected send data: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expectation.request),
                String::from_utf8_lossy(data)
            )));
        }
        self.pending.extend(expectation.response);
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let Some(chunk) = self.pending.front_mut() else {
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout);
        };

        if chunk.delay > timeout {
            chunk.delay -= timeout;
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout);
        }
        if !chunk.delay.is_zero() {
            tokio::time::sleep(chunk.delay).await;
            chunk.delay = Duration::ZERO;
        }

        let n = chunk.data.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk.data[..n]);
        chunk.data.drain(..n);
        if chunk.data.is_empty() {
            self.pending.pop_front();
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn mock_transport_basic_send_receive() {
        let mut mock = MockTransport::new();
        mock.expect(b"*IDN?\r\n", b"LANDIS+GYR,E355\r\n");

        mock.send(b"*IDN?\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock
            .receive(&mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"LANDIS+GYR,E355\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn mock_transport_tracks_sent_data() {
        let mut mock = MockTransport::new();
        let log = mock.sent_log();
        mock.expect(b"AT\r\n", b"OK\r\n");
        mock.expect(b"ATE0\r\n", b"OK\r\n");

        mock.send(b"AT\r\n").await.unwrap();
        mock.send(b"ATE0\r\n").await.unwrap();

        assert_eq!(log.lines(), vec!["AT\r\n", "ATE0\r\n"]);
        assert_eq!(log.count(b"AT\r\n"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mock_transport_wrong_data_errors() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r\n", b"OK\r\n");

        let result = mock.send(b"ATI\r\n").await;
        assert!(matches!(result.unwrap_err(), Error::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_transport_no_expectations_errors() {
        let mut mock = MockTransport::new();

        let result = mock.send(b"AT\r\n").await;
        assert!(matches!(result.unwrap_err(), Error::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_transport_silence_waits_full_timeout() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 8];

        let start = Instant::now();
        let result = mock.receive(&mut buf, Duration::from_millis(250)).await;
        assert!(matches!(result.unwrap_err(), Error::Timeout));
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_transport_delayed_chunk_spans_several_reads() {
        let mut mock = MockTransport::new();
        mock.expect_chunks(
            b"AT\r\n",
            vec![Chunk::after(Duration::from_millis(50), b"OK\r\n")],
        );
        mock.send(b"AT\r\n").await.unwrap();

        let mut buf = [0u8; 8];
        let start = Instant::now();
        let poll = Duration::from_millis(20);
        assert!(matches!(mock.receive(&mut buf, poll).await, Err(Error::Timeout)));
        assert!(matches!(mock.receive(&mut buf, poll).await, Err(Error::Timeout)));
        let n = mock.receive(&mut buf, poll).await.unwrap();
        assert_eq!(&buf[..n], b"OK\r\n");
        assert_eq!(start.elapsed(), Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_transport_partial_receive() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r\n", b"ABCD");
        mock.send(b"AT\r\n").await.unwrap();

        let mut buf = [0u8; 2];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"AB");
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"CD");
        assert!(matches!(
            mock.receive(&mut buf, Duration::from_millis(10)).await,
            Err(Error::Timeout)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_transport_disconnect() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.close().await.unwrap();
        assert!(!mock.is_connected());

        let result = mock.send(b"AT\r\n").await;
        assert!(matches!(result.unwrap_err(), Error::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_transport_set_connected() {
        let mut mock = MockTransport::new();
        mock.set_connected(false);

        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result.unwrap_err(), Error::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_transport_expect_line_appends_crlf() {
        let mut mock = MockTransport::new();
        mock.expect_line("AT", b"OK\r\n");

        mock.send(b"AT\r\n").await.unwrap();
        let mut buf = [0u8; 8];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"OK\r\n");
    }
}
