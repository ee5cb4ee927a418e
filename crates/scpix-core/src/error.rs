//! Error types for scpix.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Serial-link failures, SCPI and AT
//! response failures, socket framing errors, and the two bounded retry loops
//! all report through this one enum.

/// The error type for all scpix operations.
///
/// Variants follow the failure taxonomy of the bridge engine: transport I/O,
/// timeouts, protocol and framing errors, device-reported errors, and the
/// exhaustion of the two bounded retry loops (ack polling and UART unlock).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (opening or configuring the serial port).
    #[error("transport error: {0}")]
    Transport(String),

    /// A response that does not fit what the command should have produced.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A socket receive response that does not satisfy the `+QIRD` grammar.
    #[error("framing error: {0}")]
    Framing(String),

    /// The modem or bridge reported an explicit error token.
    ///
    /// The payload is the offending token text, e.g. `SEND FAIL`.
    #[error("device reported error: {0}")]
    Device(String),

    /// Timed out waiting for bytes on the transport.
    #[error("timeout waiting for response")]
    Timeout,

    /// A SCPI command got no response line within its deadline.
    #[error("{command} timeout")]
    NoResponse {
        /// The SCPI command line that went unanswered.
        command: String,
    },

    /// An AT command finished without any expected pattern appearing.
    ///
    /// `response` holds whatever text accumulated before the deadline.
    #[error("AT failed: {command}")]
    CommandFailed {
        /// The AT command line.
        command: String,
        /// Everything received before the deadline expired.
        response: String,
    },

    /// The modem kept reporting unacknowledged bytes after every poll.
    #[error("no ack for a long time ({unacked} bytes unacknowledged after {attempts} polls)")]
    AckExhausted {
        /// Number of send-status polls issued.
        attempts: u32,
        /// Unacknowledged byte count reported by the last poll.
        unacked: u64,
    },

    /// The bridge never answered its identity query with the expected signature.
    #[error("scpi link seems not working after {attempts} attempts")]
    LinkDown {
        /// Number of identity queries issued.
        attempts: u32,
    },

    /// The UART unlock procedure used up its attempt budget.
    #[error("reached max repeat count ({attempts})")]
    RecoveryExhausted {
        /// Number of full unlock cycles performed.
        attempts: u32,
    },

    /// Data echoed back over a socket differs from what was sent.
    #[error("received data mismatched ({sent} bytes sent, {received} bytes received)")]
    Mismatch {
        /// Bytes sent in the failed round trip.
        sent: usize,
        /// Bytes received in the failed round trip.
        received: usize,
    },

    /// An invalid parameter was passed to an operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the bridge has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the bridge was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error came from the serial link itself rather than from
    /// anything the bridge or modem said.
    ///
    /// Operations that deliberately ignore device outcomes (socket close,
    /// the pass-through idle timeout) still propagate these.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::NotConnected | Error::ConnectionLost | Error::Io(_)
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("port busy".into());
        assert_eq!(e.to_string(), "transport error: port busy");
    }

    #[test]
    fn error_display_no_response() {
        let e = Error::NoResponse {
            command: "*IDN?".into(),
        };
        assert_eq!(e.to_string(), "*IDN? timeout");
    }

    #[test]
    fn error_display_command_failed() {
        let e = Error::CommandFailed {
            command: "at+cimi".into(),
            response: "garbage".into(),
        };
        assert_eq!(e.to_string(), "AT failed: at+cimi");
    }

    #[test]
    fn error_display_device() {
        let e = Error::Device("SEND FAIL".into());
        assert_eq!(e.to_string(), "device reported error: SEND FAIL");
    }

    #[test]
    fn error_display_ack_exhausted() {
        let e = Error::AckExhausted {
            attempts: 30,
            unacked: 12,
        };
        assert!(e.to_string().starts_with("no ack for a long time"));
        assert!(e.to_string().contains("30 polls"));
    }

    #[test]
    fn error_display_recovery_exhausted() {
        let e = Error::RecoveryExhausted { attempts: 5 };
        assert_eq!(e.to_string(), "reached max repeat count (5)");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn link_failures_are_classified() {
        assert!(Error::ConnectionLost.is_link_failure());
        assert!(Error::NotConnected.is_link_failure());
        assert!(!Error::Timeout.is_link_failure());
        assert!(!Error::Device("ERROR".into()).is_link_failure());
        assert!(
            !Error::CommandFailed {
                command: "at".into(),
                response: String::new(),
            }
            .is_link_failure()
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
