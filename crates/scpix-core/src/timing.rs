//! Response-delay tables for a session.
//!
//! Every wait in the engine that depends on how fast the bridge or the
//! modem answers is looked up in a [`TimingProfile`]. Two profiles exist:
//! [`TimingProfile::realistic`] for real hardware, and
//! [`TimingProfile::unbounded`] for driving the tool against a human typing
//! the bridge's replies by hand.
//!
//! A profile is built once per session, optionally patched from the
//! configuration file through [`TimingOverrides`], and never changed again.

use std::time::Duration;

use serde::Deserialize;

/// Longest delay the unbounded profile uses: `2^31 - 1` milliseconds.
pub const UNBOUNDED_MS: u64 = (1 << 31) - 1;

/// Named mapping of response delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingProfile {
    /// Profile name, for logging.
    pub name: &'static str,
    /// Default absolute (since-last-byte) timeout for an AT command.
    pub at_response: Duration,
    /// Default deadline for a single-line SCPI reply.
    pub scpi_response: Duration,
    /// Timeout for the socket-open command.
    pub socket_open: Duration,
    /// Timeout for the socket-close command.
    pub socket_close: Duration,
    /// Timeout for the raw payload phase of a socket send.
    pub send_timeout: Duration,
    /// Timeout for one socket read command.
    pub recv_timeout: Duration,
    /// How long a ping keeps polling for an incomplete echo.
    pub data_wait: Duration,
}

impl TimingProfile {
    /// Delays measured against real bridge and modem hardware.
    pub const fn realistic() -> Self {
        TimingProfile {
            name: "realistic",
            at_response: Duration::from_millis(1000),
            scpi_response: Duration::from_millis(800),
            socket_open: Duration::from_millis(10_000),
            socket_close: Duration::from_millis(10_500),
            send_timeout: Duration::from_millis(10_000),
            recv_timeout: Duration::from_millis(1000),
            data_wait: Duration::from_millis(15_000),
        }
    }

    /// Effectively infinite delays for a human-in-the-loop simulator.
    pub const fn unbounded() -> Self {
        let forever = Duration::from_millis(UNBOUNDED_MS);
        TimingProfile {
            name: "unbounded",
            at_response: forever,
            scpi_response: forever,
            socket_open: forever,
            socket_close: forever,
            send_timeout: forever,
            recv_timeout: forever,
            data_wait: forever,
        }
    }

    /// Select a profile: the unbounded one when simulating, otherwise realistic.
    pub const fn for_simulation(simulate: bool) -> Self {
        if simulate {
            Self::unbounded()
        } else {
            Self::realistic()
        }
    }

    /// Return a copy of this profile with the given overrides applied.
    pub fn with_overrides(mut self, overrides: &TimingOverrides) -> Self {
        let apply = |slot: &mut Duration, ms: Option<u64>| {
            if let Some(ms) = ms {
                *slot = Duration::from_millis(ms);
            }
        };
        apply(&mut self.at_response, overrides.at_response_ms);
        apply(&mut self.scpi_response, overrides.scpi_response_ms);
        apply(&mut self.socket_open, overrides.socket_open_ms);
        apply(&mut self.socket_close, overrides.socket_close_ms);
        apply(&mut self.send_timeout, overrides.send_timeout_ms);
        apply(&mut self.recv_timeout, overrides.recv_timeout_ms);
        apply(&mut self.data_wait, overrides.data_wait_ms);
        self
    }
}

impl Default for TimingProfile {
    fn default() -> Self {
        Self::realistic()
    }
}

/// Per-key millisecond overrides, as read from the configuration file.
///
/// Absent keys keep the value of the base profile. Hardware revisions
/// disagree on the right AT delay (500 ms to 1000 ms have been used), so
/// this is where a site pins it down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingOverrides {
    pub at_response_ms: Option<u64>,
    pub scpi_response_ms: Option<u64>,
    pub socket_open_ms: Option<u64>,
    pub socket_close_ms: Option<u64>,
    pub send_timeout_ms: Option<u64>,
    pub recv_timeout_ms: Option<u64>,
    pub data_wait_ms: Option<u64>,
}
