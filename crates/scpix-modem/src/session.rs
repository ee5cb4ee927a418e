//! The per-invocation session context.
//!
//! A [`Session`] owns the serial link together with the timing profile, the
//! SCPI command table and the tunables of one run. It is created once per
//! CLI invocation and passed by `&mut` to every component, which is what
//! keeps a single command in flight at a time.

use std::time::Duration;

use scpix_core::command::{CommandSpec, Pattern};
use scpix_core::error::{Error, Result};
use scpix_core::scpi::BridgeCommands;
use scpix_core::timing::TimingProfile;
use scpix_core::transport::Transport;

use crate::at::{AtSender, DEFAULT_POLL_INTERVAL};
use crate::line::LineChannel;
use crate::socket::MAX_MTU;

/// Tunables of a session that are not response timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Inter-character poll interval of the AT sender.
    pub poll_interval: Duration,
    /// Largest payload moved in one socket send or read.
    pub mtu: usize,
    /// Send socket payloads CRLF-terminated instead of raw.
    ///
    /// Needed for the optical head, which only forwards whole lines.
    pub line_terminated_payload: bool,
    /// Modem socket connection id used for TCP commands.
    pub connection_id: u8,
    /// Modem PDP context id used when opening sockets.
    pub pdp_context_id: u8,
    /// Maximum number of send-status polls per chunk.
    pub ack_poll_limit: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            poll_interval: DEFAULT_POLL_INTERVAL,
            mtu: MAX_MTU,
            line_terminated_payload: false,
            connection_id: 0,
            pdp_context_id: 1,
            ack_poll_limit: 30,
        }
    }
}

/// An open link to the bridge plus everything the engine needs to drive it.
pub struct Session {
    channel: LineChannel,
    timing: TimingProfile,
    commands: BridgeCommands,
    settings: SessionSettings,
}

impl Session {
    /// Start building a session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn timing(&self) -> &TimingProfile {
        &self.timing
    }

    pub fn commands(&self) -> &BridgeCommands {
        &self.commands
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn channel_mut(&mut self) -> &mut LineChannel {
        &mut self.channel
    }

    /// Issue one AT command with a CRLF terminator.
    pub async fn at(&mut self, spec: &CommandSpec) -> Result<Vec<u8>> {
        AtSender::new(self.settings.poll_interval)
            .send(&mut self.channel, spec, false)
            .await
    }

    /// Issue raw bytes through the AT sender, e.g. a socket payload.
    pub async fn at_bytes(
        &mut self,
        request: &[u8],
        raw: bool,
        timeout: Duration,
        expect: &[Pattern],
    ) -> Result<Vec<u8>> {
        AtSender::new(self.settings.poll_interval)
            .exchange(&mut self.channel, request, raw, timeout, expect)
            .await
    }

    /// Close the serial link.
    pub async fn close(mut self) -> Result<()> {
        self.channel.close().await
    }
}

/// Builder for [`Session`].
///
/// # Example
///
/// ```no_run
/// use scpix_core::timing::TimingProfile;
/// use scpix_modem::Session;
/// # use scpix_core::transport::Transport;
/// # fn demo(transport: Box<dyn Transport>) -> scpix_core::Result<()> {
/// let session = Session::builder()
///     .timing(TimingProfile::for_simulation(true))
///     .mtu(512)
///     .build(transport)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    timing: TimingProfile,
    commands: BridgeCommands,
    settings: SessionSettings,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timing(mut self, timing: TimingProfile) -> Self {
        self.timing = timing;
        self
    }

    pub fn commands(mut self, commands: BridgeCommands) -> Self {
        self.commands = commands;
        self
    }

    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn mtu(mut self, mtu: usize) -> Self {
        self.settings.mtu = mtu;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.settings.poll_interval = interval;
        self
    }

    pub fn line_terminated_payload(mut self, enabled: bool) -> Self {
        self.settings.line_terminated_payload = enabled;
        self
    }

    /// Validate the settings and take ownership of the transport.
    pub fn build(self, transport: Box<dyn Transport>) -> Result<Session> {
        if self.settings.mtu == 0 || self.settings.mtu > MAX_MTU {
            return Err(Error::InvalidParameter(format!(
                "mtu must be between 1 and {MAX_MTU}, got {}",
                self.settings.mtu
            )));
        }
        if self.settings.poll_interval.is_zero() {
            return Err(Error::InvalidParameter(
                "poll interval must be positive".into(),
            ));
        }
        if self.settings.ack_poll_limit == 0 {
            return Err(Error::InvalidParameter(
                "ack poll limit must be positive".into(),
            ));
        }

        Ok(Session {
            channel: LineChannel::new(transport),
            timing: self.timing,
            commands: self.commands,
            settings: self.settings,
        })
    }
}
