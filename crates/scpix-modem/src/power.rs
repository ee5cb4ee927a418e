//! Bridge-side utilities: modem power, forwarding, SCI loopback, bridge
//! reboot and the link probe.
//!
//! The pin and power-key writes are fire-and-forget on the bridge; they get
//! a fixed settle window instead of a reply.

use std::fmt;
use std::time::Duration;

use scpix_core::error::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::scpi::{LineReader, read_line, run_scpi};
use crate::session::Session;

/// Settle time after a DCC pin write.
pub const DCC_WAIT: Duration = Duration::from_millis(100);
/// Settle time after a power key pulse.
pub const POWER_KEY_WAIT: Duration = Duration::from_millis(1500);
/// Time the modem needs before power-good is meaningful after power on.
pub const POWER_ON_WAIT: Duration = Duration::from_secs(2);
/// Interval between identity queries of the probe.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Level of a bridge GPIO pin as reported by `DIGital:PIN?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinLevel {
    Low,
    High,
    Unknown(String),
}

impl PinLevel {
    pub fn parse(reply: &str) -> Self {
        match reply.trim() {
            "0" => PinLevel::Low,
            "1" => PinLevel::High,
            other => PinLevel::Unknown(other.to_string()),
        }
    }
}

/// Modem power-good and DCC pin levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerStatus {
    pub power_good: PinLevel,
    pub dcc: PinLevel,
}

impl fmt::Display for PowerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let power = match &self.power_good {
            PinLevel::High => "modem is on",
            PinLevel::Low => "modem is off",
            PinLevel::Unknown(_) => "modem power state unknown",
        };
        let dcc = match &self.dcc {
            PinLevel::High => "DCC asserted",
            PinLevel::Low => "DCC deasserted",
            PinLevel::Unknown(_) => "DCC state unknown",
        };
        write!(f, "{power}, {dcc}")
    }
}

async fn read_pin(session: &mut Session, command: &str) -> Result<PinLevel> {
    let timeout = session.timing().scpi_response;
    let reply = run_scpi(session, command, timeout).await?;
    Ok(PinLevel::parse(&reply))
}

/// Send a bridge line that has no reply and wait `settle`.
async fn send_and_settle(session: &mut Session, command: &str, settle: Duration) -> Result<()> {
    let channel = session.channel_mut();
    channel.send_line(command).await?;
    let reply = channel.drain_for(settle).await?;
    if !reply.is_empty() {
        debug!("< {}", String::from_utf8_lossy(&reply).trim());
    }
    Ok(())
}

/// Read the modem power-good and DCC pins.
pub async fn power_status(session: &mut Session) -> Result<PowerStatus> {
    let commands = session.commands().clone();
    let power_good = read_pin(session, &commands.read_modem_power_good).await?;
    let dcc = read_pin(session, &commands.read_modem_dcc).await?;
    Ok(PowerStatus { power_good, dcc })
}

/// Power the modem on if it is off. Returns the final power-good level.
///
/// An unknown initial level is an error; nothing is switched in that case.
pub async fn power_on(session: &mut Session) -> Result<PinLevel> {
    let commands = session.commands().clone();
    match read_pin(session, &commands.read_modem_power_good).await? {
        PinLevel::High => {
            info!("modem is on");
            Ok(PinLevel::High)
        }
        PinLevel::Low => {
            info!("modem is off, powering on");
            send_and_settle(session, &commands.assert_modem_dcc, DCC_WAIT).await?;
            send_and_settle(session, &commands.modem_power_key_on, POWER_KEY_WAIT).await?;
            tokio::time::sleep(POWER_ON_WAIT).await;

            let level = read_pin(session, &commands.read_modem_power_good).await?;
            info!(?level, "modem power after power key");
            Ok(level)
        }
        PinLevel::Unknown(reply) => Err(Error::Protocol(format!(
            "modem power state unknown: {reply}"
        ))),
    }
}

/// Pulse the power key off and release DCC.
pub async fn power_off(session: &mut Session) -> Result<()> {
    let commands = session.commands().clone();
    send_and_settle(session, &commands.modem_power_key_off, POWER_KEY_WAIT).await?;
    send_and_settle(session, &commands.deassert_modem_dcc, DCC_WAIT).await?;
    info!("modem powered off");
    Ok(())
}

/// Switch serial forwarding to the modem on or off.
pub async fn set_forwarding(session: &mut Session, on: bool) -> Result<()> {
    let command = if on {
        session.commands().passthrough_on.clone()
    } else {
        session.commands().passthrough_off.clone()
    };
    session.channel_mut().send_line(&command).await
}

/// Enable or disable the bridge's SCI loopback.
pub async fn set_sci_loopback(session: &mut Session, enabled: bool) -> Result<()> {
    let command = if enabled {
        session.commands().enable_sci_loopback.clone()
    } else {
        session.commands().disable_sci_loopback.clone()
    };
    session.channel_mut().send_line(&command).await
}

/// Reboot the bridge. Returns its acknowledgement line.
pub async fn reboot_device(session: &mut Session) -> Result<String> {
    let command = session.commands().reboot_device.clone();
    let timeout = session.timing().scpi_response;
    run_scpi(session, &command, timeout).await
}

/// Set the bridge's pass-through idle timeout.
///
/// Older bridge firmware does not answer this, so a missing reply is only
/// logged. Link failures still propagate.
pub async fn set_passthrough_timeout(session: &mut Session) -> Result<()> {
    let command = session.commands().set_passthrough_timeout.clone();
    let timeout = session.timing().scpi_response;
    match run_scpi(session, &command, timeout).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_link_failure() => Err(e),
        Err(e) => {
            debug!(error = %e, "pass-through timeout not acknowledged");
            Ok(())
        }
    }
}

/// Query the bridge identity every `interval` until `cancel` fires.
///
/// Each reply is logged; a query without a reply is simply repeated.
/// Returns the number of replies seen.
pub async fn probe(
    session: &mut Session,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<u32> {
    let command = session.commands().read_device_id.clone();
    let mut reader = LineReader::new();
    let mut replies = 0;

    loop {
        session.channel_mut().send_line(&command).await?;

        let reply = tokio::select! {
            _ = cancel.cancelled() => break,
            reply = read_line(session.channel_mut(), &mut reader, interval) => reply?,
        };

        if let Some(line) = reply {
            info!("< {line}");
            replies += 1;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    debug!(replies, "probe stopped");
    Ok(replies)
}
