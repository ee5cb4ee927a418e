//! Optional TOML configuration file.
//!
//! Every field is optional; an empty file yields the built-in defaults.
//!
//! ```toml
//! mtu = 512
//! poll_interval_ms = 20
//! idn_signature = "LANDIS"
//!
//! [timing]
//! at_response_ms = 1500
//! data_wait_ms = 20000
//! ```

use std::time::Duration;

use scpix_core::error::{Error, Result};
use scpix_core::scpi::BridgeCommands;
use scpix_core::timing::{TimingOverrides, TimingProfile};
use serde::Deserialize;

use crate::session::SessionSettings;
use crate::unlock::UnlockConfig;

/// Settings read from the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModemConfig {
    pub timing: TimingOverrides,
    pub mtu: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub connection_id: Option<u8>,
    pub pdp_context_id: Option<u8>,
    pub ack_poll_limit: Option<u32>,
    pub line_terminated_payload: Option<bool>,
    pub idn_signature: Option<String>,
    pub max_unlock_attempts: Option<u32>,
    pub commands: CommandOverrides,
}

/// Replacement SCPI lines for bridge firmware variants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandOverrides {
    pub passthrough_on: Option<String>,
    pub passthrough_off: Option<String>,
    pub reboot_device: Option<String>,
    pub set_passthrough_timeout: Option<String>,
}

impl ModemConfig {
    /// Parse a configuration file's contents.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(ModemConfig::default());
        }
        toml::from_str(input)
            .map_err(|e| Error::InvalidParameter(format!("invalid config TOML: {e}")))
    }

    /// The timing profile for this run, with file overrides applied.
    pub fn timing(&self, simulate: bool) -> TimingProfile {
        TimingProfile::for_simulation(simulate).with_overrides(&self.timing)
    }

    /// Session settings, starting from the defaults.
    pub fn session_settings(&self) -> SessionSettings {
        let mut settings = SessionSettings::default();
        if let Some(mtu) = self.mtu {
            settings.mtu = mtu;
        }
        if let Some(ms) = self.poll_interval_ms {
            settings.poll_interval = Duration::from_millis(ms);
        }
        if let Some(id) = self.connection_id {
            settings.connection_id = id;
        }
        if let Some(id) = self.pdp_context_id {
            settings.pdp_context_id = id;
        }
        if let Some(limit) = self.ack_poll_limit {
            settings.ack_poll_limit = limit;
        }
        if let Some(enabled) = self.line_terminated_payload {
            settings.line_terminated_payload = enabled;
        }
        settings
    }

    /// The bridge command table with overrides applied.
    pub fn commands(&self) -> BridgeCommands {
        let mut commands = BridgeCommands::default();
        let overrides = [
            (&self.commands.passthrough_on, &mut commands.passthrough_on),
            (&self.commands.passthrough_off, &mut commands.passthrough_off),
            (&self.commands.reboot_device, &mut commands.reboot_device),
            (
                &self.commands.set_passthrough_timeout,
                &mut commands.set_passthrough_timeout,
            ),
        ];
        for (value, slot) in overrides {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        commands
    }

    /// Unlock tunables with overrides applied.
    pub fn unlock_config(&self) -> UnlockConfig {
        let mut config = UnlockConfig::default();
        if let Some(signature) = &self.idn_signature {
            config.idn_signature = signature.clone();
        }
        if let Some(attempts) = self.max_unlock_attempts {
            config.max_attempts = attempts;
        }
        config
    }
}
