//! SCPI command table of the serial bridge.
//!
//! The bridge understands a small set of instrument-control lines for its
//! GPIO pins, the modem power key, pass-through forwarding and its own
//! reboot. They live in one immutable [`BridgeCommands`] value that the
//! session hands to every component, so firmware variants can swap a
//! command without touching the engine.

/// The SCPI lines the engine sends to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeCommands {
    /// Identity query; the reply carries the vendor signature.
    pub read_device_id: String,
    /// Read the modem power-good pin (P52).
    pub read_modem_power_good: String,
    /// Read the modem DC/DC control pin (P51).
    pub read_modem_dcc: String,
    /// Drive the DC/DC control pin high.
    pub assert_modem_dcc: String,
    /// Drive the DC/DC control pin low.
    pub deassert_modem_dcc: String,
    /// Pulse the modem power key low for 500 ms (power on).
    pub modem_power_key_on: String,
    /// Pulse the modem power key low for 1000 ms (power off).
    pub modem_power_key_off: String,
    /// Hand the modem UART lines to the bridge (SCI loopback stop).
    pub enable_sci_loopback: String,
    /// Give the modem UART lines back to the modem.
    pub disable_sci_loopback: String,
    /// Enter pass-through forwarding.
    pub passthrough_on: String,
    /// Leave pass-through forwarding.
    pub passthrough_off: String,
    /// Reboot the bridge.
    pub reboot_device: String,
    /// Idle timeout after which the bridge leaves pass-through on its own.
    pub set_passthrough_timeout: String,
}

impl Default for BridgeCommands {
    fn default() -> Self {
        BridgeCommands {
            read_device_id: "*IDN?".into(),
            read_modem_power_good: "DIGital:PIN? P52".into(),
            read_modem_dcc: "DIGital:PIN? P51".into(),
            assert_modem_dcc: "DIGital:PIN P51,HI".into(),
            deassert_modem_dcc: "DIGital:PIN P51,LO".into(),
            modem_power_key_on: "DIGital:PIN PD1,LO,500".into(),
            modem_power_key_off: "DIGital:PIN PD1,LO,1000".into(),
            enable_sci_loopback: "WAN:LOOPback:STOp".into(),
            disable_sci_loopback: "WAN:LOOPback:STArt".into(),
            passthrough_on: "SER:CON ON".into(),
            passthrough_off: "+++".into(),
            reboot_device: "PWRState:MONVolt 1600".into(),
            set_passthrough_timeout: "SERial:TIMEout 8000".into(),
        }
    }
}
