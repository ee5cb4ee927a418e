//! Built-in modem scripts: initial configuration, identity queries and PDP
//! context activation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use scpix_core::command::CommandSpec;
use scpix_core::error::{Error, Result};
use tracing::info;

use crate::passthrough;
use crate::power::set_passthrough_timeout;
use crate::script::{quiet_specs, run_script};
use crate::session::Session;

/// Quiet period of each sleep-mode configuration command.
const SLEEP_CONFIG_DELAY: Duration = Duration::from_millis(1000);

/// Radio access technology the modem should camp on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    CatM,
    NbIot,
}

impl NetworkType {
    /// Value of the modem's `iotopmode` setting.
    pub fn iot_op_mode(self) -> u8 {
        match self {
            NetworkType::CatM => 0,
            NetworkType::NbIot => 1,
        }
    }
}

impl FromStr for NetworkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CATM" => Ok(NetworkType::CatM),
            "NBIOT" => Ok(NetworkType::NbIot),
            _ => Err(Error::InvalidParameter(format!("invalid network type {s:?}"))),
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::CatM => write!(f, "CatM"),
            NetworkType::NbIot => write!(f, "NBIoT"),
        }
    }
}

/// Network parameters written by [`configure_modem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemProfile {
    pub network: NetworkType,
    pub apn: String,
    pub username: String,
    pub password: String,
}

/// The initial configuration script for `profile`.
pub fn init_script(profile: &ModemProfile, timeout: Duration) -> Vec<CommandSpec> {
    let iot_mode = format!("at+qcfg=\"iotopmode\",{}", profile.network.iot_op_mode());
    let context = format!(
        "at+qicsgp=1,1,\"{}\",\"{}\",\"{}\",0",
        profile.apn, profile.username, profile.password
    );
    let mut commands = vec![
        "ate0",
        "at+cmee=1",
        "at+cfun=1",
        // pin 26: input, supercap type
        "at+qcfg=\"gpio\",1,26,0,0,0,0",
        // pin 85: output, external antenna
        "at+qcfg=\"gpio\",1,85,1,0,0,0",
        "at+qcfg=\"gpio\",3,85,1,1",
        // pins 64-66: charge level setup
        "at+qcfg=\"gpio\",1,64,0,0,0",
        "at+qcfg=\"gpio\",3,64,0,0",
        "at+qcfg=\"gpio\",1,65,0,0,0",
        "at+qcfg=\"gpio\",3,65,0,0",
        "at+qcfg=\"gpio\",1,66,0,0,0",
        "at+qcfg=\"gpio\",3,66,0,0",
        "at+qcfg=\"band\",0,8000004,0,1",
        "at+qcfg=\"band\",0,0,95,1",
        "at+cops=0",
    ];
    commands.push(iot_mode.as_str());
    commands.push(context.as_str());
    quiet_specs(commands, timeout)
}

/// Identity and registration queries.
pub fn info_script(timeout: Duration) -> Vec<CommandSpec> {
    let mut specs = quiet_specs(
        [
            "at+cimi",
            "at+cgmi",
            "at+cgmm",
            "at+cgmr",
            "at+cgsn",
            "at+cpin?",
            "at+csq",
            "at+cereg?",
        ],
        timeout,
    );
    specs.push(CommandSpec::new("at+qiact?", Duration::from_millis(2500)).expect("OK\r\n"));
    specs
}

/// Re-activate PDP context `cid`, closing any lingering socket first.
pub fn pdp_activation_script(cid: u8) -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("at+qiclose=0,3", Duration::from_millis(2000)).expect("OK\r\n"),
        CommandSpec::new(format!("at+qideact={cid}"), Duration::from_millis(3000)).expect("OK\r\n"),
        CommandSpec::new(format!("at+qiact={cid}"), Duration::from_millis(2000)).expect("OK\r\n"),
        CommandSpec::new("at+qiact?", Duration::from_millis(2500)).expect("OK\r\n"),
    ]
}

/// Read the supercap indication from a `"gpio",<level>` response.
pub fn parse_supercap(response: &[u8]) -> Result<bool> {
    const PREFIX: &str = "\"gpio\",";
    let text = String::from_utf8_lossy(response);
    let level = text
        .find(PREFIX)
        .and_then(|i| text[i + PREFIX.len()..].chars().next())
        .and_then(|c| c.to_digit(10))
        .ok_or_else(|| Error::Protocol("supercap indication gpio is not working".into()))?;
    Ok(level == 1)
}

/// Configure sleep mode from the module's supercap indication.
///
/// Must run inside a pass-through environment. Modules without a supercap
/// also get fast power-off on pin 25.
pub async fn configure_sleep_mode(session: &mut Session) -> Result<bool> {
    let response = session
        .at(&CommandSpec::new("at+qcfg=\"gpio\",2,26", SLEEP_CONFIG_DELAY))
        .await?;
    let supercap = parse_supercap(&response)?;
    info!("module {} supercap", if supercap { "with" } else { "without" });

    session
        .at(&CommandSpec::new(
            format!("at+qsclk={}", u8::from(supercap)),
            SLEEP_CONFIG_DELAY,
        ))
        .await?;
    if !supercap {
        session
            .at(&CommandSpec::new("at+qcfg=\"fast/poweroff\",25,1", SLEEP_CONFIG_DELAY))
            .await?;
    }
    Ok(supercap)
}

/// Write the full initial configuration, then set up sleep mode.
pub async fn configure_modem(session: &mut Session, profile: &ModemProfile) -> Result<()> {
    set_passthrough_timeout(session).await?;
    let script = init_script(profile, session.timing().at_response);
    run_script(session, &script, false).await?;
    passthrough::run(session, async |s| configure_sleep_mode(s).await.map(drop)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use scpix_test_harness::MockTransport;

    const AT_DELAY: Duration = Duration::from_millis(1000);

    fn profile() -> ModemProfile {
        ModemProfile {
            network: NetworkType::NbIot,
            apn: "iot.example".into(),
            username: "user".into(),
            password: "secret".into(),
        }
    }

    #[test]
    fn network_type_parsing() {
        assert_eq!("catm".parse::<NetworkType>().unwrap(), NetworkType::CatM);
        assert_eq!("NBIoT".parse::<NetworkType>().unwrap(), NetworkType::NbIot);
        assert!("lte".parse::<NetworkType>().is_err());
        assert_eq!(NetworkType::CatM.iot_op_mode(), 0);
        assert_eq!(NetworkType::NbIot.iot_op_mode(), 1);
    }

    #[test]
    fn init_script_ends_with_network_settings() {
        let script = init_script(&profile(), AT_DELAY);
        assert_eq!(script.len(), 17);
        assert_eq!(script[0].command, "ate0");
        assert_eq!(script[15].command, "at+qcfg=\"iotopmode\",1");
        assert_eq!(
            script[16].command,
            "at+qicsgp=1,1,\"iot.example\",\"user\",\"secret\",0"
        );
        assert!(script.iter().all(|s| s.expect.is_empty() && s.timeout == AT_DELAY));
    }

    #[test]
    fn info_script_checks_pdp_last() {
        let script = info_script(AT_DELAY);
        let last = script.last().unwrap();
        assert_eq!(last.command, "at+qiact?");
        assert_eq!(last.timeout, Duration::from_millis(2500));
        assert!(!last.expect.is_empty());
    }

    #[test]
    fn pdp_script_uses_context_id() {
        let script = pdp_activation_script(2);
        assert_eq!(script[1].command, "at+qideact=2");
        assert_eq!(script[2].command, "at+qiact=2");
    }

    #[test]
    fn supercap_indication() {
        assert!(parse_supercap(b"\r\n+QCFG: \"gpio\",1\r\n\r\nOK\r\n").unwrap());
        assert!(!parse_supercap(b"\r\n+QCFG: \"gpio\",0\r\n\r\nOK\r\n").unwrap());
        assert!(parse_supercap(b"\r\nERROR\r\n").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_mode_without_supercap_enables_fast_poweroff() {
        let mut mock = MockTransport::new();
        let log = mock.sent_log();
        mock.expect(b"at+qcfg=\"gpio\",2,26\r\n", b"\r\n+QCFG: \"gpio\",0\r\n\r\nOK\r\n");
        mock.expect(b"at+qsclk=0\r\n", b"\r\nOK\r\n");
        mock.expect(b"at+qcfg=\"fast/poweroff\",25,1\r\n", b"\r\nOK\r\n");

        let mut s = Session::builder().build(Box::new(mock)).unwrap();
        assert!(!configure_sleep_mode(&mut s).await.unwrap());
        assert_eq!(log.entries().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_mode_with_supercap() {
        let mut mock = MockTransport::new();
        let log = mock.sent_log();
        mock.expect(b"at+qcfg=\"gpio\",2,26\r\n", b"\r\n+QCFG: \"gpio\",1\r\n\r\nOK\r\n");
        mock.expect(b"at+qsclk=1\r\n", b"\r\nOK\r\n");

        let mut s = Session::builder().build(Box::new(mock)).unwrap();
        assert!(configure_sleep_mode(&mut s).await.unwrap());
        assert_eq!(log.count(b"at+qcfg=\"fast/poweroff\",25,1\r\n"), 0);
    }
}
