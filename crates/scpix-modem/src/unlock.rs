//! Modem UART unlock.
//!
//! A modem whose UART got stuck can be recovered by rebooting the bridge
//! and switching its SCI loopback off at the right moment while the bridge
//! boots. The right moment is not known precisely, so each attempt picks a
//! delay at random from a window and a whole cycle is retried until the
//! modem answers `AT` again or the attempt budget runs out.
//!
//! One cycle walks the states of [`UnlockState`] in order:
//!
//! ```text
//! LinkTest -> Reboot -> Delay(d) -> RestoreUart -> ModemBoot -> Liveness -> Unlocked
//! ```
//!
//! Delays come from a normal distribution squeezed into `[0, 1]`, raised to
//! a skew exponent and scaled onto the window, so attempts cluster towards
//! the early end of the window without excluding the late end.

use std::f64::consts::PI;
use std::time::Duration;

use rand::Rng;
use rand::distributions::Open01;
use scpix_core::command::CommandSpec;
use scpix_core::error::{Error, Result};
use tracing::{debug, error, info, warn};

use crate::passthrough;
use crate::scpi::{run_scpi, run_scpi_expecting};
use crate::session::Session;

/// Tunables of the unlock procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct UnlockConfig {
    /// Time from bridge reboot to its SCI loopback becoming active.
    pub reboot_to_loopback: Duration,
    /// Time from loopback activation to the modem baud rate switch.
    pub loopback_to_baud_switch: Duration,
    /// Slack added on both sides of the delay window.
    pub margin: Duration,
    /// Exponent applied to the normalized sample.
    pub skew: f64,
    /// Time the modem needs to boot after its UART is restored.
    pub modem_boot: Duration,
    /// Pause before restarting a failed cycle.
    pub retry_delay: Duration,
    /// Number of full cycles before giving up.
    pub max_attempts: u32,
    /// Pause between identity queries while testing the link.
    pub link_retry_delay: Duration,
    /// Identity queries before the link is declared down.
    pub max_link_attempts: u32,
    /// Log a cabling hint after this many failed identity queries.
    pub link_warn_every: u32,
    /// Substring the identity reply must contain.
    pub idn_signature: String,
}

impl Default for UnlockConfig {
    fn default() -> Self {
        UnlockConfig {
            reboot_to_loopback: Duration::from_millis(2900),
            loopback_to_baud_switch: Duration::from_millis(3100),
            margin: Duration::from_millis(200),
            skew: 1.5,
            modem_boot: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
            max_attempts: 5,
            link_retry_delay: Duration::from_millis(200),
            max_link_attempts: 50,
            link_warn_every: 5,
            idn_signature: "LANDIS".into(),
        }
    }
}

impl UnlockConfig {
    /// The `[min, max]` window delays are drawn from.
    ///
    /// With the defaults this is 2.7s to 6.2s.
    pub fn window(&self) -> (Duration, Duration) {
        let min = self.reboot_to_loopback.saturating_sub(self.margin);
        let max = self.reboot_to_loopback + self.loopback_to_baud_switch + self.margin;
        (min, max)
    }
}

/// One cycle of the procedure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnlockAttempt {
    /// Zero-based cycle number.
    pub attempt_index: u32,
    /// Delay between the reboot acknowledgement and restoring the UART.
    pub sampled_delay: Duration,
}

/// States of one unlock cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockState {
    LinkTest,
    Reboot,
    Delay(Duration),
    RestoreUart,
    ModemBoot,
    Liveness,
    Unlocked,
}

/// Run the unlock procedure until the modem answers or attempts run out.
///
/// Returns the successful attempt. A dead SCPI link or a serial failure
/// aborts at once; every other failure restarts the cycle after
/// `config.retry_delay`. Exhausting all attempts yields
/// [`Error::RecoveryExhausted`].
pub async fn unlock<R>(session: &mut Session, config: &UnlockConfig, rng: &mut R) -> Result<UnlockAttempt>
where
    R: Rng + ?Sized,
{
    let (min, max) = config.window();
    info!(?min, ?max, attempts = config.max_attempts, "starting modem UART unlock");

    for attempt_index in 0..config.max_attempts {
        let attempt = UnlockAttempt {
            attempt_index,
            sampled_delay: sample_delay(rng, min, max, config.skew),
        };

        match run_cycle(session, config, &attempt).await {
            Ok(()) => {
                info!(
                    attempt = attempt_index + 1,
                    delay = ?attempt.sampled_delay,
                    "modem UART unlocked"
                );
                return Ok(attempt);
            }
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                error!(attempt = attempt_index + 1, error = %e, "unlock attempt failed");
                if attempt_index + 1 < config.max_attempts {
                    tokio::time::sleep(config.retry_delay).await;
                }
            }
        }
    }

    Err(Error::RecoveryExhausted {
        attempts: config.max_attempts,
    })
}

fn is_fatal(e: &Error) -> bool {
    matches!(e, Error::LinkDown { .. }) || e.is_link_failure()
}

async fn run_cycle(session: &mut Session, config: &UnlockConfig, attempt: &UnlockAttempt) -> Result<()> {
    let mut state = UnlockState::LinkTest;
    loop {
        debug!(?state, attempt = attempt.attempt_index + 1, "unlock");
        state = match state {
            UnlockState::LinkTest => {
                link_test(session, config).await?;
                UnlockState::Reboot
            }
            UnlockState::Reboot => {
                let command = session.commands().reboot_device.clone();
                run_scpi_expecting(session, &command, "OK", "rebooting device failed").await?;
                info!("use delay {:.3} secs", attempt.sampled_delay.as_secs_f64());
                UnlockState::Delay(attempt.sampled_delay)
            }
            UnlockState::Delay(delay) => {
                tokio::time::sleep(delay).await;
                UnlockState::RestoreUart
            }
            UnlockState::RestoreUart => {
                let command = session.commands().disable_sci_loopback.clone();
                run_scpi_expecting(session, &command, "OK", "disable loopback failed").await?;
                info!("waiting {:?} for modem power up", config.modem_boot);
                UnlockState::ModemBoot
            }
            UnlockState::ModemBoot => {
                tokio::time::sleep(config.modem_boot).await;
                UnlockState::Liveness
            }
            UnlockState::Liveness => {
                passthrough::run(session, async |s| {
                    let spec = CommandSpec::new("at", s.timing().at_response).expect("OK");
                    s.at(&spec).await.map(drop)
                })
                .await?;
                UnlockState::Unlocked
            }
            UnlockState::Unlocked => return Ok(()),
        };
    }
}

/// Query the identity until the reply carries the vendor signature.
async fn link_test(session: &mut Session, config: &UnlockConfig) -> Result<()> {
    let command = session.commands().read_device_id.clone();
    let timeout = session.timing().scpi_response;

    for attempt in 1..=config.max_link_attempts {
        match run_scpi(session, &command, timeout).await {
            Ok(reply) if reply.contains(&config.idn_signature) => return Ok(()),
            Ok(reply) => debug!(reply, "unexpected identity"),
            Err(e) if e.is_link_failure() => return Err(e),
            Err(e) => debug!(error = %e, "identity query failed"),
        }
        if config.link_warn_every > 0 && attempt % config.link_warn_every == 0 {
            warn!("scpi link seems not working, please check your cable or power cycle the device");
        }
        tokio::time::sleep(config.link_retry_delay).await;
    }

    Err(Error::LinkDown {
        attempts: config.max_link_attempts,
    })
}

/// Draw a delay from `[min, max]` with the skewed distribution.
pub fn sample_delay<R>(rng: &mut R, min: Duration, max: Duration, skew: f64) -> Duration
where
    R: Rng + ?Sized,
{
    let (min_ms, max_ms) = (min.as_secs_f64() * 1000.0, max.as_secs_f64() * 1000.0);
    loop {
        // Box-Muller
        let u: f64 = rng.sample(Open01);
        let v: f64 = rng.sample(Open01);
        let normal = (-2.0 * u.ln()).sqrt() * (2.0 * PI * v).cos();
        if let Some(ms) = shape_sample(normal, min_ms, max_ms, skew) {
            return Duration::from_secs_f64(ms / 1000.0);
        }
    }
}

/// Map a standard normal sample onto `[min, max]`.
///
/// The sample is scaled to `normal / 10 + 0.5`; values outside `[0, 1]`
/// return `None` and must be redrawn.
pub fn shape_sample(normal: f64, min: f64, max: f64, skew: f64) -> Option<f64> {
    let n = normal / 10.0 + 0.5;
    if !(0.0..=1.0).contains(&n) {
        return None;
    }
    Some(n.powf(skew) * (max - min) + min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use scpix_test_harness::MockTransport;
    use tokio::time::Instant;

    fn session(mock: MockTransport) -> Session {
        Session::builder().build(Box::new(mock)).unwrap()
    }

    fn expect_cycle(mock: &mut MockTransport, liveness_reply: &[u8]) {
        mock.expect(b"*IDN?\r\n", b"LANDIS+GYR,SCPIX,1.2\r\n");
        mock.expect(b"PWRState:MONVolt 1600\r\n", b"OK\r\n");
        mock.expect(b"WAN:LOOPback:STArt\r\n", b"OK\r\n");
        mock.expect(b"SER:CON ON\r\n", b"");
        mock.expect(b"at\r\n", liveness_reply);
        mock.expect(b"+++\r\n", b"");
    }

    // -----------------------------------------------------------------
    // Sampling
    // -----------------------------------------------------------------

    #[test]
    fn default_window() {
        let (min, max) = UnlockConfig::default().window();
        assert_eq!(min, Duration::from_millis(2700));
        assert_eq!(max, Duration::from_millis(6200));
    }

    #[test]
    fn shape_maps_bounds() {
        assert_eq!(shape_sample(-5.0, 2700.0, 6200.0, 1.5), Some(2700.0));
        assert_eq!(shape_sample(5.0, 2700.0, 6200.0, 1.5), Some(6200.0));
        let mid = shape_sample(0.0, 2700.0, 6200.0, 1.5).unwrap();
        assert!((mid - (0.5f64.powf(1.5) * 3500.0 + 2700.0)).abs() < 1e-9);
    }

    #[test]
    fn shape_rejects_out_of_range() {
        assert_eq!(shape_sample(5.01, 2700.0, 6200.0, 1.5), None);
        assert_eq!(shape_sample(-5.01, 2700.0, 6200.0, 1.5), None);
    }

    #[test]
    fn skew_pulls_toward_min() {
        let plain = shape_sample(0.0, 0.0, 1.0, 1.0).unwrap();
        let skewed = shape_sample(0.0, 0.0, 1.0, 1.5).unwrap();
        assert!(skewed < plain);
    }

    #[test]
    fn samples_stay_in_window() {
        let mut rng = StdRng::seed_from_u64(7);
        let (min, max) = UnlockConfig::default().window();
        for _ in 0..1000 {
            let d = sample_delay(&mut rng, min, max, 1.5);
            assert!(d >= min && d <= max, "{d:?} outside window");
        }
    }

    // -----------------------------------------------------------------
    // Procedure
    // -----------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn unlocks_on_first_attempt() {
        let mut mock = MockTransport::new();
        let log = mock.sent_log();
        expect_cycle(&mut mock, b"\r\nOK\r\n");

        let mut s = session(mock);
        let mut rng = StdRng::seed_from_u64(1);
        let start = Instant::now();
        let attempt = unlock(&mut s, &UnlockConfig::default(), &mut rng).await.unwrap();

        assert_eq!(attempt.attempt_index, 0);
        assert!(start.elapsed() >= attempt.sampled_delay + Duration::from_secs(5));
        assert_eq!(
            log.lines(),
            vec![
                "*IDN?\r\n",
                "PWRState:MONVolt 1600\r\n",
                "WAN:LOOPback:STArt\r\n",
                "SER:CON ON\r\n",
                "at\r\n",
                "+++\r\n",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let mut mock = MockTransport::new();
        let log = mock.sent_log();
        for _ in 0..5 {
            expect_cycle(&mut mock, b"\r\nERROR\r\n");
        }

        let mut s = session(mock);
        let mut rng = StdRng::seed_from_u64(2);
        let err = unlock(&mut s, &UnlockConfig::default(), &mut rng)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RecoveryExhausted { attempts: 5 }));
        assert_eq!(err.to_string(), "reached max repeat count (5)");
        assert_eq!(log.count(b"PWRState:MONVolt 1600\r\n"), 5);
        assert_eq!(log.count(b"+++\r\n"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_later_attempt() {
        let mut mock = MockTransport::new();
        expect_cycle(&mut mock, b"\r\nERROR\r\n");
        expect_cycle(&mut mock, b"\r\nOK\r\n");

        let mut s = session(mock);
        let mut rng = StdRng::seed_from_u64(3);
        let attempt = unlock(&mut s, &UnlockConfig::default(), &mut rng).await.unwrap();
        assert_eq!(attempt.attempt_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reboot_without_ok_restarts_cycle() {
        let mut mock = MockTransport::new();
        let log = mock.sent_log();
        mock.expect(b"*IDN?\r\n", b"LANDIS+GYR\r\n");
        mock.expect(b"PWRState:MONVolt 1600\r\n", b"ERR\r\n");
        expect_cycle(&mut mock, b"\r\nOK\r\n");

        let mut s = session(mock);
        let mut rng = StdRng::seed_from_u64(4);
        let attempt = unlock(&mut s, &UnlockConfig::default(), &mut rng).await.unwrap();
        assert_eq!(attempt.attempt_index, 1);
        assert_eq!(log.count(b"WAN:LOOPback:STArt\r\n"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn link_test_retries_until_signature() {
        let mut mock = MockTransport::new();
        mock.expect(b"*IDN?\r\n", b"");
        mock.expect(b"*IDN?\r\n", b"garbage\r\n");
        expect_cycle(&mut mock, b"\r\nOK\r\n");

        let mut s = session(mock);
        let mut rng = StdRng::seed_from_u64(5);
        let attempt = unlock(&mut s, &UnlockConfig::default(), &mut rng).await.unwrap();
        assert_eq!(attempt.attempt_index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_link_is_fatal() {
        let mut mock = MockTransport::new();
        let log = mock.sent_log();
        for _ in 0..3 {
            mock.expect(b"*IDN?\r\n", b"");
        }

        let config = UnlockConfig {
            max_link_attempts: 3,
            ..UnlockConfig::default()
        };
        let mut s = session(mock);
        let mut rng = StdRng::seed_from_u64(6);
        let err = unlock(&mut s, &config, &mut rng).await.unwrap_err();

        assert!(matches!(err, Error::LinkDown { attempts: 3 }));
        assert_eq!(log.count(b"PWRState:MONVolt 1600\r\n"), 0);
    }
}
