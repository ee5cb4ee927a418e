// scpix -- command line tool for a SCPI serial bridge and the cellular modem
// behind it.
//
// Usage:
//   scpix --device /dev/ttyUSB0 ping
//   scpix --device /dev/ttyUSB0 modem-power on
//   scpix --device /dev/ttyUSB0 modem-config --network catm --apn iot.example
//   scpix --device /dev/ttyUSB0 at --file init.at
//   scpix --device /dev/ttyUSB0 tcp-ping --address 52.1.2.3:7 --size 512 --times 10
//   scpix --device /dev/ttyUSB0 unlock
//
// Human-in-the-loop testing against a terminal emulator:
//   scpix --device /dev/pts/3 --simulate tcp-open --address 10.0.0.1:7

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use scpix_core::timing::TimingProfile;
use scpix_modem::ping::{PingOptions, ping};
use scpix_modem::power::{self, PROBE_INTERVAL, PinLevel};
use scpix_modem::provision::{self, ModemProfile, NetworkType};
use scpix_modem::scpi::{parse_scpi_script, run_scpi_script};
use scpix_modem::script::{parse_script, run_script};
use scpix_modem::{ModemConfig, Session, TransportSession, passthrough, socket, unlock};
use scpix_transport::SerialTransport;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// scpix -- drives a serial SCPI bridge and the modem behind it.
#[derive(Parser)]
#[command(name = "scpix", version, about)]
struct Cli {
    /// Serial device of the bridge (e.g. /dev/ttyUSB0, COM3).
    #[arg(short, long)]
    device: String,

    /// Serial baud rate.
    #[arg(short, long, default_value_t = 9600)]
    baud: u32,

    /// Maximum send/receive size of socket data (1-1006).
    #[arg(short = 'u', long)]
    mtu: Option<usize>,

    /// The peer is a human playing the bridge; wait forever for replies.
    #[arg(short = 'm', long)]
    simulate: bool,

    /// Send socket payloads CRLF-terminated (optical head).
    #[arg(long)]
    line_payload: bool,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log protocol traffic.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Clone, Copy, ValueEnum)]
enum PowerAction {
    Status,
    On,
    Off,
}

#[derive(Subcommand)]
enum Command {
    /// Test SCPI connectivity by sending *IDN? every second until Enter or Ctrl-C.
    Ping,

    /// Turn the modem on or off, or query its power status.
    ModemPower {
        #[arg(value_enum)]
        action: PowerAction,
    },

    /// Turn optical head forwarding on or off.
    Forward {
        #[arg(value_enum)]
        status: Switch,
    },

    /// Turn loopback of the SCI pins on or off.
    SciLoopback {
        #[arg(value_enum)]
        status: Switch,
    },

    /// Reboot the bridge.
    DeviceReboot,

    /// Run a SCPI script of "command[;timeout]" lines from a file or stdin.
    Scpi {
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Run an AT script of "command[;timeout[;expect]]" lines from a file or stdin.
    At {
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Write the initial modem configuration.
    ModemConfig {
        /// Network type: CatM or NBIoT.
        #[arg(short = 't', long, default_value = "NBIoT")]
        network: NetworkType,

        /// Access point name.
        #[arg(short, long, default_value = "")]
        apn: String,

        #[arg(short = 'U', long, default_value = "")]
        username: String,

        #[arg(short, long, default_value = "")]
        password: String,
    },

    /// Print modem and network information.
    ModemInfo,

    /// Activate a PDP context.
    PdpActivate {
        #[arg(short = 'c', long, default_value_t = 1)]
        context_id: u8,
    },

    /// Open the TCP connection.
    TcpOpen {
        /// Destination as <IP>:<PORT>.
        #[arg(short, long)]
        address: String,
    },

    /// Close the TCP connection.
    TcpClose,

    /// Send generated data over the open TCP connection.
    TcpSend {
        /// Number of bytes (split at the MTU).
        #[arg(short = 'n', long)]
        len: usize,
    },

    /// Read everything buffered on the open TCP connection.
    TcpRecv,

    /// Send data to an echo server and check the replies.
    TcpPing {
        /// Destination as <IP>:<PORT>.
        #[arg(short, long)]
        address: String,

        /// Size of each message (split at the MTU).
        #[arg(short, long, default_value_t = 64)]
        size: usize,

        /// Number of round trips.
        #[arg(short = 'n', long, default_value_t = 1)]
        times: u32,

        /// How long to wait for an echo, in seconds.
        #[arg(short = 't', long)]
        timeout: Option<f64>,

        /// Pause between messages, in seconds.
        #[arg(short = 'y', long, default_value_t = 1.5)]
        delay: f64,
    },

    /// Recover a modem whose UART is stuck.
    Unlock,
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ModemConfig> {
    let Some(path) = path else {
        return Ok(ModemConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    ModemConfig::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
}

async fn open_session(cli: &Cli, config: &ModemConfig) -> Result<Session> {
    let mut settings = config.session_settings();
    if let Some(mtu) = cli.mtu {
        settings.mtu = mtu;
    }
    if cli.line_payload {
        settings.line_terminated_payload = true;
    }

    let transport = SerialTransport::open(&cli.device, cli.baud)
        .await
        .with_context(|| format!("failed to open serial port {} at {} baud", cli.device, cli.baud))?;

    Session::builder()
        .timing(config.timing(cli.simulate))
        .commands(config.commands())
        .settings(settings)
        .build(Box::new(transport))
        .context("invalid session settings")
}

fn parse_address(address: &str) -> Result<(String, u16)> {
    let Some((ip, port)) = address.split_once(':') else {
        bail!("bad address {address:?}, expected <IP>:<PORT>");
    };
    if ip.is_empty() {
        bail!("bad address {address:?}, missing IP");
    }
    let port = port
        .parse()
        .with_context(|| format!("bad port in address {address:?}"))?;
    Ok((ip.to_string(), port))
}

fn seconds(value: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("bad {what}: {value}"))
}

/// Random printable payload of `len` bytes.
fn generate_text(len: usize) -> Vec<u8> {
    rand::thread_rng().sample_iter(&Alphanumeric).take(len).collect()
}

async fn read_script(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read script {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("failed to read script from stdin")?;
            Ok(text)
        }
    }
}

/// Cancel `token` on Enter or Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut byte = [0u8; 1];
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = stdin.read(&mut byte) => {}
        }
        token.cancel();
    });
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

async fn cmd_probe(session: &mut Session) -> Result<()> {
    println!("Probing every {PROBE_INTERVAL:?}, press Enter to stop.");
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());
    let replies = power::probe(session, PROBE_INTERVAL, &cancel).await?;
    println!("{replies} replies");
    Ok(())
}

async fn cmd_modem_power(session: &mut Session, action: PowerAction) -> Result<()> {
    match action {
        PowerAction::Status => {
            let status = power::power_status(session).await?;
            println!("{status}");
        }
        PowerAction::On => match power::power_on(session).await? {
            PinLevel::High => println!("modem power is on"),
            PinLevel::Low => println!("modem power is off"),
            PinLevel::Unknown(reply) => println!("modem power is unknown ({reply})"),
        },
        PowerAction::Off => power::power_off(session).await?,
    }
    Ok(())
}

async fn cmd_scpi(session: &mut Session, file: Option<&Path>) -> Result<()> {
    let text = read_script(file).await?;
    let steps = parse_scpi_script(&text, scpi_script_default_timeout(session.timing()))?;
    for reply in run_scpi_script(session, &steps).await? {
        println!("{reply}");
    }
    Ok(())
}

/// Script lines without a timeout wait as long as an AT command would.
fn scpi_script_default_timeout(timing: &TimingProfile) -> Duration {
    timing.at_response
}

async fn cmd_at(session: &mut Session, file: Option<&Path>) -> Result<()> {
    let text = read_script(file).await?;
    let specs = parse_script(&text, session.timing().at_response)?;
    power::set_passthrough_timeout(session).await?;
    run_script(session, &specs, false).await?;
    Ok(())
}

async fn cmd_tcp_open(session: &mut Session, address: &str) -> Result<()> {
    let (ip, port) = parse_address(address)?;
    power::set_passthrough_timeout(session).await?;
    let conn = passthrough::run(session, async |s| socket::open(s, &ip, port).await).await?;
    println!("opened connection {} to {ip}:{port}", conn.connection_id);
    Ok(())
}

async fn cmd_tcp_close(session: &mut Session) -> Result<()> {
    let conn = TransportSession::attached(session.settings());
    power::set_passthrough_timeout(session).await?;
    passthrough::run(session, async |s| socket::close(s, conn).await).await?;
    Ok(())
}

async fn cmd_tcp_send(session: &mut Session, len: usize) -> Result<()> {
    if len == 0 {
        bail!("bad length");
    }
    let conn = TransportSession::attached(session.settings());
    let payload = generate_text(len);
    power::set_passthrough_timeout(session).await?;
    let chunks = passthrough::run(session, async |s| socket::send(s, &conn, &payload).await).await?;
    println!("sent {len} bytes in {chunks} chunks");
    Ok(())
}

async fn cmd_tcp_recv(session: &mut Session) -> Result<()> {
    let conn = TransportSession::attached(session.settings());
    power::set_passthrough_timeout(session).await?;
    let received = passthrough::run(session, async |s| {
        let mut received = Vec::new();
        loop {
            let data = socket::recv(s, &conn, conn.mtu).await?;
            if data.is_empty() {
                return Ok(received);
            }
            received.extend_from_slice(&data);
        }
    })
    .await?;
    println!("{}", String::from_utf8_lossy(&received));
    Ok(())
}

async fn cmd_tcp_ping(
    session: &mut Session,
    address: &str,
    size: usize,
    times: u32,
    delay: f64,
) -> Result<()> {
    let (ip, port) = parse_address(address)?;
    if size == 0 {
        bail!("bad size");
    }
    let options = PingOptions {
        size,
        repeats: times.max(1),
        inter_message_delay: seconds(delay, "delay")?,
        ..PingOptions::default()
    };

    power::set_passthrough_timeout(session).await?;
    let stats = passthrough::run(session, async |s| {
        ping(s, &ip, port, &options, generate_text).await
    })
    .await?;
    println!("{stats}");
    Ok(())
}

async fn cmd_unlock(session: &mut Session, config: &ModemConfig) -> Result<()> {
    let mut rng = rand::thread_rng();
    let attempt = unlock::unlock(session, &config.unlock_config(), &mut rng).await?;
    println!(
        "succeeded. modem UART has been unlocked (attempt {}, delay {:.3}s)",
        attempt.attempt_index + 1,
        attempt.sampled_delay.as_secs_f64()
    );
    Ok(())
}

async fn run(cli: &Cli, config: &ModemConfig, session: &mut Session) -> Result<()> {
    match &cli.command {
        Command::Ping => cmd_probe(session).await,
        Command::ModemPower { action } => cmd_modem_power(session, *action).await,
        Command::Forward { status } => {
            power::set_forwarding(session, matches!(status, Switch::On)).await?;
            Ok(())
        }
        Command::SciLoopback { status } => {
            power::set_sci_loopback(session, matches!(status, Switch::On)).await?;
            Ok(())
        }
        Command::DeviceReboot => {
            let reply = power::reboot_device(session).await?;
            println!("< {reply}");
            Ok(())
        }
        Command::Scpi { file } => cmd_scpi(session, file.as_deref()).await,
        Command::At { file } => cmd_at(session, file.as_deref()).await,
        Command::ModemConfig {
            network,
            apn,
            username,
            password,
        } => {
            let profile = ModemProfile {
                network: *network,
                apn: apn.clone(),
                username: username.clone(),
                password: password.clone(),
            };
            provision::configure_modem(session, &profile).await?;
            Ok(())
        }
        Command::ModemInfo => {
            let script = provision::info_script(session.timing().at_response);
            power::set_passthrough_timeout(session).await?;
            run_script(session, &script, false).await?;
            Ok(())
        }
        Command::PdpActivate { context_id } => {
            let script = provision::pdp_activation_script(*context_id);
            power::set_passthrough_timeout(session).await?;
            run_script(session, &script, false).await?;
            Ok(())
        }
        Command::TcpOpen { address } => cmd_tcp_open(session, address).await,
        Command::TcpClose => cmd_tcp_close(session).await,
        Command::TcpSend { len } => cmd_tcp_send(session, *len).await,
        Command::TcpRecv => cmd_tcp_recv(session).await,
        Command::TcpPing {
            address,
            size,
            times,
            delay,
            ..
        } => cmd_tcp_ping(session, address, *size, *times, *delay).await,
        Command::Unlock => cmd_unlock(session, config).await,
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;
    if let Command::TcpPing {
        timeout: Some(secs),
        ..
    } = &cli.command
    {
        config.timing.data_wait_ms = Some(seconds(*secs, "timeout")?.as_millis() as u64);
    }

    let mut session = open_session(&cli, &config).await?;
    let result = run(&cli, &config, &mut session).await;
    session.close().await.ok();
    result
}
