//! Protocol engine for driving a cellular modem through the serial bridge.
//!
//! The bridge speaks SCPI on its own behalf and, once switched into
//! pass-through mode, relays AT traffic to the modem. This crate layers the
//! engine from the wire up; every layer takes `&mut Session`, so exactly one
//! command is ever in flight on the link.
//!
//! # Architecture
//!
//! - [`line`] -- CRLF or raw line writes, drained before returning
//! - [`scpi`] -- single-line SCPI exchanges with the bridge
//! - [`at`] -- AT command sender: pattern matching, inter-character polling,
//!   the since-last-byte timeout and the stall-sentinel keep-alive
//! - [`session`] -- the per-invocation context and its builder
//! - [`passthrough`] -- enter/leave pass-through with a guaranteed exit
//! - [`script`] -- sequential AT scripts, stop on first failure
//! - [`socket`] -- open/close/send/recv over the modem's TCP extensions
//! - [`ping`] -- echo round trips over a socket with transfer statistics
//! - [`unlock`] -- the timing-critical modem UART recovery procedure
//! - [`power`] -- modem power, forwarding, loopback, reboot and link probe
//! - [`provision`] -- built-in modem configuration and query scripts
//! - [`config`] -- the optional TOML configuration file

pub mod at;
pub mod config;
pub mod line;
pub mod passthrough;
pub mod ping;
pub mod power;
pub mod provision;
pub mod scpi;
pub mod script;
pub mod session;
pub mod socket;
pub mod unlock;

pub use at::AtSender;
pub use config::ModemConfig;
pub use line::LineChannel;
pub use ping::{PingOptions, TransferStats};
pub use session::{Session, SessionBuilder, SessionSettings};
pub use socket::{Remote, TransportSession};
pub use unlock::{UnlockAttempt, UnlockConfig};
