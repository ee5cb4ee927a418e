//! scpix-core: Core traits, types, and error definitions for scpix.
//!
//! This crate defines the pieces every layer of the bridge engine shares.
//! The protocol engine in `scpix-modem` and the serial link in
//! `scpix-transport` both depend on it, so nothing here touches hardware.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel to the bridge
//! - [`CommandSpec`] / [`Pattern`] -- one AT command and what it must answer
//! - [`TimingProfile`] -- the per-session table of response delays
//! - [`BridgeCommands`] -- the SCPI command table of the bridge
//! - [`Error`] / [`Result`] -- error handling

pub mod command;
pub mod error;
pub mod scpi;
pub mod timing;
pub mod transport;

// Re-export key types at crate root for ergonomic `use scpix_core::*`.
pub use command::{CommandSpec, ParseSpecError, Pattern};
pub use error::{Error, Result};
pub use scpi::BridgeCommands;
pub use timing::{TimingOverrides, TimingProfile};
pub use transport::Transport;
