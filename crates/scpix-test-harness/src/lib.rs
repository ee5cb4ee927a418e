//! scpix-test-harness: Test utilities for the scpix bridge engine.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the
//! SCPI and AT engines without a bridge or modem attached. Responses can be
//! split into chunks and delayed, which together with tokio's paused clock
//! lets tests check timing behaviour exactly.

pub mod mock_serial;

pub use mock_serial::{Chunk, MockTransport, SentLog};
