//! `serialport`-backed implementations.
//!
//! This module provides the concrete [`Transport`](crate::traits::Transport)
//! for real devices and the hot-plug watcher that reports devices appearing
//! and disappearing.
//!
//! Nothing outside this module should reference the `serialport` crate
//! directly.

pub mod port;
pub mod watcher;

/// Errors raised while talking to a serial device.
#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),
}
