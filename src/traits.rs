//! Core traits that decouple the command channel from any specific serial
//! library, timer mechanism, launcher or control transport.
//!
//! Every concrete backend (the `serialport` transport, a thread-backed
//! scheduler, a Unix-socket listener, a test harness, …) implements one of
//! these traits.  The [`SerialCommandChannel`](crate::channel::SerialCommandChannel)
//! only depends on these abstractions.

use crate::command::ResolvedAction;
use crate::config::ConnectionConfig;
use crate::event::ChannelInput;
use std::fmt;
use std::sync::mpsc;
use std::time::Duration;

/// Identifies one connection attempt.
///
/// Every attempt gets a fresh id.  Transport events are tagged with the id
/// they belong to so that late events from a previous attempt can be told
/// apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Modem control lines to drive once the port is open.
///
/// The keyboard powers its serial logic from DTR/RTS, so both are asserted
/// by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlLines {
    pub dtr: bool,
    pub rts: bool,
}

impl Default for ControlLines {
    fn default() -> Self {
        Self { dtr: true, rts: true }
    }
}

/// Everything a [`Transport`] reports, asynchronously, after being asked to
/// open or close a device.  Hot-plug notifications are reported through the
/// same type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The device was opened.
    Opened(ConnectionId),
    /// The device could not be opened.
    OpenFailed(ConnectionId, String),
    /// Bytes arrived from the device.
    Data(ConnectionId, Vec<u8>),
    /// An I/O error occurred on an open device.
    Error(ConnectionId, String),
    /// The device handle was closed, requested or not.
    Closed(ConnectionId),
    /// Device paths that became visible since the last scan.
    DevicesAttached(Vec<String>),
    /// Device paths that disappeared since the last scan.
    DevicesRemoved(Vec<String>),
}

/// Abstraction over a serial device driver.
///
/// Both operations are fire-and-forget: they must not block, and their
/// outcome is reported later as a [`TransportEvent`] through whatever sink
/// the implementation was constructed with.
///
/// # Contract
///
/// * After [`open`](Transport::open) the transport eventually reports either
///   [`Opened`](TransportEvent::Opened) or
///   [`OpenFailed`](TransportEvent::OpenFailed) for that id.
/// * After [`close`](Transport::close) the transport eventually reports
///   [`Closed`](TransportEvent::Closed) for that id, even if the handle was
///   already gone.
pub trait Transport {
    /// Start opening `config.device_path` at `config.baud_rate`.
    fn open(&mut self, id: ConnectionId, config: &ConnectionConfig, lines: ControlLines);

    /// Start closing the handle opened for `id`.
    fn close(&mut self, id: ConnectionId);
}

/// Token identifying a scheduled reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ReconnectToken(pub u64);

/// Runs one-shot deferred reconnects.
///
/// When the delay expires the scheduler delivers
/// [`ChannelInput::ReconnectDue`] with the token back into the channel's
/// input queue.  A cancelled token should not be delivered; the channel
/// ignores stale tokens anyway.
pub trait Scheduler {
    fn schedule(&mut self, delay: Duration, token: ReconnectToken);

    fn cancel(&mut self, token: ReconnectToken);
}

/// Receives actions resolved from device commands.
pub trait ActionSink {
    /// The error type produced by this sink.
    type Error: std::error::Error + Send + 'static;

    /// Carry out `action`, typically by opening the application at its path.
    fn perform(&mut self, action: &ResolvedAction) -> Result<(), Self::Error>;
}

//  Control Source

/// A source of [`ControlRequest`](crate::event::ControlRequest)s.
///
/// Implementations listen on some transport and forward requests into the
/// channel's input queue as [`ChannelInput::Control`].
///
/// # Contract
///
/// * [`run`](ControlSource::run) **blocks** until the source is exhausted or
///   an unrecoverable error occurs.
/// * Implementations must be [`Send`] so they can run on a dedicated thread.
pub trait ControlSource: Send {
    /// The error type produced by this source.
    type Error: std::error::Error + Send + 'static;

    /// Start listening and forward every request into `sink`.
    fn run(&mut self, sink: mpsc::Sender<ChannelInput>) -> Result<(), Self::Error>;
}
