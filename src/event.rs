//! Events flowing into and out of the command channel.
//!
//! * [`ChannelInput`] is everything that is serialised onto the channel's
//!   processing context: transport events, due reconnects and control
//!   requests.  Background threads only ever *send* these.
//! * [`ControlReply`] answers a control request, delivered through the
//!   [`Responder`] that came with it.
//! * [`ChannelEvent`] is what the channel reports to its subscribers.
//!   [`Observers`] fans an event out to every live subscriber.
//! * [`Notification`] is the user-visible text for the subset of events
//!   that warrant one.

use crate::command::{ParseFailure, ResolvedAction};
use crate::config::ConnectionConfig;
use crate::connection::ConnectionState;
use crate::frame::DecodeError;
use crate::traits::{ReconnectToken, TransportEvent};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc;

/// A request from the outside world (control socket, menu, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlRequest {
    Connect,
    Disconnect,
    Toggle,
    /// Report the current connection state without changing it.
    Status,
}

/// Answer to a [`ControlRequest`].
///
/// Serialised as one JSON object per line on the control socket:
///
/// ```json
/// {"result":"status","state":"connected","device_path":"/dev/ttyACM0","baud_rate":9600}
/// {"result":"rejected","reason":"cannot connect while connected"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ControlReply {
    /// The request was applied; this is the state right after it.
    Status {
        state: ConnectionState,
        device_path: String,
        baud_rate: u32,
    },
    Rejected { reason: String },
}

/// The channel's end of a control client's reply slot.
#[derive(Debug, Clone)]
pub struct Responder(mpsc::Sender<ControlReply>);

impl Responder {
    pub fn new(tx: mpsc::Sender<ControlReply>) -> Self {
        Self(tx)
    }

    /// Deliver `reply`.  A client that already hung up is not an error.
    pub fn send(&self, reply: ControlReply) {
        if self.0.send(reply).is_err() {
            debug!("control client left before its reply");
        }
    }
}

/// Input processed, one at a time, by
/// [`SerialCommandChannel::handle`](crate::channel::SerialCommandChannel::handle).
#[derive(Debug, Clone)]
pub enum ChannelInput {
    Transport(TransportEvent),
    ReconnectDue(ReconnectToken),
    /// A control request, answered through the responder if there is one.
    Control(ControlRequest, Option<Responder>),
}

impl From<TransportEvent> for ChannelInput {
    fn from(ev: TransportEvent) -> Self {
        ChannelInput::Transport(ev)
    }
}

/// A frame-level problem.  Never affects the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameWarning {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Parse(#[from] ParseFailure),
}

/// Events reported by the channel to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The device is open and commands are being processed.
    ConnectionOpened(ConnectionConfig),
    /// An open attempt failed; the channel is back to disconnected.
    ConnectionFailed {
        config: ConnectionConfig,
        reason: String,
    },
    /// The device was closed or removed.
    ConnectionClosed,
    /// A command resolved to an action, which was handed to the action sink.
    ActionResolved(ResolvedAction),
    /// A frame could not be decoded or dispatched.
    ParseWarning(FrameWarning),
    /// The transport reported an I/O error on the open device.
    TransportError(String),
}

impl ChannelEvent {
    /// The notification the user should see for this event, if any.
    ///
    /// Parse, decode and I/O problems are diagnostics only.
    pub fn notification(&self) -> Option<Notification> {
        match self {
            ChannelEvent::ConnectionOpened(_) => Some(Notification::new(
                "Model01 Connected",
                "Model01 was connected to your computer.",
            )),
            ChannelEvent::ConnectionClosed => Some(Notification::new(
                "Model01 Disconnected",
                "Model01 was disconnected from your computer.",
            )),
            ChannelEvent::ActionResolved(action) => Some(Notification::new(
                "keycommander",
                format!("Opening {}.", action.identifier),
            )),
            ChannelEvent::ConnectionFailed { .. }
            | ChannelEvent::ParseWarning(_)
            | ChannelEvent::TransportError(_) => None,
        }
    }
}

/// Title and body of a user notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.body)
    }
}

/// The set of subscribers to a channel's events.
///
/// Subscribers whose receiver has been dropped are pruned on the next
/// [`emit`](Observers::emit).
#[derive(Debug, Default)]
pub struct Observers {
    subscribers: Vec<mpsc::Sender<ChannelEvent>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&mut self) -> mpsc::Receiver<ChannelEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber.
    pub fn emit(&mut self, event: ChannelEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
