//! Connection lifecycle of the serial device.
//!
//! [`ConnectionStateMachine`] owns the [`Transport`] and is the only place
//! that mutates [`ConnectionState`].  It turns explicit requests
//! (`connect`, `disconnect`, `toggle`) and unsolicited transport events
//! (open results, close, I/O errors, hot-plug) into state transitions and
//! [`ChannelEvent`]s.
//!
//! ```text
//!                connect()            Opened
//! Disconnected ───────────▶ Connecting ──────▶ Connected
//!      ▲                        │                  │
//!      │  OpenFailed / removal  │   disconnect()   │
//!      ├────────────────────────┘        ▼         │
//!      │          Closed             Closing ◀─────┘
//!      └─────────────────────────────────┘
//! ```
//!
//! Every failure path ends in `Disconnected`.  The only automatic retry is a
//! single connect scheduled [`SETTLE_DELAY`] after the configured device
//! reappears.

use crate::config::ConnectionConfig;
use crate::event::{ChannelEvent, Observers};
use crate::traits::{ConnectionId, ControlLines, ReconnectToken, Scheduler, Transport, TransportEvent};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc;
use std::time::Duration;

/// Wait between a device node appearing and opening it.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A close was requested and has not been confirmed yet.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closing => write!(f, "closing"),
        }
    }
}

/// A request that is not valid in the current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("cannot connect while {0}")]
    NotDisconnected(ConnectionState),
}

/// Drives open/close/reconnect of a single device.
pub struct ConnectionStateMachine<T: Transport, S: Scheduler> {
    transport: T,
    scheduler: S,
    config: ConnectionConfig,
    state: ConnectionState,
    current: ConnectionId,
    pending_reconnect: Option<ReconnectToken>,
    last_token: ReconnectToken,
    observers: Observers,
}

impl<T: Transport, S: Scheduler> ConnectionStateMachine<T, S> {
    /// Create a disconnected state machine.
    ///
    /// `config` is used by [`toggle`](Self::toggle) and by reconnects until a
    /// later [`connect`](Self::connect) replaces it.
    pub fn new(transport: T, scheduler: S, config: ConnectionConfig) -> Self {
        Self {
            transport,
            scheduler,
            config,
            state: ConnectionState::Disconnected,
            current: ConnectionId::default(),
            pending_reconnect: None,
            last_token: ReconnectToken::default(),
            observers: Observers::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The configuration of the current (or last) connection attempt.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Id of the current (or last) connection attempt.
    pub fn connection_id(&self) -> ConnectionId {
        self.current
    }

    /// Token of the reconnect waiting for its settle delay, if any.
    pub fn pending_reconnect(&self) -> Option<ReconnectToken> {
        self.pending_reconnect
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Register a subscriber for lifecycle events.
    pub fn subscribe(&mut self) -> mpsc::Receiver<ChannelEvent> {
        self.observers.subscribe()
    }

    pub(crate) fn emit(&mut self, event: ChannelEvent) {
        self.observers.emit(event);
    }

    /// Start opening the device described by `config`.
    ///
    /// Only valid while disconnected.  The outcome is reported later as
    /// [`ChannelEvent::ConnectionOpened`] or
    /// [`ChannelEvent::ConnectionFailed`].
    pub fn connect(&mut self, config: ConnectionConfig) -> Result<(), StateError> {
        if self.state != ConnectionState::Disconnected {
            return Err(StateError::NotDisconnected(self.state));
        }
        self.cancel_reconnect();

        self.config = config;
        self.current = self.current.next();
        self.state = ConnectionState::Connecting;
        info!(
            "connecting to {} at {} baud ({})",
            self.config.device_path, self.config.baud_rate, self.current
        );
        self.transport
            .open(self.current, &self.config, ControlLines::default());
        Ok(())
    }

    /// Request the device to be closed.
    ///
    /// Calling this while already disconnected only cancels a pending
    /// reconnect; nothing is emitted.
    pub fn disconnect(&mut self) {
        self.cancel_reconnect();
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                info!("closing {} ({})", self.config.device_path, self.current);
                self.state = ConnectionState::Closing;
                self.transport.close(self.current);
            }
            ConnectionState::Closing => debug!("close already in progress"),
            ConnectionState::Disconnected => debug!("already disconnected"),
        }
    }

    /// Disconnect if connected, otherwise connect with the last
    /// configuration.
    pub fn toggle(&mut self) -> Result<(), StateError> {
        if self.is_connected() {
            self.disconnect();
            Ok(())
        } else {
            self.connect(self.config.clone())
        }
    }

    /// Apply an event reported by the transport.
    ///
    /// Returns the received bytes when `event` is data for the open
    /// connection; everything else is consumed here.
    pub fn on_transport_event(&mut self, event: TransportEvent) -> Option<Vec<u8>> {
        match event {
            TransportEvent::Opened(id) if id == self.current => self.on_opened(),
            TransportEvent::OpenFailed(id, reason) if id == self.current => {
                self.on_open_failed(reason)
            }
            TransportEvent::Data(id, bytes)
                if id == self.current && self.state == ConnectionState::Connected =>
            {
                return Some(bytes);
            }
            TransportEvent::Error(id, message)
                if id == self.current && self.state != ConnectionState::Disconnected =>
            {
                warn!("serial port {} encountered error: {}", self.config.device_path, message);
                self.emit(ChannelEvent::TransportError(message));
            }
            TransportEvent::Closed(id) if id == self.current => self.on_closed(),
            TransportEvent::DevicesAttached(paths) => self.on_attached(&paths),
            TransportEvent::DevicesRemoved(paths) => self.on_removed(&paths),
            stale => debug!("ignoring transport event {:?} while {}", stale, self.state),
        }
        None
    }

    /// Run the reconnect scheduled under `token`, if it is still wanted.
    pub fn on_reconnect_due(&mut self, token: ReconnectToken) {
        if self.pending_reconnect != Some(token) {
            debug!("ignoring stale reconnect {:?}", token);
            return;
        }
        self.pending_reconnect = None;
        if let Err(e) = self.connect(self.config.clone()) {
            debug!("skipping reconnect: {}", e);
        }
    }

    fn on_opened(&mut self) {
        match self.state {
            ConnectionState::Connecting => {
                info!(
                    "serial port {} ({}) was opened",
                    self.config.device_path, self.config.baud_rate
                );
                self.state = ConnectionState::Connected;
                self.emit(ChannelEvent::ConnectionOpened(self.config.clone()));
            }
            // A close is already on its way.
            other => debug!("ignoring open confirmation while {}", other),
        }
    }

    fn on_open_failed(&mut self, reason: String) {
        match self.state {
            ConnectionState::Connecting => {
                warn!(
                    "failed to open serial port {}: {}",
                    self.config.device_path, reason
                );
                self.state = ConnectionState::Disconnected;
                self.emit(ChannelEvent::ConnectionFailed {
                    config: self.config.clone(),
                    reason,
                });
            }
            ConnectionState::Closing => {
                self.state = ConnectionState::Disconnected;
                self.emit(ChannelEvent::ConnectionClosed);
            }
            other => debug!("ignoring open failure while {}", other),
        }
    }

    fn on_closed(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        info!(
            "serial port {} ({}) was closed",
            self.config.device_path, self.config.baud_rate
        );
        self.state = ConnectionState::Disconnected;
        self.emit(ChannelEvent::ConnectionClosed);
    }

    fn on_attached(&mut self, paths: &[String]) {
        if !paths.iter().any(|p| *p == self.config.device_path) {
            debug!("attached devices {:?} do not include {}", paths, self.config.device_path);
            return;
        }
        if self.state != ConnectionState::Disconnected {
            debug!("{} reattached while {}", self.config.device_path, self.state);
            return;
        }
        self.cancel_reconnect();
        self.last_token = ReconnectToken(self.last_token.0 + 1);
        self.pending_reconnect = Some(self.last_token);
        info!(
            "{} attached, reconnecting in {} ms",
            self.config.device_path,
            SETTLE_DELAY.as_millis()
        );
        self.scheduler.schedule(SETTLE_DELAY, self.last_token);
    }

    fn on_removed(&mut self, paths: &[String]) {
        if !paths.iter().any(|p| *p == self.config.device_path) {
            return;
        }
        self.cancel_reconnect();
        if self.state == ConnectionState::Disconnected {
            return;
        }
        info!("serial port {} was removed from the system", self.config.device_path);
        self.state = ConnectionState::Disconnected;
        // Release the handle; the confirmation will be ignored.
        self.transport.close(self.current);
        self.emit(ChannelEvent::ConnectionClosed);
    }

    fn cancel_reconnect(&mut self) {
        if let Some(token) = self.pending_reconnect.take() {
            debug!("cancelling pending reconnect {:?}", token);
            self.scheduler.cancel(token);
        }
    }
}

impl<T: Transport, S: Scheduler> Drop for ConnectionStateMachine<T, S> {
    fn drop(&mut self) {
        self.cancel_reconnect();
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            self.transport.close(self.current);
        }
    }
}

//  Tests
