//! The serial command channel: the single entry point used by the daemon.
//!
//! [`SerialCommandChannel`] composes the [`FrameDecoder`], the command
//! dispatcher ([`command::dispatch`]) and the [`ConnectionStateMachine`].
//! It is driven by feeding it [`ChannelInput`]s one at a time from a single
//! thread, which keeps the receive buffer and the connection state free of
//! concurrent mutation.
//!
//! # Typical usage
//!
//! ```ignore
//! let (tx, rx) = mpsc::channel();
//! let transport = SerialPortTransport::new(tx.clone());
//! let scheduler = ThreadScheduler::new(tx.clone());
//! let mut channel = SerialCommandChannel::new(
//!     transport, scheduler, AppLauncher::default(), config.serial, config.applications,
//! );
//! let events = channel.subscribe();
//! channel.connect(channel.config().clone())?;
//! for input in rx {
//!     channel.handle(input);
//! }
//! ```

use crate::command::{self, ActionMapping};
use crate::config::ConnectionConfig;
use crate::connection::{ConnectionState, ConnectionStateMachine, StateError};
use crate::event::{ChannelEvent, ChannelInput, ControlReply, ControlRequest};
use crate::frame::{Frame, FrameDecoder};
use crate::traits::{ActionSink, Scheduler, Transport, TransportEvent};
use log::{debug, error, info, warn};
use std::sync::mpsc;

/// Connects a device's command stream to an [`ActionSink`].
///
/// Generic over the [`Transport`], the [`Scheduler`] used for delayed
/// reconnects and the [`ActionSink`], so the whole pipeline can be driven
/// with test doubles.
pub struct SerialCommandChannel<T: Transport, S: Scheduler, A: ActionSink> {
    machine: ConnectionStateMachine<T, S>,
    decoder: FrameDecoder,
    mapping: ActionMapping,
    sink: A,
}

impl<T: Transport, S: Scheduler, A: ActionSink> SerialCommandChannel<T, S, A> {
    /// Create a disconnected channel.
    pub fn new(
        transport: T,
        scheduler: S,
        sink: A,
        config: ConnectionConfig,
        mapping: ActionMapping,
    ) -> Self {
        Self {
            machine: ConnectionStateMachine::new(transport, scheduler, config),
            decoder: FrameDecoder::new(),
            mapping,
            sink,
        }
    }

    /// Start connecting to the device described by `config`.
    ///
    /// A rejected connect leaves the receive buffer alone.
    pub fn connect(&mut self, config: ConnectionConfig) -> Result<(), StateError> {
        self.machine.connect(config)?;
        self.decoder.reset();
        Ok(())
    }

    /// Close the device.  A no-op while already disconnected.
    pub fn disconnect(&mut self) {
        self.machine.disconnect();
        self.decoder.reset();
    }

    /// Disconnect if connected, otherwise connect with the last
    /// configuration.
    pub fn toggle(&mut self) -> Result<(), StateError> {
        self.machine.toggle()?;
        self.decoder.reset();
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.machine.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.machine.config()
    }

    /// Current state and device, as reported to control clients.
    pub fn status(&self) -> ControlReply {
        ControlReply::Status {
            state: self.state(),
            device_path: self.config().device_path.clone(),
            baud_rate: self.config().baud_rate,
        }
    }

    pub fn mapping(&self) -> &ActionMapping {
        &self.mapping
    }

    /// Replace the identifier → application mapping.
    pub fn set_mapping(&mut self, mapping: ActionMapping) {
        self.mapping = mapping;
    }

    pub fn machine(&self) -> &ConnectionStateMachine<T, S> {
        &self.machine
    }

    pub fn sink(&self) -> &A {
        &self.sink
    }

    /// Register a subscriber for [`ChannelEvent`]s.
    pub fn subscribe(&mut self) -> mpsc::Receiver<ChannelEvent> {
        self.machine.subscribe()
    }

    /// Process one input.
    pub fn handle(&mut self, input: ChannelInput) {
        match input {
            ChannelInput::Transport(event) => self.on_transport_event(event),
            ChannelInput::ReconnectDue(token) => self.machine.on_reconnect_due(token),
            ChannelInput::Control(request, responder) => {
                let reply = self.on_control(request);
                if let Some(responder) = responder {
                    responder.send(reply);
                }
            }
        }
        if !self.machine.is_connected() {
            self.decoder.reset();
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        if let Some(bytes) = self.machine.on_transport_event(event) {
            self.on_data(&bytes);
        }
    }

    fn on_control(&mut self, request: ControlRequest) -> ControlReply {
        debug!("control request {:?}", request);
        let result = match request {
            ControlRequest::Connect => self.connect(self.machine.config().clone()),
            ControlRequest::Disconnect => {
                self.disconnect();
                Ok(())
            }
            ControlRequest::Toggle => self.toggle(),
            ControlRequest::Status => {
                info!(
                    "{} ({} baud): {}",
                    self.config().device_path,
                    self.config().baud_rate,
                    self.state()
                );
                Ok(())
            }
        };
        match result {
            Ok(()) => self.status(),
            Err(e) => {
                warn!("{:?} ignored: {}", request, e);
                ControlReply::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn on_data(&mut self, bytes: &[u8]) {
        let frames: Vec<Frame> = match self.decoder.feed(bytes) {
            Ok(frames) => frames.collect(),
            Err(e) => {
                warn!("{}", e);
                self.machine.emit(ChannelEvent::ParseWarning(e.into()));
                return;
            }
        };
        for frame in frames {
            self.dispatch(&frame);
        }
    }

    fn dispatch(&mut self, frame: &Frame) {
        match command::dispatch(frame.as_str(), &self.mapping) {
            Ok(action) => {
                info!("opening {} ({})", action.identifier, action.path.display());
                if let Err(e) = self.sink.perform(&action) {
                    error!("failed to open {}: {}", action.path.display(), e);
                }
                self.machine.emit(ChannelEvent::ActionResolved(action));
            }
            Err(failure) => {
                warn!("{}", failure);
                self.machine.emit(ChannelEvent::ParseWarning(failure.into()));
            }
        }
    }
}

//  Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ParseFailure, ResolvedAction};
    use crate::connection::tests::{keyboard, RecorderScheduler, RecorderTransport, TransportCall};
    use crate::event::{FrameWarning, Responder};
    use crate::traits::{ConnectionId, ReconnectToken};
    use std::path::PathBuf;

    /// Records every action it is asked to perform; optionally fails.
    #[derive(Debug, Default)]
    struct RecorderSink {
        performed: Vec<ResolvedAction>,
        fail: bool,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("launch refused")]
    struct SinkError;

    impl ActionSink for RecorderSink {
        type Error = SinkError;

        fn perform(&mut self, action: &ResolvedAction) -> Result<(), SinkError> {
            self.performed.push(action.clone());
            if self.fail {
                Err(SinkError)
            } else {
                Ok(())
            }
        }
    }

    type Channel = SerialCommandChannel<RecorderTransport, RecorderScheduler, RecorderSink>;

    fn browser() -> ResolvedAction {
        ResolvedAction {
            identifier: "browser".into(),
            path: PathBuf::from("/Applications/Google Chrome.app"),
        }
    }

    fn make_channel() -> (Channel, mpsc::Receiver<ChannelEvent>) {
        let mapping: ActionMapping = [("browser", "/Applications/Google Chrome.app")]
            .into_iter()
            .collect();
        let mut channel = SerialCommandChannel::new(
            RecorderTransport::default(),
            RecorderScheduler::default(),
            RecorderSink::default(),
            keyboard(),
            mapping,
        );
        let rx = channel.subscribe();
        (channel, rx)
    }

    fn open(channel: &mut Channel) -> ConnectionId {
        channel.connect(keyboard()).unwrap();
        let id = channel.machine().connection_id();
        channel.handle(TransportEvent::Opened(id).into());
        id
    }

    fn data(id: ConnectionId, bytes: &[u8]) -> ChannelInput {
        TransportEvent::Data(id, bytes.to_vec()).into()
    }

    #[test]
    fn fragmented_command_reaches_the_sink() {
        let (mut c, rx) = make_channel();
        let id = open(&mut c);
        c.handle(data(id, b"APP:bro"));
        assert!(c.sink().performed.is_empty());
        c.handle(data(id, b"wser\r"));
        c.handle(data(id, b"\n"));

        assert_eq!(c.sink().performed, vec![browser()]);
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![
                ChannelEvent::ConnectionOpened(keyboard()),
                ChannelEvent::ActionResolved(browser()),
            ]
        );
    }

    #[test]
    fn unknown_frames_are_warnings_only() {
        let (mut c, rx) = make_channel();
        let id = open(&mut c);
        rx.try_iter().for_each(drop);

        c.handle(data(id, b"HELLO\r\n"));
        c.handle(data(id, b"APP:\r\n"));
        c.handle(data(id, b"APP:editor\r\n"));
        c.handle(data(id, b"APP:Browser\r\n"));

        assert!(c.is_connected());
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![
                ChannelEvent::ParseWarning(FrameWarning::Parse(ParseFailure::Unrecognized(
                    "HELLO".into()
                ))),
                ChannelEvent::ParseWarning(FrameWarning::Parse(ParseFailure::Unrecognized(
                    "APP:".into()
                ))),
                ChannelEvent::ParseWarning(FrameWarning::Parse(
                    ParseFailure::UnmappedIdentifier("editor".into())
                )),
                ChannelEvent::ActionResolved(ResolvedAction {
                    identifier: "Browser".into(),
                    path: PathBuf::from("/Applications/Google Chrome.app"),
                }),
            ]
        );
    }

    #[test]
    fn undecodable_bytes_are_reported_and_skipped() {
        let (mut c, rx) = make_channel();
        let id = open(&mut c);
        rx.try_iter().for_each(drop);

        c.handle(data(id, b"APP:"));
        c.handle(data(id, &[0xff]));
        c.handle(data(id, b"browser\r\n"));

        let events: Vec<ChannelEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            ChannelEvent::ParseWarning(FrameWarning::Decode(_))
        ));
        assert_eq!(events[1], ChannelEvent::ActionResolved(browser()));
    }

    #[test]
    fn sink_failure_does_not_stop_the_channel() {
        let (mut c, rx) = make_channel();
        c.sink.fail = true;
        let id = open(&mut c);
        c.handle(data(id, b"APP:browser\r\n"));
        c.handle(data(id, b"APP:browser\r\n"));
        assert_eq!(c.sink().performed.len(), 2);
        assert!(c.is_connected());
        assert_eq!(rx.try_iter().count(), 3);
    }

    #[test]
    fn receive_buffer_does_not_survive_a_reconnect() {
        let (mut c, _rx) = make_channel();
        let id = open(&mut c);
        c.handle(data(id, b"APP:bro"));
        c.handle(TransportEvent::DevicesRemoved(vec!["/dev/ttyACM0".into()]).into());
        assert!(!c.is_connected());

        c.handle(TransportEvent::DevicesAttached(vec!["/dev/ttyACM0".into()]).into());
        c.handle(ChannelInput::ReconnectDue(ReconnectToken(1)));
        let id = c.machine().connection_id();
        assert_eq!(id, ConnectionId(2));
        c.handle(TransportEvent::Opened(id).into());
        c.handle(data(id, b"wser\r\n"));

        assert!(c.sink().performed.is_empty());
    }

    #[test]
    fn control_requests_drive_the_connection() {
        let (mut c, rx) = make_channel();
        c.handle(ChannelInput::Control(ControlRequest::Toggle, None));
        assert_eq!(c.state(), ConnectionState::Connecting);
        c.handle(TransportEvent::Opened(ConnectionId(1)).into());

        // Connecting twice is rejected without side effects.
        c.handle(ChannelInput::Control(ControlRequest::Connect, None));
        c.handle(ChannelInput::Control(ControlRequest::Status, None));
        assert!(c.is_connected());

        c.handle(ChannelInput::Control(ControlRequest::Disconnect, None));
        c.handle(TransportEvent::Closed(ConnectionId(1)).into());
        assert_eq!(c.state(), ConnectionState::Disconnected);

        assert_eq!(
            c.machine().transport().calls,
            vec![
                TransportCall::Open(ConnectionId(1), keyboard(), Default::default()),
                TransportCall::Close(ConnectionId(1)),
            ]
        );
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![
                ChannelEvent::ConnectionOpened(keyboard()),
                ChannelEvent::ConnectionClosed,
            ]
        );
    }

    #[test]
    fn data_before_open_is_dropped() {
        let (mut c, _rx) = make_channel();
        c.connect(keyboard()).unwrap();
        c.handle(data(ConnectionId(1), b"APP:browser\r\n"));
        assert!(c.sink().performed.is_empty());
    }

    #[test]
    fn mapping_can_be_replaced() {
        let (mut c, _rx) = make_channel();
        c.set_mapping([("music", "/Applications/Music.app")].into_iter().collect());
        let id = open(&mut c);
        c.handle(data(id, b"APP:browser\r\n"));
        c.handle(data(id, b"APP:music\r\n"));
        assert_eq!(c.sink().performed.len(), 1);
        assert_eq!(c.sink().performed[0].identifier, "music");
        assert_eq!(c.mapping().len(), 1);
    }

    /// Send `request` with a reply slot and return the answer.
    fn ask(c: &mut Channel, request: ControlRequest) -> ControlReply {
        let (tx, rx) = mpsc::channel();
        c.handle(ChannelInput::Control(request, Some(Responder::new(tx))));
        rx.try_recv().unwrap()
    }

    fn status(state: ConnectionState) -> ControlReply {
        ControlReply::Status {
            state,
            device_path: "/dev/ttyACM0".into(),
            baud_rate: 9600,
        }
    }

    #[test]
    fn rejected_connect_keeps_the_partial_frame() {
        let (mut c, _rx) = make_channel();
        let id = open(&mut c);
        c.handle(data(id, b"APP:bro"));

        assert_eq!(
            c.connect(keyboard()),
            Err(StateError::NotDisconnected(ConnectionState::Connected))
        );
        c.handle(ChannelInput::Control(ControlRequest::Connect, None));
        assert!(c.is_connected());
        c.handle(data(id, b"wser\r\n"));

        assert_eq!(c.sink().performed, vec![browser()]);
    }

    #[test]
    fn rejected_toggle_keeps_the_partial_frame() {
        let (mut c, _rx) = make_channel();
        let id = open(&mut c);
        c.handle(data(id, b"APP:bro"));
        c.handle(ChannelInput::Control(ControlRequest::Toggle, None));
        assert_eq!(c.state(), ConnectionState::Closing);
        assert_eq!(c.decoder.pending(), "");

        // Toggling again while the close is in flight is refused.
        c.decoder.feed(b"APP:mu").unwrap().for_each(drop);
        assert_eq!(
            c.toggle(),
            Err(StateError::NotDisconnected(ConnectionState::Closing))
        );
        assert_eq!(c.decoder.pending(), "APP:mu");
    }

    #[test]
    fn control_requests_are_answered() {
        let (mut c, _rx) = make_channel();
        assert_eq!(ask(&mut c, ControlRequest::Status), status(ConnectionState::Disconnected));
        assert_eq!(ask(&mut c, ControlRequest::Connect), status(ConnectionState::Connecting));
        assert_eq!(
            ask(&mut c, ControlRequest::Connect),
            ControlReply::Rejected {
                reason: "cannot connect while connecting".into()
            }
        );
        c.handle(TransportEvent::Opened(ConnectionId(1)).into());
        assert_eq!(ask(&mut c, ControlRequest::Status), status(ConnectionState::Connected));
        assert_eq!(ask(&mut c, ControlRequest::Toggle), status(ConnectionState::Closing));
        c.handle(TransportEvent::Closed(ConnectionId(1)).into());
        assert_eq!(
            ask(&mut c, ControlRequest::Disconnect),
            status(ConnectionState::Disconnected)
        );
    }
}
