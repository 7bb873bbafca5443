//! **keycommander** launches applications on command from a serial-attached
//! keyboard.
//!
//! The keyboard firmware writes text frames such as `APP:browser\r\n` to its
//! serial port.  keycommander keeps the port open across unplug/replug,
//! reassembles the frames from whatever chunks the driver delivers, looks
//! the identifier up in a configured mapping and opens the application.
//!
//! # Architecture
//!
//! The [`channel::SerialCommandChannel`] composes three parts:
//!
//! * [`frame::FrameDecoder`]: bytes to `\r\n`-terminated frames.
//! * [`command`]: frames to commands to [`command::ResolvedAction`]s.
//! * [`connection::ConnectionStateMachine`]: open/close/reconnect.
//!
//! and is decoupled from the outside world by the traits in [`traits`]:
//!
//! * [`traits::Transport`]: the serial driver ([`serial`] for real ports).
//! * [`traits::Scheduler`]: delayed reconnects ([`schedule`]).
//! * [`traits::ActionSink`]: what happens to a resolved action
//!   ([`launcher`]).
//! * [`traits::ControlSource`]: connect/disconnect requests ([`ipc`]).
//!
//! All inputs are funnelled through one `mpsc` queue of
//! [`event::ChannelInput`]s and processed on a single thread.

pub mod channel;
pub mod command;
pub mod config;
pub mod connection;
pub mod event;
pub mod frame;
pub mod ipc;
pub mod launcher;
pub mod schedule;
pub mod serial;
pub mod traits;
