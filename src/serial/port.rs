//! [`Transport`] implementation on top of the `serialport` crate.
//!
//! Each connection attempt runs on its own reader thread:
//!
//! 1. open the device node and drive DTR/RTS,
//! 2. report [`Opened`](TransportEvent::Opened) or
//!    [`OpenFailed`](TransportEvent::OpenFailed),
//! 3. read with a short timeout, forwarding every chunk as
//!    [`Data`](TransportEvent::Data), until cancelled or a fatal I/O error,
//! 4. drop the handle and report [`Closed`](TransportEvent::Closed).
//!
//! The short read timeout bounds how long a cancel takes to be noticed.

use super::SerialError;
use crate::config::ConnectionConfig;
use crate::event::ChannelInput;
use crate::traits::{ConnectionId, ControlLines, Transport, TransportEvent};
use log::{debug, warn};
use serialport::SerialPort;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

/// Read timeout of the reader thread.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Bytes requested per read.
const READ_CHUNK: usize = 256;

/// The reader thread of one connection attempt.
struct PortWorker {
    id: ConnectionId,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// A [`Transport`] that opens real serial devices.
///
/// Events are delivered into the channel's input queue.
pub struct SerialPortTransport {
    sink: mpsc::Sender<ChannelInput>,
    worker: Option<PortWorker>,
}

impl SerialPortTransport {
    pub fn new(sink: mpsc::Sender<ChannelInput>) -> Self {
        Self { sink, worker: None }
    }

    fn send(&self, event: TransportEvent) {
        let _ = self.sink.send(event.into());
    }
}

impl Transport for SerialPortTransport {
    fn open(&mut self, id: ConnectionId, config: &ConnectionConfig, lines: ControlLines) {
        if let Some(old) = self.worker.take() {
            // Superseded; whatever it still reports carries an old id.
            old.cancel.store(true, Ordering::Relaxed);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let handle = {
            let cancel = cancel.clone();
            let sink = self.sink.clone();
            let config = config.clone();
            std::thread::spawn(move || run_port(id, &config, lines, &cancel, &sink))
        };
        self.worker = Some(PortWorker { id, cancel, handle });
    }

    fn close(&mut self, id: ConnectionId) {
        match self.worker.take() {
            Some(worker) if worker.id == id && !worker.handle.is_finished() => {
                // The reader thread reports `Closed` on its way out.
                worker.cancel.store(true, Ordering::Relaxed);
            }
            other => {
                if let Some(worker) = other {
                    if worker.id != id {
                        self.worker = Some(worker);
                    }
                }
                self.send(TransportEvent::Closed(id));
            }
        }
    }
}

impl Drop for SerialPortTransport {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.store(true, Ordering::Relaxed);
        }
    }
}

/// Open `config.device_path` and apply the modem control lines.
///
/// Failing to drive DTR/RTS is logged but does not fail the open; some
/// adapters do not implement the lines.
pub fn open_port(
    config: &ConnectionConfig,
    lines: ControlLines,
) -> Result<Box<dyn SerialPort>, SerialError> {
    let mut port = serialport::new(&config.device_path, config.baud_rate)
        .timeout(READ_TIMEOUT)
        .open()?;

    if let Err(e) = port.write_data_terminal_ready(lines.dtr) {
        warn!("failed to set DTR on {}: {} (continuing)", config.device_path, e);
    }
    if let Err(e) = port.write_request_to_send(lines.rts) {
        warn!("failed to set RTS on {}: {} (continuing)", config.device_path, e);
    }
    Ok(port)
}

/// Whether a read error leaves the port usable.
fn is_transient(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock)
}

fn run_port(
    id: ConnectionId,
    config: &ConnectionConfig,
    lines: ControlLines,
    cancel: &AtomicBool,
    sink: &mpsc::Sender<ChannelInput>,
) {
    let send = |event: TransportEvent| sink.send(event.into()).is_ok();

    let mut port = match open_port(config, lines) {
        Ok(port) => port,
        Err(e) => {
            send(TransportEvent::OpenFailed(id, e.to_string()));
            send(TransportEvent::Closed(id));
            return;
        }
    };
    if !send(TransportEvent::Opened(id)) {
        return;
    }

    let mut buf = [0u8; READ_CHUNK];
    while !cancel.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                if !send(TransportEvent::Data(id, buf[..n].to_vec())) {
                    break;
                }
            }
            Err(e) if is_transient(e.kind()) => continue,
            Err(e) => {
                send(TransportEvent::Error(id, e.to_string()));
                break;
            }
        }
    }

    drop(port);
    debug!("reader for {} ({}) finished", config.device_path, id);
    send(TransportEvent::Closed(id));
}
