//! Hot-plug detection by polling the list of serial ports.
//!
//! `serialport` has no attach/detach notifications, so [`PortWatcher`]
//! enumerates the ports periodically and reports the difference to the
//! previous scan as [`TransportEvent::DevicesAttached`] /
//! [`TransportEvent::DevicesRemoved`].  The first scan only establishes the
//! baseline.

use super::SerialError;
use crate::event::ChannelInput;
use crate::traits::TransportEvent;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::mpsc;
use std::time::Duration;

/// The set of port names seen by the last scan.
#[derive(Debug, Default)]
pub struct PortSnapshot {
    known: Option<BTreeSet<String>>,
}

impl PortSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new scan and return the `(attached, removed)` port names.
    ///
    /// Both lists are empty for the first scan.
    pub fn update(&mut self, ports: impl IntoIterator<Item = String>) -> (Vec<String>, Vec<String>) {
        let current: BTreeSet<String> = ports.into_iter().collect();
        let diff = match &self.known {
            Some(previous) => (
                current.difference(previous).cloned().collect(),
                previous.difference(&current).cloned().collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        self.known = Some(current);
        diff
    }
}

/// Names of the serial ports currently visible to the OS.
pub fn list_port_names() -> Result<Vec<String>, SerialError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}

/// Polls [`list_port_names`] and reports attached and removed devices.
pub struct PortWatcher {
    interval: Duration,
    snapshot: PortSnapshot,
}

impl PortWatcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            snapshot: PortSnapshot::new(),
        }
    }

    /// Scan once and send whatever changed.
    ///
    /// Returns `false` once the receiving end of `sink` is gone.
    pub fn poll(&mut self, sink: &mpsc::Sender<ChannelInput>) -> bool {
        let ports = match list_port_names() {
            Ok(ports) => ports,
            Err(e) => {
                warn!("failed to enumerate serial ports: {}", e);
                return true;
            }
        };
        self.report(ports, sink)
    }

    /// Diff `ports` against the previous scan and send the changes.
    fn report(&mut self, ports: Vec<String>, sink: &mpsc::Sender<ChannelInput>) -> bool {
        let (attached, removed) = self.snapshot.update(ports);
        if !removed.is_empty() {
            debug!("serial ports removed: {:?}", removed);
            if sink.send(TransportEvent::DevicesRemoved(removed).into()).is_err() {
                return false;
            }
        }
        if !attached.is_empty() {
            debug!("serial ports attached: {:?}", attached);
            if sink.send(TransportEvent::DevicesAttached(attached).into()).is_err() {
                return false;
            }
        }
        true
    }

    /// Poll until the sink closes.
    ///
    /// This method **blocks**.  Run it on a dedicated thread.
    pub fn run(&mut self, sink: mpsc::Sender<ChannelInput>) {
        info!("watching serial ports every {} ms", self.interval.as_millis());
        while self.poll(&sink) {
            std::thread::sleep(self.interval);
        }
        info!("sink closed, port watcher shutting down");
    }
}
