//! Thread-backed [`Scheduler`] for one-shot deferred reconnects.
//!
//! Each scheduled token gets a short-lived timer thread that sleeps for the
//! requested delay and then sends [`ChannelInput::ReconnectDue`] into the
//! channel's input queue.  Cancelling flips the timer's flag so it exits
//! without sending.  If the channel has been dropped the send simply fails.

use crate::event::ChannelInput;
use crate::traits::{ReconnectToken, Scheduler};
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

/// Runs each scheduled reconnect on its own timer thread.
pub struct ThreadScheduler {
    sink: mpsc::Sender<ChannelInput>,
    timers: HashMap<ReconnectToken, Arc<AtomicBool>>,
}

impl ThreadScheduler {
    pub fn new(sink: mpsc::Sender<ChannelInput>) -> Self {
        Self {
            sink,
            timers: HashMap::new(),
        }
    }

    /// Number of timers that have neither fired nor been cancelled.
    pub fn active(&self) -> usize {
        self.timers
            .values()
            .filter(|fired| !fired.load(Ordering::Relaxed))
            .count()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&mut self, delay: Duration, token: ReconnectToken) {
        // Forget timers that already finished.
        self.timers.retain(|_, done| !done.load(Ordering::Relaxed));

        let done = Arc::new(AtomicBool::new(false));
        self.timers.insert(token, done.clone());

        let sink = self.sink.clone();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            if done.swap(true, Ordering::Relaxed) {
                debug!("reconnect {:?} was cancelled", token);
                return;
            }
            let _ = sink.send(ChannelInput::ReconnectDue(token));
        });
    }

    fn cancel(&mut self, token: ReconnectToken) {
        if let Some(done) = self.timers.remove(&token) {
            done.store(true, Ordering::Relaxed);
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        for done in self.timers.values() {
            done.store(true, Ordering::Relaxed);
        }
    }
}
