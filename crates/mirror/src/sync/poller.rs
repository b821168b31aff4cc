//! Fixed-interval background poller
//!
//! Ticks run one after another on a dedicated thread, so a tick never
//! overlaps the previous one. Dropping the handle stops the thread.

use log::{debug, info};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Work run on every poll tick
pub trait PollTask: Send + Sync + 'static {
    fn tick(&self);
}

pub struct Poller;

impl Poller {
    /// Start ticking `task` every `interval`, first tick after one interval
    pub fn spawn(task: Arc<dyn PollTask>, interval: Duration) -> std::io::Result<PollerHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("mirror-poller".to_string())
            .spawn(move || {
                info!("Poller started ({}s interval)", interval.as_secs());
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => task.tick(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("Poller stopped");
            })?;

        Ok(PollerHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

pub struct PollerHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Stop the poller, waiting for a running tick to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            debug!("Poller thread panicked");
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
