//! Background reclamation of expired records
//!
//! A dedicated thread wakes every `interval` and deletes expired records in
//! bounded batches. It never compacts: compaction holds the engine lock for
//! its whole run and is left to `close` or an explicit call.
//!
//! # Design Notes
//!
//! - Holds only a `Weak` reference; the thread exits once the engine is gone
//! - Deletes go through write transactions, never direct mutation
//! - Each batch is one short write transaction under the shared engine lock
//! - Failures are logged and retried on the next tick
//! - Graceful shutdown via atomic flag, polled in short sleep slices

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};
use velocity_core::Result;

use crate::engine::StorageEngine;

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Handle to the running reclamation thread
#[derive(Debug)]
pub struct Reclaimer {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reclaimer {
    /// Spawn the reclamation thread
    ///
    /// The first pass runs one `interval` after start.
    pub fn start(
        engine: Weak<StorageEngine>,
        interval: Duration,
        batch_size: usize,
    ) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("velocity-reclaim".to_string())
            .spawn(move || {
                debug!(target: "velocity::reclaim", ?interval, "Reclaimer started");
                while wait(&flag, interval) {
                    let Some(engine) = engine.upgrade() else {
                        break;
                    };
                    run_pass(&engine, batch_size);
                }
                debug!(target: "velocity::reclaim", "Reclaimer stopped");
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signal shutdown without waiting
    pub fn signal(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Whether shutdown has been signaled
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Signal shutdown and wait for the thread to exit
    ///
    /// Does not join when called from the reclamation thread itself (the
    /// engine can be dropped there if it held the last reference).
    pub fn stop(mut self) {
        self.signal();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!(target: "velocity::reclaim", "Reclaimer thread panicked");
            }
        }
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.signal();
    }
}

/// Sleep for `interval`; false if shutdown was signaled meanwhile
fn wait(shutdown: &AtomicBool, interval: Duration) -> bool {
    let slice = SLEEP_SLICE.min(interval);
    let mut elapsed = Duration::ZERO;
    while elapsed < interval {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        thread::sleep(slice);
        elapsed += slice;
    }
    !shutdown.load(Ordering::Relaxed)
}

fn run_pass(engine: &StorageEngine, batch_size: usize) {
    if let Err(e) = engine.reclaim_expired(batch_size) {
        warn!(target: "velocity::reclaim", error = %e, "Reclamation pass failed");
    }
}
