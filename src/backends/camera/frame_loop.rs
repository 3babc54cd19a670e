// SPDX-License-Identifier: GPL-3.0-only

//! Driver thread for simulated backends
//!
//! Real drivers deliver their callbacks from a thread they own. Simulated
//! backends get the same shape from [`DriverLoopController`]: a named thread
//! that runs a tick closure at a fixed interval until it is stopped.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Owner of a running driver thread
///
/// Dropping the controller stops the thread and joins it.
pub struct DriverLoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl DriverLoopController {
    /// Spawn `name`, calling `tick` once per `interval`
    pub fn start<F>(name: &str, interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                info!(name = %thread_name, "Driver thread started");
                while !thread_stop.load(Ordering::Acquire) {
                    tick();
                    // Unparked early by stop()
                    thread::park_timeout(interval);
                }
                info!(name = %thread_name, "Driver thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Stop the thread and wait for it
    ///
    /// From the driver thread itself this only requests the stop.
    pub fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::Release);
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            debug!(name = %self.name, "Stop requested from the driver thread, not joining");
            return;
        }
        handle.thread().unpark();
        if let Err(e) = handle.join() {
            warn!(name = %self.name, "Driver thread panicked: {:?}", e);
        }
    }
}

impl Drop for DriverLoopController {
    fn drop(&mut self) {
        self.stop();
    }
}
