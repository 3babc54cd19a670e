// SPDX-License-Identifier: GPL-3.0-only

//! Per-session command thread
//!
//! The hardware cannot take concurrent calls, so every hardware-affecting
//! operation of a session is queued onto one named worker thread and runs in
//! arrival order. Jobs queued from the worker itself run inline, so nested
//! operations cannot deadlock on their own queue. A panicking job is logged
//! and the worker keeps going.

use crate::constants::dispatcher::THREAD_NAME_PREFIX;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, info};

/// Unit of work run on the dispatcher thread
pub type Job = Box<dyn FnOnce() + Send>;

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Serializes jobs onto a dedicated worker thread
pub struct CommandDispatcher {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl CommandDispatcher {
    /// Spawn the worker thread
    pub fn start() -> io::Result<Self> {
        let name = format!(
            "{}-{}",
            THREAD_NAME_PREFIX,
            NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed)
        );
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread_name = name.clone();

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            info!(name = %thread_name, "Dispatcher thread started");
            // Ends once every sender is dropped and the queue is drained
            for job in receiver {
                run_job(&thread_name, job);
            }
            info!(name = %thread_name, "Dispatcher thread exiting");
        })?;

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            thread_id: handle.thread().id(),
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the caller is running on this dispatcher's thread
    pub fn is_dispatcher_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Queue a job, or run it inline when already on the dispatcher thread.
    ///
    /// Returns `false` when the dispatcher has shut down; the job is dropped.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
        if self.is_dispatcher_thread() {
            run_job(&self.name, Box::new(job));
            return true;
        }
        match self.lock_sender().as_ref() {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => {
                debug!(name = %self.name, "Job dropped, dispatcher shut down");
                false
            }
        }
    }

    /// Run a job and wait for its result
    ///
    /// `None` if the dispatcher is shut down or the job panicked.
    pub fn call<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_dispatcher_thread() {
            return Some(f());
        }
        let (tx, rx) = mpsc::sync_channel(1);
        if !self.dispatch(move || {
            let _ = tx.send(f());
        }) {
            return None;
        }
        rx.recv().ok()
    }

    /// Stop accepting jobs, drain the queue and join the worker.
    ///
    /// Called from the worker itself this only closes the queue.
    pub fn shutdown(&self) {
        self.close();
        if self.is_dispatcher_thread() {
            return;
        }
        let handle = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!(name = %self.name, "Dispatcher thread panicked");
        }
    }

    /// Stop accepting jobs without waiting for the worker
    ///
    /// Queued jobs still run; the worker exits once the queue is drained.
    pub fn close(&self) {
        if self.lock_sender().take().is_some() {
            debug!(name = %self.name, "Dispatcher queue closed");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock_sender().is_none()
    }

    fn lock_sender(&self) -> MutexGuard<'_, Option<Sender<Job>>> {
        self.sender.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CommandDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("name", &self.name)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn run_job(name: &str, job: Job) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(name = %name, panic = %message, "Dispatcher job panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_jobs_run_in_order() {
        let dispatcher = CommandDispatcher::start().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let log = Arc::clone(&log);
            assert!(dispatcher.dispatch(move || log.lock().unwrap().push(i)));
        }
        dispatcher.shutdown();
        assert_eq!(*log.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_call_returns_value_from_worker() {
        let dispatcher = CommandDispatcher::start().unwrap();
        let name = dispatcher.call(|| thread::current().name().map(str::to_string));
        assert_eq!(name.flatten().as_deref(), Some(dispatcher.name()));
        assert!(!dispatcher.is_dispatcher_thread());
    }

    #[test]
    fn test_nested_dispatch_runs_inline() {
        let dispatcher = Arc::new(CommandDispatcher::start().unwrap());
        let inner = Arc::clone(&dispatcher);
        let order = dispatcher.call(move || {
            let log = Arc::new(Mutex::new(Vec::new()));
            let nested_log = Arc::clone(&log);
            inner.dispatch(move || nested_log.lock().unwrap().push("nested"));
            log.lock().unwrap().push("outer");
            let result = log.lock().unwrap().clone();
            result
        });
        assert_eq!(order, Some(vec!["nested", "outer"]));
        dispatcher.shutdown();
    }

    #[test]
    fn test_panic_does_not_kill_worker() {
        let dispatcher = CommandDispatcher::start().unwrap();
        dispatcher.dispatch(|| panic!("hardware exploded"));
        assert_eq!(dispatcher.call(|| 5), Some(5));
    }

    #[test]
    fn test_dispatch_after_shutdown() {
        let dispatcher = CommandDispatcher::start().unwrap();
        dispatcher.shutdown();
        assert!(!dispatcher.dispatch(|| {}));
        assert_eq!(dispatcher.call(|| 1), None);
    }
}
