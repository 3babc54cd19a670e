// SPDX-License-Identifier: GPL-3.0-only

//! Completion routing back to the consumer thread
//!
//! Results are produced on the dispatcher or driver threads but must run on
//! the thread that issued the operation. That thread owns a [`ConsumerLoop`]
//! and pumps it; every other thread only holds a [`ConsumerHandle`] and posts
//! closures into it.
//!
//! Each one-shot operation kind has a single slot. Installing a new request
//! supersedes the old one, which is told `CANCELLED`; completions carry the
//! epoch of the request they answer and are discarded when the slot has moved
//! on.

use crate::errors::ErrorReason;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use tracing::debug;

/// Work posted to the consumer thread
pub type ConsumerTask = Box<dyn FnOnce() + Send>;

/// Event loop run by the thread that issues camera operations
pub struct ConsumerLoop {
    sender: Sender<ConsumerTask>,
    receiver: Receiver<ConsumerTask>,
}

impl ConsumerLoop {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    /// Handle other threads use to post work to this loop
    pub fn handle(&self) -> ConsumerHandle {
        ConsumerHandle {
            sender: self.sender.clone(),
        }
    }

    /// Run every task already queued, returning how many ran
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Run tasks until `done` holds or `timeout` elapses.
    ///
    /// Returns whether `done` became true.
    pub fn run_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.receiver.recv_timeout(remaining) {
                Ok(task) => task(),
                Err(RecvTimeoutError::Timeout) => return done(),
                Err(RecvTimeoutError::Disconnected) => return done(),
            }
        }
    }

    /// Pump the loop for a fixed duration
    pub fn run_for(&self, duration: Duration) {
        self.run_until(duration, || false);
    }
}

impl Default for ConsumerLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Posting end of a [`ConsumerLoop`]
#[derive(Clone)]
pub struct ConsumerHandle {
    sender: Sender<ConsumerTask>,
}

impl ConsumerHandle {
    /// Queue a task; `false` if the loop is gone
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.sender.send(Box::new(task)).is_ok()
    }
}

impl std::fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHandle").finish_non_exhaustive()
    }
}

/// One-shot operation kinds with a callback slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    AutoFocus,
    TakePicture,
    StartRecording,
}

impl OperationKind {
    const COUNT: usize = 3;

    fn slot_index(&self) -> usize {
        match self {
            OperationKind::AutoFocus => 0,
            OperationKind::TakePicture => 1,
            OperationKind::StartRecording => 2,
        }
    }
}

/// Encoded still image handed to the take-picture caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub data: Vec<u8>,
    pub mime_type: &'static str,
}

/// Successful completion of a one-shot operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Focused,
    Picture(ImageBlob),
    RecordingStarted,
}

/// Caller callback for a one-shot operation
pub type Responder = Box<dyn FnOnce(Result<Completion, ErrorReason>) + Send>;

struct Slot {
    epoch: u64,
    responder: Responder,
}

/// Result of installing a new request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Installed {
    /// Epoch identifying the new request
    pub epoch: u64,
    /// Whether an outstanding request of the same kind was cancelled
    pub superseded: bool,
}

/// Holds at most one outstanding callback per operation kind
pub struct ResultCallbackRouter {
    consumer: ConsumerHandle,
    next_epoch: u64,
    slots: [Option<Slot>; OperationKind::COUNT],
}

impl ResultCallbackRouter {
    pub fn new(consumer: ConsumerHandle) -> Self {
        Self {
            consumer,
            next_epoch: 1,
            slots: [None, None, None],
        }
    }

    /// Install a new request, cancelling any outstanding one of the same kind
    pub fn install(&mut self, kind: OperationKind, responder: Responder) -> Installed {
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let prior = self.slots[kind.slot_index()].replace(Slot { epoch, responder });
        let superseded = prior.is_some();
        if let Some(prior) = prior {
            debug!(?kind, prior = prior.epoch, epoch, "Superseding outstanding request");
            self.post(prior.responder, Err(ErrorReason::Cancelled));
        }
        Installed { epoch, superseded }
    }

    /// Whether `epoch` is still the outstanding request of `kind`
    pub fn is_current(&self, kind: OperationKind, epoch: u64) -> bool {
        self.slots[kind.slot_index()]
            .as_ref()
            .is_some_and(|s| s.epoch == epoch)
    }

    /// Epoch of the outstanding request of `kind`, if any
    pub fn outstanding(&self, kind: OperationKind) -> Option<u64> {
        self.slots[kind.slot_index()].as_ref().map(|s| s.epoch)
    }

    /// Deliver a result for `epoch`; stale epochs are discarded.
    ///
    /// Returns whether a callback was scheduled.
    pub fn complete(
        &mut self,
        kind: OperationKind,
        epoch: u64,
        result: Result<Completion, ErrorReason>,
    ) -> bool {
        if !self.is_current(kind, epoch) {
            debug!(?kind, epoch, "Discarding result for a request that is no longer current");
            return false;
        }
        match self.slots[kind.slot_index()].take() {
            Some(slot) => {
                self.post(slot.responder, result);
                true
            }
            None => false,
        }
    }

    /// Deliver a result to whatever request of `kind` is outstanding
    pub fn complete_outstanding(
        &mut self,
        kind: OperationKind,
        result: Result<Completion, ErrorReason>,
    ) -> bool {
        match self.outstanding(kind) {
            Some(epoch) => self.complete(kind, epoch, result),
            None => false,
        }
    }

    /// Cancel every outstanding request, returning how many were cancelled
    pub fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for slot in self.slots.iter_mut() {
            if let Some(slot) = slot.take() {
                let Slot { epoch, responder } = slot;
                debug!(epoch, "Cancelling outstanding request");
                post_result(&self.consumer, responder, Err(ErrorReason::Cancelled));
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Answer a request that was never installed
    pub fn reject(&self, responder: Responder, reason: ErrorReason) {
        self.post(responder, Err(reason));
    }

    /// Consumer handle results are posted to
    pub fn consumer(&self) -> &ConsumerHandle {
        &self.consumer
    }

    fn post(&self, responder: Responder, result: Result<Completion, ErrorReason>) {
        post_result(&self.consumer, responder, result);
    }
}

impl std::fmt::Debug for ResultCallbackRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let outstanding: Vec<u64> = self.slots.iter().flatten().map(|s| s.epoch).collect();
        f.debug_struct("ResultCallbackRouter")
            .field("next_epoch", &self.next_epoch)
            .field("outstanding", &outstanding)
            .finish()
    }
}

fn post_result(
    consumer: &ConsumerHandle,
    responder: Responder,
    result: Result<Completion, ErrorReason>,
) {
    if !consumer.post(move || responder(result)) {
        debug!("Consumer loop gone, dropping result");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn responder(log: &Log, name: &'static str) -> Responder {
        let log = Arc::clone(log);
        Box::new(move |result| {
            let text = match result {
                Ok(c) => format!("{}:{:?}", name, c),
                Err(r) => format!("{}:{}", name, r),
            };
            log.lock().unwrap().push(text);
        })
    }

    #[test]
    fn test_supersede_cancels_prior() {
        let consumer = ConsumerLoop::new();
        let log = Log::default();
        let mut router = ResultCallbackRouter::new(consumer.handle());

        let first = router.install(OperationKind::AutoFocus, responder(&log, "first"));
        let second = router.install(OperationKind::AutoFocus, responder(&log, "second"));
        assert!(!first.superseded);
        assert!(second.superseded);

        assert!(!router.complete(OperationKind::AutoFocus, first.epoch, Ok(Completion::Focused)));
        assert!(router.complete(OperationKind::AutoFocus, second.epoch, Ok(Completion::Focused)));

        assert!(log.lock().unwrap().is_empty());
        consumer.run_pending();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:CANCELLED".to_string(), "second:Focused".to_string()]
        );
    }

    #[test]
    fn test_kinds_are_independent() {
        let consumer = ConsumerLoop::new();
        let log = Log::default();
        let mut router = ResultCallbackRouter::new(consumer.handle());

        router.install(OperationKind::AutoFocus, responder(&log, "focus"));
        let picture = router.install(OperationKind::TakePicture, responder(&log, "picture"));
        assert!(!picture.superseded);
        assert_eq!(router.cancel_all(), 2);
        consumer.run_pending();
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(router.outstanding(OperationKind::AutoFocus), None);
    }

    #[test]
    fn test_completion_runs_on_consumer_thread() {
        let consumer = ConsumerLoop::new();
        let mut router = ResultCallbackRouter::new(consumer.handle());
        let ran_on = Arc::new(Mutex::new(None));
        let ran_on_clone = Arc::clone(&ran_on);

        let installed = router.install(
            OperationKind::StartRecording,
            Box::new(move |_| {
                *ran_on_clone.lock().unwrap() = Some(std::thread::current().id());
            }),
        );
        std::thread::spawn(move || {
            router.complete(
                OperationKind::StartRecording,
                installed.epoch,
                Ok(Completion::RecordingStarted),
            );
        })
        .join()
        .unwrap();

        assert!(consumer.run_until(Duration::from_secs(1), || ran_on.lock().unwrap().is_some()));
        assert_eq!(*ran_on.lock().unwrap(), Some(std::thread::current().id()));
    }
}
