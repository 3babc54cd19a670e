// SPDX-License-Identifier: GPL-3.0-only

//! Preview frame handoff
//!
//! Frames arrive on the driver thread and must never block it. The pipeline
//! asks the sink whether the consumer is already saturated before doing any
//! work; saturated frames are counted and dropped rather than queued.
//!
//! ```text
//! driver thread ──▶ PreviewPipeline ──▶ normalize ──▶ FrameSink ──▶ consumer
//!                        │
//!                        └─ consumer saturated: drop, count
//! ```

use super::normalizer::{NormalizeError, PreviewFrame, normalize};
use crate::backends::camera::{FrameBuffer, Size};
use crate::constants::timing::FRAME_LOG_INTERVAL;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::{debug, info, warn};

/// Destination of canonical preview frames
pub trait FrameSink: Send {
    /// Whether the consumer already holds as many frames as it wants
    fn has_enough_buffered(&self) -> bool;

    /// Hand a frame to the consumer; `false` once the consumer has gone away
    fn push_frame(&mut self, frame: PreviewFrame) -> bool;
}

/// Producer end of a bounded preview stream
///
/// Dropping the track ends the stream at once; frames still buffered are
/// never handed out.
pub struct StreamTrack {
    sender: mpsc::Sender<PreviewFrame>,
    closed: Arc<AtomicBool>,
}

impl Drop for StreamTrack {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl FrameSink for StreamTrack {
    fn has_enough_buffered(&self) -> bool {
        self.sender.capacity() == 0
    }

    fn push_frame(&mut self, frame: PreviewFrame) -> bool {
        match self.sender.try_send(frame) {
            Ok(()) => true,
            // Lost a race with the capacity check; still a live consumer.
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Consumer end of a preview stream
///
/// The stream ends (`None`) when the session is released.
pub struct PreviewStream {
    receiver: mpsc::Receiver<PreviewFrame>,
    closed: Arc<AtomicBool>,
    size: Size,
    /// Built on first use of [`next_timeout`](Self::next_timeout)
    runtime: Option<Runtime>,
}

impl PreviewStream {
    /// Negotiated frame size of this stream
    pub fn size(&self) -> Size {
        self.size
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Take a frame if one is ready
    pub fn try_next(&mut self) -> Result<Option<PreviewFrame>, StreamEnded> {
        if self.is_closed() {
            return Err(StreamEnded);
        }
        match self.receiver.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(StreamEnded),
        }
    }

    /// Wait for the next frame from synchronous code
    ///
    /// Blocks the calling thread on a private runtime, so it must not be
    /// called from inside an async context; use [`recv`](Self::recv) there.
    pub fn next_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<PreviewFrame>, StreamError> {
        if self.is_closed() {
            return Err(StreamError::Ended);
        }
        let runtime = match self.runtime.take() {
            Some(runtime) => runtime,
            None => Builder::new_current_thread()
                .enable_time()
                .build()
                .map_err(StreamError::Runtime)?,
        };

        let receiver = &mut self.receiver;
        // The timer must be created inside the runtime.
        let received =
            runtime.block_on(async move { tokio::time::timeout(timeout, receiver.recv()).await });
        self.runtime = Some(runtime);

        match received {
            Err(_elapsed) => Ok(None),
            Ok(None) => Err(StreamError::Ended),
            Ok(Some(_)) if self.is_closed() => Err(StreamError::Ended),
            Ok(Some(frame)) => Ok(Some(frame)),
        }
    }

    /// Wait for the next frame from async code
    pub async fn recv(&mut self) -> Option<PreviewFrame> {
        if self.is_closed() {
            return None;
        }
        let frame = self.receiver.recv().await?;
        (!self.is_closed()).then_some(frame)
    }
}

/// The stream was closed by the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamEnded;

impl std::fmt::Display for StreamEnded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "preview stream ended")
    }
}

impl std::error::Error for StreamEnded {}

/// Errors from a blocking wait on a preview stream
#[derive(Debug)]
pub enum StreamError {
    /// The stream was closed by the producer
    Ended,
    /// The wait runtime could not be built
    Runtime(io::Error),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Ended => write!(f, "{}", StreamEnded),
            StreamError::Runtime(e) => write!(f, "preview wait runtime: {}", e),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Runtime(e) => Some(e),
            StreamError::Ended => None,
        }
    }
}

/// Create a bounded preview stream holding at most `buffer_frames` frames
pub fn preview_channel(size: Size, buffer_frames: usize) -> (StreamTrack, PreviewStream) {
    let (sender, receiver) = mpsc::channel(buffer_frames.max(1));
    let closed = Arc::new(AtomicBool::new(false));
    let track = StreamTrack {
        sender,
        closed: Arc::clone(&closed),
    };
    let stream = PreviewStream {
        receiver,
        closed,
        size,
        runtime: None,
    };
    (track, stream)
}

/// What happened to one raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Normalized and handed to the sink
    Forwarded,
    /// Dropped by the backpressure policy or a failed allocation
    Discarded,
    /// Dropped because it does not match the stream
    Rejected,
    /// No sink attached
    NoSink,
}

/// Frame counters since the sink was attached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub forwarded: u64,
    pub discarded_total: u64,
    /// Discards since the last forwarded frame
    pub consecutive_discards: u64,
}

/// Backpressure-aware handoff from the driver to a frame sink
#[derive(Default)]
pub struct PreviewPipeline {
    sink: Option<Box<dyn FrameSink>>,
    size: Size,
    /// Consecutive discards since the last forwarded frame
    discard_count: u64,
    stats: PipelineStats,
}

impl PreviewPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the consumer sink for frames of the given size
    pub fn attach(&mut self, sink: Box<dyn FrameSink>, size: Size) {
        self.sink = Some(sink);
        self.size = size;
        self.discard_count = 0;
        self.stats = PipelineStats::default();
        info!(size = %size, "Preview sink attached");
    }

    /// Detach the sink, ending the consumer's stream
    pub fn detach(&mut self) {
        if self.sink.take().is_some() {
            info!(
                forwarded = self.stats.forwarded,
                discarded = self.stats.discarded_total,
                "Preview sink detached"
            );
        }
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Consecutive discards since the last forwarded frame
    pub fn discard_count(&self) -> u64 {
        self.discard_count
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            consecutive_discards: self.discard_count,
            ..self.stats
        }
    }

    /// Handle one raw frame from the driver
    pub fn on_frame(&mut self, frame: FrameBuffer) -> FrameOutcome {
        let Some(sink) = self.sink.as_mut() else {
            return FrameOutcome::NoSink;
        };

        if sink.has_enough_buffered() {
            self.record_discard();
            return FrameOutcome::Discarded;
        }

        if frame.width != self.size.width || frame.height != self.size.height {
            debug!(
                expected = %self.size,
                width = frame.width,
                height = frame.height,
                "Dropping preview frame of unexpected size"
            );
            return FrameOutcome::Rejected;
        }

        let canonical = match normalize(frame) {
            Ok(canonical) => canonical,
            Err(NormalizeError::OutOfMemory) => {
                warn!("Frame canonicalization allocation failed");
                self.record_discard();
                return FrameOutcome::Discarded;
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed preview frame");
                return FrameOutcome::Rejected;
            }
        };

        let sequence = canonical.sequence;
        if !sink.push_frame(canonical) {
            debug!("Preview consumer went away");
            self.detach();
            return FrameOutcome::NoSink;
        }

        if self.discard_count > 0 {
            info!(
                discarded = self.discard_count,
                sequence, "Forwarding resumed after discards"
            );
            self.discard_count = 0;
        }
        self.stats.forwarded += 1;
        if self.stats.forwarded % FRAME_LOG_INTERVAL == 0 {
            debug!(
                forwarded = self.stats.forwarded,
                discarded = self.stats.discarded_total,
                "Preview frame counters"
            );
        }
        FrameOutcome::Forwarded
    }

    fn record_discard(&mut self) {
        if self.discard_count == 0 {
            info!(
                forwarded = self.stats.forwarded,
                "Consumer has enough buffered, discarding frames"
            );
        }
        self.discard_count += 1;
        self.stats.discarded_total += 1;
    }
}

impl std::fmt::Debug for PreviewPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewPipeline")
            .field("attached", &self.sink.is_some())
            .field("size", &self.size)
            .field("discard_count", &self.discard_count)
            .field("stats", &self.stats)
            .finish()
    }
}
