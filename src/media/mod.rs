// SPDX-License-Identifier: GPL-3.0-only

//! Preview frame processing
//!
//! # Color Layout
//!
//! Sensors deliver semi-planar 4:2:0 frames. The [`normalizer`] module
//! rewrites them into the canonical planar layout consumers expect.
//!
//! # Backpressure
//!
//! The [`preview`] module moves canonical frames from the driver thread to
//! the consumer through a bounded stream, dropping frames while the consumer
//! is saturated.

pub mod normalizer;
pub mod preview;

pub use normalizer::{NormalizeError, PreviewFrame, StereoMode, normalize};
pub use preview::{
    FrameOutcome, FrameSink, PipelineStats, PreviewPipeline, PreviewStream, StreamEnded,
    StreamError, StreamTrack, preview_channel,
};
