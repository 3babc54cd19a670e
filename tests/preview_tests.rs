// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for preview backpressure

mod common;

use camera_control::backends::camera::virtual_hal::generate_preview_frame;
use camera_control::backends::camera::{PixelFormat, Size};
use camera_control::control::{ConsumerLoop, SessionOptions};
use camera_control::media::{FrameOutcome, FrameSink, PreviewFrame, PreviewPipeline, StereoMode};
use common::{Results, ScriptedCamera, open_back};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Sink whose saturation is switched by the test
struct GatedSink {
    saturated: Arc<AtomicBool>,
    received: Arc<Mutex<Vec<PreviewFrame>>>,
}

impl FrameSink for GatedSink {
    fn has_enough_buffered(&self) -> bool {
        self.saturated.load(Ordering::SeqCst)
    }

    fn push_frame(&mut self, frame: PreviewFrame) -> bool {
        assert!(
            !self.saturated.load(Ordering::SeqCst),
            "frame forwarded while the consumer was saturated"
        );
        self.received.lock().unwrap().push(frame);
        true
    }
}

#[test]
fn test_discard_counter_tracks_saturation() {
    let size = Size::new(64, 48);
    let saturated = Arc::new(AtomicBool::new(false));
    let received = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = PreviewPipeline::new();
    pipeline.attach(
        Box::new(GatedSink {
            saturated: Arc::clone(&saturated),
            received: Arc::clone(&received),
        }),
        size,
    );

    let mut sequence = 0;
    let mut next_frame = || {
        sequence += 1;
        generate_preview_frame(size, PixelFormat::NV21, sequence)
    };

    for _ in 0..3 {
        assert_eq!(pipeline.on_frame(next_frame()), FrameOutcome::Forwarded);
    }
    assert_eq!(pipeline.discard_count(), 0);

    saturated.store(true, Ordering::SeqCst);
    let mut previous = 0;
    for _ in 0..10 {
        assert_eq!(pipeline.on_frame(next_frame()), FrameOutcome::Discarded);
        let count = pipeline.discard_count();
        assert!(count > previous, "discard counter must keep rising");
        previous = count;
    }
    assert_eq!(previous, 10);

    saturated.store(false, Ordering::SeqCst);
    assert_eq!(pipeline.on_frame(next_frame()), FrameOutcome::Forwarded);
    assert_eq!(pipeline.discard_count(), 0);

    let stats = pipeline.stats();
    assert_eq!(stats.forwarded, 4);
    assert_eq!(stats.discarded_total, 10);
    assert_eq!(stats.consecutive_discards, 0);

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 4);
    assert!(received.iter().all(|f| f.stereo_mode == StereoMode::Mono));
    // The frame after the discards carries its own sequence number
    assert_eq!(received.last().map(|f| f.sequence), Some(14));
}

#[test]
fn test_repeated_saturation_runs() {
    let size = Size::new(16, 8);
    let saturated = Arc::new(AtomicBool::new(false));
    let mut pipeline = PreviewPipeline::new();
    pipeline.attach(
        Box::new(GatedSink {
            saturated: Arc::clone(&saturated),
            received: Arc::new(Mutex::new(Vec::new())),
        }),
        size,
    );

    for run in 1..=3u64 {
        saturated.store(true, Ordering::SeqCst);
        for _ in 0..run {
            pipeline.on_frame(generate_preview_frame(size, PixelFormat::NV12, 0));
        }
        assert_eq!(pipeline.discard_count(), run);

        saturated.store(false, Ordering::SeqCst);
        pipeline.on_frame(generate_preview_frame(size, PixelFormat::NV12, 0));
        assert_eq!(pipeline.discard_count(), 0);
    }
    assert_eq!(pipeline.stats().discarded_total, 6);
}

#[test]
fn test_slow_consumer_drops_frames() {
    let camera = ScriptedCamera::new(PixelFormat::NV21);
    let registry = camera.registry();
    let consumer = ConsumerLoop::new();
    let options = SessionOptions {
        preview: Size::new(352, 288),
        framerate: 30,
        buffer_frames: 2,
    };
    let control = open_back(&registry, &consumer, options);

    let results = Results::new();
    control.get_preview_stream(352, 288, results.sink());
    assert!(results.wait(&consumer, 1));
    let mut stream = results.take().pop().unwrap().unwrap();

    // Nobody drains the stream: two frames fit, the rest are dropped
    for _ in 0..5 {
        camera.send_frame(Size::new(352, 288));
    }
    let stats = control.preview_stats();
    assert_eq!(stats.forwarded, 2);
    assert_eq!(stats.discarded_total, 3);
    assert_eq!(stats.consecutive_discards, 3);

    let first = stream.try_next().unwrap().unwrap();
    let second = stream.try_next().unwrap().unwrap();
    assert!(first.sequence < second.sequence);
    assert!(stream.try_next().unwrap().is_none());

    // Draining lets the next frame through and resets the run
    camera.send_frame(Size::new(352, 288));
    let stats = control.preview_stats();
    assert_eq!(stats.forwarded, 3);
    assert_eq!(stats.discarded_total, 3);
    assert_eq!(stats.consecutive_discards, 0);
    let resumed = stream.try_next().unwrap().unwrap();
    assert!(resumed.sequence > second.sequence + 3);
}

#[test]
fn test_mismatched_frames_are_not_discards() {
    let camera = ScriptedCamera::new(PixelFormat::NV21);
    let registry = camera.registry();
    let consumer = ConsumerLoop::new();
    let control = open_back(&registry, &consumer, SessionOptions::default());

    let results = Results::new();
    control.get_preview_stream(640, 480, results.sink());
    assert!(results.wait(&consumer, 1));
    let mut stream = results.take().pop().unwrap().unwrap();

    // A frame left over from the previous size
    camera.send_frame(Size::new(352, 288));
    assert!(stream.try_next().unwrap().is_none());
    assert_eq!(control.preview_stats().discarded_total, 0);
}
