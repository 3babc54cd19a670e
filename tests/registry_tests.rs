// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the hardware session registry

mod common;

use camera_control::backends::camera::{
    DataMessage, HalListener, MessageMask, NotifyMessage, PixelFormat, Size,
};
use camera_control::errors::CameraError;
use common::ScriptedCamera;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct NullListener;

impl HalListener for NullListener {
    fn on_data(&self, _message: DataMessage) {}
    fn on_notify(&self, _message: NotifyMessage) {}
}

fn listener(_handle: camera_control::backends::camera::HardwareHandle) -> Arc<dyn HalListener> {
    Arc::new(NullListener)
}

#[test]
fn test_acquire_configures_preview() {
    let camera = ScriptedCamera::new(PixelFormat::NV21);
    let registry = camera.registry();

    let handle = registry
        .acquire(0, Size::new(480, 320), 15, listener, Box::new(|| {}))
        .unwrap();
    assert_eq!(handle.camera_index(), 0);
    assert!(registry.is_live(handle));
    assert_eq!(registry.live_handle(0), Some(handle));

    let params = camera.hardware_parameters();
    assert_eq!(params.get("preview-size"), Some("640x480"));
    assert_eq!(params.get("preview-frame-rate"), Some("15"));
    assert_eq!(camera.mask(), MessageMask::ALL);
}

#[test]
fn test_acquire_supersedes_prior_session() {
    let camera = ScriptedCamera::new(PixelFormat::NV21);
    let registry = camera.registry();
    let released = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&released);
    let first = registry
        .acquire(
            0,
            Size::new(352, 288),
            30,
            listener,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
    let second = registry
        .acquire(0, Size::new(352, 288), 30, listener, Box::new(|| {}))
        .unwrap();

    assert_ne!(first, second);
    assert!(second.generation() > first.generation());
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(registry.lookup(first).is_none());
    assert!(registry.lookup(second).is_some());

    // Teardown silenced the driver before closing it
    let calls: Vec<&str> = camera.calls().iter().map(|c| c.name).collect();
    let close = calls.iter().position(|c| *c == "close").unwrap();
    assert_eq!(&calls[close - 2..close], &["set_message_mask", "stop_preview"]);
}

#[test]
fn test_release_is_idempotent() {
    let camera = ScriptedCamera::new(PixelFormat::NV21);
    let registry = camera.registry();
    let released = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&released);
    let handle = registry
        .acquire(
            1,
            Size::new(0, 0),
            0,
            listener,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    assert!(registry.release(handle));
    assert!(!registry.release(handle));
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(camera.call_count("close"), 1);
    assert_eq!(registry.live_handle(1), None);
}

#[test]
fn test_acquire_unknown_camera() {
    let camera = ScriptedCamera::new(PixelFormat::NV21);
    let registry = camera.registry();
    let result = registry.acquire(5, Size::new(640, 480), 30, listener, Box::new(|| {}));
    assert!(matches!(result, Err(CameraError::HardwareUnavailable(_))));
}

#[test]
fn test_dropping_registry_closes_hardware() {
    let camera = ScriptedCamera::new(PixelFormat::NV21);
    let registry = camera.registry();
    registry
        .acquire(0, Size::new(640, 480), 30, listener, Box::new(|| {}))
        .unwrap();
    registry
        .acquire(1, Size::new(640, 480), 30, listener, Box::new(|| {}))
        .unwrap();

    drop(registry);
    assert_eq!(camera.call_count("close"), 2);
}
