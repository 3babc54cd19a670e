// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Streaming preview frames
//! - Taking photos
//! - Dumping camera parameters

use camera_control::backends::camera::{CameraSelector, HardwareSessionRegistry, factory_for};
use camera_control::config::Config;
use camera_control::constants::CLI_OPERATION_TIMEOUT;
use camera_control::control::{
    CameraControl, ConsumerLoop, ParameterKey, ParameterValue, PictureRequest, SessionOptions,
};
use chrono::Local;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Default folder name for saving photos
const DEFAULT_SAVE_FOLDER: &str = "camera";

/// List all available cameras
pub fn list_cameras(config: &Config) -> CliResult<()> {
    let options = config.virtual_camera.to_options();
    let factory = factory_for(config.backend, options.clone());

    if factory.camera_count() == 0 {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras ({} backend):", factory.backend_type());
    println!();
    for index in 0..factory.camera_count() {
        let facing = match index {
            0 => "back",
            1 => "front",
            _ => "external",
        };
        println!("  [{}] {} camera", index, facing);

        let mut sizes = options.preview_sizes.clone();
        sizes.sort_by_key(|s| std::cmp::Reverse(s.area()));
        let sizes: Vec<String> = sizes.iter().map(|s| s.to_string()).collect();
        println!("      Preview sizes: {}", sizes.join(", "));
        println!("      Native format: {}", options.native_format.native_name());
        println!();
    }

    Ok(())
}

/// Stream preview frames and report how many were forwarded and discarded
pub fn stream_preview(
    config: &Config,
    camera: &str,
    width: u32,
    height: u32,
    frames: u64,
    slow_consumer_ms: u64,
) -> CliResult<()> {
    let (consumer, control) = open_session(config, camera)?;
    let mut stream = await_callback(&consumer, |cb| control.get_preview_stream(width, height, cb))?
        .map_err(|reason| format!("Preview failed: {}", reason))?;
    println!(
        "Requested {}x{}, streaming {} ({})",
        width,
        height,
        stream.size(),
        if control.pixel_format_is_canonical() {
            "native planar"
        } else {
            "converted to planar"
        }
    );
    println!("Streaming... (press Ctrl+C to stop early)");

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let start = Instant::now();
    let mut received = 0u64;
    while received < frames {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }
        consumer.run_pending();

        let Some(frame) = stream.next_timeout(Duration::from_secs(1))? else {
            continue;
        };
        received += 1;
        print!(
            "\rFrame {:>5}  seq {:>6}  {}x{}",
            received, frame.sequence, frame.width, frame.height
        );
        std::io::Write::flush(&mut std::io::stdout())?;

        if slow_consumer_ms > 0 {
            std::thread::sleep(Duration::from_millis(slow_consumer_ms));
        }
    }
    println!();

    let stats = control.preview_stats();
    let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
    println!(
        "Received {} frames in {:.1}s ({:.1} fps); forwarded {}, discarded {}",
        received,
        elapsed,
        received as f64 / elapsed,
        stats.forwarded,
        stats.discarded_total
    );

    control.release();
    consumer.run_pending();
    Ok(())
}

/// Focus, capture and save one photo
pub fn take_photo(
    config: &Config,
    camera: &str,
    output: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    rotation: i32,
) -> CliResult<()> {
    let (consumer, control) = open_session(config, camera)?;

    let _stream = await_callback(&consumer, |cb| {
        control.get_preview_stream(config.preview.width, config.preview.height, cb)
    })?
    .map_err(|reason| format!("Preview failed: {}", reason))?;

    println!("Focusing...");
    if let Err(reason) = await_callback(&consumer, |cb| control.auto_focus(cb))? {
        println!("Autofocus did not lock ({}), capturing anyway", reason);
    }

    control.set_parameter(
        ParameterKey::JpegQuality,
        ParameterValue::Int(config.picture.jpeg_quality.into()),
    )?;

    let request = PictureRequest {
        width: width.unwrap_or(config.picture.width),
        height: height.unwrap_or(config.picture.height),
        rotation_degrees: rotation,
        file_format: Some(config.picture.file_format.clone()),
        geo_position: None,
    };
    println!("Capturing...");
    let blob = await_callback(&consumer, |cb| control.take_picture(request, cb))?
        .map_err(|reason| format!("Capture failed: {}", reason))?;

    let path = match output {
        Some(path) if path.is_dir() => path.join(photo_file_name()),
        Some(path) => path,
        None => get_default_photo_dir().join(photo_file_name()),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &blob.data)?;
    println!(
        "Photo saved: {} ({} bytes, {})",
        path.display(),
        blob.data.len(),
        blob.mime_type
    );

    control.release();
    consumer.run_pending();
    Ok(())
}

/// Print the parameter set pulled when the session opened
pub fn dump_parameters(config: &Config, camera: &str) -> CliResult<()> {
    let (consumer, control) = open_session(config, camera)?;

    println!("Typed parameters:");
    for key in ParameterKey::ALL {
        match control.get_parameter(*key) {
            Ok(Some(value)) => println!("  {:<28} {}", key.native_name(), value),
            Ok(None) => {}
            Err(e) => println!("  {:<28} <{}>", key.native_name(), e),
        }
    }

    println!();
    println!("Native parameter string:");
    println!("  {}", control.parameters()?.flatten());

    control.release();
    consumer.run_pending();
    Ok(())
}

fn open_session(config: &Config, camera: &str) -> CliResult<(ConsumerLoop, CameraControl)> {
    let selector = CameraSelector::parse(camera)
        .ok_or_else(|| format!("Unknown camera '{}' (use back, front or an index)", camera))?;

    let factory = factory_for(config.backend, config.virtual_camera.to_options());
    let registry = Arc::new(HardwareSessionRegistry::new(factory));
    let consumer = ConsumerLoop::new();
    let control = CameraControl::open(
        registry,
        selector,
        SessionOptions::from(config),
        consumer.handle(),
    )?;
    println!(
        "Using camera {} (preview {})",
        control.camera_index(),
        control.preview_size()
    );
    Ok((consumer, control))
}

/// Start an operation and pump the consumer loop until its callback runs
fn await_callback<T, S>(consumer: &ConsumerLoop, start: S) -> CliResult<T>
where
    T: Send + 'static,
    S: FnOnce(Box<dyn FnOnce(T) + Send>),
{
    let slot: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&slot);
    start(Box::new(move |value| {
        *sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
    }));

    let ready = consumer.run_until(CLI_OPERATION_TIMEOUT, || {
        slot.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    });
    if !ready {
        return Err(format!("Timed out after {:?}", CLI_OPERATION_TIMEOUT).into());
    }
    slot.lock()
        .unwrap_or_else(|e| e.into_inner())
        .take()
        .ok_or_else(|| "Callback result missing".into())
}

fn photo_file_name() -> String {
    format!("photo_{}.jpg", Local::now().format("%Y%m%d_%H%M%S"))
}

/// Get default photo directory
fn get_default_photo_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}
