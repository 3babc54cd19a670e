// SPDX-License-Identifier: GPL-3.0-only

//! Simulated camera hardware
//!
//! A software sensor that behaves like a phone camera driver: it streams
//! semi-planar preview frames from its own driver thread, finishes autofocus
//! and still capture after a delay, honours cancel requests and keeps its
//! configuration in the driver's flattened parameter format.
//!
//! Used by the command-line tool and by tests that need real threading.

use super::frame_loop::DriverLoopController;
use super::types::*;
use super::{CameraHal, HalFactory, HalListener};
use crate::constants::{picture, timing, virtual_camera as defaults};
use crate::errors::{HalError, HalResult};
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use image::error::{ParameterError, ParameterErrorKind};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Behaviour of the simulated sensor
#[derive(Debug, Clone)]
pub struct VirtualHalOptions {
    /// Cameras the factory exposes
    pub camera_count: u32,
    /// Preview sizes the sensor streams
    pub preview_sizes: Vec<Size>,
    /// Still sizes the sensor captures
    pub picture_sizes: Vec<Size>,
    /// Layout of generated preview frames
    pub native_format: PixelFormat,
    /// Interval between preview frames
    pub frame_interval: Duration,
    /// Delay before autofocus reports
    pub focus_delay: Duration,
    /// Delay between take-picture and image data
    pub capture_delay: Duration,
    /// Result reported by every autofocus scan
    pub focus_succeeds: bool,
    pub max_focus_areas: u32,
    pub max_metering_areas: u32,
}

impl Default for VirtualHalOptions {
    fn default() -> Self {
        let to_sizes = |list: &[(u32, u32)]| -> Vec<Size> {
            list.iter().map(|&(w, h)| Size::new(w, h)).collect()
        };
        Self {
            camera_count: defaults::CAMERA_COUNT,
            preview_sizes: to_sizes(defaults::PREVIEW_SIZES),
            picture_sizes: to_sizes(defaults::PICTURE_SIZES),
            native_format: PixelFormat::NV21,
            frame_interval: defaults::FRAME_INTERVAL,
            focus_delay: defaults::FOCUS_DELAY,
            capture_delay: defaults::CAPTURE_DELAY,
            focus_succeeds: true,
            max_focus_areas: defaults::MAX_FOCUS_AREAS,
            max_metering_areas: defaults::MAX_METERING_AREAS,
        }
    }
}

/// Factory producing [`VirtualHal`] instances
#[derive(Debug, Clone, Default)]
pub struct VirtualHalFactory {
    options: VirtualHalOptions,
}

impl VirtualHalFactory {
    pub fn new(options: VirtualHalOptions) -> Self {
        Self { options }
    }
}

impl HalFactory for VirtualHalFactory {
    fn create(&self, camera_index: u32) -> HalResult<Box<dyn CameraHal>> {
        if camera_index >= self.options.camera_count {
            return Err(HalError::NoDevice(camera_index));
        }
        Ok(Box::new(VirtualHal::new(self.options.clone())))
    }

    fn camera_count(&self) -> u32 {
        self.options.camera_count
    }

    fn backend_type(&self) -> HalBackendType {
        HalBackendType::Virtual
    }
}

/// Asynchronous completion waiting on the driver thread
#[derive(Debug, Clone, Copy)]
enum PendingKind {
    Shutter(Ticket),
    Focus(Ticket),
    Picture(Ticket),
}

#[derive(Debug, Clone, Copy)]
struct PendingEvent {
    due: Instant,
    kind: PendingKind,
}

/// Streaming preview configuration
#[derive(Debug, Clone, Copy)]
struct PreviewState {
    size: Size,
    next_due: Instant,
}

/// State shared between the HAL calls and the driver thread
struct DriverState {
    listener: Option<Arc<dyn HalListener>>,
    mask: MessageMask,
    preview: Option<PreviewState>,
    sequence: u64,
    pending: Vec<PendingEvent>,
    /// Configuration in the driver's `key=value;key=value` form
    params: String,
    /// Raw still buffer reserved when the capture was requested
    capture_buffer: Option<(Ticket, Vec<u8>)>,
}

impl DriverState {
    fn parameters(&self) -> HalResult<HalParameters> {
        HalParameters::unflatten(&self.params)
            .ok_or_else(|| HalError::Io("stored parameters are corrupt".to_string()))
    }
}

/// Simulated camera device
pub struct VirtualHal {
    options: VirtualHalOptions,
    camera_index: Option<u32>,
    shared: Arc<Mutex<DriverState>>,
    driver: Option<DriverLoopController>,
}

impl VirtualHal {
    pub fn new(options: VirtualHalOptions) -> Self {
        let params = default_parameters(&options).flatten();
        Self {
            options,
            camera_index: None,
            shared: Arc::new(Mutex::new(DriverState {
                listener: None,
                mask: MessageMask::NONE,
                preview: None,
                sequence: 0,
                pending: Vec::new(),
                params,
                capture_buffer: None,
            })),
            driver: None,
        }
    }

    fn state(&self) -> MutexGuard<'_, DriverState> {
        lock(&self.shared)
    }

    fn ensure_open(&self) -> HalResult<()> {
        if self.camera_index.is_some() {
            Ok(())
        } else {
            Err(HalError::Io("device not open".to_string()))
        }
    }

    fn schedule(&self, delay: Duration, kind: PendingKind) {
        self.state().pending.push(PendingEvent {
            due: Instant::now() + delay,
            kind,
        });
    }
}

impl CameraHal for VirtualHal {
    fn open(&mut self, camera_index: u32, listener: Arc<dyn HalListener>) -> HalResult<()> {
        if camera_index >= self.options.camera_count {
            return Err(HalError::NoDevice(camera_index));
        }
        if self.camera_index.is_some() {
            return Err(HalError::Busy);
        }

        self.state().listener = Some(listener);

        let shared = Arc::clone(&self.shared);
        let options = self.options.clone();
        let driver = DriverLoopController::start(
            &format!("virtual-cam{}-driver", camera_index),
            timing::DRIVER_TICK,
            move || run_driver_tick(&shared, &options),
        )
        .map_err(|e| HalError::Io(format!("spawn driver thread: {}", e)))?;

        self.driver = Some(driver);
        self.camera_index = Some(camera_index);
        info!(camera = camera_index, "Virtual camera opened");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            driver.stop();
        }
        let mut state = self.state();
        state.listener = None;
        state.preview = None;
        state.pending.clear();
        state.capture_buffer = None;
        drop(state);

        if let Some(index) = self.camera_index.take() {
            info!(camera = index, "Virtual camera closed");
        }
    }

    fn set_message_mask(&mut self, mask: MessageMask) {
        self.state().mask = mask;
    }

    fn start_preview(&mut self) -> HalResult<()> {
        self.ensure_open()?;
        let mut state = self.state();
        let size = state
            .parameters()?
            .get("preview-size")
            .and_then(Size::parse)
            .ok_or_else(|| HalError::Io("preview-size not configured".to_string()))?;
        state.preview = Some(PreviewState {
            size,
            next_due: Instant::now(),
        });
        debug!(size = %size, format = ?self.options.native_format, "Virtual preview started");
        Ok(())
    }

    fn stop_preview(&mut self) {
        if self.state().preview.take().is_some() {
            debug!("Virtual preview stopped");
        }
    }

    fn preview_enabled(&self) -> bool {
        self.state().preview.is_some()
    }

    fn auto_focus(&mut self, ticket: Ticket) -> HalResult<()> {
        self.ensure_open()?;
        self.schedule(self.options.focus_delay, PendingKind::Focus(ticket));
        Ok(())
    }

    fn cancel_auto_focus(&mut self) {
        self.state()
            .pending
            .retain(|e| !matches!(e.kind, PendingKind::Focus(_)));
    }

    fn take_picture(&mut self, ticket: Ticket) -> HalResult<()> {
        self.ensure_open()?;
        let size = picture_size(&self.state().parameters()?);
        let buffer = reserve_still_buffer(size)?;

        let mut state = self.state();
        // The sensor stops streaming while it exposes the still.
        state.preview = None;
        state.capture_buffer = Some((ticket, buffer));
        drop(state);
        self.schedule(Duration::ZERO, PendingKind::Shutter(ticket));
        self.schedule(self.options.capture_delay, PendingKind::Picture(ticket));
        Ok(())
    }

    fn cancel_take_picture(&mut self) {
        let mut state = self.state();
        state.capture_buffer = None;
        state.pending.retain(|e| {
            !matches!(e.kind, PendingKind::Picture(_) | PendingKind::Shutter(_))
        });
    }

    fn push_parameters(&mut self, params: &HalParameters) -> HalResult<()> {
        self.ensure_open()?;
        if let Some(value) = params.get("preview-size") {
            let size = Size::parse(value)
                .ok_or_else(|| HalError::Io(format!("bad preview-size '{}'", value)))?;
            if !self.options.preview_sizes.contains(&size) {
                return Err(HalError::Io(format!("unsupported preview-size {}", size)));
            }
        }

        // Either character would corrupt the flattened form.
        if let Some((key, _)) = params
            .iter()
            .find(|(k, v)| k.contains(['=', ';']) || v.contains(';'))
        {
            return Err(HalError::Io(format!("unencodable parameter '{}'", key)));
        }

        let mut stored = params.clone();
        // Read-only capabilities are owned by the driver.
        let defaults = default_parameters(&self.options);
        for key in READ_ONLY_KEYS {
            if let Some(value) = defaults.get(key) {
                stored.set(*key, value);
            }
        }

        let mut state = self.state();
        state.params = stored.flatten();
        if let (Some(preview), Some(size)) = (
            state.preview.as_mut(),
            params.get("preview-size").and_then(Size::parse),
        ) {
            preview.size = size;
        }
        Ok(())
    }

    fn pull_parameters(&mut self) -> HalResult<HalParameters> {
        self.ensure_open()?;
        self.state().parameters()
    }

    fn supported_preview_sizes(&self) -> Vec<Size> {
        self.options.preview_sizes.clone()
    }
}

impl Drop for VirtualHal {
    fn drop(&mut self) {
        if self.camera_index.is_some() {
            self.close();
        }
    }
}

/// Capability keys the driver reports but never accepts
const READ_ONLY_KEYS: &[&str] = &[
    "preview-size-values",
    "picture-size-values",
    "max-num-focus-areas",
    "max-num-metering-areas",
    "min-exposure-compensation",
    "max-exposure-compensation",
    "exposure-compensation-step",
    "focal-length",
    "preview-format",
];

fn default_parameters(options: &VirtualHalOptions) -> HalParameters {
    let join = |sizes: &[Size]| {
        sizes
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(",")
    };
    let first = |sizes: &[Size]| sizes.first().map(|s| s.to_string()).unwrap_or_default();

    let mut params = HalParameters::new();
    params.set("preview-size", first(&options.preview_sizes));
    params.set("preview-size-values", join(&options.preview_sizes));
    params.set("preview-format", options.native_format.native_name());
    params.set("preview-frame-rate", "30");
    params.set("picture-size", first(&options.picture_sizes));
    params.set("picture-size-values", join(&options.picture_sizes));
    params.set("picture-format", picture::DEFAULT_FILE_FORMAT);
    params.set("jpeg-quality", picture::DEFAULT_JPEG_QUALITY.to_string());
    params.set("rotation", "0");
    params.set("effect", "none");
    params.set("whitebalance", "auto");
    params.set("scene-mode", "auto");
    params.set("flash-mode", "off");
    params.set("focus-mode", "auto");
    params.set("zoom", "0");
    params.set("focus-areas", crate::constants::regions::AUTOMATIC_SENTINEL);
    params.set("metering-areas", crate::constants::regions::AUTOMATIC_SENTINEL);
    params.set("max-num-focus-areas", options.max_focus_areas.to_string());
    params.set("max-num-metering-areas", options.max_metering_areas.to_string());
    params.set("exposure-compensation", "0");
    params.set("min-exposure-compensation", "-6");
    params.set("max-exposure-compensation", "6");
    params.set("exposure-compensation-step", "0.5");
    params.set("focal-length", "3.43");
    params.set("video-size", first(&options.preview_sizes));
    params.set("recording-hint", "false");
    params
}

fn lock(shared: &Mutex<DriverState>) -> MutexGuard<'_, DriverState> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Messages produced by one driver tick, delivered after the lock is dropped
enum Outgoing {
    Data(DataMessage),
    Notify(NotifyMessage),
    /// Still capture due; encoded outside the lock with these settings
    Capture(Ticket, HalParameters, Vec<u8>),
}

/// One iteration of the driver thread: emit the frame and completions that are due
fn run_driver_tick(shared: &Mutex<DriverState>, options: &VirtualHalOptions) {
    let now = Instant::now();
    let mut outgoing = Vec::new();

    let (listener, mask) = {
        let mut state = lock(shared);
        let Some(listener) = state.listener.clone() else {
            return;
        };

        let mut due = Vec::new();
        state.pending.retain(|e| {
            if e.due <= now {
                due.push(*e);
                false
            } else {
                true
            }
        });
        due.sort_by_key(|e| e.due);

        let frame_size = match state.preview.as_mut() {
            Some(preview) if preview.next_due <= now => {
                preview.next_due = now + options.frame_interval;
                Some(preview.size)
            }
            _ => None,
        };
        if let Some(size) = frame_size {
            state.sequence += 1;
            let frame = generate_preview_frame(size, options.native_format, state.sequence);
            outgoing.push(Outgoing::Data(DataMessage::PreviewFrame(frame)));
        }

        for event in due {
            match event.kind {
                PendingKind::Shutter(ticket) => {
                    outgoing.push(Outgoing::Notify(NotifyMessage::Shutter { ticket }))
                }
                PendingKind::Focus(ticket) => outgoing.push(Outgoing::Notify(NotifyMessage::Focus {
                    ticket,
                    success: options.focus_succeeds,
                })),
                PendingKind::Picture(ticket) => match state.parameters() {
                    Ok(params) => {
                        let buffer = state
                            .capture_buffer
                            .take_if(|(reserved, _)| *reserved == ticket)
                            .map(|(_, buffer)| buffer)
                            .unwrap_or_default();
                        outgoing.push(Outgoing::Capture(ticket, params, buffer));
                    }
                    Err(e) => {
                        warn!(error = %e, "Virtual capture has no usable settings");
                        outgoing.push(Outgoing::Notify(NotifyMessage::PictureFailed { ticket }));
                    }
                },
            }
        }

        (listener, state.mask)
    };

    for message in outgoing {
        match message {
            Outgoing::Capture(ticket, params, buffer) => {
                match encode_picture(&params, buffer) {
                    Ok(data) => deliver_data(
                        &listener,
                        mask,
                        DataMessage::CompressedImage { ticket, data },
                    ),
                    Err(e) => {
                        warn!(error = %e, "Virtual capture encoding failed");
                        deliver_notify(&listener, mask, NotifyMessage::PictureFailed { ticket });
                    }
                }
            }
            Outgoing::Data(data) => deliver_data(&listener, mask, data),
            Outgoing::Notify(notify) => deliver_notify(&listener, mask, notify),
        }
    }
}

fn deliver_data(listener: &Arc<dyn HalListener>, mask: MessageMask, message: DataMessage) {
    if mask.contains(message.mask()) {
        listener.on_data(message);
    }
}

fn deliver_notify(listener: &Arc<dyn HalListener>, mask: MessageMask, message: NotifyMessage) {
    if mask.contains(message.mask()) {
        listener.on_notify(message);
    }
}

/// Build a semi-planar or planar frame with a moving luma gradient
pub fn generate_preview_frame(size: Size, format: PixelFormat, sequence: u64) -> FrameBuffer {
    let width = size.width as usize;
    let height = size.height as usize;
    let chroma_w = width.div_ceil(2);
    let chroma_h = height.div_ceil(2);
    let mut data = Vec::with_capacity(format.frame_len(size.width, size.height));

    let shift = sequence as usize;
    for y in 0..height {
        for x in 0..width {
            data.push(((x + y + shift) & 0xff) as u8);
        }
    }

    let u_at = |cx: usize| ((cx * 255) / chroma_w.max(1)) as u8;
    let v_at = |cy: usize| ((cy * 255) / chroma_h.max(1)) as u8;
    match format {
        PixelFormat::I420 => {
            for _ in 0..chroma_h {
                for cx in 0..chroma_w {
                    data.push(u_at(cx));
                }
            }
            for cy in 0..chroma_h {
                for _ in 0..chroma_w {
                    data.push(v_at(cy));
                }
            }
        }
        PixelFormat::NV12 | PixelFormat::NV21 => {
            for cy in 0..chroma_h {
                for cx in 0..chroma_w {
                    let (first, second) = if format == PixelFormat::NV12 {
                        (u_at(cx), v_at(cy))
                    } else {
                        (v_at(cy), u_at(cx))
                    };
                    data.push(first);
                    data.push(second);
                }
            }
        }
    }

    FrameBuffer {
        data,
        width: size.width,
        height: size.height,
        stride: size.width,
        format,
        sequence,
        captured_at: Instant::now(),
    }
}

fn picture_size(params: &HalParameters) -> Size {
    let size = params
        .get("picture-size")
        .and_then(Size::parse)
        .unwrap_or(Size::new(640, 480));
    Size::new(size.width.max(1), size.height.max(1))
}

/// Reserve the RGB still buffer up front so the driver thread never allocates it
fn reserve_still_buffer(size: Size) -> HalResult<Vec<u8>> {
    let len = (size.width as usize)
        .checked_mul(size.height as usize)
        .and_then(|pixels| pixels.checked_mul(3))
        .ok_or(HalError::NoMemory)?;
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| HalError::NoMemory)?;
    Ok(buffer)
}

/// Encode a test card at the configured picture size into `pixels`
fn encode_picture(
    params: &HalParameters,
    mut pixels: Vec<u8>,
) -> Result<Vec<u8>, image::ImageError> {
    let size = picture_size(params);
    let quality = params
        .get("jpeg-quality")
        .and_then(|q| q.parse::<u8>().ok())
        .unwrap_or(picture::DEFAULT_JPEG_QUALITY)
        .clamp(1, 100);

    pixels.clear();
    for y in 0..size.height {
        for x in 0..size.width {
            let r = (x * 255 / size.width) as u8;
            let g = (y * 255 / size.height) as u8;
            pixels.extend_from_slice(&[r, g, 128]);
        }
    }
    let img = RgbImage::from_raw(size.width, size.height, pixels).ok_or_else(|| {
        image::ImageError::Parameter(ParameterError::from_kind(
            ParameterErrorKind::DimensionMismatch,
        ))
    })?;

    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, quality).encode_image(&img)?;
    Ok(data)
}
