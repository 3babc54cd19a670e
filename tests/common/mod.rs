// SPDX-License-Identifier: GPL-3.0-only

//! Shared helpers for integration tests
//!
//! [`ScriptedCamera`] is a HAL whose asynchronous side is driven by the test:
//! it records every hardware call and hands out the registered listener so a
//! test can play the driver thread and deliver frames, focus results and
//! images exactly when it wants.

#![allow(dead_code)]

use camera_control::backends::camera::virtual_hal::generate_preview_frame;
use camera_control::backends::camera::{
    CameraHal, CameraSelector, DataMessage, HalBackendType, HalFactory, HalListener,
    HalParameters, HardwareSessionRegistry, MessageMask, NotifyMessage, PixelFormat, Size, Ticket,
};
use camera_control::control::{CameraControl, ConsumerLoop, SessionOptions};
use camera_control::errors::{HalError, HalResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// How long tests wait for asynchronous effects
pub const WAIT: Duration = Duration::from_secs(5);

/// One recorded hardware call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalCall {
    pub name: &'static str,
    pub camera: u32,
    /// Name of the thread the call ran on
    pub thread: Option<String>,
}

/// Sizes every scripted sensor supports
pub fn supported_sizes() -> Vec<Size> {
    vec![Size::new(352, 288), Size::new(640, 480), Size::new(1280, 720)]
}

/// Parameters a scripted sensor reports after open
pub fn initial_parameters(format: PixelFormat) -> HalParameters {
    let mut params = HalParameters::new();
    params.set("preview-size", "352x288");
    params.set("preview-size-values", "352x288,640x480,1280x720");
    params.set("preview-format", format.native_name());
    params.set("preview-frame-rate", "30");
    params.set("picture-size", "640x480");
    params.set("picture-format", "jpeg");
    params.set("effect", "none");
    params.set("focus-mode", "auto");
    params.set("focus-areas", "(0,0,0,0,0)");
    params.set("metering-areas", "(0,0,0,0,0)");
    params.set("max-num-focus-areas", "1");
    params.set("max-num-metering-areas", "2");
    params.set("exposure-compensation", "0");
    params.set("min-exposure-compensation", "-4");
    params.set("max-exposure-compensation", "4");
    params.set("exposure-compensation-step", "0.5");
    params.set("rotation", "0");
    params
}

#[derive(Default)]
struct ScriptState {
    calls: Vec<HalCall>,
    listeners: Vec<Arc<dyn HalListener>>,
    params: HalParameters,
    pushes: Vec<HalParameters>,
    preview_enabled: bool,
    mask: MessageMask,
    focus_tickets: Vec<Ticket>,
    picture_tickets: Vec<Ticket>,
    reject_push: bool,
    picture_error: Option<HalError>,
}

/// Test-driven camera hardware shared by every HAL a factory creates
pub struct ScriptedCamera {
    format: PixelFormat,
    state: Mutex<ScriptState>,
    sequence: AtomicU64,
}

impl ScriptedCamera {
    pub fn new(format: PixelFormat) -> Arc<Self> {
        Arc::new(Self {
            format,
            state: Mutex::new(ScriptState::default()),
            sequence: AtomicU64::new(0),
        })
    }

    /// Registry backed by this camera, exposing two camera indices
    pub fn registry(self: &Arc<Self>) -> Arc<HardwareSessionRegistry> {
        let factory = ScriptedFactory {
            camera: Arc::clone(self),
        };
        Arc::new(HardwareSessionRegistry::new(Arc::new(factory)))
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, name: &'static str, camera: u32) {
        let thread = std::thread::current().name().map(str::to_string);
        self.state().calls.push(HalCall {
            name,
            camera,
            thread,
        });
    }

    pub fn calls(&self) -> Vec<HalCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.state().calls.iter().filter(|c| c.name == name).count()
    }

    /// Every parameter set pushed so far
    pub fn pushes(&self) -> Vec<HalParameters> {
        self.state().pushes.clone()
    }

    pub fn hardware_parameters(&self) -> HalParameters {
        self.state().params.clone()
    }

    pub fn set_reject_push(&self, reject: bool) {
        self.state().reject_push = reject;
    }

    /// Make the next take-picture calls fail with `error`
    pub fn set_picture_error(&self, error: Option<HalError>) {
        self.state().picture_error = error;
    }

    pub fn preview_enabled(&self) -> bool {
        self.state().preview_enabled
    }

    pub fn mask(&self) -> MessageMask {
        self.state().mask
    }

    /// Listener registered by the most recent open
    pub fn listener(&self) -> Arc<dyn HalListener> {
        let listener = self.state().listeners.last().cloned();
        match listener {
            Some(listener) => listener,
            None => panic!("camera was never opened"),
        }
    }

    /// Every listener ever registered, oldest first
    pub fn listeners(&self) -> Vec<Arc<dyn HalListener>> {
        self.state().listeners.clone()
    }

    pub fn focus_tickets(&self) -> Vec<Ticket> {
        self.state().focus_tickets.clone()
    }

    pub fn picture_tickets(&self) -> Vec<Ticket> {
        self.state().picture_tickets.clone()
    }

    /// Wait until the hardware has seen `count` autofocus requests
    pub fn wait_focus_ticket(&self, count: usize) -> Ticket {
        assert!(
            wait_until(|| self.focus_tickets().len() >= count),
            "autofocus request {} never reached the hardware",
            count
        );
        self.focus_tickets()[count - 1]
    }

    /// Wait until the hardware has seen `count` take-picture requests
    pub fn wait_picture_ticket(&self, count: usize) -> Ticket {
        assert!(
            wait_until(|| self.picture_tickets().len() >= count),
            "take-picture request {} never reached the hardware",
            count
        );
        self.picture_tickets()[count - 1]
    }

    /// Build a preview frame in this camera's native layout
    pub fn frame(&self, size: Size) -> DataMessage {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        DataMessage::PreviewFrame(generate_preview_frame(size, self.format, sequence))
    }

    /// Deliver a preview frame through the current listener
    pub fn send_frame(&self, size: Size) {
        self.listener().on_data(self.frame(size));
    }

    pub fn send_focus(&self, ticket: Ticket, success: bool) {
        self.listener()
            .on_notify(NotifyMessage::Focus { ticket, success });
    }

    pub fn send_picture(&self, ticket: Ticket, data: Vec<u8>) {
        self.listener()
            .on_data(DataMessage::CompressedImage { ticket, data });
    }

    pub fn send_notify(&self, message: NotifyMessage) {
        self.listener().on_notify(message);
    }
}

struct ScriptedFactory {
    camera: Arc<ScriptedCamera>,
}

impl HalFactory for ScriptedFactory {
    fn create(&self, camera_index: u32) -> HalResult<Box<dyn CameraHal>> {
        if camera_index >= self.camera_count() {
            return Err(HalError::NoDevice(camera_index));
        }
        Ok(Box::new(ScriptedHal {
            camera: Arc::clone(&self.camera),
            index: camera_index,
        }))
    }

    fn camera_count(&self) -> u32 {
        2
    }

    fn backend_type(&self) -> HalBackendType {
        HalBackendType::Virtual
    }
}

struct ScriptedHal {
    camera: Arc<ScriptedCamera>,
    index: u32,
}

impl CameraHal for ScriptedHal {
    fn open(&mut self, camera_index: u32, listener: Arc<dyn HalListener>) -> HalResult<()> {
        self.camera.record("open", camera_index);
        let mut state = self.camera.state();
        state.listeners.push(listener);
        state.params = initial_parameters(self.camera.format);
        state.preview_enabled = false;
        Ok(())
    }

    fn close(&mut self) {
        self.camera.record("close", self.index);
    }

    fn set_message_mask(&mut self, mask: MessageMask) {
        self.camera.record("set_message_mask", self.index);
        self.camera.state().mask = mask;
    }

    fn start_preview(&mut self) -> HalResult<()> {
        self.camera.record("start_preview", self.index);
        self.camera.state().preview_enabled = true;
        Ok(())
    }

    fn stop_preview(&mut self) {
        self.camera.record("stop_preview", self.index);
        self.camera.state().preview_enabled = false;
    }

    fn preview_enabled(&self) -> bool {
        self.camera.state().preview_enabled
    }

    fn auto_focus(&mut self, ticket: Ticket) -> HalResult<()> {
        self.camera.record("auto_focus", self.index);
        self.camera.state().focus_tickets.push(ticket);
        Ok(())
    }

    fn cancel_auto_focus(&mut self) {
        self.camera.record("cancel_auto_focus", self.index);
    }

    fn take_picture(&mut self, ticket: Ticket) -> HalResult<()> {
        self.camera.record("take_picture", self.index);
        let mut state = self.camera.state();
        if let Some(error) = state.picture_error.clone() {
            return Err(error);
        }
        state.preview_enabled = false;
        state.picture_tickets.push(ticket);
        Ok(())
    }

    fn cancel_take_picture(&mut self) {
        self.camera.record("cancel_take_picture", self.index);
    }

    fn push_parameters(&mut self, params: &HalParameters) -> HalResult<()> {
        self.camera.record("push_parameters", self.index);
        let mut state = self.camera.state();
        if state.reject_push {
            return Err(HalError::Io("parameters rejected".to_string()));
        }
        state.pushes.push(params.clone());
        state.params = params.clone();
        Ok(())
    }

    fn pull_parameters(&mut self) -> HalResult<HalParameters> {
        self.camera.record("pull_parameters", self.index);
        Ok(self.camera.state().params.clone())
    }

    fn supported_preview_sizes(&self) -> Vec<Size> {
        supported_sizes()
    }
}

/// Poll `condition` until it holds or [`WAIT`] elapses
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Collects callback results in the order they run
pub struct Results<T> {
    values: Arc<Mutex<Vec<T>>>,
}

impl<T: Send + 'static> Results<T> {
    pub fn new() -> Self {
        Self {
            values: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Callback that appends its argument
    pub fn sink(&self) -> impl FnOnce(T) + Send + 'static {
        let values = Arc::clone(&self.values);
        move |value| values.lock().unwrap().push(value)
    }

    pub fn len(&self) -> usize {
        self.values.lock().unwrap().len()
    }

    /// Pump `consumer` until `count` results arrived
    pub fn wait(&self, consumer: &ConsumerLoop, count: usize) -> bool {
        consumer.run_until(WAIT, || self.len() >= count)
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.values.lock().unwrap())
    }
}

impl<T: Clone> Results<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.values.lock().unwrap().clone()
    }
}

/// Options asking for the smallest scripted preview size
pub fn small_preview_options() -> SessionOptions {
    SessionOptions {
        preview: Size::new(352, 288),
        framerate: 30,
        buffer_frames: 4,
    }
}

/// Open the back camera of `registry`
pub fn open_back(
    registry: &Arc<HardwareSessionRegistry>,
    consumer: &ConsumerLoop,
    options: SessionOptions,
) -> CameraControl {
    CameraControl::open(
        Arc::clone(registry),
        CameraSelector::Back,
        options,
        consumer.handle(),
    )
    .unwrap()
}
