// SPDX-License-Identifier: GPL-3.0-only

//! Camera session control
//!
//! [`CameraControl`] is the public face of one open camera. Every
//! hardware-affecting call is queued onto the session's own dispatcher
//! thread; results come back as callbacks posted to the consumer loop that
//! opened the session.
//!
//! # Architecture
//!
//! ```text
//!  consumer thread                dispatcher thread            driver thread
//! ┌───────────────┐   queue    ┌──────────────────┐   HAL    ┌─────────────┐
//! │ CameraControl │ ─────────▶ │  session jobs    │ ───────▶ │ CameraHal   │
//! └───────▲───────┘            └──────────────────┘          └──────┬──────┘
//!         │                                                         │
//!         │   ConsumerLoop  ◀── ResultCallbackRouter ◀── listener ◀─┘
//!         │                                               │
//!         └──── PreviewStream ◀── PreviewPipeline ◀───────┘
//! ```

pub mod callbacks;
pub mod dispatcher;
pub mod parameters;
pub mod regions;
pub mod session;
pub mod state;

pub use callbacks::{
    Completion, ConsumerHandle, ConsumerLoop, ImageBlob, OperationKind, Responder,
    ResultCallbackRouter,
};
pub use dispatcher::CommandDispatcher;
pub use parameters::{ParameterKey, ParameterStore, ParameterValue, ValueKind};
pub use regions::{Region, decode_regions, encode_regions};
pub use state::{CameraState, CameraStateMachine, StateEvent};

use crate::backends::camera::{
    CameraSelector, HalParameters, HardwareHandle, HardwareSessionRegistry, PixelFormat, Size,
};
use crate::config::Config;
use crate::constants::preview;
use crate::errors::{CameraError, CameraResult, ErrorReason};
use crate::media::{PipelineStats, PreviewStream};
use session::{SessionShared, SessionState};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// Geographic tag written into captured images
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
}

/// Settings for one still capture
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PictureRequest {
    /// Requested width; 0 keeps the current picture size
    pub width: u32,
    /// Requested height; 0 keeps the current picture size
    pub height: u32,
    /// Any angle; rounded to the nearest quarter turn
    pub rotation_degrees: i32,
    /// Output format; `None` means JPEG
    pub file_format: Option<String>,
    /// Location tag; `None` clears any previous tag
    pub geo_position: Option<GeoPosition>,
}

impl PictureRequest {
    /// Picture size to apply, if both dimensions were given
    pub fn size(&self) -> Option<Size> {
        (self.width > 0 && self.height > 0).then(|| Size::new(self.width, self.height))
    }
}

/// Session settings taken at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Preview size negotiated when the hardware is acquired
    pub preview: Size,
    pub framerate: u32,
    /// Frames the preview stream may hold before frames are dropped
    pub buffer_frames: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            preview: Size::new(preview::DEFAULT_WIDTH, preview::DEFAULT_HEIGHT),
            framerate: preview::DEFAULT_FRAMERATE,
            buffer_frames: preview::DEFAULT_BUFFER_FRAMES,
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            preview: Size::new(config.preview.width, config.preview.height),
            framerate: config.preview.framerate,
            buffer_frames: config.preview_buffer_frames,
        }
    }
}

/// One open camera session
///
/// Dropping the control releases the session.
pub struct CameraControl {
    shared: Arc<SessionShared>,
    consumer: ConsumerHandle,
}

impl CameraControl {
    /// Open a camera and pull its parameters.
    ///
    /// Blocks until the hardware is acquired. Completion callbacks of later
    /// operations are posted to `consumer`.
    pub fn open(
        registry: Arc<HardwareSessionRegistry>,
        selector: CameraSelector,
        options: SessionOptions,
        consumer: ConsumerHandle,
    ) -> CameraResult<Self> {
        let camera_index = selector.index();
        if camera_index >= registry.camera_count() {
            return Err(CameraError::HardwareUnavailable(format!(
                "no camera with index {} ({} available)",
                camera_index,
                registry.camera_count()
            )));
        }

        let dispatcher = CommandDispatcher::start().map_err(|e| {
            CameraError::HardwareUnavailable(format!("spawn dispatcher thread: {}", e))
        })?;

        let state = SessionState {
            handle: None,
            machine: CameraStateMachine::new(),
            requested_preview: options.preview,
            actual_preview: options.preview,
            framerate: options.framerate,
            native_format: PixelFormat::NV21,
            router: ResultCallbackRouter::new(consumer.clone()),
            params: ParameterStore::new(),
            recording: false,
        };
        let shared = Arc::new(SessionShared::new(
            camera_index,
            registry,
            dispatcher,
            options.buffer_frames,
            state,
        ));

        let opener = Arc::clone(&shared);
        let opened = shared
            .dispatcher
            .call(move || opener.open_hardware())
            .ok_or_else(|| CameraError::Unexpected("dispatcher stopped during open".to_string()))?;

        if let Err(e) = opened {
            let handle = shared.state().handle;
            if let Some(handle) = handle {
                shared.registry.release(handle);
            }
            shared.dispatcher.shutdown();
            return Err(e);
        }

        Ok(Self { shared, consumer })
    }

    /// Unique id of this session, used in log fields
    pub fn session_id(&self) -> Uuid {
        self.shared.id
    }

    pub fn camera_index(&self) -> u32 {
        self.shared.camera_index
    }

    /// Hardware handle of this session
    pub fn handle(&self) -> Option<HardwareHandle> {
        self.shared.state().handle
    }

    pub fn state(&self) -> CameraState {
        self.shared.state().machine.state()
    }

    /// Whether the session still owns live hardware
    pub fn is_live(&self) -> bool {
        self.shared.is_live()
    }

    /// Preview size currently configured on the hardware
    pub fn preview_size(&self) -> Size {
        self.shared.state().actual_preview
    }

    /// Whether the sensor delivers frames in the canonical layout already
    pub fn pixel_format_is_canonical(&self) -> bool {
        self.shared.state().format_is_canonical()
    }

    /// Frame counters of the current preview stream
    pub fn preview_stats(&self) -> PipelineStats {
        self.shared.preview_stats()
    }

    /// Start preview at the supported size closest to the request.
    ///
    /// The stream reports the negotiated size. Requesting a new stream
    /// replaces (and ends) the previous one.
    pub fn get_preview_stream<F>(&self, width: u32, height: u32, on_result: F)
    where
        F: FnOnce(Result<PreviewStream, ErrorReason>) + Send + 'static,
    {
        let consumer = self.consumer.clone();
        self.queue_with_callback(
            on_result,
            move |session, on_result| {
                let result = session
                    .start_preview_stream(Size::new(width, height))
                    .map_err(|e| ErrorReason::from(&e));
                consumer.post(move || on_result(result));
            },
            |on_result| {
                self.consumer.post(move || on_result(Err(ErrorReason::Failure)));
            },
        );
    }

    /// Stop preview; the current stream ends
    ///
    /// Stopping while idle is a no-op. A capture in flight must finish first.
    pub fn stop_preview(&self) -> CameraResult<()> {
        self.call(|session| session.stop_preview())
    }

    /// Run an autofocus scan
    ///
    /// A second call while one is outstanding cancels the first, which
    /// receives `CANCELLED`.
    pub fn auto_focus<F>(&self, on_result: F)
    where
        F: FnOnce(Result<(), ErrorReason>) + Send + 'static,
    {
        let responder: Responder = Box::new(move |result| on_result(result.map(|_| ())));
        self.run_one_shot(responder, |session, responder| session.auto_focus(responder));
    }

    /// Capture a still image
    pub fn take_picture<F>(&self, request: PictureRequest, on_result: F)
    where
        F: FnOnce(Result<ImageBlob, ErrorReason>) + Send + 'static,
    {
        let responder: Responder = Box::new(move |result| {
            on_result(result.and_then(|completion| match completion {
                Completion::Picture(blob) => Ok(blob),
                _ => Err(ErrorReason::Failure),
            }))
        });
        self.run_one_shot(responder, move |session, responder| {
            session.take_picture(request, responder)
        });
    }

    /// Configure the hardware for recording at the given size
    pub fn start_recording<F>(&self, width: u32, height: u32, on_result: F)
    where
        F: FnOnce(Result<(), ErrorReason>) + Send + 'static,
    {
        let responder: Responder = Box::new(move |result| on_result(result.map(|_| ())));
        self.run_one_shot(responder, move |session, responder| {
            session.start_recording(Size::new(width, height), responder)
        });
    }

    /// Leave recording mode
    pub fn stop_recording(&self) -> CameraResult<()> {
        self.call(|session| session.stop_recording())
    }

    /// Read a cached parameter; no hardware round trip
    pub fn get_parameter(&self, key: ParameterKey) -> CameraResult<Option<ParameterValue>> {
        self.ensure_live()?;
        self.shared.state().params.get(key)
    }

    /// Change a parameter and push it to the hardware
    ///
    /// The preview size is owned by [`get_preview_stream`](Self::get_preview_stream).
    pub fn set_parameter(&self, key: ParameterKey, value: ParameterValue) -> CameraResult<()> {
        if key == ParameterKey::PreviewSize {
            return Err(CameraError::InvalidArgument(
                "preview size is negotiated by get_preview_stream".to_string(),
            ));
        }
        self.call(move |session| session.set_parameter(key, value))
    }

    /// Copy of every cached native parameter
    pub fn parameters(&self) -> CameraResult<HalParameters> {
        self.ensure_live()?;
        Ok(self.shared.parameters())
    }

    /// Release the hardware.
    ///
    /// Outstanding one-shot callbacks receive `CANCELLED`, the preview stream
    /// ends and no driver callbacks are delivered afterwards. Releasing twice
    /// is harmless.
    pub fn release(&self) {
        let Some(handle) = self.shared.begin_release() else {
            return;
        };
        let registry = Arc::clone(&self.shared.registry);
        if !self.shared.dispatcher.dispatch(move || {
            registry.release(handle);
        }) {
            // Queue already closed by a superseding acquire; hardware is gone.
            debug!(session = %self.shared.id, "Release after hardware was superseded");
        }
        self.shared.dispatcher.shutdown();
        info!(session = %self.shared.id, "Camera session released");
    }

    fn ensure_live(&self) -> CameraResult<()> {
        if self.shared.is_live() {
            Ok(())
        } else {
            Err(CameraError::NoSuchSession)
        }
    }

    /// Queue a one-shot job; a closed session answers `FAILURE`
    fn run_one_shot<J>(&self, responder: Responder, job: J)
    where
        J: FnOnce(&SessionShared, Responder) + Send + 'static,
    {
        self.queue_with_callback(responder, job, |responder| {
            self.shared.reject(responder, ErrorReason::Failure);
        });
    }

    /// Queue a job that owns a caller callback.
    ///
    /// If the dispatcher no longer accepts work the callback is handed to
    /// `on_closed` instead, so every caller hears back exactly once.
    fn queue_with_callback<C, J>(&self, callback: C, job: J, on_closed: impl FnOnce(C))
    where
        C: Send + 'static,
        J: FnOnce(&SessionShared, C) + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Some(callback)));
        let job_slot = Arc::clone(&slot);
        let session = Arc::clone(&self.shared);
        let queued = self.shared.dispatcher.dispatch(move || {
            let callback = job_slot.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(callback) = callback {
                job(&session, callback);
            }
        });
        if !queued {
            debug!(session = %self.shared.id, "Operation on a closed session");
            let callback = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(callback) = callback {
                on_closed(callback);
            }
        }
    }

    /// Run a synchronous job on the dispatcher
    fn call<R, J>(&self, job: J) -> CameraResult<R>
    where
        R: Send + 'static,
        J: FnOnce(&SessionShared) -> CameraResult<R> + Send + 'static,
    {
        self.ensure_live()?;
        let session = Arc::clone(&self.shared);
        self.shared
            .dispatcher
            .call(move || job(&session))
            .unwrap_or(Err(CameraError::NoSuchSession))
    }
}

impl Drop for CameraControl {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CameraControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraControl")
            .field("session", &self.shared.id)
            .field("camera", &self.shared.camera_index)
            .field("state", &self.state())
            .finish()
    }
}
