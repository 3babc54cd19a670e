// SPDX-License-Identifier: GPL-3.0-only

//! Session core shared by the facade, the dispatcher jobs and the driver
//! listener
//!
//! Lock discipline:
//! - `monitor` guards the mutable session state and is never held across a
//!   HAL call
//! - `preview` guards the frame pipeline and is never taken while `monitor`
//!   is held
//! - HAL calls go through [`SessionShared::with_hal`], which looks the handle
//!   up in the registry first and treats a miss as "session gone"

use super::callbacks::{
    Completion, ImageBlob, Installed, OperationKind, Responder, ResultCallbackRouter,
};
use super::dispatcher::CommandDispatcher;
use super::parameters::{ParameterKey, ParameterStore, ParameterValue};
use super::state::{CameraState, CameraStateMachine, StateEvent};
use super::{GeoPosition, PictureRequest};
use crate::backends::camera::registry::negotiate_preview_size;
use crate::backends::camera::{
    CameraHal, DataMessage, FrameBuffer, HalListener, HalParameters, HardwareHandle,
    HardwareSessionRegistry, NotifyMessage, PixelFormat, Rotation, Size,
};
use crate::constants::picture::{DEFAULT_FILE_FORMAT, JPEG_MIME_TYPE};
use crate::errors::{CameraError, CameraResult, ErrorReason};
use crate::media::{
    FrameOutcome, PipelineStats, PreviewPipeline, PreviewStream, preview_channel,
};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Mutable session state guarded by the session monitor
pub(crate) struct SessionState {
    pub handle: Option<HardwareHandle>,
    pub machine: CameraStateMachine,
    pub requested_preview: Size,
    pub actual_preview: Size,
    pub framerate: u32,
    pub native_format: PixelFormat,
    pub router: ResultCallbackRouter,
    pub params: ParameterStore,
    pub recording: bool,
}

impl SessionState {
    pub fn format_is_canonical(&self) -> bool {
        self.native_format.is_canonical()
    }
}

/// Everything one open camera session owns
pub(crate) struct SessionShared {
    pub id: Uuid,
    pub camera_index: u32,
    pub registry: Arc<HardwareSessionRegistry>,
    pub dispatcher: CommandDispatcher,
    pub buffer_frames: usize,
    monitor: Mutex<SessionState>,
    preview: Mutex<PreviewPipeline>,
}

impl SessionShared {
    pub fn new(
        camera_index: u32,
        registry: Arc<HardwareSessionRegistry>,
        dispatcher: CommandDispatcher,
        buffer_frames: usize,
        state: SessionState,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            camera_index,
            registry,
            dispatcher,
            buffer_frames,
            monitor: Mutex::new(state),
            preview: Mutex::new(PreviewPipeline::new()),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, SessionState> {
        self.monitor.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pipeline(&self) -> MutexGuard<'_, PreviewPipeline> {
        self.preview.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn preview_stats(&self) -> PipelineStats {
        self.pipeline().stats()
    }

    /// Copy of the cached native parameter set
    pub fn parameters(&self) -> HalParameters {
        self.state().params.snapshot().clone()
    }

    /// Whether this session still owns live hardware
    pub fn is_live(&self) -> bool {
        let state = self.state();
        !state.machine.state().is_closing()
            && state.handle.is_some_and(|h| self.registry.is_live(h))
    }

    /// Run a closure against the live HAL, or `None` if the session is gone
    pub fn with_hal<R>(&self, f: impl FnOnce(&mut dyn CameraHal) -> R) -> Option<R> {
        let handle = {
            let state = self.state();
            if state.machine.state().is_closing() {
                return None;
            }
            state.handle?
        };
        let session = self.registry.lookup(handle)?;
        let mut hal = session.lock().unwrap_or_else(|e| e.into_inner());
        Some(f(hal.as_mut()))
    }

    /// Answer a callback that never got a slot
    pub fn reject(&self, responder: Responder, reason: ErrorReason) {
        self.state().router.reject(responder, reason);
    }

    // ===== Dispatcher jobs =====

    /// Acquire hardware and pull the initial parameter set
    pub fn open_hardware(self: &Arc<Self>) -> CameraResult<HardwareHandle> {
        let (requested, framerate) = {
            let state = self.state();
            (state.requested_preview, state.framerate)
        };

        let weak = Arc::downgrade(self);
        let hook_weak = Weak::clone(&weak);
        let handle = self.registry.acquire(
            self.camera_index,
            requested,
            framerate,
            move |handle| Arc::new(SessionListener { session: weak, handle }),
            Box::new(move || {
                if let Some(session) = hook_weak.upgrade() {
                    session.on_hardware_released();
                }
            }),
        )?;
        self.state().handle = Some(handle);

        // A miss here means another open took the camera meanwhile.
        let pulled = self
            .with_hal(|hal| hal.pull_parameters())
            .ok_or(CameraError::OperationCancelled)??;
        let mut state = self.state();
        state.native_format = pulled
            .get(ParameterKey::PreviewFormat.native_name())
            .and_then(PixelFormat::from_native_name)
            .unwrap_or(PixelFormat::NV21);
        if let Some(size) = pulled
            .get(ParameterKey::PreviewSize.native_name())
            .and_then(Size::parse)
        {
            state.actual_preview = size;
        }
        state.params.replace_from(pulled);
        info!(
            session = %self.id,
            handle = %handle,
            preview = %state.actual_preview,
            format = ?state.native_format,
            canonical = state.format_is_canonical(),
            "Camera session opened"
        );
        Ok(handle)
    }

    /// Negotiate the preview size, start streaming and hand out a stream
    pub fn start_preview_stream(&self, requested: Size) -> CameraResult<PreviewStream> {
        if self.state().machine.state() == CameraState::TakingPicture {
            return Err(CameraError::Unexpected(
                "preview cannot be reconfigured during a capture".to_string(),
            ));
        }

        let supported = self
            .with_hal(|hal| hal.supported_preview_sizes())
            .ok_or(CameraError::NoSuchSession)?;
        let size = negotiate_preview_size(requested, &supported).ok_or_else(|| {
            CameraError::HardwareUnavailable("sensor reports no preview sizes".to_string())
        })?;

        let (framerate, resize) = {
            let mut state = self.state();
            state.requested_preview = requested;
            let resize = state.actual_preview != size;
            let framerate = state.framerate;
            state.params.set(ParameterKey::PreviewSize, ParameterValue::Size(size))?;
            if framerate > 0 {
                state.params.set(
                    ParameterKey::PreviewFrameRate,
                    ParameterValue::Int(framerate as i64),
                )?;
            }
            (framerate, resize)
        };

        // The sensor only accepts a new size while stopped.
        if resize {
            self.with_hal(|hal| hal.stop_preview())
                .ok_or(CameraError::NoSuchSession)?;
        }
        self.flush_parameters()?;

        let (track, stream) = preview_channel(size, self.buffer_frames);
        self.pipeline().attach(Box::new(track), size);

        let started = self
            .with_hal(|hal| {
                if hal.preview_enabled() {
                    Ok(())
                } else {
                    hal.start_preview()
                }
            })
            .ok_or(CameraError::NoSuchSession)?;
        if let Err(e) = started {
            self.pipeline().detach();
            return Err(e.into());
        }

        let mut state = self.state();
        state.actual_preview = size;
        let new_state = state.machine.transition(StateEvent::PreviewStarted)?;
        info!(
            session = %self.id,
            requested = %requested,
            actual = %size,
            framerate,
            state = %new_state,
            "Preview stream started"
        );
        Ok(stream)
    }

    /// Start an autofocus scan for an installed request
    pub fn auto_focus(&self, responder: Responder) {
        let Some(installed) = self.install(OperationKind::AutoFocus, responder) else {
            return;
        };

        let result = self.with_hal(|hal| {
            if installed.superseded {
                hal.cancel_auto_focus();
            }
            hal.auto_focus(installed.epoch)
        });
        match result {
            Some(Ok(())) => {
                debug!(session = %self.id, epoch = installed.epoch, "Autofocus started");
            }
            Some(Err(e)) => {
                warn!(session = %self.id, error = %e, "Autofocus failed to start");
                let reason = ErrorReason::from(CameraError::from(e));
                self.complete(OperationKind::AutoFocus, installed.epoch, Err(reason));
            }
            None => {
                let reason = ErrorReason::Failure;
                self.complete(OperationKind::AutoFocus, installed.epoch, Err(reason));
            }
        }
    }

    /// Configure and trigger a still capture for an installed request
    pub fn take_picture(&self, request: PictureRequest, responder: Responder) {
        let current = self.state().machine.state();
        if !matches!(
            current,
            CameraState::Preview | CameraState::PreviewPaused | CameraState::TakingPicture
        ) {
            debug!(session = %self.id, state = %current, "Take picture rejected");
            self.reject(responder, ErrorReason::Failure);
            return;
        }

        let Some(installed) = self.install(OperationKind::TakePicture, responder) else {
            return;
        };
        if installed.superseded {
            self.with_hal(|hal| hal.cancel_take_picture());
        }

        let configured = self
            .apply_picture_parameters(&request)
            .and_then(|()| self.flush_parameters());
        if let Err(e) = configured {
            warn!(session = %self.id, error = %e, "Picture configuration failed");
            let reason = ErrorReason::from(&e);
            self.complete(OperationKind::TakePicture, installed.epoch, Err(reason));
            return;
        }

        let requested = self.state().machine.transition(StateEvent::PictureRequested);
        if let Err(e) = requested {
            warn!(session = %self.id, error = %e, "Take picture raced a state change");
            let reason = ErrorReason::Failure;
            self.complete(OperationKind::TakePicture, installed.epoch, Err(reason));
            return;
        }

        match self.with_hal(|hal| hal.take_picture(installed.epoch)) {
            Some(Ok(())) => info!(
                session = %self.id,
                epoch = installed.epoch,
                size = ?request.size(),
                rotation = %Rotation::nearest(request.rotation_degrees),
                "Picture requested"
            ),
            other => {
                let reason = match other {
                    Some(Err(e)) => {
                        warn!(session = %self.id, error = %e, "Take picture failed to start");
                        ErrorReason::from(CameraError::from(e))
                    }
                    _ => ErrorReason::Failure,
                };
                let _ = self.state().machine.transition(StateEvent::PictureFailed);
                self.complete(OperationKind::TakePicture, installed.epoch, Err(reason));
            }
        }
    }

    /// Stop streaming and end the consumer's stream
    pub fn stop_preview(&self) -> CameraResult<()> {
        {
            let mut state = self.state();
            match state.machine.state() {
                CameraState::Closed => return Ok(()),
                CameraState::TakingPicture => {
                    return Err(CameraError::Unexpected(
                        "preview cannot stop during a capture".to_string(),
                    ));
                }
                _ => {}
            }
            state.machine.transition(StateEvent::PreviewStopped)?;
        }
        self.pipeline().detach();
        self.with_hal(|hal| hal.stop_preview())
            .ok_or(CameraError::NoSuchSession)?;
        info!(session = %self.id, "Preview stream stopped");
        Ok(())
    }

    /// Enable the recording hint and report the recording as started
    pub fn start_recording(&self, size: Size, responder: Responder) {
        if self.state().recording {
            debug!(session = %self.id, "Already recording");
            self.reject(responder, ErrorReason::Failure);
            return;
        }
        let Some(installed) = self.install(OperationKind::StartRecording, responder) else {
            return;
        };

        let configured = {
            let mut state = self.state();
            state.params.begin_batch();
            let video = if size.width > 0 && size.height > 0 {
                state
                    .params
                    .set(ParameterKey::VideoSize, ParameterValue::Size(size))
                    .map(|_| ())
            } else {
                Ok(())
            };
            let hint = state
                .params
                .set(ParameterKey::RecordingHint, ParameterValue::Text("true".to_string()));
            state.params.end_batch();
            video.and(hint.map(|_| ()))
        }
        .and_then(|()| self.flush_parameters());

        match configured {
            Ok(()) => {
                self.state().recording = true;
                info!(session = %self.id, size = %size, "Recording started");
                self.complete(
                    OperationKind::StartRecording,
                    installed.epoch,
                    Ok(Completion::RecordingStarted),
                );
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, "Start recording failed");
                let reason = ErrorReason::from(&e);
                self.complete(OperationKind::StartRecording, installed.epoch, Err(reason));
            }
        }
    }

    /// Clear the recording hint
    pub fn stop_recording(&self) -> CameraResult<()> {
        {
            let mut state = self.state();
            if !state.recording {
                return Ok(());
            }
            state.recording = false;
            state
                .params
                .set(ParameterKey::RecordingHint, ParameterValue::Text("false".to_string()))?;
        }
        info!(session = %self.id, "Recording stopped");
        self.flush_parameters()
    }

    /// Update one cached parameter and push it unless a batch is open
    pub fn set_parameter(&self, key: ParameterKey, value: ParameterValue) -> CameraResult<()> {
        let push = self.state().params.set(key, value)?;
        if push { self.flush_parameters() } else { Ok(()) }
    }

    /// Push pending parameter changes; a no-op when nothing changed
    pub fn flush_parameters(&self) -> CameraResult<()> {
        let Some(pending) = self.state().params.take_dirty() else {
            return Ok(());
        };
        let pushed = self
            .with_hal(|hal| {
                hal.push_parameters(&pending)?;
                hal.pull_parameters()
            })
            .ok_or(CameraError::NoSuchSession)?;

        match pushed {
            Ok(refreshed) => {
                debug!(session = %self.id, count = pending.len(), "Parameters pushed");
                self.state().params.replace_from(refreshed);
                Ok(())
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, "Parameter push rejected, resyncing");
                self.resync_parameters();
                Err(e.into())
            }
        }
    }

    /// Restart streaming after a capture stopped it
    pub fn restart_preview(&self) {
        if !self.pipeline().has_sink() {
            return;
        }
        match self.with_hal(|hal| {
            if hal.preview_enabled() {
                Ok(())
            } else {
                hal.start_preview()
            }
        }) {
            Some(Ok(())) => debug!(session = %self.id, "Preview restarted after capture"),
            Some(Err(e)) => warn!(session = %self.id, error = %e, "Preview restart failed"),
            None => {}
        }
    }

    /// Tear down on the consumer's request
    ///
    /// Returns the handle to release, or `None` if already closing.
    pub fn begin_release(&self) -> Option<HardwareHandle> {
        let handle = {
            let mut state = self.state();
            if state.machine.state().is_closing() {
                return None;
            }
            let _ = state.machine.transition(StateEvent::Release);
            let cancelled = state.router.cancel_all();
            info!(session = %self.id, cancelled, "Releasing camera session");
            state.handle
        };
        self.pipeline().detach();
        handle
    }

    /// The registry invalidated our handle (superseded or released)
    fn on_hardware_released(&self) {
        if self.begin_release().is_some() {
            info!(session = %self.id, "Hardware session superseded");
            self.dispatcher.close();
        }
    }

    // ===== Helpers =====

    fn install(&self, kind: OperationKind, responder: Responder) -> Option<Installed> {
        let mut state = self.state();
        if state.machine.state().is_closing() {
            state.router.reject(responder, ErrorReason::Failure);
            return None;
        }
        Some(state.router.install(kind, responder))
    }

    fn complete(&self, kind: OperationKind, epoch: u64, result: Result<Completion, ErrorReason>) {
        self.state().router.complete(kind, epoch, result);
    }

    fn apply_picture_parameters(&self, request: &PictureRequest) -> CameraResult<()> {
        let mut state = self.state();
        state.params.begin_batch();
        let result = fill_picture_batch(&mut state.params, request);
        state.params.end_batch();
        if result.is_err() {
            state.params.take_dirty();
            drop(state);
            // Partial edits are still cached; pull them back out.
            self.resync_parameters();
        }
        result
    }

    fn resync_parameters(&self) {
        if let Some(Ok(params)) = self.with_hal(|hal| hal.pull_parameters()) {
            self.state().params.replace_from(params);
        }
    }

    // ===== Driver callbacks =====

    fn on_preview_frame(&self, frame: FrameBuffer) {
        let accepts = {
            let mut state = self.state();
            if state.machine.state() == CameraState::PreviewPaused
                && let Ok(next) = state.machine.transition(StateEvent::FramesResumed)
            {
                debug!(
                    session = %self.id,
                    state = %next,
                    sequence = frame.sequence,
                    "Preview frames resumed"
                );
            }
            state.machine.state().accepts_frames()
        };
        if !accepts {
            return;
        }
        if self.pipeline().on_frame(frame) == FrameOutcome::NoSink {
            debug!(session = %self.id, "Preview frame without consumer");
        }
    }

    fn on_picture_data(self: &Arc<Self>, ticket: u64, data: Vec<u8>) {
        {
            let mut state = self.state();
            if !state.router.is_current(OperationKind::TakePicture, ticket) {
                debug!(session = %self.id, ticket, "Discarding image for stale capture");
                return;
            }
            if let Err(e) = state.machine.transition(StateEvent::PictureDataReceived) {
                warn!(session = %self.id, error = %e, "Image data in unexpected state");
            }
            let result = if data.is_empty() {
                Err(ErrorReason::Failure)
            } else {
                info!(session = %self.id, bytes = data.len(), "Picture captured");
                Ok(Completion::Picture(ImageBlob {
                    data,
                    mime_type: JPEG_MIME_TYPE,
                }))
            };
            state.router.complete(OperationKind::TakePicture, ticket, result);
        }
        self.queue_preview_restart();
    }

    fn on_picture_failed(self: &Arc<Self>, ticket: u64) {
        {
            let mut state = self.state();
            if !state.router.is_current(OperationKind::TakePicture, ticket) {
                return;
            }
            let _ = state.machine.transition(StateEvent::PictureFailed);
            state
                .router
                .complete(OperationKind::TakePicture, ticket, Err(ErrorReason::Failure));
        }
        warn!(session = %self.id, ticket, "Capture failed in hardware");
        self.queue_preview_restart();
    }

    fn on_focus(&self, ticket: u64, success: bool) {
        let result = if success {
            Ok(Completion::Focused)
        } else {
            Err(ErrorReason::Failure)
        };
        debug!(session = %self.id, ticket, success, "Autofocus finished");
        self.complete(OperationKind::AutoFocus, ticket, result);
    }

    fn on_driver_error(self: &Arc<Self>, code: i32) {
        warn!(session = %self.id, code, "Driver reported an error");
        let was_capturing = {
            let mut state = self.state();
            state
                .router
                .complete_outstanding(OperationKind::AutoFocus, Err(ErrorReason::Failure));
            let capturing = state
                .router
                .complete_outstanding(OperationKind::TakePicture, Err(ErrorReason::Failure));
            if state.machine.state() == CameraState::TakingPicture {
                let _ = state.machine.transition(StateEvent::PictureFailed);
            }
            capturing
        };
        if was_capturing {
            self.queue_preview_restart();
        }
    }

    fn queue_preview_restart(self: &Arc<Self>) {
        let session = Arc::clone(self);
        self.dispatcher.dispatch(move || session.restart_preview());
    }
}

/// Fill a deferred batch with the capture settings of one request
fn fill_picture_batch(params: &mut ParameterStore, request: &PictureRequest) -> CameraResult<()> {
    if let Some(size) = request.size() {
        params.set(ParameterKey::PictureSize, ParameterValue::Size(size))?;
    }
    let format = request
        .file_format
        .as_deref()
        .filter(|f| !f.is_empty())
        .unwrap_or(DEFAULT_FILE_FORMAT);
    params.set(ParameterKey::PictureFormat, ParameterValue::Text(format.to_string()))?;
    params.set(
        ParameterKey::Rotation,
        ParameterValue::Int(Rotation::nearest(request.rotation_degrees).degrees() as i64),
    )?;

    match &request.geo_position {
        Some(GeoPosition {
            latitude,
            longitude,
            altitude,
            timestamp,
        }) => {
            params.set(ParameterKey::GpsLatitude, ParameterValue::Double(*latitude))?;
            params.set(ParameterKey::GpsLongitude, ParameterValue::Double(*longitude))?;
            params.set(ParameterKey::GpsAltitude, ParameterValue::Double(*altitude))?;
            params.set(ParameterKey::GpsTimestamp, ParameterValue::Int(*timestamp))?;
        }
        None => {
            for key in [
                ParameterKey::GpsLatitude,
                ParameterKey::GpsLongitude,
                ParameterKey::GpsAltitude,
                ParameterKey::GpsTimestamp,
            ] {
                params.clear(key);
            }
        }
    }
    Ok(())
}

/// Receives driver callbacks on behalf of one hardware handle
struct SessionListener {
    session: Weak<SessionShared>,
    handle: HardwareHandle,
}

impl SessionListener {
    /// The session, if it is alive and still owns this handle
    fn live_session(&self) -> Option<Arc<SessionShared>> {
        let session = self.session.upgrade()?;
        if !session.registry.is_live(self.handle) {
            debug!(handle = %self.handle, "Callback for stale handle ignored");
            return None;
        }
        if session.state().machine.state().is_closing() {
            return None;
        }
        Some(session)
    }
}

impl HalListener for SessionListener {
    fn on_data(&self, message: DataMessage) {
        let Some(session) = self.live_session() else {
            return;
        };
        match message {
            DataMessage::PreviewFrame(frame) => session.on_preview_frame(frame),
            DataMessage::CompressedImage { ticket, data } => session.on_picture_data(ticket, data),
        }
    }

    fn on_notify(&self, message: NotifyMessage) {
        let Some(session) = self.live_session() else {
            return;
        };
        match message {
            NotifyMessage::Focus { ticket, success } => session.on_focus(ticket, success),
            NotifyMessage::Shutter { ticket } => {
                debug!(session = %session.id, ticket, "Shutter");
            }
            NotifyMessage::PictureFailed { ticket } => session.on_picture_failed(ticket),
            NotifyMessage::Error { code } => session.on_driver_error(code),
        }
    }
}
