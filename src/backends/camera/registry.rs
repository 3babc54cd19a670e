// SPDX-License-Identifier: GPL-3.0-only

//! Hardware session registry
//!
//! The registry provides:
//! - One live hardware session per physical camera
//! - Generation-tagged handles so stale holders fail lookups instead of
//!   reaching a device that now belongs to someone else
//! - Thread-safe access to the opened HAL

use super::types::{HalParameters, MessageMask, Size};
use super::{CameraHal, HalFactory, HalListener};
use crate::errors::{CameraError, CameraResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Shared reference to an opened HAL
///
/// Only obtainable through [`HardwareSessionRegistry::lookup`], so every
/// hardware call is preceded by a generation check.
pub type SessionRef = Arc<Mutex<Box<dyn CameraHal>>>;

/// Hook run once when a session's handle is invalidated
pub type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Opaque handle to a live hardware session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareHandle {
    camera_index: u32,
    generation: u64,
}

impl HardwareHandle {
    /// Camera this handle was issued for
    pub fn camera_index(&self) -> u32 {
        self.camera_index
    }

    /// Generation tag of this handle
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Display for HardwareHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "camera{}#{}", self.camera_index, self.generation)
    }
}

/// Registry entry for the live session of one camera
struct LiveSession {
    generation: u64,
    hal: SessionRef,
    on_release: Option<ReleaseHook>,
}

/// Pick the supported preview size closest to a request.
///
/// With both dimensions given, sizes at least as large as the request win and
/// the smallest area difference among them is chosen; if nothing is large
/// enough the largest size is used. A zero dimension means "don't care":
/// the other dimension is matched alone. Returns `None` only when `supported`
/// is empty.
pub fn negotiate_preview_size(requested: Size, supported: &[Size]) -> Option<Size> {
    let first = *supported.first()?;

    let chosen = match (requested.width, requested.height) {
        (0, 0) => first,
        (w, 0) => *supported.iter().min_by_key(|s| s.width.abs_diff(w))?,
        (0, h) => *supported.iter().min_by_key(|s| s.height.abs_diff(h))?,
        _ => {
            let target = requested.area();
            supported
                .iter()
                .filter(|s| s.area() >= target)
                .min_by_key(|s| s.area() - target)
                .or_else(|| supported.iter().max_by_key(|s| s.area()))
                .copied()?
        }
    };

    Some(chosen)
}

/// Registry of live hardware sessions
///
/// Thread-safe and intended to be shared behind an `Arc`.
pub struct HardwareSessionRegistry {
    factory: Arc<dyn HalFactory>,
    next_generation: AtomicU64,
    live: Mutex<HashMap<u32, LiveSession>>,
}

impl HardwareSessionRegistry {
    /// Create a registry that opens hardware through `factory`
    pub fn new(factory: Arc<dyn HalFactory>) -> Self {
        info!(backend = %factory.backend_type(), "Creating hardware session registry");
        Self {
            factory,
            next_generation: AtomicU64::new(1),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cameras the underlying factory exposes
    pub fn camera_count(&self) -> u32 {
        self.factory.camera_count()
    }

    /// Open (or replace) the session for a camera.
    ///
    /// Any live session for the same camera is released first. The listener
    /// is built from the new handle so callbacks can be checked against it.
    /// The requested preview size is negotiated against the sensor and pushed
    /// together with the frame rate before the handle is returned.
    ///
    /// # Errors
    /// `HardwareUnavailable` when the device cannot be created or opened.
    pub fn acquire<L>(
        &self,
        camera_index: u32,
        requested: Size,
        framerate: u32,
        make_listener: L,
        on_release: ReleaseHook,
    ) -> CameraResult<HardwareHandle>
    where
        L: FnOnce(HardwareHandle) -> Arc<dyn HalListener>,
    {
        let prior = self
            .lock_live()
            .get(&camera_index)
            .map(|s| HardwareHandle {
                camera_index,
                generation: s.generation,
            });
        if let Some(prior) = prior {
            info!(handle = %prior, "Releasing prior session before acquire");
            self.release(prior);
        }

        let handle = HardwareHandle {
            camera_index,
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
        };

        let mut hal = self.factory.create(camera_index).map_err(|e| {
            CameraError::HardwareUnavailable(format!("create camera {}: {}", camera_index, e))
        })?;

        hal.open(camera_index, make_listener(handle)).map_err(|e| {
            CameraError::HardwareUnavailable(format!("open camera {}: {}", camera_index, e))
        })?;

        if let Err(e) = apply_initial_preview(hal.as_mut(), requested, framerate) {
            warn!(handle = %handle, error = %e, "Initial preview configuration failed");
            hal.close();
            return Err(CameraError::HardwareUnavailable(format!(
                "configure camera {}: {}",
                camera_index, e
            )));
        }
        hal.set_message_mask(MessageMask::ALL);

        let session = LiveSession {
            generation: handle.generation,
            hal: Arc::new(Mutex::new(hal)),
            on_release: Some(on_release),
        };

        // A racing acquire for the same camera may have landed meanwhile;
        // the later insert wins and the displaced session is torn down.
        let displaced = self.lock_live().insert(camera_index, session);
        if let Some(displaced) = displaced {
            warn!(camera = camera_index, "Concurrent acquire displaced a session");
            teardown(displaced);
        }

        info!(handle = %handle, requested = %requested, framerate, "Hardware session acquired");
        Ok(handle)
    }

    /// Invalidate a handle and tear down its hardware.
    ///
    /// Returns `false` when the handle was already stale; releasing twice is
    /// harmless.
    pub fn release(&self, handle: HardwareHandle) -> bool {
        let session = {
            let mut live = self.lock_live();
            match live.get(&handle.camera_index) {
                Some(s) if s.generation == handle.generation => live.remove(&handle.camera_index),
                _ => None,
            }
        };

        match session {
            Some(session) => {
                info!(handle = %handle, "Releasing hardware session");
                teardown(session);
                true
            }
            None => {
                debug!(handle = %handle, "Release of stale handle ignored");
                false
            }
        }
    }

    /// Resolve a handle to its HAL, or `None` if the handle is stale
    pub fn lookup(&self, handle: HardwareHandle) -> Option<SessionRef> {
        self.lock_live()
            .get(&handle.camera_index)
            .filter(|s| s.generation == handle.generation)
            .map(|s| Arc::clone(&s.hal))
    }

    /// Check whether a handle still refers to the live session
    pub fn is_live(&self, handle: HardwareHandle) -> bool {
        self.lock_live()
            .get(&handle.camera_index)
            .is_some_and(|s| s.generation == handle.generation)
    }

    /// Handle of the live session for a camera, if any
    pub fn live_handle(&self, camera_index: u32) -> Option<HardwareHandle> {
        self.lock_live()
            .get(&camera_index)
            .map(|s| HardwareHandle {
                camera_index,
                generation: s.generation,
            })
    }

    fn lock_live(&self) -> std::sync::MutexGuard<'_, HashMap<u32, LiveSession>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for HardwareSessionRegistry {
    fn drop(&mut self) {
        let sessions: Vec<LiveSession> = self.lock_live().drain().map(|(_, s)| s).collect();
        if !sessions.is_empty() {
            debug!(count = sessions.len(), "Registry dropped, releasing live sessions");
        }
        for session in sessions {
            teardown(session);
        }
    }
}

impl std::fmt::Debug for HardwareSessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let live: Vec<u32> = self.lock_live().keys().copied().collect();
        f.debug_struct("HardwareSessionRegistry")
            .field("backend", &self.factory.backend_type())
            .field("live_cameras", &live)
            .finish()
    }
}

/// Negotiate and push the preview size and frame rate of a freshly opened HAL
fn apply_initial_preview(
    hal: &mut dyn CameraHal,
    requested: Size,
    framerate: u32,
) -> crate::errors::HalResult<()> {
    let mut params: HalParameters = hal.pull_parameters()?;
    if let Some(size) = negotiate_preview_size(requested, &hal.supported_preview_sizes()) {
        params.set("preview-size", size.to_string());
    }
    if framerate > 0 {
        params.set("preview-frame-rate", framerate.to_string());
    }
    hal.push_parameters(&params)
}

/// Silence, stop and close a session's hardware, then notify its owner
fn teardown(mut session: LiveSession) {
    {
        let mut hal = session.hal.lock().unwrap_or_else(|e| e.into_inner());
        hal.set_message_mask(MessageMask::NONE);
        hal.stop_preview();
        hal.close();
    }
    if let Some(hook) = session.on_release.take() {
        hook();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes() -> Vec<Size> {
        vec![Size::new(352, 288), Size::new(640, 480), Size::new(1280, 720)]
    }

    #[test]
    fn test_negotiate_prefers_larger_closest() {
        assert_eq!(
            negotiate_preview_size(Size::new(480, 320), &sizes()),
            Some(Size::new(640, 480))
        );
    }

    #[test]
    fn test_negotiate_exact_match() {
        assert_eq!(
            negotiate_preview_size(Size::new(352, 288), &sizes()),
            Some(Size::new(352, 288))
        );
    }

    #[test]
    fn test_negotiate_too_large_falls_back_to_largest() {
        assert_eq!(
            negotiate_preview_size(Size::new(4000, 3000), &sizes()),
            Some(Size::new(1280, 720))
        );
    }

    #[test]
    fn test_negotiate_single_dimension() {
        assert_eq!(
            negotiate_preview_size(Size::new(600, 0), &sizes()),
            Some(Size::new(640, 480))
        );
        assert_eq!(
            negotiate_preview_size(Size::new(0, 700), &sizes()),
            Some(Size::new(1280, 720))
        );
        assert_eq!(
            negotiate_preview_size(Size::new(0, 0), &sizes()),
            Some(Size::new(352, 288))
        );
    }

    #[test]
    fn test_negotiate_empty() {
        assert_eq!(negotiate_preview_size(Size::new(640, 480), &[]), None);
    }
}
