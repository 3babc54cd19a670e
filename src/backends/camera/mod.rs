// SPDX-License-Identifier: GPL-3.0-only

//! Camera hardware abstraction
//!
//! This module defines the capability interface the control layer drives and
//! the registry that keeps one live session per physical camera.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   CameraControl     │
//! └──────────┬──────────┘
//!            │  (dispatcher thread)
//!            ▼
//! ┌──────────────────────────┐
//! │ HardwareSessionRegistry  │  ← generation-tagged handles
//! └──────────┬───────────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐        ┌──────────────────┐
//! │   CameraHal trait   │ ─────▶ │   HalListener    │  (driver thread)
//! └──────────┬──────────┘        └──────────────────┘
//!            │
//!            ▼
//!       ┌─────────┐
//!       │ Virtual │  ← Concrete implementation
//!       └─────────┘
//! ```

pub mod frame_loop;
pub mod registry;
pub mod types;
pub mod virtual_hal;

pub use registry::{HardwareHandle, HardwareSessionRegistry, SessionRef};
pub use types::*;
pub use virtual_hal::{VirtualHal, VirtualHalFactory, VirtualHalOptions};

use crate::errors::HalResult;
use std::sync::Arc;

/// Receiver for asynchronous driver callbacks
///
/// Called on the HAL's own driver thread, never on the dispatcher thread.
/// Implementations must not block.
pub trait HalListener: Send + Sync {
    /// Data callback (preview frames, compressed images)
    fn on_data(&self, message: DataMessage);

    /// Notify callback (focus, shutter, errors)
    fn on_notify(&self, message: NotifyMessage);
}

/// Primitive operations of one opened camera device
///
/// The device cannot handle concurrent calls; the control layer guarantees
/// every method is invoked from a single session dispatcher thread at a time.
pub trait CameraHal: Send {
    // ===== Lifecycle =====

    /// Open the device and register the callback listener
    fn open(&mut self, camera_index: u32, listener: Arc<dyn HalListener>) -> HalResult<()>;

    /// Close the device; no callbacks may be delivered after this returns
    fn close(&mut self);

    /// Choose which message classes reach the listener
    fn set_message_mask(&mut self, mask: MessageMask);

    // ===== Preview =====

    /// Start streaming preview frames at the current preview-size parameter
    fn start_preview(&mut self) -> HalResult<()>;

    /// Stop streaming preview frames
    fn stop_preview(&mut self);

    /// Check if preview frames are currently flowing
    fn preview_enabled(&self) -> bool;

    // ===== One-shot operations =====

    /// Start an autofocus scan; completion arrives as `NotifyMessage::Focus`
    fn auto_focus(&mut self, ticket: Ticket) -> HalResult<()>;

    /// Abort a running autofocus scan (no completion is reported for it)
    fn cancel_auto_focus(&mut self);

    /// Start a still capture; completion arrives as `DataMessage::CompressedImage`
    fn take_picture(&mut self, ticket: Ticket) -> HalResult<()>;

    /// Abort a running still capture
    fn cancel_take_picture(&mut self);

    // ===== Parameters =====

    /// Apply a full parameter set
    fn push_parameters(&mut self, params: &HalParameters) -> HalResult<()>;

    /// Read back the full parameter set
    fn pull_parameters(&mut self) -> HalResult<HalParameters>;

    /// Preview sizes the sensor can stream
    fn supported_preview_sizes(&self) -> Vec<Size>;
}

/// Produces HAL instances for a registry
///
/// Selected once when the registry is built, so every session of a registry
/// talks to the same kind of hardware.
pub trait HalFactory: Send + Sync {
    /// Create an unopened HAL instance for a camera
    fn create(&self, camera_index: u32) -> HalResult<Box<dyn CameraHal>>;

    /// Number of cameras this factory can open
    fn camera_count(&self) -> u32;

    /// Get the backend type identifier
    fn backend_type(&self) -> HalBackendType;
}

/// Get the factory for a backend type
pub fn factory_for(
    backend_type: HalBackendType,
    options: VirtualHalOptions,
) -> Arc<dyn HalFactory> {
    match backend_type {
        HalBackendType::Virtual => Arc::new(VirtualHalFactory::new(options)),
    }
}
