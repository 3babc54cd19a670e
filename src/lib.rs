// SPDX-License-Identifier: GPL-3.0-only

//! Camera Control - session management for a single-access camera device
//!
//! This library lets several clients share one camera whose hardware layer
//! accepts a single caller at a time. It covers session ownership, preview
//! streaming with frame dropping, autofocus, still capture and the camera's
//! textual parameter set.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Hardware abstraction, session registry and the virtual camera
//! - [`control`]: Session facade, state machine, dispatcher and parameters
//! - [`media`]: Frame normalization and the preview pipeline
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! let factory = factory_for(HalBackendType::Virtual, VirtualHalOptions::default());
//! let registry = Arc::new(HardwareSessionRegistry::new(factory));
//! let consumer = ConsumerLoop::new();
//! let control = CameraControl::open(
//!     registry,
//!     CameraSelector::Back,
//!     SessionOptions::default(),
//!     consumer.handle(),
//! )?;
//! control.get_preview_stream(640, 480, |stream| { /* ... */ });
//! consumer.run_for(Duration::from_millis(100));
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod control;
pub mod errors;
pub mod media;

// Re-export commonly used types
pub use backends::camera::{CameraSelector, HardwareSessionRegistry, Size};
pub use config::Config;
pub use control::{CameraControl, CameraState, ConsumerLoop, PictureRequest, SessionOptions};
pub use errors::{CameraError, CameraResult, ErrorReason};
