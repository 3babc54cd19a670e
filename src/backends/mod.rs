// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for camera hardware
//!
//! # Architecture
//!
//! The backend layer abstracts hardware access, providing a consistent API
//! regardless of the underlying device:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                Control Layer                 │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌──────────────────┐  ┌────────────────┐   │
//! │  │ Session registry │  │   CameraHal    │   │
//! │  └──────────────────┘  │   (virtual)    │   │
//! │                        └────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: HAL trait, session registry and the virtual camera

pub mod camera;
