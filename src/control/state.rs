// SPDX-License-Identifier: GPL-3.0-only

//! Session lifecycle state machine
//!
//! ```text
//!            PreviewStarted          PictureRequested
//!   Closed ─────────────────▶ Preview ──────────────▶ TakingPicture
//!                               ▲  ▲                     │      │
//!                FramesResumed  │  └── PictureFailed ────┘      │ PictureDataReceived
//!                               │                               ▼
//!                               └──────────────────────── PreviewPaused
//!
//!   PreviewPaused ── PictureRequested ──▶ TakingPicture
//!   Preview | PreviewPaused ── PreviewStopped ──▶ Closed
//!   any state ── Release ──▶ Closing (terminal)
//! ```

use crate::errors::TransitionError;

/// Lifecycle state of a camera session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CameraState {
    #[default]
    Closed,
    Preview,
    TakingPicture,
    PreviewPaused,
    Closing,
}

impl CameraState {
    /// Whether preview frames may be forwarded in this state
    pub fn accepts_frames(&self) -> bool {
        matches!(self, CameraState::Preview)
    }

    pub fn is_closing(&self) -> bool {
        matches!(self, CameraState::Closing)
    }
}

impl std::fmt::Display for CameraState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CameraState::Closed => "CLOSED",
            CameraState::Preview => "PREVIEW",
            CameraState::TakingPicture => "TAKING_PICTURE",
            CameraState::PreviewPaused => "PREVIEW_PAUSED",
            CameraState::Closing => "CLOSING",
        };
        f.write_str(name)
    }
}

/// Events that drive the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateEvent {
    /// Hardware preview started
    PreviewStarted,
    /// Hardware preview stopped by request
    PreviewStopped,
    /// A take-picture request was accepted
    PictureRequested,
    /// Image data for the capture arrived
    PictureDataReceived,
    /// The capture failed in hardware
    PictureFailed,
    /// The first preview frame after a capture arrived
    FramesResumed,
    /// The session is being released
    Release,
}

/// Tracks the state of one session and enforces legal transitions
#[derive(Debug, Clone, Default)]
pub struct CameraStateMachine {
    state: CameraState,
}

impl CameraStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    /// Apply an event, returning the new state.
    ///
    /// Illegal events leave the state untouched.
    pub fn transition(&mut self, event: StateEvent) -> Result<CameraState, TransitionError> {
        use CameraState::*;
        use StateEvent::*;

        let next = match (self.state, event) {
            (Closing, _) => None,
            (_, Release) => Some(Closing),
            (Closed | Preview, PreviewStarted) => Some(Preview),
            (PreviewPaused, PreviewStarted) => Some(PreviewPaused),
            (Preview | PreviewPaused, PreviewStopped) => Some(Closed),
            (Closed, PreviewStopped) => Some(Closed),
            (Preview | PreviewPaused | TakingPicture, PictureRequested) => Some(TakingPicture),
            (TakingPicture, PictureDataReceived) => Some(PreviewPaused),
            (TakingPicture, PictureFailed) => Some(Preview),
            (PreviewPaused, FramesResumed) => Some(Preview),
            _ => None,
        };

        match next {
            Some(next) => {
                self.state = next;
                Ok(next)
            }
            None => Err(TransitionError {
                from: self.state,
                event,
            }),
        }
    }
}
