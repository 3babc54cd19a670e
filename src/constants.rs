// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Region coordinate space and defaults
pub mod regions {
    /// Smallest coordinate a region edge may take
    pub const COORD_MIN: i32 = -1000;

    /// Largest coordinate a region edge may take
    pub const COORD_MAX: i32 = 1000;

    /// Smallest accepted region weight
    pub const WEIGHT_MIN: u32 = 1;

    /// Largest accepted region weight
    pub const WEIGHT_MAX: u32 = 1000;

    /// Native encoding of an empty region list ("revert to automatic")
    pub const AUTOMATIC_SENTINEL: &str = "(0,0,0,0,0)";
}

/// Preview defaults
pub mod preview {
    /// Preview width used when nothing is configured
    pub const DEFAULT_WIDTH: u32 = 640;

    /// Preview height used when nothing is configured
    pub const DEFAULT_HEIGHT: u32 = 480;

    /// Preview frame rate used when nothing is configured
    pub const DEFAULT_FRAMERATE: u32 = 30;

    /// Frames the consumer track may hold before the pipeline starts dropping
    pub const DEFAULT_BUFFER_FRAMES: usize = 4;
}

/// Picture defaults
pub mod picture {
    /// File format requested when the caller gives none
    pub const DEFAULT_FILE_FORMAT: &str = "jpeg";

    /// JPEG quality pushed with every capture
    pub const DEFAULT_JPEG_QUALITY: u8 = 90;

    /// MIME type of a JPEG blob
    pub const JPEG_MIME_TYPE: &str = "image/jpeg";
}

/// Logging cadence
pub mod timing {
    use std::time::Duration;

    /// Log frame counters every N frames
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// Granularity of the virtual driver loop
    pub const DRIVER_TICK: Duration = Duration::from_millis(2);
}

/// Virtual camera defaults
pub mod virtual_camera {
    use std::time::Duration;

    /// Cameras exposed (0 = back, 1 = front)
    pub const CAMERA_COUNT: u32 = 2;

    /// Preview sizes offered by the virtual sensor
    pub const PREVIEW_SIZES: &[(u32, u32)] = &[(352, 288), (640, 480), (1280, 720)];

    /// Picture sizes offered by the virtual sensor
    pub const PICTURE_SIZES: &[(u32, u32)] = &[(640, 480), (1280, 720), (1920, 1080)];

    /// Interval between generated preview frames
    pub const FRAME_INTERVAL: Duration = Duration::from_millis(33);

    /// Delay before an autofocus completes
    pub const FOCUS_DELAY: Duration = Duration::from_millis(20);

    /// Delay between take-picture and image data
    pub const CAPTURE_DELAY: Duration = Duration::from_millis(40);

    /// Focus areas the virtual sensor accepts
    pub const MAX_FOCUS_AREAS: u32 = 1;

    /// Metering areas the virtual sensor accepts
    pub const MAX_METERING_AREAS: u32 = 4;
}

/// Dispatcher thread naming
pub mod dispatcher {
    /// Prefix of the per-session command thread name
    pub const THREAD_NAME_PREFIX: &str = "camera-cmd";
}

/// How long the CLI waits for a one-shot result
pub const CLI_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);
