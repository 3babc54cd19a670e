// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera hardware backends

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Ticket echoed by the HAL when a one-shot request completes
///
/// The control layer uses the callback slot epoch as ticket so late results of
/// cancelled requests can be told apart from the current one.
pub type Ticket = u64;

/// HAL implementation selected when a registry is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HalBackendType {
    /// In-process simulated sensor
    #[default]
    Virtual,
}

impl std::fmt::Display for HalBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HalBackendType::Virtual => write!(f, "virtual"),
        }
    }
}

/// Which physical camera a session is opened against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraSelector {
    /// Rear-facing camera (index 0)
    Back,
    /// Front-facing camera (index 1)
    Front,
    /// Explicit hardware index
    Index(u32),
}

impl CameraSelector {
    /// Hardware index for this selector
    pub fn index(&self) -> u32 {
        match self {
            CameraSelector::Back => 0,
            CameraSelector::Front => 1,
            CameraSelector::Index(index) => *index,
        }
    }

    /// Parse "back", "front" or a decimal index
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "back" => Some(CameraSelector::Back),
            "front" => Some(CameraSelector::Front),
            other => other.parse::<u32>().ok().map(CameraSelector::Index),
        }
    }
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel count, widened so large sensors cannot overflow
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Parse the native "WxH" form
    pub fn parse(value: &str) -> Option<Self> {
        let (w, h) = value.trim().split_once('x')?;
        Some(Self::new(w.trim().parse().ok()?, h.trim().parse().ok()?))
    }

    /// Parse a comma separated list of "WxH" entries, skipping empty entries
    pub fn parse_list(value: &str) -> Option<Vec<Self>> {
        value
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Self::parse)
            .collect()
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Image rotation in degrees (clockwise)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Rotation {
    /// Round an arbitrary angle to the nearest quarter turn.
    ///
    /// Negative angles are normalised first, so -90 becomes 270.
    pub fn nearest(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            0..45 => Rotation::None,
            45..135 => Rotation::Rotate90,
            135..225 => Rotation::Rotate180,
            225..315 => Rotation::Rotate270,
            _ => Rotation::None,
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Rotate90 => 90,
            Rotation::Rotate180 => 180,
            Rotation::Rotate270 => 270,
        }
    }
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Pixel layout of a raw frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// I420 - Planar 4:2:0 (separate Y, U, V planes); the canonical layout
    I420,
    /// NV12 - Semi-planar 4:2:0 (Y plane + interleaved UV plane)
    NV12,
    /// NV21 - Semi-planar 4:2:0 (Y plane + interleaved VU plane)
    /// Default preview layout of most phone sensors
    NV21,
}

impl PixelFormat {
    /// Whether frames in this layout can be forwarded without conversion
    pub fn is_canonical(&self) -> bool {
        matches!(self, Self::I420)
    }

    /// Native preview-format name
    pub fn native_name(&self) -> &'static str {
        match self {
            Self::I420 => "yuv420p",
            Self::NV12 => "yuv420sp-nv12",
            Self::NV21 => "yuv420sp",
        }
    }

    /// Parse the native preview-format name
    pub fn from_native_name(name: &str) -> Option<Self> {
        match name.trim() {
            "yuv420p" => Some(Self::I420),
            "yuv420sp-nv12" => Some(Self::NV12),
            "yuv420sp" => Some(Self::NV21),
            _ => None,
        }
    }

    /// Bytes needed for a tightly packed frame of the given size
    pub fn frame_len(&self, width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize;
        luma + 2 * chroma_plane_len(width, height)
    }
}

/// Size in bytes of one 4:2:0 chroma plane
pub fn chroma_plane_len(width: u32, height: u32) -> usize {
    (width as usize).div_ceil(2) * (height as usize).div_ceil(2)
}

/// A raw frame as delivered by the driver callback thread
///
/// Owned by whoever holds it; the driver hands it to the preview pipeline,
/// which either consumes it into a canonical frame or drops it.
#[derive(Clone)]
pub struct FrameBuffer {
    /// Pixel data; luma plane first, chroma after `stride * height` bytes
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Row stride of the luma plane (bytes per row, may include padding)
    pub stride: u32,
    pub format: PixelFormat,
    /// Monotonic sequence number assigned by the driver
    pub sequence: u64,
    /// Timestamp when frame was captured
    pub captured_at: Instant,
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("bytes", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Message classes the HAL may deliver
///
/// Mirrors the driver's msgType bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageMask(u32);

impl MessageMask {
    pub const NONE: Self = Self(0);
    pub const ERROR: Self = Self(0x0001);
    pub const SHUTTER: Self = Self(0x0002);
    pub const FOCUS: Self = Self(0x0004);
    pub const PREVIEW_FRAME: Self = Self(0x0010);
    pub const COMPRESSED_IMAGE: Self = Self(0x0100);
    pub const ALL: Self = Self(0x0117);

    /// Raw bit value
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for MessageMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Data callback payloads (onData)
#[derive(Debug)]
pub enum DataMessage {
    /// A raw preview frame
    PreviewFrame(FrameBuffer),
    /// Encoded still image for a take-picture request
    CompressedImage { ticket: Ticket, data: Vec<u8> },
}

impl DataMessage {
    /// Mask bit that gates this message
    pub fn mask(&self) -> MessageMask {
        match self {
            DataMessage::PreviewFrame(_) => MessageMask::PREVIEW_FRAME,
            DataMessage::CompressedImage { .. } => MessageMask::COMPRESSED_IMAGE,
        }
    }
}

/// Notify callback payloads (onNotify)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMessage {
    /// Autofocus finished; `success` is ext1
    Focus { ticket: Ticket, success: bool },
    /// Shutter fired for a take-picture request
    Shutter { ticket: Ticket },
    /// Take-picture failed inside the driver
    PictureFailed { ticket: Ticket },
    /// Asynchronous driver error; `code` is ext1
    Error { code: i32 },
}

impl NotifyMessage {
    /// Mask bit that gates this message
    pub fn mask(&self) -> MessageMask {
        match self {
            NotifyMessage::Focus { .. } => MessageMask::FOCUS,
            NotifyMessage::Shutter { .. } => MessageMask::SHUTTER,
            NotifyMessage::PictureFailed { .. } | NotifyMessage::Error { .. } => {
                MessageMask::ERROR
            }
        }
    }
}

/// Native parameter set exchanged with the HAL
///
/// Keys are the driver's own strings ("preview-size", "focus-areas", ...).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HalParameters {
    entries: BTreeMap<String, String>,
}

impl HalParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize to the driver's `key=value;key=value` form
    pub fn flatten(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Parse the driver's flattened form.
    ///
    /// Empty segments are skipped; a segment without `=` or with an empty key
    /// rejects the whole string.
    pub fn unflatten(flat: &str) -> Option<Self> {
        let mut params = Self::new();
        for segment in flat.split(';') {
            if segment.is_empty() {
                continue;
            }
            let (key, value) = segment.split_once('=')?;
            if key.is_empty() {
                return None;
            }
            params.set(key, value);
        }
        Some(params)
    }
}
