// SPDX-License-Identifier: GPL-3.0-only

//! Raw frame canonicalization
//!
//! Preview consumers only understand planar 4:2:0 (I420). Sensors usually
//! deliver semi-planar frames (NV21 on phones, NV12 elsewhere), so every raw
//! frame is rewritten into a freshly allocated planar buffer:
//!
//! ```text
//! NV21:  YYYYYYYY…  VUVUVUVU…         I420:  YYYYYYYY…  UUUU…  VVVV…
//!        (stride)   (interleaved)  ─▶        (width)    (w/2)  (w/2)
//! ```
//!
//! Luma is copied row by row with any stride padding stripped; it is never
//! modified. Frames already in canonical layout with a tight stride are passed
//! through without copying.

use crate::backends::camera::{FrameBuffer, PixelFormat, chroma_plane_len};

/// Stereo layout tag attached to every preview frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StereoMode {
    #[default]
    Mono,
}

/// A frame in canonical planar 4:2:0 layout
#[derive(Clone)]
pub struct PreviewFrame {
    /// Y plane, then U plane, then V plane, all tightly packed
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per luma row (always `width`)
    pub y_stride: u32,
    /// Bytes per chroma row (half the width, rounded up)
    pub uv_stride: u32,
    /// Sequence number of the raw frame this came from
    pub sequence: u64,
    pub stereo_mode: StereoMode,
}

impl PreviewFrame {
    /// Luma plane
    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.luma_len()]
    }

    /// Blue-difference chroma plane
    pub fn u_plane(&self) -> &[u8] {
        let start = self.luma_len();
        &self.data[start..start + self.chroma_len()]
    }

    /// Red-difference chroma plane
    pub fn v_plane(&self) -> &[u8] {
        let start = self.luma_len() + self.chroma_len();
        &self.data[start..start + self.chroma_len()]
    }

    fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn chroma_len(&self) -> usize {
        chroma_plane_len(self.width, self.height)
    }
}

impl std::fmt::Debug for PreviewFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewFrame")
            .field("bytes", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("stereo_mode", &self.stereo_mode)
            .finish()
    }
}

/// Why a raw frame could not be canonicalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// The output buffer could not be allocated
    OutOfMemory,
    /// The raw buffer is smaller than its declared geometry requires
    ShortBuffer { expected: usize, actual: usize },
    /// Stride narrower than the frame width
    BadStride { width: u32, stride: u32 },
}

impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizeError::OutOfMemory => write!(f, "out of memory"),
            NormalizeError::ShortBuffer { expected, actual } => {
                write!(f, "frame buffer too short: {} < {}", actual, expected)
            }
            NormalizeError::BadStride { width, stride } => {
                write!(f, "stride {} narrower than width {}", stride, width)
            }
        }
    }
}

impl std::error::Error for NormalizeError {}

/// Convert a raw frame into canonical planar layout, consuming it
pub fn normalize(frame: FrameBuffer) -> Result<PreviewFrame, NormalizeError> {
    if frame.stride < frame.width {
        return Err(NormalizeError::BadStride {
            width: frame.width,
            stride: frame.stride,
        });
    }

    let expected = raw_len(&frame);
    if frame.data.len() < expected {
        return Err(NormalizeError::ShortBuffer {
            expected,
            actual: frame.data.len(),
        });
    }

    let out_len = PixelFormat::I420.frame_len(frame.width, frame.height);
    let data = if frame.format.is_canonical() && frame.stride == frame.width {
        let mut data = frame.data;
        data.truncate(out_len);
        data
    } else {
        let mut out = allocate(out_len)?;
        copy_luma(&frame, &mut out);
        match frame.format {
            PixelFormat::I420 => copy_planar_chroma(&frame, &mut out),
            PixelFormat::NV12 => deinterleave_chroma(&frame, &mut out, false),
            PixelFormat::NV21 => deinterleave_chroma(&frame, &mut out, true),
        }
        out
    };

    Ok(PreviewFrame {
        data,
        width: frame.width,
        height: frame.height,
        y_stride: frame.width,
        uv_stride: frame.width.div_ceil(2),
        sequence: frame.sequence,
        stereo_mode: StereoMode::Mono,
    })
}

/// Allocate an output buffer, reporting failure instead of aborting
fn allocate(len: usize) -> Result<Vec<u8>, NormalizeError> {
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| NormalizeError::OutOfMemory)?;
    Ok(out)
}

/// Row stride of the chroma data inside a raw frame
fn raw_chroma_stride(frame: &FrameBuffer) -> usize {
    let stride = frame.stride as usize;
    match frame.format {
        PixelFormat::I420 => stride.div_ceil(2),
        PixelFormat::NV12 | PixelFormat::NV21 => stride.next_multiple_of(2),
    }
}

/// Minimum byte length of a raw frame with the given geometry
fn raw_len(frame: &FrameBuffer) -> usize {
    let luma = frame.stride as usize * frame.height as usize;
    let chroma_w = (frame.width as usize).div_ceil(2);
    let chroma_h = (frame.height as usize).div_ceil(2);
    if chroma_h == 0 {
        return luma;
    }
    let cstride = raw_chroma_stride(frame);
    match frame.format {
        // Two planes, each with its own rows
        PixelFormat::I420 => luma + cstride * chroma_h + cstride * (chroma_h - 1) + chroma_w,
        PixelFormat::NV12 | PixelFormat::NV21 => luma + cstride * (chroma_h - 1) + 2 * chroma_w,
    }
}

fn copy_luma(frame: &FrameBuffer, out: &mut Vec<u8>) {
    let width = frame.width as usize;
    let stride = frame.stride as usize;
    for row in 0..frame.height as usize {
        let start = row * stride;
        out.extend_from_slice(&frame.data[start..start + width]);
    }
}

fn copy_planar_chroma(frame: &FrameBuffer, out: &mut Vec<u8>) {
    let chroma_w = (frame.width as usize).div_ceil(2);
    let chroma_h = (frame.height as usize).div_ceil(2);
    let cstride = raw_chroma_stride(frame);
    let u_base = frame.stride as usize * frame.height as usize;
    let v_base = u_base + cstride * chroma_h;

    for base in [u_base, v_base] {
        for row in 0..chroma_h {
            let start = base + row * cstride;
            out.extend_from_slice(&frame.data[start..start + chroma_w]);
        }
    }
}

/// Split interleaved chroma pairs into two planes
///
/// `v_first` selects NV21 ordering (V0 U0 V1 U1 …).
fn deinterleave_chroma(frame: &FrameBuffer, out: &mut Vec<u8>, v_first: bool) {
    let chroma_w = (frame.width as usize).div_ceil(2);
    let chroma_h = (frame.height as usize).div_ceil(2);
    let cstride = raw_chroma_stride(frame);
    let base = frame.stride as usize * frame.height as usize;

    let plane_len = chroma_w * chroma_h;
    let u_start = out.len();
    out.resize(u_start + 2 * plane_len, 0);
    let (u_plane, v_plane) = out[u_start..].split_at_mut(plane_len);

    for row in 0..chroma_h {
        let src = &frame.data[base + row * cstride..base + row * cstride + 2 * chroma_w];
        let dst = row * chroma_w;
        for (i, pair) in src.chunks_exact(2).enumerate() {
            let (u, v) = if v_first {
                (pair[1], pair[0])
            } else {
                (pair[0], pair[1])
            };
            u_plane[dst + i] = u;
            v_plane[dst + i] = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn raw(
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
    ) -> FrameBuffer {
        FrameBuffer {
            data,
            width,
            height,
            stride,
            format,
            sequence: 7,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn test_nv21_deinterleave() {
        // 4x2 luma, one chroma row of two VU pairs
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 200, 100, 201, 101];
        let frame = normalize(raw(data, 4, 2, 4, PixelFormat::NV21)).unwrap();
        assert_eq!(frame.y_plane(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(frame.u_plane(), &[100, 101]);
        assert_eq!(frame.v_plane(), &[200, 201]);
        assert_eq!(frame.y_stride, 4);
        assert_eq!(frame.uv_stride, 2);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.stereo_mode, StereoMode::Mono);
    }

    #[test]
    fn test_nv12_deinterleave() {
        let data = vec![0; 8].into_iter().chain([10, 20, 11, 21]).collect();
        let frame = normalize(raw(data, 4, 2, 4, PixelFormat::NV12)).unwrap();
        assert_eq!(frame.u_plane(), &[10, 11]);
        assert_eq!(frame.v_plane(), &[20, 21]);
    }

    #[test]
    fn test_stride_padding_stripped() {
        // width 2, stride 4: two padding bytes per row
        let data = vec![1, 2, 99, 99, 3, 4, 99, 99, 50, 60];
        let frame = normalize(raw(data, 2, 2, 4, PixelFormat::NV21)).unwrap();
        assert_eq!(frame.data, vec![1, 2, 3, 4, 60, 50]);
    }

    #[test]
    fn test_canonical_passthrough() {
        let data = vec![9; PixelFormat::I420.frame_len(4, 4) + 3];
        let frame = normalize(raw(data, 4, 4, 4, PixelFormat::I420)).unwrap();
        assert_eq!(frame.data.len(), PixelFormat::I420.frame_len(4, 4));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let err = normalize(raw(vec![0; 5], 4, 2, 4, PixelFormat::NV21)).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::ShortBuffer {
                expected: 12,
                actual: 5
            }
        );
    }

    #[test]
    fn test_bad_stride_rejected() {
        let err = normalize(raw(vec![0; 64], 4, 2, 2, PixelFormat::NV12)).unwrap_err();
        assert!(matches!(err, NormalizeError::BadStride { .. }));
    }
}
