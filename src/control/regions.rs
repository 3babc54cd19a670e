// SPDX-License-Identifier: GPL-3.0-only

//! Focus and metering region codec
//!
//! The driver stores region lists as comma-joined tuples:
//! `(top,left,bottom,right,weight),(top,left,bottom,right,weight)`.
//! An empty list is written as the all-zero tuple, which tells the driver to
//! pick regions automatically.

use crate::constants::regions::{AUTOMATIC_SENTINEL, COORD_MAX, COORD_MIN, WEIGHT_MAX, WEIGHT_MIN};
use crate::errors::{CameraError, CameraResult};

/// A weighted rectangle in the sensor's -1000..=1000 coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
    pub weight: i32,
}

impl Region {
    /// Whole frame at full weight; what a fresh region holds before it is set
    pub const DEFAULT: Region =
        Region::new(COORD_MIN, COORD_MIN, COORD_MAX, COORD_MAX, WEIGHT_MAX as i32);

    /// All-zero tuple meaning "automatic"
    pub const SENTINEL: Region = Region::new(0, 0, 0, 0, 0);

    pub const fn new(top: i32, left: i32, bottom: i32, right: i32, weight: i32) -> Self {
        Self {
            top,
            left,
            bottom,
            right,
            weight,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }

    /// Check bounds, edge order and weight range
    pub fn validate(&self) -> CameraResult<()> {
        let coords = [self.top, self.left, self.bottom, self.right];
        if coords.iter().any(|c| !(COORD_MIN..=COORD_MAX).contains(c)) {
            return Err(CameraError::InvalidArgument(format!(
                "region {} outside {}..={}",
                self, COORD_MIN, COORD_MAX
            )));
        }
        if self.left >= self.right || self.top >= self.bottom {
            return Err(CameraError::InvalidArgument(format!(
                "region {} has no area",
                self
            )));
        }
        if !(WEIGHT_MIN as i32..=WEIGHT_MAX as i32).contains(&self.weight) {
            return Err(CameraError::InvalidArgument(format!(
                "region weight {} outside {}..={}",
                self.weight, WEIGHT_MIN, WEIGHT_MAX
            )));
        }
        Ok(())
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({},{},{},{},{})",
            self.top, self.left, self.bottom, self.right, self.weight
        )
    }
}

/// Encode a region list in the native form
pub fn encode_regions(regions: &[Region]) -> String {
    if regions.is_empty() {
        return AUTOMATIC_SENTINEL.to_string();
    }
    regions
        .iter()
        .map(Region::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Decode a native region list.
///
/// Zero-length segments are skipped. A single malformed tuple fails the
/// whole decode. The automatic sentinel decodes to one all-zero region.
pub fn decode_regions(value: &str) -> Option<Vec<Region>> {
    let mut regions = Vec::new();
    let mut segments = value.split(')').peekable();
    while let Some(segment) = segments.next() {
        let segment = segment.trim_matches(|c: char| c == ',' || c.is_whitespace());
        if segment.is_empty() {
            continue;
        }
        // Text after the last ')' is an unclosed tuple
        if segments.peek().is_none() {
            return None;
        }
        let body = segment.strip_prefix('(')?;
        regions.push(parse_tuple(body)?);
    }
    Some(regions)
}

fn parse_tuple(body: &str) -> Option<Region> {
    let mut fields = body.split(',').map(|f| f.trim().parse::<i32>());
    let region = Region::new(
        fields.next()?.ok()?,
        fields.next()?.ok()?,
        fields.next()?.ok()?,
        fields.next()?.ok()?,
        fields.next()?.ok()?,
    );
    if fields.next().is_some() {
        return None;
    }
    Some(region)
}
