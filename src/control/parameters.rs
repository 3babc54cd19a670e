// SPDX-License-Identifier: GPL-3.0-only

//! Cached hardware parameters
//!
//! The store mirrors the driver's parameter set. It is pulled once when the
//! session opens and pushed back after every hardware-visible change, or once
//! per batch while a batch is open. Keys the crate does not know about are
//! kept verbatim and pushed back unchanged.

use super::regions::{Region, decode_regions, encode_regions};
use crate::backends::camera::{HalParameters, Size};
use crate::errors::{CameraError, CameraResult};
use tracing::debug;

/// Shape of a parameter's value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Int,
    Double,
    Size,
    Regions,
}

/// Public parameter key space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKey {
    Effect,
    WhiteBalance,
    SceneMode,
    FlashMode,
    FocusMode,
    Zoom,
    FocusAreas,
    MeteringAreas,
    MaxNumFocusAreas,
    MaxNumMeteringAreas,
    FocalLength,
    ExposureCompensation,
    MinExposureCompensation,
    MaxExposureCompensation,
    ExposureCompensationStep,
    PictureSize,
    PictureFormat,
    JpegQuality,
    Rotation,
    GpsLatitude,
    GpsLongitude,
    GpsAltitude,
    GpsTimestamp,
    PreviewSize,
    PreviewFrameRate,
    PreviewFormat,
    SupportedPreviewSizes,
    VideoSize,
    RecordingHint,
}

impl ParameterKey {
    pub const ALL: &'static [ParameterKey] = &[
        ParameterKey::Effect,
        ParameterKey::WhiteBalance,
        ParameterKey::SceneMode,
        ParameterKey::FlashMode,
        ParameterKey::FocusMode,
        ParameterKey::Zoom,
        ParameterKey::FocusAreas,
        ParameterKey::MeteringAreas,
        ParameterKey::MaxNumFocusAreas,
        ParameterKey::MaxNumMeteringAreas,
        ParameterKey::FocalLength,
        ParameterKey::ExposureCompensation,
        ParameterKey::MinExposureCompensation,
        ParameterKey::MaxExposureCompensation,
        ParameterKey::ExposureCompensationStep,
        ParameterKey::PictureSize,
        ParameterKey::PictureFormat,
        ParameterKey::JpegQuality,
        ParameterKey::Rotation,
        ParameterKey::GpsLatitude,
        ParameterKey::GpsLongitude,
        ParameterKey::GpsAltitude,
        ParameterKey::GpsTimestamp,
        ParameterKey::PreviewSize,
        ParameterKey::PreviewFrameRate,
        ParameterKey::PreviewFormat,
        ParameterKey::SupportedPreviewSizes,
        ParameterKey::VideoSize,
        ParameterKey::RecordingHint,
    ];

    /// Driver key string
    pub fn native_name(&self) -> &'static str {
        match self {
            ParameterKey::Effect => "effect",
            ParameterKey::WhiteBalance => "whitebalance",
            ParameterKey::SceneMode => "scene-mode",
            ParameterKey::FlashMode => "flash-mode",
            ParameterKey::FocusMode => "focus-mode",
            ParameterKey::Zoom => "zoom",
            ParameterKey::FocusAreas => "focus-areas",
            ParameterKey::MeteringAreas => "metering-areas",
            ParameterKey::MaxNumFocusAreas => "max-num-focus-areas",
            ParameterKey::MaxNumMeteringAreas => "max-num-metering-areas",
            ParameterKey::FocalLength => "focal-length",
            ParameterKey::ExposureCompensation => "exposure-compensation",
            ParameterKey::MinExposureCompensation => "min-exposure-compensation",
            ParameterKey::MaxExposureCompensation => "max-exposure-compensation",
            ParameterKey::ExposureCompensationStep => "exposure-compensation-step",
            ParameterKey::PictureSize => "picture-size",
            ParameterKey::PictureFormat => "picture-format",
            ParameterKey::JpegQuality => "jpeg-quality",
            ParameterKey::Rotation => "rotation",
            ParameterKey::GpsLatitude => "gps-latitude",
            ParameterKey::GpsLongitude => "gps-longitude",
            ParameterKey::GpsAltitude => "gps-altitude",
            ParameterKey::GpsTimestamp => "gps-timestamp",
            ParameterKey::PreviewSize => "preview-size",
            ParameterKey::PreviewFrameRate => "preview-frame-rate",
            ParameterKey::PreviewFormat => "preview-format",
            ParameterKey::SupportedPreviewSizes => "preview-size-values",
            ParameterKey::VideoSize => "video-size",
            ParameterKey::RecordingHint => "recording-hint",
        }
    }

    /// Look up a key by its driver name
    pub fn from_native_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.native_name() == name)
    }

    pub fn kind(&self) -> ValueKind {
        use ParameterKey::*;
        match self {
            Zoom | MaxNumFocusAreas | MaxNumMeteringAreas | ExposureCompensation
            | MinExposureCompensation | MaxExposureCompensation | JpegQuality | Rotation
            | GpsTimestamp | PreviewFrameRate => ValueKind::Int,
            FocalLength | ExposureCompensationStep | GpsLatitude | GpsLongitude | GpsAltitude => {
                ValueKind::Double
            }
            PictureSize | PreviewSize | VideoSize => ValueKind::Size,
            FocusAreas | MeteringAreas => ValueKind::Regions,
            Effect | WhiteBalance | SceneMode | FlashMode | FocusMode | PictureFormat
            | PreviewFormat | SupportedPreviewSizes | RecordingHint => ValueKind::Text,
        }
    }

    /// Capability keys reported by the hardware and never written back
    pub fn is_read_only(&self) -> bool {
        use ParameterKey::*;
        matches!(
            self,
            MaxNumFocusAreas
                | MaxNumMeteringAreas
                | FocalLength
                | MinExposureCompensation
                | MaxExposureCompensation
                | ExposureCompensationStep
                | PreviewFormat
                | SupportedPreviewSizes
        )
    }

    /// Capability key bounding the length of a region list
    fn region_limit_key(&self) -> Option<ParameterKey> {
        match self {
            ParameterKey::FocusAreas => Some(ParameterKey::MaxNumFocusAreas),
            ParameterKey::MeteringAreas => Some(ParameterKey::MaxNumMeteringAreas),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.native_name())
    }
}

/// Typed parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Text(String),
    Int(i64),
    Double(f64),
    Size(Size),
    Regions(Vec<Region>),
}

impl ParameterValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ParameterValue::Text(_) => ValueKind::Text,
            ParameterValue::Int(_) => ValueKind::Int,
            ParameterValue::Double(_) => ValueKind::Double,
            ParameterValue::Size(_) => ValueKind::Size,
            ParameterValue::Regions(_) => ValueKind::Regions,
        }
    }

    /// Parse a native string as the given kind
    pub fn parse(kind: ValueKind, native: &str) -> Option<Self> {
        let native = native.trim();
        match kind {
            ValueKind::Text => Some(ParameterValue::Text(native.to_string())),
            ValueKind::Int => native.parse().ok().map(ParameterValue::Int),
            ValueKind::Double => native.parse().ok().map(ParameterValue::Double),
            ValueKind::Size => Size::parse(native).map(ParameterValue::Size),
            ValueKind::Regions => {
                let regions = decode_regions(native)?;
                // The sentinel alone means "automatic": no explicit regions
                if regions.len() == 1 && regions[0].is_sentinel() {
                    Some(ParameterValue::Regions(Vec::new()))
                } else {
                    Some(ParameterValue::Regions(regions))
                }
            }
        }
    }

    /// Native string form
    pub fn to_native(&self) -> String {
        match self {
            ParameterValue::Text(s) => s.clone(),
            ParameterValue::Int(i) => i.to_string(),
            ParameterValue::Double(d) => d.to_string(),
            ParameterValue::Size(s) => s.to_string(),
            ParameterValue::Regions(r) => encode_regions(r),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_size(&self) -> Option<Size> {
        match self {
            ParameterValue::Size(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_regions(&self) -> Option<&[Region]> {
        match self {
            ParameterValue::Regions(r) => Some(r),
            _ => None,
        }
    }

    /// Coerce to a key's kind; integers widen to doubles
    fn coerce(self, kind: ValueKind) -> Option<Self> {
        match (self, kind) {
            (ParameterValue::Int(i), ValueKind::Double) => Some(ParameterValue::Double(i as f64)),
            (value, kind) if value.kind() == kind => Some(value),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_native())
    }
}

/// Local mirror of the hardware parameter set
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    native: HalParameters,
    dirty: bool,
    batch_depth: u32,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache with a fresh pull from hardware
    pub fn replace_from(&mut self, params: HalParameters) {
        debug!(count = params.len(), "Parameter cache refreshed from hardware");
        self.native = params;
        self.dirty = false;
    }

    /// Full native parameter set
    pub fn snapshot(&self) -> &HalParameters {
        &self.native
    }

    /// Read a typed value; `Ok(None)` when the hardware does not report the key
    pub fn get(&self, key: ParameterKey) -> CameraResult<Option<ParameterValue>> {
        let Some(native) = self.native.get(key.native_name()) else {
            return Ok(None);
        };
        ParameterValue::parse(key.kind(), native)
            .map(Some)
            .ok_or_else(|| {
                CameraError::Unexpected(format!(
                    "hardware value '{}' for {} is malformed",
                    native, key
                ))
            })
    }

    /// Set a typed value.
    ///
    /// Returns `true` when the change must be pushed to hardware now; inside a
    /// batch the push is deferred to [`end_batch`](Self::end_batch).
    pub fn set(&mut self, key: ParameterKey, value: ParameterValue) -> CameraResult<bool> {
        if key.is_read_only() {
            return Err(CameraError::InvalidArgument(format!("{} is read-only", key)));
        }
        let value = value.coerce(key.kind()).ok_or_else(|| {
            CameraError::InvalidArgument(format!("{} expects a {:?} value", key, key.kind()))
        })?;
        let value = self.check_value(key, value)?;

        self.native.set(key.native_name(), value.to_native());
        Ok(self.mark_dirty())
    }

    /// Remove a key from the hardware set (used for GPS tags)
    pub fn clear(&mut self, key: ParameterKey) -> bool {
        if self.native.remove(key.native_name()).is_some() {
            self.mark_dirty()
        } else {
            false
        }
    }

    /// Open a deferred batch; nested batches flush when the outermost ends
    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    /// Close a batch; `true` when pending changes must now be pushed
    pub fn end_batch(&mut self) -> bool {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        self.batch_depth == 0 && self.dirty
    }

    pub fn is_deferred(&self) -> bool {
        self.batch_depth > 0
    }

    /// Take the pending parameter set, or `None` if nothing changed
    pub fn take_dirty(&mut self) -> Option<HalParameters> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.native.clone())
    }

    fn mark_dirty(&mut self) -> bool {
        self.dirty = true;
        !self.is_deferred()
    }

    fn check_value(
        &self,
        key: ParameterKey,
        value: ParameterValue,
    ) -> CameraResult<ParameterValue> {
        match (&value, key) {
            (ParameterValue::Regions(regions), _) => {
                for region in regions {
                    region.validate()?;
                }
                if let Some(limit_key) = key.region_limit_key() {
                    let max = self
                        .get(limit_key)?
                        .and_then(|v| v.as_int())
                        .unwrap_or(0);
                    if regions.len() as i64 > max {
                        return Err(CameraError::InvalidArgument(format!(
                            "{} accepts at most {} regions, got {}",
                            key,
                            max,
                            regions.len()
                        )));
                    }
                }
                Ok(value)
            }
            (ParameterValue::Int(requested), ParameterKey::ExposureCompensation) => {
                let min = self.int_or(ParameterKey::MinExposureCompensation, *requested);
                let max = self.int_or(ParameterKey::MaxExposureCompensation, *requested);
                let clamped = (*requested).clamp(min.min(max), max.max(min));
                if clamped != *requested {
                    debug!(requested, clamped, "Exposure compensation clamped");
                }
                Ok(ParameterValue::Int(clamped))
            }
            (ParameterValue::Size(size), _) if size.width == 0 || size.height == 0 => Err(
                CameraError::InvalidArgument(format!("{} cannot be {}", key, size)),
            ),
            _ => Ok(value),
        }
    }

    fn int_or(&self, key: ParameterKey, fallback: i64) -> i64 {
        self.get(key)
            .ok()
            .flatten()
            .and_then(|v| v.as_int())
            .unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ParameterStore {
        let mut params = HalParameters::new();
        params.set("focus-areas", "(0,0,0,0,0)");
        params.set("max-num-focus-areas", "1");
        params.set("max-num-metering-areas", "2");
        params.set("exposure-compensation", "0");
        params.set("min-exposure-compensation", "-6");
        params.set("max-exposure-compensation", "6");
        params.set("vendor-private", "keep-me");
        let mut store = ParameterStore::new();
        store.replace_from(params);
        store
    }

    #[test]
    fn test_sentinel_reads_as_empty() {
        assert_eq!(
            store().get(ParameterKey::FocusAreas).unwrap(),
            Some(ParameterValue::Regions(vec![]))
        );
    }

    #[test]
    fn test_missing_key() {
        assert_eq!(store().get(ParameterKey::Zoom).unwrap(), None);
    }

    #[test]
    fn test_set_pushes_immediately() {
        let mut store = store();
        assert!(store.set(ParameterKey::FlashMode, ParameterValue::Text("on".into())).unwrap());
        let pushed = store.take_dirty().unwrap();
        assert_eq!(pushed.get("flash-mode"), Some("on"));
        assert_eq!(pushed.get("vendor-private"), Some("keep-me"));
        assert!(store.take_dirty().is_none());
    }

    #[test]
    fn test_batch_defers_push() {
        let mut store = store();
        store.begin_batch();
        assert!(!store.set(ParameterKey::Rotation, ParameterValue::Int(90)).unwrap());
        let format = ParameterValue::Text("jpeg".into());
        assert!(!store.set(ParameterKey::PictureFormat, format).unwrap());
        assert!(store.end_batch());
        let pushed = store.take_dirty().unwrap();
        assert_eq!(pushed.get("rotation"), Some("90"));
        assert_eq!(pushed.get("picture-format"), Some("jpeg"));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let mut store = store();
        store.begin_batch();
        assert!(!store.end_batch());
        assert!(store.take_dirty().is_none());
    }

    #[test]
    fn test_read_only_rejected() {
        let err = store()
            .set(ParameterKey::MaxNumFocusAreas, ParameterValue::Int(5))
            .unwrap_err();
        assert!(matches!(err, CameraError::InvalidArgument(_)));
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let err = store()
            .set(ParameterKey::Zoom, ParameterValue::Text("far".into()))
            .unwrap_err();
        assert!(matches!(err, CameraError::InvalidArgument(_)));
    }

    #[test]
    fn test_region_limit() {
        let mut store = store();
        let two = vec![Region::DEFAULT, Region::new(-10, -10, 10, 10, 1)];
        assert!(store.set(ParameterKey::FocusAreas, ParameterValue::Regions(two.clone())).is_err());
        assert!(store.set(ParameterKey::MeteringAreas, ParameterValue::Regions(two)).is_ok());
        assert!(store.set(ParameterKey::FocusAreas, ParameterValue::Regions(vec![])).is_ok());
        assert_eq!(store.snapshot().get("focus-areas"), Some("(0,0,0,0,0)"));
    }

    #[test]
    fn test_exposure_clamped() {
        let mut store = store();
        store
            .set(ParameterKey::ExposureCompensation, ParameterValue::Int(40))
            .unwrap();
        assert_eq!(
            store.get(ParameterKey::ExposureCompensation).unwrap(),
            Some(ParameterValue::Int(6))
        );
    }

    #[test]
    fn test_clear_gps() {
        let mut store = store();
        store.set(ParameterKey::GpsLatitude, ParameterValue::Int(52)).unwrap();
        store.take_dirty();
        assert!(store.clear(ParameterKey::GpsLatitude));
        assert!(!store.clear(ParameterKey::GpsLatitude));
        assert_eq!(store.get(ParameterKey::GpsLatitude).unwrap(), None);
    }

    #[test]
    fn test_native_names_round_trip() {
        for key in ParameterKey::ALL {
            assert_eq!(ParameterKey::from_native_name(key.native_name()), Some(*key));
        }
    }
}
