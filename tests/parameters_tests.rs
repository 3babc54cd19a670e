// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the region codec and parameter store

use camera_control::backends::camera::{HalParameters, Size};
use camera_control::control::{
    ParameterKey, ParameterStore, ParameterValue, Region, decode_regions, encode_regions,
};
use camera_control::errors::CameraError;

/// Deterministic spread of valid regions
fn sample_regions(count: usize) -> Vec<Region> {
    (0..count)
        .map(|i| {
            let i = i as i32;
            let top = -1000 + i * 37 % 900;
            let left = -1000 + i * 53 % 900;
            Region::new(top, left, top + 100 + i, left + 200 + i, 1 + i * 97 % 1000)
        })
        .collect()
}

#[test]
fn test_region_lists_survive_encoding() {
    for count in 1..=12 {
        let regions = sample_regions(count);
        for region in &regions {
            assert!(region.validate().is_ok(), "{} should be valid", region);
        }
        let encoded = encode_regions(&regions);
        assert!(!encoded.ends_with(','));
        assert_eq!(decode_regions(&encoded), Some(regions));
    }
}

#[test]
fn test_extreme_regions_survive_encoding() {
    let regions = vec![
        Region::DEFAULT,
        Region::new(-1000, -1000, -999, -999, 1),
        Region::new(999, 999, 1000, 1000, 1000),
    ];
    assert_eq!(decode_regions(&encode_regions(&regions)), Some(regions));
}

#[test]
fn test_empty_list_round_trips_to_sentinel() {
    let encoded = encode_regions(&[]);
    assert_eq!(encoded, "(0,0,0,0,0)");
    assert_eq!(decode_regions(&encoded), Some(vec![Region::SENTINEL]));
    assert_eq!(decode_regions(&encoded), decode_regions(&encode_regions(&[])));
}

#[test]
fn test_decode_skips_empty_segments() {
    assert_eq!(
        decode_regions("(1,2,3,4,5),,(6,7,8,9,10),"),
        Some(vec![Region::new(1, 2, 3, 4, 5), Region::new(6, 7, 8, 9, 10)])
    );
    assert_eq!(decode_regions(""), Some(Vec::new()));
}

#[test]
fn test_decode_rejects_any_malformed_tuple() {
    assert_eq!(decode_regions("(1,2,3,4,5),(6,7,8,9)"), None);
    assert_eq!(decode_regions("(1,2,3,4,5),(6,7,8,9,10"), None);
    assert_eq!(decode_regions("(1,2,x,4,5)"), None);
    assert_eq!(decode_regions("(1,2,3,4,5,6)"), None);
    assert_eq!(decode_regions("1,2,3,4,5)"), None);
}

fn hardware_set() -> HalParameters {
    let mut params = HalParameters::new();
    params.set("preview-size", "640x480");
    params.set("picture-size", "1280x720");
    params.set("metering-areas", "(0,0,0,0,0)");
    params.set("max-num-metering-areas", "3");
    params.set("focal-length", "4.31");
    params.set("zoom", "0");
    params
}

#[test]
fn test_store_reads_typed_values() {
    let mut store = ParameterStore::new();
    store.replace_from(hardware_set());

    assert_eq!(
        store.get(ParameterKey::PictureSize).unwrap(),
        Some(ParameterValue::Size(Size::new(1280, 720)))
    );
    assert_eq!(
        store.get(ParameterKey::FocalLength).unwrap(),
        Some(ParameterValue::Double(4.31))
    );
    assert_eq!(
        store.get(ParameterKey::MeteringAreas).unwrap(),
        Some(ParameterValue::Regions(Vec::new()))
    );
    assert_eq!(store.get(ParameterKey::Effect).unwrap(), None);
}

#[test]
fn test_store_metering_limit() {
    let mut store = ParameterStore::new();
    store.replace_from(hardware_set());

    let three = ParameterValue::Regions(sample_regions(3));
    assert!(store.set(ParameterKey::MeteringAreas, three).unwrap());
    let pushed = store.take_dirty().unwrap();
    assert_eq!(
        pushed.get("metering-areas").and_then(decode_regions),
        Some(sample_regions(3))
    );

    let four = ParameterValue::Regions(sample_regions(4));
    assert!(matches!(
        store.set(ParameterKey::MeteringAreas, four),
        Err(CameraError::InvalidArgument(_))
    ));
    assert!(store.take_dirty().is_none());
}

#[test]
fn test_store_rejects_invalid_regions() {
    let mut store = ParameterStore::new();
    store.replace_from(hardware_set());

    let inverted = ParameterValue::Regions(vec![Region::new(100, 0, -100, 50, 10)]);
    assert!(matches!(
        store.set(ParameterKey::MeteringAreas, inverted),
        Err(CameraError::InvalidArgument(_))
    ));
    let heavy = ParameterValue::Regions(vec![Region::new(0, 0, 10, 10, 1001)]);
    assert!(matches!(
        store.set(ParameterKey::MeteringAreas, heavy),
        Err(CameraError::InvalidArgument(_))
    ));
}

#[test]
fn test_store_batch_and_nested_batch() {
    let mut store = ParameterStore::new();
    store.replace_from(hardware_set());

    store.begin_batch();
    store.begin_batch();
    assert!(!store.set(ParameterKey::Zoom, ParameterValue::Int(3)).unwrap());
    assert!(!store.end_batch());
    assert!(store.is_deferred());
    assert!(
        !store
            .set(ParameterKey::GpsAltitude, ParameterValue::Int(12))
            .unwrap()
    );
    assert!(store.end_batch());

    let pushed = store.take_dirty().unwrap();
    assert_eq!(pushed.get("zoom"), Some("3"));
    // Integers widen for double-valued keys
    assert_eq!(pushed.get("gps-altitude"), Some("12"));
}

#[test]
fn test_native_parameter_string() {
    let params = hardware_set();
    let flat = params.flatten();
    assert!(flat.contains("preview-size=640x480"));
    assert_eq!(HalParameters::unflatten(&flat), Some(params));
    assert_eq!(HalParameters::unflatten("a=1;;b=2").map(|p| p.len()), Some(2));
    assert_eq!(HalParameters::unflatten("a=1;broken"), None);
}
