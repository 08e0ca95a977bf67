//! JSON wire format for [`WorkoutPayload`].
//!
//! Timestamps travel as integer milliseconds since the Unix epoch. Absent
//! optional fields are omitted rather than written as a sentinel, and keys a
//! newer build added are ignored on the way in. The `schemaVersion` is probed
//! before anything else so a payload from a newer build fails with
//! [`DecodeError::UnsupportedSchemaVersion`] and not a field-level parse error.

use crate::dlog;
use crate::error::{DecodeError, EncodeError};
use crate::types::{KM_SPLITS_SINCE, MIN_SCHEMA_VERSION, SCHEMA_VERSION, WorkoutPayload};
use chrono::{DateTime, Timelike, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;

pub fn encode(payload: &WorkoutPayload) -> Result<Vec<u8>, EncodeError> {
    ensure_encodable(payload)?;
    serde_json::to_vec(payload).map_err(EncodeError::Serialize)
}

/// Same as [`encode`], indented for humans.
pub fn encode_pretty(payload: &WorkoutPayload) -> Result<Vec<u8>, EncodeError> {
    ensure_encodable(payload)?;
    serde_json::to_vec_pretty(payload).map_err(EncodeError::Serialize)
}

pub fn decode(bytes: &[u8]) -> Result<WorkoutPayload, DecodeError> {
    let value: JsonValue = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;
    decode_value(value)
}

pub fn decode_str(s: &str) -> Result<WorkoutPayload, DecodeError> {
    decode(s.as_bytes())
}

fn decode_value(mut value: JsonValue) -> Result<WorkoutPayload, DecodeError> {
    let version = probe_version(&value)?;

    // Splits did not exist before v2; anything under that key is foreign.
    if version < u64::from(KM_SPLITS_SINCE)
        && let Some(obj) = value.as_object_mut()
        && obj.remove("kmSplits").is_some()
    {
        dlog!("ignoring kmSplits on schema v{version} payload");
    }

    serde_json::from_value(value).map_err(DecodeError::Malformed)
}

#[derive(Deserialize)]
struct VersionProbe {
    #[serde(rename = "schemaVersion")]
    schema_version: u64,
}

fn probe_version(value: &JsonValue) -> Result<u64, DecodeError> {
    let probe = VersionProbe::deserialize(value).map_err(DecodeError::Malformed)?;
    let found = probe.schema_version;
    if found < u64::from(MIN_SCHEMA_VERSION) || found > u64::from(SCHEMA_VERSION) {
        return Err(DecodeError::UnsupportedSchemaVersion {
            found,
            min: MIN_SCHEMA_VERSION,
            max: SCHEMA_VERSION,
        });
    }
    Ok(found)
}

/// Rejects anything [`decode`] would not give back unchanged.
fn ensure_encodable(p: &WorkoutPayload) -> Result<(), EncodeError> {
    let v = p.schema_version;
    if !(MIN_SCHEMA_VERSION..=SCHEMA_VERSION).contains(&v) {
        return Err(EncodeError::SchemaVersion {
            found: v,
            min: MIN_SCHEMA_VERSION,
            max: SCHEMA_VERSION,
        });
    }
    if v < KM_SPLITS_SINCE && p.km_splits.is_some() {
        return Err(EncodeError::SplitsBeforeVersion { found: v });
    }

    check_millis(p.start, "start")?;
    check_millis(p.end, "end")?;
    ensure_finite(p)
}

fn check_millis(t: DateTime<Utc>, field: &'static str) -> Result<(), EncodeError> {
    if t.nanosecond() % 1_000_000 == 0 {
        Ok(())
    } else {
        Err(EncodeError::SubMillisecond { field })
    }
}

// serde_json quietly writes NaN and infinities as `null`, which would read
// back as "not recorded". Reject them up front instead.
fn ensure_finite(p: &WorkoutPayload) -> Result<(), EncodeError> {
    check(p.duration, || "duration".to_string())?;

    let aggregates = [
        ("distanceMeters", p.distance_meters),
        ("totalEnergyKcal", p.total_energy_kcal),
        ("avgHR", p.avg_hr),
        ("totalAscent", p.total_ascent),
    ];
    for (name, value) in aggregates {
        check_opt(value, || name.to_string())?;
    }

    let series = [
        ("hrSeries", &p.hr_series),
        ("paceSeries", &p.pace_series),
        ("elevationSeries", &p.elevation_series),
    ];
    for (name, samples) in series {
        for (i, s) in samples.iter().flatten().enumerate() {
            check(s.t, || format!("{name}[{i}].t"))?;
            check(s.v, || format!("{name}[{i}].v"))?;
        }
    }

    for (i, pt) in p.route.iter().flatten().enumerate() {
        check(pt.lat, || format!("route[{i}].lat"))?;
        check(pt.lon, || format!("route[{i}].lon"))?;
        check_opt(pt.altitude, || format!("route[{i}].altitude"))?;
        check_opt(pt.t, || format!("route[{i}].t"))?;
    }

    for (i, s) in p.km_splits.iter().flatten().enumerate() {
        check(s.start_offset, || format!("kmSplits[{i}].startOffset"))?;
        check(s.end_offset, || format!("kmSplits[{i}].endOffset"))?;
        check(s.duration, || format!("kmSplits[{i}].duration"))?;
        check(s.distance_meters, || format!("kmSplits[{i}].distanceMeters"))?;
        check_opt(s.avg_hr, || format!("kmSplits[{i}].avgHR"))?;
        check_opt(s.avg_speed, || format!("kmSplits[{i}].avgSpeed"))?;
    }

    Ok(())
}

fn check(value: f64, field: impl FnOnce() -> String) -> Result<(), EncodeError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(EncodeError::NonFinite {
            field: field(),
            value,
        })
    }
}

fn check_opt(value: Option<f64>, field: impl FnOnce() -> String) -> Result<(), EncodeError> {
    value.map_or(Ok(()), |v| check(v, field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KilometerSplit, RoutePoint, TimedSample};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn sample_payload() -> WorkoutPayload {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 0).unwrap();
        let mut p = WorkoutPayload::new(Uuid::new_v4(), start, end);
        p.sport = Some("running".into());
        p.distance_meters = Some(5000.0);
        p.total_energy_kcal = Some(0.0);
        p.avg_hr = None;
        p.total_ascent = Some(12.5);
        p.hr_series = Some(vec![TimedSample::new(0.0, 110.0), TimedSample::new(1.5, 112.0)]);
        p.pace_series = Some(Vec::new());
        p.route = Some(vec![
            RoutePoint {
                lat: 48.39,
                lon: -4.48,
                altitude: Some(31.0),
                t: Some(0.0),
            },
            RoutePoint {
                lat: 48.391,
                lon: -4.481,
                altitude: None,
                t: None,
            },
        ]);
        p.km_splits = Some(vec![KilometerSplit {
            index: 1,
            start_offset: 0.0,
            end_offset: 355.0,
            duration: 355.0,
            distance_meters: 1000.0,
            avg_hr: Some(141.0),
            avg_speed: None,
        }]);
        p
    }

    #[test]
    fn round_trip_preserves_presence_and_absence() {
        let p = sample_payload();
        let back = decode(&encode(&p).unwrap()).unwrap();
        assert_eq!(back, p);
        assert_eq!(back.total_energy_kcal, Some(0.0));
        assert_eq!(back.avg_hr, None);
        assert_eq!(back.pace_series, Some(Vec::new()));
        assert!(back.elevation_series.is_none());
    }

    #[test]
    fn wire_uses_epoch_millis_and_omits_absent_fields() {
        let p = sample_payload();
        let v: JsonValue = serde_json::from_slice(&encode(&p).unwrap()).unwrap();

        assert_eq!(v["schemaVersion"], json!(2));
        assert_eq!(v["start"], json!(1_704_096_000_000_i64));
        assert_eq!(v["end"], json!(1_704_097_800_000_i64));
        assert_eq!(v["id"], json!(p.id.to_string()));
        assert_eq!(v["totalEnergyKcal"], json!(0.0));
        assert!(v.get("avgHR").is_none());
        assert!(v.get("elevationSeries").is_none());
        assert_eq!(v["kmSplits"][0]["avgHR"], json!(141.0));
        assert!(v["kmSplits"][0].get("avgSpeed").is_none());
        assert!(v["route"][1].get("altitude").is_none());
    }

    #[test]
    fn non_finite_values_fail_encoding() {
        let mut p = sample_payload();
        p.hr_series = Some(vec![TimedSample::new(0.0, 110.0), TimedSample::new(1.0, f64::NAN)]);
        match encode(&p) {
            Err(EncodeError::NonFinite { field, .. }) => assert_eq!(field, "hrSeries[1].v"),
            other => panic!("expected NonFinite, got {other:?}"),
        }

        let mut p = sample_payload();
        p.distance_meters = Some(f64::INFINITY);
        assert!(matches!(
            encode(&p),
            Err(EncodeError::NonFinite { ref field, .. }) if field == "distanceMeters"
        ));
    }

    #[test]
    fn sub_millisecond_timestamps_fail_encoding() {
        let mut p = sample_payload();
        p.start = Utc
            .with_ymd_and_hms(2024, 1, 1, 8, 0, 0)
            .unwrap()
            + chrono::Duration::microseconds(1500);
        assert!(matches!(
            encode(&p),
            Err(EncodeError::SubMillisecond { field: "start" })
        ));

        let mut p = sample_payload();
        p.end += chrono::Duration::nanoseconds(1);
        assert!(matches!(
            encode_pretty(&p),
            Err(EncodeError::SubMillisecond { field: "end" })
        ));

        // Whole milliseconds are fine.
        let mut p = sample_payload();
        p.start += chrono::Duration::milliseconds(7);
        assert_eq!(decode(&encode(&p).unwrap()).unwrap(), p);
    }

    #[test]
    fn unreadable_schema_versions_fail_encoding() {
        for version in [0, SCHEMA_VERSION + 1] {
            let mut p = sample_payload();
            p.schema_version = version;
            assert!(
                matches!(encode(&p), Err(EncodeError::SchemaVersion { found, .. }) if found == version),
                "version {version}"
            );
        }
    }

    #[test]
    fn v1_payload_with_splits_fails_encoding() {
        let mut p = sample_payload();
        p.schema_version = 1;
        assert!(matches!(
            encode(&p),
            Err(EncodeError::SplitsBeforeVersion { found: 1 })
        ));

        p.km_splits = None;
        assert_eq!(decode(&encode(&p).unwrap()).unwrap(), p);
    }

    #[test]
    fn decodes_v1_payload_without_splits() {
        let id = Uuid::new_v4();
        let bytes = json!({
            "schemaVersion": 1,
            "id": id.to_string(),
            "start": 1_704_096_000_000_i64,
            "end": 1_704_097_800_000_i64,
            "duration": 1800.0,
            "distanceMeters": 5000.0
        })
        .to_string();

        let p = decode_str(&bytes).unwrap();
        assert_eq!(p.schema_version, 1);
        assert_eq!(p.id, id);
        assert!(p.km_splits.is_none());
        assert_eq!(p.distance_meters, Some(5000.0));
    }

    #[test]
    fn v1_payload_ignores_splits_key() {
        let bytes = json!({
            "schemaVersion": 1,
            "id": Uuid::new_v4().to_string(),
            "start": 0,
            "end": 1000,
            "duration": 1.0,
            "kmSplits": [{"index": 1}]
        })
        .to_string();
        assert!(decode_str(&bytes).unwrap().km_splits.is_none());
    }

    #[test]
    fn newer_schema_version_is_rejected_as_such() {
        let mut v: JsonValue = serde_json::from_slice(&encode(&sample_payload()).unwrap()).unwrap();
        v["schemaVersion"] = json!(3);
        let err = decode(v.to_string().as_bytes()).unwrap_err();
        assert!(err.is_schema_version(), "{err}");

        // Rejected on version alone, even if the rest would not parse.
        let err = decode_str(r#"{"schemaVersion": 99, "start": "yesterday"}"#).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnsupportedSchemaVersion { found: 99, .. }
        ));

        let err = decode_str(r#"{"schemaVersion": 0}"#).unwrap_err();
        assert!(err.is_schema_version());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let p = sample_payload();
        let mut v: JsonValue = serde_json::from_slice(&encode(&p).unwrap()).unwrap();
        v["cadenceSeries"] = json!([{"t": 0.0, "v": 170.0}]);
        v["kmSplits"][0]["gradeAdjusted"] = json!(true);
        assert_eq!(decode(v.to_string().as_bytes()).unwrap(), p);
    }

    #[test]
    fn explicit_null_reads_as_absent() {
        let bytes = json!({
            "schemaVersion": 2,
            "id": Uuid::new_v4().to_string(),
            "start": 0,
            "end": 0,
            "duration": 0.0,
            "avgHR": null,
            "route": null
        })
        .to_string();
        let p = decode_str(&bytes).unwrap();
        assert!(p.avg_hr.is_none());
        assert!(p.route.is_none());
    }

    #[test]
    fn malformed_input_is_a_decode_error() {
        for bad in [
            "",
            "{not json",
            "[]",
            r#"{"schemaVersion": 2}"#,
            r#"{"schemaVersion": 2, "id": "nope", "start": 0, "end": 0, "duration": 0}"#,
            r#"{"schemaVersion": "2"}"#,
        ] {
            let err = decode_str(bad).unwrap_err();
            assert!(matches!(err, DecodeError::Malformed(_)), "{bad:?} -> {err}");
        }
    }

    mod roundtrip {
        use super::*;
        use proptest::prelude::*;

        fn finite() -> impl Strategy<Value = f64> {
            -1.0e9..1.0e9_f64
        }

        fn offset() -> impl Strategy<Value = f64> {
            0.0..1.0e5_f64
        }

        fn series() -> impl Strategy<Value = Option<Vec<TimedSample>>> {
            proptest::option::of(prop::collection::vec(
                (offset(), finite()).prop_map(|(t, v)| TimedSample::new(t, v)),
                0..8,
            ))
        }

        fn route() -> impl Strategy<Value = Option<Vec<RoutePoint>>> {
            let point = (
                -90.0..=90.0_f64,
                -180.0..=180.0_f64,
                proptest::option::of(finite()),
                proptest::option::of(offset()),
            )
                .prop_map(|(lat, lon, altitude, t)| RoutePoint {
                    lat,
                    lon,
                    altitude,
                    t,
                });
            proptest::option::of(prop::collection::vec(point, 0..8))
        }

        fn splits() -> impl Strategy<Value = Option<Vec<KilometerSplit>>> {
            let split = (
                offset(),
                offset(),
                finite(),
                proptest::option::of(finite()),
                proptest::option::of(finite()),
            );
            proptest::option::of(prop::collection::vec(split, 0..6)).prop_map(|splits| {
                splits.map(|raw| {
                    raw.into_iter()
                        .enumerate()
                        .map(|(i, (start, len, distance, avg_hr, avg_speed))| KilometerSplit {
                            index: u32::try_from(i + 1).unwrap(),
                            start_offset: start,
                            end_offset: start + len,
                            duration: len,
                            distance_meters: distance,
                            avg_hr,
                            avg_speed,
                        })
                        .collect()
                })
            })
        }

        fn payload() -> impl Strategy<Value = WorkoutPayload> {
            let header = (
                prop_oneof![Just(1_u32), Just(SCHEMA_VERSION)],
                any::<u128>(),
                proptest::option::of("[a-z_ ]{0,12}"),
                0_i64..4_102_444_800_000,
                0_i64..86_400_000,
                finite(),
            );
            let aggregates = (
                proptest::option::of(finite()),
                proptest::option::of(finite()),
                proptest::option::of(finite()),
                proptest::option::of(finite()),
            );
            let body = (series(), series(), series(), route(), splits());

            (header, aggregates, body).prop_map(
                |(
                    (version, id, sport, start_ms, len_ms, duration),
                    (distance, energy, avg_hr, ascent),
                    (hr, pace, elevation, route, splits),
                )| {
                    let start = Utc.timestamp_millis_opt(start_ms).unwrap();
                    let end = Utc.timestamp_millis_opt(start_ms + len_ms).unwrap();
                    WorkoutPayload {
                        schema_version: version,
                        id: Uuid::from_u128(id),
                        sport,
                        start,
                        end,
                        duration,
                        distance_meters: distance,
                        total_energy_kcal: energy,
                        avg_hr,
                        total_ascent: ascent,
                        hr_series: hr,
                        pace_series: pace,
                        elevation_series: elevation,
                        route,
                        km_splits: if version < KM_SPLITS_SINCE { None } else { splits },
                    }
                },
            )
        }

        proptest! {
            #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

            #[test]
            fn decode_inverts_encode(p in payload()) {
                let bytes = encode(&p).unwrap_or_else(|e| panic!("encode failed: {e}"));
                let back = decode(&bytes).unwrap_or_else(|e| panic!("decode failed: {e}"));
                prop_assert_eq!(back, p);
            }
        }
    }
}
