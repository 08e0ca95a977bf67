use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 2;

/// Oldest schema version this build can still read.
pub const MIN_SCHEMA_VERSION: u32 = 1;

/// First schema version that defines `kmSplits`.
pub const KM_SPLITS_SINCE: u32 = 2;

/// A value tagged with its offset in seconds from workout start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedSample<V = f64> {
    pub t: f64,
    pub v: V,
}

impl<V> TimedSample<V> {
    pub const fn new(t: f64, v: V) -> Self {
        Self { t, v }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Offset in seconds from workout start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KilometerSplit {
    /// 1-based, strictly increasing across a workout.
    pub index: u32,
    pub start_offset: f64,
    pub end_offset: f64,
    pub duration: f64,
    pub distance_meters: f64,
    #[serde(rename = "avgHR", default, skip_serializing_if = "Option::is_none")]
    pub avg_hr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_speed: Option<f64>,
}

/// One finished workout as it travels between devices.
///
/// Every optional aggregate keeps "not recorded" (`None`) apart from a
/// recorded zero. A payload is never edited after construction; a correction
/// is a new payload with a new `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutPayload {
    pub schema_version: u32,
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sport: Option<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end: DateTime<Utc>,
    /// Seconds, as computed by the producer.
    pub duration: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_energy_kcal: Option<f64>,
    #[serde(rename = "avgHR", default, skip_serializing_if = "Option::is_none")]
    pub avg_hr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ascent: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hr_series: Option<Vec<TimedSample>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pace_series: Option<Vec<TimedSample>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation_series: Option<Vec<TimedSample>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Vec<RoutePoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub km_splits: Option<Vec<KilometerSplit>>,
}

impl WorkoutPayload {
    /// Minimal payload at the current schema version.
    ///
    /// Timestamps are truncated to whole milliseconds, the granularity they
    /// have on the wire, and `duration` is taken from `end - start`.
    pub fn new(id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let start = start.trunc_subsecs(3);
        let end = end.trunc_subsecs(3);
        #[allow(clippy::cast_precision_loss)]
        let duration = (end - start).num_milliseconds() as f64 / 1000.0;

        Self {
            schema_version: SCHEMA_VERSION,
            id,
            sport: None,
            start,
            end,
            duration,
            distance_meters: None,
            total_energy_kcal: None,
            avg_hr: None,
            total_ascent: None,
            hr_series: None,
            pace_series: None,
            elevation_series: None,
            route: None,
            km_splits: None,
        }
    }

    /// Structural problems a producer should have avoided.
    ///
    /// Advisory only: neither encoding nor decoding calls this.
    pub fn validate(&self) -> Vec<PayloadIssue> {
        let mut issues = Vec::new();

        if self.end < self.start {
            issues.push(PayloadIssue::EndBeforeStart);
        }

        let series = [
            ("hrSeries", &self.hr_series),
            ("paceSeries", &self.pace_series),
            ("elevationSeries", &self.elevation_series),
        ];
        for (name, samples) in series {
            let Some(samples) = samples else { continue };
            check_offsets(name, samples.iter().map(|s| Some(s.t)), &mut issues);
        }

        if let Some(route) = &self.route {
            for (i, p) in route.iter().enumerate() {
                if !(-90.0..=90.0).contains(&p.lat) || !(-180.0..=180.0).contains(&p.lon) {
                    issues.push(PayloadIssue::CoordinateOutOfRange {
                        index: i,
                        lat: p.lat,
                        lon: p.lon,
                    });
                }
            }
            check_offsets("route", route.iter().map(|p| p.t), &mut issues);
        }

        if let Some(splits) = &self.km_splits {
            let mut prev: Option<u32> = None;
            for s in splits {
                if prev.map_or(s.index != 1, |p| s.index <= p) {
                    issues.push(PayloadIssue::SplitIndex { index: s.index });
                }
                prev = Some(s.index);

                let span = s.end_offset - s.start_offset;
                if span < 0.0 || (s.duration - span).abs() > 1e-6 {
                    issues.push(PayloadIssue::SplitDuration { index: s.index });
                }
            }
        }

        issues
    }
}

fn check_offsets(
    series: &'static str,
    offsets: impl Iterator<Item = Option<f64>>,
    issues: &mut Vec<PayloadIssue>,
) {
    let mut last = f64::NEG_INFINITY;
    for (i, t) in offsets.enumerate() {
        let Some(t) = t else { continue };
        if t < 0.0 {
            issues.push(PayloadIssue::NegativeOffset { series, index: i });
        }
        if t < last {
            issues.push(PayloadIssue::OutOfOrder { series, index: i });
        }
        last = last.max(t);
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadIssue {
    #[error("end is before start")]
    EndBeforeStart,
    #[error("{series}[{index}] has a negative offset")]
    NegativeOffset { series: &'static str, index: usize },
    #[error("{series}[{index}] is earlier than the sample before it")]
    OutOfOrder { series: &'static str, index: usize },
    #[error("route[{index}] is outside the valid range: lat={lat} lon={lon}")]
    CoordinateOutOfRange { index: usize, lat: f64, lon: f64 },
    #[error("split {index} does not continue the 1-based index sequence")]
    SplitIndex { index: u32 },
    #[error("split {index} duration disagrees with its offsets")]
    SplitDuration { index: u32 },
}
