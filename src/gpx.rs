use crate::types::{KilometerSplit, RoutePoint, TimedSample, WorkoutPayload};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::reader::Reader;
use std::fs;
use std::io::{BufReader, Cursor};
use std::path::Path;
use uuid::Uuid;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const SPLIT_M: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackPoint {
    pub t: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub ele: Option<f64>,
}

/// Builds a payload with route, elevation, pace and splits from a GPX track.
pub fn payload_from_gpx(path: &Path, sport: Option<String>) -> Result<WorkoutPayload> {
    let points =
        parse_gpx_points(path).with_context(|| format!("Parsing GPX: {}", path.display()))?;
    tracing::info!(path = %path.display(), points = points.len(), "parsed gpx track");

    let mut payload = payload_from_points(&points)
        .with_context(|| format!("Building payload from {}", path.display()))?;
    payload.sport = sport;
    Ok(payload)
}

pub fn payload_from_points(points: &[TrackPoint]) -> Result<WorkoutPayload> {
    let mut points = points.to_vec();
    points.sort_by_key(|p| p.t);

    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        bail!("GPX track has no timed points");
    };

    let mut payload = WorkoutPayload::new(Uuid::new_v4(), first.t, last.t);
    let start = payload.start;
    #[allow(clippy::cast_precision_loss)]
    let offset = |t: DateTime<Utc>| (t - start).num_milliseconds() as f64 / 1000.0;

    payload.route = Some(
        points
            .iter()
            .map(|p| RoutePoint {
                lat: p.lat,
                lon: p.lon,
                altitude: p.ele,
                t: Some(offset(p.t)),
            })
            .collect(),
    );

    let elevation: Vec<TimedSample> = points
        .iter()
        .filter_map(|p| p.ele.map(|e| TimedSample::new(offset(p.t), e)))
        .collect();
    if !elevation.is_empty() {
        payload.total_ascent = Some(
            elevation
                .windows(2)
                .map(|w| (w[1].v - w[0].v).max(0.0))
                .sum(),
        );
        payload.elevation_series = Some(elevation);
    }

    if points.len() < 2 {
        return Ok(payload);
    }

    let mut total = 0.0;
    let mut pace = Vec::new();
    let mut splits = Vec::new();
    let mut split_start = 0.0;
    let mut split_from_m = 0.0;

    for w in points.windows(2) {
        let (t0, t1) = (offset(w[0].t), offset(w[1].t));
        let d = haversine_m(w[0].lat, w[0].lon, w[1].lat, w[1].lon);
        let dt = t1 - t0;

        if d > 0.0 && dt > 0.0 {
            pace.push(TimedSample::new(t1, dt / (d / 1000.0)));
        }

        // Cut a split at every whole kilometre this segment crosses.
        while d > 0.0 && total + d >= split_from_m + SPLIT_M {
            let frac = (split_from_m + SPLIT_M - total) / d;
            let t_cross = dt.mul_add(frac, t0);
            splits.push(make_split(splits.len(), split_start, t_cross, SPLIT_M));
            split_start = t_cross;
            split_from_m += SPLIT_M;
        }
        total += d;
    }

    let remainder = total - split_from_m;
    if remainder > 0.0 {
        let end = offset(last.t);
        splits.push(make_split(splits.len(), split_start, end, remainder));
    }

    payload.distance_meters = Some(total);
    payload.pace_series = (!pace.is_empty()).then_some(pace);
    payload.km_splits = (!splits.is_empty()).then_some(splits);
    Ok(payload)
}

fn make_split(prev: usize, start: f64, end: f64, distance_m: f64) -> KilometerSplit {
    let duration = end - start;
    KilometerSplit {
        index: u32::try_from(prev + 1).unwrap_or(u32::MAX),
        start_offset: start,
        end_offset: end,
        duration,
        distance_meters: distance_m,
        avg_hr: None,
        avg_speed: (duration > 0.0).then(|| distance_m / duration),
    }
}

pub fn haversine_m(lat0: f64, lon0: f64, lat1: f64, lon1: f64) -> f64 {
    let dlat = (lat1 - lat0).to_radians();
    let dlon = (lon1 - lon0).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat0.to_radians().cos() * lat1.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

pub fn parse_gpx_points(path: &Path) -> Result<Vec<TrackPoint>> {
    let bytes = fs::read(path)?;
    parse_gpx_bytes(bytes)
}

fn parse_gpx_bytes(bytes: Vec<u8>) -> Result<Vec<TrackPoint>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let cursor = Cursor::new(bytes);
    let reader = BufReader::new(cursor);
    let mut xml = Reader::from_reader(reader);
    xml.config_mut().trim_text(true);

    let mut buf = Vec::new();

    let mut st = GpxState::default();
    let mut out: Vec<TrackPoint> = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => handle_gpx_start(&mut st, &e),
            Ok(Event::End(e)) => handle_gpx_end(&mut st, &e, &mut out),
            Ok(Event::Text(e)) => {
                handle_gpx_text(&mut st, &e);
            }
            Err(e) => bail!("GPX XML parse error: {e}"),
            _ => {}
        }
        buf.clear();
    }

    if st.off_globe > 0 {
        tracing::warn!(dropped = st.off_globe, "GPX points with out-of-range coordinates");
    }
    Ok(out)
}

#[derive(Default)]
struct GpxState {
    in_trkpt: bool,
    in_time: bool,
    in_ele: bool,

    // (lat, lon), None when missing or off the globe.
    cur_pos: Option<(f64, f64)>,
    cur_time: Option<DateTime<Utc>>,
    cur_ele: Option<f64>,
    off_globe: usize,
}

fn handle_gpx_start(st: &mut GpxState, e: &BytesStart<'_>) {
    match e.name().as_ref() {
        b"trkpt" => {
            st.in_trkpt = true;
            st.in_time = false;
            st.in_ele = false;

            st.cur_pos = match trkpt_position(e) {
                Position::OnGlobe(lat, lon) => Some((lat, lon)),
                Position::OffGlobe => {
                    st.off_globe += 1;
                    None
                }
                Position::Missing => None,
            };
            st.cur_time = None;
            st.cur_ele = None;
        }
        b"time" if st.in_trkpt => st.in_time = true,
        b"ele" if st.in_trkpt => st.in_ele = true,
        _ => {}
    }
}

fn handle_gpx_end(st: &mut GpxState, e: &BytesEnd<'_>, out: &mut Vec<TrackPoint>) {
    match e.name().as_ref() {
        b"time" => st.in_time = false,
        b"ele" => st.in_ele = false,
        b"trkpt" => {
            st.in_trkpt = false;

            // Untimed points cannot be placed on the workout clock.
            let (Some((lat, lon)), Some(t)) = (st.cur_pos, st.cur_time) else {
                return;
            };

            out.push(TrackPoint {
                t,
                lat,
                lon,
                ele: st.cur_ele,
            });
        }
        _ => {}
    }
}

fn handle_gpx_text(st: &mut GpxState, e: &quick_xml::events::BytesText<'_>) {
    if st.in_time
        && let Ok(s) = e.decode()
        && let Ok(dt_fixed) = DateTime::parse_from_rfc3339(s.as_ref())
    {
        st.cur_time = Some(dt_fixed.with_timezone(&Utc));
    } else if st.in_ele
        && let Ok(s) = e.decode()
        && let Ok(v) = s.parse::<f64>()
        && v.is_finite()
    {
        st.cur_ele = Some(v);
    }
}

enum Position {
    OnGlobe(f64, f64),
    OffGlobe,
    Missing,
}

/// Reads `lat`/`lon` off a `<trkpt>`. Values outside [-90, 90] and
/// [-180, 180] are rejected here so they never reach a [`RoutePoint`].
fn trkpt_position(e: &BytesStart<'_>) -> Position {
    let mut lat: Option<f64> = None;
    let mut lon: Option<f64> = None;

    for a in e.attributes().with_checks(false).flatten() {
        let slot = match a.key.as_ref() {
            b"lat" => &mut lat,
            b"lon" => &mut lon,
            _ => continue,
        };
        *slot = a
            .unescape_value()
            .ok()
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite());
    }

    match (lat, lon) {
        (Some(lat), Some(lon)) if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) => {
            Position::OnGlobe(lat, lon)
        }
        (Some(_), Some(_)) => Position::OffGlobe,
        _ => Position::Missing,
    }
}
