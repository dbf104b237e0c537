use crate::geometry;
use crate::model::{StopTime, VehicleKind, VehiclePosition};
use crate::timeutil::seconds_since_day;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Europe::Budapest;
use geo::{Coord, LineString, Point};

/// Show a vehicle as stale after this many minutes without an update.
pub const STALENESS_THRESHOLD_MINUTES: f64 = 30.0;
/// Drop a vehicle entirely after this many minutes without an update.
pub const REMOVAL_THRESHOLD_MINUTES: f64 = 120.0;

/// "Near a station" radius in meters.
const STATION_RADIUS_M: f64 = 1000.0;
/// Maximum plausible distance from the route geometry, in kilometers.
const ROUTE_DISTANCE_THRESHOLD_KM: f64 = 2.0;
/// Long routes are downsampled to this many points before distance checks.
const MAX_ROUTE_POINTS: usize = 1000;

/// Whether the vehicle is actually underway.
///
/// A train parked at its departure station before departure time, a train
/// that has arrived at its destination, and a train that has wandered off
/// its route are all reported as inactive. A trip with no stop-times cannot
/// be judged and counts as active.
pub fn is_active(vp: &VehiclePosition, now: DateTime<Utc>) -> bool {
    let stops = &vp.trip.stoptimes;
    if stops.is_empty() {
        return true;
    }

    if is_far_from_route(vp) {
        return false;
    }

    let here = Point::new(vp.lon, vp.lat);
    let current_time = seconds_since_day(&vp.trip.service_date, now);

    if let Some(first) = stops.first() {
        let departure_station = Point::new(first.stop.lon, first.stop.lat);
        if geometry::distance_m(here, departure_station) <= STATION_RADIUS_M {
            let departure = first.realtime_departure.or(first.scheduled_departure);
            if let Some(departure) = departure {
                if current_time < departure {
                    // At the departure station, hasn't left yet.
                    return false;
                }
            }
        }
    }

    if let Some(last) = stops.last() {
        let destination = Point::new(last.stop.lon, last.stop.lat);
        if geometry::distance_m(here, destination) <= STATION_RADIUS_M {
            // Arrived (or about to).
            return false;
        }
    }

    true
}

fn minutes_since_update(vp: &VehiclePosition, now: DateTime<Utc>) -> f64 {
    (now.timestamp() - vp.last_updated) as f64 / 60.0
}

/// True when the last GPS report is older than the staleness threshold.
pub fn is_stale(vp: &VehiclePosition, now: DateTime<Utc>) -> bool {
    minutes_since_update(vp, now) > STALENESS_THRESHOLD_MINUTES
}

/// True when the last GPS report is so old the vehicle should be dropped.
pub fn should_remove(vp: &VehiclePosition, now: DateTime<Utc>) -> bool {
    minutes_since_update(vp, now) > REMOVAL_THRESHOLD_MINUTES
}

/// True when the vehicle is more than 2 km from its route geometry.
///
/// Missing or malformed geometry can never condemn a vehicle: every failure
/// path degrades to `false`.
pub fn is_far_from_route(vp: &VehiclePosition) -> bool {
    let Some(trip_geometry) = vp.trip.trip_geometry.as_ref() else {
        return false;
    };

    let coords = match geometry::decode_route(&trip_geometry.points) {
        Ok(coords) => coords,
        Err(_) => return false,
    };

    let coords: Vec<Coord> = coords
        .into_iter()
        .filter(|c| c.x.is_finite() && c.y.is_finite())
        .collect();
    if coords.len() < 2 {
        return false;
    }

    let coords = geometry::downsample(&coords, MAX_ROUTE_POINTS);
    if coords.len() < 2 {
        return false;
    }

    let here = Coord {
        x: vp.lon,
        y: vp.lat,
    };

    // Rough conversion: 1 degree is about 111 km.
    let buffer_deg = ROUTE_DISTANCE_THRESHOLD_KM / 111.0;
    if geometry::outside_buffered_bbox(&coords, here, buffer_deg) {
        return true;
    }

    let line = LineString::new(coords);
    match geometry::distance_to_line_km(&line, Point::from(here)) {
        Some(km) => km > ROUTE_DISTANCE_THRESHOLD_KM,
        None => false,
    }
}

fn realtime_matches_schedule(st: &StopTime) -> bool {
    let arrival_ok = match (st.realtime_arrival, st.scheduled_arrival) {
        (Some(rt), Some(sched)) => rt == sched,
        _ => true,
    };
    let departure_ok = match (st.realtime_departure, st.scheduled_departure) {
        (Some(rt), Some(sched)) => rt == sched,
        _ => true,
    };
    arrival_ok && departure_ok
}

/// Heuristic cross-check of the GPS-derived delay against the realtime
/// schedule. Two contradictions are flagged:
///
/// Rule A: the realtime feed reports zero deviation at every stop it covers,
/// yet the vehicle claims a delay over 5 minutes.
///
/// Rule B: at the next realtime-covered stop the schedule-derived delay is
/// positive but disagrees with a claimed delay over 10 minutes by more than
/// 5 minutes.
///
/// The 2/5/10 minute thresholds encode tolerance for GPS and schedule noise
/// and are kept exactly as tuned.
pub fn data_appears_falsified(vp: &VehiclePosition, stale: bool, now: DateTime<Utc>) -> bool {
    if stale {
        return false;
    }
    // Very small delays should not trigger falsified flags.
    if vp.delay <= 2 {
        return false;
    }

    let stoptimes = &vp.trip.stoptimes;

    // Rule A: realtime exists but equals scheduled everywhere.
    let realtime_stops: Vec<&StopTime> = stoptimes
        .iter()
        .filter(|st| st.realtime_arrival.is_some() || st.realtime_departure.is_some())
        .collect();
    let all_realtime_match =
        !realtime_stops.is_empty() && realtime_stops.iter().all(|st| realtime_matches_schedule(st));

    if all_realtime_match && vp.delay > 5 {
        return true;
    }

    // Rule B: compare against the current or next stop with realtime data.
    let seconds_since_midnight = now.with_timezone(&Budapest).num_seconds_from_midnight() as i64;

    let relevant_stop = stoptimes
        .iter()
        .find(|st| {
            st.realtime_arrival
                .is_some_and(|t| t >= seconds_since_midnight)
        })
        .or_else(|| {
            stoptimes.iter().find(|st| {
                st.realtime_departure
                    .is_some_and(|t| t >= seconds_since_midnight)
            })
        });

    if let Some(st) = relevant_stop {
        let scheduled = st.scheduled_arrival.or(st.scheduled_departure);
        let realtime = st.realtime_arrival.or(st.realtime_departure);

        if let (Some(scheduled), Some(realtime)) = (scheduled, realtime) {
            let scheduled_delay_minutes = ((realtime - scheduled) as f64 / 60.0).round() as i64;

            if scheduled_delay_minutes > 0 && vp.delay > 10 {
                let delay_difference = (scheduled_delay_minutes - vp.delay).abs();
                if delay_difference > 5 {
                    return true;
                }
            }
        }
    }

    false
}

/// Display category from the route long name. Total: every long name maps
/// to exactly one kind.
pub fn vehicle_kind(vp: &VehiclePosition) -> VehicleKind {
    let long_name = vp.trip.route.long_name.as_str();
    if long_name.starts_with('H') {
        VehicleKind::Hev
    } else if long_name == "1" {
        VehicleKind::TramTrain
    } else {
        VehicleKind::Train
    }
}
