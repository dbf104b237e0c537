use crate::classify;
use crate::geometry;
use crate::model::{ProcessedStop, Trip, VehicleProgress, VehiclePosition};
use crate::timeutil::seconds_since_day;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use geo::Coord;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Keeps the most recently updated entry per vehicle id. The upstream feed
/// occasionally reports the same vehicle twice within one response.
pub fn dedupe_by_vehicle_id(locations: Vec<VehiclePosition>) -> Vec<VehiclePosition> {
    let mut latest_by_id: HashMap<CompactString, VehiclePosition> = HashMap::new();

    for loc in locations {
        if loc.vehicle_id.is_empty() {
            continue;
        }
        match latest_by_id.entry(loc.vehicle_id.clone()) {
            Entry::Occupied(mut e) => {
                if loc.last_updated > e.get().last_updated {
                    e.insert(loc);
                }
            }
            Entry::Vacant(e) => {
                e.insert(loc);
            }
        }
    }

    latest_by_id.into_values().collect()
}

pub struct DelayAndPosition {
    /// Seconds behind (or ahead of, when negative) the interpolated schedule.
    pub delay_seconds: f64,
    pub train_position: f64,
    pub total_route_distance: f64,
    pub processed_stops: Vec<ProcessedStop>,
    pub vehicle_progress: VehicleProgress,
}

/// Removes repeated coordinates anywhere in the sequence; projection math
/// dislikes zero-length and revisited segments.
fn unique_coords(coords: &[Coord]) -> Vec<Coord> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(coords.len());
    for c in coords {
        if seen.insert((c.x.to_bits(), c.y.to_bits())) {
            out.push(*c);
        }
    }
    out
}

/// Snaps each stop onto the route line and orders them by distance along it.
fn snap_stops(route_coords: &[Coord], trip: &Trip) -> Vec<ProcessedStop> {
    if route_coords.len() < 2 {
        return Vec::new();
    }

    let mut processed: Vec<ProcessedStop> = trip
        .stoptimes
        .iter()
        .map(|st| {
            let coord = Coord {
                x: st.stop.lon,
                y: st.stop.lat,
            };
            ProcessedStop {
                id: st.stop.name.clone(),
                original_coords: [st.stop.lon, st.stop.lat],
                distance_along_route: geometry::project(route_coords, coord),
                stop_time_info: None,
            }
        })
        .collect();

    processed.sort_by(|a, b| {
        a.distance_along_route
            .total_cmp(&b.distance_along_route)
    });
    processed
}

/// Locates the vehicle between its snapped stops.
fn vehicle_progress(
    route_coords: &[Coord],
    processed_stops: &[ProcessedStop],
    vehicle: Coord,
    heading: Option<f64>,
) -> VehicleProgress {
    let empty = VehicleProgress {
        last_stop: CompactString::new(""),
        next_stop: CompactString::new(""),
        progress: 0.0,
    };
    let Some(first) = processed_stops.first() else {
        return empty;
    };
    if route_coords.len() < 2 {
        return empty;
    }

    let along = geometry::project_with_heading(route_coords, vehicle, heading);

    let mut last_stop = first;
    let mut next_stop = None;
    for stop in processed_stops {
        if stop.distance_along_route <= along {
            last_stop = stop;
        } else {
            next_stop = Some(stop);
            break;
        }
    }

    let Some(next_stop) = next_stop else {
        // Past the final stop.
        let final_id = processed_stops
            .last()
            .map(|s| s.id.clone())
            .unwrap_or_default();
        return VehicleProgress {
            last_stop: final_id.clone(),
            next_stop: final_id,
            progress: 1.0,
        };
    };

    let leg = next_stop.distance_along_route - last_stop.distance_along_route;
    let traveled = along - last_stop.distance_along_route;
    let progress = if leg == 0.0 { 1.0 } else { traveled / leg };

    VehicleProgress {
        last_stop: last_stop.id.clone(),
        next_stop: next_stop.id.clone(),
        progress,
    }
}

/// Derives delay and along-route position for one vehicle.
///
/// The delay is the gap between the current seconds-since-service-day and
/// the scheduled time interpolated between the last stop's departure and
/// the next stop's arrival, at the vehicle's progress ratio.
pub fn delay_and_position(
    calculate_at: DateTime<Utc>,
    trip: &Trip,
    route_coords: &[Coord],
    lat: f64,
    lon: f64,
    heading: Option<f64>,
) -> DelayAndPosition {
    let current_time = seconds_since_day(&trip.service_date, calculate_at);

    let route_coords = unique_coords(route_coords);
    let vehicle = Coord { x: lon, y: lat };

    let mut processed_stops = snap_stops(&route_coords, trip);

    let progress = vehicle_progress(&route_coords, &processed_stops, vehicle, heading);

    let train_position = if route_coords.len() >= 2 {
        geometry::project_with_heading(&route_coords, vehicle, heading)
    } else {
        0.0
    };

    let total_route_distance = processed_stops
        .iter()
        .map(|s| s.distance_along_route)
        .fold(0.0, f64::max);

    let find_stop_time = |name: &str| {
        trip.stoptimes
            .iter()
            .find(|st| st.stop.name.as_str() == name)
    };

    let mut delay_seconds = 0.0;
    if let (Some(previous), Some(next)) = (
        find_stop_time(&progress.last_stop),
        find_stop_time(&progress.next_stop),
    ) {
        let prev_dep = previous.scheduled_departure.unwrap_or(0);
        let next_arr = next.scheduled_arrival.unwrap_or(0);

        let time_between_stops = (next_arr - prev_dep) as f64;
        let interpolated_time = prev_dep as f64 + time_between_stops * progress.progress;

        delay_seconds = current_time as f64 - interpolated_time;
    }

    // Attach the stop-time info after the lookups above.
    for p_stop in &mut processed_stops {
        p_stop.stop_time_info = find_stop_time(&p_stop.id).cloned();
    }

    DelayAndPosition {
        delay_seconds,
        train_position,
        total_route_distance,
        processed_stops,
        vehicle_progress: progress,
    }
}

/// Full per-poll enrichment: decode the route, derive delay and progress,
/// and drop vehicles past the removal threshold. Delay is computed at the
/// vehicle's own report time, not at the poll time.
pub fn process_locations(
    locations: Vec<VehiclePosition>,
    now: DateTime<Utc>,
) -> Vec<VehiclePosition> {
    let mut processed = Vec::with_capacity(locations.len());

    for mut loc in locations {
        let route_coords = loc
            .trip
            .trip_geometry
            .as_ref()
            .and_then(|g| geometry::decode_route(&g.points).ok())
            .unwrap_or_default();

        let reported_at = DateTime::from_timestamp(loc.last_updated, 0).unwrap_or(now);

        let derived = delay_and_position(
            reported_at,
            &loc.trip,
            &route_coords,
            loc.lat,
            loc.lon,
            loc.heading,
        );

        loc.delay = (derived.delay_seconds / 60.0).round() as i64;
        loc.train_position = derived.train_position;
        loc.total_route_distance = derived.total_route_distance;
        loc.processed_stops = derived.processed_stops;
        loc.vehicle_progress = Some(derived.vehicle_progress);

        if !classify::should_remove(&loc, now) {
            processed.push(loc);
        }
    }

    processed
}
