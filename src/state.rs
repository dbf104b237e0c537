use crate::model::VehiclePosition;

use compact_str::CompactString;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Shared application state: the latest processed snapshot, keyed by
/// vehicle id, plus metadata about when it was taken. Shared via `Arc`
/// between the poll loop, GC, persistence loop and the HTTP routes.
pub struct AppState {
    pub vehicles: DashMap<CompactString, VehiclePosition>,

    /// Epoch millis of the last successful refresh; 0 before the first one.
    pub last_refresh_ms: AtomicI64,

    /// Set when the most recent upstream poll returned nothing.
    pub no_data_received: AtomicBool,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            vehicles: DashMap::new(),
            last_refresh_ms: AtomicI64::new(0),
            no_data_received: AtomicBool::new(false),
        }
    }

    /// Replaces the snapshot wholesale: vehicles absent from the new poll
    /// disappear, present ones are overwritten. No incremental mutation.
    pub fn replace_snapshot(&self, vehicles: Vec<VehiclePosition>, refreshed_at_ms: i64) {
        let new_ids: HashSet<CompactString> =
            vehicles.iter().map(|v| v.vehicle_id.clone()).collect();

        let to_remove: Vec<CompactString> = self
            .vehicles
            .iter()
            .filter(|r| !new_ids.contains(r.key()))
            .map(|r| r.key().clone())
            .collect();
        for id in to_remove {
            self.vehicles.remove(&id);
        }

        for vp in vehicles {
            self.vehicles.insert(vp.vehicle_id.clone(), vp);
        }

        self.last_refresh_ms
            .store(refreshed_at_ms, Ordering::Relaxed);
        self.no_data_received.store(false, Ordering::Relaxed);
    }

    pub fn locations(&self) -> Vec<VehiclePosition> {
        self.vehicles.iter().map(|r| r.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Route, Trip};

    fn position(id: &str) -> VehiclePosition {
        VehiclePosition {
            vehicle_id: CompactString::from(id),
            lat: 47.0,
            lon: 19.0,
            heading: None,
            speed: None,
            last_updated: 0,
            trip: Trip {
                service_date: CompactString::from("2024-06-15"),
                trip_short_name: CompactString::from(""),
                route: Route {
                    text_color: CompactString::from(""),
                    short_name: CompactString::from(""),
                    long_name: CompactString::from(""),
                },
                trip_geometry: None,
                stoptimes: vec![],
                wheelchair_accessible: None,
                bikes_allowed: None,
                info_services: vec![],
                alerts: vec![],
            },
            delay: 0,
            train_position: 0.0,
            total_route_distance: 0.0,
            processed_stops: vec![],
            vehicle_progress: None,
        }
    }

    #[test]
    fn test_replace_snapshot_drops_missing_vehicles() {
        let state = AppState::new();
        state.replace_snapshot(vec![position("a"), position("b")], 1000);
        assert_eq!(state.vehicles.len(), 2);

        state.replace_snapshot(vec![position("b"), position("c")], 2000);
        assert_eq!(state.vehicles.len(), 2);
        assert!(
            !state.vehicles.contains_key("a"),
            "a was not in the new poll"
        );
        assert!(state.vehicles.contains_key("b"));
        assert!(state.vehicles.contains_key("c"));
        assert_eq!(state.last_refresh_ms.load(Ordering::Relaxed), 2000);
    }
}
