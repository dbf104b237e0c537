use crate::classify;
use crate::state::AppState;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use log::info;

/// Removes vehicles whose last GPS report is past the removal threshold.
/// The poll pipeline already filters fresh data; this sweep catches
/// vehicles that stopped reporting after they entered the map, and data
/// restored from disk after a restart.
pub fn remove_expired_vehicles(state: &AppState, now: DateTime<Utc>) {
    let mut to_remove: Vec<CompactString> = Vec::new();

    for r in state.vehicles.iter() {
        if classify::should_remove(r.value(), now) {
            to_remove.push(r.key().clone());
        }
    }

    if !to_remove.is_empty() {
        info!("GC: removing {} expired vehicles", to_remove.len());
        for id in &to_remove {
            state.vehicles.remove(id);
        }
    }
}
