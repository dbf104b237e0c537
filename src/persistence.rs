use crate::model::VehiclePosition;
use crate::state::AppState;

use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::Ordering;

#[derive(Serialize, Deserialize)]
struct PersistedSnapshot {
    timestamp_ms: i64,
    no_data_received: bool,
    vehicles: Vec<VehiclePosition>,
}

/// Writes the current snapshot to `<dir>/vehicles.bin` so a restart within
/// the staleness window resumes with data instead of an empty map.
pub fn save_state(state: &AppState, dir: &str) -> Result<()> {
    let _ = std::fs::create_dir_all(dir);

    let snapshot = PersistedSnapshot {
        timestamp_ms: state.last_refresh_ms.load(Ordering::Relaxed),
        no_data_received: state.no_data_received.load(Ordering::Relaxed),
        vehicles: state.locations(),
    };

    let path = format!("{}/vehicles.bin", dir);
    let f = File::create(path)?;
    bincode::serialize_into(f, &snapshot)?;

    Ok(())
}

/// Loads a previously saved snapshot, if any. Corrupt or missing files are
/// non-fatal; the GC sweep drops whatever has expired in the meantime.
pub fn load_state(state: &AppState, dir: &str) -> Result<()> {
    let path = format!("{}/vehicles.bin", dir);
    if !Path::new(&path).exists() {
        return Ok(());
    }

    let f = File::open(&path)?;
    let snapshot: PersistedSnapshot = bincode::deserialize_from(f)?;

    for vp in snapshot.vehicles {
        state.vehicles.insert(vp.vehicle_id.clone(), vp);
    }
    state
        .last_refresh_ms
        .store(snapshot.timestamp_ms, Ordering::Relaxed);
    state
        .no_data_received
        .store(snapshot.no_data_received, Ordering::Relaxed);

    info!("Loaded {} vehicles from disk", state.vehicles.len());
    Ok(())
}
