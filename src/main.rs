use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use warp::Filter;

mod classify;
mod gc;
mod geometry;
mod model;
mod persistence;
mod preprocess;
mod settings;
mod state;
mod timeutil;
mod upstream;

use model::{TrainFeature, TrainFeatureCollection, TrainLocation, TrainsResponse};
use settings::{MapSettings, SettingsStore};
use state::AppState;
use upstream::UpstreamClient;

const POLL_INTERVAL: Duration = Duration::from_secs(60);
const PERSIST_INTERVAL: Duration = Duration::from_secs(60);
/// Snapshots older than this are withheld from clients entirely.
const MAX_STALE_DATA_AGE_MS: i64 = 15 * 60 * 1000;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let endpoint = std::env::var("POSITIONS_ENDPOINT").expect("POSITIONS_ENDPOINT not set");
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

    info!("Initializing application state...");
    let state = Arc::new(AppState::new());

    let settings_path = std::path::Path::new(&data_dir).join("settings.json");
    let settings_store = Arc::new(SettingsStore::load(settings_path));
    settings_store.subscribe(|s| info!("Settings changed: {:?}", s));

    // Recovery: resume from the last persisted snapshot, minus whatever
    // expired while we were down.
    if let Err(e) = persistence::load_state(&state, &data_dir) {
        warn!("Failed to load previous snapshot: {:#}", e);
    }
    gc::remove_expired_vehicles(&state, Utc::now());

    // Persistence loop
    let state_persist = state.clone();
    let persist_dir = data_dir.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(PERSIST_INTERVAL).await;
            if let Err(e) = persistence::save_state(&state_persist, &persist_dir) {
                error!("Error saving snapshot: {:#}", e);
            }
        }
    });

    // Poll loop: refresh, then sweep. Failures wait for the next tick.
    let client = UpstreamClient::new(endpoint)?;
    let state_poll = state.clone();
    tokio::spawn(async move {
        loop {
            if let Err(e) = upstream::refresh(&client, &state_poll).await {
                error!("Refresh failed: {:#}", e);
            }
            gc::remove_expired_vehicles(&state_poll, Utc::now());
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    });

    // HTTP server
    let state_filter_base = state.clone();
    let state_filter = warp::any().map(move || state_filter_base.clone()).boxed();
    let settings_filter_base = settings_store.clone();
    let settings_filter = warp::any()
        .map(move || settings_filter_base.clone())
        .boxed();

    // GET /trains
    let trains_route = warp::path!("trains")
        .and(warp::get())
        .and(state_filter.clone())
        .and(settings_filter.clone())
        .map(|state: Arc<AppState>, store: Arc<SettingsStore>| {
            warp::reply::json(&trains_response(&state, &store))
        });

    // GET /trains/geojson
    let geojson_route = warp::path!("trains" / "geojson")
        .and(warp::get())
        .and(state_filter.clone())
        .and(settings_filter.clone())
        .map(|state: Arc<AppState>, store: Arc<SettingsStore>| {
            warp::reply::json(&trains_geojson(&state, &store))
        });

    // GET /settings. Mobile clients announce themselves with ?mobile=true,
    // which pins tooltips off for the process regardless of the stored
    // preference.
    let settings_get = warp::path!("settings")
        .and(warp::get())
        .and(warp::query::<SettingsQuery>())
        .and(settings_filter.clone())
        .map(|query: SettingsQuery, store: Arc<SettingsStore>| {
            if let Some(mobile) = query.mobile {
                store.set_mobile(mobile);
            }
            warp::reply::json(&settings_reply(&store))
        });

    // PUT /settings
    let settings_put = warp::path!("settings")
        .and(warp::put())
        .and(warp::body::json())
        .and(settings_filter.clone())
        .map(
            |body: MapSettings, store: Arc<SettingsStore>| match store.replace(body) {
                Ok(updated) => warp::reply::with_status(
                    warp::reply::json(&updated),
                    warp::http::StatusCode::OK,
                ),
                Err(e) => {
                    error!("Failed to persist settings: {:#}", e);
                    warp::reply::with_status(
                        warp::reply::json(
                            &serde_json::json!({"error": "failed to persist settings"}),
                        ),
                        warp::http::StatusCode::INTERNAL_SERVER_ERROR,
                    )
                }
            },
        );

    // GET /health
    let health_route = warp::path!("health")
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({"status": "ok"})));

    let routes = trains_route
        .or(geojson_route)
        .or(settings_get)
        .or(settings_put)
        .or(health_route)
        .boxed();

    let server_port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse()
        .expect("Invalid PORT env variable");
    info!("Server running at http://localhost:{}", server_port);
    warp::serve(routes).run(([0, 0, 0, 0], server_port)).await;

    Ok(())
}

#[derive(serde::Deserialize)]
struct SettingsQuery {
    #[serde(default)]
    mobile: Option<bool>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SettingsResponse {
    #[serde(flatten)]
    settings: MapSettings,
    effective_show_tooltip: bool,
}

fn settings_reply(store: &SettingsStore) -> SettingsResponse {
    SettingsResponse {
        settings: store.get(),
        effective_show_tooltip: store.effective_show_tooltip(),
    }
}

struct SnapshotMeta {
    timestamp: String,
    data_age_minutes: i64,
    no_data_received: bool,
    /// Nothing fresh enough to serve.
    withheld: bool,
}

fn snapshot_meta(state: &AppState) -> SnapshotMeta {
    let refreshed_ms = state.last_refresh_ms.load(Ordering::Relaxed);
    if refreshed_ms == 0 {
        return SnapshotMeta {
            timestamp: Utc::now().to_rfc3339(),
            data_age_minutes: 0,
            no_data_received: true,
            withheld: true,
        };
    }

    let age_ms = Utc::now().timestamp_millis() - refreshed_ms;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(refreshed_ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();

    SnapshotMeta {
        timestamp,
        data_age_minutes: age_ms / 60_000,
        no_data_received: state.no_data_received.load(Ordering::Relaxed),
        withheld: age_ms > MAX_STALE_DATA_AGE_MS,
    }
}

/// Classifies every stored vehicle and drops the kinds the settings hide.
fn visible_locations(state: &AppState, store: &SettingsStore) -> Vec<TrainLocation> {
    let now = Utc::now();
    let settings = store.get();
    let mut locations: Vec<TrainLocation> = state
        .locations()
        .into_iter()
        .filter_map(|vp| {
            let kind = classify::vehicle_kind(&vp);
            if !settings.kind_visible(kind) {
                return None;
            }
            let stale = classify::is_stale(&vp, now);
            Some(TrainLocation {
                kind,
                active: classify::is_active(&vp, now),
                stale,
                data_falsified: classify::data_appears_falsified(&vp, stale, now),
                position: vp,
            })
        })
        .collect();
    // Stable output ordering for clients and tests.
    locations.sort_by(|a, b| a.position.vehicle_id.cmp(&b.position.vehicle_id));
    locations
}

fn trains_response(state: &AppState, store: &SettingsStore) -> TrainsResponse {
    let meta = snapshot_meta(state);
    if meta.withheld {
        return TrainsResponse {
            timestamp: meta.timestamp,
            no_data_received: true,
            data_age_minutes: meta.data_age_minutes,
            locations: vec![],
        };
    }

    TrainsResponse {
        timestamp: meta.timestamp,
        no_data_received: meta.no_data_received,
        data_age_minutes: meta.data_age_minutes,
        locations: visible_locations(state, store),
    }
}

fn trains_geojson(state: &AppState, store: &SettingsStore) -> TrainFeatureCollection {
    let meta = snapshot_meta(state);
    let features = if meta.withheld {
        vec![]
    } else {
        visible_locations(state, store)
            .iter()
            .map(TrainFeature::from_location)
            .collect()
    };

    TrainFeatureCollection {
        r#type: "FeatureCollection",
        timestamp: meta.timestamp,
        no_data_received: meta.no_data_received || meta.withheld,
        data_age_minutes: meta.data_age_minutes,
        features,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compact_str::CompactString;
    use model::{Route, Trip, VehiclePosition};

    fn position(id: &str, long_name: &str) -> VehiclePosition {
        VehiclePosition {
            vehicle_id: CompactString::from(id),
            lat: 47.0,
            lon: 19.0,
            heading: None,
            speed: None,
            last_updated: Utc::now().timestamp(),
            trip: Trip {
                service_date: CompactString::from("2024-06-15"),
                trip_short_name: CompactString::from("1234"),
                route: Route {
                    text_color: CompactString::from(""),
                    short_name: CompactString::from(""),
                    long_name: CompactString::from(long_name),
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

    fn empty_store(name: &str) -> SettingsStore {
        let mut p = std::env::temp_dir();
        p.push(format!("vonat-tracker-main-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_file(&p);
        SettingsStore::load(p)
    }

    #[test]
    fn test_trains_response_filters_hidden_kinds() {
        let state = AppState::new();
        state.replace_snapshot(
            vec![
                position("a", "Budapest - Szeged"), // train
                position("b", "H5"),                // hev
                position("c", "1"),                 // tramtrain
            ],
            Utc::now().timestamp_millis(),
        );

        let store = empty_store("filter");
        store.update(|s| s.show_tram_trains = false).unwrap();

        let resp = trains_response(&state, &store);
        assert!(!resp.no_data_received);
        let ids: Vec<&str> = resp
            .locations
            .iter()
            .map(|l| l.position.vehicle_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"], "tramtrain must be filtered out");

        let hev = &resp.locations[1];
        assert_eq!(hev.kind, model::VehicleKind::Hev);
        assert!(!hev.stale, "just reported");
        assert!(hev.active, "no stoptimes, cannot be judged inactive");
        assert!(!hev.data_falsified);
    }

    #[test]
    fn test_trains_response_withholds_old_snapshot() {
        let state = AppState::new();
        // Refreshed 20 minutes ago: beyond the 15-minute serving window.
        state.replace_snapshot(
            vec![position("a", "X")],
            Utc::now().timestamp_millis() - 20 * 60 * 1000,
        );

        let store = empty_store("withhold");
        let resp = trains_response(&state, &store);
        assert!(resp.no_data_received);
        assert!(resp.locations.is_empty());
        assert!(resp.data_age_minutes >= 20, "got {}", resp.data_age_minutes);
    }

    #[test]
    fn test_trains_response_before_first_refresh() {
        let state = AppState::new();
        let store = empty_store("empty");
        let resp = trains_response(&state, &store);
        assert!(resp.no_data_received);
        assert_eq!(resp.data_age_minutes, 0);
        assert!(resp.locations.is_empty());
    }

    #[test]
    fn test_settings_reply_applies_mobile_override() {
        let store = empty_store("mobile-reply");
        assert!(settings_reply(&store).effective_show_tooltip);

        store.set_mobile(true);
        let reply = settings_reply(&store);
        assert!(!reply.effective_show_tooltip);
        // The stored preference itself is untouched.
        assert!(reply.settings.show_tooltip);
    }

    #[test]
    fn test_trains_geojson_shape() {
        let state = AppState::new();
        state.replace_snapshot(
            vec![position("a", "H5")],
            Utc::now().timestamp_millis(),
        );

        let store = empty_store("geojson");
        let fc = trains_geojson(&state, &store);
        assert_eq!(fc.r#type, "FeatureCollection");
        assert_eq!(fc.features.len(), 1);
        let feature = &fc.features[0];
        assert_eq!(feature.r#type, "Feature");
        assert_eq!(feature.geometry.coordinates, [19.0, 47.0]);
        assert_eq!(feature.properties.vehicle_id, "a");
        assert_eq!(feature.properties.kind, model::VehicleKind::Hev);
        assert!(feature.properties.next_stop.is_none());
    }
}
