use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// One stop on a trip, as reported by the upstream feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub name: CompactString,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub platform_code: Option<CompactString>,
}

/// Scheduled/realtime arrival-departure pair for one stop.
/// All times are seconds since midnight of the service day; realtime fields
/// are absent when the feed has no prediction for the stop.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTime {
    #[serde(default)]
    pub scheduled_arrival: Option<i64>,
    #[serde(default)]
    pub realtime_arrival: Option<i64>,
    #[serde(default)]
    pub scheduled_departure: Option<i64>,
    #[serde(default)]
    pub realtime_departure: Option<i64>,
    pub stop: Stop,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    #[serde(default)]
    pub text_color: CompactString,
    #[serde(default)]
    pub short_name: CompactString,
    #[serde(default)]
    pub long_name: CompactString,
}

/// Encoded polyline for the trip's route geometry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TripGeometry {
    pub points: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoService {
    pub name: CompactString,
    pub from_stop_index: i32,
    pub till_stop_index: i32,
    pub font_char_set: CompactString,
    pub font_code: i32,
    pub displayable: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub alert_description_text: String,
    #[serde(default)]
    pub alert_url: Option<String>,
    pub effective_start_date: i64,
    pub effective_end_date: i64,
}

/// A trip as reported upstream. Stop-times are ordered by traversal order;
/// the first and last entries are the route endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    /// Service day in "YYYY-MM-DD".
    pub service_date: CompactString,
    #[serde(default)]
    pub trip_short_name: CompactString,
    pub route: Route,
    #[serde(default)]
    pub trip_geometry: Option<TripGeometry>,
    #[serde(default)]
    pub stoptimes: Vec<StopTime>,
    #[serde(default)]
    pub wheelchair_accessible: Option<CompactString>,
    #[serde(default)]
    pub bikes_allowed: Option<CompactString>,
    #[serde(default)]
    pub info_services: Vec<InfoService>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

/// A stop snapped onto the route geometry, with its distance along the line
/// (planar, coordinate units). Produced by preprocessing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedStop {
    pub id: CompactString,
    /// [lon, lat]
    pub original_coords: [f64; 2],
    pub distance_along_route: f64,
    #[serde(default)]
    pub stop_time_info: Option<StopTime>,
}

/// Where the vehicle sits between two stops.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleProgress {
    pub last_stop: CompactString,
    pub next_stop: CompactString,
    /// 0.0 at the last stop, 1.0 at the next.
    pub progress: f64,
}

/// A single train's live snapshot. Fetched fresh on each poll; a new
/// snapshot fully replaces prior state for the same vehicle id.
///
/// `delay` and the fields after it are filled in by preprocessing, not by
/// the upstream feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehiclePosition {
    pub vehicle_id: CompactString,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    /// Epoch seconds of the last upstream GPS report.
    pub last_updated: i64,
    pub trip: Trip,
    /// Derived delay in whole minutes.
    #[serde(default)]
    pub delay: i64,
    #[serde(default)]
    pub train_position: f64,
    #[serde(default)]
    pub total_route_distance: f64,
    #[serde(default)]
    pub processed_stops: Vec<ProcessedStop>,
    #[serde(default)]
    pub vehicle_progress: Option<VehicleProgress>,
}

/// Display category of a vehicle, used for icon choice and visibility
/// filtering.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleKind {
    Train,
    Hev,
    TramTrain,
}

/// A vehicle as served to clients: the processed position plus the
/// classification flags derived at request time.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainLocation {
    #[serde(flatten)]
    pub position: VehiclePosition,
    pub kind: VehicleKind,
    pub active: bool,
    pub stale: bool,
    pub data_falsified: bool,
}

/// Envelope served on `/trains`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainsResponse {
    pub timestamp: String,
    pub no_data_received: bool,
    pub data_age_minutes: i64,
    pub locations: Vec<TrainLocation>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainFeatureProperties {
    pub vehicle_id: CompactString,
    pub lat: f64,
    pub lon: f64,
    pub heading: Option<f64>,
    pub last_updated: String,
    pub trip_short_name: CompactString,
    pub delay: i64,
    pub kind: VehicleKind,
    pub stale: bool,
    pub next_stop: Option<CompactString>,
    /// "HH:MM" of the next stop's (realtime if known) arrival.
    pub next_stop_arrival: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PointGeometry {
    pub r#type: &'static str,
    /// [lon, lat]
    pub coordinates: [f64; 2],
}

#[derive(Clone, Debug, Serialize)]
pub struct TrainFeature {
    pub r#type: &'static str,
    pub geometry: PointGeometry,
    pub properties: TrainFeatureProperties,
}

impl TrainFeature {
    pub fn from_location(loc: &TrainLocation) -> Self {
        let vp = &loc.position;
        let last_updated = chrono::DateTime::from_timestamp(vp.last_updated, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();

        let next_stop = vp
            .vehicle_progress
            .as_ref()
            .filter(|p| !p.next_stop.is_empty())
            .map(|p| p.next_stop.clone());
        let next_stop_arrival = next_stop
            .as_ref()
            .and_then(|name| vp.trip.stoptimes.iter().find(|st| st.stop.name == *name))
            .and_then(|st| st.realtime_arrival.or(st.scheduled_arrival))
            .map(crate::timeutil::format_seconds_as_time);

        TrainFeature {
            r#type: "Feature",
            geometry: PointGeometry {
                r#type: "Point",
                coordinates: [vp.lon, vp.lat],
            },
            properties: TrainFeatureProperties {
                vehicle_id: vp.vehicle_id.clone(),
                lat: vp.lat,
                lon: vp.lon,
                heading: vp.heading,
                last_updated,
                trip_short_name: vp.trip.trip_short_name.clone(),
                delay: vp.delay,
                kind: loc.kind,
                stale: loc.stale,
                next_stop,
                next_stop_arrival,
            },
        }
    }
}

/// Envelope served on `/trains/geojson`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainFeatureCollection {
    pub r#type: &'static str,
    pub timestamp: String,
    pub no_data_received: bool,
    pub data_age_minutes: i64,
    pub features: Vec<TrainFeature>,
}
