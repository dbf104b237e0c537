use crate::model::VehiclePosition;
use crate::preprocess;
use crate::state::AppState;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use serde::Deserialize;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Positions query sent to the upstream GraphQL endpoint. The bounding box
/// covers Hungary; rail, tram-train and suburban railway vehicles only.
pub const POSITIONS_QUERY: &str = r#"
  query Positions {
    vehiclePositions(
      neLat: 48.6238540716
      neLon: 22.710531447
      swLat: 45.7594811061
      swLon: 16.2022982113
      modes: [RAIL, TRAMTRAIN, SUBURBAN_RAILWAY]
    ) {
      vehicleId
      lat
      lon
      heading
      speed
      lastUpdated
      trip {
        stoptimes {
          scheduledArrival
          realtimeArrival
          scheduledDeparture
          realtimeDeparture
          stop {
            name
            lat
            lon
            platformCode
          }
        }
        serviceDate
        tripShortName
        route {
          textColor
          shortName
          longName
        }
        tripGeometry {
          points
        }
        wheelchairAccessible
        bikesAllowed
        infoServices {
          name
          fromStopIndex
          tillStopIndex
          fontCharSet
          fontCode
          displayable
        }
        alerts {
          alertDescriptionText
          alertUrl
          effectiveStartDate
          effectiveEndDate
        }
      }
    }
  }
"#;

#[derive(Debug, Deserialize)]
struct PositionsData {
    #[serde(rename = "vehiclePositions", default)]
    vehicle_positions: Vec<VehiclePosition>,
}

#[derive(Debug, Deserialize)]
struct PositionsEnvelope {
    #[serde(default)]
    data: Option<PositionsData>,
    // Fallback for endpoints that return the payload flattened.
    #[serde(rename = "vehiclePositions", default)]
    vehicle_positions: Option<Vec<VehiclePosition>>,
}

pub struct UpstreamClient {
    endpoint: String,
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(endpoint: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;
        Ok(Self { endpoint, http })
    }

    pub async fn fetch_positions(&self) -> Result<Vec<VehiclePosition>> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({ "query": POSITIONS_QUERY }))
            .send()
            .await
            .context("positions request failed")?
            .error_for_status()
            .context("positions request rejected")?;

        let envelope: PositionsEnvelope =
            response.json().await.context("parsing positions response")?;

        Ok(envelope
            .data
            .map(|d| d.vehicle_positions)
            .or(envelope.vehicle_positions)
            .unwrap_or_default())
    }
}

/// One full refresh cycle: fetch, dedupe, derive delay/progress, filter,
/// and swap the snapshot in. An empty upstream result keeps the previous
/// snapshot and only flags it.
pub async fn refresh(client: &UpstreamClient, state: &AppState) -> Result<()> {
    let started = Instant::now();

    let raw = client.fetch_positions().await?;
    info!(
        "Fetched {} raw positions in {:?}",
        raw.len(),
        started.elapsed()
    );

    if raw.is_empty() {
        warn!("Upstream returned no vehicles, keeping existing snapshot");
        state.no_data_received.store(true, Ordering::Relaxed);
        return Ok(());
    }

    let raw_count = raw.len();
    let deduped = preprocess::dedupe_by_vehicle_id(raw);

    let now = Utc::now();
    let processed = preprocess::process_locations(deduped, now);
    info!(
        "Processed snapshot: {} raw -> {} vehicles in {:?}",
        raw_count,
        processed.len(),
        started.elapsed()
    );

    state.replace_snapshot(processed, now.timestamp_millis());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_envelope() {
        let json = r#"{
            "data": {
                "vehiclePositions": [
                    {
                        "vehicleId": "v1",
                        "lat": 47.0,
                        "lon": 19.0,
                        "lastUpdated": 1718450000,
                        "trip": {"serviceDate": "2024-06-15", "route": {"longName": "X"}}
                    }
                ]
            }
        }"#;
        let env: PositionsEnvelope = serde_json::from_str(json).unwrap();
        let positions = env
            .data
            .map(|d| d.vehicle_positions)
            .or(env.vehicle_positions)
            .unwrap_or_default();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].vehicle_id, "v1");
    }

    #[test]
    fn test_parse_flattened_envelope() {
        let json = r#"{
            "vehiclePositions": [
                {
                    "vehicleId": "v2",
                    "lat": 47.0,
                    "lon": 19.0,
                    "lastUpdated": 1718450000,
                    "trip": {"serviceDate": "2024-06-15", "route": {"longName": "X"}}
                }
            ]
        }"#;
        let env: PositionsEnvelope = serde_json::from_str(json).unwrap();
        assert!(env.data.is_none());
        assert_eq!(env.vehicle_positions.unwrap().len(), 1);
    }
}
