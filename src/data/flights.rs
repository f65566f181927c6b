//! VATSIM flight feed client
//!
//! Pulls the full network snapshot. The feed has no pagination and is replaced
//! wholesale on every pull, so it is never written to the durable cache; the
//! refresh scheduler owns its freshness.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error};

use super::{
    classify_status, FetchError, FlightPlan, FlightSnapshot, HttpTransport, Pilot, Position,
    StatusClass, UpstreamRequest,
};

/// Default location of the VATSIM v3 data feed
pub const VATSIM_DATA_URL: &str = "https://data.vatsim.net/v3/vatsim-data.json";

const RESOURCE: &str = "flight feed";

/// Anything that can produce a fresh flight snapshot
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<FlightSnapshot, FetchError>;
}

/// Top level of the v3 feed
#[derive(Debug, Deserialize)]
struct FeedResponse {
    general: Option<FeedGeneral>,
    #[serde(default)]
    pilots: Vec<FeedPilot>,
}

#[derive(Debug, Deserialize)]
struct FeedGeneral {
    update_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct FeedPilot {
    cid: u64,
    callsign: String,
    latitude: f64,
    longitude: f64,
    altitude: i32,
    groundspeed: i32,
    heading: i32,
    flight_plan: Option<FeedFlightPlan>,
}

#[derive(Debug, Deserialize)]
struct FeedFlightPlan {
    #[serde(default)]
    flight_rules: String,
    #[serde(default)]
    aircraft_short: Option<String>,
    #[serde(default)]
    aircraft: String,
    #[serde(default)]
    departure: String,
    #[serde(default)]
    arrival: String,
    #[serde(default)]
    route: String,
}

impl From<FeedPilot> for Pilot {
    fn from(raw: FeedPilot) -> Self {
        Pilot {
            id: raw.cid,
            callsign: raw.callsign,
            position: Position::new(raw.latitude, raw.longitude),
            altitude: raw.altitude,
            groundspeed: raw.groundspeed,
            heading: raw.heading,
            flight_plan: raw.flight_plan.map(|plan| FlightPlan {
                departure: plan.departure.trim().to_uppercase(),
                arrival: plan.arrival.trim().to_uppercase(),
                aircraft_type: plan
                    .aircraft_short
                    .filter(|short| !short.is_empty())
                    .unwrap_or(plan.aircraft),
                route: plan.route,
                rules: plan.flight_rules,
            }),
        }
    }
}

/// Client for the live flight feed
#[derive(Clone)]
pub struct FlightFeedClient {
    transport: Arc<dyn HttpTransport>,
    url: String,
}

impl FlightFeedClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_url(transport, VATSIM_DATA_URL)
    }

    pub fn with_url(transport: Arc<dyn HttpTransport>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
        }
    }

    /// Parses a feed body into a snapshot
    pub fn parse(body: &str) -> Result<FlightSnapshot, FetchError> {
        let feed: FeedResponse =
            serde_json::from_str(body).map_err(|e| FetchError::malformed(RESOURCE, e))?;

        Ok(FlightSnapshot {
            pilots: feed.pilots.into_iter().map(Pilot::from).collect(),
            updated_at: feed.general.and_then(|general| general.update_timestamp),
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl SnapshotSource for FlightFeedClient {
    async fn fetch_snapshot(&self) -> Result<FlightSnapshot, FetchError> {
        let response = self
            .transport
            .send(RESOURCE, UpstreamRequest::get(&self.url))
            .await
            .inspect_err(|e| error!(error = %e, "flight feed unreachable"))?;

        if classify_status(response.status) != StatusClass::Success {
            error!(status = response.status, "flight feed returned an error status");
            return Err(FetchError::Status {
                resource: RESOURCE.to_string(),
                status: response.status,
            });
        }

        let snapshot = Self::parse(&response.body)?;
        debug!(pilots = snapshot.pilots.len(), "flight snapshot fetched");
        Ok(snapshot)
    }
}
