//! Core data models and upstream clients
//!
//! This module contains the entities produced by the upstream fetchers (flight
//! snapshots, airport records, weather) and the clients that fetch them.

pub mod airports;
pub mod error;
pub mod flights;
pub mod transport;
pub mod weather;

#[cfg(test)]
pub(crate) mod mock;

pub use airports::{AirportClient, AIRPORT_DB_URL};
pub use error::{classify_status, FetchError, StatusClass};
pub use flights::{FlightFeedClient, SnapshotSource, VATSIM_DATA_URL};
pub use transport::{HttpTransport, ReqwestTransport, UpstreamRequest, UpstreamResponse};
pub use weather::{WeatherClient, WeatherEndpoints, WeatherKeys};

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum groundspeed (knots) for a flight to count as traffic
pub const AIRBORNE_MIN_GROUNDSPEED: i32 = 50;

/// Minimum altitude (feet) for a flight to count as traffic
pub const AIRBORNE_MIN_ALTITUDE: i32 = 100;

/// A point on the globe in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Filed flight plan attached to a pilot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightPlan {
    pub departure: String,
    pub arrival: String,
    pub aircraft_type: String,
    pub route: String,
    /// Flight rules, `I` or `V`
    pub rules: String,
}

fn non_empty(code: &str) -> Option<&str> {
    let code = code.trim();
    (!code.is_empty()).then_some(code)
}

impl FlightPlan {
    pub fn departure_code(&self) -> Option<&str> {
        non_empty(&self.departure)
    }

    pub fn arrival_code(&self) -> Option<&str> {
        non_empty(&self.arrival)
    }
}

/// One connected pilot at the time of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pilot {
    /// Network id (CID)
    pub id: u64,
    pub callsign: String,
    pub position: Position,
    /// Altitude in feet
    pub altitude: i32,
    /// Groundspeed in knots
    pub groundspeed: i32,
    /// Heading in degrees
    pub heading: i32,
    pub flight_plan: Option<FlightPlan>,
}

impl Pilot {
    /// True when the aircraft is moving fast and high enough to be traffic
    /// rather than parked or taxiing
    pub fn is_airborne(&self) -> bool {
        self.groundspeed > AIRBORNE_MIN_GROUNDSPEED && self.altitude > AIRBORNE_MIN_ALTITUDE
    }

    pub fn departs_from(&self, icao: &str) -> bool {
        self.flight_plan
            .as_ref()
            .and_then(FlightPlan::departure_code)
            == Some(icao)
    }

    pub fn arrives_at(&self, icao: &str) -> bool {
        self.flight_plan.as_ref().and_then(FlightPlan::arrival_code) == Some(icao)
    }
}

/// A complete, immutable pull of the flight feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightSnapshot {
    pub pilots: Vec<Pilot>,
    /// Timestamp reported by the feed
    pub updated_at: Option<DateTime<Utc>>,
    /// When this snapshot was fetched
    pub fetched_at: DateTime<Utc>,
}

impl FlightSnapshot {
    /// Every departure and arrival code referenced by a flight plan
    pub fn referenced_airports(&self) -> BTreeSet<String> {
        self.pilots
            .iter()
            .filter_map(|pilot| pilot.flight_plan.as_ref())
            .flat_map(|plan| [plan.departure_code(), plan.arrival_code()])
            .flatten()
            .map(str::to_string)
            .collect()
    }

    pub fn find_by_callsign(&self, callsign: &str) -> Option<&Pilot> {
        self.pilots
            .iter()
            .find(|pilot| pilot.callsign.eq_ignore_ascii_case(callsign))
    }
}

/// Airport metadata keyed by ICAO code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportRecord {
    pub icao: String,
    pub iata: Option<String>,
    pub name: String,
    pub position: Position,
    pub elevation_ft: Option<i32>,
    pub country: String,
    pub city: Option<String>,
    /// Facility type, e.g. `large_airport`
    #[serde(rename = "type")]
    pub kind: String,
}

/// Raw METAR text for a single airport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportMetar {
    pub icao: String,
    pub raw: String,
    pub fetched_at: DateTime<Utc>,
}

/// Flight category derived from ceiling and visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightCategory {
    Vfr,
    Mvfr,
    Ifr,
    Lifr,
}

/// A cloud layer reported in a METAR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudLayer {
    pub cover: String,
    pub base_ft: Option<i32>,
}

/// Decoded METAR for a reporting station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metar {
    pub station: String,
    pub position: Position,
    pub temperature_c: Option<f64>,
    pub dewpoint_c: Option<f64>,
    pub visibility_m: Option<f64>,
    pub wind_direction: Option<f64>,
    pub wind_speed_kt: Option<f64>,
    pub flight_category: Option<FlightCategory>,
    pub raw_text: String,
    pub clouds: Vec<CloudLayer>,
}

/// Latest radar composite, as a slippy-map tile URL template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarData {
    pub tile_url: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// `[west, south, east, north]`
    pub bounds: [f64; 4],
}

impl Default for RadarData {
    fn default() -> Self {
        Self {
            tile_url: String::new(),
            timestamp: None,
            bounds: [-180.0, -85.0, 180.0, 85.0],
        }
    }
}

impl RadarData {
    pub fn is_available(&self) -> bool {
        !self.tile_url.is_empty()
    }
}

/// Surface wind at a grid point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindSample {
    pub position: Position,
    pub altitude_ft: i32,
    pub direction_deg: f64,
    pub speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrontKind {
    Cold,
    Warm,
    Stationary,
    Occluded,
}

/// A frontal boundary as a polyline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherFront {
    pub kind: FrontKind,
    pub coordinates: Vec<Position>,
    pub timestamp: Option<String>,
}

/// Global weather layers, cached and replaced as one unit
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherBundle {
    pub metars: Vec<Metar>,
    pub radar: RadarData,
    pub wind: Vec<WindSample>,
    pub fronts: Vec<WeatherFront>,
}

/// A flight shown in an airport's traffic list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub callsign: String,
    pub aircraft: String,
    pub departure: String,
    pub arrival: String,
    pub groundspeed: i32,
    pub altitude: i32,
    pub heading: i32,
    /// Estimated arrival, only for inbound flights
    pub eta: Option<DateTime<Utc>>,
}

/// Airborne arrivals and departures for one airport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportTraffic {
    pub airport: AirportRecord,
    pub arrivals: Vec<TrafficEntry>,
    pub departures: Vec<TrafficEntry>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn plan(departure: &str, arrival: &str) -> FlightPlan {
        FlightPlan {
            departure: departure.to_string(),
            arrival: arrival.to_string(),
            aircraft_type: "B738".to_string(),
            route: "DCT".to_string(),
            rules: "I".to_string(),
        }
    }

    pub fn pilot(callsign: &str, groundspeed: i32, altitude: i32, plan: Option<FlightPlan>) -> Pilot {
        Pilot {
            id: 1_000_000,
            callsign: callsign.to_string(),
            position: Position::new(40.0, -74.0),
            altitude,
            groundspeed,
            heading: 90,
            flight_plan: plan,
        }
    }

    pub fn snapshot(pilots: Vec<Pilot>) -> FlightSnapshot {
        FlightSnapshot {
            pilots,
            updated_at: None,
            fetched_at: Utc::now(),
        }
    }

    pub fn airport(icao: &str, latitude: f64, longitude: f64) -> AirportRecord {
        AirportRecord {
            icao: icao.to_string(),
            iata: None,
            name: format!("{} Airport", icao),
            position: Position::new(latitude, longitude),
            elevation_ft: Some(13),
            country: "United States".to_string(),
            city: None,
            kind: "large_airport".to_string(),
        }
    }
}
