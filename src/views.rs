//! Views derived from a flight snapshot
//!
//! Turns the raw pilot list into what the screens show: the set of airports
//! with flight-plan traffic, per-airport arrival and departure lists, and the
//! user's own flight. Everything that counts as traffic goes through
//! [`Pilot::is_airborne`], so parked and taxiing aircraft are never counted.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::debug;

use crate::data::{
    AirportClient, AirportRecord, AirportTraffic, FlightSnapshot, Pilot, Position, TrafficEntry,
};
use crate::settings::UserSettings;

/// Mean Earth radius in nautical miles
pub const EARTH_RADIUS_NM: f64 = 3440.065;

/// Below this groundspeed (knots) no ETA is estimated
pub const ETA_MIN_GROUNDSPEED: i32 = 50;

/// Oldest trail points are dropped beyond this length
pub const MAX_TRAIL_POINTS: usize = 1000;

/// Great-circle distance between two positions, in nautical miles
pub fn distance_nm(from: Position, to: Position) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lat = (to.latitude - from.latitude).to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_NM * c
}

/// Estimated arrival time at `destination` at the pilot's current groundspeed
pub fn estimate_arrival(
    pilot: &Pilot,
    destination: Position,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if pilot.groundspeed < ETA_MIN_GROUNDSPEED {
        return None;
    }

    let hours = distance_nm(pilot.position, destination) / f64::from(pilot.groundspeed);
    let millis = (hours * 3_600_000.0).round() as i64;
    Some(now + chrono::Duration::milliseconds(millis))
}

fn traffic_entry(pilot: &Pilot, eta: Option<DateTime<Utc>>) -> TrafficEntry {
    let plan = pilot.flight_plan.as_ref();
    TrafficEntry {
        callsign: pilot.callsign.clone(),
        aircraft: plan.map(|p| p.aircraft_type.clone()).unwrap_or_default(),
        departure: plan.map(|p| p.departure.clone()).unwrap_or_default(),
        arrival: plan.map(|p| p.arrival.clone()).unwrap_or_default(),
        groundspeed: pilot.groundspeed,
        altitude: pilot.altitude,
        heading: pilot.heading,
        eta,
    }
}

/// Builds the airborne traffic lists for `code` from a snapshot
///
/// Arrivals are ordered by ETA (unknown last), departures by callsign.
pub fn build_traffic(
    snapshot: &FlightSnapshot,
    code: &str,
    airport: AirportRecord,
    now: DateTime<Utc>,
) -> AirportTraffic {
    let mut arrivals = Vec::new();
    let mut departures = Vec::new();

    for pilot in snapshot.pilots.iter().filter(|p| p.is_airborne()) {
        if pilot.arrives_at(code) {
            let eta = estimate_arrival(pilot, airport.position, now);
            arrivals.push(traffic_entry(pilot, eta));
        }
        if pilot.departs_from(code) {
            departures.push(traffic_entry(pilot, None));
        }
    }

    arrivals.sort_by(|a, b| match (a.eta, b.eta) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.callsign.cmp(&b.callsign),
    });
    departures.sort_by(|a, b| a.callsign.cmp(&b.callsign));

    AirportTraffic {
        airport,
        arrivals,
        departures,
    }
}

/// Airborne arrivals and departures for one airport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficCount {
    pub arrivals: usize,
    pub departures: usize,
}

impl TrafficCount {
    pub fn total(&self) -> usize {
        self.arrivals + self.departures
    }
}

/// Counts airborne traffic per airport code without fetching anything
pub fn traffic_counts(snapshot: &FlightSnapshot) -> BTreeMap<String, TrafficCount> {
    let mut counts: BTreeMap<String, TrafficCount> = BTreeMap::new();

    for pilot in snapshot.pilots.iter().filter(|p| p.is_airborne()) {
        let Some(plan) = &pilot.flight_plan else {
            continue;
        };
        if let Some(code) = plan.departure_code() {
            counts.entry(code.to_string()).or_default().departures += 1;
        }
        if let Some(code) = plan.arrival_code() {
            counts.entry(code.to_string()).or_default().arrivals += 1;
        }
    }

    counts
}

/// Everything the overview needs from one snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedViews {
    /// Resolved airports, sorted by ICAO code; empty when the layer is off
    pub airports: Vec<AirportRecord>,
    pub counts: BTreeMap<String, TrafficCount>,
    /// The user's own flight, if they set a callsign and are connected
    pub user_flight: Option<Pilot>,
}

/// Computes snapshot views, resolving airports through the deduplicated client
#[derive(Clone)]
pub struct ViewBuilder {
    airports: Arc<AirportClient>,
}

impl ViewBuilder {
    pub fn new(airports: Arc<AirportClient>) -> Self {
        Self { airports }
    }

    pub fn airport_client(&self) -> &AirportClient {
        &self.airports
    }

    /// Resolves every airport referenced by a flight plan
    ///
    /// Blacklisted codes are skipped up front. The rest are fetched
    /// concurrently; any code that fails or turns out to be unavailable is
    /// left out rather than failing the whole set.
    pub async fn active_airports(&self, snapshot: &FlightSnapshot) -> Vec<AirportRecord> {
        let blacklisted = self.airports.blacklist().codes().await;
        let codes: Vec<String> = snapshot
            .referenced_airports()
            .into_iter()
            .filter(|code| !blacklisted.contains(code))
            .collect();

        let results = join_all(codes.iter().map(|code| self.airports.fetch_airport(code))).await;

        let mut airports: Vec<AirportRecord> = codes
            .iter()
            .zip(results)
            .filter_map(|(code, result)| match result {
                Ok(record) => record,
                Err(e) => {
                    debug!(code = %code, error = %e, "dropping airport from active set");
                    None
                }
            })
            .collect();

        airports.sort_by(|a, b| a.icao.cmp(&b.icao));
        debug!(
            requested = codes.len(),
            resolved = airports.len(),
            "active airports resolved"
        );
        airports
    }

    /// Airborne traffic for one airport
    ///
    /// Returns `None` when the airport cannot be resolved, whether it is
    /// blacklisted or the fetch failed.
    pub async fn airport_traffic(
        &self,
        snapshot: &FlightSnapshot,
        icao: &str,
    ) -> Option<AirportTraffic> {
        let code = icao.trim().to_uppercase();
        let airport = match self.airports.fetch_airport(&code).await {
            Ok(record) => record?,
            Err(e) => {
                debug!(code = %code, error = %e, "airport unavailable for traffic view");
                return None;
            }
        };
        Some(build_traffic(snapshot, &code, airport, Utc::now()))
    }

    /// Builds the overview for a snapshot, honouring the user's layer toggles
    pub async fn build(&self, snapshot: &FlightSnapshot, settings: &UserSettings) -> DerivedViews {
        let airports = if settings.layers.airports {
            self.active_airports(snapshot).await
        } else {
            Vec::new()
        };

        let user_flight = settings
            .user_callsign
            .as_deref()
            .and_then(|callsign| snapshot.find_by_callsign(callsign))
            .cloned();

        DerivedViews {
            airports,
            counts: traffic_counts(snapshot),
            user_flight,
        }
    }
}

/// Positions of one flight accumulated across refreshes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlightTrail {
    callsign: Option<String>,
    points: Vec<Position>,
}

impl FlightTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callsign(&self) -> Option<&str> {
        self.callsign.as_deref()
    }

    pub fn points(&self) -> &[Position] {
        &self.points
    }

    /// Appends the tracked flight's position from `snapshot`
    ///
    /// Switching to another callsign starts a new trail. A flight missing from
    /// the snapshot keeps its trail so a brief disconnect does not erase it.
    pub fn update(&mut self, snapshot: &FlightSnapshot, callsign: Option<&str>) {
        let changed = match (&self.callsign, callsign) {
            (Some(current), Some(next)) => !current.eq_ignore_ascii_case(next),
            (None, None) => false,
            _ => true,
        };
        if changed {
            self.callsign = callsign.map(str::to_string);
            self.points.clear();
        }

        let Some(pilot) = callsign.and_then(|c| snapshot.find_by_callsign(c)) else {
            return;
        };
        if self.points.last() != Some(&pilot.position) {
            self.points.push(pilot.position);
        }
        if self.points.len() > MAX_TRAIL_POINTS {
            let excess = self.points.len() - MAX_TRAIL_POINTS;
            self.points.drain(..excess);
        }
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{KvStore, MemoryStore};
    use crate::data::fixtures::{airport, pilot, plan, snapshot};
    use crate::data::mock::MockTransport;
    use crate::data::AIRPORT_DB_URL;

    fn airport_body(icao: &str, latitude: f64, longitude: f64) -> String {
        serde_json::json!({
            "icao_code": icao,
            "name": format!("{} Airport", icao),
            "latitude_deg": latitude,
            "longitude_deg": longitude,
            "elevation_ft": "10",
            "iso_country": "US",
            "type": "medium_airport"
        })
        .to_string()
    }

    fn builder() -> (ViewBuilder, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let client = AirportClient::new(transport.clone(), store, None);
        (ViewBuilder::new(Arc::new(client)), transport)
    }

    fn route(transport: &MockTransport, icao: &str, status: u16, body: &str) {
        transport.respond(&format!("{}/{}", AIRPORT_DB_URL, icao), status, body);
    }

    #[test]
    fn test_distance_one_degree_of_latitude() {
        let d = distance_nm(Position::new(40.0, -74.0), Position::new(41.0, -74.0));
        assert!((d - 60.04).abs() < 0.01, "got {}", d);
    }

    #[test]
    fn test_eta_from_distance_and_groundspeed() {
        let now = Utc::now();
        let mut inbound = pilot("DAL1", 120, 5000, None);
        inbound.position = Position::new(40.0, -74.0);

        let eta = estimate_arrival(&inbound, Position::new(41.0, -74.0), now).unwrap();

        let minutes = (eta - now).num_seconds() as f64 / 60.0;
        assert!((minutes - 30.02).abs() < 0.1, "got {} minutes", minutes);
    }

    #[test]
    fn test_no_eta_when_slow() {
        let slow = pilot("SLOW", 49, 5000, None);
        assert!(estimate_arrival(&slow, Position::new(41.0, -74.0), Utc::now()).is_none());
    }

    #[test]
    fn test_traffic_counts_apply_airborne_filter() {
        let snap = snapshot(vec![
            pilot("FAST", 300, 20000, Some(plan("KJFK", "KBOS"))),
            pilot("TAXI", 15, 13, Some(plan("KJFK", "KBOS"))),
            pilot("EDGE", 50, 20000, Some(plan("KJFK", "KBOS"))),
            pilot("LOW", 140, 100, Some(plan("KJFK", "KBOS"))),
            pilot("NOPLAN", 300, 20000, None),
        ]);

        let counts = traffic_counts(&snap);

        assert_eq!(
            counts.get("KJFK"),
            Some(&TrafficCount {
                arrivals: 0,
                departures: 1
            })
        );
        assert_eq!(counts["KBOS"].arrivals, 1);
        assert_eq!(counts["KBOS"].total(), 1);
    }

    #[test]
    fn test_build_traffic_splits_and_filters() {
        let snap = snapshot(vec![
            pilot("ARR1", 250, 8000, Some(plan("KBOS", "KJFK"))),
            pilot("DEP1", 180, 3000, Some(plan("KJFK", "KORD"))),
            pilot("GATE", 0, 13, Some(plan("KJFK", "KLAX"))),
            pilot("OTHER", 400, 35000, Some(plan("EGLL", "LFPG"))),
        ]);

        let traffic = build_traffic(&snap, "KJFK", airport("KJFK", 40.64, -73.78), Utc::now());

        let arrivals: Vec<&str> = traffic.arrivals.iter().map(|e| e.callsign.as_str()).collect();
        let departures: Vec<&str> = traffic.departures.iter().map(|e| e.callsign.as_str()).collect();
        assert_eq!(arrivals, vec!["ARR1"]);
        assert_eq!(departures, vec!["DEP1"]);
        assert!(traffic.arrivals[0].eta.is_some());
        assert!(traffic.departures[0].eta.is_none());
    }

    #[tokio::test]
    async fn test_active_airports_drop_failures_and_blacklist_permanent() {
        let (views, transport) = builder();
        route(&transport, "KAAA", 200, &airport_body("KAAA", 40.0, -74.0));
        route(&transport, "KBBB", 413, "");
        route(&transport, "KCCC", 200, &airport_body("KCCC", 42.0, -71.0));

        let snap = snapshot(vec![
            pilot("ONE", 300, 20000, Some(plan("KCCC", "KBBB"))),
            pilot("TWO", 300, 20000, Some(plan("KAAA", "KCCC"))),
        ]);

        let airports = views.active_airports(&snap).await;

        let codes: Vec<&str> = airports.iter().map(|a| a.icao.as_str()).collect();
        assert_eq!(codes, vec!["KAAA", "KCCC"]);
        assert!(
            views
                .airport_client()
                .blacklist()
                .is_blacklisted("KBBB")
                .await
        );

        // Second pass never asks for the blacklisted code again
        let before = transport.calls_to(&format!("{}/KBBB", AIRPORT_DB_URL));
        views.active_airports(&snap).await;
        assert_eq!(
            transport.calls_to(&format!("{}/KBBB", AIRPORT_DB_URL)),
            before
        );
    }

    #[tokio::test]
    async fn test_transient_failures_are_dropped_but_retried() {
        let (views, transport) = builder();
        route(&transport, "KAAA", 200, &airport_body("KAAA", 40.0, -74.0));
        route(&transport, "KDDD", 503, "");

        let snap = snapshot(vec![pilot("ONE", 300, 20000, Some(plan("KAAA", "KDDD")))]);

        assert_eq!(views.active_airports(&snap).await.len(), 1);
        assert!(
            !views
                .airport_client()
                .blacklist()
                .is_blacklisted("KDDD")
                .await
        );

        views.active_airports(&snap).await;
        assert_eq!(
            transport.calls_to(&format!("{}/KDDD", AIRPORT_DB_URL)),
            2
        );
    }

    #[tokio::test]
    async fn test_airport_traffic_none_for_unavailable_airport() {
        let (views, transport) = builder();
        route(&transport, "KBBB", 431, "");

        let snap = snapshot(vec![pilot("ONE", 300, 20000, Some(plan("KBBB", "KAAA")))]);

        assert!(views.airport_traffic(&snap, "KBBB").await.is_none());
    }

    #[tokio::test]
    async fn test_airport_traffic_resolves_airport() {
        let (views, transport) = builder();
        route(&transport, "KJFK", 200, &airport_body("KJFK", 40.64, -73.78));

        let snap = snapshot(vec![
            pilot("ARR1", 250, 8000, Some(plan("KBOS", "KJFK"))),
            pilot("GATE", 0, 0, Some(plan("KBOS", "KJFK"))),
        ]);

        let traffic = views.airport_traffic(&snap, "kjfk").await.unwrap();
        assert_eq!(traffic.airport.icao, "KJFK");
        assert_eq!(traffic.arrivals.len(), 1);
        assert!(traffic.departures.is_empty());
    }

    #[tokio::test]
    async fn test_build_skips_airports_when_layer_hidden() {
        let (views, transport) = builder();
        let snap = snapshot(vec![pilot("DAL123", 300, 20000, Some(plan("KJFK", "KBOS")))]);

        let mut settings = UserSettings::default();
        settings.toggle_airports();
        settings.set_user_callsign("dal123");

        let built = views.build(&snap, &settings).await;

        assert_eq!(transport.calls(), 0);
        assert!(built.airports.is_empty());
        assert_eq!(built.counts.len(), 2);
        assert_eq!(built.user_flight.unwrap().callsign, "DAL123");
    }

    #[test]
    fn test_trail_accumulates_moves_only() {
        let mut trail = FlightTrail::new();
        let mut me = pilot("BAW1", 300, 20000, None);

        trail.update(&snapshot(vec![me.clone()]), Some("BAW1"));
        trail.update(&snapshot(vec![me.clone()]), Some("BAW1"));
        me.position = Position::new(41.0, -73.0);
        trail.update(&snapshot(vec![me.clone()]), Some("BAW1"));

        assert_eq!(trail.points().len(), 2);
        assert_eq!(trail.callsign(), Some("BAW1"));
    }

    #[test]
    fn test_trail_resets_on_new_callsign_and_survives_disconnect() {
        let mut trail = FlightTrail::new();
        let me = pilot("BAW1", 300, 20000, None);

        trail.update(&snapshot(vec![me.clone()]), Some("BAW1"));
        trail.update(&snapshot(vec![]), Some("BAW1"));
        assert_eq!(trail.points().len(), 1);

        trail.update(&snapshot(vec![me]), Some("UAL2"));
        assert!(trail.points().is_empty());
        assert_eq!(trail.callsign(), Some("UAL2"));
    }
}
