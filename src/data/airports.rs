//! Airport registry client
//!
//! Resolves ICAO codes to airport records through three layers: the negative
//! result registry, the durable cache, then the airportdb.io API. Concurrent
//! lookups of the same code share a single upstream request.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    classify_status, AirportRecord, FetchError, HttpTransport, Position, StatusClass,
    UpstreamRequest,
};
use crate::blacklist::Blacklist;
use crate::cache::store::AIRPORT_TTL;
use crate::cache::{get_json, keys, set_json, KvStore};
use crate::singleflight::{SingleFlight, SingleFlightStats};

/// Base URL for the airportdb.io API
pub const AIRPORT_DB_URL: &str = "https://airportdb.io/api/v1/airport";

/// Result shared between coalesced lookups of one code
type Lookup = Result<Option<AirportRecord>, FetchError>;

/// airportdb.io response, reduced to the fields we keep
#[derive(Debug, Deserialize)]
struct AirportDbResponse {
    #[serde(default)]
    icao_code: Option<String>,
    #[serde(default)]
    iata_code: Option<String>,
    name: String,
    latitude_deg: f64,
    longitude_deg: f64,
    #[serde(default)]
    elevation_ft: Option<serde_json::Value>,
    #[serde(default)]
    municipality: Option<String>,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    iso_country: String,
    country: Option<AirportDbCountry>,
}

#[derive(Debug, Deserialize)]
struct AirportDbCountry {
    name: String,
}

/// The API sends elevation either as a number or as a numeric string
fn parse_elevation(value: Option<&serde_json::Value>) -> Option<i32> {
    match value? {
        serde_json::Value::Number(n) => n.as_f64().map(|f| f.round() as i32),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl AirportDbResponse {
    fn into_record(self, requested: &str) -> AirportRecord {
        AirportRecord {
            icao: non_blank(self.icao_code).unwrap_or_else(|| requested.to_string()),
            iata: non_blank(self.iata_code),
            name: self.name,
            position: Position::new(self.latitude_deg, self.longitude_deg),
            elevation_ft: parse_elevation(self.elevation_ft.as_ref()),
            country: self
                .country
                .map(|country| country.name)
                .unwrap_or(self.iso_country),
            city: non_blank(self.municipality),
            kind: self.kind,
        }
    }
}

/// Fetch gateway for airport records
pub struct AirportClient {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn KvStore>,
    blacklist: Blacklist,
    base_url: String,
    api_token: Option<String>,
    flights: SingleFlight<String, Lookup>,
}

impl AirportClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn KvStore>,
        api_token: Option<String>,
    ) -> Self {
        Self {
            transport,
            blacklist: Blacklist::new(Arc::clone(&store)),
            store,
            base_url: AIRPORT_DB_URL.to_string(),
            api_token,
            flights: SingleFlight::new(),
        }
    }

    /// Overrides the API base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    pub fn coalescing_stats(&self) -> SingleFlightStats {
        self.flights.stats()
    }

    /// Fetches the airport record for `icao`
    ///
    /// # Returns
    /// * `Ok(Some(record))` - from the cache or freshly fetched
    /// * `Ok(None)` - the code is blacklisted, or just got blacklisted because
    ///   upstream rejected it for size or returned an unusable payload
    /// * `Err(FetchError)` - a transient failure; nothing is blacklisted
    pub async fn fetch_airport(&self, icao: &str) -> Lookup {
        let code = icao.trim().to_uppercase();

        self.flights
            .run(code.clone(), || self.resolve(&code))
            .await
            .unwrap_or_else(|_| {
                Err(FetchError::Abandoned {
                    resource: format!("airport {}", code),
                })
            })
    }

    async fn resolve(&self, code: &str) -> Lookup {
        // Checked before the cache: a blacklisted code must cost nothing
        if self.blacklist.is_blacklisted(code).await {
            debug!(code, "skipping blacklisted airport");
            return Ok(None);
        }

        let key = keys::airport(code);
        if let Some(record) = get_json::<AirportRecord>(self.store.as_ref(), &key).await {
            return Ok(Some(record));
        }

        let record = match self.fetch_from_api(code).await {
            Ok(record) => record,
            Err(e) if e.is_permanent() => {
                warn!(code, error = %e, "airport permanently unavailable");
                if let Err(cache_err) = self.blacklist.add(code).await {
                    warn!(code, error = %cache_err, "failed to record blacklist entry");
                }
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = set_json(self.store.as_ref(), &key, &record, AIRPORT_TTL).await {
            warn!(code, error = %e, "failed to cache airport record");
        }
        Ok(Some(record))
    }

    /// Fetches airport data directly from the API
    async fn fetch_from_api(&self, code: &str) -> Result<AirportRecord, FetchError> {
        let resource = format!("airport {}", code);
        let mut request = UpstreamRequest::get(format!("{}/{}", self.base_url, code));
        if let Some(token) = &self.api_token {
            request = request.query("apiToken", token.clone());
        }

        let response = self.transport.send(&resource, request).await?;

        match classify_status(response.status) {
            StatusClass::Success => {}
            StatusClass::TooLarge => {
                return Err(FetchError::Permanent {
                    resource,
                    reason: format!("upstream rejected request size (HTTP {})", response.status),
                });
            }
            StatusClass::Failure => {
                return Err(FetchError::Status {
                    resource,
                    status: response.status,
                });
            }
        }

        // A 2xx body we cannot read will not get better on retry
        let raw: AirportDbResponse =
            serde_json::from_str(&response.body).map_err(|e| FetchError::Permanent {
                resource: resource.clone(),
                reason: format!("malformed response: {}", e),
            })?;

        Ok(raw.into_record(code))
    }
}
