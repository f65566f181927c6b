//! Weather clients
//!
//! Each layer (bulk METARs, radar, wind, fronts) is fetched and cached on its
//! own; [`WeatherClient::global_weather`] combines them into a
//! [`WeatherBundle`] that is cached as one unit. [`WeatherClient::layers`]
//! fetches only the layers the user has switched on.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    classify_status, AirportMetar, CloudLayer, FetchError, FlightCategory, FrontKind,
    HttpTransport, Metar, Position, RadarData, StatusClass, UpstreamRequest, WeatherBundle,
    WeatherFront, WindSample,
};
use crate::cache::store::{FRONTS_TTL, METAR_TTL, RADAR_TTL, WEATHER_BUNDLE_TTL, WIND_TTL};
use crate::cache::{get_json, keys, set_json, KvStore};
use crate::settings::WeatherLayers;

/// Wind grid spacing in degrees
const WIND_GRID_STEP: usize = 5;

/// A feed point is used for a grid cell only if it is this close on both axes
const WIND_MATCH_DEGREES: f64 = 2.5;

/// Upstream locations for every weather layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeatherEndpoints {
    /// Per-airport METAR text, `{base}/{ICAO}`
    pub metar: String,
    /// Bulk decoded METARs
    pub checkwx: String,
    /// Radar frame index
    pub rainviewer: String,
    /// Global wind grid
    pub openweather: String,
    /// Frontal analysis GeoJSON
    pub fronts: String,
}

impl Default for WeatherEndpoints {
    fn default() -> Self {
        Self {
            metar: "https://metar.vatsim.net".to_string(),
            checkwx: "https://api.checkwx.com/metar/all".to_string(),
            rainviewer: "https://api.rainviewer.com/public/weather-maps.json".to_string(),
            openweather: "https://api.openweathermap.org/data/3.0/global/wind".to_string(),
            fronts: "https://aviationweather.gov/api/data/front/all".to_string(),
        }
    }
}

/// API keys for the authenticated weather sources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeatherKeys {
    pub checkwx: Option<String>,
    pub openweather: Option<String>,
}

// CheckWX decoded METAR payload

#[derive(Debug, Deserialize)]
struct CheckWxResponse {
    #[serde(default)]
    data: Vec<CheckWxMetar>,
}

#[derive(Debug, Deserialize)]
struct CheckWxMetar {
    #[serde(default)]
    icao: Option<String>,
    #[serde(default)]
    station: Option<CheckWxStation>,
    #[serde(default)]
    temperature: Option<CheckWxTemperature>,
    #[serde(default)]
    dewpoint: Option<CheckWxTemperature>,
    #[serde(default)]
    visibility: Option<CheckWxVisibility>,
    #[serde(default)]
    wind: Option<CheckWxWind>,
    #[serde(default)]
    flight_category: Option<String>,
    #[serde(default)]
    raw_text: String,
    #[serde(default)]
    clouds: Vec<CheckWxCloud>,
}

#[derive(Debug, Deserialize)]
struct CheckWxStation {
    #[serde(default)]
    icao: Option<String>,
    #[serde(default)]
    geometry: Option<GeoPoint>,
}

#[derive(Debug, Deserialize)]
struct GeoPoint {
    coordinates: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CheckWxTemperature {
    celsius: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CheckWxVisibility {
    #[serde(default)]
    meters_float: Option<f64>,
    #[serde(default)]
    meters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CheckWxWind {
    degrees: Option<f64>,
    speed_kts: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CheckWxCloud {
    code: String,
    #[serde(default)]
    base_feet_agl: Option<f64>,
}

// RainViewer frame index

#[derive(Debug, Deserialize)]
struct RainViewerResponse {
    host: String,
    radar: RainViewerRadar,
}

#[derive(Debug, Deserialize)]
struct RainViewerRadar {
    #[serde(default)]
    past: Vec<RainViewerFrame>,
}

#[derive(Debug, Deserialize)]
struct RainViewerFrame {
    time: i64,
    path: String,
}

// OpenWeather wind grid

#[derive(Debug, Deserialize)]
struct WindGridResponse {
    #[serde(default)]
    list: Vec<WindGridPoint>,
}

#[derive(Debug, Deserialize)]
struct WindGridPoint {
    lat: f64,
    lon: f64,
    wind: WindGridValue,
}

#[derive(Debug, Deserialize)]
struct WindGridValue {
    deg: f64,
    speed: f64,
}

// AWC fronts GeoJSON

#[derive(Debug, Deserialize)]
struct FrontCollection {
    #[serde(default)]
    features: Vec<FrontFeature>,
}

#[derive(Debug, Deserialize)]
struct FrontFeature {
    properties: FrontProperties,
    geometry: FrontGeometry,
}

#[derive(Debug, Deserialize)]
struct FrontProperties {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrontGeometry {
    coordinates: Vec<[f64; 2]>,
}

/// Reads a number that may arrive as a JSON number or a formatted string
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace(',', "").trim().parse().ok(),
        _ => None,
    }
}

fn parse_flight_category(raw: &str) -> Option<FlightCategory> {
    match raw.trim().to_uppercase().as_str() {
        "VFR" => Some(FlightCategory::Vfr),
        "MVFR" => Some(FlightCategory::Mvfr),
        "IFR" => Some(FlightCategory::Ifr),
        "LIFR" => Some(FlightCategory::Lifr),
        _ => None,
    }
}

fn parse_front_kind(raw: &str) -> Option<FrontKind> {
    match raw.trim().to_uppercase().as_str() {
        "COLD" => Some(FrontKind::Cold),
        "WARM" => Some(FrontKind::Warm),
        "STATIONARY" | "STNRY" => Some(FrontKind::Stationary),
        "OCCLUDED" | "OCFNT" => Some(FrontKind::Occluded),
        _ => None,
    }
}

impl CheckWxMetar {
    /// Records without a station code or position cannot be placed and are dropped
    fn into_metar(self) -> Option<Metar> {
        let station_icao = self.station.as_ref().and_then(|s| s.icao.clone());
        let station = self.icao.or(station_icao)?;
        let coordinates = self.station?.geometry?.coordinates;
        let longitude = number(coordinates.first()?)?;
        let latitude = number(coordinates.get(1)?)?;

        Some(Metar {
            station,
            position: Position::new(latitude, longitude),
            temperature_c: self.temperature.and_then(|t| t.celsius),
            dewpoint_c: self.dewpoint.and_then(|t| t.celsius),
            visibility_m: self
                .visibility
                .and_then(|v| v.meters_float.or_else(|| v.meters.as_ref().and_then(number))),
            wind_direction: self.wind.as_ref().and_then(|w| w.degrees),
            wind_speed_kt: self.wind.as_ref().and_then(|w| w.speed_kts),
            flight_category: self.flight_category.as_deref().and_then(parse_flight_category),
            raw_text: self.raw_text,
            clouds: self
                .clouds
                .into_iter()
                .map(|cloud| CloudLayer {
                    cover: cloud.code,
                    base_ft: cloud.base_feet_agl.map(|base| base.round() as i32),
                })
                .collect(),
        })
    }
}

/// Samples the feed onto a fixed grid, picking the closest point per cell
fn sample_wind_grid(points: &[WindGridPoint]) -> Vec<WindSample> {
    let mut samples = Vec::new();

    for lat in (-80..=80).step_by(WIND_GRID_STEP) {
        for lon in (-180..=180).step_by(WIND_GRID_STEP) {
            let (lat, lon) = (lat as f64, lon as f64);
            let nearest = points
                .iter()
                .filter(|p| {
                    (p.lat - lat).abs() < WIND_MATCH_DEGREES
                        && (p.lon - lon).abs() < WIND_MATCH_DEGREES
                })
                .min_by(|a, b| {
                    let da = (a.lat - lat).powi(2) + (a.lon - lon).powi(2);
                    let db = (b.lat - lat).powi(2) + (b.lon - lon).powi(2);
                    da.total_cmp(&db)
                });

            if let Some(point) = nearest {
                samples.push(WindSample {
                    position: Position::new(lat, lon),
                    altitude_ft: 0,
                    direction_deg: point.wind.deg,
                    speed: point.wind.speed,
                });
            }
        }
    }

    samples
}

/// Client for per-airport and global weather
pub struct WeatherClient {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn KvStore>,
    endpoints: WeatherEndpoints,
    keys: WeatherKeys,
}

impl WeatherClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn KvStore>,
        keys: WeatherKeys,
    ) -> Self {
        Self {
            transport,
            store,
            endpoints: WeatherEndpoints::default(),
            keys,
        }
    }

    pub fn with_endpoints(mut self, endpoints: WeatherEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Serves `key` from the cache, or runs `fetch` and caches its result
    async fn cached<T, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        if let Some(value) = get_json::<T>(self.store.as_ref(), key).await {
            return Ok(value);
        }

        let value = fetch().await?;
        if let Err(e) = set_json(self.store.as_ref(), key, &value, ttl).await {
            warn!(key, error = %e, "failed to cache weather data");
        }
        Ok(value)
    }

    /// Sends `request` and returns the body of a success response
    async fn fetch_body(&self, resource: &str, request: UpstreamRequest) -> Result<String, FetchError> {
        let response = self.transport.send(resource, request).await?;

        match classify_status(response.status) {
            StatusClass::Success => Ok(response.body),
            StatusClass::TooLarge => Err(FetchError::Permanent {
                resource: resource.to_string(),
                reason: format!("upstream rejected request size (HTTP {})", response.status),
            }),
            StatusClass::Failure => Err(FetchError::Status {
                resource: resource.to_string(),
                status: response.status,
            }),
        }
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        resource: &str,
        request: UpstreamRequest,
    ) -> Result<T, FetchError> {
        let body = self.fetch_body(resource, request).await?;
        serde_json::from_str(&body).map_err(|e| FetchError::malformed(resource, e))
    }

    /// Fetches the current METAR text for one airport
    ///
    /// Returns `Ok(None)` when the station has no report.
    pub async fn airport_metar(&self, icao: &str) -> Result<Option<AirportMetar>, FetchError> {
        let code = icao.trim().to_uppercase();
        let key = keys::metar(&code);

        if let Some(metar) = get_json::<AirportMetar>(self.store.as_ref(), &key).await {
            return Ok(Some(metar));
        }

        let resource = format!("metar {}", code);
        let request = UpstreamRequest::get(format!("{}/{}", self.endpoints.metar, code));
        let body = self.fetch_body(&resource, request).await?;

        let raw = body.trim();
        if raw.is_empty() {
            debug!(code = %code, "no METAR reported");
            return Ok(None);
        }

        let metar = AirportMetar {
            icao: code,
            raw: raw.to_string(),
            fetched_at: Utc::now(),
        };
        if let Err(e) = set_json(self.store.as_ref(), &key, &metar, METAR_TTL).await {
            warn!(key = %key, error = %e, "failed to cache METAR");
        }
        Ok(Some(metar))
    }

    /// Fetches decoded METARs for every reporting station
    pub async fn metars(&self) -> Result<Vec<Metar>, FetchError> {
        self.cached(keys::WEATHER_METARS, METAR_TTL, || async {
            let mut request = UpstreamRequest::get(&self.endpoints.checkwx);
            if let Some(key) = &self.keys.checkwx {
                request = request.header("X-API-Key", key.clone());
            }

            let response: CheckWxResponse = self.fetch_json("metars", request).await?;
            let metars: Vec<Metar> = response
                .data
                .into_iter()
                .filter_map(CheckWxMetar::into_metar)
                .collect();
            debug!(count = metars.len(), "metars fetched");
            Ok(metars)
        })
        .await
    }

    /// Fetches the most recent radar frame
    pub async fn radar(&self) -> Result<RadarData, FetchError> {
        self.cached(keys::WEATHER_RADAR, RADAR_TTL, || async {
            let request = UpstreamRequest::get(&self.endpoints.rainviewer);
            let response: RainViewerResponse = self.fetch_json("radar", request).await?;

            let latest = response
                .radar
                .past
                .last()
                .ok_or_else(|| FetchError::malformed("radar", "no past radar frames"))?;

            Ok(RadarData {
                tile_url: format!(
                    "{}{}/256/{{z}}/{{x}}/{{y}}/2/1_1.png",
                    response.host, latest.path
                ),
                timestamp: DateTime::<Utc>::from_timestamp(latest.time, 0),
                ..RadarData::default()
            })
        })
        .await
    }

    /// Fetches surface wind sampled on a 5 degree grid
    pub async fn wind(&self) -> Result<Vec<WindSample>, FetchError> {
        self.cached(keys::WEATHER_WIND, WIND_TTL, || async {
            let mut request = UpstreamRequest::get(&self.endpoints.openweather);
            if let Some(key) = &self.keys.openweather {
                request = request.query("appid", key.clone());
            }

            let response: WindGridResponse = self.fetch_json("wind", request).await?;
            Ok(sample_wind_grid(&response.list))
        })
        .await
    }

    /// Fetches analysed fronts; front types we do not draw are skipped
    pub async fn fronts(&self) -> Result<Vec<WeatherFront>, FetchError> {
        self.cached(keys::WEATHER_FRONTS, FRONTS_TTL, || async {
            let request = UpstreamRequest::get(&self.endpoints.fronts);
            let collection: FrontCollection = self.fetch_json("fronts", request).await?;

            Ok(collection
                .features
                .into_iter()
                .filter_map(|feature| {
                    let kind = parse_front_kind(&feature.properties.kind)?;
                    Some(WeatherFront {
                        kind,
                        coordinates: feature
                            .geometry
                            .coordinates
                            .iter()
                            .map(|[lon, lat]| Position::new(*lat, *lon))
                            .collect(),
                        timestamp: feature.properties.timestamp,
                    })
                })
                .collect())
        })
        .await
    }

    /// Fetches every weather layer as one bundle
    ///
    /// The layers are fetched concurrently. A failing layer is replaced by its
    /// empty default so the others still reach the caller; only when every
    /// layer fails is an error returned, and nothing is cached.
    pub async fn global_weather(&self) -> Result<WeatherBundle, FetchError> {
        if let Some(bundle) = get_json::<WeatherBundle>(self.store.as_ref(), keys::WEATHER_ALL).await
        {
            return Ok(bundle);
        }

        let (metars, radar, wind, fronts) =
            tokio::join!(self.metars(), self.radar(), self.wind(), self.fronts());
        let bundle = combine(Some(metars), Some(radar), Some(wind), Some(fronts))?;

        if let Err(e) = set_json(
            self.store.as_ref(),
            keys::WEATHER_ALL,
            &bundle,
            WEATHER_BUNDLE_TTL,
        )
        .await
        {
            warn!(error = %e, "failed to cache weather bundle");
        }
        Ok(bundle)
    }

    /// Fetches the enabled layers; disabled ones stay empty and are never requested
    ///
    /// With every layer enabled this is [`global_weather`](Self::global_weather).
    /// Otherwise each layer is served from its own cache entry.
    pub async fn layers(&self, layers: WeatherLayers) -> Result<WeatherBundle, FetchError> {
        if layers.all() {
            return self.global_weather().await;
        }

        let (metars, radar, wind, fronts) = tokio::join!(
            when(layers.metars, self.metars()),
            when(layers.radar, self.radar()),
            when(layers.wind, self.wind()),
            when(layers.fronts, self.fronts())
        );
        combine(metars, radar, wind, fronts)
    }
}

/// Runs `fetch` only for an enabled layer
async fn when<T>(
    enabled: bool,
    fetch: impl Future<Output = Result<T, FetchError>>,
) -> Option<Result<T, FetchError>> {
    if enabled {
        Some(fetch.await)
    } else {
        None
    }
}

/// Builds a bundle from the layers that were requested
///
/// Fails with the first error only when every requested layer failed.
fn combine(
    metars: Option<Result<Vec<Metar>, FetchError>>,
    radar: Option<Result<RadarData, FetchError>>,
    wind: Option<Result<Vec<WindSample>, FetchError>>,
    fronts: Option<Result<Vec<WeatherFront>, FetchError>>,
) -> Result<WeatherBundle, FetchError> {
    let requested: Vec<Option<&FetchError>> = [
        metars.as_ref().map(|r| r.as_ref().err()),
        radar.as_ref().map(|r| r.as_ref().err()),
        wind.as_ref().map(|r| r.as_ref().err()),
        fronts.as_ref().map(|r| r.as_ref().err()),
    ]
    .into_iter()
    .flatten()
    .collect();

    if let [Some(first), rest @ ..] = requested.as_slice() {
        if rest.iter().all(Option::is_some) {
            warn!(error = %first, "every weather layer failed");
            return Err((*first).clone());
        }
    }

    Ok(WeatherBundle {
        metars: metars.map(degrade).unwrap_or_default(),
        radar: radar.map(degrade).unwrap_or_default(),
        wind: wind.map(degrade).unwrap_or_default(),
        fronts: fronts.map(degrade).unwrap_or_default(),
    })
}

/// Replaces a failed layer with its empty value
fn degrade<T: Default>(result: Result<T, FetchError>) -> T {
    result.unwrap_or_else(|e| {
        warn!(resource = e.resource(), error = %e, "weather layer unavailable");
        T::default()
    })
}
