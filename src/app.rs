//! Application state management for flightwatch
//!
//! This module contains the main application state, handling keyboard input,
//! refresh messages and the background jobs that resolve airports, weather and
//! airport detail after each new snapshot.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use crossterm::event::{KeyCode, KeyEvent};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::data::{
    AirportMetar, AirportTraffic, FetchError, FlightSnapshot, WeatherBundle, WeatherClient,
};
use crate::refresh::RefreshMessage;
use crate::settings::{SettingsStore, UserSettings};
use crate::views::{traffic_counts, DerivedViews, FlightTrail, TrafficCount, ViewBuilder};

/// Application state enum representing the current view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppState {
    /// Waiting for the first flight snapshot
    Loading,
    /// Table of active airports
    Overview,
    /// Traffic and METAR for one airport
    AirportDetail(String),
}

/// Clients the app uses to resolve data for a snapshot
#[derive(Clone)]
pub struct Services {
    pub views: ViewBuilder,
    pub weather: Arc<WeatherClient>,
}

/// What the status bar shows about the refresh cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshStatus {
    /// Wall-clock time of the last successful refresh
    pub last_refresh: Option<DateTime<Local>>,
    /// Time until the next refresh is allowed
    pub countdown: Duration,
    pub in_flight: bool,
    /// Last flight feed error, cleared by the next success
    pub error: Option<String>,
    /// Short-lived informational message
    pub notice: Option<String>,
}

/// Data behind the airport detail screen
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AirportDetail {
    /// `None` when the airport cannot be resolved
    pub traffic: Option<AirportTraffic>,
    pub metar: Option<AirportMetar>,
}

/// One row of the overview table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirportRow {
    pub icao: String,
    /// Known once the airport record has been resolved
    pub name: Option<String>,
    pub counts: TrafficCount,
}

/// Main application struct managing state and data
pub struct App {
    /// Current application state/view
    pub state: AppState,
    /// Index of the selected row in the overview
    pub selected_index: usize,
    /// Flag indicating the application should quit
    pub should_quit: bool,
    /// Flag to show help overlay
    pub show_help: bool,
    /// Flag indicating a manual refresh has been requested
    pub refresh_requested: bool,
    /// Scroll offset for the airport detail view
    pub detail_scroll_offset: u16,
    pub status: RefreshStatus,
    pub settings: UserSettings,
    pub snapshot: Option<Arc<FlightSnapshot>>,
    pub views: DerivedViews,
    pub weather: Option<WeatherBundle>,
    /// Detail data for the airport shown in `AirportDetail`
    pub detail: Option<AirportDetail>,
    /// Position history of the user's flight
    pub trail: FlightTrail,
    settings_store: Option<SettingsStore>,
    services: Services,
    pending_views: Option<JoinHandle<DerivedViews>>,
    pending_weather: Option<JoinHandle<Result<WeatherBundle, FetchError>>>,
    pending_detail: Option<JoinHandle<AirportDetail>>,
}

/// Replaces a running job, aborting the one it supersedes
fn restart<T>(slot: &mut Option<JoinHandle<T>>, job: JoinHandle<T>) {
    if let Some(previous) = slot.replace(job) {
        previous.abort();
    }
}

/// Takes the job's result if it has finished
async fn take_finished<T>(slot: &mut Option<JoinHandle<T>>, wait: bool) -> Option<T> {
    if !wait && !slot.as_ref().is_some_and(JoinHandle::is_finished) {
        return None;
    }
    match slot.take()?.await {
        Ok(value) => Some(value),
        Err(e) => {
            if !e.is_cancelled() {
                warn!(error = %e, "background job failed");
            }
            None
        }
    }
}

impl App {
    /// Creates a new App in the loading state
    pub fn new(
        services: Services,
        settings: UserSettings,
        settings_store: Option<SettingsStore>,
    ) -> Self {
        Self {
            state: AppState::Loading,
            selected_index: 0,
            should_quit: false,
            show_help: false,
            refresh_requested: false,
            detail_scroll_offset: 0,
            status: RefreshStatus::default(),
            settings,
            snapshot: None,
            views: DerivedViews::default(),
            weather: None,
            detail: None,
            trail: FlightTrail::new(),
            settings_store,
            services,
            pending_views: None,
            pending_weather: None,
            pending_detail: None,
        }
    }

    /// Applies a message from the background refresh task
    pub fn apply_refresh_message(&mut self, message: RefreshMessage) {
        match message {
            RefreshMessage::Started => {
                self.status.in_flight = true;
                self.status.notice = None;
            }
            RefreshMessage::Completed(snapshot) => self.apply_snapshot(snapshot),
            RefreshMessage::Skipped { remaining } => {
                self.status.notice = Some(format!(
                    "Next refresh allowed in {}s",
                    remaining.as_secs().max(1)
                ));
            }
            RefreshMessage::Failed(error) => {
                self.status.in_flight = false;
                self.status.error = Some(error);
            }
            RefreshMessage::Countdown(remaining) => {
                self.status.countdown = remaining;
            }
        }
    }

    /// Installs a new snapshot and starts resolving everything derived from it
    pub fn apply_snapshot(&mut self, snapshot: Arc<FlightSnapshot>) {
        self.status.in_flight = false;
        self.status.error = None;
        self.status.last_refresh = Some(Local::now());

        if self.settings.layers.flight_path {
            self.trail
                .update(&snapshot, self.settings.user_callsign.as_deref());
        } else {
            self.trail.clear();
        }
        // Counts need no fetches, show them while airports resolve
        self.views.counts = traffic_counts(&snapshot);
        self.views.user_flight = self
            .settings
            .user_callsign
            .as_deref()
            .and_then(|callsign| snapshot.find_by_callsign(callsign))
            .cloned();
        self.snapshot = Some(snapshot);

        self.start_view_build();
        if self.settings.shows_weather() {
            self.start_weather_fetch();
        }
        if let AppState::AirportDetail(code) = &self.state {
            let code = code.clone();
            self.start_detail_fetch(&code);
        }

        if self.state == AppState::Loading {
            self.state = AppState::Overview;
        }
        self.clamp_selection();
    }

    fn start_view_build(&mut self) {
        let Some(snapshot) = self.snapshot.clone() else {
            return;
        };
        let views = self.services.views.clone();
        let settings = self.settings.clone();
        let job = tokio::spawn(async move { views.build(&snapshot, &settings).await });
        restart(&mut self.pending_views, job);
    }

    fn start_weather_fetch(&mut self) {
        let weather = Arc::clone(&self.services.weather);
        let layers = self.settings.layers.weather_layers;
        let job = tokio::spawn(async move { weather.layers(layers).await });
        restart(&mut self.pending_weather, job);
    }

    fn start_detail_fetch(&mut self, code: &str) {
        let Some(snapshot) = self.snapshot.clone() else {
            return;
        };
        let services = self.services.clone();
        let code = code.to_string();
        let job = tokio::spawn(async move {
            let (traffic, metar) = tokio::join!(
                services.views.airport_traffic(&snapshot, &code),
                services.weather.airport_metar(&code)
            );
            AirportDetail {
                traffic,
                metar: metar.unwrap_or_else(|e| {
                    warn!(code = %code, error = %e, "metar unavailable");
                    None
                }),
            }
        });
        restart(&mut self.pending_detail, job);
    }

    /// Collects results of background jobs that have finished
    pub async fn poll_background(&mut self) {
        self.collect(false).await;
    }

    /// Waits for every running background job
    pub async fn settle(&mut self) {
        self.collect(true).await;
    }

    async fn collect(&mut self, wait: bool) {
        if let Some(views) = take_finished(&mut self.pending_views, wait).await {
            self.views = views;
            self.clamp_selection();
        }
        if let Some(result) = take_finished(&mut self.pending_weather, wait).await {
            match result {
                Ok(bundle) => self.weather = Some(bundle),
                Err(e) => self.status.notice = Some(format!("Weather unavailable: {}", e)),
            }
        }
        if let Some(detail) = take_finished(&mut self.pending_detail, wait).await {
            self.detail = Some(detail);
        }
    }

    /// Returns true while any background job is running
    pub fn is_busy(&self) -> bool {
        self.pending_views.is_some() || self.pending_weather.is_some() || self.pending_detail.is_some()
    }

    /// Rows of the overview table, sorted by ICAO code
    ///
    /// With the airports layer on, only resolved airports are listed; with it
    /// off, every code with airborne traffic is listed without a name.
    pub fn airport_rows(&self) -> Vec<AirportRow> {
        if self.settings.layers.airports {
            self.views
                .airports
                .iter()
                .map(|airport| AirportRow {
                    icao: airport.icao.clone(),
                    name: Some(airport.name.clone()),
                    counts: self
                        .views
                        .counts
                        .get(&airport.icao)
                        .copied()
                        .unwrap_or_default(),
                })
                .collect()
        } else {
            self.views
                .counts
                .iter()
                .map(|(icao, counts)| AirportRow {
                    icao: icao.clone(),
                    name: None,
                    counts: *counts,
                })
                .collect()
        }
    }

    /// Returns the ICAO code of the selected row, if any
    pub fn selected_airport(&self) -> Option<String> {
        self.airport_rows()
            .into_iter()
            .nth(self.selected_index)
            .map(|row| row.icao)
    }

    fn clamp_selection(&mut self) {
        let count = self.airport_rows().len();
        if self.selected_index >= count {
            self.selected_index = count.saturating_sub(1);
        }
    }

    /// Handles keyboard input and updates state accordingly
    ///
    /// # Key Bindings
    /// - `q`: Quit the application
    /// - `Up`/`k`, `Down`/`j`: Move selection (overview) or scroll (detail)
    /// - `Enter`: Open the selected airport
    /// - `Esc`: Back to the overview (quits from the overview)
    /// - `r`: Request a refresh
    /// - `a`: Toggle the airports layer
    /// - `w`: Toggle the weather layer
    /// - `?`: Toggle help
    pub fn handle_key(&mut self, key_event: KeyEvent) {
        // Help overlay intercepts all keys when shown
        if self.show_help {
            if matches!(
                key_event.code,
                KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('q')
            ) {
                self.show_help = false;
            }
            return;
        }

        match self.state {
            AppState::Loading => match key_event.code {
                KeyCode::Char('q') => {
                    self.should_quit = true;
                }
                KeyCode::Char('r') => {
                    self.refresh_requested = true;
                }
                _ => {}
            },
            AppState::Overview => match key_event.code {
                KeyCode::Char('q') | KeyCode::Esc => {
                    self.should_quit = true;
                }
                KeyCode::Up | KeyCode::Char('k') => {
                    self.move_selection_up();
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    self.move_selection_down();
                }
                KeyCode::Enter => {
                    if let Some(code) = self.selected_airport() {
                        self.open_detail(code);
                    }
                }
                KeyCode::Char('r') => {
                    self.refresh_requested = true;
                }
                KeyCode::Char('a') => {
                    self.toggle_airports();
                }
                KeyCode::Char('w') => {
                    self.toggle_weather();
                }
                KeyCode::Char('?') => {
                    self.show_help = true;
                }
                _ => {}
            },
            AppState::AirportDetail(_) => match key_event.code {
                KeyCode::Char('q') => {
                    self.should_quit = true;
                }
                KeyCode::Esc => {
                    self.close_detail();
                }
                KeyCode::Char('j') | KeyCode::Down => {
                    self.detail_scroll_offset = self.detail_scroll_offset.saturating_add(1);
                }
                KeyCode::Char('k') | KeyCode::Up => {
                    self.detail_scroll_offset = self.detail_scroll_offset.saturating_sub(1);
                }
                KeyCode::Char('r') => {
                    self.refresh_requested = true;
                }
                KeyCode::Char('w') => {
                    self.toggle_weather();
                }
                KeyCode::Char('?') => {
                    self.show_help = true;
                }
                _ => {}
            },
        }
    }

    fn open_detail(&mut self, code: String) {
        self.detail = None;
        self.detail_scroll_offset = 0;
        self.start_detail_fetch(&code);
        self.state = AppState::AirportDetail(code);
    }

    fn close_detail(&mut self) {
        if let Some(job) = self.pending_detail.take() {
            job.abort();
        }
        self.detail = None;
        self.detail_scroll_offset = 0;
        self.state = AppState::Overview;
    }

    /// Moves the selection up in the list, wrapping to bottom if at top
    fn move_selection_up(&mut self) {
        let count = self.airport_rows().len();
        if count == 0 {
            return;
        }
        if self.selected_index == 0 {
            self.selected_index = count - 1;
        } else {
            self.selected_index -= 1;
        }
    }

    /// Moves the selection down in the list, wrapping to top if at bottom
    fn move_selection_down(&mut self) {
        let count = self.airport_rows().len();
        if count == 0 {
            return;
        }
        self.selected_index = (self.selected_index + 1) % count;
    }

    pub fn toggle_airports(&mut self) {
        self.settings.toggle_airports();
        self.save_settings();
        if !self.settings.layers.airports {
            self.views.airports.clear();
        }
        self.start_view_build();
        self.clamp_selection();
    }

    pub fn toggle_weather(&mut self) {
        self.settings.toggle_weather();
        self.save_settings();
        if self.settings.shows_weather() {
            self.start_weather_fetch();
        } else {
            if let Some(job) = self.pending_weather.take() {
                job.abort();
            }
            self.weather = None;
        }
    }

    fn save_settings(&mut self) {
        let Some(store) = &self.settings_store else {
            return;
        };
        if let Err(e) = store.save(&self.settings) {
            warn!(error = %e, "failed to save settings");
            self.status.notice = Some("Settings could not be saved".to_string());
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::app;
    use super::*;
    use crate::data::fixtures::{pilot, plan, snapshot};
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use tempfile::TempDir;

    /// Helper to create a KeyEvent for testing
    fn key_event(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn busy_snapshot() -> Arc<FlightSnapshot> {
        Arc::new(snapshot(vec![
            pilot("DAL1", 300, 20000, Some(plan("KJFK", "KBOS"))),
            pilot("JBU2", 250, 9000, Some(plan("KBOS", "KJFK"))),
            pilot("GATE", 0, 13, Some(plan("KJFK", "KBOS"))),
        ]))
    }

    #[tokio::test]
    async fn test_initial_state_is_loading() {
        let (app, _) = app();
        assert_eq!(app.state, AppState::Loading);
        assert!(app.snapshot.is_none());
        assert!(!app.should_quit);
    }

    #[tokio::test]
    async fn test_only_retry_and_quit_during_loading() {
        let (mut app, _) = app();
        app.handle_key(key_event(KeyCode::Enter));
        app.handle_key(key_event(KeyCode::Char('a')));
        assert_eq!(app.state, AppState::Loading);
        assert!(app.settings.layers.airports);

        app.handle_key(key_event(KeyCode::Char('r')));
        assert!(app.refresh_requested);

        app.handle_key(key_event(KeyCode::Char('q')));
        assert!(app.should_quit);
    }

    #[tokio::test]
    async fn test_snapshot_moves_to_overview_with_counts() {
        let (mut app, _) = app();

        app.apply_refresh_message(RefreshMessage::Completed(busy_snapshot()));

        assert_eq!(app.state, AppState::Overview);
        assert!(app.status.last_refresh.is_some());
        assert_eq!(app.views.counts["KJFK"].total(), 2);
    }

    #[tokio::test]
    async fn test_views_resolve_in_background() {
        let (mut app, _) = app();
        app.apply_refresh_message(RefreshMessage::Completed(busy_snapshot()));

        app.settle().await;

        let rows = app.airport_rows();
        let codes: Vec<&str> = rows.iter().map(|r| r.icao.as_str()).collect();
        assert_eq!(codes, vec!["KBOS", "KJFK"]);
        assert_eq!(rows[1].name.as_deref(), Some("KJFK Airport"));
        assert_eq!(
            rows[1].counts,
            TrafficCount {
                arrivals: 1,
                departures: 1
            }
        );
        assert!(!app.is_busy());
    }

    #[tokio::test]
    async fn test_failure_is_shown_and_cleared_by_success() {
        let (mut app, _) = app();
        app.apply_refresh_message(RefreshMessage::Started);
        assert!(app.status.in_flight);

        app.apply_refresh_message(RefreshMessage::Failed("feed down".to_string()));
        assert!(!app.status.in_flight);
        assert_eq!(app.status.error.as_deref(), Some("feed down"));
        assert_eq!(app.state, AppState::Loading);

        app.apply_refresh_message(RefreshMessage::Completed(busy_snapshot()));
        assert!(app.status.error.is_none());
    }

    #[tokio::test]
    async fn test_skip_and_countdown_update_status() {
        let (mut app, _) = app();
        app.apply_refresh_message(RefreshMessage::Countdown(Duration::from_secs(9)));
        app.apply_refresh_message(RefreshMessage::Skipped {
            remaining: Duration::from_secs(9),
        });

        assert_eq!(app.status.countdown, Duration::from_secs(9));
        assert_eq!(
            app.status.notice.as_deref(),
            Some("Next refresh allowed in 9s")
        );
    }

    #[tokio::test]
    async fn test_navigation_wraps() {
        let (mut app, _) = app();
        app.apply_snapshot(busy_snapshot());
        app.settle().await;

        app.handle_key(key_event(KeyCode::Up));
        assert_eq!(app.selected_index, 1);
        app.handle_key(key_event(KeyCode::Char('j')));
        assert_eq!(app.selected_index, 0);
        app.handle_key(key_event(KeyCode::Char('j')));
        assert_eq!(app.selected_index, 1);
    }

    #[tokio::test]
    async fn test_enter_opens_detail_and_esc_returns() {
        let (mut app, _) = app();
        app.apply_snapshot(busy_snapshot());
        app.settle().await;
        app.selected_index = 1;

        app.handle_key(key_event(KeyCode::Enter));
        assert_eq!(app.state, AppState::AirportDetail("KJFK".to_string()));

        app.settle().await;
        let detail = app.detail.clone().expect("detail should load");
        let traffic = detail.traffic.expect("traffic should resolve");
        assert_eq!(traffic.arrivals.len(), 1);
        assert_eq!(traffic.departures.len(), 1);
        assert!(detail.metar.unwrap().raw.starts_with("KJFK"));

        app.handle_key(key_event(KeyCode::Esc));
        assert_eq!(app.state, AppState::Overview);
        assert!(app.detail.is_none());
        assert!(!app.should_quit);
    }

    #[tokio::test]
    async fn test_r_requests_refresh() {
        let (mut app, _) = app();
        app.apply_snapshot(busy_snapshot());
        app.handle_key(key_event(KeyCode::Char('r')));
        assert!(app.refresh_requested);
    }

    #[tokio::test]
    async fn test_hiding_airports_lists_codes_without_fetching() {
        let (mut app, transport) = app();
        app.settings.toggle_airports();

        app.apply_snapshot(busy_snapshot());
        app.settle().await;

        assert_eq!(transport.calls(), 0);
        let rows = app.airport_rows();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.name.is_none()));
    }

    #[tokio::test]
    async fn test_toggles_are_saved() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::with_path(dir.path().join("settings.json"));
        let (base, _) = app();
        let mut app = App::new(
            base.services.clone(),
            UserSettings::default(),
            Some(store.clone()),
        );
        app.apply_snapshot(busy_snapshot());

        app.handle_key(key_event(KeyCode::Char('a')));
        app.handle_key(key_event(KeyCode::Char('w')));

        let saved = store.load();
        assert!(!saved.layers.airports);
        assert!(saved.layers.weather);
    }

    #[tokio::test]
    async fn test_weather_off_clears_bundle() {
        let (mut app, _) = app();
        app.apply_snapshot(busy_snapshot());
        app.weather = Some(WeatherBundle::default());
        app.settings.layers.weather = true;

        app.handle_key(key_event(KeyCode::Char('w')));

        assert!(!app.settings.layers.weather);
        assert!(app.weather.is_none());
    }

    #[tokio::test]
    async fn test_user_flight_trail_follows_callsign() {
        let (mut app, _) = app();
        app.settings.set_user_callsign("dal1");

        app.apply_snapshot(busy_snapshot());

        assert_eq!(app.views.user_flight.as_ref().unwrap().callsign, "DAL1");
        assert_eq!(app.trail.points().len(), 1);
    }

    #[tokio::test]
    async fn test_flight_path_off_keeps_no_trail() {
        let (mut app, _) = app();
        app.settings.set_user_callsign("dal1");
        app.apply_snapshot(busy_snapshot());
        assert_eq!(app.trail.points().len(), 1);

        app.settings.layers.flight_path = false;
        app.apply_snapshot(busy_snapshot());

        assert!(app.trail.points().is_empty());
        assert_eq!(app.views.user_flight.as_ref().unwrap().callsign, "DAL1");
    }

    #[tokio::test]
    async fn test_weather_fetch_skips_disabled_layers() {
        let (mut app, transport) = app();
        let endpoints = crate::data::WeatherEndpoints::default();
        app.settings.layers.weather_layers.radar = false;
        app.settings.layers.weather_layers.wind = false;
        app.apply_snapshot(busy_snapshot());

        app.handle_key(key_event(KeyCode::Char('w')));
        app.settle().await;

        assert_eq!(transport.calls_to(&endpoints.checkwx), 1);
        assert_eq!(transport.calls_to(&endpoints.fronts), 1);
        assert_eq!(transport.calls_to(&endpoints.rainviewer), 0);
        assert_eq!(transport.calls_to(&endpoints.openweather), 0);
    }

    #[tokio::test]
    async fn test_help_overlay_intercepts_keys() {
        let (mut app, _) = app();
        app.apply_snapshot(busy_snapshot());

        app.handle_key(key_event(KeyCode::Char('?')));
        assert!(app.show_help);
        app.handle_key(key_event(KeyCode::Char('r')));
        assert!(!app.refresh_requested);
        app.handle_key(key_event(KeyCode::Esc));
        assert!(!app.show_help);
        assert!(!app.should_quit);
    }
}
