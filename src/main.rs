//! flightwatch - live VATSIM traffic in the terminal
//!
//! A terminal UI that shows airborne traffic per airport, refreshed on a
//! timer, with airport metadata and weather fetched through a shared cache.

use std::io;
use std::panic;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::{debug, error, info, warn};

use flightwatch::app::{App, Services};
use flightwatch::cache::{FileStore, KvStore, MemoryStore};
use flightwatch::cli::{Cli, StartupConfig};
use flightwatch::config::AppConfig;
use flightwatch::data::{
    AirportClient, FlightFeedClient, FlightSnapshot, HttpTransport, ReqwestTransport,
    WeatherClient,
};
use flightwatch::logging::{default_log_dir, init_logging, LOG_FILE};
use flightwatch::refresh::{try_recv, RefreshConfig, RefreshHandle, RefreshOutcome, RefreshScheduler};
use flightwatch::settings::SettingsStore;
use flightwatch::ui;
use flightwatch::views::{traffic_counts, ViewBuilder};

/// Airports listed by `--once` without `--airport`
const SUMMARY_AIRPORTS: usize = 10;

/// Sets up a panic hook that restores the terminal before printing the panic message.
/// This ensures the terminal is usable even if the application panics.
fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // Attempt to restore the terminal
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        // Call the original panic hook
        original_hook(panic_info);
    }));
}

/// Opens the on-disk cache, falling back to memory when no directory is usable
async fn open_store(cache_dir: Option<PathBuf>) -> Arc<dyn KvStore> {
    let Some(store) = cache_dir.map(FileStore::with_dir).or_else(FileStore::new) else {
        warn!("no cache directory available, caching in memory");
        return Arc::new(MemoryStore::new());
    };

    match store.purge_expired().await {
        Ok(removed) => info!(
            dir = %store.cache_dir().display(),
            removed,
            "cache opened"
        ),
        Err(e) => warn!(error = %e, "could not purge expired cache entries"),
    }
    Arc::new(store)
}

/// Prints one refresh as plain text, for scripts and quick checks
async fn run_once(
    scheduler: &RefreshScheduler<FlightFeedClient>,
    services: &Services,
    airport: Option<&str>,
) -> Result<(), String> {
    let snapshot = match scheduler.request_refresh().await {
        RefreshOutcome::Refreshed(snapshot) => snapshot,
        RefreshOutcome::Failed(e) => return Err(e.to_string()),
        RefreshOutcome::Skipped(_) | RefreshOutcome::Discarded => {
            return Err("refresh did not run".to_string())
        }
    };

    match airport {
        Some(code) => print_airport(&snapshot, services, code).await,
        None => {
            print_summary(&snapshot);
            Ok(())
        }
    }
}

fn print_summary(snapshot: &FlightSnapshot) {
    let mut counts: Vec<_> = traffic_counts(snapshot).into_iter().collect();
    counts.sort_by(|(a_code, a), (b_code, b)| {
        b.total().cmp(&a.total()).then_with(|| a_code.cmp(b_code))
    });

    let airborne = snapshot.pilots.iter().filter(|p| p.is_airborne()).count();
    println!(
        "{} pilots connected, {} airborne",
        snapshot.pilots.len(),
        airborne
    );
    for (code, count) in counts.iter().take(SUMMARY_AIRPORTS) {
        println!(
            "{:<5} {:>4} arrivals {:>4} departures",
            code, count.arrivals, count.departures
        );
    }
}

async fn print_airport(
    snapshot: &FlightSnapshot,
    services: &Services,
    code: &str,
) -> Result<(), String> {
    let (traffic, metar) = tokio::join!(
        services.views.airport_traffic(snapshot, code),
        services.weather.airport_metar(code)
    );
    let traffic = traffic.ok_or_else(|| format!("airport {} is unavailable", code))?;

    println!("{} - {}", traffic.airport.icao, traffic.airport.name);
    match metar {
        Ok(Some(metar)) => println!("METAR {}", metar.raw),
        Ok(None) => println!("METAR not available"),
        Err(e) => println!("METAR unavailable: {}", e),
    }

    println!("Arrivals ({})", traffic.arrivals.len());
    for entry in &traffic.arrivals {
        let eta = entry
            .eta
            .map(|eta| eta.format("%H:%MZ").to_string())
            .unwrap_or_else(|| "--:--".to_string());
        println!("  {:<9} from {:<5} ETA {}", entry.callsign, entry.departure, eta);
    }
    println!("Departures ({})", traffic.departures.len());
    for entry in &traffic.departures {
        println!("  {:<9} to   {:<5}", entry.callsign, entry.arrival);
    }
    Ok(())
}

async fn run_tui(
    scheduler: Arc<RefreshScheduler<FlightFeedClient>>,
    services: Services,
    settings_store: Option<SettingsStore>,
    startup: &StartupConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = settings_store
        .as_ref()
        .map(SettingsStore::load)
        .unwrap_or_default();
    if let Some(callsign) = &startup.callsign {
        settings.set_user_callsign(callsign);
    }

    // Set up panic hook to restore terminal on crash
    setup_panic_hook();

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(services, settings, settings_store);
    let mut refresh_handle = RefreshHandle::spawn(
        scheduler,
        RefreshConfig {
            auto_refresh: startup.auto_refresh,
        },
    );
    if !startup.auto_refresh {
        refresh_handle.request_refresh();
    }

    // Main event loop
    loop {
        while let Some(message) = try_recv(&mut refresh_handle) {
            app.apply_refresh_message(message);
        }
        app.poll_background().await;

        terminal.draw(|f| ui::render_ui(f, &mut app))?;

        // Poll for keyboard events with 100ms timeout
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                app.handle_key(key);
            }
        }

        if app.refresh_requested {
            app.refresh_requested = false;
            refresh_handle.request_refresh();
        }

        // Check if we should quit
        if app.should_quit {
            break;
        }
    }

    refresh_handle.shutdown().await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let startup = match StartupConfig::from_cli(&cli) {
        Ok(startup) => startup,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    let _logging = match init_logging(&default_log_dir(), LOG_FILE, startup.once) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        }
    };

    let transport: Arc<dyn HttpTransport> = match ReqwestTransport::new(config.request_timeout) {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            eprintln!("Error: could not create HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let store = open_store(startup.cache_dir.clone()).await;

    let airports = AirportClient::new(
        Arc::clone(&transport),
        Arc::clone(&store),
        config.airport_db_token.clone(),
    )
    .with_base_url(&config.airport_db_url);
    let weather = WeatherClient::new(Arc::clone(&transport), store, config.weather_keys.clone())
        .with_endpoints(config.weather_endpoints.clone());
    let services = Services {
        views: ViewBuilder::new(Arc::new(airports)),
        weather: Arc::new(weather),
    };

    let feed = FlightFeedClient::with_url(transport, &config.flight_feed_url);
    let interval = startup.refresh_interval.unwrap_or(config.refresh_interval);
    // Views are rebuilt by the app from `RefreshMessage::Completed`; the
    // callback only records feed timestamps
    let scheduler = Arc::new(
        RefreshScheduler::new(feed, interval).with_callback(|snapshot| {
            debug!(
                updated_at = ?snapshot.updated_at,
                fetched_at = %snapshot.fetched_at,
                "feed timestamps"
            );
        }),
    );
    info!(interval_ms = interval.as_millis() as u64, "starting");

    if startup.once {
        return match run_once(&scheduler, &services, startup.airport.as_deref()).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "refresh failed");
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    match run_tui(scheduler, services, SettingsStore::new(), &startup).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "terminal error");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
