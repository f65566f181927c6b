//! Overview screen rendering
//!
//! Renders the main screen: a status header with refresh freshness, the table
//! of active airports with their airborne traffic, and a weather summary when
//! the weather layer is on.

use chrono::Local;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use crate::app::{App, AirportRow, RefreshStatus};
use crate::data::{FlightCategory, WeatherBundle};

/// Color for a METAR flight category, following the usual chart colors
fn category_color(category: FlightCategory) -> Color {
    match category {
        FlightCategory::Vfr => Color::Green,
        FlightCategory::Mvfr => Color::Blue,
        FlightCategory::Ifr => Color::Red,
        FlightCategory::Lifr => Color::Magenta,
    }
}

/// Color for an airport's traffic total (busier = warmer)
fn traffic_color(total: usize) -> Color {
    if total >= 20 {
        Color::Red
    } else if total >= 10 {
        Color::Yellow
    } else if total >= 3 {
        Color::Green
    } else {
        Color::Gray
    }
}

/// Describes how old the data is, e.g. "Updated 12:04:31" or "Updated 5m ago"
pub(crate) fn freshness_text(status: &RefreshStatus) -> String {
    match status.last_refresh {
        Some(last_refresh) => {
            let elapsed = Local::now() - last_refresh;
            if elapsed.num_minutes() < 1 {
                format!("Updated {}", last_refresh.format("%H:%M:%S"))
            } else if elapsed.num_minutes() < 60 {
                format!("Updated {}m ago", elapsed.num_minutes())
            } else {
                format!("Updated {}h ago", elapsed.num_hours())
            }
        }
        None => "Never updated".to_string(),
    }
}

/// Renders the overview screen
///
/// # Arguments
/// * `frame` - The ratatui Frame to render to
/// * `app` - The application state containing the views and selection
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    let weather_height = if app.settings.shows_weather() { 4 } else { 0 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),              // Status header
            Constraint::Min(3),                 // Airport table
            Constraint::Length(weather_height), // Weather summary
            Constraint::Length(1),              // Help text
        ])
        .split(area);

    render_header(frame, app, chunks[0]);
    render_airports(frame, app, chunks[1]);
    if weather_height > 0 {
        render_weather(frame, app.weather.as_ref(), chunks[2]);
    }
    render_help(frame, chunks[3]);
}

/// Renders the status header: freshness, countdown, and any feed error
fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let status = &app.status;
    let pilots = app
        .snapshot
        .as_ref()
        .map(|snapshot| snapshot.pilots.len())
        .unwrap_or(0);

    let mut first = vec![
        Span::styled(
            "FLIGHTWATCH",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(freshness_text(status), Style::default().fg(Color::White)),
        Span::raw("  "),
        Span::styled(
            format!("{} pilots", pilots),
            Style::default().fg(Color::Yellow),
        ),
    ];
    if status.in_flight {
        first.push(Span::styled(
            "  \u{27F3} refreshing",
            Style::default().fg(Color::Cyan),
        ));
    } else if !status.countdown.is_zero() {
        first.push(Span::styled(
            format!("  next in {}s", status.countdown.as_secs()),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let second = if let Some(error) = &status.error {
        Line::from(Span::styled(
            format!("\u{26A0} Flight feed error: {}", error),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ))
    } else if let Some(notice) = &status.notice {
        Line::from(Span::styled(
            notice.clone(),
            Style::default().fg(Color::DarkGray),
        ))
    } else if let Some(flight) = &app.views.user_flight {
        Line::from(vec![
            Span::styled("\u{2708} ", Style::default().fg(Color::Yellow)),
            Span::styled(
                flight.callsign.clone(),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(
                    "  FL{:03}  {} kt  {} trail points",
                    flight.altitude / 100,
                    flight.groundspeed,
                    app.trail.points().len()
                ),
                Style::default().fg(Color::Gray),
            ),
        ])
    } else {
        Line::default()
    };

    let separator = "─".repeat((area.width as usize).saturating_sub(2));
    let lines = vec![
        Line::from(first),
        second,
        Line::from(Span::styled(separator, Style::default().fg(Color::DarkGray))),
    ];

    frame.render_widget(Paragraph::new(lines), area);
}

fn airport_line(row: &AirportRow, is_selected: bool) -> Line<'static> {
    let cursor = if is_selected { "\u{25B8} " } else { "  " }; // ▸ or space
    let name_style = if is_selected {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    };

    let name: String = row.name.clone().unwrap_or_default().chars().take(32).collect();
    let total = row.counts.total();

    Line::from(vec![
        Span::styled(cursor, Style::default().fg(Color::Cyan)),
        Span::styled(format!("{:<5}", row.icao), name_style),
        Span::styled(format!("{:<33}", name), Style::default().fg(Color::Gray)),
        Span::styled(
            format!("\u{2193}{:>3}", row.counts.arrivals),
            Style::default().fg(Color::Green),
        ),
        Span::raw("  "),
        Span::styled(
            format!("\u{2191}{:>3}", row.counts.departures),
            Style::default().fg(Color::Blue),
        ),
        Span::raw("  "),
        Span::styled(format!("{:>4}", total), Style::default().fg(traffic_color(total))),
    ])
}

/// Renders the airport table, keeping the selection in view
fn render_airports(frame: &mut Frame, app: &App, area: Rect) {
    let rows = app.airport_rows();
    let title = if app.settings.layers.airports {
        format!(" Active Airports ({}) ", rows.len())
    } else {
        format!(" Traffic by Airport ({}) ", rows.len())
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    if rows.is_empty() {
        let message = if app.is_busy() {
            "Resolving airports..."
        } else {
            "No airborne traffic"
        };
        let paragraph = Paragraph::new(Span::styled(
            message,
            Style::default().fg(Color::DarkGray),
        ))
        .block(block);
        frame.render_widget(paragraph, area);
        return;
    }

    let visible = area.height.saturating_sub(2) as usize;
    let first = (app.selected_index + 1).saturating_sub(visible);

    let lines: Vec<Line> = rows
        .iter()
        .enumerate()
        .skip(first)
        .take(visible)
        .map(|(index, row)| airport_line(row, index == app.selected_index))
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

/// Renders a one-glance summary of the global weather layers
fn render_weather(frame: &mut Frame, weather: Option<&WeatherBundle>, area: Rect) {
    let block = Block::default()
        .title(" Weather ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let Some(weather) = weather else {
        let paragraph = Paragraph::new(Span::styled(
            "Loading weather...",
            Style::default().fg(Color::DarkGray),
        ))
        .block(block);
        frame.render_widget(paragraph, area);
        return;
    };

    let mut spans = vec![Span::raw(format!("{} METARs ", weather.metars.len()))];
    for category in [
        FlightCategory::Vfr,
        FlightCategory::Mvfr,
        FlightCategory::Ifr,
        FlightCategory::Lifr,
    ] {
        let count = weather
            .metars
            .iter()
            .filter(|metar| metar.flight_category == Some(category))
            .count();
        spans.push(Span::styled(
            format!(" {:?} {}", category, count).to_uppercase(),
            Style::default().fg(category_color(category)),
        ));
    }

    let radar = if weather.radar.is_available() {
        match weather.radar.timestamp {
            Some(at) => format!("radar {}", at.with_timezone(&Local).format("%H:%M")),
            None => "radar available".to_string(),
        }
    } else {
        "radar unavailable".to_string()
    };

    let second = Line::from(Span::styled(
        format!(
            "{}  {} wind samples  {} fronts",
            radar,
            weather.wind.len(),
            weather.fronts.len()
        ),
        Style::default().fg(Color::Gray),
    ));

    frame.render_widget(
        Paragraph::new(vec![Line::from(spans), second]).block(block),
        area,
    );
}

/// Renders the help text at the bottom of the screen
fn render_help(frame: &mut Frame, area: Rect) {
    let help_text = Line::from(vec![
        Span::styled("↑/↓", Style::default().fg(Color::Yellow)),
        Span::raw(" Navigate  "),
        Span::styled("Enter", Style::default().fg(Color::Yellow)),
        Span::raw(" Traffic  "),
        Span::styled("a", Style::default().fg(Color::Yellow)),
        Span::raw(" Airports  "),
        Span::styled("w", Style::default().fg(Color::Yellow)),
        Span::raw(" Weather  "),
        Span::styled("r", Style::default().fg(Color::Yellow)),
        Span::raw(" Refresh  "),
        Span::styled("?", Style::default().fg(Color::Yellow)),
        Span::raw(" Help  "),
        Span::styled("q", Style::default().fg(Color::Yellow)),
        Span::raw(" Quit"),
    ]);
    let paragraph = Paragraph::new(help_text).style(Style::default().fg(Color::DarkGray));

    frame.render_widget(paragraph, area);
}
