//! Airport detail screen UI
//!
//! Renders arrivals (with estimated arrival times), departures and the latest
//! METAR for a single airport in a bordered, scrollable box.

use chrono::{DateTime, Local, Utc};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use crate::app::{AirportDetail, App};
use crate::data::{AirportMetar, AirportTraffic, TrafficEntry};

mod colors {
    use ratatui::style::Color;

    pub const HEADER: Color = Color::Cyan;
    pub const PRIMARY: Color = Color::White;
    pub const SECONDARY: Color = Color::Gray;
    pub const UNKNOWN: Color = Color::DarkGray;
    pub const ARRIVAL: Color = Color::Green;
    pub const DEPARTURE: Color = Color::Blue;
}

/// Formats an ETA as local time, or a placeholder when none is known
fn format_eta(eta: Option<DateTime<Utc>>) -> String {
    eta.map(|eta| eta.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

fn section_title(title: &str, count: usize, color: Color) -> Line<'static> {
    Line::from(Span::styled(
        format!("{} ({})", title, count),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    ))
}

fn flight_line(entry: &TrafficEntry, other_end: &str, eta: Option<String>) -> Line<'static> {
    let mut spans = vec![
        Span::styled(
            format!("  {:<9}", entry.callsign),
            Style::default().fg(colors::PRIMARY),
        ),
        Span::styled(
            format!("{:<6}", entry.aircraft),
            Style::default().fg(colors::SECONDARY),
        ),
        Span::styled(format!("{:<6}", other_end), Style::default().fg(colors::SECONDARY)),
        Span::raw(format!(
            "FL{:03} {:>4} kt",
            entry.altitude / 100,
            entry.groundspeed
        )),
    ];
    if let Some(eta) = eta {
        spans.push(Span::styled(
            format!("  ETA {}", eta),
            Style::default().fg(colors::HEADER),
        ));
    }
    Line::from(spans)
}

fn traffic_lines(traffic: &AirportTraffic) -> Vec<Line<'static>> {
    let mut lines = vec![section_title(
        "Arrivals",
        traffic.arrivals.len(),
        colors::ARRIVAL,
    )];
    if traffic.arrivals.is_empty() {
        lines.push(Line::from(Span::styled(
            "  No inbound traffic",
            Style::default().fg(colors::UNKNOWN),
        )));
    }
    for entry in &traffic.arrivals {
        lines.push(flight_line(
            entry,
            &entry.departure,
            Some(format_eta(entry.eta)),
        ));
    }

    lines.push(Line::default());
    lines.push(section_title(
        "Departures",
        traffic.departures.len(),
        colors::DEPARTURE,
    ));
    if traffic.departures.is_empty() {
        lines.push(Line::from(Span::styled(
            "  No outbound traffic",
            Style::default().fg(colors::UNKNOWN),
        )));
    }
    for entry in &traffic.departures {
        lines.push(flight_line(entry, &entry.arrival, None));
    }
    lines
}

fn metar_lines(metar: Option<&AirportMetar>) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(Span::styled(
        "METAR",
        Style::default()
            .fg(colors::HEADER)
            .add_modifier(Modifier::BOLD),
    ))];
    match metar {
        Some(metar) => lines.push(Line::from(Span::styled(
            format!("  {}", metar.raw),
            Style::default().fg(colors::PRIMARY),
        ))),
        None => lines.push(Line::from(Span::styled(
            "  No METAR available",
            Style::default().fg(colors::UNKNOWN),
        ))),
    }
    lines
}

/// Builds every line of the scrollable body
fn body_lines(detail: &AirportDetail) -> Vec<Line<'static>> {
    let mut lines = metar_lines(detail.metar.as_ref());
    lines.push(Line::default());
    match &detail.traffic {
        Some(traffic) => lines.extend(traffic_lines(traffic)),
        None => lines.push(Line::from(Span::styled(
            "Airport details unavailable",
            Style::default().fg(colors::UNKNOWN),
        ))),
    }
    lines
}

/// Renders the airport detail screen
///
/// # Arguments
/// * `frame` - The ratatui frame to render into
/// * `app` - The application state; the scroll offset is clamped to the content
/// * `icao` - The airport being shown
pub fn render(frame: &mut Frame, app: &mut App, icao: &str) {
    let area = frame.area();

    let title = app
        .detail
        .as_ref()
        .and_then(|detail| detail.traffic.as_ref())
        .map(|traffic| format!(" {} - {} ", icao, traffic.airport.name))
        .unwrap_or_else(|| format!(" {} ", icao));

    let main_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(colors::HEADER))
        .title(Span::styled(
            title,
            Style::default()
                .fg(colors::PRIMARY)
                .add_modifier(Modifier::BOLD),
        ));

    let inner_area = main_block.inner(area);
    frame.render_widget(main_block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // Refresh status
            Constraint::Min(0),    // Scrollable content
            Constraint::Length(2), // Help text
        ])
        .split(inner_area);

    let status_area = Rect {
        height: 1,
        ..chunks[0]
    };
    let freshness = super::overview::freshness_text(&app.status);
    let status_line = match &app.status.error {
        Some(error) => Line::from(Span::styled(
            format!("\u{26A0} {}", error),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        None => Line::from(Span::styled(
            freshness,
            Style::default().fg(colors::SECONDARY),
        )),
    };
    frame.render_widget(Paragraph::new(status_line), status_area);

    let Some(detail) = app.detail.as_ref() else {
        let loading = Paragraph::new(Span::styled(
            "Loading airport...",
            Style::default().fg(colors::HEADER),
        ));
        frame.render_widget(loading, chunks[1]);
        render_help_text(frame, chunks[2]);
        return;
    };

    let lines = body_lines(detail);
    let max_scroll = (lines.len() as u16).saturating_sub(chunks[1].height);
    if app.detail_scroll_offset > max_scroll {
        app.detail_scroll_offset = max_scroll;
    }

    let content = Paragraph::new(lines).scroll((app.detail_scroll_offset, 0));
    frame.render_widget(content, chunks[1]);

    render_help_text(frame, chunks[2]);
}

fn render_help_text(frame: &mut Frame, area: Rect) {
    let help_line = Line::from(vec![
        Span::styled("<- Back", Style::default().fg(colors::SECONDARY)),
        Span::raw("  "),
        Span::styled("j/k", Style::default().fg(colors::HEADER)),
        Span::styled(" Scroll", Style::default().fg(colors::SECONDARY)),
        Span::raw("  "),
        Span::styled("r", Style::default().fg(colors::HEADER)),
        Span::styled(" Refresh", Style::default().fg(colors::SECONDARY)),
        Span::raw("  "),
        Span::styled("q", Style::default().fg(colors::HEADER)),
        Span::styled(" Quit", Style::default().fg(colors::SECONDARY)),
    ]);

    let paragraph = Paragraph::new(vec![Line::default(), help_line]);
    frame.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::app;
    use crate::app::AppState;
    use crate::data::fixtures::airport;
    use ratatui::{backend::TestBackend, Terminal};

    fn entry(callsign: &str, departure: &str, arrival: &str, eta: Option<DateTime<Utc>>) -> TrafficEntry {
        TrafficEntry {
            callsign: callsign.to_string(),
            aircraft: "A320".to_string(),
            departure: departure.to_string(),
            arrival: arrival.to_string(),
            groundspeed: 420,
            altitude: 35000,
            heading: 45,
            eta,
        }
    }

    fn draw(app: &mut App, icao: &str, height: u16) -> String {
        let backend = TestBackend::new(80, height);
        let mut terminal = Terminal::new(backend).unwrap();

        terminal
            .draw(|frame| {
                render(frame, app, icao);
            })
            .unwrap();

        let buffer = terminal.backend().buffer();
        buffer.content().iter().map(|cell| cell.symbol()).collect()
    }

    fn detail_app() -> App {
        let (mut app, _) = app();
        app.state = AppState::AirportDetail("KJFK".to_string());
        app.detail = Some(AirportDetail {
            traffic: Some(AirportTraffic {
                airport: airport("KJFK", 40.64, -73.78),
                arrivals: vec![entry("JBU2", "KBOS", "KJFK", Some(Utc::now()))],
                departures: vec![entry("DAL1", "KJFK", "KBOS", None)],
            }),
            metar: Some(AirportMetar {
                icao: "KJFK".to_string(),
                raw: "KJFK 171251Z 22012KT 10SM FEW250".to_string(),
                fetched_at: Utc::now(),
            }),
        });
        app
    }

    #[tokio::test]
    async fn test_detail_shows_traffic_and_metar() {
        let mut app = detail_app();
        let content = draw(&mut app, "KJFK", 24);

        assert!(content.contains("KJFK - KJFK Airport"));
        assert!(content.contains("Arrivals (1)"));
        assert!(content.contains("JBU2"));
        assert!(content.contains("ETA"));
        assert!(content.contains("Departures (1)"));
        assert!(content.contains("FL350"));
        assert!(content.contains("22012KT"));
    }

    #[tokio::test]
    async fn test_loading_before_detail_arrives() {
        let (mut app, _) = app();
        let content = draw(&mut app, "EGLL", 24);

        assert!(content.contains("EGLL"));
        assert!(content.contains("Loading airport..."));
    }

    #[tokio::test]
    async fn test_unresolvable_airport_and_missing_metar() {
        let (mut app, _) = app();
        app.detail = Some(AirportDetail::default());

        let content = draw(&mut app, "ZZZZ", 24);

        assert!(content.contains("Airport details unavailable"));
        assert!(content.contains("No METAR available"));
    }

    #[tokio::test]
    async fn test_scroll_offset_is_clamped() {
        let mut app = detail_app();
        app.detail_scroll_offset = 500;

        draw(&mut app, "KJFK", 12);

        // 8 body lines, 6 visible rows in a 12-row terminal
        assert_eq!(app.detail_scroll_offset, 2);
    }

    #[test]
    fn test_format_eta_placeholder() {
        assert_eq!(format_eta(None), "--:--");
    }
}
