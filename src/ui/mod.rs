//! UI rendering module for flightwatch
//!
//! This module contains all the rendering logic for the terminal user interface,
//! using the ratatui library for TUI components.

pub mod airport_detail;
pub mod help_overlay;
pub mod overview;

use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Style},
    text::Line,
    widgets::Paragraph,
    Frame,
};

use crate::app::{App, AppState};

/// Renders the UI based on the current application state
pub fn render_ui(frame: &mut Frame, app: &mut App) {
    match app.state.clone() {
        AppState::Loading => {
            render_loading(frame, app);
        }
        AppState::Overview => {
            overview::render(frame, app);
        }
        AppState::AirportDetail(icao) => {
            airport_detail::render(frame, app, &icao);
        }
    }

    if app.show_help {
        help_overlay::render(frame, &app.settings);
    }
}

/// Renders a loading message while the first snapshot is fetched
fn render_loading(frame: &mut Frame, app: &App) {
    let area = frame.area();

    // Center the loading message vertically
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(45),
            Constraint::Length(3),
            Constraint::Percentage(45),
        ])
        .split(area);

    let mut lines = vec![Line::styled(
        "Loading live traffic...",
        Style::default().fg(Color::Cyan),
    )];
    if let Some(error) = &app.status.error {
        lines.push(Line::styled(
            format!("Flight feed error: {}", error),
            Style::default().fg(Color::Red),
        ));
        lines.push(Line::styled(
            "Press r to retry, q to quit",
            Style::default().fg(Color::DarkGray),
        ));
    }

    frame.render_widget(
        Paragraph::new(lines).alignment(Alignment::Center),
        chunks[1],
    );
}
