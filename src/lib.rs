//! flightwatch library
//!
//! Live flight traffic with cached airport and weather lookups. The binary is
//! a thin terminal front end; everything else lives here so integration tests
//! can drive it through the transport and store seams.

pub mod app;
pub mod blacklist;
pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod logging;
pub mod refresh;
pub mod settings;
pub mod singleflight;
pub mod ui;
pub mod views;
