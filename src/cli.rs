//! CLI module for the market cache service
//!
//! Runs the HTTP server by default, or a single refresh / health probe
//! against the configured cache and upstream without starting the server.

use clap::{Parser, Subcommand};

use crate::{
    configuration::{get_configuration, set_configuration, AppState, Config, State},
    error::Error,
    handler::{market_refresher::refresh_markets, status_tracker::get_health},
};

/// Perpetual market cache
#[derive(Parser)]
#[command(name = "market-cache")]
#[command(about = "Cached perpetual market data service", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (default if no command specified)
    Serve,

    /// Run one refresh cycle and print the result
    Refresh,

    /// Check cache and upstream health and print the report
    Health,
}

/// Initialize configuration and return Config
pub fn init_config() -> Result<Config, Error> {
    set_configuration()?;
    get_configuration()
}

pub async fn init_state() -> Result<AppState<State>, Error> {
    let config = init_config()?;
    let state = State::connect(config).await?;
    Ok(AppState::new(state))
}

/// Exits non-zero when the refresh failed.
pub async fn run_refresh() -> Result<(), Error> {
    let app_state = init_state().await?;
    let outcome = refresh_markets(&app_state).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.success {
        Ok(())
    } else {
        Err(Error::ServerError(outcome.error.unwrap_or_default()))
    }
}

pub async fn run_health() -> Result<(), Error> {
    let app_state = init_state().await?;
    let report = get_health(&app_state).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.healthy {
        Ok(())
    } else {
        Err(Error::ServerError(String::from("service unhealthy")))
    }
}
