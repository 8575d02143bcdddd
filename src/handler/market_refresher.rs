//! Market refresh job
//!
//! Pulls every market from the upstream, writes the snapshot into the cache
//! store with one pipeline and keeps the update status current. The job
//! always returns a [`RefreshOutcome`]; failures never escape it.
//!
//! Concurrent runs are not excluded here. They write the same keys with the
//! same TTL, so the last pipeline to land wins.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    cache::{CacheStore, Pipeline},
    cache_keys,
    configuration::{AppState, State},
    error::Error,
    model::MarketRecord,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub success: bool,
    pub count: usize,
    pub duration_ms: u64,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs one full refresh cycle.
pub async fn refresh_markets(state: &State) -> RefreshOutcome {
    let started = Instant::now();
    let timestamp = Utc::now().timestamp_millis();

    info!("Starting market refresh");

    let previous = state.status.read_or_default().await;
    state.status.announce(&previous, timestamp).await;

    let result = fetch_and_cache(state, timestamp).await;
    let duration_ms = elapsed_ms(started);

    match result {
        Ok(count) => {
            state.status.record_success(timestamp).await;
            info!("Market refresh cached {} markets in {}ms", count, duration_ms);

            RefreshOutcome {
                success: true,
                count,
                duration_ms,
                timestamp,
                error: None,
            }
        },
        Err(e) => {
            if e.is_upstream() {
                warn!("Market refresh failed after {}ms: {}", duration_ms, e);
            } else {
                error!("Market refresh failed after {}ms: {}", duration_ms, e);
            }

            // a concurrent run may have succeeded since we started
            let latest = match state.status.read().await {
                Ok(Some(status)) => status,
                _ => previous,
            };
            state
                .status
                .record_failure(&latest, timestamp, e.to_string())
                .await;

            RefreshOutcome {
                success: false,
                count: 0,
                duration_ms,
                timestamp,
                error: Some(e.to_string()),
            }
        },
    }
}

/// Health check, fetch, convert and publish. Returns the number of markets
/// written.
pub async fn fetch_and_cache(state: &State, timestamp: i64) -> Result<usize, Error> {
    let upstream_timeout = state.config.upstream_timeout();

    let healthy = timeout(upstream_timeout, state.source.health_check())
        .await
        .unwrap_or(false);
    if !healthy {
        return Err(Error::HealthCheckFailed);
    }

    let markets = timeout(upstream_timeout, state.source.get_all_market_data())
        .await
        .map_err(|_| {
            Error::UpstreamUnavailable(String::from(
                "market data request timed out",
            ))
        })??;

    if markets.is_empty() {
        return Err(Error::EmptyUpstreamResult);
    }

    let received = markets.len();
    let records = markets
        .into_iter()
        .filter_map(|market| match market.into_record(timestamp) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping upstream market: {}", e);
                None
            },
        })
        .collect::<Vec<MarketRecord>>();

    if records.is_empty() {
        return Err(Error::EmptyUpstreamResult);
    }
    debug!("Converted {} of {} upstream markets", records.len(), received);

    let (pipeline, count) =
        build_pipeline(&records, timestamp, state.config.cache_ttl());

    timeout(state.config.cache_timeout(), state.store.execute(pipeline))
        .await
        .map_err(|_| {
            Error::CacheUnavailable(String::from("cache pipeline timed out"))
        })??;

    Ok(count)
}

/// One `SET .. TTL` per symbol plus the last-update and count keys. A record
/// that cannot be serialized is replaced by its fallback projection.
fn build_pipeline(
    records: &[MarketRecord],
    timestamp: i64,
    ttl: Duration,
) -> (Pipeline, usize) {
    let mut pipeline = Pipeline::new();
    let mut seen = HashSet::new();

    for record in records {
        if !seen.insert(record.symbol.as_str()) {
            warn!("Duplicate upstream market {}, keeping first", record.symbol);
            continue;
        }

        let value = match record.encode() {
            Ok(value) => value,
            Err(e) => {
                warn!("Using fallback for {}: {}", record.symbol, e);
                match record.fallback(timestamp).encode() {
                    Ok(value) => value,
                    Err(e) => {
                        error!("Dropping market {}: {}", record.symbol, e);
                        seen.remove(record.symbol.as_str());
                        continue;
                    },
                }
            },
        };

        pipeline.set_with_ttl(&cache_keys::market_key(&record.symbol), value, ttl);
    }

    let count = seen.len();
    pipeline
        .set_with_ttl(cache_keys::LAST_UPDATE, timestamp.to_string(), ttl)
        .set_with_ttl(cache_keys::MARKET_COUNT, count.to_string(), ttl);

    (pipeline, count)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// In-process scheduler. Off unless `ENABLE_SCHEDULER` is set; deployments
/// driven by an external cron hit the refresh endpoint instead.
pub async fn refresh_task(app_state: AppState<State>) -> Result<(), Error> {
    if !app_state.config.enable_scheduler {
        return Ok(());
    }

    info!(
        "Starting market refresh task (interval={}s, ttl={}s)",
        app_state.config.refresh_interval_secs,
        app_state.config.cache_ttl().as_secs()
    );

    let mut ticker = interval(app_state.config.refresh_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let outcome = refresh_markets(&app_state).await;
        if !outcome.success {
            debug!("Scheduled refresh failed, next attempt on the next tick");
        }
    }
}
