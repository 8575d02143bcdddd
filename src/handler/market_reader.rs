//! Read path for cached markets.
//!
//! Serves whatever the cache holds, validated and sorted by quote volume.
//! An empty cache triggers one inline refresh guarded by a short-lived lock
//! key, so concurrent cold reads wait for a single upstream fetch instead of
//! each issuing their own.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    cache::CacheStore,
    cache_keys,
    configuration::State,
    error::Error,
    handler::market_refresher::{refresh_markets, RefreshOutcome},
    model::MarketRecord,
};

pub const MESSAGE_FROM_CACHE: &str = "Markets served from cache";
pub const MESSAGE_FRESHLY_FETCHED: &str = "Markets freshly fetched from upstream";
pub const MESSAGE_NO_DATA: &str = "No market data available";

static LOCK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq)]
pub struct MarketsSnapshot {
    pub records: Vec<MarketRecord>,
    pub last_updated: Option<i64>,
    /// Seconds since `last_updated`.
    pub cache_age: Option<i64>,
    pub is_stale: bool,
    pub refreshed: bool,
    /// Raw cache entries dropped by validation.
    pub dropped: usize,
}

impl MarketsSnapshot {
    pub fn message(&self) -> &'static str {
        if self.records.is_empty() {
            MESSAGE_NO_DATA
        } else if self.refreshed {
            MESSAGE_FRESHLY_FETCHED
        } else {
            MESSAGE_FROM_CACHE
        }
    }
}

/// How an inline refresh went from this caller's point of view.
#[derive(Debug)]
enum InlineRefresh {
    Ran(RefreshOutcome),
    Awaited,
}

/// Reads the current markets. `force_refresh` runs the inline refresh even
/// when the cache is populated. Only a cache failure is an error.
pub async fn read_markets(
    state: &State,
    force_refresh: bool,
) -> Result<MarketsSnapshot, Error> {
    let (mut raw, mut last_updated) = load(state).await?;
    let mut refreshed = false;

    if raw.is_empty() || force_refresh {
        let was_empty = raw.is_empty();
        if was_empty {
            info!("Market cache is empty, refreshing inline");
        }

        let previous_update = last_updated;
        let inline = refresh_single_flight(state).await;
        (raw, last_updated) = load(state).await?;

        // a waiter only counts as refreshed if another caller published
        refreshed = match inline {
            InlineRefresh::Ran(outcome) => outcome.success && outcome.count > 0,
            InlineRefresh::Awaited => {
                was_empty || last_updated != previous_update
            },
        } && !raw.is_empty();

        if !refreshed {
            warn!("Inline market refresh produced no data");
        }
    }

    let (mut records, dropped) = validate_records(&raw);
    if dropped > 0 {
        warn!(
            "Dropped {} invalid market records out of {}",
            dropped,
            raw.len()
        );
    }

    sort_by_quote_volume(&mut records);

    let now = Utc::now().timestamp_millis();
    let cache_age = last_updated.map(|ts| cache_age_secs(now, ts));
    let stale_threshold =
        i64::try_from(state.config.stale_threshold_secs).unwrap_or(i64::MAX);
    let is_stale = match cache_age {
        Some(age) => age > stale_threshold,
        None => !records.is_empty(),
    };
    if is_stale {
        warn!(
            "Serving stale market data (age={:?}s, threshold={}s)",
            cache_age, state.config.stale_threshold_secs
        );
    }

    Ok(MarketsSnapshot {
        records,
        last_updated,
        cache_age,
        is_stale,
        refreshed,
        dropped,
    })
}

async fn load(state: &State) -> Result<(Vec<String>, Option<i64>), Error> {
    let raw = state
        .store
        .get_all(cache_keys::MARKET_PREFIX)
        .await
        .map_err(cache_unavailable)?;

    let last_updated = state
        .store
        .get(cache_keys::LAST_UPDATE)
        .await
        .map_err(cache_unavailable)?
        .and_then(|value| match value.parse::<i64>() {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!("Ignoring unreadable last update {:?}: {}", value, e);
                None
            },
        });

    Ok((raw, last_updated))
}

fn cache_unavailable(e: Error) -> Error {
    match e {
        Error::CacheUnavailable(_) => e,
        other => Error::CacheUnavailable(other.to_string()),
    }
}

/// Takes the refresh lock and refreshes, or waits for whoever holds it.
async fn refresh_single_flight(state: &State) -> InlineRefresh {
    let token = lock_token();
    let acquired = state
        .store
        .set_if_absent(
            cache_keys::REFRESH_LOCK,
            token.clone(),
            state.config.refresh_lock_ttl(),
        )
        .await;

    match acquired {
        Ok(true) => {
            let outcome = refresh_markets(state).await;
            release_lock(state, &token).await;
            InlineRefresh::Ran(outcome)
        },
        Ok(false) => {
            debug!("Refresh already in flight, waiting for it");
            wait_for_refresh(state).await;
            InlineRefresh::Awaited
        },
        Err(e) => {
            warn!("Refresh lock unavailable, refreshing without it: {}", e);
            InlineRefresh::Ran(refresh_markets(state).await)
        },
    }
}

fn lock_token() -> String {
    format!(
        "{}-{}-{}",
        std::process::id(),
        Utc::now().timestamp_millis(),
        LOCK_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

/// Deletes the lock only while it still carries our token; an expired and
/// re-acquired lock belongs to someone else.
async fn release_lock(state: &State, token: &str) {
    match state
        .store
        .delete_if_equals(cache_keys::REFRESH_LOCK, token)
        .await
    {
        Ok(true) => {},
        Ok(false) => debug!("Refresh lock expired before release"),
        Err(e) => warn!("Could not release refresh lock: {}", e),
    }
}

async fn wait_for_refresh(state: &State) {
    for _ in 0..state.config.refresh_wait_attempts {
        sleep(state.config.refresh_wait_interval()).await;

        match state.store.get(cache_keys::REFRESH_LOCK).await {
            Ok(None) => return,
            Ok(Some(_)) => continue,
            Err(e) => {
                warn!("Could not poll refresh lock: {}", e);
                return;
            },
        }
    }
    warn!("Gave up waiting for in-flight refresh");
}

/// Parses every raw entry; invalid ones are counted and dropped.
pub fn validate_records(raw: &[String]) -> (Vec<MarketRecord>, usize) {
    let mut records = Vec::with_capacity(raw.len());
    let mut dropped = 0;

    for value in raw {
        match MarketRecord::decode(value) {
            Ok(record) => records.push(record),
            Err(e) => {
                debug!("Invalid cached market: {}", e);
                dropped += 1;
            },
        }
    }

    (records, dropped)
}

/// Most active first. Stable, so equal volumes keep cache order.
pub fn sort_by_quote_volume(records: &mut [MarketRecord]) {
    records.sort_by(|a, b| b.quote_volume.total_cmp(&a.quote_volume));
}

pub fn cache_age_secs(now_ms: i64, last_updated_ms: i64) -> i64 {
    (now_ms.saturating_sub(last_updated_ms) / 1000).max(0)
}
