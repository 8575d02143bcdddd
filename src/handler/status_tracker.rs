//! Update status bookkeeping and component health.
//!
//! The status record lives in the cache store under
//! `markets:update_status` without a TTL, so it stays readable after the
//! market data itself has expired.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{error, warn};

use crate::{
    cache::CacheStore,
    cache_keys,
    configuration::State,
    error::Error,
    model::UpdateStatus,
};

#[derive(Clone)]
pub struct UpdateStatusTracker {
    store: Arc<dyn CacheStore>,
}

impl UpdateStatusTracker {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// `Ok(None)` when no refresh ever ran or the stored blob is unreadable.
    pub async fn read(&self) -> Result<Option<UpdateStatus>, Error> {
        let raw = match self.store.get(cache_keys::UPDATE_STATUS).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match serde_json::from_str::<UpdateStatus>(&raw) {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                warn!("Discarding unreadable update status: {}", e);
                Ok(None)
            },
        }
    }

    /// Like `read`, but a missing or unreachable record yields the default.
    pub async fn read_or_default(&self) -> UpdateStatus {
        match self.read().await {
            Ok(status) => status.unwrap_or_default(),
            Err(e) => {
                warn!("Could not read update status: {}", e);
                UpdateStatus::default()
            },
        }
    }

    pub async fn write(&self, status: &UpdateStatus) -> Result<(), Error> {
        let value = serde_json::to_string(status)?;
        self.store.set(cache_keys::UPDATE_STATUS, value).await
    }

    pub async fn announce(&self, previous: &UpdateStatus, timestamp: i64) {
        let status = UpdateStatus::started(previous, timestamp);
        if let Err(e) = self.write(&status).await {
            warn!("Could not announce refresh start: {}", e);
        }
    }

    pub async fn record_success(&self, timestamp: i64) {
        let status = UpdateStatus::succeeded(timestamp);
        if let Err(e) = self.write(&status).await {
            error!("Could not record refresh success: {}", e);
        }
    }

    /// Two-phase write: the full failure record first, then a compact
    /// record if that did not land. Neither failure propagates.
    pub async fn record_failure(
        &self,
        previous: &UpdateStatus,
        timestamp: i64,
        message: String,
    ) {
        let status = UpdateStatus::failed(previous, timestamp, message);
        let primary = match self.write(&status).await {
            Ok(()) => return,
            Err(e) => e,
        };
        warn!("Could not record refresh failure: {}", primary);

        let compact = UpdateStatus {
            last_error: Some(String::from("refresh failed")),
            ..status
        };
        if let Err(secondary) = self.write(&compact).await {
            error!(
                "Could not record refresh failure (best effort): {}",
                secondary
            );
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub cache_healthy: bool,
    pub upstream_healthy: bool,
    pub last_update: Option<i64>,
    pub update_status: Option<UpdateStatus>,
    pub timestamp: i64,
}

/// Checks the cache store and the upstream independently.
pub async fn get_health(state: &State) -> HealthReport {
    let cache_check = async {
        timeout(state.config.cache_timeout(), state.store.health_check())
            .await
            .unwrap_or(false)
    };
    let upstream_check = async {
        timeout(state.config.upstream_timeout(), state.source.health_check())
            .await
            .unwrap_or(false)
    };

    let (cache_healthy, upstream_healthy) =
        futures::join!(cache_check, upstream_check);

    let (last_update, update_status) = if cache_healthy {
        let last_update = match state.store.get(cache_keys::LAST_UPDATE).await
        {
            Ok(value) => value.and_then(|v| v.parse::<i64>().ok()),
            Err(e) => {
                warn!("Could not read last update: {}", e);
                None
            },
        };
        let update_status = state.status.read().await.unwrap_or_else(|e| {
            warn!("Could not read update status: {}", e);
            None
        });
        (last_update, update_status)
    } else {
        (None, None)
    };

    HealthReport {
        healthy: cache_healthy && upstream_healthy,
        cache_healthy,
        upstream_healthy,
        last_update,
        update_status,
        timestamp: Utc::now().timestamp_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::test_support::{test_state, test_state_with_store, FailingStore, ScriptedSource};

    #[tokio::test]
    async fn test_read_missing_status() {
        let tracker = UpdateStatusTracker::new(Arc::new(MemoryStore::new()));
        assert_eq!(tracker.read().await.unwrap(), None);
        assert_eq!(tracker.read_or_default().await, UpdateStatus::default());
    }

    #[tokio::test]
    async fn test_corrupt_status_reads_as_none() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(cache_keys::UPDATE_STATUS, String::from("{not json"))
            .await
            .unwrap();
        let tracker = UpdateStatusTracker::new(store);
        assert_eq!(tracker.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_record_failure_on_dead_store_does_not_panic() {
        let tracker = UpdateStatusTracker::new(Arc::new(FailingStore));
        tracker
            .record_failure(&UpdateStatus::default(), 1, "boom".into())
            .await;
        tracker.record_success(2).await;
        assert!(tracker.read().await.is_err());
    }

    #[tokio::test]
    async fn test_health_reports_both_components() {
        let state = test_state(ScriptedSource::with_markets(vec![]));
        state.status.record_success(10).await;

        let report = get_health(&state).await;
        assert!(report.healthy);
        assert!(report.cache_healthy);
        assert!(report.upstream_healthy);
        assert_eq!(report.update_status.unwrap().last_success, 10);
    }

    #[tokio::test]
    async fn test_health_unhealthy_upstream() {
        let source = ScriptedSource::with_markets(vec![]);
        source.set_healthy(false);
        let state = test_state(source);

        let report = get_health(&state).await;
        assert!(!report.healthy);
        assert!(report.cache_healthy);
        assert!(!report.upstream_healthy);
    }

    #[tokio::test]
    async fn test_health_unhealthy_cache() {
        let state = test_state_with_store(
            ScriptedSource::with_markets(vec![]),
            Arc::new(FailingStore),
        );

        let report = get_health(&state).await;
        assert!(!report.healthy);
        assert!(!report.cache_healthy);
        assert_eq!(report.update_status, None);
    }
}
