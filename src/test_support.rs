use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    cache::{CacheStore, MemoryStore, Pipeline},
    configuration::{AppState, Config, State},
    error::Error,
    provider::MarketSource,
    types::UpstreamMarket,
};

struct Script {
    healthy: AtomicBool,
    fail_fetch: AtomicBool,
    fetches: AtomicU32,
    delay: Mutex<Duration>,
    markets: Mutex<Vec<UpstreamMarket>>,
}

/// Upstream double whose answers tests can change between calls.
#[derive(Clone)]
pub struct ScriptedSource {
    script: Arc<Script>,
}

impl ScriptedSource {
    pub fn with_markets(markets: Vec<UpstreamMarket>) -> Self {
        Self {
            script: Arc::new(Script {
                healthy: AtomicBool::new(true),
                fail_fetch: AtomicBool::new(false),
                fetches: AtomicU32::new(0),
                delay: Mutex::new(Duration::ZERO),
                markets: Mutex::new(markets),
            }),
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.script.delay.lock().unwrap() = delay;
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.script.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.script.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> u32 {
        self.script.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketSource for ScriptedSource {
    async fn health_check(&self) -> bool {
        self.script.healthy.load(Ordering::SeqCst)
    }

    async fn get_all_market_data(&self) -> Result<Vec<UpstreamMarket>, Error> {
        self.script.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.script.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.script.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::UpstreamUnavailable(String::from(
                "connection refused",
            )));
        }

        Ok(self.script.markets.lock().unwrap().clone())
    }
}

/// Store whose every call fails, standing in for an unreachable Redis.
pub struct FailingStore;

fn down() -> Error {
    Error::CacheUnavailable(String::from("connection refused"))
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, Error> {
        Err(down())
    }

    async fn get_all(&self, _prefix: &str) -> Result<Vec<String>, Error> {
        Err(down())
    }

    async fn set(&self, _key: &str, _value: String) -> Result<(), Error> {
        Err(down())
    }

    async fn set_with_ttl(
        &self,
        _key: &str,
        _value: String,
        _ttl: Duration,
    ) -> Result<(), Error> {
        Err(down())
    }

    async fn set_if_absent(
        &self,
        _key: &str,
        _value: String,
        _ttl: Duration,
    ) -> Result<bool, Error> {
        Err(down())
    }

    async fn delete_if_equals(&self, _key: &str, _value: &str) -> Result<bool, Error> {
        Err(down())
    }

    async fn execute(&self, _pipeline: Pipeline) -> Result<(), Error> {
        Err(down())
    }

    async fn health_check(&self) -> bool {
        false
    }

    async fn clear(&self, _prefix: &str) -> Result<usize, Error> {
        Err(down())
    }
}

pub fn test_config() -> Config {
    Config {
        cron_secret: String::from("test-secret"),
        refresh_wait_attempts: 50,
        refresh_wait_interval_ms: 20,
        ..Config::default()
    }
}

pub fn test_state(source: ScriptedSource) -> AppState<State> {
    test_state_with_store(source, Arc::new(MemoryStore::new()))
}

pub fn test_state_with_store(
    source: ScriptedSource,
    store: Arc<dyn CacheStore>,
) -> AppState<State> {
    AppState::new(State::new(test_config(), store, Arc::new(source)))
}

pub fn upstream_market(symbol: &str, quote_volume: f64) -> UpstreamMarket {
    UpstreamMarket {
        symbol: Some(symbol.to_owned()),
        display_name: Some(symbol.trim_end_matches("-PERP").to_owned()),
        price: Some(100.0),
        price_change_24h: Some(2.5),
        quote_volume: Some(quote_volume),
        base_volume: Some(quote_volume / 100.0),
        market_index: Some(quote_volume as i64),
        market_type: Some(String::from("perp")),
        open_interest: Some(1_000.0),
        last_updated: Some(1),
    }
}
