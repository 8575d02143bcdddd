use std::{
    env, fmt, fs, ops::Deref, path::Path, str::FromStr, sync::Arc,
    time::Duration,
};

use url::Url;

use crate::{
    cache::{CacheStore, MemoryStore},
    error::Error,
    handler::status_tracker::UpdateStatusTracker,
    provider::{HttpMarketSource, MarketSource, RedisStore},
};

#[derive(Debug)]
pub struct AppState<T>(Arc<T>);

impl<T> AppState<T> {
    pub fn new(state: T) -> AppState<T> {
        AppState(Arc::new(state))
    }
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> AppState<T> {
        AppState(Arc::clone(&self.0))
    }
}

impl<T> Deref for AppState<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Arc<T> {
        &self.0
    }
}

pub struct State {
    pub config: Config,
    pub store: Arc<dyn CacheStore>,
    pub source: Arc<dyn MarketSource>,
    pub status: UpdateStatusTracker,
}

impl State {
    pub fn new(
        config: Config,
        store: Arc<dyn CacheStore>,
        source: Arc<dyn MarketSource>,
    ) -> State {
        let status = UpdateStatusTracker::new(store.clone());
        Self {
            config,
            store,
            source,
            status,
        }
    }

    /// Connects the configured cache backend and the upstream client.
    pub async fn connect(config: Config) -> Result<State, Error> {
        let store: Arc<dyn CacheStore> = match config.cache_backend {
            CacheBackend::Redis => Arc::new(
                RedisStore::connect(&config.redis_url, config.cache_timeout())
                    .await?,
            ),
            CacheBackend::Memory => Arc::new(MemoryStore::new()),
        };
        let source: Arc<dyn MarketSource> =
            Arc::new(HttpMarketSource::new(config.clone())?);

        Ok(State::new(config, store, source))
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Staging,
    Development,
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(value: &str) -> Result<Environment, Error> {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "staging" | "preview" => Ok(Environment::Staging),
            "development" | "dev" | "local" => Ok(Environment::Development),
            other => Err(Error::ConfigurationError(format!(
                "unknown ENVIRONMENT {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

impl FromStr for CacheBackend {
    type Err = Error;

    fn from_str(value: &str) -> Result<CacheBackend, Error> {
        match value.trim().to_lowercase().as_str() {
            "redis" => Ok(CacheBackend::Redis),
            "memory" => Ok(CacheBackend::Memory),
            other => Err(Error::ConfigurationError(format!(
                "unknown CACHE_BACKEND {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub environment: Environment,
    pub cache_backend: CacheBackend,
    pub redis_url: String,
    pub upstream_host: String,
    pub upstream_health_path: String,
    pub upstream_markets_path: String,
    pub upstream_timeout_secs: u64,
    pub cache_timeout_secs: u64,
    pub refresh_interval_secs: u64,
    pub cache_ttl_buffer_secs: u64,
    pub stale_threshold_secs: u64,
    pub cron_secret: String,
    pub enable_scheduler: bool,
    pub refresh_lock_ttl_secs: u64,
    pub refresh_wait_attempts: u32,
    pub refresh_wait_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_host: String::from("127.0.0.1"),
            port: 8080,
            allowed_origins: vec![String::from("*")],
            environment: Environment::Development,
            cache_backend: CacheBackend::Memory,
            redis_url: String::from("redis://127.0.0.1/"),
            upstream_host: String::from("http://127.0.0.1:3000"),
            upstream_health_path: String::from("health"),
            upstream_markets_path: String::from("markets"),
            upstream_timeout_secs: 10,
            cache_timeout_secs: 5,
            refresh_interval_secs: 60,
            cache_ttl_buffer_secs: 30,
            stale_threshold_secs: 300,
            cron_secret: String::new(),
            enable_scheduler: false,
            refresh_lock_ttl_secs: 30,
            refresh_wait_attempts: 10,
            refresh_wait_interval_ms: 200,
        }
    }
}

impl Config {
    /// TTL of every data key: one refresh interval plus the safety buffer.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs + self.cache_ttl_buffer_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_timeout_secs)
    }

    pub fn refresh_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_lock_ttl_secs)
    }

    pub fn refresh_wait_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_wait_interval_ms)
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn get_upstream_health_url(&self) -> Result<Url, Error> {
        self.get_upstream_url(&self.upstream_health_path)
    }

    pub fn get_upstream_markets_url(&self) -> Result<Url, Error> {
        self.get_upstream_url(&self.upstream_markets_path)
    }

    fn get_upstream_url(&self, path: &str) -> Result<Url, Error> {
        let mut base = Url::parse(&self.upstream_host)?;
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        Ok(base.join(path.trim_start_matches('/'))?)
    }

    /// A missed refresh must not evict data, two missed refreshes must.
    pub fn validate(&self) -> Result<(), Error> {
        if self.refresh_interval_secs == 0 {
            return Err(Error::ConfigurationError(String::from(
                "REFRESH_INTERVAL_SECS must be positive",
            )));
        }

        if self.cache_ttl_buffer_secs == 0
            || self.cache_ttl_buffer_secs >= self.refresh_interval_secs
        {
            return Err(Error::ConfigurationError(format!(
                "CACHE_TTL_BUFFER_SECS must be between 1 and {}",
                self.refresh_interval_secs - 1
            )));
        }

        Url::parse(&self.upstream_host)?;

        if self.cron_secret.is_empty() && self.is_production() {
            return Err(Error::ConfigurationError(String::from(
                "CRON_SECRET is required in production",
            )));
        }

        Ok(())
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, Error>
where
    T: FromStr,
    Error: From<T::Err>,
{
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().parse()?),
        _ => Ok(default),
    }
}

pub fn get_configuration() -> Result<Config, Error> {
    let defaults = Config::default();

    let upstream_host = env::var("UPSTREAM_HOST")?;
    let allowed_origins = env::var("ALLOWED_ORIGINS")
        .unwrap_or_else(|_| String::from("*"))
        .split(',')
        .map(|item| item.trim().to_owned())
        .filter(|item| !item.is_empty())
        .collect::<Vec<String>>();

    let config = Config {
        server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
        port: env_or("PORT", defaults.port)?,
        allowed_origins,
        environment: env_or("ENVIRONMENT", defaults.environment)?,
        cache_backend: env_or("CACHE_BACKEND", CacheBackend::Redis)?,
        redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
        upstream_host,
        upstream_health_path: env::var("UPSTREAM_HEALTH_PATH")
            .unwrap_or(defaults.upstream_health_path),
        upstream_markets_path: env::var("UPSTREAM_MARKETS_PATH")
            .unwrap_or(defaults.upstream_markets_path),
        upstream_timeout_secs: env_or(
            "UPSTREAM_TIMEOUT_SECS",
            defaults.upstream_timeout_secs,
        )?,
        cache_timeout_secs: env_or(
            "CACHE_TIMEOUT_SECS",
            defaults.cache_timeout_secs,
        )?,
        refresh_interval_secs: env_or(
            "REFRESH_INTERVAL_SECS",
            defaults.refresh_interval_secs,
        )?,
        cache_ttl_buffer_secs: env_or(
            "CACHE_TTL_BUFFER_SECS",
            defaults.cache_ttl_buffer_secs,
        )?,
        stale_threshold_secs: env_or(
            "STALE_THRESHOLD_SECS",
            defaults.stale_threshold_secs,
        )?,
        cron_secret: env::var("CRON_SECRET").unwrap_or_default(),
        enable_scheduler: env_or(
            "ENABLE_SCHEDULER",
            defaults.enable_scheduler,
        )?,
        refresh_lock_ttl_secs: env_or(
            "REFRESH_LOCK_TTL_SECS",
            defaults.refresh_lock_ttl_secs,
        )?,
        refresh_wait_attempts: env_or(
            "REFRESH_WAIT_ATTEMPTS",
            defaults.refresh_wait_attempts,
        )?,
        refresh_wait_interval_ms: env_or(
            "REFRESH_WAIT_INTERVAL_MS",
            defaults.refresh_wait_interval_ms,
        )?,
    };

    config.validate()?;

    Ok(config)
}

/// Exports the `.env` file next to the manifest into the process
/// environment. Variables already set in the environment win.
pub fn set_configuration() -> Result<(), Error> {
    let config_file: &str = ".env";
    let directory = env!("CARGO_MANIFEST_DIR");
    let path = format!("{}/{}", directory, config_file);

    if !Path::new(&path).exists() {
        return Ok(());
    }

    let config_string = fs::read_to_string(path)?;
    for (key, value) in parse_config_string(&config_string) {
        if env::var(key).is_err() {
            env::set_var(key, value);
        }
    }

    Ok(())
}

fn parse_config_string(config: &str) -> Vec<(&str, &str)> {
    config
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"')))
        .collect()
}
