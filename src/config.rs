use std::str::FromStr;
use std::time::Duration;

/// Which store backs the aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    /// Process-local store for single-node and development use.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("METRICS_STORE must be 'redis' or 'memory', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub store: StoreBackend,
    /// Budget for a single store read. Set via METRICS_READ_TIMEOUT_MS.
    pub read_timeout_ms: u64,
    /// Budget for a write pipeline. Set via METRICS_WRITE_TIMEOUT_MS.
    pub write_timeout_ms: u64,
    pub cache_ttl_secs: u64,
    /// Events waiting for a writer beyond this are dropped.
    pub queue_capacity: usize,
    pub workers: usize,
    /// Models kept per provider index.
    pub provider_top_n: usize,
    pub dashboard_origin: String,
}

impl Config {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8090,
            redis_url: "redis://127.0.0.1:6379".into(),
            store: StoreBackend::Redis,
            read_timeout_ms: 500,
            write_timeout_ms: 2000,
            cache_ttl_secs: crate::cache::DEFAULT_CACHE_TTL_SECS,
            queue_capacity: 10_000,
            workers: 16,
            provider_top_n: 50,
            dashboard_origin: "http://localhost:3000".into(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();
    let store = match std::env::var("METRICS_STORE") {
        Ok(v) if !v.trim().is_empty() => v.parse()?,
        _ => defaults.store,
    };

    Ok(Config {
        port: env_or("METRICS_PORT", defaults.port),
        redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
        store,
        read_timeout_ms: env_or("METRICS_READ_TIMEOUT_MS", defaults.read_timeout_ms),
        write_timeout_ms: env_or("METRICS_WRITE_TIMEOUT_MS", defaults.write_timeout_ms),
        cache_ttl_secs: env_or("METRICS_CACHE_TTL_SECS", defaults.cache_ttl_secs),
        queue_capacity: env_or("METRICS_QUEUE_CAPACITY", defaults.queue_capacity),
        workers: env_or("METRICS_WORKERS", defaults.workers),
        provider_top_n: env_or("METRICS_PROVIDER_TOP_N", defaults.provider_top_n),
        dashboard_origin: std::env::var("DASHBOARD_ORIGIN").unwrap_or(defaults.dashboard_origin),
    })
}
