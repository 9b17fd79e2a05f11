// src/config.rs
use std::env;
use std::time::Duration;

/// New accounts start with this much simulated cash.
pub const STARTING_BALANCE_USD: f64 = 10_000.0;

/// Runtime configuration, read once at startup from the environment.
#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub scylla_node: String,
    pub jwt_secret: String,
    /// Public base URL of this API, used to build verification links.
    pub api_url: String,
    pub coingecko_base: String,
    pub newsdata_base: String,
    pub newsdata_api_key: String,
    pub upstream_timeout: Duration,
    pub prices_ttl: Duration,
    pub market_ttl: Duration,
    pub news_ttl: Duration,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn secs_or(key: &str, default: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl Config {
    pub fn from_env() -> Config {
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4000);
        Config {
            port,
            scylla_node: var_or("SCYLLA_NODE", "127.0.0.1:9042"),
            jwt_secret: var_or("JWT_SECRET", "dev_secret_change_me"),
            api_url: var_or("API_URL", format!("http://localhost:{}", port).as_str()),
            coingecko_base: var_or("COINGECKO_BASE", "https://api.coingecko.com/api/v3"),
            newsdata_base: var_or("NEWSDATA_BASE", "https://newsdata.io/api/1/crypto"),
            newsdata_api_key: var_or("NEWSDATA_API_KEY", ""),
            upstream_timeout: secs_or("UPSTREAM_TIMEOUT_SECS", 10),
            prices_ttl: secs_or("PRICES_TTL_SECS", 60),
            market_ttl: secs_or("MARKET_TTL_SECS", 60),
            news_ttl: secs_or("NEWS_TTL_SECS", 600),
        }
    }
}
