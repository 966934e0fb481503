use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::Context;

/// Runtime settings, read from the environment (and `.env`, if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub db_max_connections: u32,
    /// How long a writer waits on another connection's write lock.
    pub db_busy_timeout: Duration,
    /// Buffered change events per subscriber before it starts lagging.
    pub feed_capacity: usize,
    /// Messages embedded in each room preview.
    pub preview_messages: usize,
    pub default_window: usize,
    pub max_window: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://chat.db".to_owned(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            db_max_connections: 16,
            db_busy_timeout: Duration::from_secs(5),
            feed_capacity: 256,
            preview_messages: 20,
            default_window: 50,
            max_window: 200,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        let config = Config {
            database_url: dotenv::var("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_addr: var_or("BIND_ADDR", defaults.bind_addr)?,
            db_max_connections: var_or("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            db_busy_timeout: Duration::from_millis(var_or(
                "DB_BUSY_TIMEOUT_MS",
                defaults.db_busy_timeout.as_millis() as u64,
            )?),
            feed_capacity: var_or("FEED_CAPACITY", defaults.feed_capacity)?,
            preview_messages: var_or("PREVIEW_MESSAGES", defaults.preview_messages)?,
            default_window: var_or("DEFAULT_WINDOW", defaults.default_window)?,
            max_window: var_or("MAX_WINDOW", defaults.max_window)?,
        };

        anyhow::ensure!(config.feed_capacity > 0, "FEED_CAPACITY must be positive");
        anyhow::ensure!(
            config.default_window <= config.max_window,
            "DEFAULT_WINDOW ({}) exceeds MAX_WINDOW ({})",
            config.default_window,
            config.max_window
        );

        Ok(config)
    }

    /// Clamp a requested window size, falling back to the default.
    pub fn window(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_window).min(self.max_window)
    }
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(key) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("invalid {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}
