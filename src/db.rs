use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};
use time::OffsetDateTime;

use crate::{changes::ChangeFeed, config::Config, AppResult};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Everything a store component needs, built once at startup and handed to
/// each component's constructor.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
    pub(crate) feed: ChangeFeed,
}

impl Store {
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Store {
        Store { pool, feed }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub async fn connect(config: &Config) -> AppResult<Store> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(config.db_busy_timeout)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    tracing::info!(url = %config.database_url, max_connections = config.db_max_connections, "database ready");

    Ok(Store::new(pool, ChangeFeed::new(config.feed_capacity)))
}

/// A private in-memory database. A single connection is kept alive for the
/// life of the pool, since every new in-memory connection is a new database.
pub async fn in_memory(feed_capacity: usize) -> AppResult<Store> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;

    Ok(Store::new(pool, ChangeFeed::new(feed_capacity)))
}

/// Open a transaction that holds the write lock from its first statement.
///
/// A deferred transaction that reads before it writes cannot upgrade while
/// another connection writes, and fails with `SQLITE_BUSY` instead of waiting
/// out the busy timeout. Read-then-write sequences go through here.
pub(crate) async fn begin_write(pool: &SqlitePool) -> AppResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

pub(crate) fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn from_millis(millis: i64) -> AppResult<OffsetDateTime> {
    Ok(OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)?)
}
