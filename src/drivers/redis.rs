//! Networked cache driver backed by Redis.
//!
//! Connections come from a deadpool-redis pool created on `start`. Keys are
//! namespaced as `prefix ++ marker ++ key` so values and counters never
//! share a Redis key.
//!
//! Counter increments with a TTL run in one of two modes:
//!
//! - [`CounterMode::Atomic`] runs `INCRBY` and `EXPIRE` in one Lua script.
//!   A failed increment (e.g. i64 overflow) aborts the script before the
//!   expiry is touched, so either both apply or neither does.
//! - [`CounterMode::Degraded`] sends them as two round trips. A failure in
//!   between leaves the counter incremented with a stale or missing expiry.

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, PoolError, Runtime};
use redis::AsyncCommands;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::driver::{Driver, Lifecycle};
use crate::error::{Error, ErrorKind, Result, Translate};
use crate::features::Features;
use crate::keyspace::Keyspace;
use crate::ttl::Ttl;

pub const NAME: &str = "redis";

const FEATURES: Features = Features::STORE
    .union(Features::TTL_STORE)
    .union(Features::INSERT)
    .union(Features::UPDATE)
    .union(Features::TTL_INSERT)
    .union(Features::TTL_UPDATE)
    .union(Features::COUNTER)
    .union(Features::TTL_COUNTER)
    .union(Features::PERSISTENT)
    .union(Features::STABLE);

/// How `increase_counter_with_ttl` applies the increment and the expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterMode {
    /// One server-side script.
    #[default]
    Atomic,
    /// Two sequential commands; the expiry may be lost on failure.
    Degraded,
}

/// `[config]` table for the Redis driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Server URL, e.g. `redis://127.0.0.1:6379/0`.
    pub url: String,
    /// Prefix for every key this driver writes.
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default)]
    pub counter_mode: CounterMode,
}

fn default_pool_size() -> usize {
    16
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            prefix: String::new(),
            pool_size: default_pool_size(),
            counter_mode: CounterMode::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::config("redis: url cannot be empty"));
        }
        if self.pool_size == 0 {
            return Err(Error::config("redis: pool_size must be greater than zero"));
        }
        Ok(())
    }
}

/// Registry factory.
pub fn open(options: &toml::Value) -> Result<Box<dyn Driver>> {
    let config: RedisConfig = options
        .clone()
        .try_into()
        .map_err(|e| Error::config(format!("redis: {e}")))?;
    Ok(Box::new(RedisDriver::new(config)?))
}

impl Translate for redis::RedisError {
    const DRIVER: &'static str = NAME;

    fn classify(&self) -> Option<ErrorKind> {
        // proto-max-bulk-len rejections
        if self.kind() == redis::ErrorKind::ResponseError
            && self.to_string().contains("exceeds maximum allowed size")
        {
            return Some(ErrorKind::EntryTooLarge);
        }
        None
    }
}

impl Translate for PoolError {
    const DRIVER: &'static str = NAME;

    fn classify(&self) -> Option<ErrorKind> {
        match self {
            PoolError::Backend(err) => err.classify(),
            _ => None,
        }
    }
}

/// `INCRBY` then `EXPIRE`. `redis.call` raises on error, so an increment
/// that fails never refreshes the expiry.
const INCR_WITH_TTL: &str = r"
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
redis.call('EXPIRE', KEYS[1], ARGV[2])
return value
";

/// Conditional flag for `SET`.
#[derive(Clone, Copy)]
enum Precondition {
    /// `NX`
    Absent,
    /// `XX`
    Present,
}

impl Precondition {
    fn flag(self) -> &'static str {
        match self {
            Self::Absent => "NX",
            Self::Present => "XX",
        }
    }
}

/// Pooled Redis driver with conditional writes and counters.
pub struct RedisDriver {
    config: RedisConfig,
    keys: Keyspace,
    incr_with_ttl: redis::Script,
    state: Lifecycle<Pool>,
}

impl RedisDriver {
    /// Validate `config` and create a driver in the `Created` state.
    pub fn new(config: RedisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            keys: Keyspace::new(config.prefix.as_bytes()),
            incr_with_ttl: redis::Script::new(INCR_WITH_TTL),
            config,
            state: Lifecycle::new(NAME),
        })
    }

    async fn conn(&self) -> Result<Connection> {
        let pool = self.state.handle()?;
        pool.get().await.map_err(Error::translate)
    }

    async fn write_if(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Ttl>,
        precondition: Precondition,
    ) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.keys.store_key(key))
            .arg(value)
            .arg(precondition.flag());
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs());
        }

        let mut conn = self.conn().await?;
        // Nil when the precondition failed, "OK" otherwise.
        let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(Error::translate)?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl Driver for RedisDriver {
    fn name(&self) -> &'static str {
        NAME
    }

    fn features(&self) -> Features {
        FEATURES
    }

    async fn start(&self) -> Result<()> {
        let _transition = self.state.transition().await;
        if !self.state.needs_start()? {
            return Ok(());
        }

        debug!(
            driver = NAME,
            pool_size = self.config.pool_size,
            "Creating connection pool"
        );
        let pool = PoolConfig::from_url(&self.config.url)
            .builder()
            .map_err(|e| Error::config(format!("redis: {e}")))?
            .max_size(self.config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| Error::backend(NAME, e))?;

        // Fail start, not the first operation, on an unreachable server.
        let mut conn = pool.get().await.map_err(Error::translate)?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Error::translate)?;
        drop(conn);

        if self.state.install(pool).is_ok() {
            if self.config.counter_mode == CounterMode::Degraded {
                warn!(
                    driver = NAME,
                    "Counter mode is degraded: a TTL increment is two round trips and may lose its expiry"
                );
            }
            info!(driver = NAME, counter_mode = ?self.config.counter_mode, "Driver started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _transition = self.state.transition().await;
        if let Some(pool) = self.state.take() {
            pool.close();
            info!(driver = NAME, "Driver stopped");
        }
        Ok(())
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(self.keys.store_key(key), value)
            .await
            .map_err(Error::translate)
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn
            .get(self.keys.store_key(key))
            .await
            .map_err(Error::translate)?;
        value.ok_or(Error::NotFound)
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(self.keys.store_key(key))
            .await
            .map_err(Error::translate)
    }

    async fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl_secs: i64) -> Result<()> {
        let ttl = Ttl::from_secs(ttl_secs)?;
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(self.keys.store_key(key), value, ttl.as_secs())
            .await
            .map_err(Error::translate)
    }

    async fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.write_if(key, value, None, Precondition::Absent).await
    }

    async fn update(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.write_if(key, value, None, Precondition::Present).await
    }

    async fn insert_with_ttl(&self, key: &[u8], value: &[u8], ttl_secs: i64) -> Result<bool> {
        let ttl = Ttl::from_secs(ttl_secs)?;
        self.write_if(key, value, Some(ttl), Precondition::Absent).await
    }

    async fn update_with_ttl(&self, key: &[u8], value: &[u8], ttl_secs: i64) -> Result<bool> {
        let ttl = Ttl::from_secs(ttl_secs)?;
        self.write_if(key, value, Some(ttl), Precondition::Present).await
    }

    async fn set_counter(&self, key: &[u8], value: i64) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(self.keys.counter_key(key), value)
            .await
            .map_err(Error::translate)
    }

    async fn set_counter_with_ttl(&self, key: &[u8], value: i64, ttl_secs: i64) -> Result<()> {
        let ttl = Ttl::from_secs(ttl_secs)?;
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(self.keys.counter_key(key), value, ttl.as_secs())
            .await
            .map_err(Error::translate)
    }

    async fn get_counter(&self, key: &[u8]) -> Result<i64> {
        let mut conn = self.conn().await?;
        let value: Option<i64> = conn
            .get(self.keys.counter_key(key))
            .await
            .map_err(Error::translate)?;
        Ok(value.unwrap_or(0))
    }

    async fn delete_counter(&self, key: &[u8]) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(self.keys.counter_key(key))
            .await
            .map_err(Error::translate)
    }

    async fn increase_counter(&self, key: &[u8], incr: i64) -> Result<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = conn
            .incr(self.keys.counter_key(key), incr)
            .await
            .map_err(Error::translate)?;
        Ok(value)
    }

    async fn increase_counter_with_ttl(&self, key: &[u8], incr: i64, ttl_secs: i64) -> Result<i64> {
        let ttl = Ttl::from_secs(ttl_secs)?;
        let key = self.keys.counter_key(key);
        let mut conn = self.conn().await?;

        match self.config.counter_mode {
            CounterMode::Atomic => {
                let value: i64 = self
                    .incr_with_ttl
                    .key(&key)
                    .arg(incr)
                    .arg(ttl.as_secs())
                    .invoke_async(&mut conn)
                    .await
                    .map_err(Error::translate)?;
                Ok(value)
            },
            CounterMode::Degraded => {
                let value: i64 = conn.incr(&key, incr).await.map_err(Error::translate)?;
                let seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
                conn.expire::<_, ()>(&key, seconds)
                    .await
                    .map_err(Error::translate)?;
                Ok(value)
            },
        }
    }
}
