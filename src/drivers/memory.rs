//! In-process cache driver.
//!
//! Values live in a size-bounded moka cache weighted by key plus value
//! length. Conditional writes and counters go through moka's atomic
//! per-key compute, so a check and the write that depends on it can never
//! interleave with another writer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::ops::compute::Op;
use moka::sync::Cache;
use serde::Deserialize;
use tracing::info;

use crate::driver::{Driver, Lifecycle};
use crate::error::{Error, Result};
use crate::features::Features;
use crate::keyspace::Keyspace;
use crate::ttl::Ttl;

pub const NAME: &str = "memory";

/// Longest accepted key.
pub const MAX_KEY_LEN: usize = 65_535;

/// A single entry may use at most this fraction of the capacity.
const ENTRY_DIVISOR: u64 = 1024;

const FEATURES: Features = Features::STORE
    .union(Features::TTL_STORE)
    .union(Features::INSERT)
    .union(Features::UPDATE)
    .union(Features::TTL_INSERT)
    .union(Features::TTL_UPDATE)
    .union(Features::COUNTER)
    .union(Features::TTL_COUNTER)
    .union(Features::EMBEDDED);

/// `[config]` table for the memory driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Capacity in bytes.
    pub size: u64,
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::config("memory: size must be greater than zero"));
        }
        Ok(())
    }

    fn max_entry(&self) -> u64 {
        self.size / ENTRY_DIVISOR
    }
}

/// Registry factory.
pub fn open(options: &toml::Value) -> Result<Box<dyn Driver>> {
    let config: MemoryConfig = options
        .clone()
        .try_into()
        .map_err(|e| Error::config(format!("memory: {e}")))?;
    Ok(Box::new(MemoryDriver::new(config)?))
}

#[derive(Clone)]
enum Data {
    Bytes(Arc<[u8]>),
    Counter(i64),
}

#[derive(Clone)]
struct Slot {
    data: Data,
    expires_at: Option<Instant>,
}

impl Slot {
    fn bytes(value: &[u8], ttl: Option<Ttl>) -> Self {
        Self {
            data: Data::Bytes(Arc::from(value)),
            expires_at: ttl.map(deadline),
        }
    }

    fn counter(value: i64, expires_at: Option<Instant>) -> Self {
        Self {
            data: Data::Counter(value),
            expires_at,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }

    fn len(&self) -> usize {
        match &self.data {
            Data::Bytes(bytes) => bytes.len(),
            Data::Counter(_) => std::mem::size_of::<i64>(),
        }
    }
}

fn deadline(ttl: Ttl) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl.as_duration())
        .unwrap_or_else(|| now + Duration::from_secs(u64::from(u32::MAX)))
}

/// Hands each slot's own deadline to moka.
struct SlotExpiry;

impl Expiry<Vec<u8>, Slot> for SlotExpiry {
    fn expire_after_create(&self, _key: &Vec<u8>, slot: &Slot, created_at: Instant) -> Option<Duration> {
        slot.expires_at.map(|at| at.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &Vec<u8>,
        slot: &Slot,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        slot.expires_at.map(|at| at.saturating_duration_since(updated_at))
    }
}

type Store = Cache<Vec<u8>, Slot>;

/// Which conditional write to perform.
#[derive(Clone, Copy)]
enum Precondition {
    Absent,
    Present,
}

/// In-process, non-persistent driver with TTLs and counters.
pub struct MemoryDriver {
    config: MemoryConfig,
    keys: Keyspace,
    state: Lifecycle<Store>,
}

impl MemoryDriver {
    /// Validate `config` and create a driver in the `Created` state.
    pub fn new(config: MemoryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            keys: Keyspace::default(),
            state: Lifecycle::new(NAME),
        })
    }

    fn check_size(&self, key: &[u8], value_len: usize) -> Result<()> {
        if key.len() > MAX_KEY_LEN {
            return Err(Error::KeyTooLarge);
        }
        let entry = (key.len() + value_len) as u64;
        if entry > self.config.max_entry() {
            return Err(Error::EntryTooLarge);
        }
        Ok(())
    }

    fn put(&self, key: Vec<u8>, slot: Slot) -> Result<()> {
        self.state.handle()?.insert(key, slot);
        Ok(())
    }

    fn live(&self, key: &[u8]) -> Result<Option<Slot>> {
        let cache = self.state.handle()?;
        Ok(cache.get(key).filter(|slot| slot.is_live(Instant::now())))
    }

    fn write_if(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Ttl>,
        precondition: Precondition,
    ) -> Result<bool> {
        self.check_size(key, value.len())?;
        let cache = self.state.handle()?;

        let mut written = false;
        cache
            .entry(self.keys.store_key(key))
            .and_compute_with(|entry| {
                let present = entry.is_some_and(|e| e.value().is_live(Instant::now()));
                let allowed = match precondition {
                    Precondition::Absent => !present,
                    Precondition::Present => present,
                };
                if allowed {
                    written = true;
                    Op::Put(Slot::bytes(value, ttl))
                } else {
                    Op::Nop
                }
            });
        Ok(written)
    }

    fn add(&self, key: &[u8], incr: i64, ttl: Option<Ttl>) -> Result<i64> {
        let cache = self.state.handle()?;

        let mut outcome = Ok(0);
        cache
            .entry(self.keys.counter_key(key))
            .and_compute_with(|entry| {
                let now = Instant::now();
                let (current, expires_at) = match entry.map(|e| e.into_value()) {
                    Some(Slot {
                        data: Data::Counter(n),
                        expires_at,
                    }) if expires_at.is_none_or(|at| now < at) => (n, expires_at),
                    _ => (0, None),
                };
                match current.checked_add(incr) {
                    Some(next) => {
                        outcome = Ok(next);
                        let expires_at = ttl.map(deadline).or(expires_at);
                        Op::Put(Slot::counter(next, expires_at))
                    },
                    None => {
                        outcome = Err(Error::backend(NAME, "counter increment would overflow"));
                        Op::Nop
                    },
                }
            });
        outcome
    }
}

#[async_trait]
impl Driver for MemoryDriver {
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

        let cache: Store = Cache::builder()
            .max_capacity(self.config.size)
            .weigher(|key: &Vec<u8>, slot: &Slot| -> u32 {
                u32::try_from(key.len() + slot.len()).unwrap_or(u32::MAX)
            })
            .expire_after(SlotExpiry)
            .build();

        if self.state.install(cache).is_ok() {
            info!(driver = NAME, capacity = self.config.size, "Driver started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _transition = self.state.transition().await;
        if let Some(cache) = self.state.take() {
            cache.invalidate_all();
            info!(driver = NAME, "Driver stopped");
        }
        Ok(())
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_size(key, value.len())?;
        self.put(self.keys.store_key(key), Slot::bytes(value, None))
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        match self.live(&self.keys.store_key(key))? {
            Some(Slot {
                data: Data::Bytes(bytes),
                ..
            }) => Ok(bytes.to_vec()),
            _ => Err(Error::NotFound),
        }
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.state.handle()?.invalidate(&self.keys.store_key(key));
        Ok(())
    }

    async fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl_secs: i64) -> Result<()> {
        let ttl = Ttl::from_secs(ttl_secs)?;
        self.check_size(key, value.len())?;
        self.put(self.keys.store_key(key), Slot::bytes(value, Some(ttl)))
    }

    async fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.write_if(key, value, None, Precondition::Absent)
    }

    async fn update(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.write_if(key, value, None, Precondition::Present)
    }

    async fn insert_with_ttl(&self, key: &[u8], value: &[u8], ttl_secs: i64) -> Result<bool> {
        let ttl = Ttl::from_secs(ttl_secs)?;
        self.write_if(key, value, Some(ttl), Precondition::Absent)
    }

    async fn update_with_ttl(&self, key: &[u8], value: &[u8], ttl_secs: i64) -> Result<bool> {
        let ttl = Ttl::from_secs(ttl_secs)?;
        self.write_if(key, value, Some(ttl), Precondition::Present)
    }

    async fn set_counter(&self, key: &[u8], value: i64) -> Result<()> {
        self.check_size(key, std::mem::size_of::<i64>())?;
        self.put(self.keys.counter_key(key), Slot::counter(value, None))
    }

    async fn set_counter_with_ttl(&self, key: &[u8], value: i64, ttl_secs: i64) -> Result<()> {
        let ttl = Ttl::from_secs(ttl_secs)?;
        self.check_size(key, std::mem::size_of::<i64>())?;
        self.put(
            self.keys.counter_key(key),
            Slot::counter(value, Some(deadline(ttl))),
        )
    }

    async fn get_counter(&self, key: &[u8]) -> Result<i64> {
        match self.live(&self.keys.counter_key(key))? {
            Some(Slot {
                data: Data::Counter(n),
                ..
            }) => Ok(n),
            _ => Ok(0),
        }
    }

    async fn delete_counter(&self, key: &[u8]) -> Result<()> {
        self.state.handle()?.invalidate(&self.keys.counter_key(key));
        Ok(())
    }

    async fn increase_counter(&self, key: &[u8], incr: i64) -> Result<i64> {
        self.check_size(key, std::mem::size_of::<i64>())?;
        self.add(key, incr, None)
    }

    async fn increase_counter_with_ttl(&self, key: &[u8], incr: i64, ttl_secs: i64) -> Result<i64> {
        let ttl = Ttl::from_secs(ttl_secs)?;
        self.check_size(key, std::mem::size_of::<i64>())?;
        self.add(key, incr, Some(ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn started(size: u64) -> MemoryDriver {
        let driver = MemoryDriver::new(MemoryConfig { size }).unwrap();
        driver.start().await.unwrap();
        driver
    }

    #[test]
    fn test_config_rejects_zero_size() {
        let err = MemoryDriver::new(MemoryConfig { size: 0 }).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_config_rejects_unknown_option() {
        let options: toml::Value = toml::from_str("size = 1024\nshards = 4").unwrap();
        let err = open(&options).err().unwrap();
        assert!(err.to_string().contains("shards"), "{err}");
    }

    #[tokio::test]
    async fn test_requires_start() {
        let driver = MemoryDriver::new(MemoryConfig { size: 1 << 20 }).unwrap();
        let err = driver.get(b"k").await.unwrap_err();
        assert!(matches!(err, Error::NotRunning { driver: NAME }));

        driver.start().await.unwrap();
        driver.stop().await.unwrap();
        assert!(driver.set(b"k", b"v").await.is_err());
        assert!(driver.start().await.is_err());
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let driver = started(1 << 20).await;
        driver.set(b"user", b"alice").await.unwrap();
        assert_eq!(driver.get(b"user").await.unwrap(), b"alice");

        driver.delete(b"user").await.unwrap();
        assert!(driver.get(b"user").await.unwrap_err().is_not_found());
        driver.delete(b"user").await.unwrap();
    }

    #[tokio::test]
    async fn test_size_limits() {
        let driver = started(1 << 20).await;
        let key = vec![b'k'; MAX_KEY_LEN + 1];
        assert!(matches!(
            driver.set(&key, b"v").await.unwrap_err(),
            Error::KeyTooLarge
        ));

        // 1 MiB / 1024 leaves 1 KiB per entry.
        let value = vec![0u8; 1024];
        assert!(matches!(
            driver.set(b"k", &value).await.unwrap_err(),
            Error::EntryTooLarge
        ));
        driver.set(b"k", &value[..1000]).await.unwrap();
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let driver = started(1 << 20).await;
        driver.set_with_ttl(b"session", b"token", 1).await.unwrap();
        assert_eq!(driver.get(b"session").await.unwrap(), b"token");

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(driver.get(b"session").await.unwrap_err().is_not_found());

        // Expired counts as absent for insert.
        assert!(driver.insert(b"session", b"fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_clears_ttl() {
        let driver = started(1 << 20).await;
        driver.set_with_ttl(b"k", b"v1", 1).await.unwrap();
        driver.set(b"k", b"v2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(driver.get(b"k").await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_conditional_writes() {
        let driver = started(1 << 20).await;
        assert!(!driver.update(b"k", b"v0").await.unwrap());
        assert!(driver.insert(b"k", b"v1").await.unwrap());
        assert!(!driver.insert(b"k", b"v2").await.unwrap());
        assert_eq!(driver.get(b"k").await.unwrap(), b"v1");
        assert!(driver.update(b"k", b"v3").await.unwrap());
        assert_eq!(driver.get(b"k").await.unwrap(), b"v3");
    }

    #[tokio::test]
    async fn test_counters() {
        let driver = started(1 << 20).await;
        assert_eq!(driver.get_counter(b"hits").await.unwrap(), 0);
        assert_eq!(driver.increase_counter(b"hits", 5).await.unwrap(), 5);
        assert_eq!(driver.increase_counter(b"hits", -7).await.unwrap(), -2);
        assert_eq!(driver.get_counter(b"hits").await.unwrap(), -2);

        // Counters and values with the same caller key do not collide.
        driver.set(b"hits", b"plain").await.unwrap();
        assert_eq!(driver.get_counter(b"hits").await.unwrap(), -2);

        driver.delete_counter(b"hits").await.unwrap();
        assert_eq!(driver.get_counter(b"hits").await.unwrap(), 0);
        assert_eq!(driver.get(b"hits").await.unwrap(), b"plain");
    }

    #[tokio::test]
    async fn test_counter_overflow_leaves_value() {
        let driver = started(1 << 20).await;
        driver.set_counter(b"c", i64::MAX).await.unwrap();
        assert!(driver.increase_counter(b"c", 1).await.is_err());
        assert_eq!(driver.get_counter(b"c").await.unwrap(), i64::MAX);
    }

    #[tokio::test]
    async fn test_counter_ttl_refresh() {
        let driver = started(1 << 20).await;
        assert_eq!(driver.increase_counter_with_ttl(b"rate", 1, 1).await.unwrap(), 1);
        // Plain increments keep the existing expiry.
        assert_eq!(driver.increase_counter(b"rate", 1).await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(driver.get_counter(b"rate").await.unwrap(), 0);
        assert_eq!(driver.increase_counter(b"rate", 3).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_invalid_ttl_writes_nothing() {
        let driver = started(1 << 20).await;
        for ttl in [0, -5] {
            assert!(matches!(
                driver.set_with_ttl(b"k", b"v", ttl).await.unwrap_err(),
                Error::InvalidatedTtl { .. }
            ));
        }
        assert!(driver.get(b"k").await.unwrap_err().is_not_found());
        assert!(driver.increase_counter_with_ttl(b"c", 1, 0).await.is_err());
        assert_eq!(driver.get_counter(b"c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pagination_unsupported() {
        let driver = started(1 << 20).await;
        assert!(driver.next(b"", 10).await.unwrap_err().is_unsupported());
        assert!(!driver.features().contains(Features::NEXT));
    }
}
