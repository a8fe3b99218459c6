//! Log-structured embedded driver backed by sled.
//!
//! Each stored value carries an 8-byte big-endian header with its expiry as
//! Unix milliseconds (`0` = never). Expired values are hidden from reads
//! and pagination immediately; a background sweep removes them from the
//! tree in bounded batches.

use std::ops::Bound;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use sled::IVec;
use tracing::{debug, info};

use crate::driver::{Driver, Lifecycle};
use crate::error::{Error, ErrorKind, Result, Translate};
use crate::features::Features;
use crate::maintenance::{self, ErrorSink, MaintenanceTask, Reclaim, Reclaimer, Schedule};
use crate::pagination::{self, Direction, Limit};
use crate::record::Page;
use crate::ttl::{self, Ttl};

pub const NAME: &str = "sled";

const HEADER_LEN: usize = 8;
const NO_EXPIRY: u64 = 0;

const FEATURES: Features = Features::STORE
    .union(Features::TTL_STORE)
    .union(Features::INSERT)
    .union(Features::UPDATE)
    .union(Features::TTL_INSERT)
    .union(Features::TTL_UPDATE)
    .union(Features::NEXT)
    .union(Features::PREV)
    .union(Features::PERSISTENT)
    .union(Features::EMBEDDED);

/// `[config]` table for the sled driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SledConfig {
    /// Database directory.
    pub path: PathBuf,
    /// Tree holding the records.
    #[serde(default = "default_tree")]
    pub tree: String,
    /// Time between expired-entry sweeps.
    #[serde(with = "humantime_serde", default = "default_gc_interval")]
    pub gc_interval: Duration,
    /// Entries removed per sweep round.
    #[serde(default = "default_gc_batch_size")]
    pub gc_batch_size: usize,
    /// Sweep rounds allowed per tick.
    #[serde(default = "default_gc_max_rounds")]
    pub gc_max_rounds: usize,
}

fn default_tree() -> String {
    "kv".to_string()
}

fn default_gc_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_gc_batch_size() -> usize {
    1024
}

fn default_gc_max_rounds() -> usize {
    16
}

impl SledConfig {
    /// Config for `path` with every other option at its default.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tree: default_tree(),
            gc_interval: default_gc_interval(),
            gc_batch_size: default_gc_batch_size(),
            gc_max_rounds: default_gc_max_rounds(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::config("sled: path cannot be empty"));
        }
        if self.tree.is_empty() {
            return Err(Error::config("sled: tree cannot be empty"));
        }
        if self.gc_interval.is_zero() {
            return Err(Error::config("sled: gc_interval must be positive"));
        }
        if self.gc_batch_size == 0 || self.gc_max_rounds == 0 {
            return Err(Error::config(
                "sled: gc_batch_size and gc_max_rounds must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Registry factory.
pub fn open(options: &toml::Value) -> Result<Box<dyn Driver>> {
    let config: SledConfig = options
        .clone()
        .try_into()
        .map_err(|e| Error::config(format!("sled: {e}")))?;
    Ok(Box::new(SledDriver::new(config)?))
}

impl Translate for sled::Error {
    const DRIVER: &'static str = NAME;

    fn classify(&self) -> Option<ErrorKind> {
        match self {
            sled::Error::CollectionNotFound(_) => Some(ErrorKind::NotFound),
            _ => None,
        }
    }
}

/// Stored value with its expiry header split off.
struct Envelope<'a> {
    expires_at: u64,
    value: &'a [u8],
}

impl<'a> Envelope<'a> {
    fn decode(raw: &'a [u8]) -> Result<Self> {
        if raw.len() < HEADER_LEN {
            return Err(Error::backend(NAME, "stored value is missing its expiry header"));
        }
        let (header, value) = raw.split_at(HEADER_LEN);
        let mut bytes = [0u8; HEADER_LEN];
        bytes.copy_from_slice(header);
        Ok(Self {
            expires_at: u64::from_be_bytes(bytes),
            value,
        })
    }

    fn encode(value: &[u8], expires_at: u64) -> Vec<u8> {
        let mut raw = Vec::with_capacity(HEADER_LEN + value.len());
        raw.extend_from_slice(&expires_at.to_be_bytes());
        raw.extend_from_slice(value);
        raw
    }

    fn is_live(&self, now: u64) -> bool {
        self.expires_at == NO_EXPIRY || now < self.expires_at
    }
}

fn expiry(ttl: Option<Ttl>) -> u64 {
    ttl.map_or(NO_EXPIRY, |ttl| ttl.deadline_from(ttl::unix_millis()))
}

#[derive(Clone, Copy)]
enum Precondition {
    Absent,
    Present,
}

/// Compare-and-swap loop for `insert`/`update`. An expired value counts as
/// absent.
fn write_if(
    tree: &sled::Tree,
    key: &[u8],
    value: &[u8],
    expires_at: u64,
    precondition: Precondition,
) -> Result<bool> {
    let sealed = Envelope::encode(value, expires_at);
    loop {
        let current = tree.get(key).map_err(Error::translate)?;
        let present = match &current {
            Some(raw) => Envelope::decode(raw)?.is_live(ttl::unix_millis()),
            None => false,
        };
        let allowed = match precondition {
            Precondition::Absent => !present,
            Precondition::Present => present,
        };
        if !allowed {
            return Ok(false);
        }

        let swapped = tree
            .compare_and_swap(key, current.as_ref(), Some(sealed.clone()))
            .map_err(Error::translate)?;
        if swapped.is_ok() {
            return Ok(true);
        }
        // Lost a race with another writer; re-check.
    }
}

fn scan(tree: &sled::Tree, cursor: &[u8], limit: Limit, direction: Direction) -> Result<Page> {
    let now = ttl::unix_millis();
    let range = tree.range::<&[u8], _>(pagination::seek_range(cursor, direction));
    let ordered: Box<dyn Iterator<Item = sled::Result<(IVec, IVec)>>> = match direction {
        Direction::Forward => Box::new(range),
        Direction::Backward => Box::new(range.rev()),
    };

    let live = ordered.filter_map(|item| match item {
        Ok((key, raw)) => match Envelope::decode(&raw) {
            Ok(envelope) if envelope.is_live(now) => Some(Ok((key, envelope.value.to_vec()))),
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        },
        Err(err) => Some(Err(Error::translate(err))),
    });

    pagination::collect_page(live, cursor, limit, direction)
}

/// Removes expired entries, resuming where the previous round stopped.
struct Sweeper {
    tree: sled::Tree,
    batch_size: usize,
    resume: Mutex<Vec<u8>>,
}

impl Sweeper {
    fn new(tree: sled::Tree, batch_size: usize) -> Self {
        Self {
            tree,
            batch_size,
            resume: Mutex::new(Vec::new()),
        }
    }
}

impl Reclaimer for Sweeper {
    fn reclaim(&self) -> Result<Reclaim> {
        let now = ttl::unix_millis();
        let mut resume = self.resume.lock();
        let lower = if resume.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(resume.as_slice())
        };

        let mut removed = 0;
        let mut stopped_at = None;
        for item in self.tree.range::<&[u8], _>((lower, Bound::Unbounded)) {
            let (key, raw) = item.map_err(Error::translate)?;
            let Ok(envelope) = Envelope::decode(&raw) else {
                continue;
            };
            if envelope.is_live(now) {
                continue;
            }
            // Only remove the exact bytes we saw, never a concurrent refresh.
            let swapped = self
                .tree
                .compare_and_swap(&key, Some(&raw), None::<&[u8]>)
                .map_err(Error::translate)?;
            if swapped.is_ok() {
                removed += 1;
            }
            if removed == self.batch_size {
                stopped_at = Some(key.to_vec());
                break;
            }
        }

        *resume = stopped_at.unwrap_or_default();
        drop(resume);

        if removed == 0 {
            return Ok(Reclaim::Nothing);
        }
        self.tree.flush().map_err(Error::translate)?;
        debug!(driver = NAME, removed, "Swept expired entries");
        Ok(Reclaim::Progress(removed))
    }
}

#[derive(Clone)]
struct Handle {
    db: sled::Db,
    tree: sled::Tree,
}

/// Persistent embedded driver with TTLs and ordered pagination.
pub struct SledDriver {
    config: SledConfig,
    sink: ErrorSink,
    state: Lifecycle<Handle>,
    maintenance: Mutex<Option<MaintenanceTask>>,
}

impl SledDriver {
    /// Validate `config` and create a driver in the `Created` state.
    pub fn new(config: SledConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            sink: maintenance::log_sink(NAME),
            state: Lifecycle::new(NAME),
            maintenance: Mutex::new(None),
        })
    }

    /// Route sweep failures somewhere other than the log.
    #[must_use]
    pub fn with_error_sink(mut self, sink: ErrorSink) -> Self {
        self.sink = sink;
        self
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&sled::Tree) -> Result<T> + Send + 'static,
    {
        let handle = self.state.handle()?;
        tokio::task::spawn_blocking(move || f(&handle.tree)).await?
    }

    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Ttl>) -> Result<()> {
        let key = key.to_vec();
        let raw = Envelope::encode(value, expiry(ttl));
        self.blocking(move |tree| {
            tree.insert(key, raw).map_err(Error::translate)?;
            Ok(())
        })
        .await
    }

    async fn conditional(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Ttl>,
        precondition: Precondition,
    ) -> Result<bool> {
        let key = key.to_vec();
        let value = value.to_vec();
        self.blocking(move |tree| write_if(tree, &key, &value, expiry(ttl), precondition))
            .await
    }

    async fn page(&self, cursor: &[u8], limit: usize, direction: Direction) -> Result<Page> {
        let limit = Limit::new(limit)?;
        let cursor = cursor.to_vec();
        self.blocking(move |tree| scan(tree, &cursor, limit, direction))
            .await
    }
}

#[async_trait]
impl Driver for SledDriver {
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

        let config = self.config.clone();
        let handle = tokio::task::spawn_blocking(move || -> Result<Handle> {
            if let Some(parent) = config.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::backend(NAME, e))?;
            }
            let db = sled::Config::new()
                .path(&config.path)
                .open()
                .map_err(Error::translate)?;
            let tree = db.open_tree(&config.tree).map_err(Error::translate)?;
            Ok(Handle { db, tree })
        })
        .await??;

        let recovered = handle.db.was_recovered();
        let task = MaintenanceTask::spawn(
            NAME,
            Arc::new(Sweeper::new(handle.tree.clone(), self.config.gc_batch_size)),
            Schedule {
                interval: self.config.gc_interval,
                max_rounds: self.config.gc_max_rounds,
            },
            Arc::clone(&self.sink),
        );

        // The task is in place before the handle is visible to `stop`.
        *self.maintenance.lock() = Some(task);
        if self.state.install(handle).is_err() {
            let task = self.maintenance.lock().take();
            if let Some(task) = task {
                task.shutdown().await;
            }
            return Ok(());
        }

        info!(
            driver = NAME,
            path = %self.config.path.display(),
            tree = %self.config.tree,
            recovered,
            "Driver started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _transition = self.state.transition().await;
        let Some(handle) = self.state.take() else {
            return Ok(());
        };

        let task = self.maintenance.lock().take();
        if let Some(task) = task {
            task.shutdown().await;
        }

        tokio::task::spawn_blocking(move || handle.db.flush().map_err(Error::translate))
            .await??;
        info!(driver = NAME, "Driver stopped");
        Ok(())
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put(key, value, None).await
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let key = key.to_vec();
        self.blocking(move |tree| {
            let raw = tree
                .get(&key)
                .map_err(Error::translate)?
                .ok_or(Error::NotFound)?;
            let envelope = Envelope::decode(&raw)?;
            if envelope.is_live(ttl::unix_millis()) {
                Ok(envelope.value.to_vec())
            } else {
                Err(Error::NotFound)
            }
        })
        .await
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        let key = key.to_vec();
        self.blocking(move |tree| {
            tree.remove(key).map_err(Error::translate)?;
            Ok(())
        })
        .await
    }

    async fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl_secs: i64) -> Result<()> {
        let ttl = Ttl::from_secs(ttl_secs)?;
        self.put(key, value, Some(ttl)).await
    }

    async fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.conditional(key, value, None, Precondition::Absent).await
    }

    async fn update(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.conditional(key, value, None, Precondition::Present).await
    }

    async fn insert_with_ttl(&self, key: &[u8], value: &[u8], ttl_secs: i64) -> Result<bool> {
        let ttl = Ttl::from_secs(ttl_secs)?;
        self.conditional(key, value, Some(ttl), Precondition::Absent).await
    }

    async fn update_with_ttl(&self, key: &[u8], value: &[u8], ttl_secs: i64) -> Result<bool> {
        let ttl = Ttl::from_secs(ttl_secs)?;
        self.conditional(key, value, Some(ttl), Precondition::Present).await
    }

    async fn next(&self, cursor: &[u8], limit: usize) -> Result<Page> {
        self.page(cursor, limit, Direction::Forward).await
    }

    async fn prev(&self, cursor: &[u8], limit: usize) -> Result<Page> {
        self.page(cursor, limit, Direction::Backward).await
    }
}
