//! Page-store driver backed by redb.
//!
//! Records live in one named table of a redb database file. Every write is
//! its own ACID transaction, and pagination reads from a single read
//! transaction so a page is a consistent snapshot.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Deserialize;
use tracing::info;

use crate::driver::{Driver, Lifecycle};
use crate::error::{Error, ErrorKind, Result, Translate};
use crate::features::Features;
use crate::pagination::{self, Direction, Limit};
use crate::record::Page;

pub const NAME: &str = "redb";

const FEATURES: Features = Features::STORE
    .union(Features::INSERT)
    .union(Features::UPDATE)
    .union(Features::NEXT)
    .union(Features::PREV)
    .union(Features::PERSISTENT)
    .union(Features::EMBEDDED);

/// `[config]` table for the redb driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedbConfig {
    /// Database file.
    pub path: PathBuf,
    /// Table holding the records, created on start.
    pub table: String,
}

impl RedbConfig {
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::config("redb: path cannot be empty"));
        }
        if self.table.is_empty() {
            return Err(Error::config("redb: table cannot be empty"));
        }
        Ok(())
    }
}

/// Registry factory.
pub fn open(options: &toml::Value) -> Result<Box<dyn Driver>> {
    let config: RedbConfig = options
        .clone()
        .try_into()
        .map_err(|e| Error::config(format!("redb: {e}")))?;
    Ok(Box::new(RedbDriver::new(config)?))
}

impl Translate for redb::Error {
    const DRIVER: &'static str = NAME;

    fn classify(&self) -> Option<ErrorKind> {
        match self {
            redb::Error::TableDoesNotExist(_) => Some(ErrorKind::NotFound),
            redb::Error::ValueTooLarge(_) => Some(ErrorKind::EntryTooLarge),
            _ => None,
        }
    }
}

/// Funnel redb's per-stage error types through [`redb::Error`].
fn native(err: impl Into<redb::Error>) -> Error {
    Error::translate(err.into())
}

#[derive(Clone, Copy)]
enum Precondition {
    Absent,
    Present,
}

#[derive(Clone)]
struct Handle {
    db: Arc<Database>,
    table: Arc<str>,
}

impl Handle {
    fn definition(&self) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
        TableDefinition::new(&self.table)
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let read_txn = self.db.begin_read().map_err(native)?;
        let table = read_txn.open_table(self.definition()).map_err(native)?;
        let value = table.get(key).map_err(native)?.ok_or(Error::NotFound)?;
        Ok(value.value().to_vec())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(native)?;
        {
            let mut table = write_txn.open_table(self.definition()).map_err(native)?;
            table.insert(key, value).map_err(native)?;
        }
        write_txn.commit().map_err(native)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(native)?;
        {
            let mut table = write_txn.open_table(self.definition()).map_err(native)?;
            table.remove(key).map_err(native)?;
        }
        write_txn.commit().map_err(native)
    }

    /// Check and write inside one write transaction. redb serializes writers,
    /// so nothing can land between the check and the insert.
    fn write_if(&self, key: &[u8], value: &[u8], precondition: Precondition) -> Result<bool> {
        let write_txn = self.db.begin_write().map_err(native)?;
        let written = {
            let mut table = write_txn.open_table(self.definition()).map_err(native)?;
            let present = table.get(key).map_err(native)?.is_some();
            let allowed = match precondition {
                Precondition::Absent => !present,
                Precondition::Present => present,
            };
            if allowed {
                table.insert(key, value).map_err(native)?;
            }
            allowed
        };

        if written {
            write_txn.commit().map_err(native)?;
        } else {
            write_txn.abort().map_err(native)?;
        }
        Ok(written)
    }

    fn scan(&self, cursor: &[u8], limit: Limit, direction: Direction) -> Result<Page> {
        let read_txn = self.db.begin_read().map_err(native)?;
        let table = read_txn.open_table(self.definition()).map_err(native)?;
        let range = table
            .range::<&[u8]>(pagination::seek_range(cursor, direction))
            .map_err(native)?;

        match direction {
            Direction::Forward => {
                pagination::collect_page(range.map(owned), cursor, limit, direction)
            },
            Direction::Backward => {
                pagination::collect_page(range.rev().map(owned), cursor, limit, direction)
            },
        }
    }
}

type Guard<'a> = redb::AccessGuard<'a, &'static [u8]>;

fn owned(
    item: std::result::Result<(Guard<'_>, Guard<'_>), redb::StorageError>,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let (key, value) = item.map_err(native)?;
    Ok((key.value().to_vec(), value.value().to_vec()))
}

/// Persistent embedded driver with ordered pagination.
pub struct RedbDriver {
    config: RedbConfig,
    state: Lifecycle<Handle>,
}

impl RedbDriver {
    /// Validate `config` and create a driver in the `Created` state.
    pub fn new(config: RedbConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Lifecycle::new(NAME),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Handle) -> Result<T> + Send + 'static,
    {
        let handle = self.state.handle()?;
        tokio::task::spawn_blocking(move || f(&handle)).await?
    }

    async fn conditional(
        &self,
        key: &[u8],
        value: &[u8],
        precondition: Precondition,
    ) -> Result<bool> {
        let key = key.to_vec();
        let value = value.to_vec();
        self.blocking(move |handle| handle.write_if(&key, &value, precondition))
            .await
    }

    async fn page(&self, cursor: &[u8], limit: usize, direction: Direction) -> Result<Page> {
        let limit = Limit::new(limit)?;
        let cursor = cursor.to_vec();
        self.blocking(move |handle| handle.scan(&cursor, limit, direction))
            .await
    }
}

#[async_trait]
impl Driver for RedbDriver {
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

            let handle = Handle {
                db: Arc::new(Database::create(&config.path).map_err(native)?),
                table: Arc::from(config.table.as_str()),
            };

            // Create the table up front so reads never see it missing.
            let write_txn = handle.db.begin_write().map_err(native)?;
            write_txn.open_table(handle.definition()).map_err(native)?;
            write_txn.commit().map_err(native)?;
            Ok(handle)
        })
        .await??;

        if self.state.install(handle).is_ok() {
            info!(
                driver = NAME,
                path = %self.config.path.display(),
                table = %self.config.table,
                "Driver started"
            );
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _transition = self.state.transition().await;
        if self.state.take().is_some() {
            info!(driver = NAME, "Driver stopped");
        }
        Ok(())
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let key = key.to_vec();
        let value = value.to_vec();
        self.blocking(move |handle| handle.set(&key, &value)).await
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let key = key.to_vec();
        self.blocking(move |handle| handle.get(&key)).await
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        let key = key.to_vec();
        self.blocking(move |handle| handle.delete(&key)).await
    }

    async fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.conditional(key, value, Precondition::Absent).await
    }

    async fn update(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.conditional(key, value, Precondition::Present).await
    }

    async fn next(&self, cursor: &[u8], limit: usize) -> Result<Page> {
        self.page(cursor, limit, Direction::Forward).await
    }

    async fn prev(&self, cursor: &[u8], limit: usize) -> Result<Page> {
        self.page(cursor, limit, Direction::Backward).await
    }
}
