//! Store configuration files.
//!
//! A store file names the driver type and carries that driver's options:
//!
//! ```toml
//! driver = "sled"
//!
//! [config]
//! path = "/var/lib/app/kv"
//! gc_interval = "10m"
//! ```
//!
//! The `[config]` table is handed to the driver's factory untouched, so
//! each driver owns the schema (and the unknown-field checks) of its own
//! options.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::registry::Registry;

/// Parsed store file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Registered driver name.
    pub driver: String,
    /// Driver options.
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::Table::new())
}

impl StoreConfig {
    /// Load a store file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read, is not valid
    /// TOML, or lacks a `driver` key.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))
    }

    /// Parse a store file from a string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::config(e.to_string()))?;
        if !config.config.is_table() {
            return Err(Error::config("[config] must be a table"));
        }
        Ok(config)
    }

    /// Build the configured driver. It is returned unstarted.
    pub fn open(&self, registry: &Registry) -> Result<Box<dyn Driver>> {
        registry.open(&self.driver, &self.config)
    }
}
