//! Driver registry.
//!
//! A [`Registry`] maps a driver-type name to a factory that builds a driver
//! from its `[config]` table. The application builds one at startup;
//! registration needs `&mut self`, so every driver is registered before the
//! registry can be shared for lookups.

use std::collections::BTreeMap;

use crate::driver::Driver;
use crate::drivers;
use crate::error::{Error, Result};

/// Builds a driver from its options table. Options are validated here,
/// before anything is opened.
pub type Factory = fn(&toml::Value) -> Result<Box<dyn Driver>>;

/// Name to factory map.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    factories: BTreeMap<String, Factory>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every driver compiled into this build.
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        let builtin: &[(&str, Factory)] = &[
            (drivers::memory::NAME, drivers::memory::open),
            (drivers::redb::NAME, drivers::redb::open),
            (drivers::sled::NAME, drivers::sled::open),
            #[cfg(feature = "redis")]
            (drivers::redis::NAME, drivers::redis::open),
        ];
        for (name, factory) in builtin {
            registry.factories.insert((*name).to_string(), *factory);
        }
        registry
    }

    /// Add a driver type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `name` is empty or already registered.
    pub fn register(&mut self, name: impl Into<String>, factory: Factory) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::config("driver name cannot be empty"));
        }
        if self.factories.contains_key(&name) {
            return Err(Error::config(format!("driver '{name}' is already registered")));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build a driver of type `name`. The driver is returned unstarted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown name or invalid options.
    pub fn open(&self, name: &str, options: &toml::Value) -> Result<Box<dyn Driver>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::config(format!(
                "unknown driver '{name}' (available: {})",
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })?;
        factory(options)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
