//! Uniform key-value driver abstraction.
//!
//! Applications talk to one [`Driver`] trait and pick the backend through
//! configuration. Each driver advertises the operation families it really
//! implements as [`Features`]; everything else fails with
//! [`Error::UnsupportedOperation`].
//!
//! ```ignore
//! use kvport::{Registry, StoreConfig};
//!
//! let registry = Registry::with_builtin_drivers();
//! let driver = StoreConfig::load_from("store.toml")?.open(&registry)?;
//! driver.start().await?;
//! driver.set(b"greeting", b"hello").await?;
//! let page = driver.next(b"", 100).await?;
//! driver.stop().await?;
//! ```

pub mod config;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod features;
pub mod keyspace;
pub mod maintenance;
pub mod pagination;
pub mod record;
pub mod registry;
pub mod ttl;

pub use config::StoreConfig;
pub use driver::Driver;
pub use error::{Error, ErrorKind, Result};
pub use features::Features;
pub use record::{Cursor, Page, Record};
pub use registry::Registry;
