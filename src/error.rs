//! Error taxonomy shared by every driver.
//!
//! Backend-native errors are translated into [`Error`] at exactly one place
//! per backend: an implementation of [`Translate`] for the backend's native
//! error type. Anything the backend cannot classify passes through unchanged
//! as [`Error::Backend`], with the original error kept as the source.

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed backend error carried by [`Error::Backend`].
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by driver operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key is absent or has expired.
    #[error("not found")]
    NotFound,

    /// Key exceeds the backend's key size limit.
    #[error("key too large")]
    KeyTooLarge,

    /// Key plus value exceed the backend's entry size limit.
    #[error("entry too large")]
    EntryTooLarge,

    /// TTL was zero or negative.
    #[error("invalidated ttl: {ttl_secs}s (must be positive)")]
    InvalidatedTtl { ttl_secs: i64 },

    /// The driver does not advertise this operation.
    #[error("unsupported operation: {operation}")]
    UnsupportedOperation { operation: &'static str },

    /// Pagination limit was zero.
    #[error("unsupported pagination limit: {limit}")]
    UnsupportedPaginationLimit { limit: usize },

    /// Operation issued before `start` or after `stop`.
    #[error("driver '{driver}' is not running")]
    NotRunning { driver: &'static str },

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Backend error with no domain mapping.
    #[error("{driver} backend error: {source}")]
    Backend {
        driver: &'static str,
        #[source]
        source: BackendError,
    },
}

/// Copyable discriminant of [`Error`], used by translation tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    KeyTooLarge,
    EntryTooLarge,
    InvalidatedTtl,
    UnsupportedOperation,
    UnsupportedPaginationLimit,
    NotRunning,
    Config,
    Backend,
}

/// Classification of a backend-native error into the shared taxonomy.
///
/// Implemented once per backend for its native error type. Returning `None`
/// means the error has no domain meaning and is passed through as
/// [`Error::Backend`].
pub trait Translate: std::error::Error + Send + Sync + Sized + 'static {
    /// Driver name reported on passthrough errors.
    const DRIVER: &'static str;

    /// Domain kind for this error, if it has one.
    ///
    /// Only the payload-free kinds (`NotFound`, `KeyTooLarge`,
    /// `EntryTooLarge`) are meaningful here; anything else is treated as
    /// passthrough.
    fn classify(&self) -> Option<ErrorKind>;
}

impl Error {
    /// Translate a backend-native error.
    pub fn translate<E: Translate>(err: E) -> Self {
        match err.classify() {
            Some(ErrorKind::NotFound) => Self::NotFound,
            Some(ErrorKind::KeyTooLarge) => Self::KeyTooLarge,
            Some(ErrorKind::EntryTooLarge) => Self::EntryTooLarge,
            _ => Self::Backend {
                driver: E::DRIVER,
                source: Box::new(err),
            },
        }
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(operation: &'static str) -> Self {
        Self::UnsupportedOperation { operation }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap an arbitrary error as an untranslated backend error.
    pub fn backend(
        driver: &'static str,
        source: impl Into<BackendError>,
    ) -> Self {
        Self::Backend {
            driver,
            source: source.into(),
        }
    }

    /// Discriminant of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::KeyTooLarge => ErrorKind::KeyTooLarge,
            Self::EntryTooLarge => ErrorKind::EntryTooLarge,
            Self::InvalidatedTtl { .. } => ErrorKind::InvalidatedTtl,
            Self::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            Self::UnsupportedPaginationLimit { .. } => ErrorKind::UnsupportedPaginationLimit,
            Self::NotRunning { .. } => ErrorKind::NotRunning,
            Self::Config(_) => ErrorKind::Config,
            Self::Backend { .. } => ErrorKind::Backend,
        }
    }

    /// Returns true for [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns true for [`Error::UnsupportedOperation`].
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedOperation { .. })
    }
}

/// Join errors from `spawn_blocking` surface as passthrough backend errors.
impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::backend("runtime", err)
    }
}
