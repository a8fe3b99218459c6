//! The driver contract.
//!
//! [`Driver`] declares the full operation surface. Every operation has a
//! default body that fails with [`Error::UnsupportedOperation`], so a backend
//! overrides exactly the families its [`Features`] advertise and anything it
//! leaves out fails loudly instead of silently doing nothing.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::features::Features;
use crate::record::Page;

/// Uniform key-value driver.
///
/// All drivers are `Send + Sync` and meant to be shared behind an `Arc`;
/// operations may be called concurrently from any number of tasks.
///
/// # Example
///
/// ```ignore
/// use kvport::{Driver, Features};
///
/// let driver = registry.open("memory", &config)?;
/// driver.start().await?;
/// driver.set(b"session:1", b"alice").await?;
/// if driver.features().contains(Features::NEXT) {
///     let page = driver.next(b"", 100).await?;
/// }
/// driver.stop().await?;
/// ```
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Registered driver name.
    fn name(&self) -> &'static str;

    /// Capabilities of this instance. Fixed for the instance's lifetime.
    fn features(&self) -> Features;

    /// Fails with [`Error::UnsupportedOperation`] naming the first flag of
    /// `required` this driver does not advertise.
    fn ensure(&self, required: Features) -> Result<()> {
        match self.features().first_missing(required) {
            Some(flag) => Err(Error::unsupported(flag)),
            None => Ok(()),
        }
    }

    /// Acquire backend resources. Fails without leaving anything open.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Release backend resources. Idempotent; a no-op before `start`.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Store `value` under `key`, clearing any expiry.
    async fn set(&self, _key: &[u8], _value: &[u8]) -> Result<()> {
        Err(Error::unsupported("set"))
    }

    /// Fetch the value under `key`.
    ///
    /// Absent and expired keys are always [`Error::NotFound`].
    async fn get(&self, _key: &[u8]) -> Result<Vec<u8>> {
        Err(Error::unsupported("get"))
    }

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, _key: &[u8]) -> Result<()> {
        Err(Error::unsupported("delete"))
    }

    /// Store `value` under `key`, expiring after `ttl_secs` (must be > 0).
    async fn set_with_ttl(&self, _key: &[u8], _value: &[u8], _ttl_secs: i64) -> Result<()> {
        Err(Error::unsupported("set_with_ttl"))
    }

    /// Write only if `key` is absent. Returns whether the write happened.
    async fn insert(&self, _key: &[u8], _value: &[u8]) -> Result<bool> {
        Err(Error::unsupported("insert"))
    }

    /// Write only if `key` is present. Returns whether the write happened.
    async fn update(&self, _key: &[u8], _value: &[u8]) -> Result<bool> {
        Err(Error::unsupported("update"))
    }

    /// [`insert`](Driver::insert) that also sets the expiry.
    async fn insert_with_ttl(&self, _key: &[u8], _value: &[u8], _ttl_secs: i64) -> Result<bool> {
        Err(Error::unsupported("insert_with_ttl"))
    }

    /// [`update`](Driver::update) that also refreshes the expiry.
    async fn update_with_ttl(&self, _key: &[u8], _value: &[u8], _ttl_secs: i64) -> Result<bool> {
        Err(Error::unsupported("update_with_ttl"))
    }

    /// Overwrite a counter.
    async fn set_counter(&self, _key: &[u8], _value: i64) -> Result<()> {
        Err(Error::unsupported("set_counter"))
    }

    /// Overwrite a counter with an expiry.
    async fn set_counter_with_ttl(&self, _key: &[u8], _value: i64, _ttl_secs: i64) -> Result<()> {
        Err(Error::unsupported("set_counter_with_ttl"))
    }

    /// Read a counter. Absent counters read as zero.
    async fn get_counter(&self, _key: &[u8]) -> Result<i64> {
        Err(Error::unsupported("get_counter"))
    }

    /// Remove a counter.
    async fn delete_counter(&self, _key: &[u8]) -> Result<()> {
        Err(Error::unsupported("delete_counter"))
    }

    /// Add `incr` (possibly negative) and return the new value.
    ///
    /// An absent counter counts as zero.
    async fn increase_counter(&self, _key: &[u8], _incr: i64) -> Result<i64> {
        Err(Error::unsupported("increase_counter"))
    }

    /// Add `incr` and refresh the expiry together with the increment.
    async fn increase_counter_with_ttl(
        &self,
        _key: &[u8],
        _incr: i64,
        _ttl_secs: i64,
    ) -> Result<i64> {
        Err(Error::unsupported("increase_counter_with_ttl"))
    }

    /// Up to `limit` records with keys strictly greater than `cursor`,
    /// ascending. An empty cursor starts at the first key.
    async fn next(&self, _cursor: &[u8], _limit: usize) -> Result<Page> {
        Err(Error::unsupported("next"))
    }

    /// Up to `limit` records with keys strictly less than `cursor`,
    /// descending. An empty cursor starts at the last key.
    async fn prev(&self, _cursor: &[u8], _limit: usize) -> Result<Page> {
        Err(Error::unsupported("prev"))
    }
}

/// Lifecycle state of a driver's backend handle.
enum State<H> {
    Created,
    Started(H),
    Stopped,
}

/// `Created -> Started -> Stopped` state machine guarding a backend handle.
///
/// Foreground operations clone the handle out under a short read lock and
/// then work on the backend without holding it. `start` and `stop` hold the
/// [`transition`](Lifecycle::transition) gate for their whole run, so only
/// one of them acquires or releases resources at a time.
pub(crate) struct Lifecycle<H> {
    driver: &'static str,
    state: RwLock<State<H>>,
    gate: tokio::sync::Mutex<()>,
}

impl<H: Clone> Lifecycle<H> {
    pub(crate) fn new(driver: &'static str) -> Self {
        Self {
            driver,
            state: RwLock::new(State::Created),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Serialize `start` and `stop`. Check [`needs_start`](Self::needs_start)
    /// only after acquiring this.
    pub(crate) async fn transition(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Clone of the running handle.
    pub(crate) fn handle(&self) -> Result<H> {
        match &*self.state.read() {
            State::Started(handle) => Ok(handle.clone()),
            State::Created | State::Stopped => Err(Error::NotRunning {
                driver: self.driver,
            }),
        }
    }

    /// Whether `start` still has work to do.
    ///
    /// Returns `Ok(false)` if already started and an error once stopped,
    /// since `Stopped` is terminal.
    pub(crate) fn needs_start(&self) -> Result<bool> {
        match &*self.state.read() {
            State::Created => Ok(true),
            State::Started(_) => Ok(false),
            State::Stopped => Err(Error::NotRunning {
                driver: self.driver,
            }),
        }
    }

    /// Publish a fully acquired handle.
    ///
    /// Fails unless the state is still `Created`, handing the handle back
    /// for release.
    pub(crate) fn install(&self, handle: H) -> std::result::Result<(), H> {
        let mut state = self.state.write();
        match &*state {
            State::Created => {
                *state = State::Started(handle);
                Ok(())
            }
            State::Started(_) | State::Stopped => Err(handle),
        }
    }

    /// Move to `Stopped`, returning the handle if one was running.
    ///
    /// A driver that was never started stays `Created`.
    pub(crate) fn take(&self) -> Option<H> {
        let mut state = self.state.write();
        match std::mem::replace(&mut *state, State::Stopped) {
            State::Started(handle) => Some(handle),
            State::Created => {
                *state = State::Created;
                None
            }
            State::Stopped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    #[async_trait]
    impl Driver for Bare {
        fn name(&self) -> &'static str {
            "bare"
        }

        fn features(&self) -> Features {
            Features::empty()
        }
    }

    #[tokio::test]
    async fn test_defaults_are_unsupported() {
        let d = Bare;
        d.start().await.unwrap();

        assert!(d.set(b"k", b"v").await.unwrap_err().is_unsupported());
        assert!(d.get(b"k").await.unwrap_err().is_unsupported());
        assert!(d.delete(b"k").await.unwrap_err().is_unsupported());
        assert!(d.set_with_ttl(b"k", b"v", 1).await.unwrap_err().is_unsupported());
        assert!(d.insert(b"k", b"v").await.unwrap_err().is_unsupported());
        assert!(d.update(b"k", b"v").await.unwrap_err().is_unsupported());
        assert!(d.insert_with_ttl(b"k", b"v", 1).await.unwrap_err().is_unsupported());
        assert!(d.update_with_ttl(b"k", b"v", 1).await.unwrap_err().is_unsupported());
        assert!(d.set_counter(b"k", 1).await.unwrap_err().is_unsupported());
        assert!(d.set_counter_with_ttl(b"k", 1, 1).await.unwrap_err().is_unsupported());
        assert!(d.get_counter(b"k").await.unwrap_err().is_unsupported());
        assert!(d.delete_counter(b"k").await.unwrap_err().is_unsupported());
        assert!(d.increase_counter(b"k", 1).await.unwrap_err().is_unsupported());
        assert!(d.increase_counter_with_ttl(b"k", 1, 1).await.unwrap_err().is_unsupported());
        assert!(d.next(b"", 1).await.unwrap_err().is_unsupported());
        assert!(d.prev(b"", 1).await.unwrap_err().is_unsupported());

        d.stop().await.unwrap();
    }

    #[test]
    fn test_ensure_names_missing_flag() {
        let err = Bare.ensure(Features::STORE | Features::NEXT).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { operation: "store" }));
        Bare.ensure(Features::empty()).unwrap();
    }

    #[test]
    fn test_lifecycle_transitions() {
        let lc: Lifecycle<u32> = Lifecycle::new("test");
        assert!(matches!(lc.handle(), Err(Error::NotRunning { driver: "test" })));
        assert!(lc.needs_start().unwrap());

        // Stop before start is a no-op.
        assert_eq!(lc.take(), None);
        assert!(lc.needs_start().unwrap());

        lc.install(7).unwrap();
        assert_eq!(lc.handle().unwrap(), 7);
        assert!(!lc.needs_start().unwrap());
        assert_eq!(lc.install(8), Err(8));

        assert_eq!(lc.take(), Some(7));
        assert_eq!(lc.take(), None);
        assert!(lc.handle().is_err());
        assert!(lc.needs_start().is_err());
        assert_eq!(lc.install(9), Err(9));
    }

    #[tokio::test]
    async fn test_transition_gate_is_exclusive() {
        let lc: Lifecycle<u32> = Lifecycle::new("test");
        let held = lc.transition().await;
        assert!(lc.gate.try_lock().is_err());
        drop(held);
        assert!(lc.gate.try_lock().is_ok());
    }
}
