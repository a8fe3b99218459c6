//! Key namespacing for backends with one flat keyspace.
//!
//! Stored keys are `prefix ++ marker ++ caller_key`. The store and counter
//! markers differ at a fixed offset, so a counter can never collide with a
//! plain value holding the same caller-supplied bytes.

/// Marker for plain values.
pub const STORE_MARKER: &[u8] = b":d:";

/// Marker for counters.
pub const COUNTER_MARKER: &[u8] = b":c:";

/// Builds namespaced keys under a driver-level prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyspace {
    prefix: Vec<u8>,
}

impl Keyspace {
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Key for a plain value.
    pub fn store_key(&self, key: &[u8]) -> Vec<u8> {
        self.join(STORE_MARKER, key)
    }

    /// Key for a counter.
    pub fn counter_key(&self, key: &[u8]) -> Vec<u8> {
        self.join(COUNTER_MARKER, key)
    }

    fn join(&self, marker: &[u8], key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + marker.len() + key.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(marker);
        out.extend_from_slice(key);
        out
    }
}
