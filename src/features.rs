//! Capability flags advertised by drivers.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Set of operation families a driver actually implements.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Features(u32);

impl Features {
    /// `set`, `get`, `delete`.
    pub const STORE: Self = Self(1 << 0);
    /// `set_with_ttl`.
    pub const TTL_STORE: Self = Self(1 << 1);
    /// `insert`.
    pub const INSERT: Self = Self(1 << 2);
    /// `update`.
    pub const UPDATE: Self = Self(1 << 3);
    /// `insert_with_ttl`.
    pub const TTL_INSERT: Self = Self(1 << 4);
    /// `update_with_ttl`.
    pub const TTL_UPDATE: Self = Self(1 << 5);
    /// `set_counter`, `get_counter`, `delete_counter`, `increase_counter`.
    pub const COUNTER: Self = Self(1 << 6);
    /// `set_counter_with_ttl`, `increase_counter_with_ttl`.
    pub const TTL_COUNTER: Self = Self(1 << 7);
    /// Data survives a restart.
    pub const PERSISTENT: Self = Self(1 << 8);
    /// `next`.
    pub const NEXT: Self = Self(1 << 9);
    /// `prev`.
    pub const PREV: Self = Self(1 << 10);
    /// Result ordering is stable across identical calls.
    pub const STABLE: Self = Self(1 << 11);
    /// Backend runs inside the calling process.
    pub const EMBEDDED: Self = Self(1 << 12);

    const NAMES: [(Self, &'static str); 13] = [
        (Self::STORE, "store"),
        (Self::TTL_STORE, "ttl-store"),
        (Self::INSERT, "insert"),
        (Self::UPDATE, "update"),
        (Self::TTL_INSERT, "ttl-insert"),
        (Self::TTL_UPDATE, "ttl-update"),
        (Self::COUNTER, "counter"),
        (Self::TTL_COUNTER, "ttl-counter"),
        (Self::PERSISTENT, "persistent"),
        (Self::NEXT, "next"),
        (Self::PREV, "prev"),
        (Self::STABLE, "stable"),
        (Self::EMBEDDED, "embedded"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Union of two sets, usable in constants.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true when every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Names of the set flags, in declaration order.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    /// Name of the first flag in `required` that is not set.
    pub fn first_missing(self, required: Self) -> Option<&'static str> {
        Self::NAMES
            .iter()
            .find(|(flag, _)| required.contains(*flag) && !self.contains(*flag))
            .map(|(_, name)| *name)
    }

    /// Every individual flag with its name.
    pub fn all_flags() -> impl Iterator<Item = (Self, &'static str)> {
        Self::NAMES.into_iter()
    }
}

impl BitOr for Features {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for Features {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Features({})", self.names().join(" | "))
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}
