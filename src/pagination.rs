//! Cursor pagination over a backend's ordered iteration primitive.
//!
//! Backends only know how to seek inclusively: "first key >= X" going
//! forward, "last key <= X" going backward, or the extreme end of the
//! keyspace. [`collect_page`] turns an iterator positioned that way into a
//! page with an exclusive boundary:
//!
//! 1. records not strictly past the cursor are skipped without emitting;
//! 2. up to `limit` records are collected;
//! 3. one more record is peeked. If it exists, the returned cursor is the
//!    key of the last collected record; otherwise it is empty.
//!
//! The cursor does not have to name an existing key. Seeking is by
//! position in sorted order, so a cursor whose key was deleted between
//! calls resumes at the next surviving key.
//!
//! The empty key sorts first and cannot be told apart from the empty
//! cursor, so it is never a valid resumption point. Keyspaces that are
//! paginated should not contain it.

use std::num::NonZeroUsize;
use std::ops::Bound;

use crate::error::{Error, Result};
use crate::record::{Cursor, Page, Record};

/// Scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending keys strictly greater than the cursor (`next`).
    Forward,
    /// Descending keys strictly less than the cursor (`prev`).
    Backward,
}

impl Direction {
    /// Returns true when `key` lies strictly past `cursor` in this direction.
    pub fn is_past(self, key: &[u8], cursor: &[u8]) -> bool {
        match self {
            Self::Forward => key > cursor,
            Self::Backward => key < cursor,
        }
    }

    /// Operation name used in errors and logs.
    pub fn operation(self) -> &'static str {
        match self {
            Self::Forward => "next",
            Self::Backward => "prev",
        }
    }
}

/// A validated, non-zero page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit(NonZeroUsize);

impl Limit {
    /// Validate a page size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedPaginationLimit`] for zero.
    pub fn new(limit: usize) -> Result<Self> {
        NonZeroUsize::new(limit)
            .map(Self)
            .ok_or(Error::UnsupportedPaginationLimit { limit })
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

/// Inclusive seek range for a scan starting at `cursor`.
///
/// Forward scans start at the first key >= cursor, backward scans at the
/// last key <= cursor (iterate the range in reverse). An empty cursor
/// leaves the corresponding end unbounded.
pub fn seek_range(cursor: &[u8], direction: Direction) -> (Bound<&[u8]>, Bound<&[u8]>) {
    let at = if cursor.is_empty() {
        Bound::Unbounded
    } else {
        Bound::Included(cursor)
    };
    match direction {
        Direction::Forward => (at, Bound::Unbounded),
        Direction::Backward => (Bound::Unbounded, at),
    }
}

/// Collect one page from an iterator produced by an inclusive seek.
///
/// `iter` must yield keys in `direction` order, starting at or before the
/// cursor position. Native iteration errors are returned as-is so the
/// caller can translate them at its own boundary.
pub fn collect_page<I, K, V, E>(
    iter: I,
    cursor: &[u8],
    limit: Limit,
    direction: Direction,
) -> std::result::Result<Page, E>
where
    I: IntoIterator<Item = std::result::Result<(K, V), E>>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let limit = limit.get();
    let mut records: Vec<Record> = Vec::with_capacity(limit.min(256));
    let mut past_cursor = cursor.is_empty();

    for item in iter {
        let (key, value) = item?;
        let key = key.as_ref();

        if !past_cursor {
            if !direction.is_past(key, cursor) {
                continue;
            }
            past_cursor = true;
        }

        if records.len() == limit {
            // Peeked one record beyond the page: more remain.
            let next = records
                .last()
                .map(|record| Cursor::from(record.key()))
                .unwrap_or_default();
            return Ok(Page {
                records,
                cursor: next,
            });
        }

        records.push(Record::new(key, value));
    }

    Ok(Page {
        records,
        cursor: Cursor::start(),
    })
}
