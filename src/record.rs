//! Records and pagination cursors.

use std::fmt;

/// An owned key/value pair.
///
/// Drivers always hand out fresh copies, so mutating a returned record can
/// never reach backend buffers.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Record {
    key: Vec<u8>,
    value: Vec<u8>,
}

impl Record {
    /// Create a record by copying the given slices.
    pub fn new(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
            value: value.as_ref().to_vec(),
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Split into owned key and value.
    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.key, self.value)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("key", &String::from_utf8_lossy(&self.key))
            .field("value_len", &self.value.len())
            .finish()
    }
}

/// Opaque pagination cursor.
///
/// The empty cursor means "start of sequence" when passed to `next`, "end of
/// sequence" when passed to `prev`, and "no more results" when returned.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Cursor(Vec<u8>);

impl Cursor {
    /// The empty cursor.
    pub fn start() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Cursor {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Cursor {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// One page of pagination results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub records: Vec<Record>,
    /// Cursor for the following call, empty when the scan is exhausted.
    pub cursor: Cursor,
}

impl Page {
    /// Returns true when no further page exists in this direction.
    pub fn is_last(&self) -> bool {
        self.cursor.is_empty()
    }

    /// Keys of the records on this page, in page order.
    pub fn keys(&self) -> Vec<&[u8]> {
        self.records.iter().map(Record::key).collect()
    }
}
