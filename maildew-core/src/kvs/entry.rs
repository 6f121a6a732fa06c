//! Storage entries: one encoded field of one record.

use std::fmt;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::kvs::store::Store;

/// Width of the zero-padded row segment, enough for any `u32`.
const ROW_WIDTH: usize = 10;

/// Identity of the record that owns an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Owner {
    /// Top-level tables such as accounts.
    #[default]
    Root,
    /// A parent record's identity.
    Record(Uuid),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Root => write!(f, "root"),
            Owner::Record(id) => write!(f, "{}", id.hyphenated()),
        }
    }
}

impl From<Uuid> for Owner {
    fn from(id: Uuid) -> Self {
        Owner::Record(id)
    }
}

/// A single stored field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub table: String,
    pub column: String,
    pub owner: Owner,
    pub row: u32,
    pub data: Vec<u8>,
}

impl Entry {
    /// Prefix shared by every row of this table/column/owner triple.
    pub fn prefix_key(&self) -> Vec<u8> {
        format!("{}.{}.{}.", self.table, self.column, self.owner).into_bytes()
    }

    /// Full storage key, `table.column.owner.row`.
    pub fn key(&self) -> Vec<u8> {
        format!(
            "{}.{}.{}.{:0width$}",
            self.table,
            self.column,
            self.owner,
            self.row,
            width = ROW_WIDTH
        )
        .into_bytes()
    }

    /// Parse the row segment of a key found under `prefix`.
    pub fn row_from_key(prefix: &[u8], key: &[u8]) -> Result<u32> {
        let malformed = || Error::MalformedKey(String::from_utf8_lossy(key).into_owned());
        let suffix = key.strip_prefix(prefix).ok_or_else(malformed)?;
        std::str::from_utf8(suffix)
            .ok()
            .and_then(|row| row.parse().ok())
            .ok_or_else(malformed)
    }
}

/// Write a single entry in its own transaction.
pub fn store_entry(store: &Store, entry: &Entry) -> Result<()> {
    let key = entry.key();
    store.update(|txn| txn.set(&key, &entry.data))
}

/// Load the data stored under `entry`'s key into `entry.data`.
pub fn get_entry(store: &Store, entry: &mut Entry) -> Result<()> {
    let key = entry.key();
    let data = store.view(|txn| txn.get(&key))?;
    match data {
        Some(data) => {
            entry.data = data;
            Ok(())
        }
        None => Err(Error::KeyNotFound(
            String::from_utf8_lossy(&key).into_owned(),
        )),
    }
}
