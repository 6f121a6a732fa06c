//! Conversion between typed records and flat storage entries.
//!
//! Every record type publishes a static table of [`Column`] descriptors, one
//! per persisted field, usually generated with the [`columns!`](crate::columns)
//! macro. Fields left out of the table are not persisted.

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::kvs::entry::{Entry, Owner};

/// Encoding of a single field value to and from column bytes.
pub trait ColumnValue: Sized {
    fn encode_column(&self) -> Result<Vec<u8>>;
    fn decode_column(data: &[u8]) -> Result<Self>;
}

impl ColumnValue for Vec<u8> {
    fn encode_column(&self) -> Result<Vec<u8>> {
        Ok(self.clone())
    }

    fn decode_column(data: &[u8]) -> Result<Self> {
        Ok(data.to_vec())
    }
}

impl ColumnValue for String {
    fn encode_column(&self) -> Result<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }

    fn decode_column(data: &[u8]) -> Result<Self> {
        Ok(String::from_utf8(data.to_vec())?)
    }
}

macro_rules! json_column {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ColumnValue for $ty {
                fn encode_column(&self) -> Result<Vec<u8>> {
                    Ok(serde_json::to_vec(self)?)
                }

                fn decode_column(data: &[u8]) -> Result<Self> {
                    Ok(serde_json::from_slice(data)?)
                }
            }
        )+
    };
}

json_column!(bool, u8, u16, u32, u64, i8, i16, i32, i64, f32, f64, Uuid);

/// Wrapper persisting any serde type as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> ColumnValue for Json<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode_column(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    fn decode_column(data: &[u8]) -> Result<Self> {
        Ok(Json(serde_json::from_slice(data)?))
    }
}

/// Descriptor for one persisted field of `R`.
pub struct Column<R> {
    pub name: &'static str,
    pub encode: fn(&R) -> Result<Vec<u8>>,
    pub decode: fn(&mut R, &[u8]) -> Result<()>,
}

/// A type that can be stored as a set of entries.
pub trait Record: Default + Sized + 'static {
    /// Table the record's entries live in.
    const TABLE: &'static str;

    /// Persisted fields, in declaration order.
    fn columns() -> &'static [Column<Self>];

    /// Store the locally allocated row identifier.
    fn set_row_id(&mut self, row: u32);
}

/// Build the column table for a record from a list of its field names.
///
/// ```ignore
/// fn columns() -> &'static [Column<Self>] {
///     const COLUMNS: &[Column<Mailbox>] = columns!(Mailbox => uuid, name);
///     COLUMNS
/// }
/// ```
#[macro_export]
macro_rules! columns {
    ($record:ty => $($field:ident),+ $(,)?) => {
        &[$(
            $crate::kvs::Column::<$record> {
                name: stringify!($field),
                encode: |record| $crate::kvs::ColumnValue::encode_column(&record.$field),
                decode: |record, data| {
                    record.$field = $crate::kvs::ColumnValue::decode_column(data)?;
                    Ok(())
                },
            }
        ),+]
    };
}

/// Convert `record` into one entry per persisted column.
pub fn to_entries<R: Record>(
    table: &str,
    owner: Owner,
    row: u32,
    record: &R,
) -> Result<Vec<Entry>> {
    R::columns()
        .iter()
        .map(|column| {
            Ok(Entry {
                table: table.to_string(),
                column: column.name.to_lowercase(),
                owner,
                row,
                data: (column.encode)(record)?,
            })
        })
        .collect()
}

/// Same enumeration as [`to_entries`] with empty data, for building scan prefixes.
pub fn to_blank_entries<R: Record>(table: &str, owner: Owner, row: u32) -> Vec<Entry> {
    R::columns()
        .iter()
        .map(|column| Entry {
            table: table.to_string(),
            column: column.name.to_lowercase(),
            owner,
            row,
            data: Vec::new(),
        })
        .collect()
}

/// Decode `entry` into the matching field of `dest`.
///
/// Column names match field names ignoring ASCII case.
pub fn load_entry<R: Record>(dest: &mut R, entry: &Entry) -> Result<()> {
    let column = R::columns()
        .iter()
        .find(|column| column.name.eq_ignore_ascii_case(&entry.column))
        .ok_or_else(|| Error::NoMatchingField(entry.column.clone()))?;

    (column.decode)(dest, &entry.data).map_err(|err| Error::Decode {
        column: entry.column.clone(),
        reason: err.to_string(),
    })
}

/// Apply [`load_entry`] for each entry, stopping at the first failure.
pub fn load_entries<R: Record>(dest: &mut R, entries: &[Entry]) -> Result<()> {
    entries.iter().try_for_each(|entry| load_entry(dest, entry))
}
