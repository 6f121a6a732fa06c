//! Schemaless key-value storage.
//!
//! Records are flattened into entries keyed `table.column.owner.row` on top
//! of an ordered byte-string store with leased row sequences.

pub mod codec;
pub mod entry;
pub mod sequence;
pub mod store;

pub use codec::{
    Column, ColumnValue, Json, Record, load_entries, load_entry, to_blank_entries, to_entries,
};
pub use entry::{Entry, Owner, get_entry, store_entry};
pub use sequence::Sequence;
pub use store::{Store, Txn};
