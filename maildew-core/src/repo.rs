//! Generic record repositories over the key-value store.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::kvs::{
    Entry, Owner, Record, Sequence, Store, load_entry, store_entry, to_blank_entries, to_entries,
};
use crate::types::{Account, Mailbox, Message};

/// Default number of row identifiers leased per sequence write.
pub const DEFAULT_BANDWIDTH: u64 = 100;

/// Save and load operations for one record type.
pub trait Repo<R> {
    /// Persist `record` under `owner`, filling in its row identifier.
    fn save(&mut self, owner: Owner, record: &mut R) -> Result<()>;

    /// Load every record stored under `owner`, in row order.
    fn fetch_by_owner(&self, owner: Owner) -> Result<Vec<R>>;

    /// Release the table's sequence lease.
    fn close(&mut self) -> Result<()>;
}

/// Repository storing `R` as flat entries in `R::TABLE`.
pub struct KvRepo<R> {
    store: Store,
    bandwidth: u64,
    seq: Option<Sequence>,
    _record: PhantomData<fn() -> R>,
}

pub type AccountRepo = KvRepo<Account>;
pub type MailboxRepo = KvRepo<Mailbox>;
pub type MessageRepo = KvRepo<Message>;

impl<R: Record> KvRepo<R> {
    pub fn new(store: Store) -> Self {
        Self::with_bandwidth(store, DEFAULT_BANDWIDTH)
    }

    /// Create a repository leasing `bandwidth` row identifiers at a time.
    pub fn with_bandwidth(store: Store, bandwidth: u64) -> Self {
        Self {
            store,
            bandwidth,
            seq: None,
            _record: PhantomData,
        }
    }

    pub fn table_name(&self) -> &'static str {
        R::TABLE
    }

    fn next_row_id(&mut self) -> Result<u32> {
        let seq = match &mut self.seq {
            Some(seq) => seq,
            slot => slot.insert(self.store.sequence(R::TABLE.as_bytes(), self.bandwidth)?),
        };
        let next = seq.next()?;
        u32::try_from(next).map_err(|_| Error::RowIdOverflow(next))
    }

    /// Load the record stored at `row` under `owner`.
    pub fn get(&self, owner: Owner, row: u32) -> Result<R> {
        let mut record = R::default();
        self.store.view(|txn| {
            for mut blank in to_blank_entries::<R>(R::TABLE, owner, row) {
                let key = blank.key();
                blank.data = txn
                    .get(&key)?
                    .ok_or_else(|| Error::KeyNotFound(String::from_utf8_lossy(&key).into_owned()))?;
                load_entry(&mut record, &blank)?;
            }
            Ok(())
        })?;
        record.set_row_id(row);
        Ok(record)
    }
}

impl<R: Record> Repo<R> for KvRepo<R> {
    fn save(&mut self, owner: Owner, record: &mut R) -> Result<()> {
        let row = self.next_row_id()?;
        // one transaction per entry; a failure leaves earlier entries in place
        for entry in to_entries(R::TABLE, owner, row, record)? {
            store_entry(&self.store, &entry)?;
        }
        record.set_row_id(row);
        debug!("saved {} row {} for owner {}", R::TABLE, row, owner);
        Ok(())
    }

    fn fetch_by_owner(&self, owner: Owner) -> Result<Vec<R>> {
        let mut rows: BTreeMap<u32, R> = BTreeMap::new();

        for blank in to_blank_entries::<R>(R::TABLE, owner, 0) {
            let prefix = blank.prefix_key();
            self.store.view(|txn| {
                txn.scan_prefix(&prefix, |key, value| {
                    let row = Entry::row_from_key(&prefix, key)?;
                    let record = rows.entry(row).or_insert_with(|| {
                        let mut record = R::default();
                        record.set_row_id(row);
                        record
                    });
                    let entry = Entry {
                        row,
                        data: value.to_vec(),
                        ..blank.clone()
                    };
                    load_entry(record, &entry)
                })
            })?;
        }

        Ok(rows.into_values().collect())
    }

    fn close(&mut self) -> Result<()> {
        match self.seq.take() {
            Some(mut seq) => seq.release(),
            None => Ok(()),
        }
    }
}

impl<R> Drop for KvRepo<R> {
    fn drop(&mut self) {
        if let Some(mut seq) = self.seq.take() {
            if let Err(err) = seq.release() {
                warn!("failed to release row sequence: {err}");
            }
        }
    }
}

/// The three mail repositories sharing one store.
pub struct MailStore {
    pub accounts: AccountRepo,
    pub mailboxes: MailboxRepo,
    pub messages: MessageRepo,
}

impl MailStore {
    pub fn new(store: &Store, bandwidth: u64) -> Self {
        Self {
            accounts: KvRepo::with_bandwidth(store.clone(), bandwidth),
            mailboxes: KvRepo::with_bandwidth(store.clone(), bandwidth),
            messages: KvRepo::with_bandwidth(store.clone(), bandwidth),
        }
    }

    /// Find a stored account by username.
    pub fn find_account(&self, username: &str) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .fetch_by_owner(Owner::Root)?
            .into_iter()
            .find(|account| account.username == username))
    }

    pub fn close(&mut self) -> Result<()> {
        self.accounts.close()?;
        self.mailboxes.close()?;
        self.messages.close()
    }
}
