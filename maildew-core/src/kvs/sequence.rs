//! Leased monotonic counters.

use crate::error::{Error, Result};
use crate::kvs::store::{Store, Txn};

/// Counter handing out numbers from a lease persisted under one key.
///
/// Each lease reserves `bandwidth` numbers in a single write; numbers inside
/// the lease are handed out from memory. The stored value is the first
/// number not yet leased, encoded as a big-endian `u64`.
#[derive(Debug)]
pub struct Sequence {
    store: Store,
    key: Vec<u8>,
    bandwidth: u64,
    next: u64,
    leased: u64,
}

impl Sequence {
    pub(crate) fn new(store: Store, key: Vec<u8>, bandwidth: u64) -> Result<Self> {
        if bandwidth == 0 {
            return Err(Error::ZeroBandwidth);
        }
        let mut seq = Self {
            store,
            key,
            bandwidth,
            next: 0,
            leased: 0,
        };
        seq.update_lease()?;
        Ok(seq)
    }

    /// Return the next number, leasing a fresh range when the current one runs out.
    pub fn next(&mut self) -> Result<u64> {
        if self.next >= self.leased {
            self.update_lease()?;
        }
        let value = self.next;
        self.next += 1;
        Ok(value)
    }

    /// Hand the unused part of the current lease back to the stored counter.
    ///
    /// Nothing is returned if another allocator has leased past this one in
    /// the meantime.
    pub fn release(&mut self) -> Result<()> {
        let key = self.key.clone();
        let (leased, next) = (self.leased, self.next);
        self.store.update(|txn| {
            if read_counter(txn, &key)? == leased {
                txn.set(&key, &next.to_be_bytes())?;
            }
            Ok(())
        })?;
        self.leased = self.next;
        Ok(())
    }

    fn update_lease(&mut self) -> Result<()> {
        let key = self.key.clone();
        let bandwidth = self.bandwidth;
        let (start, end) = self.store.update(|txn| {
            let start = read_counter(txn, &key)?;
            let end = start
                .checked_add(bandwidth)
                .ok_or_else(|| Error::SequenceExhausted(String::from_utf8_lossy(&key).into()))?;
            txn.set(&key, &end.to_be_bytes())?;
            Ok((start, end))
        })?;
        self.next = start;
        self.leased = end;
        Ok(())
    }
}

fn read_counter(txn: &Txn<'_>, key: &[u8]) -> Result<u64> {
    match txn.get(key)? {
        Some(bytes) => {
            let raw: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| Error::CorruptSequence(String::from_utf8_lossy(key).into()))?;
            Ok(u64::from_be_bytes(raw))
        }
        None => Ok(0),
    }
}
