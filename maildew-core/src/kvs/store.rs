//! Embedded ordered byte-string store backed by SQLite.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::error::{Error, Result};
use crate::kvs::sequence::Sequence;

/// Shared handle to the key-value store.
///
/// Cloning the handle is cheap; all clones talk to the same connection and
/// every transaction holds the connection exclusively for its duration.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            ) WITHOUT ROWID;
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Run `f` inside a read-only transaction.
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Txn<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let txn = Txn {
            tx,
            writable: false,
        };
        let out = f(&txn)?;
        txn.tx.rollback()?;
        Ok(out)
    }

    /// Run `f` inside a read-write transaction, committing if it succeeds.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Txn<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let txn = Txn { tx, writable: true };
        let out = f(&txn)?;
        txn.tx.commit()?;
        Ok(out)
    }

    /// Lease a sequence of `bandwidth` numbers stored under `key`.
    pub fn sequence(&self, key: &[u8], bandwidth: u64) -> Result<Sequence> {
        Sequence::new(self.clone(), key.to_vec(), bandwidth)
    }

    /// Write every stored pair in key order, one per line.
    pub fn dump_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let pairs = self.view(|txn| {
            let mut pairs = Vec::new();
            txn.scan_prefix(b"", |key, value| {
                pairs.push((key.to_vec(), value.to_vec()));
                Ok(())
            })?;
            Ok(pairs)
        })?;
        for (key, value) in pairs {
            writeln!(
                w,
                "{} = {}",
                String::from_utf8_lossy(&key),
                String::from_utf8_lossy(&value)
            )?;
        }
        Ok(())
    }

    /// Release this handle.
    ///
    /// The connection is closed once the last clone has been released.
    pub fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => {
                let conn = mutex.into_inner().map_err(|_| Error::LockPoisoned)?;
                conn.close().map_err(|(_, err)| Error::Database(err))
            }
            Err(_) => Ok(()),
        }
    }
}

/// A transaction scoped to one `view` or `update` call.
pub struct Txn<'conn> {
    tx: rusqlite::Transaction<'conn>,
    writable: bool,
}

impl Txn<'_> {
    /// Get the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self
            .tx
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnlyTransaction);
        }
        self.tx.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Visit every pair whose key starts with `prefix`, in ascending key order.
    pub fn scan_prefix<F>(&self, prefix: &[u8], mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        let mut stmt = self
            .tx
            .prepare("SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key")?;
        let mut rows = stmt.query(params![prefix])?;
        while let Some(row) = rows.next()? {
            let key: Vec<u8> = row.get(0)?;
            if !key.starts_with(prefix) {
                break;
            }
            let value: Vec<u8> = row.get(1)?;
            visit(&key, &value)?;
        }
        Ok(())
    }
}
