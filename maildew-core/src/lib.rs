//! maildew-core: Core library for maildew - a local cache of remote mail.
//!
//! This crate provides:
//! - An ordered key-value store with leased row sequences
//! - A codec flattening records into `table.column.owner.row` entries
//! - Repositories for accounts, mailboxes and messages
//! - Account registration and incremental IMAP sync
//! - Configuration management

pub mod config;
pub mod error;
pub mod kvs;
pub mod mail;
pub mod paths;
pub mod repo;
pub mod types;

pub use config::{AppConfig, StorageConfig, SyncConfig};
pub use error::{Error, Result};
pub use kvs::{Owner, Store};
pub use mail::{MailClient, Registrar, RemoteConnection, SyncOptions, SyncReport};
pub use paths::{AppPaths, StoreLocation};
pub use repo::{AccountRepo, KvRepo, MailStore, MailboxRepo, MessageRepo, Repo};
pub use types::{Account, Mailbox, Message};
