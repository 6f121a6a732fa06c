//! Records persisted in the mail cache.

use serde::Serialize;
use uuid::Uuid;

use crate::columns;
use crate::kvs::{Column, Record};

pub const ACCOUNTS_TABLE: &str = "accounts";
pub const MAILBOXES_TABLE: &str = "mailboxes";
pub const MESSAGES_TABLE: &str = "messages";

/// Remote mail account credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Account {
    pub uuid: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Local row identifier, not persisted.
    pub row_id: u32,
}

impl Account {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }
}

impl Record for Account {
    const TABLE: &'static str = ACCOUNTS_TABLE;

    fn columns() -> &'static [Column<Self>] {
        const COLUMNS: &[Column<Account>] = columns!(Account => uuid, username, password);
        COLUMNS
    }

    fn set_row_id(&mut self, row: u32) {
        self.row_id = row;
    }
}

/// A remote mailbox belonging to an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Mailbox {
    pub uuid: Uuid,
    pub name: String,
    /// Local row identifier, not persisted.
    pub row_id: u32,
}

impl Mailbox {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Record for Mailbox {
    const TABLE: &'static str = MAILBOXES_TABLE;

    fn columns() -> &'static [Column<Self>] {
        const COLUMNS: &[Column<Mailbox>] = columns!(Mailbox => uuid, name);
        COLUMNS
    }

    fn set_row_id(&mut self, row: u32) {
        self.row_id = row;
    }
}

/// A message header cached from a mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Message {
    pub uuid: Uuid,
    pub remote_uid: u32,
    pub subject: String,
    /// Local row identifier, not persisted.
    pub row_id: u32,
}

impl Message {
    pub fn new(remote_uid: u32, subject: impl Into<String>) -> Self {
        Self {
            remote_uid,
            subject: subject.into(),
            ..Self::default()
        }
    }
}

impl Record for Message {
    const TABLE: &'static str = MESSAGES_TABLE;

    fn columns() -> &'static [Column<Self>] {
        const COLUMNS: &[Column<Message>] = columns!(Message => uuid, remote_uid, subject);
        COLUMNS
    }

    fn set_row_id(&mut self, row: u32) {
        self.row_id = row;
    }
}
