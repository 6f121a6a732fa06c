//! Test doubles for the remote connection and repositories.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::kvs::Owner;
use crate::mail::remote::{
    Dialer, FetchItem, MailboxInfo, MailboxStatus, RemoteConnection, RemoteMessage, SeqRange,
};
use crate::repo::Repo;
use crate::types::Account;

/// In-memory remote listing mailboxes in name order.
#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    pub mailboxes: BTreeMap<String, Vec<RemoteMessage>>,
    /// Fail the listing with this message once this many names were sent.
    pub list_error: Option<(usize, String)>,
    /// Fail the fetch with this message once this many messages were sent.
    pub fetch_error: Option<(usize, String)>,
    pub select_error: Option<String>,
    pub closed: Arc<AtomicUsize>,
    selected: String,
}

impl MockConnection {
    pub fn new(mailboxes: &[(&str, &[(u32, &str)])]) -> Self {
        let mailboxes = mailboxes
            .iter()
            .map(|(name, messages)| {
                let messages = messages
                    .iter()
                    .zip(1..)
                    .map(|((uid, subject), seq_num)| RemoteMessage {
                        seq_num,
                        uid: *uid,
                        subject: Some(subject.to_string()),
                    })
                    .collect();
                (name.to_string(), messages)
            })
            .collect();
        Self {
            mailboxes,
            ..Self::default()
        }
    }

    /// The four mailboxes of a freshly registered account.
    pub fn registration_fixture() -> Self {
        Self::new(&[
            (
                "INBOX",
                &[
                    (321, "Test inbox message"),
                    (5940, "Car insurance ad"),
                    (623943, "Order is 15 days late"),
                    (65096, "Feel happy!"),
                ],
            ),
            ("WORK", &[]),
            ("SHOPPING", &[]),
            ("SPAM", &[]),
        ])
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Dialer handing out clones of this connection, recording each dial.
    pub fn dialer(&self) -> (impl Dialer + use<>, Arc<Mutex<Vec<(String, bool)>>>) {
        let dials = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&dials);
        let conn = self.clone();
        let dialer =
            move |addr: &str, _account: &Account, tls: bool| -> Result<Box<dyn RemoteConnection>> {
                recorded.lock().unwrap().push((addr.to_string(), tls));
                Ok(Box::new(conn.clone()))
            };
        (dialer, dials)
    }
}

impl RemoteConnection for MockConnection {
    fn list(
        &mut self,
        _reference: &str,
        _pattern: &str,
        tx: SyncSender<MailboxInfo>,
    ) -> Result<()> {
        for (i, name) in self.mailboxes.keys().enumerate() {
            if let Some((after, msg)) = &self.list_error {
                if i >= *after {
                    return Err(Error::Remote(msg.clone()));
                }
            }
            if tx.send(MailboxInfo::new(name.clone())).is_err() {
                return Ok(());
            }
        }
        Ok(())
    }

    fn select(&mut self, name: &str, _read_only: bool) -> Result<MailboxStatus> {
        if let Some(msg) = &self.select_error {
            return Err(Error::Remote(msg.clone()));
        }
        self.selected = name.to_string();
        let messages = self.mailboxes.get(name).map_or(0, Vec::len);
        Ok(MailboxStatus {
            name: name.to_string(),
            messages: messages as u32,
        })
    }

    fn fetch(
        &mut self,
        range: SeqRange,
        _items: &[FetchItem],
        tx: SyncSender<RemoteMessage>,
    ) -> Result<()> {
        let messages = self.mailboxes.get(&self.selected).cloned().unwrap_or_default();
        let in_range = messages
            .into_iter()
            .filter(|m| m.seq_num >= range.start && m.seq_num <= range.end);
        for (i, message) in in_range.enumerate() {
            if let Some((after, msg)) = &self.fetch_error {
                if i >= *after {
                    return Err(Error::Remote(msg.clone()));
                }
            }
            if tx.send(message).is_err() {
                return Ok(());
            }
        }
        if let Some((_, msg)) = &self.fetch_error {
            return Err(Error::Remote(msg.clone()));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Repository keeping saved records in memory.
#[derive(Debug)]
pub struct MockRepo<R> {
    pub saved: Vec<(Owner, R)>,
    /// Fail every save once this many were attempted.
    pub fail_after: Option<usize>,
    pub error: String,
    attempts: usize,
}

impl<R> Default for MockRepo<R> {
    fn default() -> Self {
        Self {
            saved: Vec::new(),
            fail_after: None,
            error: String::new(),
            attempts: 0,
        }
    }
}

impl<R> MockRepo<R> {
    pub fn failing_after(n: usize, error: &str) -> Self {
        Self {
            fail_after: Some(n),
            error: error.to_string(),
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<&R> {
        self.saved.iter().map(|(_, record)| record).collect()
    }
}

impl<R: Clone> Repo<R> for MockRepo<R> {
    fn save(&mut self, owner: Owner, record: &mut R) -> Result<()> {
        let attempt = self.attempts;
        self.attempts += 1;
        if self.fail_after.is_some_and(|n| attempt >= n) {
            return Err(Error::Io(io::Error::other(self.error.clone())));
        }
        self.saved.push((owner, record.clone()));
        Ok(())
    }

    fn fetch_by_owner(&self, owner: Owner) -> Result<Vec<R>> {
        Ok(self
            .saved
            .iter()
            .filter(|(o, _)| *o == owner)
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
