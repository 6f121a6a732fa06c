//! Remote mailbox access.

use std::fmt;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc::SyncSender;

use log::debug;
use native_tls::TlsConnector;

use crate::error::{Error, Result};
use crate::types::Account;

/// A mailbox name reported by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxInfo {
    pub name: String,
    pub delimiter: Option<String>,
}

impl MailboxInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delimiter: None,
        }
    }
}

/// State of a mailbox at select time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    pub name: String,
    /// Number of messages currently visible.
    pub messages: u32,
}

/// A fetched message envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMessage {
    /// Sequence number within the selected mailbox.
    pub seq_num: u32,
    pub uid: u32,
    pub subject: Option<String>,
}

/// Contiguous range of message sequence numbers, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqRange {
    pub start: u32,
    pub end: u32,
}

impl SeqRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for SeqRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Message attributes requested by a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchItem {
    Uid,
    Envelope,
}

impl FetchItem {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchItem::Uid => "UID",
            FetchItem::Envelope => "ENVELOPE",
        }
    }
}

fn fetch_query(items: &[FetchItem]) -> String {
    let names: Vec<&str> = items.iter().map(FetchItem::as_str).collect();
    format!("({})", names.join(" "))
}

/// Capabilities the sync pipeline needs from a logged-in remote session.
///
/// `list` and `fetch` push results into the given sender and drop it when
/// done, which closes the channel for the consumer.
pub trait RemoteConnection: Send {
    fn list(&mut self, reference: &str, pattern: &str, tx: SyncSender<MailboxInfo>) -> Result<()>;

    fn select(&mut self, name: &str, read_only: bool) -> Result<MailboxStatus>;

    fn fetch(
        &mut self,
        range: SeqRange,
        items: &[FetchItem],
        tx: SyncSender<RemoteMessage>,
    ) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Opens authenticated remote connections.
pub trait Dialer {
    fn dial(&self, addr: &str, account: &Account, tls: bool) -> Result<Box<dyn RemoteConnection>>;
}

impl<F> Dialer for F
where
    F: Fn(&str, &Account, bool) -> Result<Box<dyn RemoteConnection>>,
{
    fn dial(&self, addr: &str, account: &Account, tls: bool) -> Result<Box<dyn RemoteConnection>> {
        self(addr, account, tls)
    }
}

/// Dialer for real IMAP servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImapDialer;

impl Dialer for ImapDialer {
    fn dial(&self, addr: &str, account: &Account, tls: bool) -> Result<Box<dyn RemoteConnection>> {
        let dial_err = |reason: String| Error::Dial {
            addr: addr.to_string(),
            reason,
        };
        let login_err = |err: imap::Error| Error::Login {
            addr: addr.to_string(),
            reason: err.to_string(),
        };

        if tls {
            let domain = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
            let connector = TlsConnector::builder()
                .build()
                .map_err(|e| dial_err(e.to_string()))?;
            let client =
                imap::connect(addr, domain, &connector).map_err(|e| dial_err(e.to_string()))?;
            let session = client
                .login(&account.username, &account.password)
                .map_err(|(err, _)| login_err(err))?;
            debug!("logged into {addr} over TLS");
            Ok(Box::new(ImapConnection::new(session)))
        } else {
            let stream = TcpStream::connect(addr).map_err(|e| dial_err(e.to_string()))?;
            let mut client = imap::Client::new(stream);
            client.read_greeting().map_err(|e| dial_err(e.to_string()))?;
            let session = client
                .login(&account.username, &account.password)
                .map_err(|(err, _)| login_err(err))?;
            debug!("logged into {addr}");
            Ok(Box::new(ImapConnection::new(session)))
        }
    }
}

/// [`RemoteConnection`] over an `imap` session.
pub struct ImapConnection<T: Read + Write> {
    session: imap::Session<T>,
    closed: bool,
}

impl<T: Read + Write> ImapConnection<T> {
    pub fn new(session: imap::Session<T>) -> Self {
        Self {
            session,
            closed: false,
        }
    }
}

impl<T: Read + Write + Send> RemoteConnection for ImapConnection<T> {
    fn list(&mut self, reference: &str, pattern: &str, tx: SyncSender<MailboxInfo>) -> Result<()> {
        let names = self.session.list(Some(reference), Some(pattern))?;
        for name in names.iter() {
            let info = MailboxInfo {
                name: name.name().to_string(),
                delimiter: name.delimiter().map(str::to_string),
            };
            if tx.send(info).is_err() {
                // consumer stopped listening
                break;
            }
        }
        Ok(())
    }

    fn select(&mut self, name: &str, read_only: bool) -> Result<MailboxStatus> {
        let mailbox = if read_only {
            self.session.examine(name)?
        } else {
            self.session.select(name)?
        };
        Ok(MailboxStatus {
            name: name.to_string(),
            messages: mailbox.exists,
        })
    }

    fn fetch(
        &mut self,
        range: SeqRange,
        items: &[FetchItem],
        tx: SyncSender<RemoteMessage>,
    ) -> Result<()> {
        let fetches = self.session.fetch(range.to_string(), fetch_query(items))?;
        for fetch in fetches.iter() {
            let message = RemoteMessage {
                seq_num: fetch.message,
                uid: fetch.uid.unwrap_or_default(),
                subject: fetch
                    .envelope()
                    .and_then(|envelope| envelope.subject)
                    .map(|subject| String::from_utf8_lossy(subject).into_owned()),
            };
            if tx.send(message).is_err() {
                break;
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.session.logout()?;
        Ok(())
    }
}
