//! Account registration: persist the account, then mirror its remote
//! mailboxes and message envelopes into the local repositories.

use std::sync::mpsc;
use std::thread::{self, ScopedJoinHandle};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::kvs::Owner;
use crate::mail::remote::{
    Dialer, FetchItem, ImapDialer, RemoteConnection, RemoteMessage, SeqRange,
};
use crate::repo::Repo;
use crate::types::{Account, Mailbox, Message};

pub const DEFAULT_IMAP_PORT: u16 = 993;
pub const DEFAULT_LIST_BUFFER: usize = 10;
pub const DEFAULT_FETCH_BUFFER: usize = 10;

const FETCH_ITEMS: &[FetchItem] = &[FetchItem::Uid, FetchItem::Envelope];

/// Channel sizes and port used while syncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub list_buffer: usize,
    pub fetch_buffer: usize,
    pub imap_port: u16,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            list_buffer: DEFAULT_LIST_BUFFER,
            fetch_buffer: DEFAULT_FETCH_BUFFER,
            imap_port: DEFAULT_IMAP_PORT,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            list_buffer: config.list_buffer,
            fetch_buffer: config.fetch_buffer,
            imap_port: config.imap_port,
        }
    }
}

/// Derive `imap.<domain>:<port>` from an email-style username.
pub fn resolve_address_from_username(username: &str, port: u16) -> Result<String> {
    username
        .split('@')
        .nth(1)
        .filter(|domain| !domain.is_empty())
        .map(|domain| format!("imap.{domain}:{port}"))
        .ok_or_else(|| Error::UnresolvableAddress(username.to_string()))
}

/// Wait for a background task, re-raising its panic on this thread.
pub(crate) fn join<T>(handle: ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    handle
        .join()
        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}

/// Select `mailbox` read-only and hand every message envelope to `f`.
///
/// The fetch runs on a background thread feeding a channel of `buffer`
/// slots. An error from `f` stops consumption and wins over any fetch error.
pub fn for_each_message<F>(
    conn: &mut dyn RemoteConnection,
    mailbox: &str,
    buffer: usize,
    mut f: F,
) -> Result<()>
where
    F: FnMut(RemoteMessage) -> Result<()>,
{
    let status = conn.select(mailbox, true)?;
    if status.messages == 0 {
        debug!("mailbox {mailbox} is empty");
        return Ok(());
    }
    let range = SeqRange::new(1, status.messages);
    debug!("fetching {range} from {mailbox}");

    let (tx, rx) = mpsc::sync_channel(buffer);
    thread::scope(|scope| {
        let fetcher = scope.spawn(move || conn.fetch(range, FETCH_ITEMS, tx));
        let consumed = rx.iter().try_for_each(&mut f);
        drop(rx);
        let fetched = join(fetcher);
        consumed?;
        fetched
    })
}

/// Registers accounts against remote servers reached through `D`.
#[derive(Debug, Clone)]
pub struct Registrar<D = ImapDialer> {
    dialer: D,
    options: SyncOptions,
}

impl Registrar<ImapDialer> {
    pub fn imap(options: SyncOptions) -> Self {
        Self::with_options(ImapDialer, options)
    }
}

impl<D: Dialer> Registrar<D> {
    pub fn new(dialer: D) -> Self {
        Self::with_options(dialer, SyncOptions::default())
    }

    pub fn with_options(dialer: D, options: SyncOptions) -> Self {
        Self { dialer, options }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Dial and log into the account's server.
    ///
    /// Without an explicit address the server is derived from the username
    /// and reached over TLS; an explicit address is dialed in the clear.
    pub fn connect(
        &self,
        address: Option<&str>,
        account: &Account,
    ) -> Result<Box<dyn RemoteConnection>> {
        let (addr, tls) = match address.filter(|addr| !addr.is_empty()) {
            Some(addr) => (addr.to_string(), false),
            None => (
                resolve_address_from_username(&account.username, self.options.imap_port)?,
                true,
            ),
        };
        debug!("resolved address to {addr}");
        self.dialer.dial(&addr, account, tls)
    }

    /// Persist `account` and sync its remote mailboxes and messages.
    ///
    /// Returns the live connection on success. Nothing already persisted is
    /// rolled back on failure, and the connection is closed before the error
    /// is returned.
    pub fn register_account<A, M, G>(
        &self,
        address: Option<&str>,
        accounts: &mut A,
        mailboxes: &mut M,
        messages: &mut G,
        account: &mut Account,
    ) -> Result<Box<dyn RemoteConnection>>
    where
        A: Repo<Account>,
        M: Repo<Mailbox>,
        G: Repo<Message>,
    {
        if address.is_none_or(str::is_empty) {
            resolve_address_from_username(&account.username, self.options.imap_port)?;
        }

        account.uuid = Uuid::new_v4();
        accounts.save(Owner::Root, account)?;
        debug!("persisted account {}", account.uuid);

        debug!("attempting to login to account");
        let mut conn = self.connect(address, account)?;
        info!("logged into {}", account.username);

        match self.sync_account_mailboxes(conn.as_mut(), mailboxes, messages, account.uuid) {
            Ok(()) => Ok(conn),
            Err(err) => {
                if let Err(close_err) = conn.close() {
                    warn!("failed to close connection: {close_err}");
                }
                Err(err)
            }
        }
    }

    /// Lists every mailbox before fetching any messages, so a listing
    /// failure leaves the mailboxes delivered so far without messages.
    fn sync_account_mailboxes<M, G>(
        &self,
        conn: &mut dyn RemoteConnection,
        mailboxes: &mut M,
        messages: &mut G,
        owner: Uuid,
    ) -> Result<()>
    where
        M: Repo<Mailbox>,
        G: Repo<Message>,
    {
        debug!("syncing mailboxes");
        let persisted = self.persist_mailboxes(conn, mailboxes, owner)?;
        for mailbox in &persisted {
            let count = self.persist_messages(conn, messages, mailbox)?;
            debug!("stored {count} messages for {}", mailbox.name);
        }
        info!("synced {} mailboxes", persisted.len());
        Ok(())
    }

    /// Persist each listed mailbox as it arrives.
    fn persist_mailboxes<M: Repo<Mailbox>>(
        &self,
        conn: &mut dyn RemoteConnection,
        mailboxes: &mut M,
        owner: Uuid,
    ) -> Result<Vec<Mailbox>> {
        let (tx, rx) = mpsc::sync_channel(self.options.list_buffer);
        thread::scope(|scope| {
            let lister = scope.spawn(move || conn.list("", "*", tx));

            let mut persisted = Vec::new();
            let consumed: Result<()> = rx.iter().try_for_each(|info| {
                let mut mailbox = Mailbox::new(info.name);
                mailbox.uuid = Uuid::new_v4();
                mailboxes.save(owner.into(), &mut mailbox)?;
                debug!("persisted mailbox {}", mailbox.name);
                persisted.push(mailbox);
                Ok(())
            });
            drop(rx);

            let listed = join(lister);
            consumed?;
            listed?;
            Ok(persisted)
        })
    }

    fn persist_messages<G: Repo<Message>>(
        &self,
        conn: &mut dyn RemoteConnection,
        messages: &mut G,
        mailbox: &Mailbox,
    ) -> Result<usize> {
        let mut count = 0;
        for_each_message(conn, &mailbox.name, self.options.fetch_buffer, |remote| {
            store_message(messages, mailbox, remote)?;
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }
}

/// Persist a fetched envelope under `mailbox` with a fresh identity.
pub(crate) fn store_message<G: Repo<Message>>(
    messages: &mut G,
    mailbox: &Mailbox,
    remote: RemoteMessage,
) -> Result<Message> {
    let mut message = Message::new(remote.uid, remote.subject.unwrap_or_default());
    message.uuid = Uuid::new_v4();
    messages.save(mailbox.uuid.into(), &mut message)?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvs::Store;
    use crate::mail::mock::{MockConnection, MockRepo};
    use crate::repo::MailStore;

    fn account() -> Account {
        Account::new("test@place.com", "efewfweoifjio")
    }

    #[test]
    fn test_resolve_address_from_username() {
        assert_eq!(
            resolve_address_from_username("test@place.com", 993).unwrap(),
            "imap.place.com:993"
        );
        assert!(matches!(
            resolve_address_from_username("nodomain", 993),
            Err(Error::UnresolvableAddress(_))
        ));
        assert!(resolve_address_from_username("trailing@", 993).is_err());
    }

    #[test]
    fn test_register_syncs_remote_mailboxes() {
        let conn = MockConnection::registration_fixture();
        let (dialer, dials) = conn.dialer();
        let registrar = Registrar::new(dialer);

        let mut accounts = MockRepo::default();
        let mut mailboxes = MockRepo::default();
        let mut messages = MockRepo::default();
        let mut acc = account();

        registrar
            .register_account(None, &mut accounts, &mut mailboxes, &mut messages, &mut acc)
            .unwrap();

        assert_eq!(*dials.lock().unwrap(), vec![("imap.place.com:993".to_string(), true)]);
        assert_eq!(accounts.saved.len(), 1);
        assert_ne!(acc.uuid, Uuid::nil());

        let names: Vec<&str> = mailboxes.saved.iter().map(|(_, m)| m.name.as_str()).collect();
        assert_eq!(names, vec!["INBOX", "SHOPPING", "SPAM", "WORK"]);
        assert!(mailboxes.saved.iter().all(|(owner, _)| *owner == Owner::from(acc.uuid)));

        let uids: Vec<u32> = messages.records().iter().map(|m| m.remote_uid).collect();
        assert_eq!(uids, vec![321, 5940, 623943, 65096]);
        let inbox = mailboxes.records()[0].uuid;
        assert!(messages.saved.iter().all(|(owner, _)| *owner == Owner::from(inbox)));
        assert_eq!(messages.records()[0].subject, "Test inbox message");
    }

    #[test]
    fn test_register_against_store() {
        let conn = MockConnection::new(&[
            (
                "INBOX",
                &[(321, "one"), (5940, "two"), (623943, "three"), (65096, "four")],
            ),
            ("SPAM", &[]),
        ]);
        let (dialer, _) = conn.dialer();
        let registrar = Registrar::new(dialer);

        let store = Store::open_memory().unwrap();
        let mut repos = MailStore::new(&store, 100);
        let mut acc = account();

        let mut live = registrar
            .register_account(
                Some("127.0.0.1:1143"),
                &mut repos.accounts,
                &mut repos.mailboxes,
                &mut repos.messages,
                &mut acc,
            )
            .unwrap();
        live.close().unwrap();

        let accounts = repos.accounts.fetch_by_owner(Owner::Root).unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].uuid, acc.uuid);

        let boxes = repos.mailboxes.fetch_by_owner(acc.uuid.into()).unwrap();
        assert_eq!(boxes.len(), 2);

        let inbox = boxes.iter().find(|m| m.name == "INBOX").unwrap();
        let spam = boxes.iter().find(|m| m.name == "SPAM").unwrap();
        assert_eq!(repos.messages.fetch_by_owner(inbox.uuid.into()).unwrap().len(), 4);
        assert!(repos.messages.fetch_by_owner(spam.uuid.into()).unwrap().is_empty());
    }

    #[test]
    fn test_register_uses_explicit_address_without_tls() {
        let conn = MockConnection::registration_fixture();
        let (dialer, dials) = conn.dialer();
        let registrar = Registrar::new(dialer);

        registrar
            .register_account(
                Some("localhost:1143"),
                &mut MockRepo::default(),
                &mut MockRepo::default(),
                &mut MockRepo::default(),
                &mut Account::new("username", "password"),
            )
            .unwrap();

        assert_eq!(*dials.lock().unwrap(), vec![("localhost:1143".to_string(), false)]);
    }

    #[test]
    fn test_register_listing_error_keeps_delivered_mailboxes() {
        let mut conn = MockConnection::registration_fixture();
        conn.list_error = Some((1, "failed to acquire next mailbox".into()));
        let (dialer, _) = conn.dialer();
        let registrar = Registrar::new(dialer);

        let mut mailboxes = MockRepo::default();
        let mut messages = MockRepo::<Message>::default();
        let err = match registrar.register_account(
            None,
            &mut MockRepo::default(),
            &mut mailboxes,
            &mut messages,
            &mut account(),
        ) {
            Ok(_) => panic!("registration should fail"),
            Err(err) => err,
        };

        assert_eq!(err.to_string(), "failed to acquire next mailbox");
        assert!(messages.saved.is_empty());
        assert_eq!(mailboxes.saved.len(), 1);
        assert_eq!(mailboxes.records()[0].name, "INBOX");
        assert_eq!(conn.close_count(), 1);
    }

    #[test]
    fn test_register_mailbox_persist_error() {
        let conn = MockConnection::registration_fixture();
        let (dialer, _) = conn.dialer();
        let registrar = Registrar::with_options(
            dialer,
            SyncOptions {
                list_buffer: 0,
                ..SyncOptions::default()
            },
        );

        let mut mailboxes = MockRepo::failing_after(1, "failed to persist mailbox");
        let mut messages = MockRepo::default();
        let err = match registrar.register_account(
            None,
            &mut MockRepo::default(),
            &mut mailboxes,
            &mut messages,
            &mut account(),
        ) {
            Ok(_) => panic!("registration should fail"),
            Err(err) => err,
        };

        assert_eq!(err.to_string(), "IO error: failed to persist mailbox");
        assert_eq!(mailboxes.saved.len(), 1);
        assert_eq!(mailboxes.records()[0].name, "INBOX");
        assert!(messages.saved.is_empty());
    }

    #[test]
    fn test_register_account_persist_error_skips_dial() {
        let conn = MockConnection::registration_fixture();
        let (dialer, dials) = conn.dialer();
        let registrar = Registrar::new(dialer);

        let result = registrar.register_account(
            None,
            &mut MockRepo::failing_after(0, "disk full"),
            &mut MockRepo::default(),
            &mut MockRepo::default(),
            &mut account(),
        );

        assert!(result.is_err());
        assert!(dials.lock().unwrap().is_empty());
    }

    #[test]
    fn test_register_unresolvable_username_persists_nothing() {
        let (dialer, _) = MockConnection::registration_fixture().dialer();
        let registrar = Registrar::new(dialer);
        let mut accounts = MockRepo::default();

        let result = registrar.register_account(
            None,
            &mut accounts,
            &mut MockRepo::default(),
            &mut MockRepo::default(),
            &mut Account::new("username", "password"),
        );

        assert!(matches!(result, Err(Error::UnresolvableAddress(_))));
        assert!(accounts.saved.is_empty());
    }

    #[test]
    fn test_register_dial_failure_keeps_account() {
        let registrar = Registrar::new(
            |addr: &str, _account: &Account, _tls: bool| -> Result<Box<dyn RemoteConnection>> {
                Err(Error::Dial {
                    addr: addr.to_string(),
                    reason: "connection refused".into(),
                })
            },
        );
        let mut accounts = MockRepo::default();

        let result = registrar.register_account(
            None,
            &mut accounts,
            &mut MockRepo::default(),
            &mut MockRepo::default(),
            &mut account(),
        );

        let err = match result {
            Ok(_) => panic!("dial should fail"),
            Err(err) => err,
        };
        assert_eq!(
            err.to_string(),
            "failed to dial to address imap.place.com:993: connection refused"
        );
        assert_eq!(accounts.saved.len(), 1);
    }

    #[test]
    fn test_register_message_persist_error() {
        let conn = MockConnection::registration_fixture();
        let (dialer, _) = conn.dialer();
        let registrar = Registrar::new(dialer);

        let mut mailboxes = MockRepo::default();
        let mut messages = MockRepo::failing_after(2, "failed to persist message");
        let result = registrar.register_account(
            None,
            &mut MockRepo::default(),
            &mut mailboxes,
            &mut messages,
            &mut account(),
        );

        assert!(result.is_err());
        assert_eq!(messages.saved.len(), 2);
        // listing completes before any mailbox is fetched
        assert_eq!(mailboxes.saved.len(), 4);
    }

    #[test]
    fn test_for_each_message_delivers_subjects() {
        let mut conn = MockConnection::new(&[(
            "INBOX",
            &[
                (3353, "Cats & Dogs"),
                (5393, "Re: neighbour noise complaint"),
                (3283, "Library - Book Overdue!"),
            ],
        )]);

        let mut subjects = Vec::new();
        for_each_message(&mut conn, "INBOX", 1, |msg| {
            subjects.push(msg.subject.unwrap_or_default());
            Ok(())
        })
        .unwrap();

        assert_eq!(
            subjects,
            vec!["Cats & Dogs", "Re: neighbour noise complaint", "Library - Book Overdue!"]
        );
    }

    #[test]
    fn test_for_each_message_immediate_fetch_error() {
        let mut conn = MockConnection::new(&[("INBOX", &[(3353, "Cats & Dogs")])]);
        conn.fetch_error = Some((0, "failed to initialise fetching process".into()));

        let mut seen = 0;
        let err = for_each_message(&mut conn, "INBOX", 1, |_| {
            seen += 1;
            Ok(())
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "failed to initialise fetching process");
        assert_eq!(seen, 0);
    }

    #[test]
    fn test_for_each_message_error_during_fetch() {
        let mut conn = MockConnection::new(&[(
            "INBOX",
            &[
                (3353, "Cats & Dogs"),
                (5393, "Re: neighbour noise complaint"),
                (3283, "Library - Book Overdue!"),
            ],
        )]);
        conn.fetch_error = Some((2, "failed during fetching process".into()));

        let mut seen = Vec::new();
        let err = for_each_message(&mut conn, "INBOX", 10, |msg| {
            seen.push(msg.uid);
            Ok(())
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "failed during fetching process");
        assert_eq!(seen, vec![3353, 5393]);
    }

    #[test]
    fn test_for_each_message_callback_error_wins() {
        let mut conn = MockConnection::new(&[("INBOX", &[(1, "a"), (2, "b"), (3, "c")])]);
        conn.fetch_error = Some((3, "late fetch failure".into()));

        let err = for_each_message(&mut conn, "INBOX", 0, |_| Err(Error::Remote("stop".into())))
            .unwrap_err();
        assert_eq!(err.to_string(), "stop");
    }

    #[test]
    fn test_for_each_message_skips_empty_mailbox() {
        let mut conn = MockConnection::new(&[("SPAM", &[])]);
        conn.fetch_error = Some((0, "should not fetch".into()));

        for_each_message(&mut conn, "SPAM", 1, |_| panic!("no messages expected")).unwrap();
    }

    #[test]
    fn test_for_each_message_select_error() {
        let mut conn = MockConnection::new(&[("INBOX", &[(1, "a")])]);
        conn.select_error = Some("no such mailbox".into());

        let err = for_each_message(&mut conn, "INBOX", 1, |_| Ok(())).unwrap_err();
        assert_eq!(err.to_string(), "no such mailbox");
    }
}
