//! Connection-holding front end over the registrar.

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::mail::register::Registrar;
use crate::mail::remote::{Dialer, ImapDialer, RemoteConnection};
use crate::mail::sync::{SyncReport, sync_mailbox_messages};
use crate::repo::Repo;
use crate::types::{Account, Mailbox, Message};

/// Keeps at most one live remote connection between operations.
pub struct MailClient<D = ImapDialer> {
    registrar: Registrar<D>,
    conn: Option<Box<dyn RemoteConnection>>,
}

impl<D: Dialer> MailClient<D> {
    pub fn new(registrar: Registrar<D>) -> Self {
        Self {
            registrar,
            conn: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// The live connection, or [`Error::NotConnected`].
    pub fn connection(&mut self) -> Result<&mut dyn RemoteConnection> {
        match self.conn.as_deref_mut() {
            Some(conn) => Ok(conn),
            None => Err(Error::NotConnected),
        }
    }

    /// Register a new account and keep the connection it opened.
    pub fn register<A, M, G>(
        &mut self,
        address: Option<&str>,
        accounts: &mut A,
        mailboxes: &mut M,
        messages: &mut G,
        account: &mut Account,
    ) -> Result<()>
    where
        A: Repo<Account>,
        M: Repo<Mailbox>,
        G: Repo<Message>,
    {
        self.close()?;
        let conn = self
            .registrar
            .register_account(address, accounts, mailboxes, messages, account)?;
        self.conn = Some(conn);
        Ok(())
    }

    /// Log into an already registered account.
    pub fn connect(&mut self, address: Option<&str>, account: &Account) -> Result<()> {
        self.close()?;
        self.conn = Some(self.registrar.connect(address, account)?);
        debug!("connected as {}", account.username);
        Ok(())
    }

    /// Re-sync every stored mailbox of `account`, in row order.
    pub fn resync<M, G>(
        &mut self,
        mailboxes: &M,
        messages: &mut G,
        account: &Account,
    ) -> Result<Vec<SyncReport>>
    where
        M: Repo<Mailbox>,
        G: Repo<Message>,
    {
        let buffer = self.registrar.options().fetch_buffer;
        let conn = self.connection()?;
        mailboxes
            .fetch_by_owner(account.uuid.into())?
            .iter()
            .map(|mailbox| sync_mailbox_messages(conn, messages, mailbox, buffer))
            .collect()
    }

    /// Close and forget the connection. A no-op when not connected.
    pub fn close(&mut self) -> Result<()> {
        match self.conn.take() {
            Some(mut conn) => conn.close(),
            None => Ok(()),
        }
    }
}

impl<D> Drop for MailClient<D> {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(err) = conn.close() {
                warn!("failed to close connection: {err}");
            }
        }
    }
}
