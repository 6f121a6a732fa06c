//! Remote mail access and the registration/sync pipeline.

pub mod client;
pub mod register;
pub mod remote;
pub mod sync;

#[cfg(test)]
pub(crate) mod mock;

pub use client::MailClient;
pub use register::{Registrar, SyncOptions, for_each_message, resolve_address_from_username};
pub use remote::{
    Dialer, FetchItem, ImapConnection, ImapDialer, MailboxInfo, MailboxStatus, RemoteConnection,
    RemoteMessage, SeqRange,
};
pub use sync::{Edit, SyncReport, edit_script, resolve_added_and_removed, sync_mailbox_messages};
