//! Incremental message sync based on a diff of remote UIDs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

use crate::error::Result;
use crate::mail::register::{for_each_message, store_message};
use crate::mail::remote::{RemoteConnection, RemoteMessage};
use crate::repo::Repo;
use crate::types::{Mailbox, Message};

/// One step of an edit script turning `a` into `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit<T> {
    Keep(T),
    Insert(T),
    Delete(T),
}

/// Shortest edit script between two sequences (Myers, O(ND)).
pub fn edit_script<T: PartialEq + Copy>(a: &[T], b: &[T]) -> Vec<Edit<T>> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let max = n + m;
    let offset = max;
    let at = |k: isize| (k + offset) as usize;

    // furthest x reached on each diagonal k, recorded before every round
    let mut v = vec![0isize; 2 * max as usize + 2];
    let mut trace = Vec::new();

    'search: for d in 0..=max {
        trace.push(v.clone());
        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && v[at(k - 1)] < v[at(k + 1)]) {
                v[at(k + 1)]
            } else {
                v[at(k - 1)] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[at(k)] = x;
            if x >= n && y >= m {
                break 'search;
            }
            k += 2;
        }
    }

    let mut edits = Vec::with_capacity(max as usize);
    let (mut x, mut y) = (n, m);
    for (d, v) in trace.iter().enumerate().rev() {
        let d = d as isize;
        let k = x - y;
        let prev_k = if k == -d || (k != d && v[at(k - 1)] < v[at(k + 1)]) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = v[at(prev_k)];
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            edits.push(Edit::Keep(a[x as usize - 1]));
            x -= 1;
            y -= 1;
        }
        if d > 0 {
            if x == prev_x {
                edits.push(Edit::Insert(b[prev_y as usize]));
            } else {
                edits.push(Edit::Delete(a[prev_x as usize]));
            }
        }
        x = prev_x;
        y = prev_y;
    }
    edits.reverse();
    edits
}

/// Split the edit script from `local` to `remote` into UIDs that appeared
/// remotely and UIDs that disappeared.
///
/// This is a sequence diff: both inputs must be sorted ascending for the
/// result to equal the set differences.
pub fn resolve_added_and_removed(local: &[u32], remote: &[u32]) -> (Vec<u32>, Vec<u32>) {
    let mut added = Vec::new();
    let mut missing = Vec::new();
    for edit in edit_script(local, remote) {
        match edit {
            Edit::Insert(uid) => added.push(uid),
            Edit::Delete(uid) => missing.push(uid),
            Edit::Keep(_) => {}
        }
    }
    (added, missing)
}

/// Outcome of re-syncing one mailbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub mailbox: String,
    /// UIDs stored by this sync.
    pub added: Vec<u32>,
    /// UIDs held locally that the server no longer lists.
    pub missing: Vec<u32>,
    pub synced_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.missing.is_empty()
    }
}

/// Bring the stored messages of `mailbox` up to date with the server.
///
/// Messages whose UID is new are persisted; UIDs that vanished remotely are
/// only reported.
pub fn sync_mailbox_messages<G: Repo<Message>>(
    conn: &mut dyn RemoteConnection,
    messages: &mut G,
    mailbox: &Mailbox,
    buffer: usize,
) -> Result<SyncReport> {
    let mut local: Vec<u32> = messages
        .fetch_by_owner(mailbox.uuid.into())?
        .iter()
        .map(|m| m.remote_uid)
        .collect();
    local.sort_unstable();

    let mut fetched: HashMap<u32, RemoteMessage> = HashMap::new();
    for_each_message(conn, &mailbox.name, buffer, |remote| {
        fetched.insert(remote.uid, remote);
        Ok(())
    })?;
    let mut remote: Vec<u32> = fetched.keys().copied().collect();
    remote.sort_unstable();

    let (added, missing) = resolve_added_and_removed(&local, &remote);
    for uid in &added {
        if let Some(envelope) = fetched.remove(uid) {
            store_message(messages, mailbox, envelope)?;
        }
    }

    if added.is_empty() && missing.is_empty() {
        debug!("{} is up to date", mailbox.name);
    } else {
        info!(
            "{}: {} new, {} missing",
            mailbox.name,
            added.len(),
            missing.len()
        );
    }

    Ok(SyncReport {
        mailbox: mailbox.name.clone(),
        added,
        missing,
        synced_at: Utc::now(),
    })
}
