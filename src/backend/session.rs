//! Session module.
//!
//! This module exposes the session trait, the only door the sync
//! engine has on the remote store. A session is a single logical
//! connection: calls are blocking and never overlap.

use std::{error, result};
use thiserror::Error;

use crate::Uid;

#[cfg(feature = "imap-backend")]
use crate::backend;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find message {0}")]
    FindMessageError(Uid),
    #[error("cannot find mailbox {0}")]
    FindMailboxError(String),
    #[error("unexpected server response: {0}")]
    ProtocolError(String),
    #[error("connection to the server failed")]
    ConnectionError(#[source] Box<dyn error::Error + Send + Sync>),

    #[cfg(feature = "imap-backend")]
    #[error(transparent)]
    ImapError(#[from] backend::imap::Error),
}

impl Error {
    /// Returns true when the error means that a message vanished
    /// between the listing and the fetch. Such errors are not worth a
    /// reconnection: the message will show up as a deletion at the
    /// next listing.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::FindMessageError(_) => true,
            #[cfg(feature = "imap-backend")]
            Self::ImapError(err) => err.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

pub trait Session {
    /// Lists the names of the mailboxes of the account.
    fn list_mailboxes(&mut self) -> Result<Vec<String>>;

    /// Switches the active mailbox for subsequent calls.
    fn select(&mut self, mailbox: &str) -> Result<()>;

    /// Lists the UIDs of the non-deleted messages of the active
    /// mailbox, ideally in ascending order.
    fn current_uids(&mut self) -> Result<Vec<Uid>>;

    /// Fetches the raw header bytes of a message of the active
    /// mailbox.
    fn fetch_header(&mut self, uid: Uid) -> Result<Vec<u8>>;

    /// Fetches the size in bytes of a message of the active mailbox.
    fn message_size(&mut self, uid: Uid) -> Result<u64>;

    /// Renews the connection after a failure, with the same
    /// credentials.
    fn reconnect(&mut self) -> Result<()>;
}

impl<S: Session + ?Sized> Session for Box<S> {
    fn list_mailboxes(&mut self) -> Result<Vec<String>> {
        (**self).list_mailboxes()
    }

    fn select(&mut self, mailbox: &str) -> Result<()> {
        (**self).select(mailbox)
    }

    fn current_uids(&mut self) -> Result<Vec<Uid>> {
        (**self).current_uids()
    }

    fn fetch_header(&mut self, uid: Uid) -> Result<Vec<u8>> {
        (**self).fetch_header(uid)
    }

    fn message_size(&mut self, uid: Uid) -> Result<u64> {
        (**self).message_size(uid)
    }

    fn reconnect(&mut self) -> Result<()> {
        (**self).reconnect()
    }
}
