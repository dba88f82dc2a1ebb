use std::{io, result};
use thiserror::Error;

use crate::session;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot lock synchronization of account {1}")]
    LockAccountError(#[source] io::Error, String),
    #[error("cannot synchronize account: giving up after {0} failed attempts")]
    RetriesExhaustedError(usize, #[source] Box<Error>),

    #[error(transparent)]
    SessionError(#[from] session::Error),
}

pub type Result<T> = result::Result<T, Error>;
