use rusqlite;
use std::{io, path::PathBuf, result};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse content hash {0}")]
    ParseContentHashError(String),
    #[error("cannot load cache snapshot: unsupported version {0}")]
    SnapshotVersionError(String),
    #[error("cannot load cache snapshot: location {0} points to unknown envelope {1}")]
    DanglingLocationError(String, String),
    #[error("cannot load cache snapshot: message id {0} points to unknown envelope {1}")]
    DanglingMessageIdError(String, String),
    #[error("cannot load cache snapshot: message id {0} of envelope {1} is not indexed")]
    UnindexedMessageIdError(String, String),
    #[error("cannot load cache snapshot: pending message id {0} is already cached")]
    ResolvedPendingError(String),

    #[error("cannot create cache directory {1:?}")]
    CreateCacheDirError(#[source] io::Error, PathBuf),
    #[error("cannot remove stale snapshot file {1:?}")]
    RemoveTmpSnapshotError(#[source] io::Error, PathBuf),
    #[error("cannot replace cache snapshot {1:?}")]
    ReplaceSnapshotError(#[source] io::Error, PathBuf),

    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),
}

pub type Result<T> = result::Result<T, Error>;
