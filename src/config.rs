// gmail-cache-lib, a Rust library mirroring multi-label mail accounts.
// Copyright (C) 2022  soywod <clement.douin@posteo.net>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Config module.
//!
//! This module contains the configuration of an account
//! synchronization.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, env, path::PathBuf, result, time::Duration};
use thiserror::Error;

use crate::{
    sync::{retry, sync::DEFAULT_CHECKPOINT_EVERY},
    Cache, LoadStatus, RetryPolicy, SyncEngine,
};

pub const DEFAULT_CACHE_DIR: &str = "gmail-cache";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot expand cache path {1}")]
    ExpandCachePathError(#[source] shellexpand::LookupError<env::VarError>, String),
    #[error("cannot find user data directory")]
    GetXdgDataDirError,
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the synchronization configuration of an account.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Represents the account name, used to name the default cache
    /// file and the synchronization lock.
    pub name: String,
    /// Represents the snapshot location. Defaults to
    /// `$XDG_DATA_HOME/gmail-cache/<name>.sqlite`.
    pub cache_path: Option<String>,
    /// Represents the mailboxes never scanned, like virtual "All
    /// Mail" or "Trash" folders.
    #[serde(default)]
    pub ignored_mailboxes: Vec<String>,
    /// Represents the number of ingested messages between two
    /// checkpoints.
    pub checkpoint_every: Option<usize>,
    pub max_retries: Option<usize>,
    pub retry_delay_secs: Option<u64>,
}

impl SyncConfig {
    pub fn new<N>(name: N) -> Self
    where
        N: ToString,
    {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Gets the expanded snapshot location.
    pub fn cache_path(&self) -> Result<PathBuf> {
        match self.cache_path.as_deref() {
            Some(path) => shellexpand::full(path)
                .map(|path| PathBuf::from(path.to_string()))
                .map_err(|err| Error::ExpandCachePathError(err, path.to_owned())),
            None => dirs::data_dir()
                .map(|dir| {
                    dir.join(DEFAULT_CACHE_DIR)
                        .join(format!("{}.sqlite", self.name))
                })
                .ok_or(Error::GetXdgDataDirError),
        }
    }

    pub fn ignored_mailboxes(&self) -> HashSet<String> {
        self.ignored_mailboxes.iter().cloned().collect()
    }

    pub fn checkpoint_every(&self) -> usize {
        self.checkpoint_every
            .unwrap_or(DEFAULT_CHECKPOINT_EVERY)
            .max(1)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries.unwrap_or(retry::DEFAULT_MAX_RETRIES),
            self.retry_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(retry::DEFAULT_RETRY_DELAY),
        )
    }

    /// Opens the cache of the account, restoring the last snapshot
    /// when possible. The returned cache checkpoints to the snapshot
    /// location.
    pub fn open_cache(&self) -> Result<(Cache, LoadStatus)> {
        let path = self.cache_path()?;
        debug!("opening cache {:?}", path);

        let mut cache = Cache::with_autosave(&path);
        let status = cache.load(&path);
        if let LoadStatus::Discarded(ref err) = status {
            warn!("starting from an empty cache: {}", err);
        }

        Ok((cache, status))
    }

    /// Builds a sync engine locked on the account name.
    pub fn engine<'a>(&self) -> SyncEngine<'a> {
        SyncEngine::new()
            .ignored_mailboxes(self.ignored_mailboxes())
            .checkpoint_every(self.checkpoint_every())
            .retry_policy(self.retry_policy())
            .lock(&self.name)
    }
}
