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

//! Cache snapshot module.
//!
//! This module contains the persistence of the cache tables into a
//! SQLite file. Snapshots are written into a sibling temporary file
//! which then replaces the destination, so that an interrupted save
//! never corrupts the previous snapshot.

use chrono::Local;
use log::{debug, info, warn};
use rusqlite::{params, Connection, OpenFlags};
use std::{
    collections::{BTreeMap, BTreeSet},
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use crate::{ContentHash, Envelope, LocalRef};

use super::{Cache, Error, Result};

const SNAPSHOT_VERSION: &str = "1";

const CREATE_TABLES: &str = "
    CREATE TABLE meta (
        key   TEXT NOT NULL PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE envelopes (
        hash       TEXT NOT NULL PRIMARY KEY,
        message_id TEXT
    );
    CREATE TABLE envelope_references (
        hash      TEXT NOT NULL,
        reference TEXT NOT NULL,
        UNIQUE(hash, reference)
    );
    CREATE TABLE locations (
        mailbox TEXT    NOT NULL,
        uid     INTEGER NOT NULL,
        hash    TEXT    NOT NULL,
        UNIQUE(mailbox, uid)
    );
    CREATE TABLE message_ids (
        message_id TEXT NOT NULL,
        hash       TEXT NOT NULL,
        UNIQUE(message_id, hash)
    );
    CREATE TABLE pending_references (
        message_id TEXT NOT NULL,
        reference  TEXT NOT NULL,
        UNIQUE(message_id, reference)
    );
";

const INSERT_META: &str = "INSERT INTO meta VALUES (?, ?)";
const INSERT_ENVELOPE: &str = "INSERT INTO envelopes VALUES (?, ?)";
const INSERT_REFERENCE: &str = "INSERT INTO envelope_references VALUES (?, ?)";
const INSERT_LOCATION: &str = "INSERT INTO locations VALUES (?, ?, ?)";
const INSERT_MESSAGE_ID: &str = "INSERT INTO message_ids VALUES (?, ?)";
const INSERT_PENDING: &str = "INSERT INTO pending_references VALUES (?, ?)";

const SELECT_VERSION: &str = "SELECT value FROM meta WHERE key = 'version'";
const SELECT_ENVELOPES: &str = "SELECT hash, message_id FROM envelopes";
const SELECT_REFERENCES: &str = "SELECT hash, reference FROM envelope_references";
const SELECT_LOCATIONS: &str = "SELECT mailbox, uid, hash FROM locations ORDER BY mailbox, uid";
const SELECT_MESSAGE_IDS: &str = "SELECT message_id, hash FROM message_ids";
const SELECT_PENDING: &str = "SELECT message_id, reference FROM pending_references";

/// Represents the outcome of [`Cache::load`]. Loading never fails:
/// the cache is left empty whenever the snapshot cannot be used.
#[derive(Debug)]
pub enum LoadStatus {
    /// The snapshot has been loaded, with the given number of
    /// envelopes.
    Loaded(usize),
    /// There is no snapshot yet (cold start).
    Missing,
    /// The snapshot exists but could not be read.
    Discarded(Error),
}

impl LoadStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

impl Cache {
    /// Writes the tables to the given destination, atomically
    /// replacing any previous snapshot.
    pub fn save<P>(&self, path: P) -> Result<()>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let tmp = tmp_path(path);
        debug!("saving cache snapshot to {:?}", path);

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|err| Error::CreateCacheDirError(err, dir.to_owned()))?;
        }

        if tmp.exists() {
            fs::remove_file(&tmp).map_err(|err| Error::RemoveTmpSnapshotError(err, tmp.clone()))?;
        }

        let mut conn = Connection::open(&tmp)?;
        conn.execute_batch(CREATE_TABLES)?;

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(INSERT_META)?;
            stmt.execute(params!["version", SNAPSHOT_VERSION])?;
            stmt.execute(params!["saved_at", Local::now().to_rfc3339()])?;

            let mut insert_envelope = tx.prepare(INSERT_ENVELOPE)?;
            let mut insert_reference = tx.prepare(INSERT_REFERENCE)?;
            for (hash, envelope) in &self.envelopes {
                let hash = hash.to_string();
                insert_envelope.execute(params![hash, envelope.message_id])?;
                for reference in &envelope.references {
                    insert_reference.execute(params![hash, reference])?;
                }
            }

            let mut stmt = tx.prepare(INSERT_LOCATION)?;
            for (local_ref, hash) in &self.locations {
                stmt.execute(params![local_ref.mailbox, local_ref.uid, hash.to_string()])?;
            }

            let mut stmt = tx.prepare(INSERT_MESSAGE_ID)?;
            for (message_id, hashes) in &self.message_ids {
                for hash in hashes {
                    stmt.execute(params![message_id, hash.to_string()])?;
                }
            }

            let mut stmt = tx.prepare(INSERT_PENDING)?;
            for (message_id, references) in &self.pending {
                for reference in references {
                    stmt.execute(params![message_id, reference])?;
                }
            }
        }
        tx.commit()?;
        conn.close().map_err(|(_, err)| err)?;

        fs::rename(&tmp, path).map_err(|err| Error::ReplaceSnapshotError(err, path.to_owned()))?;

        info!(
            "cache snapshot saved to {:?} ({} envelopes)",
            path,
            self.envelopes.len()
        );
        Ok(())
    }

    /// Replaces the tables with the ones of the given snapshot. A
    /// missing or unreadable snapshot leaves the cache empty.
    pub fn load<P>(&mut self, path: P) -> LoadStatus
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        self.clear();

        if !path.exists() {
            info!("no cache snapshot found at {:?}, starting empty", path);
            return LoadStatus::Missing;
        }

        match read_snapshot(path) {
            Ok(tables) => {
                self.envelopes = tables.envelopes;
                self.locations = tables.locations;
                self.message_ids = tables.message_ids;
                self.pending = tables.pending;
                info!(
                    "cache snapshot loaded from {:?} ({} envelopes)",
                    path,
                    self.envelopes.len()
                );
                LoadStatus::Loaded(self.envelopes.len())
            }
            Err(err) => {
                warn!(
                    "cannot load cache snapshot {:?}, starting empty: {}",
                    path, err
                );
                LoadStatus::Discarded(err)
            }
        }
    }

    /// Saves the tables to the autosave destination, if any.
    pub fn checkpoint(&self) -> Result<()> {
        match self.autosave() {
            Some(path) => self.save(path),
            None => {
                debug!("no autosave destination set, skipping checkpoint");
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct Tables {
    envelopes: BTreeMap<ContentHash, Envelope>,
    locations: BTreeMap<LocalRef, ContentHash>,
    message_ids: BTreeMap<String, BTreeSet<ContentHash>>,
    pending: BTreeMap<String, BTreeSet<String>>,
}

fn read_snapshot(path: &Path) -> Result<Tables> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let version: String = conn.query_row(SELECT_VERSION, [], |row| row.get(0))?;
    if version != SNAPSHOT_VERSION {
        return Err(Error::SnapshotVersionError(version));
    }

    let mut tables = Tables::default();

    let mut stmt = conn.prepare(SELECT_ENVELOPES)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
    })?;
    for row in rows {
        let (hash, message_id) = row?;
        let hash: ContentHash = hash.parse()?;
        tables
            .envelopes
            .insert(hash, Envelope::new(hash, message_id));
    }

    let mut stmt = conn.prepare(SELECT_REFERENCES)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (hex, reference) = row?;
        let hash: ContentHash = hex.parse()?;
        match tables.envelopes.get_mut(&hash) {
            Some(envelope) => {
                envelope.references.insert(reference);
            }
            None => warn!("skipping references of unknown envelope {}", hex),
        }
    }

    let mut stmt = conn.prepare(SELECT_LOCATIONS)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, u32>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    for row in rows {
        let (mailbox, uid, hex) = row?;
        let local_ref = LocalRef::new(mailbox, uid);
        let hash: ContentHash = hex.parse()?;
        let envelope = tables
            .envelopes
            .get_mut(&hash)
            .ok_or_else(|| Error::DanglingLocationError(local_ref.to_string(), hex))?;
        envelope.add_location(local_ref.clone());
        tables.locations.insert(local_ref, hash);
    }

    let mut stmt = conn.prepare(SELECT_MESSAGE_IDS)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (message_id, hex) = row?;
        let hash: ContentHash = hex.parse()?;
        if !tables.envelopes.contains_key(&hash) {
            return Err(Error::DanglingMessageIdError(message_id, hex));
        }
        tables.message_ids.entry(message_id).or_default().insert(hash);
    }

    let mut stmt = conn.prepare(SELECT_PENDING)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (message_id, reference) = row?;
        tables.pending.entry(message_id).or_default().insert(reference);
    }

    let orphans = tables
        .envelopes
        .values()
        .filter(|envelope| envelope.is_orphan())
        .count();
    if orphans > 0 {
        warn!("dropping {} envelopes without location from snapshot", orphans);
        tables.envelopes.retain(|_, envelope| !envelope.is_orphan());
        let envelopes = &tables.envelopes;
        tables.message_ids.retain(|_, hashes| {
            hashes.retain(|hash| envelopes.contains_key(hash));
            !hashes.is_empty()
        });
    }

    for envelope in tables.envelopes.values() {
        if let Some(id) = &envelope.message_id {
            let indexed = tables
                .message_ids
                .get(id)
                .map(|hashes| hashes.contains(&envelope.hash))
                .unwrap_or_default();
            if !indexed {
                return Err(Error::UnindexedMessageIdError(
                    id.clone(),
                    envelope.hash.to_string(),
                ));
            }
        }
    }

    if let Some(id) = tables
        .pending
        .keys()
        .find(|id| tables.message_ids.contains_key(*id))
    {
        return Err(Error::ResolvedPendingError(id.clone()));
    }

    Ok(tables)
}

#[cfg(test)]
mod snapshot {
    use rusqlite::Connection;
    use std::fs;
    use tempfile::tempdir;

    use crate::{cache::cache::tests::*, LocalRef};

    use super::{Cache, Error, LoadStatus};

    fn sample() -> Cache {
        let mut cache = Cache::new();
        cache.insert(LocalRef::new("A", 1), hash("a"), header(Some("<a>"), &[]));
        cache.insert(LocalRef::new("A", 2), hash("b"), header(Some("<b>"), &["<a>"]));
        cache.insert(LocalRef::new("B", 7), hash("b"), header(Some("<b>"), &["<a>"]));
        cache.insert(LocalRef::new("B", 8), hash("d"), header(Some("<d>"), &["<c>"]));
        cache.insert(LocalRef::new("B", 9), hash("n"), header(None, &["<a>"]));
        cache
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.sqlite");
        let cache = sample();

        cache.save(&path).unwrap();
        assert!(path.is_file());
        assert!(!dir.path().join("nested").join("cache.sqlite.tmp").exists());

        let mut loaded = Cache::new();
        assert!(matches!(loaded.load(&path), LoadStatus::Loaded(4)));
        assert_eq!(cache, loaded);
        assert!(loaded.pending("<c>").is_some());
        assert_consistent(&loaded);

        // a second save replaces the first snapshot
        let mut cache = loaded.clone();
        cache.remove(&LocalRef::new("B", 9));
        cache.save(&path).unwrap();
        assert!(matches!(loaded.load(&path), LoadStatus::Loaded(3)));
        assert_eq!(cache, loaded);
    }

    #[test]
    fn load_missing_snapshot() {
        let dir = tempdir().unwrap();
        let mut cache = sample();

        assert!(matches!(
            cache.load(dir.path().join("missing.sqlite")),
            LoadStatus::Missing
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn load_corrupt_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");
        fs::write(&path, b"definitely not a sqlite database, just garbage bytes").unwrap();
        let mut cache = sample();

        assert!(matches!(cache.load(&path), LoadStatus::Discarded(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn load_inconsistent_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");

        // envelope whose message id lost its index entry
        sample().save(&path).unwrap();
        Connection::open(&path)
            .unwrap()
            .execute("DELETE FROM message_ids WHERE message_id = '<a>'", [])
            .unwrap();
        let mut cache = sample();
        assert!(matches!(
            cache.load(&path),
            LoadStatus::Discarded(Error::UnindexedMessageIdError(id, _)) if id == "<a>"
        ));
        assert!(cache.is_empty());

        // pending entry for a message id already cached
        sample().save(&path).unwrap();
        Connection::open(&path)
            .unwrap()
            .execute(
                "INSERT INTO pending_references VALUES ('<b>', '<b>')",
                [],
            )
            .unwrap();
        let mut cache = sample();
        assert!(matches!(
            cache.load(&path),
            LoadStatus::Discarded(Error::ResolvedPendingError(id)) if id == "<b>"
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn checkpoint_uses_autosave() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");

        let cache = Cache::new();
        cache.checkpoint().unwrap();
        assert!(!path.exists());

        let mut cache = sample();
        cache.set_autosave(Some(&path));
        cache.checkpoint().unwrap();

        let mut loaded = Cache::with_autosave(&path);
        assert!(loaded.load(&path).is_loaded());
        assert_eq!(cache, loaded);
        assert_eq!(Some(path.as_path()), loaded.autosave());
    }
}
