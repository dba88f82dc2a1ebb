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

//! Cache module.
//!
//! This module contains the in-memory representation of the account
//! cache: the envelopes keyed by content hash, the local references
//! pointing at them, the Message-ID index and the references still
//! waiting for their message to show up.

use log::{debug, trace, warn};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use crate::{ContentHash, Envelope, Header, LocalRef, Uid};

/// Represents what happened to a local reference passed to
/// [`Cache::insert`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Insertion {
    /// A new envelope has been created for the message.
    Created,
    /// The message content was already known under another location.
    Attached,
    /// The local reference was already cached.
    Unchanged,
}

#[derive(Debug, Default, Clone)]
pub struct Cache {
    pub(crate) envelopes: BTreeMap<ContentHash, Envelope>,
    pub(crate) locations: BTreeMap<LocalRef, ContentHash>,
    pub(crate) message_ids: BTreeMap<String, BTreeSet<ContentHash>>,
    pub(crate) pending: BTreeMap<String, BTreeSet<String>>,
    /// Represents the snapshot destination used by checkpoints.
    autosave: Option<PathBuf>,
}

impl PartialEq for Cache {
    fn eq(&self, other: &Self) -> bool {
        self.envelopes == other.envelopes
            && self.locations == other.locations
            && self.message_ids == other.message_ids
            && self.pending == other.pending
    }
}

impl Eq for Cache {}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_autosave<P>(path: P) -> Self
    where
        P: AsRef<Path>,
    {
        Self {
            autosave: Some(path.as_ref().to_owned()),
            ..Self::default()
        }
    }

    pub fn set_autosave<P>(&mut self, path: Option<P>)
    where
        P: AsRef<Path>,
    {
        self.autosave = path.map(|path| path.as_ref().to_owned());
    }

    pub fn autosave(&self) -> Option<&Path> {
        self.autosave.as_deref()
    }

    /// Discards all the tables. The autosave destination is kept.
    pub fn clear(&mut self) {
        self.envelopes.clear();
        self.locations.clear();
        self.message_ids.clear();
        self.pending.clear();
    }

    /// Returns the number of envelopes.
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    pub fn envelope(&self, hash: &ContentHash) -> Option<&Envelope> {
        self.envelopes.get(hash)
    }

    pub fn envelopes(&self) -> impl Iterator<Item = &Envelope> {
        self.envelopes.values()
    }

    pub fn hash_of(&self, local_ref: &LocalRef) -> Option<&ContentHash> {
        self.locations.get(local_ref)
    }

    pub fn envelope_at(&self, local_ref: &LocalRef) -> Option<&Envelope> {
        self.hash_of(local_ref).and_then(|hash| self.envelope(hash))
    }

    pub fn contains(&self, local_ref: &LocalRef) -> bool {
        self.locations.contains_key(local_ref)
    }

    pub fn hashes_of(&self, message_id: &str) -> Option<&BTreeSet<ContentHash>> {
        self.message_ids.get(message_id)
    }

    /// Gets the references recorded for a Message-ID that is not
    /// cached yet.
    pub fn pending(&self, message_id: &str) -> Option<&BTreeSet<String>> {
        self.pending.get(message_id)
    }

    /// Iterates over the local references of the given mailbox, by
    /// ascending UID.
    pub fn local_refs<'a>(&'a self, mailbox: &str) -> impl Iterator<Item = &'a LocalRef> + 'a {
        let start = LocalRef::new(mailbox, Uid::MIN);
        let end = LocalRef::new(mailbox, Uid::MAX);
        self.locations.range(start..=end).map(|(local_ref, _)| local_ref)
    }

    /// Gets the names of all the mailboxes having at least one cached
    /// message.
    pub fn mailboxes(&self) -> BTreeSet<String> {
        let mut mailboxes = BTreeSet::new();
        for local_ref in self.locations.keys() {
            if !mailboxes.contains(&local_ref.mailbox) {
                mailboxes.insert(local_ref.mailbox.clone());
            }
        }
        mailboxes
    }

    /// Lists the Message-IDs shared by distinct contents.
    pub fn duplicate_message_ids(&self) -> impl Iterator<Item = (&String, &BTreeSet<ContentHash>)> {
        self.message_ids
            .iter()
            .filter(|(_, hashes)| hashes.len() > 1)
    }

    /// Caches one presence of a message. The envelope is created if
    /// the content hash is unknown, in which case the message is
    /// folded into the reference graph.
    pub fn insert(&mut self, local_ref: LocalRef, hash: ContentHash, header: Header) -> Insertion {
        match self.locations.get(&local_ref) {
            Some(cached_hash) if *cached_hash == hash => return Insertion::Unchanged,
            Some(cached_hash) => {
                warn!(
                    "content of {} changed from {} to {}, replacing it",
                    local_ref, cached_hash, hash
                );
                self.remove(&local_ref);
            }
            None => (),
        }

        self.locations.insert(local_ref.clone(), hash);

        if let Some(envelope) = self.envelopes.get_mut(&hash) {
            debug!("attaching {} to existing envelope {}", local_ref, hash);
            envelope.add_location(local_ref);
            return Insertion::Attached;
        }

        debug!("creating envelope {} for {}", hash, local_ref);
        let Header {
            message_id,
            references,
        } = header;

        let mut envelope = Envelope::new(hash, message_id.clone());
        envelope.add_location(local_ref.clone());
        self.envelopes.insert(hash, envelope);

        match message_id {
            Some(ref id) => {
                let hashes = self.message_ids.entry(id.clone()).or_default();
                hashes.insert(hash);
                if hashes.len() > 1 {
                    warn!(
                        "message id {} is shared by {} distinct messages",
                        id,
                        hashes.len()
                    );
                }
            }
            None => warn!("message {} has no Message-ID", local_ref),
        }

        self.resolve_references(&hash, references);
        Insertion::Created
    }

    /// Removes one presence of a message. The envelope is dropped
    /// with its Message-ID entry when its last location goes away.
    /// Returns false if the local reference was not cached.
    pub fn remove(&mut self, local_ref: &LocalRef) -> bool {
        let hash = match self.locations.remove(local_ref) {
            Some(hash) => hash,
            None => return false,
        };

        let orphan = match self.envelopes.get_mut(&hash) {
            Some(envelope) => {
                envelope.remove_location(local_ref);
                envelope.is_orphan()
            }
            None => {
                warn!("{} pointed to unknown envelope {}", local_ref, hash);
                false
            }
        };

        if orphan {
            if let Some(envelope) = self.envelopes.remove(&hash) {
                debug!("removing envelope {}", hash);
                self.release_references(&envelope);
            }
        }

        trace!("removed {}", local_ref);
        true
    }

    /// Removes every local reference of the given mailbox. Returns
    /// the number of references removed.
    pub fn forget_mailbox(&mut self, mailbox: &str) -> usize {
        let local_refs: Vec<LocalRef> = self.local_refs(mailbox).cloned().collect();
        for local_ref in &local_refs {
            self.remove(local_ref);
        }
        local_refs.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeSet;

    use crate::{ContentHash, Header, LocalRef};

    use super::{Cache, Insertion};

    pub(crate) fn header(message_id: Option<&str>, references: &[&str]) -> Header {
        Header {
            message_id: message_id.map(ToOwned::to_owned),
            references: references.iter().map(|id| id.to_string()).collect(),
        }
    }

    pub(crate) fn hash(seed: &str) -> ContentHash {
        ContentHash::compute(seed.as_bytes(), seed.len() as u64)
    }

    /// Checks the structural invariants of the tables.
    pub(crate) fn assert_consistent(cache: &Cache) {
        for (local_ref, hash) in &cache.locations {
            let envelope = cache.envelopes.get(hash).expect("dangling location");
            assert!(envelope.locations.contains(local_ref));
        }
        for envelope in cache.envelopes.values() {
            assert!(!envelope.is_orphan());
            for local_ref in &envelope.locations {
                assert_eq!(Some(&envelope.hash), cache.locations.get(local_ref));
            }
            if let Some(id) = &envelope.message_id {
                assert!(cache.message_ids[id].contains(&envelope.hash));
                assert!(!cache.pending.contains_key(id));
            }
        }
        for hashes in cache.message_ids.values() {
            assert!(!hashes.is_empty());
            assert!(hashes.iter().all(|hash| cache.envelopes.contains_key(hash)));
        }
    }

    #[test]
    fn insert_and_dedup_across_mailboxes() {
        let mut cache = Cache::new();
        let a5 = LocalRef::new("A", 5);
        let b7 = LocalRef::new("B", 7);

        let insertion = cache.insert(a5.clone(), hash("x"), header(Some("<x>"), &[]));
        assert_eq!(Insertion::Created, insertion);
        let insertion = cache.insert(b7.clone(), hash("x"), header(Some("<x>"), &[]));
        assert_eq!(Insertion::Attached, insertion);
        let insertion = cache.insert(b7.clone(), hash("x"), header(Some("<x>"), &[]));
        assert_eq!(Insertion::Unchanged, insertion);

        assert_eq!(1, cache.len());
        assert_eq!(vec![a5.clone(), b7.clone()], cache.envelope_at(&a5).unwrap().locations);
        assert_eq!(
            BTreeSet::from_iter(["A".to_owned(), "B".to_owned()]),
            cache.mailboxes()
        );
        assert_consistent(&cache);
    }

    #[test]
    fn remove_last_location_drops_envelope() {
        let mut cache = Cache::new();
        let a1 = LocalRef::new("A", 1);
        let b1 = LocalRef::new("B", 1);
        cache.insert(a1.clone(), hash("x"), header(Some("<x>"), &[]));
        cache.insert(b1.clone(), hash("x"), header(Some("<x>"), &[]));

        assert!(cache.remove(&a1));
        assert!(!cache.remove(&a1));
        assert_eq!(1, cache.len());
        assert!(cache.hashes_of("<x>").is_some());

        assert!(cache.remove(&b1));
        assert!(cache.is_empty());
        assert!(cache.hashes_of("<x>").is_none());
        assert!(cache.pending("<x>").is_none());
        assert_consistent(&cache);
    }

    #[test]
    fn replaced_content_under_same_location() {
        let mut cache = Cache::new();
        let a1 = LocalRef::new("A", 1);
        cache.insert(a1.clone(), hash("x"), header(Some("<x>"), &[]));
        cache.insert(a1.clone(), hash("y"), header(Some("<y>"), &[]));

        assert_eq!(1, cache.len());
        assert_eq!(Some(&hash("y")), cache.hash_of(&a1));
        assert!(cache.hashes_of("<x>").is_none());
        assert_consistent(&cache);
    }

    #[test]
    fn duplicate_message_ids_are_kept_apart() {
        let mut cache = Cache::new();
        cache.insert(LocalRef::new("A", 1), hash("x"), header(Some("<x>"), &[]));
        cache.insert(LocalRef::new("A", 2), hash("y"), header(Some("<x>"), &[]));

        assert_eq!(2, cache.len());
        let duplicates: Vec<_> = cache.duplicate_message_ids().collect();
        assert_eq!(1, duplicates.len());
        assert_eq!("<x>", duplicates[0].0);
        assert_consistent(&cache);
    }

    #[test]
    fn local_refs_and_forget_mailbox() {
        let mut cache = Cache::new();
        cache.insert(LocalRef::new("B", 9), hash("9"), header(None, &[]));
        cache.insert(LocalRef::new("A", 3), hash("3"), header(None, &[]));
        cache.insert(LocalRef::new("A", 1), hash("1"), header(None, &[]));
        cache.insert(LocalRef::new("AB", 2), hash("2"), header(None, &[]));

        let uids: Vec<_> = cache.local_refs("A").map(|local_ref| local_ref.uid).collect();
        assert_eq!(vec![1, 3], uids);

        assert_eq!(2, cache.forget_mailbox("A"));
        assert_eq!(0, cache.local_refs("A").count());
        assert_eq!(2, cache.len());
        assert_consistent(&cache);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.mailboxes().is_empty());
    }
}
