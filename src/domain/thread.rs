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

//! Thread module.
//!
//! This module folds messages into the reference graph built from
//! their Message-ID, References and In-Reply-To headers, and looks
//! threads up from it.
//!
//! Every envelope of a connected component of the graph holds the
//! same `references` set: all the Message-IDs of the component,
//! including its own one and the ones of messages not cached yet.

use log::{debug, trace};
use std::collections::{BTreeSet, VecDeque};

use crate::{Cache, ContentHash, Envelope, LocalRef};

/// Represents the key a thread can be looked up with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ThreadKey {
    Local(LocalRef),
    MessageId(String),
}

impl From<LocalRef> for ThreadKey {
    fn from(local_ref: LocalRef) -> Self {
        Self::Local(local_ref)
    }
}

impl From<&str> for ThreadKey {
    fn from(message_id: &str) -> Self {
        Self::MessageId(message_id.to_owned())
    }
}

/// Represents the result of a thread lookup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Thread {
    /// Message-IDs of the cached messages of the thread.
    MessageIds(BTreeSet<String>),
    /// Locations of the messages of the thread inside one mailbox,
    /// sorted.
    Locations(Vec<LocalRef>),
}

impl Cache {
    /// Computes the reference closure of the given envelope and
    /// propagates it to the whole connected component.
    pub(crate) fn resolve_references(&mut self, hash: &ContentHash, references: BTreeSet<String>) {
        let message_id = match self.envelopes.get_mut(hash) {
            Some(envelope) => match envelope.message_id.clone() {
                Some(id) => id,
                None => {
                    envelope.references = references;
                    return;
                }
            },
            None => return,
        };

        let mut seeds = references;
        seeds.insert(message_id.clone());
        if let Some(pending) = self.pending.remove(&message_id) {
            debug!("message {} inherits {} pending references", message_id, pending.len());
            seeds.extend(pending);
        }

        let closure = self.closure(seeds);
        trace!("closure of {}: {:?}", message_id, closure);

        for id in &closure {
            match self.message_ids.get(id) {
                Some(hashes) => {
                    for hash in hashes {
                        if let Some(envelope) = self.envelopes.get_mut(hash) {
                            envelope.references = closure.clone();
                        }
                    }
                }
                None => {
                    self.pending.insert(id.clone(), closure.clone());
                }
            }
        }
    }

    /// Walks the reference graph breadth first from the given ids.
    /// Cached ids expand through their envelopes references, other
    /// ids through their pending references.
    fn closure(&self, seeds: BTreeSet<String>) -> BTreeSet<String> {
        let mut closure = BTreeSet::new();
        let mut queue: VecDeque<String> = seeds.into_iter().collect();

        while let Some(id) = queue.pop_front() {
            if closure.contains(&id) {
                continue;
            }

            match self.message_ids.get(&id) {
                Some(hashes) => {
                    for envelope in hashes.iter().filter_map(|hash| self.envelopes.get(hash)) {
                        queue.extend(
                            envelope
                                .references
                                .iter()
                                .filter(|reference| !closure.contains(*reference))
                                .cloned(),
                        );
                    }
                }
                None => {
                    if let Some(pending) = self.pending.get(&id) {
                        queue.extend(
                            pending
                                .iter()
                                .filter(|reference| !closure.contains(*reference))
                                .cloned(),
                        );
                    }
                }
            }

            closure.insert(id);
        }

        closure
    }

    /// Cleans the reference graph after the given envelope has been
    /// removed. Its Message-ID is demoted to a pending reference if
    /// other cached messages still refer to it, otherwise the
    /// pending references of its component are dropped.
    pub(crate) fn release_references(&mut self, envelope: &Envelope) {
        let message_id = match envelope.message_id.as_ref() {
            Some(id) => id,
            None => return,
        };

        if let Some(hashes) = self.message_ids.get_mut(message_id) {
            hashes.remove(&envelope.hash);
            if !hashes.is_empty() {
                return;
            }
            self.message_ids.remove(message_id);
        }

        let alive = envelope
            .references
            .iter()
            .any(|id| self.message_ids.contains_key(id));

        for id in &envelope.references {
            if self.message_ids.contains_key(id) {
                continue;
            }
            if alive {
                self.pending.insert(id.clone(), envelope.references.clone());
            } else {
                self.pending.remove(id);
            }
        }

        if alive {
            debug!("message {} is still referenced, keeping it pending", message_id);
        }
    }

    /// Looks up the thread of the given key.
    ///
    /// With a mailbox, returns the locations of the thread messages in
    /// that mailbox. Without mailbox, returns the thread Message-IDs,
    /// or the locations in the key own mailbox when the key is a local
    /// reference. Returns `None` for unknown keys.
    pub fn get_thread(&self, key: &ThreadKey, mailbox: Option<&str>) -> Option<Thread> {
        let envelope = match key {
            ThreadKey::Local(local_ref) => self.envelope_at(local_ref)?,
            ThreadKey::MessageId(id) => self
                .hashes_of(id)?
                .iter()
                .find_map(|hash| self.envelope(hash))?,
        };

        let mut members: BTreeSet<&ContentHash> = envelope
            .references
            .iter()
            .chain(envelope.message_id.iter())
            .filter_map(|id| self.message_ids.get(id))
            .flatten()
            .collect();
        members.insert(&envelope.hash);
        let members = members.into_iter().filter_map(|hash| self.envelope(hash));

        let mailbox = mailbox.or(match key {
            ThreadKey::Local(local_ref) => Some(local_ref.mailbox.as_str()),
            ThreadKey::MessageId(_) => None,
        });

        let thread = match mailbox {
            Some(mailbox) => {
                let locations: BTreeSet<&LocalRef> = members
                    .flat_map(|envelope| envelope.locations.iter())
                    .filter(|local_ref| local_ref.mailbox == mailbox)
                    .collect();
                Thread::Locations(locations.into_iter().cloned().collect())
            }
            None => Thread::MessageIds(
                members
                    .filter_map(|envelope| envelope.message_id.clone())
                    .collect(),
            ),
        };

        Some(thread)
    }

    /// Gets the locations of the whole conversation of the given
    /// message, inside its own mailbox.
    pub fn get_conversation(&self, local_ref: &LocalRef) -> Option<Vec<LocalRef>> {
        match self.get_thread(&ThreadKey::Local(local_ref.clone()), None)? {
            Thread::Locations(locations) => Some(locations),
            Thread::MessageIds(_) => None,
        }
    }
}

#[cfg(test)]
mod thread {
    use std::collections::BTreeSet;

    use crate::{
        cache::cache::tests::{assert_consistent, hash, header},
        Cache, LocalRef,
    };

    use super::{Thread, ThreadKey};

    fn ids(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn insert(cache: &mut Cache, uid: u32, id: &str, references: &[&str]) {
        cache.insert(
            LocalRef::new("INBOX", uid),
            hash(id),
            header(Some(id), references),
        );
    }

    fn references(cache: &Cache, id: &str) -> BTreeSet<String> {
        let hash = cache.hashes_of(id).unwrap().iter().next().unwrap();
        cache.envelope(hash).unwrap().references.clone()
    }

    fn assert_converged(cache: &Cache, members: &[&str], expected: &[&str]) {
        for id in members {
            assert_eq!(ids(expected), references(cache, id), "references of {}", id);
        }
    }

    #[test]
    fn chain_converges_in_any_order() {
        let messages: [(u32, &str, &[&str]); 3] =
            [(1, "<a>", &[]), (2, "<b>", &["<a>"]), (3, "<c>", &["<b>"])];
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for order in orders {
            let mut cache = Cache::new();
            for i in order {
                let (uid, id, references) = messages[i];
                insert(&mut cache, uid, id, references);
            }

            assert_converged(&cache, &["<a>", "<b>", "<c>"], &["<a>", "<b>", "<c>"]);
            for id in ["<a>", "<b>", "<c>"] {
                assert!(cache.pending(id).is_none(), "order {:?}", order);
            }
            assert_consistent(&cache);
        }
    }

    #[test]
    fn components_merge_through_late_message() {
        let mut cache = Cache::new();
        insert(&mut cache, 1, "<a>", &[]);
        insert(&mut cache, 2, "<b>", &["<a>"]);
        insert(&mut cache, 3, "<x>", &[]);
        insert(&mut cache, 4, "<y>", &["<x>"]);
        assert_converged(&cache, &["<a>", "<b>"], &["<a>", "<b>"]);
        assert_converged(&cache, &["<x>", "<y>"], &["<x>", "<y>"]);

        insert(&mut cache, 5, "<m>", &["<b>", "<y>"]);
        assert_converged(
            &cache,
            &["<a>", "<b>", "<x>", "<y>", "<m>"],
            &["<a>", "<b>", "<m>", "<x>", "<y>"],
        );
        assert_consistent(&cache);
    }

    #[test]
    fn forward_reference_is_deferred() {
        let mut cache = Cache::new();
        insert(&mut cache, 2, "<b>", &["<a>"]);

        assert_eq!(Some(&ids(&["<a>", "<b>"])), cache.pending("<a>"));

        insert(&mut cache, 1, "<a>", &[]);

        assert!(cache.pending("<a>").is_none());
        assert_converged(&cache, &["<a>", "<b>"], &["<a>", "<b>"]);
    }

    #[test]
    fn siblings_meet_through_missing_parent() {
        let mut cache = Cache::new();
        insert(&mut cache, 1, "<x>", &["<p>"]);
        insert(&mut cache, 2, "<y>", &["<p>"]);

        assert_converged(&cache, &["<x>", "<y>"], &["<p>", "<x>", "<y>"]);
        assert_eq!(Some(&ids(&["<p>", "<x>", "<y>"])), cache.pending("<p>"));
    }

    #[test]
    fn message_without_id_keeps_raw_references() {
        let mut cache = Cache::new();
        insert(&mut cache, 1, "<a>", &[]);
        cache.insert(LocalRef::new("INBOX", 2), hash("anonymous"), header(None, &["<a>"]));

        let envelope = cache.envelope_at(&LocalRef::new("INBOX", 2)).unwrap();
        assert_eq!(ids(&["<a>"]), envelope.references);
        assert_converged(&cache, &["<a>"], &["<a>"]);
    }

    #[test]
    fn removed_message_becomes_pending_when_still_referenced() {
        let mut cache = Cache::new();
        insert(&mut cache, 1, "<a>", &[]);
        insert(&mut cache, 2, "<b>", &["<a>"]);

        cache.remove(&LocalRef::new("INBOX", 1));

        assert!(cache.hashes_of("<a>").is_none());
        assert_eq!(Some(&ids(&["<a>", "<b>"])), cache.pending("<a>"));
        assert_consistent(&cache);

        cache.remove(&LocalRef::new("INBOX", 2));

        assert!(cache.is_empty());
        assert!(cache.pending("<a>").is_none());
        assert!(cache.pending("<b>").is_none());
    }

    #[test]
    fn thread_lookup() {
        let mut cache = Cache::new();
        cache.insert(LocalRef::new("INBOX", 1), hash("<a>"), header(Some("<a>"), &[]));
        cache.insert(LocalRef::new("Sent", 4), hash("<b>"), header(Some("<b>"), &["<a>"]));
        cache.insert(LocalRef::new("INBOX", 3), hash("<c>"), header(Some("<c>"), &["<b>"]));
        cache.insert(LocalRef::new("All", 9), hash("<b>"), header(Some("<b>"), &["<a>"]));
        cache.insert(LocalRef::new("INBOX", 2), hash("<z>"), header(Some("<z>"), &[]));

        assert_eq!(
            Some(Thread::MessageIds(ids(&["<a>", "<b>", "<c>"]))),
            cache.get_thread(&"<c>".into(), None)
        );
        assert_eq!(
            Some(Thread::Locations(vec![
                LocalRef::new("INBOX", 1),
                LocalRef::new("INBOX", 3),
            ])),
            cache.get_thread(&LocalRef::new("INBOX", 1).into(), None)
        );
        assert_eq!(
            Some(Thread::Locations(vec![LocalRef::new("Sent", 4)])),
            cache.get_thread(&ThreadKey::Local(LocalRef::new("INBOX", 3)), Some("Sent"))
        );
        assert_eq!(
            Some(vec![LocalRef::new("All", 9)]),
            cache.get_conversation(&LocalRef::new("All", 9))
        );
        assert_eq!(None, cache.get_thread(&"<unknown>".into(), None));
        assert_eq!(None, cache.get_conversation(&LocalRef::new("INBOX", 42)));
    }
}
