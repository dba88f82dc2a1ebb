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

use std::{collections::BTreeSet, fmt};

use super::ContentHash;

/// Represents the server identifier of a message inside a mailbox.
pub type Uid = u32;

/// Represents one presence of a message on the remote store: a
/// mailbox name and the server UID of the message inside it.
///
/// The ordering (mailbox first, then UID) keeps the local references
/// of a mailbox contiguous and sorted by ascending UID.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LocalRef {
    pub mailbox: String,
    pub uid: Uid,
}

impl LocalRef {
    pub fn new<M>(mailbox: M, uid: Uid) -> Self
    where
        M: ToString,
    {
        Self {
            mailbox: mailbox.to_string(),
            uid,
        }
    }
}

impl fmt::Display for LocalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.mailbox, self.uid)
    }
}

/// Represents one logical message of the cache, identified by its
/// content hash.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Envelope {
    /// Represents the content identity of the message.
    pub hash: ContentHash,
    /// Represents the places the message can be found at, sorted.
    pub locations: Vec<LocalRef>,
    /// Represents the Message-ID header, if any.
    pub message_id: Option<String>,
    /// Represents the Message-IDs of the whole conversation the
    /// message belongs to.
    pub references: BTreeSet<String>,
}

impl Envelope {
    pub fn new(hash: ContentHash, message_id: Option<String>) -> Self {
        Self {
            hash,
            locations: Vec::new(),
            message_id,
            references: BTreeSet::new(),
        }
    }

    /// Adds the given location, keeping locations sorted. Returns
    /// false if the location was already there.
    pub fn add_location(&mut self, local_ref: LocalRef) -> bool {
        match self.locations.binary_search(&local_ref) {
            Ok(_) => false,
            Err(pos) => {
                self.locations.insert(pos, local_ref);
                true
            }
        }
    }

    /// Removes the given location. Returns false if the location was
    /// not there.
    pub fn remove_location(&mut self, local_ref: &LocalRef) -> bool {
        match self.locations.binary_search(local_ref) {
            Ok(pos) => {
                self.locations.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Returns true when the envelope has no location left.
    pub fn is_orphan(&self) -> bool {
        self.locations.is_empty()
    }

    /// Gets the names of the mailboxes the message is present in.
    pub fn mailboxes(&self) -> BTreeSet<String> {
        self.locations
            .iter()
            .map(|local_ref| local_ref.mailbox.clone())
            .collect()
    }
}

#[cfg(test)]
mod envelope {
    use super::{ContentHash, Envelope, LocalRef};

    #[test]
    fn locations_stay_sorted() {
        let mut envelope = Envelope::new(ContentHash::compute(b"", 0), None);

        assert!(envelope.add_location(LocalRef::new("INBOX", 7)));
        assert!(envelope.add_location(LocalRef::new("Archive", 3)));
        assert!(envelope.add_location(LocalRef::new("INBOX", 2)));
        assert!(!envelope.add_location(LocalRef::new("INBOX", 7)));

        assert_eq!(
            vec![
                LocalRef::new("Archive", 3),
                LocalRef::new("INBOX", 2),
                LocalRef::new("INBOX", 7),
            ],
            envelope.locations
        );

        assert!(envelope.remove_location(&LocalRef::new("INBOX", 2)));
        assert!(!envelope.remove_location(&LocalRef::new("INBOX", 2)));
        assert_eq!(2, envelope.locations.len());
        assert!(!envelope.is_orphan());
    }

    #[test]
    fn local_ref_display() {
        assert_eq!("INBOX.12", LocalRef::new("INBOX", 12).to_string());
    }
}
