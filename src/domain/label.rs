//! Label module.
//!
//! On a Gmail-like store, labels are exposed as mailboxes and a
//! labelled message shows up in each of them. Labels are therefore
//! rebuilt from the presences sharing one content hash.

use std::collections::BTreeSet;

use crate::{Cache, LocalRef};

impl Cache {
    /// Gets the names of the mailboxes containing the message found at
    /// the given location.
    pub fn get_labels(&self, local_ref: &LocalRef) -> Option<BTreeSet<String>> {
        self.envelope_at(local_ref).map(|envelope| envelope.mailboxes())
    }
}

#[cfg(test)]
mod label {
    use std::collections::BTreeSet;

    use crate::{
        cache::cache::tests::{hash, header},
        Cache, LocalRef,
    };

    #[test]
    fn labels_from_shared_content() {
        let mut cache = Cache::new();
        cache.insert(LocalRef::new("A", 5), hash("x"), header(Some("<x>"), &[]));
        cache.insert(LocalRef::new("B", 7), hash("x"), header(Some("<x>"), &[]));
        cache.insert(LocalRef::new("B", 8), hash("y"), header(Some("<y>"), &[]));

        let labels = BTreeSet::from_iter(["A".to_owned(), "B".to_owned()]);
        assert_eq!(Some(labels.clone()), cache.get_labels(&LocalRef::new("A", 5)));
        assert_eq!(Some(labels), cache.get_labels(&LocalRef::new("B", 7)));
        assert_eq!(
            Some(BTreeSet::from_iter(["B".to_owned()])),
            cache.get_labels(&LocalRef::new("B", 8))
        );
        assert_eq!(None, cache.get_labels(&LocalRef::new("C", 1)));
    }
}
