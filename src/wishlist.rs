//! The wishlist registry: a mutable set of target courses keyed by
//! `teachingClassId`, protected by a single coarse lock. A `teachingClassId`
//! appears at most once. A single coarse lock is enough at this scale; fine-grained
//! per-course locking would add complexity without a measurable benefit.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::WishlistEntry;

pub struct Wishlist {
    entries: Mutex<HashMap<String, WishlistEntry>>,
}

impl Wishlist {
    pub fn new() -> Self {
        Wishlist {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_entries(entries: impl IntoIterator<Item = WishlistEntry>) -> Self {
        let wishlist = Wishlist::new();
        for entry in entries {
            wishlist.add(entry);
        }
        wishlist
    }

    /// Adds an entry. No-op if a section with the same `teachingClassId` is already present.
    pub fn add(&self, entry: WishlistEntry) {
        let mut guard = self.entries.lock().unwrap();
        guard
            .entry(entry.teaching_class_id().to_owned())
            .or_insert(entry);
    }

    /// Removes an entry by id. A no-op if the id isn't present (e.g. it was already removed by
    /// a concurrent monitor reaching a terminal outcome first).
    pub fn remove(&self, teaching_class_id: &str) {
        self.entries.lock().unwrap().remove(teaching_class_id);
    }

    pub fn contains(&self, teaching_class_id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(teaching_class_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Returns a shallow copy for iteration outside the lock: snapshot under the lock, then
    /// iterate outside it.
    pub fn snapshot(&self) -> Vec<WishlistEntry> {
        self.entries.lock().unwrap().values().cloned().collect()
    }
}

impl Default for Wishlist {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CourseIdentifier, CourseTypeCode, TeachingClassRecord};

    fn entry(tc_id: &str) -> WishlistEntry {
        WishlistEntry {
            record: TeachingClassRecord {
                id: CourseIdentifier {
                    teaching_class_id: tc_id.to_owned(),
                    course_number: "CS101".to_owned(),
                    course_type: CourseTypeCode::Xgxk,
                },
                course_name: "Intro".to_owned(),
                teacher_name: "Staff".to_owned(),
                time_and_place: "1-18周 星期二 5-6节".to_owned(),
                capacity: 40,
                enrolled: 39,
                is_full: false,
                is_conflict: false,
                is_chosen: false,
                conflict_desc: None,
            },
        }
    }

    #[test]
    fn uniqueness_is_enforced_on_add() {
        let wishlist = Wishlist::new();
        wishlist.add(entry("T1"));
        wishlist.add(entry("T1"));
        assert_eq!(wishlist.snapshot().len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let wishlist = Wishlist::new();
        wishlist.add(entry("T1"));
        wishlist.remove("T1");
        wishlist.remove("T1");
        assert!(wishlist.is_empty());
    }

    #[test]
    fn snapshot_reflects_concurrent_mutation_boundary() {
        let wishlist = Wishlist::new();
        wishlist.add(entry("T1"));
        wishlist.add(entry("T2"));
        let snap = wishlist.snapshot();
        wishlist.remove("T1");
        // The snapshot taken before the removal still has both entries.
        assert_eq!(snap.len(), 2);
        assert_eq!(wishlist.snapshot().len(), 1);
    }
}
