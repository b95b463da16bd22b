//! Pending-change log
//!
//! [`ChangeTracker`] is an append-only list of [`Change`] records. The
//! latest record for a path wins; lookups scan from the tail. The log sits
//! behind a mutex because lazy population can mark items dirty during
//! what looks like a read.

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::item::{shift_after_removal, ItemId, PropertyRecord};
use crate::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    /// Path of the item when the change was made, following later renumbering
    pub path: Path,
    pub item: ItemId,
    /// Where the provider holds the item, if it was ever persisted
    pub stored_path: Option<Path>,
    /// For properties: the value after an add or modify, the value
    /// removed for a removal
    pub snapshot: Option<PropertyRecord>,
    pub node: bool,
}

#[derive(Debug, Default)]
pub struct ChangeTracker {
    log: Mutex<Vec<Change>>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Change>>> {
        self.log
            .lock()
            .map_err(|_| StoreError::poisoned("change tracker"))
    }

    pub fn record(&self, change: Change) -> Result<()> {
        self.lock()?.push(change);
        Ok(())
    }

    /// The most recent change recorded for `path`
    pub fn latest_for(&self, path: &Path) -> Result<Option<Change>> {
        Ok(self.lock()?.iter().rev().find(|c| &c.path == path).cloned())
    }

    /// True while any change is pending
    pub fn is_dirty(&self) -> Result<bool> {
        Ok(!self.lock()?.is_empty())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    pub fn changes(&self) -> Result<Vec<Change>> {
        Ok(self.lock()?.clone())
    }

    pub fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    /// Drops every record matching `pred`
    pub fn forget(&self, mut pred: impl FnMut(&Change) -> bool) -> Result<()> {
        self.lock()?.retain(|c| !pred(c));
        Ok(())
    }

    /// Removal records of items the provider holds
    pub fn removals(&self) -> Result<Vec<Change>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|c| c.kind == ChangeKind::Removed && c.stored_path.is_some())
            .cloned()
            .collect())
    }

    /// Follows an in-session removal: later same-name siblings of `removed`
    /// moved down one index
    pub fn follow_removal(&self, removed: &Path) -> Result<()> {
        for change in self.lock()?.iter_mut() {
            if let Some(shifted) = shift_after_removal(&change.path, removed) {
                change.path = shifted;
            }
        }
        Ok(())
    }

    /// Follows a provider-side compaction after `removed` was deleted
    pub fn compact_stored(&self, removed: &Path) -> Result<()> {
        for change in self.lock()?.iter_mut() {
            let shifted = change
                .stored_path
                .as_ref()
                .and_then(|stored| shift_after_removal(stored, removed));
            if shifted.is_some() {
                change.stored_path = shifted;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Value;

    fn p(s: &str) -> Path {
        Path::parse_expanded(s).unwrap()
    }

    fn id(index: u32) -> ItemId {
        ItemId {
            index,
            generation: 1,
        }
    }

    fn change(kind: ChangeKind, path: &str, stored: Option<&str>) -> Change {
        Change {
            kind,
            path: p(path),
            item: id(0),
            stored_path: stored.map(p),
            snapshot: None,
            node: true,
        }
    }

    #[test]
    fn latest_record_wins() {
        let tracker = ChangeTracker::new();
        tracker.record(change(ChangeKind::Added, "/x", None)).unwrap();
        let mut modified = change(ChangeKind::Modified, "/x", None);
        modified.snapshot = Some(PropertyRecord::single(Value::Long(2)));
        tracker.record(modified.clone()).unwrap();
        tracker.record(change(ChangeKind::Added, "/y", None)).unwrap();

        assert_eq!(tracker.latest_for(&p("/x")).unwrap(), Some(modified));
        assert_eq!(tracker.latest_for(&p("/z")).unwrap(), None);
    }

    #[test]
    fn dirty_until_cleared() {
        let tracker = ChangeTracker::new();
        assert!(!tracker.is_dirty().unwrap());

        tracker.record(change(ChangeKind::Added, "/x", None)).unwrap();
        assert!(tracker.is_dirty().unwrap());
        assert_eq!(tracker.len().unwrap(), 1);

        tracker.clear().unwrap();
        assert!(!tracker.is_dirty().unwrap());
    }

    #[test]
    fn removals_skip_unpersisted_items() {
        let tracker = ChangeTracker::new();
        tracker.record(change(ChangeKind::Removed, "/new", None)).unwrap();
        tracker
            .record(change(ChangeKind::Removed, "/old", Some("/old")))
            .unwrap();

        let removals = tracker.removals().unwrap();
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].path, p("/old"));
    }

    #[test]
    fn paths_follow_renumbering() {
        let tracker = ChangeTracker::new();
        tracker
            .record(change(ChangeKind::Modified, "/p/a[3]/x", Some("/p/a[3]/x")))
            .unwrap();

        tracker.follow_removal(&p("/p/a[2]")).unwrap();
        let current = tracker.changes().unwrap();
        assert_eq!(current[0].path, p("/p/a[2]/x"));
        assert_eq!(current[0].stored_path, Some(p("/p/a[3]/x")));

        tracker.compact_stored(&p("/p/a[2]")).unwrap();
        assert_eq!(tracker.changes().unwrap()[0].stored_path, Some(p("/p/a[2]/x")));
    }

    #[test]
    fn forget_by_item() {
        let tracker = ChangeTracker::new();
        let mut other = change(ChangeKind::Added, "/b", None);
        other.item = id(7);
        tracker.record(change(ChangeKind::Added, "/a", None)).unwrap();
        tracker.record(other).unwrap();

        tracker.forget(|c| c.item == id(0)).unwrap();
        assert_eq!(tracker.len().unwrap(), 1);
    }
}
