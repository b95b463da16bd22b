//! Stable path handles
//!
//! A [`PathHandle`] names "whatever path this logical position currently
//! resolves to". Handles live in a generation-tagged arena: evicting or
//! releasing a slot bumps its generation, so an old handle can never resolve
//! to a different path that later reuses the slot. Moves rebind handles
//! explicitly; nothing is recomputed behind the caller's back.

use std::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::lru::Lru;

use super::repo_path::Path;

/// Default number of live handles before least-recently-used eviction
pub const DEFAULT_HANDLE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathHandle {
    slot: u32,
    generation: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    path: Option<Path>,
}

#[derive(Debug)]
struct Table {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Live path -> slot, in recency order
    by_path: Lru<Path, u32>,
}

impl Table {
    fn vacate(&mut self, slot: u32) {
        if let Some(s) = self.slots.get_mut(slot as usize) {
            s.path = None;
            s.generation = s.generation.wrapping_add(1);
            self.free.push(slot);
        }
    }

    fn live(&self, handle: PathHandle) -> Option<&Path> {
        let slot = self.slots.get(handle.slot as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.path.as_ref()
    }
}

pub struct HandleTable {
    inner: Mutex<Table>,
}

impl HandleTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Table {
                slots: Vec::new(),
                free: Vec::new(),
                by_path: Lru::new(capacity),
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Table>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::poisoned("path handle table"))
    }

    /// Returns the handle for `path`, allocating one if none is live
    pub fn acquire(&self, path: &Path) -> Result<PathHandle> {
        let mut table = self.lock()?;
        let existing = table.by_path.get(path).copied();
        if let Some(slot) = existing {
            let generation = table.slots[slot as usize].generation;
            return Ok(PathHandle { slot, generation });
        }

        let slot = match table.free.pop() {
            Some(slot) => slot,
            None => {
                table.slots.push(Slot::default());
                (table.slots.len() - 1) as u32
            }
        };
        table.slots[slot as usize].path = Some(path.clone());
        let generation = table.slots[slot as usize].generation;

        let evicted = table.by_path.insert(path.clone(), slot);
        for (_, stale) in evicted {
            table.vacate(stale);
        }
        Ok(PathHandle { slot, generation })
    }

    /// The path a handle currently resolves to. Fails with PathNotFound once
    /// the handle has been released or evicted.
    pub fn resolve(&self, handle: PathHandle) -> Result<Path> {
        let mut table = self.lock()?;
        let path = table
            .live(handle)
            .cloned()
            .ok_or_else(|| StoreError::PathNotFound("stale path handle".into()))?;
        table.by_path.get(&path);
        Ok(path)
    }

    pub fn release(&self, handle: PathHandle) -> Result<()> {
        let mut table = self.lock()?;
        if let Some(path) = table.live(handle).cloned() {
            table.by_path.remove(&path);
            table.vacate(handle.slot);
        }
        Ok(())
    }

    /// Rebinds every live handle at or beneath `from` to the matching
    /// position beneath `to`. Returns how many handles moved.
    pub fn rebind_subtree(&self, from: &Path, to: &Path) -> Result<usize> {
        let mut table = self.lock()?;
        let moved = table.by_path.remove_where(|p| from.contains(p));
        let count = moved.len();

        for (old, slot) in moved {
            let Some(new_path) = old.rebase(from, to) else {
                continue;
            };
            // A handle already bound at the destination is superseded
            if let Some(stale) = table.by_path.remove(&new_path) {
                table.vacate(stale);
            }
            table.slots[slot as usize].path = Some(new_path.clone());
            let evicted = table.by_path.insert(new_path, slot);
            for (_, stale) in evicted {
                table.vacate(stale);
            }
        }
        Ok(count)
    }

    /// Releases every handle at or beneath `path`
    pub fn release_subtree(&self, path: &Path) -> Result<()> {
        let mut table = self.lock()?;
        let released = table.by_path.remove_where(|p| path.contains(p));
        for (_, slot) in released {
            table.vacate(slot);
        }
        Ok(())
    }

    pub fn live_count(&self) -> usize {
        self.lock().map(|t| t.by_path.len()).unwrap_or(0)
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new(DEFAULT_HANDLE_CAPACITY)
    }
}
