use crate::alloc::Extent;
use crate::error::{FsError, Result};
use log::debug;
use std::collections::HashMap;
use std::fmt;

/// Opaque reference to a system open-file table entry.
///
/// A handle names a slot together with the generation the slot had when the
/// entry was created. Once the entry is removed the handle stays invalid for
/// good, even after the slot is reused for another file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    slot: u32,
    generation: u32,
}

impl Handle {
    pub fn slot(&self) -> usize {
        self.slot as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

/// A file open by at least one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemEntry {
    pub name: String,
    /// Copied from the directory when the file was first opened.
    pub extent: Extent,
    pub open_count: usize,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<SystemEntry>,
}

/// System-wide open-file table, one entry per distinct open file.
#[derive(Debug, Default)]
pub struct SystemTable {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    by_name: HashMap<String, Handle>,
}

impl SystemTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps the open count of `name`, inserting it with `extent` if it is not
    /// open yet.
    pub fn acquire(&mut self, name: &str, extent: Extent) -> Handle {
        if let Some(&handle) = self.by_name.get(name) {
            if let Some(entry) = self.entry_mut(handle) {
                entry.open_count += 1;
                debug!("{} open count now {}", name, entry.open_count);
                return handle;
            }
        }

        let entry = SystemEntry {
            name: name.to_string(),
            extent,
            open_count: 1,
        };
        let handle = match self.vacant.pop() {
            Some(slot) => {
                let slot_ref = &mut self.slots[slot as usize];
                slot_ref.generation = slot_ref.generation.wrapping_add(1);
                slot_ref.entry = Some(entry);
                Handle {
                    slot,
                    generation: slot_ref.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                Handle {
                    slot: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        self.by_name.insert(name.to_string(), handle);
        debug!("{} entered system table as {}", name, handle);
        handle
    }

    /// Drops one reference and returns how many remain. The entry is removed
    /// when none do.
    pub fn release(&mut self, handle: Handle) -> Result<usize> {
        let entry = self
            .entry_mut(handle)
            .ok_or(FsError::StaleHandle(handle))?;
        entry.open_count -= 1;
        let remaining = entry.open_count;

        if remaining == 0 {
            let slot = &mut self.slots[handle.slot()];
            if let Some(entry) = slot.entry.take() {
                self.by_name.remove(&entry.name);
                debug!("{} left system table, slot {} vacant", entry.name, handle.slot);
            }
            self.vacant.push(handle.slot);
        }
        Ok(remaining)
    }

    pub fn get(&self, handle: Handle) -> Result<&SystemEntry> {
        self.slots
            .get(handle.slot())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(FsError::StaleHandle(handle))
    }

    /// Number of holders of `name`, zero when it is not open.
    pub fn open_count(&self, name: &str) -> usize {
        self.by_name
            .get(name)
            .and_then(|&handle| self.get(handle).ok())
            .map_or(0, |entry| entry.open_count)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn entry_mut(&mut self, handle: Handle) -> Option<&mut SystemEntry> {
        self.slots
            .get_mut(handle.slot())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }
}
