use crate::error::{FsError, Result};
use crate::table::Handle;
use std::collections::HashMap;

/// Dense process index, starting at 0.
pub type ProcessId = usize;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OpenOutcome {
    /// The process already had the file open under this handle.
    Existing(Handle),
    Inserted,
}

/// Files open by one process, keyed by name.
#[derive(Debug)]
pub struct ProcessTable {
    pid: ProcessId,
    open_files: HashMap<String, Handle>,
}

impl ProcessTable {
    pub fn new(pid: ProcessId) -> Self {
        Self {
            pid,
            open_files: HashMap::new(),
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Records `handle` for `name` unless the process already holds the name, in
    /// which case the existing handle is returned and nothing changes.
    pub fn open_entry(&mut self, name: &str, handle: Handle) -> OpenOutcome {
        if let Some(&existing) = self.open_files.get(name) {
            return OpenOutcome::Existing(existing);
        }
        self.open_files.insert(name.to_string(), handle);
        OpenOutcome::Inserted
    }

    /// Forgets `name` and hands back the handle that has to be released.
    pub fn close_entry(&mut self, name: &str) -> Result<Handle> {
        self.open_files.remove(name).ok_or_else(|| self.not_open(name))
    }

    pub fn handle(&self, name: &str) -> Result<Handle> {
        self.open_files
            .get(name)
            .copied()
            .ok_or_else(|| self.not_open(name))
    }

    pub fn len(&self) -> usize {
        self.open_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open_files.is_empty()
    }

    fn not_open(&self, name: &str) -> FsError {
        FsError::NotOpen {
            pid: self.pid,
            name: name.to_string(),
        }
    }
}

/// Every registered process's table, indexed by process id.
#[derive(Debug)]
pub struct ProcessRegistry {
    tables: Vec<ProcessTable>,
}

impl ProcessRegistry {
    /// Starts with process 0 already registered.
    pub fn new() -> Self {
        Self {
            tables: vec![ProcessTable::new(0)],
        }
    }

    pub fn register(&mut self) -> ProcessId {
        let pid = self.tables.len();
        self.tables.push(ProcessTable::new(pid));
        pid
    }

    pub fn get(&self, pid: ProcessId) -> Result<&ProcessTable> {
        self.tables.get(pid).ok_or(FsError::InvalidProcess(pid))
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> Result<&mut ProcessTable> {
        self.tables.get_mut(pid).ok_or(FsError::InvalidProcess(pid))
    }

    /// Number of processes holding `handle`.
    pub fn holders(&self, handle: Handle) -> usize {
        self.tables
            .iter()
            .filter(|table| table.open_files.values().any(|&h| h == handle))
            .count()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}
