use crate::alloc::Extent;
use crate::error::{FsError, Result};
use std::collections::HashMap;

/// A named file and the blocks it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub extent: Extent,
}

/// Flat namespace mapping file names to extents, kept in creation order.
#[derive(Debug, Default)]
pub struct Directory {
    entries: Vec<DirEntry>,
    // name -> index into entries
    index_map: HashMap<String, usize>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, extent: Extent) -> Result<()> {
        if self.index_map.contains_key(name) {
            return Err(FsError::DuplicateName(name.to_string()));
        }
        self.entries.push(DirEntry {
            name: name.to_string(),
            extent,
        });
        self.index_map
            .insert(name.to_string(), self.entries.len() - 1);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&DirEntry> {
        self.index_map
            .get(name)
            .map(|&idx| &self.entries[idx])
            .ok_or_else(|| FsError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_map.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_entries_can_be_looked_up() {
        let mut dir = Directory::new();
        dir.insert("file1", Extent::new(1, 2)).unwrap();
        dir.insert("file2", Extent::new(3, 3)).unwrap();

        assert_eq!(dir.lookup("file2").unwrap().extent, Extent::new(3, 3));
        assert!(dir.contains("file1"));
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut dir = Directory::new();
        dir.insert("file1", Extent::new(1, 2)).unwrap();

        match dir.insert("file1", Extent::new(5, 1)) {
            Err(FsError::DuplicateName(name)) => assert_eq!(name, "file1"),
            other => panic!("expected DuplicateName, got {:?}", other),
        }
        // The original entry is untouched.
        assert_eq!(dir.lookup("file1").unwrap().extent, Extent::new(1, 2));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn missing_name_is_not_found() {
        let dir = Directory::new();
        assert!(dir.is_empty());
        assert!(matches!(dir.lookup("nope"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn iteration_follows_creation_order() {
        let mut dir = Directory::new();
        for (i, name) in ["c", "a", "b"].iter().enumerate() {
            dir.insert(name, Extent::new(i + 1, 1)).unwrap();
        }
        let names: Vec<&str> = dir.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }
}
