// files.rs — read-only file access for asset loading.
//
// The engine proper layers pak archives and mod directories on top of this;
// the renderer core only needs "give me the bytes for this path". Paths use
// forward slashes and are relative to the game data root.

use std::collections::HashMap;
use std::path::PathBuf;

/// Read-only file source the renderer loads assets through.
pub trait FileSystem {
    /// Load an entire file, or None if it does not exist.
    fn load_file(&self, path: &str) -> Option<Vec<u8>>;
}

/// File source rooted at an OS directory.
pub struct DirFileSystem {
    base: PathBuf,
}

impl DirFileSystem {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl FileSystem for DirFileSystem {
    fn load_file(&self, path: &str) -> Option<Vec<u8>> {
        let normalized = path.replace('\\', "/");
        let full = self.base.join(&normalized);
        match std::fs::read(&full) {
            Ok(data) => Some(data),
            Err(_) => {
                log::debug!("fs_load_file: can't find {}", normalized);
                None
            }
        }
    }
}

/// In-memory file source for tests and embedded assets.
#[derive(Default)]
pub struct MemoryFileSystem {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, data: Vec<u8>) {
        self.files.insert(path.into().replace('\\', "/"), data);
    }
}

impl FileSystem for MemoryFileSystem {
    fn load_file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(&path.replace('\\', "/")).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_fs_round_trip() {
        let mut fs = MemoryFileSystem::new();
        fs.insert("textures/base/wall.tga", vec![1, 2, 3]);
        assert_eq!(fs.load_file("textures/base/wall.tga"), Some(vec![1, 2, 3]));
        assert_eq!(fs.load_file("textures\\base\\wall.tga"), Some(vec![1, 2, 3]));
        assert_eq!(fs.load_file("missing.tga"), None);
    }
}
