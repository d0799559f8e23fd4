//! Content File Store
//!
//! Maps cache records to uniquely-named content files under a base
//! directory: naming, unlinking, and directory listing. The chunked
//! byte transfer itself lives on the record.

use std::fs;
use std::path::{Path, PathBuf};

/// Extension shared by every content file.
pub const CONTENT_FILE_EXT: &str = "dcf";

/// Content file placement under a configurable base directory.
#[derive(Debug, Clone)]
pub struct ContentStore {
    base: PathBuf,
}

impl ContentStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Point the store at a new directory, creating it if needed.
    pub fn set_base(&mut self, base: PathBuf) {
        if let Err(err) = fs::create_dir_all(&base) {
            tracing::warn!("failed to create cache directory {:?}: {}", base, err);
        }
        self.base = base;
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.base.join(name)
    }

    /// Next content file name: 8-digit zero-padded counter plus the fixed
    /// extension. The counter wraps at `i32::MAX` like the original engine.
    pub fn make_file_name(counter: &mut i32) -> String {
        let name = format!("{:08}.{}", counter, CONTENT_FILE_EXT);
        *counter = if *counter == i32::MAX { 0 } else { *counter + 1 };
        name
    }

    pub fn unlink(&self, name: &str) {
        if name.is_empty() {
            return;
        }
        let path = self.file_path(name);
        if let Err(err) = fs::remove_file(&path) {
            tracing::debug!("unlink {:?} failed: {}", path, err);
        }
    }

    /// All content file names currently present on disk.
    pub fn list_content_files(&self) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(entries) = fs::read_dir(&self.base) else {
            return names;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_content = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| ext == CONTENT_FILE_EXT)
                .unwrap_or(false);
            if !is_content {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_sequence() {
        let mut counter = 0;
        assert_eq!(ContentStore::make_file_name(&mut counter), "00000000.dcf");
        assert_eq!(ContentStore::make_file_name(&mut counter), "00000001.dcf");
        assert_eq!(counter, 2);
    }

    #[test]
    fn test_file_name_wraps() {
        let mut counter = i32::MAX;
        let name = ContentStore::make_file_name(&mut counter);
        assert_eq!(name, format!("{:08}.dcf", i32::MAX));
        assert_eq!(counter, 0);
    }

    #[test]
    fn test_list_and_unlink() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().to_path_buf());

        fs::write(store.file_path("00000001.dcf"), b"a").unwrap();
        fs::write(store.file_path("00000002.dcf"), b"b").unwrap();
        fs::write(store.file_path("cache.fat"), b"x").unwrap();

        let mut names = store.list_content_files();
        names.sort();
        assert_eq!(names, vec!["00000001.dcf", "00000002.dcf"]);

        store.unlink("00000001.dcf");
        assert_eq!(store.list_content_files(), vec!["00000002.dcf"]);
    }

    #[test]
    fn test_missing_directory_lists_empty() {
        let store = ContentStore::new(PathBuf::from("/nonexistent/kite-cache"));
        assert!(store.list_content_files().is_empty());
    }
}
