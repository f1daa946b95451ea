//! In-memory fakes for the filesystem view (testing only)

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::resolve::FsView;

/// In-memory directory tree backed by a sorted set of paths.
///
/// Adding a path implicitly adds all of its ancestors.
#[derive(Debug, Default)]
pub struct MemoryFs {
    entries: Mutex<BTreeSet<PathBuf>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>) {
        self.add_dir(path);
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut entries = self.entries.lock().unwrap();
        for ancestor in path.as_ref().ancestors() {
            if !ancestor.as_os_str().is_empty() {
                entries.insert(ancestor.to_path_buf());
            }
        }
    }
}

impl FsView for MemoryFs {
    fn exists(&self, path: &Path) -> bool {
        self.entries.lock().unwrap().contains(path)
    }

    fn list_dir(&self, dir: &Path) -> std::io::Result<Vec<OsString>> {
        let entries = self.entries.lock().unwrap();
        if !entries.contains(dir) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not in memory tree", dir.display()),
            ));
        }
        Ok(entries
            .iter()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name().map(|n| n.to_os_string()))
            .collect())
    }
}
