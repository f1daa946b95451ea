//! Case-insensitive path resolution.
//!
//! Build trees produced by different upstream projects disagree on casing
//! (`cJSON/include` vs `cjson/Include`). Lookups walk from the deepest
//! ancestor that exists and match each remaining component against the
//! directory listing, ignoring case.

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{FuzzgateError, Result};

/// Read-only view of a directory tree.
pub trait FsView {
    fn exists(&self, path: &Path) -> bool;

    /// Names of the direct children of `dir`.
    fn list_dir(&self, dir: &Path) -> std::io::Result<Vec<OsString>>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFs;

impl FsView for RealFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_dir(&self, dir: &Path) -> std::io::Result<Vec<OsString>> {
        fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect()
    }
}

/// Resolve `path` to a real path, matching components case-insensitively.
///
/// An exact match always wins. When several children differ only in case,
/// the lexicographically smallest name is chosen so the result is stable.
pub fn resolve_case_insensitive(fs: &dyn FsView, path: &Path) -> Result<PathBuf> {
    if fs.exists(path) {
        return Ok(path.to_path_buf());
    }

    let anchor = path
        .ancestors()
        .skip(1)
        .find(|a| !a.as_os_str().is_empty() && fs.exists(a))
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let remainder = path.strip_prefix(&anchor).map_err(|_| FuzzgateError::NotFound {
        path: path.to_path_buf(),
    })?;

    let mut current = anchor;
    for component in remainder.components() {
        match component {
            Component::CurDir => continue,
            Component::ParentDir => {
                current.pop();
                continue;
            }
            Component::Normal(name) => {
                let exact = current.join(name);
                if fs.exists(&exact) {
                    current = exact;
                    continue;
                }
                let wanted = name.to_string_lossy().to_lowercase();
                let listing = fs.list_dir(dir_or_cwd(&current)).map_err(|_| {
                    FuzzgateError::NotFound {
                        path: path.to_path_buf(),
                    }
                })?;
                let mut matches: Vec<OsString> = listing
                    .into_iter()
                    .filter(|child| child.to_string_lossy().to_lowercase() == wanted)
                    .collect();
                matches.sort();
                match matches.into_iter().next() {
                    Some(child) => current.push(child),
                    None => {
                        return Err(FuzzgateError::NotFound {
                            path: path.to_path_buf(),
                        })
                    }
                }
            }
            Component::RootDir | Component::Prefix(_) => current.push(component.as_os_str()),
        }
    }

    Ok(current)
}

fn dir_or_cwd(dir: &Path) -> &Path {
    if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::fakes::MemoryFs;

    fn tree() -> MemoryFs {
        let fs = MemoryFs::new();
        fs.add_file("/ws/build/cJSON/include/cJSON.h");
        fs.add_file("/ws/build/cJSON/lib/libcjson.a");
        fs.add_dir("/ws/build/cJSON/Corpus");
        fs
    }

    #[test]
    fn test_exact_path_returned_unchanged() {
        let fs = tree();
        let got = resolve_case_insensitive(&fs, Path::new("/ws/build/cJSON/include")).unwrap();
        assert_eq!(got, PathBuf::from("/ws/build/cJSON/include"));
    }

    #[test]
    fn test_mixed_case_components_resolved() {
        let fs = tree();
        let got =
            resolve_case_insensitive(&fs, Path::new("/ws/BUILD/cjson/INCLUDE/cjson.h")).unwrap();
        assert_eq!(got, PathBuf::from("/ws/build/cJSON/include/cJSON.h"));
    }

    #[test]
    fn test_resolves_below_deepest_existing_ancestor() {
        let fs = tree();
        let got = resolve_case_insensitive(&fs, Path::new("/ws/build/cJSON/corpus")).unwrap();
        assert_eq!(got, PathBuf::from("/ws/build/cJSON/Corpus"));
    }

    #[test]
    fn test_missing_component_is_not_found() {
        let fs = tree();
        let err = resolve_case_insensitive(&fs, Path::new("/ws/build/cjson/fuzzer.dict"))
            .unwrap_err();
        match err {
            FuzzgateError::NotFound { path } => {
                assert_eq!(path, PathBuf::from("/ws/build/cjson/fuzzer.dict"))
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_ambiguous_case_picks_smallest_name() {
        let fs = MemoryFs::new();
        fs.add_dir("/ws/Lib");
        fs.add_dir("/ws/LIB");
        let got = resolve_case_insensitive(&fs, Path::new("/ws/lib")).unwrap();
        assert_eq!(got, PathBuf::from("/ws/LIB"));
    }

    #[test]
    fn test_real_fs_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Build/Proj/include")).unwrap();
        let got =
            resolve_case_insensitive(&RealFs, &dir.path().join("build/proj/INCLUDE")).unwrap();
        assert_eq!(got, dir.path().join("Build/Proj/include"));
    }
}
