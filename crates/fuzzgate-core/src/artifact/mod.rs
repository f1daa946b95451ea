//! Artifact storage for per-candidate files.
//!
//! # Modules
//!
//! - [`layout`]: `ArtifactLayout`, `ArtifactKind` (deterministic paths)
//! - [`resolve`]: `FsView`, `resolve_case_insensitive()`
//! - [`fakes`]: `MemoryFs` for resolver tests

pub mod fakes;
pub mod layout;
pub mod resolve;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::candidate::{Candidate, CandidateId, SourceKind};
use crate::error::{FuzzgateError, Result};

pub use layout::{ArtifactKind, ArtifactLayout};
pub use resolve::{resolve_case_insensitive, FsView, RealFs};

const HEADER_EXTENSIONS: [&str; 4] = ["h", "hpp", "hxx", "hh"];

/// Filesystem-backed artifact store rooted at a workspace directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: ArtifactLayout,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: ArtifactLayout::new(root),
        }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Case-insensitive lookup on the real filesystem.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        resolve_case_insensitive(&RealFs, path)
    }

    /// Create the parent directories of `path`. Idempotent.
    pub fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Remove a file, symlink or directory tree. No-op when absent.
    pub fn delete(&self, path: &Path) -> Result<()> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
        debug!(path = %path.display(), "deleted stale artifact");
        Ok(())
    }

    /// Write `contents` to `path`, replacing any previous file atomically.
    pub fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.ensure_dir(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(contents)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Write a candidate's source to its harness path.
    ///
    /// A stale harness of the other source kind is removed so later probing
    /// sees exactly one file.
    pub fn write_candidate(&self, candidate: &Candidate) -> Result<PathBuf> {
        let id = candidate.id();
        for kind in SourceKind::PROBE_ORDER {
            if kind != candidate.kind() {
                self.delete(&self.layout.path(id, ArtifactKind::HarnessSource(kind)))?;
            }
        }
        let path = self
            .layout
            .path(id, ArtifactKind::HarnessSource(candidate.kind()));
        self.write_atomic(&path, candidate.source().as_bytes())?;
        Ok(path)
    }

    /// Locate a written harness, preferring `.cpp` over `.c`.
    pub fn locate_harness(&self, id: &CandidateId) -> Result<(PathBuf, SourceKind)> {
        let dir = self
            .resolve(&self.layout.harness_dir(id))
            .map_err(|_| missing_harness(id))?;
        for kind in SourceKind::PROBE_ORDER {
            let name = self.layout.path(id, ArtifactKind::HarnessSource(kind));
            if let Some(file_name) = name.file_name() {
                let candidate = dir.join(file_name);
                if candidate.is_file() {
                    return Ok((candidate, kind));
                }
            }
        }
        Err(missing_harness(id))
    }

    /// Create the per-project output skeleton. Existing content is kept.
    pub fn build_project_structure(&self, project: &str) -> Result<PathBuf> {
        let root = self.layout.project_dir(project);
        for sub in ["harnesses", "tem", "work/fuzzer", "work/fuzzer_output"] {
            fs::create_dir_all(root.join(sub))?;
        }
        Ok(root)
    }

    /// The `n` files in `dir` matching `pattern` whose trailing index is
    /// largest, newest first.
    ///
    /// Indices compare as strings, so zero-padded names sort correctly and
    /// `"00099" > "00098"` without parsing.
    pub fn newest_indexed(&self, dir: &Path, pattern: &str, n: usize) -> Result<Vec<PathBuf>> {
        if n == 0 {
            return Err(FuzzgateError::InvalidArgument(
                "n must be at least 1".to_string(),
            ));
        }
        let matcher = glob_to_regex(pattern)?;
        let mut indexed: Vec<(String, PathBuf)> = Vec::new();
        for entry in read_dir_checked(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !matcher.is_match(&name) {
                continue;
            }
            if let Some(index) = find_index(&name) {
                indexed.push((index, path));
            }
        }
        indexed.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(indexed.into_iter().take(n).map(|(_, p)| p).collect())
    }

    /// Next free `{prefix}{index:05}` name in `dir`.
    ///
    /// Files keep the extension of the highest existing entry; with
    /// `is_dir` the directory is created.
    pub fn next_indexed_name(&self, dir: &Path, prefix: &str, is_dir: bool) -> Result<PathBuf> {
        let pattern = Regex::new(&format!(r"^{}(\d+)$", regex::escape(prefix)))
            .map_err(|e| FuzzgateError::InvalidArgument(e.to_string()))?;
        let mut max_index: Option<u64> = None;
        let mut suffix = String::new();
        for entry in read_dir_checked(dir)? {
            let path = entry?.path();
            if path.is_dir() != is_dir {
                continue;
            }
            let stem = match path.file_stem() {
                Some(stem) if !is_dir => stem.to_string_lossy().to_string(),
                _ => path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            };
            let Some(caps) = pattern.captures(&stem) else {
                continue;
            };
            let Ok(index) = caps[1].parse::<u64>() else {
                continue;
            };
            if max_index.map_or(true, |m| index > m) {
                max_index = Some(index);
                suffix = if is_dir {
                    String::new()
                } else {
                    path.extension()
                        .map(|e| format!(".{}", e.to_string_lossy()))
                        .unwrap_or_default()
                };
            }
        }
        let next = max_index.map_or(0, |m| m + 1);
        let new_path = dir.join(format!("{prefix}{next:05}{suffix}"));
        if is_dir {
            fs::create_dir_all(&new_path)?;
        }
        Ok(new_path)
    }
}

/// Header file names in `dir`, sorted.
pub fn find_header_names(dir: &Path, recursive: bool) -> Result<Vec<String>> {
    let mut names = Vec::new();
    collect_headers(dir, recursive, &mut names)?;
    names.sort();
    Ok(names)
}

fn collect_headers(dir: &Path, recursive: bool, out: &mut Vec<String>) -> Result<()> {
    for entry in read_dir_checked(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                collect_headers(&path, recursive, out)?;
            }
            continue;
        }
        let is_header = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|e| HEADER_EXTENSIONS.contains(&e.as_str()));
        if is_header {
            if let Some(name) = path.file_name() {
                out.push(name.to_string_lossy().to_string());
            }
        }
    }
    Ok(())
}

/// Trailing digit run of a file name, before any extension, with leading
/// zeros kept.
pub fn find_index(file_name: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(\d+)(?:\..+)?$").expect("valid regex"));
    re.captures(file_name).map(|caps| caps[1].to_string())
}

fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| FuzzgateError::InvalidArgument(e.to_string()))
}

fn read_dir_checked(dir: &Path) -> Result<fs::ReadDir> {
    if !dir.is_dir() {
        return Err(FuzzgateError::NotADirectory(dir.to_path_buf()));
    }
    Ok(fs::read_dir(dir)?)
}

fn missing_harness(id: &CandidateId) -> FuzzgateError {
    FuzzgateError::MissingHarness {
        project: id.project.clone(),
        epoch: id.epoch,
        completion: id.completion,
    }
}
