//! Harness candidates and their identity.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity of one generated harness: `(project, epoch, completion)`.
///
/// Every artifact path is derived from this triple, so two candidates with
/// different `(epoch, completion)` never share a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateId {
    pub project: String,
    pub epoch: u32,
    pub completion: u32,
}

impl CandidateId {
    pub fn new(project: impl Into<String>, epoch: u32, completion: u32) -> Self {
        Self {
            project: project.into(),
            epoch,
            completion,
        }
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:05}:{:05}", self.project, self.epoch, self.completion)
    }
}

/// Source language of a harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Cpp,
    C,
}

impl SourceKind {
    /// Probe order when locating a harness on disk.
    pub const PROBE_ORDER: [SourceKind; 2] = [SourceKind::Cpp, SourceKind::C];

    pub fn extension(&self) -> &'static str {
        match self {
            SourceKind::Cpp => "cpp",
            SourceKind::C => "c",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "cpp" => Some(SourceKind::Cpp),
            "c" => Some(SourceKind::C),
            _ => None,
        }
    }
}

/// Literal text substitution applied to extracted harness source.
///
/// Used to normalise include spellings the model tends to get wrong, e.g.
/// `<cjson/cJSON.h>` when the build tree ships `<cJSON.h>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IncludeRewrite {
    pub from: String,
    pub to: String,
}

/// One harness under evaluation. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    id: CandidateId,
    source: String,
    kind: SourceKind,
}

impl Candidate {
    pub fn new(id: CandidateId, source: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id,
            source: source.into(),
            kind,
        }
    }

    /// Build a candidate from raw model output.
    ///
    /// The first fenced C++ block wins, then the first fenced C block, then
    /// the whole trimmed completion. Rewrites are applied afterwards in order.
    pub fn from_completion(id: CandidateId, completion: &str, rewrites: &[IncludeRewrite]) -> Self {
        let (mut source, kind) = extract_harness_source(completion);
        for rewrite in rewrites {
            source = source.replace(&rewrite.from, &rewrite.to);
        }
        Self::new(id, source, kind)
    }

    pub fn id(&self) -> &CandidateId {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Hex SHA-256 of the harness source.
    pub fn source_digest(&self) -> String {
        digest_source(&self.source)
    }
}

/// Hex SHA-256 of a source text.
pub fn digest_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

fn cpp_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:cpp|c\+\+|cxx)[ \t]*\r?\n?(.*?)```").expect("valid regex"))
}

fn c_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```c[ \t]*\r?\n(.*?)```").expect("valid regex"))
}

/// Extract harness source from a model completion.
pub fn extract_harness_source(completion: &str) -> (String, SourceKind) {
    if let Some(caps) = cpp_fence().captures(completion) {
        return (caps[1].trim().to_string(), SourceKind::Cpp);
    }
    if let Some(caps) = c_fence().captures(completion) {
        return (caps[1].trim().to_string(), SourceKind::C);
    }
    (completion.trim().to_string(), SourceKind::Cpp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_id_display_is_padded() {
        let id = CandidateId::new("cjson", 7, 42);
        assert_eq!(id.to_string(), "cjson:00007:00042");
    }

    #[test]
    fn test_extract_prefers_cpp_fence() {
        let text = "intro\n```c\nint c_version;\n```\n```cpp\nint cpp_version;\n```";
        let (source, kind) = extract_harness_source(text);
        assert_eq!(source, "int cpp_version;");
        assert_eq!(kind, SourceKind::Cpp);
    }

    #[test]
    fn test_extract_c_fence() {
        let text = "Here you go:\n```c\n#include <stdint.h>\nint x;\n```\nthanks";
        let (source, kind) = extract_harness_source(text);
        assert_eq!(source, "#include <stdint.h>\nint x;");
        assert_eq!(kind, SourceKind::C);
    }

    #[test]
    fn test_extract_unfenced_is_trimmed() {
        let (source, kind) = extract_harness_source("\n  int main() {}  \n");
        assert_eq!(source, "int main() {}");
        assert_eq!(kind, SourceKind::Cpp);
    }

    #[test]
    fn test_include_rewrite_applied() {
        let rewrites = vec![IncludeRewrite {
            from: "<cjson/cJSON.h>".to_string(),
            to: "<cJSON.h>".to_string(),
        }];
        let candidate = Candidate::from_completion(
            CandidateId::new("cjson", 1, 0),
            "```cpp\n#include <cjson/cJSON.h>\n```",
            &rewrites,
        );
        assert_eq!(candidate.source(), "#include <cJSON.h>");
    }

    #[test]
    fn test_source_kind_from_path() {
        assert_eq!(
            SourceKind::from_path(Path::new("id_00001.cpp")),
            Some(SourceKind::Cpp)
        );
        assert_eq!(SourceKind::from_path(Path::new("id_00001.c")), Some(SourceKind::C));
        assert_eq!(SourceKind::from_path(Path::new("id_00001.h")), None);
    }

    #[test]
    fn test_source_digest_is_stable() {
        let a = Candidate::new(CandidateId::new("p", 0, 0), "int x;", SourceKind::Cpp);
        let b = Candidate::new(CandidateId::new("p", 9, 9), "int x;", SourceKind::Cpp);
        assert_eq!(a.source_digest(), b.source_digest());
        assert_eq!(a.source_digest().len(), 64);
    }
}
