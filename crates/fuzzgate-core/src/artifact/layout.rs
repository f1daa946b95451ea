//! Deterministic artifact paths.
//!
//! Layout under the workspace root:
//!
//! ```text
//! build/<project>/{include,lib,corpus,fuzzer.dict,src/<project>}   (input, any casing)
//! projects/<project>/harnesses/harness_EEEEE/id_CCCCC.{cpp,c}
//! projects/<project>/harnesses/harness_EEEEE/log_id_CCCCC.{txt,json}
//! projects/<project>/work/fuzzer/fuzzer_EEEEE/id_CCCCC
//! projects/<project>/work/fuzzer/fuzzer_EEEEE/id_cov_CCCCC
//! projects/<project>/work/fuzzer_output/fuzzer_output_EEEEE/id_CCCCC/
//! projects/<project>/work/fuzzer_output/fuzzer_output_EEEEE/id_cov_CCCCC/
//! ```
//!
//! Output trees use the lowercased project name.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::candidate::{CandidateId, SourceKind};

/// Kind of per-candidate artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    HarnessSource(SourceKind),
    EvaluationLog,
    EvaluationRecord,
    FuzzBinary,
    CoverageBinary,
    FuzzOutput,
    CoverageOutput,
}

/// Path builder rooted at a workspace directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `build/<project>` before case-insensitive resolution.
    pub fn build_dir(&self, project: &str) -> PathBuf {
        self.root.join("build").join(project)
    }

    pub fn include_dir(&self, project: &str) -> PathBuf {
        self.build_dir(project).join("include")
    }

    pub fn lib_dir(&self, project: &str) -> PathBuf {
        self.build_dir(project).join("lib")
    }

    pub fn corpus_dir(&self, project: &str) -> PathBuf {
        self.build_dir(project).join("corpus")
    }

    pub fn dictionary(&self, project: &str) -> PathBuf {
        self.build_dir(project).join("fuzzer.dict")
    }

    /// The target's own sources, exposed to coverage builds.
    pub fn target_source_dir(&self, project: &str) -> PathBuf {
        self.build_dir(project).join("src").join(project)
    }

    /// `projects/<project>`, lowercased.
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join("projects").join(project.to_lowercase())
    }

    /// Project metadata file (`data.json`) written by the static analysis step.
    pub fn metadata_file(&self, project: &str) -> PathBuf {
        self.project_dir(project).join("data.json")
    }

    pub fn harness_dir(&self, id: &CandidateId) -> PathBuf {
        self.project_dir(&id.project)
            .join("harnesses")
            .join(format!("harness_{:05}", id.epoch))
    }

    pub fn fuzzer_dir(&self, id: &CandidateId) -> PathBuf {
        self.project_dir(&id.project)
            .join("work")
            .join("fuzzer")
            .join(format!("fuzzer_{:05}", id.epoch))
    }

    pub fn fuzzer_output_dir(&self, id: &CandidateId) -> PathBuf {
        self.project_dir(&id.project)
            .join("work")
            .join("fuzzer_output")
            .join(format!("fuzzer_output_{:05}", id.epoch))
    }

    /// Deterministic path of one artifact.
    pub fn path(&self, id: &CandidateId, kind: ArtifactKind) -> PathBuf {
        let c = id.completion;
        match kind {
            ArtifactKind::HarnessSource(source) => self
                .harness_dir(id)
                .join(format!("id_{c:05}.{}", source.extension())),
            ArtifactKind::EvaluationLog => self.harness_dir(id).join(format!("log_id_{c:05}.txt")),
            ArtifactKind::EvaluationRecord => {
                self.harness_dir(id).join(format!("log_id_{c:05}.json"))
            }
            ArtifactKind::FuzzBinary => self.fuzzer_dir(id).join(format!("id_{c:05}")),
            ArtifactKind::CoverageBinary => self.fuzzer_dir(id).join(format!("id_cov_{c:05}")),
            ArtifactKind::FuzzOutput => self.fuzzer_output_dir(id).join(format!("id_{c:05}")),
            ArtifactKind::CoverageOutput => {
                self.fuzzer_output_dir(id).join(format!("id_cov_{c:05}"))
            }
        }
    }
}
