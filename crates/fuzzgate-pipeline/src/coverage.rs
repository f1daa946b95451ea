//! Coverage side path for harnesses that reached `Success`.
//!
//! Builds a `-fprofile-instr-generate` variant of the harness next to the
//! fuzz binary and runs it once with `LLVM_PROFILE_FILE` set. The profile is
//! collected but not analysed, and nothing here affects the reward.

use fuzzgate_core::{ArtifactKind, CandidateId, GateResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::command::BuildMode;
use crate::compile::{BuildTarget, BuildTree};
use crate::fuzz::{CoverageRun, FuzzInputs, RunBudget};
use crate::pipeline::EvaluationPipeline;
use crate::runner::{retry_on_spawn_failure, RetryPolicy};

/// Result of one coverage build and run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub id: CandidateId,
    pub build: GateResult,
    /// `None` when the build did not pass.
    pub run: Option<CoverageRun>,
}

impl EvaluationPipeline {
    /// Build and run the coverage variant of an already written harness.
    pub async fn run_coverage(&self, id: &CandidateId, retry: &RetryPolicy) -> CoverageReport {
        let report = |build: GateResult| CoverageReport {
            id: id.clone(),
            build,
            run: None,
        };

        let (source, kind) = match self.store.locate_harness(id) {
            Ok(found) => found,
            Err(e) => return report(GateResult::InfrastructureError(e.to_string())),
        };
        let tree = match BuildTree::resolve(&self.store, &id.project) {
            Ok(tree) => tree,
            Err(e) => return report(GateResult::InfrastructureError(e.to_string())),
        };
        let layout = self.store.layout();
        let target_source_dir = self
            .store
            .resolve(&layout.target_source_dir(&id.project))
            .ok();
        if target_source_dir.is_none() {
            debug!(project = %id.project, "no target source tree for coverage build");
        }

        let output = layout.path(id, ArtifactKind::CoverageBinary);
        let target = BuildTarget {
            source: &source,
            kind,
            output: &output,
            target_source_dir: target_source_dir.as_deref(),
        };
        let build = retry_on_spawn_failure(retry, || {
            self.compile
                .build(&self.store, BuildMode::Coverage, &tree, target)
        })
        .await
        .unwrap_or_else(|e| GateResult::InfrastructureError(e.to_string()));
        if !build.is_pass() {
            warn!(candidate = %id, "coverage build failed");
            return report(build);
        }

        let budget = RunBudget {
            max_runs: self.config.coverage.max_runs,
            max_wall_secs: self.config.coverage.max_total_time_secs,
        };
        let inputs = FuzzInputs::resolve(&self.store, &id.project);
        let output_dir = layout.path(id, ArtifactKind::CoverageOutput);
        let run = retry_on_spawn_failure(retry, || {
            self.fuzz
                .run_coverage(&self.store, &output, &inputs, &output_dir, budget)
        })
        .await;

        match run {
            Ok(run) => CoverageReport {
                id: id.clone(),
                build,
                run: Some(run),
            },
            Err(e) => {
                warn!(candidate = %id, error = %e, "coverage run failed");
                report(build)
            }
        }
    }
}
