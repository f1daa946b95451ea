//! Staged evaluation of one candidate.
//!
//! ```text
//! write harness → syntax → utility → fuzz build → fuzz run → score → log
//! ```
//!
//! Gates run strictly in order and the first non-passing gate ends the
//! chain. Nothing here returns an error: every failure becomes a gate result
//! and every evaluation produces exactly one [`RewardRecord`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use fuzzgate_core::obs::{
    candidate_span, emit_candidate_scored, emit_candidate_started, emit_fuzz_killed,
    emit_gate_evaluated, emit_record_write_error, CandidateSpan,
};
use fuzzgate_core::{
    digest_source, ArtifactKind, ArtifactStore, Candidate, CandidateId, EvaluationLogger,
    FuzzgateConfig, GateChain, GateKind, GateOutcome, GateResult, ProjectMetadata, RewardRecord,
    RewardScorer, SourceKind, TerminalState,
};
use tracing::{info, Instrument};

use crate::command::BuildMode;
use crate::compile::{BuildTarget, BuildTree, CompileGate};
use crate::coverage::CoverageReport;
use crate::fuzz::{FuzzInputs, FuzzRunner};
use crate::runner::{retry_on_spawn_failure, RetryPolicy};
use crate::syntax::SyntaxGate;
use crate::utility::UtilityGate;

/// Everything one evaluation learned on its way through the gates.
#[derive(Debug, Default)]
struct GateRun {
    chain: GateChain,
    harness: Option<(PathBuf, SourceKind)>,
    source: String,
    matched_apis: Vec<String>,
}

/// Runs the gate chain for candidates of one project.
///
/// Shared read-only across concurrent evaluations; wrap in an `Arc`.
pub struct EvaluationPipeline {
    pub(crate) config: FuzzgateConfig,
    pub(crate) store: ArtifactStore,
    pub(crate) metadata: Arc<ProjectMetadata>,
    pub(crate) compile: CompileGate,
    pub(crate) fuzz: FuzzRunner,
    logger: EvaluationLogger,
    scorer: RewardScorer,
    syntax: SyntaxGate,
    utility: UtilityGate,
}

impl EvaluationPipeline {
    pub fn new(config: FuzzgateConfig, metadata: ProjectMetadata) -> Self {
        let store = ArtifactStore::new(&config.root);
        Self {
            logger: EvaluationLogger::new(store.clone()),
            scorer: RewardScorer::new(config.reward.clone()),
            syntax: SyntaxGate::new(config.toolchain.clone()),
            utility: UtilityGate::new(config.reward.min_distinct_apis),
            compile: CompileGate::new(config.toolchain.clone()),
            fuzz: FuzzRunner::new(config.fuzz.clone()),
            metadata: Arc::new(metadata),
            store,
            config,
        }
    }

    /// Replace the scorer, e.g. to plug in another structure metric.
    pub fn with_scorer(mut self, scorer: RewardScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &FuzzgateConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn metadata(&self) -> &ProjectMetadata {
        &self.metadata
    }

    /// Write `candidate` to its harness path and evaluate it once.
    pub async fn evaluate(&self, candidate: &Candidate, prompt: &str) -> RewardRecord {
        self.evaluate_with_retry(candidate, prompt, &RetryPolicy::none())
            .await
    }

    /// Like [`evaluate`](Self::evaluate), retrying tool spawns per `retry`.
    pub async fn evaluate_with_retry(
        &self,
        candidate: &Candidate,
        prompt: &str,
        retry: &RetryPolicy,
    ) -> RewardRecord {
        let record = self.score_with_retry(candidate, prompt, retry).await;
        if self.wants_coverage(&record) {
            self.coverage_side_path(&record.id, retry).await;
        }
        record
    }

    /// Write `candidate` and run the primary gates only. The record is final
    /// when this returns; the coverage side path is left to the caller.
    pub async fn score_with_retry(
        &self,
        candidate: &Candidate,
        prompt: &str,
        retry: &RetryPolicy,
    ) -> RewardRecord {
        let id = candidate.id();
        if let Err(e) = self.store.write_candidate(candidate) {
            let reason = format!("cannot write harness: {e}");
            return self.infrastructure_record(id, prompt, &reason);
        }
        self.score_existing_with_retry(id, prompt, retry).await
    }

    /// Evaluate a harness already on disk.
    pub async fn evaluate_existing(&self, id: &CandidateId, prompt: &str) -> RewardRecord {
        self.evaluate_existing_with_retry(id, prompt, &RetryPolicy::none())
            .await
    }

    pub async fn evaluate_existing_with_retry(
        &self,
        id: &CandidateId,
        prompt: &str,
        retry: &RetryPolicy,
    ) -> RewardRecord {
        let record = self.score_existing_with_retry(id, prompt, retry).await;
        if self.wants_coverage(&record) {
            self.coverage_side_path(id, retry).await;
        }
        record
    }

    async fn score_existing_with_retry(
        &self,
        id: &CandidateId,
        prompt: &str,
        retry: &RetryPolicy,
    ) -> RewardRecord {
        emit_candidate_started(id);
        let run = self
            .run_gates(id, retry)
            .instrument(candidate_span(id))
            .await;
        self.finish(id, run, prompt)
    }

    /// Whether `record` should go on to the coverage side path.
    pub fn wants_coverage(&self, record: &RewardRecord) -> bool {
        record.state == TerminalState::Success && self.config.coverage.enabled
    }

    /// Coverage build and run for a scored candidate. Never touches its record.
    pub async fn coverage_side_path(
        &self,
        id: &CandidateId,
        retry: &RetryPolicy,
    ) -> CoverageReport {
        let report = self
            .run_coverage(id, retry)
            .instrument(candidate_span(id))
            .await;
        info!(candidate = %id, build = ?report.build, "coverage side path finished");
        report
    }

    /// Score and log a candidate that never reached the gates (cancelled,
    /// task failure). Recorded as an infrastructure error at the first gate.
    pub fn infrastructure_record(
        &self,
        id: &CandidateId,
        prompt: &str,
        reason: &str,
    ) -> RewardRecord {
        let mut run = GateRun::default();
        run.chain.push(GateOutcome {
            gate: GateKind::Syntax,
            result: GateResult::InfrastructureError(reason.to_string()),
            duration_ms: 0,
        });
        self.finish(id, run, prompt)
    }

    async fn run_gates(&self, id: &CandidateId, retry: &RetryPolicy) -> GateRun {
        let mut run = GateRun::default();

        let started = Instant::now();
        let result = self.syntax_gate(id, retry, &mut run).await;
        if !record_gate(&mut run, id, GateKind::Syntax, result, started) {
            return run;
        }

        let started = Instant::now();
        let (result, matched) = self.utility.check(&run.source, &self.metadata.apis);
        run.matched_apis = matched;
        if !record_gate(&mut run, id, GateKind::Utility, result, started) {
            return run;
        }

        let started = Instant::now();
        let result = self.compile_gate(id, retry, &run).await;
        if !record_gate(&mut run, id, GateKind::Compile, result, started) {
            return run;
        }

        let started = Instant::now();
        let result = self.fuzz_gate(id, retry).await;
        record_gate(&mut run, id, GateKind::Fuzz, result, started);
        run
    }

    async fn syntax_gate(
        &self,
        id: &CandidateId,
        retry: &RetryPolicy,
        run: &mut GateRun,
    ) -> GateResult {
        let (path, kind) = match self.store.locate_harness(id) {
            Ok(found) => found,
            Err(e) => return GateResult::InfrastructureError(e.to_string()),
        };
        run.source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                return GateResult::InfrastructureError(format!(
                    "cannot read {}: {e}",
                    path.display()
                ))
            }
        };
        run.harness = Some((path.clone(), kind));

        let include_dir = self.store.layout().include_dir(&id.project);
        let include_dir = match self.store.resolve(&include_dir) {
            Ok(dir) => dir,
            Err(e) => return GateResult::InfrastructureError(e.to_string()),
        };
        fold(
            retry_on_spawn_failure(retry, || self.syntax.check(&path, kind, &include_dir)).await,
        )
    }

    async fn compile_gate(
        &self,
        id: &CandidateId,
        retry: &RetryPolicy,
        run: &GateRun,
    ) -> GateResult {
        let Some((source, kind)) = &run.harness else {
            return GateResult::InfrastructureError("harness was not located".to_string());
        };
        let tree = match BuildTree::resolve(&self.store, &id.project) {
            Ok(tree) => tree,
            Err(e) => return GateResult::InfrastructureError(e.to_string()),
        };
        let output = self.store.layout().path(id, ArtifactKind::FuzzBinary);
        let target = BuildTarget {
            source,
            kind: *kind,
            output: &output,
            target_source_dir: None,
        };
        fold(
            retry_on_spawn_failure(retry, || {
                self.compile.build(&self.store, BuildMode::Fuzz, &tree, target)
            })
            .await,
        )
    }

    async fn fuzz_gate(&self, id: &CandidateId, retry: &RetryPolicy) -> GateResult {
        let layout = self.store.layout();
        let binary = layout.path(id, ArtifactKind::FuzzBinary);
        let output_dir = layout.path(id, ArtifactKind::FuzzOutput);
        let inputs = FuzzInputs::resolve(&self.store, &id.project);
        let budget = self.fuzz.budget();

        let outcome = retry_on_spawn_failure(retry, || {
            self.fuzz
                .run(&self.store, &binary, &inputs, &output_dir, budget)
        })
        .await;
        match outcome {
            Ok(outcome) => {
                if outcome.killed {
                    emit_fuzz_killed(id, outcome.elapsed_ms);
                }
                outcome.gate_result()
            }
            Err(e) => GateResult::InfrastructureError(e.to_string()),
        }
    }

    /// Score the finished chain, persist the record and return it.
    fn finish(&self, id: &CandidateId, run: GateRun, prompt: &str) -> RewardRecord {
        let _span = CandidateSpan::enter(id);
        let state = run
            .chain
            .terminal_state()
            .unwrap_or(TerminalState::SyntaxFail);
        let reward = self.scorer.score(
            state,
            &run.source,
            run.matched_apis.len(),
            self.metadata.total_apis(),
        );
        let source_digest = if run.harness.is_some() {
            digest_source(&run.source)
        } else {
            String::new()
        };

        let record = RewardRecord {
            id: id.clone(),
            reward,
            state,
            chain: run.chain,
            matched_apis: run.matched_apis,
            prompt: prompt.to_string(),
            source_digest,
            evaluated_at: Utc::now(),
        };
        if let Err(e) = self.logger.write(&record) {
            emit_record_write_error(id, &e);
        }
        emit_candidate_scored(id, state, reward);
        record
    }
}

impl std::fmt::Debug for EvaluationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationPipeline")
            .field("root", &self.config.root)
            .field("apis", &self.metadata.total_apis())
            .field("scorer", &self.scorer)
            .finish()
    }
}

/// Spawn failures that survived every retry are infrastructure errors.
fn fold(result: crate::error::Result<GateResult>) -> GateResult {
    result.unwrap_or_else(|e| GateResult::InfrastructureError(e.to_string()))
}

fn record_gate(
    run: &mut GateRun,
    id: &CandidateId,
    gate: GateKind,
    result: GateResult,
    started: Instant,
) -> bool {
    let duration_ms = started.elapsed().as_millis() as u64;
    emit_gate_evaluated(id, gate, &result, duration_ms);
    let passed = result.is_pass();
    run.chain.push(GateOutcome {
        gate,
        result,
        duration_ms,
    });
    passed
}
