//! Structured lifecycle events for candidate evaluation.
//!
//! Every event carries an `event` field (`candidate.started`,
//! `gate.evaluated`, ...) so JSON logs can be filtered without parsing
//! messages.

use tracing::{info, warn};

use crate::candidate::CandidateId;
use crate::gate::{GateKind, GateResult, TerminalState};

/// Span tagging events with the candidate. Use with
/// `tracing::Instrument` across `.await` points.
pub fn candidate_span(id: &CandidateId) -> tracing::Span {
    tracing::info_span!(
        "fuzzgate.candidate",
        project = %id.project,
        epoch = id.epoch,
        completion = id.completion,
    )
}

/// RAII guard that enters [`candidate_span`] in synchronous code.
///
/// ```ignore
/// let _span = CandidateSpan::enter(&id);
/// // every event below is tagged with the candidate
/// ```
pub struct CandidateSpan {
    _span: tracing::span::EnteredSpan,
}

impl CandidateSpan {
    pub fn enter(id: &CandidateId) -> Self {
        Self {
            _span: candidate_span(id).entered(),
        }
    }
}

pub fn emit_candidate_started(id: &CandidateId) {
    info!(event = "candidate.started", candidate = %id);
}

/// Gate finished. Failures are logged without their diagnostic; the full
/// text goes to the evaluation log.
pub fn emit_gate_evaluated(id: &CandidateId, gate: GateKind, result: &GateResult, duration_ms: u64) {
    let status = match result {
        GateResult::Pass => "pass",
        GateResult::Fail(_) => "fail",
        GateResult::InfrastructureError(_) => "infrastructure_error",
    };
    info!(
        event = "gate.evaluated",
        candidate = %id,
        gate = %gate,
        status = status,
        duration_ms = duration_ms,
    );
}

pub fn emit_candidate_scored(id: &CandidateId, state: TerminalState, reward: f64) {
    info!(
        event = "candidate.scored",
        candidate = %id,
        state = %state,
        reward = reward,
    );
}

/// The fuzz child outlived its wall budget and was hard-killed.
pub fn emit_fuzz_killed(id: &CandidateId, waited_ms: u64) {
    warn!(event = "fuzz.killed", candidate = %id, waited_ms = waited_ms);
}

pub fn emit_batch_finished(size: usize, duration_ms: u64, mean_reward: f64) {
    info!(
        event = "batch.finished",
        size = size,
        duration_ms = duration_ms,
        mean_reward = mean_reward,
    );
}

/// Writing the evaluation record failed; the reward is still returned.
pub fn emit_record_write_error(id: &CandidateId, error: &dyn std::fmt::Display) {
    warn!(event = "record.write_error", candidate = %id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_span_create() {
        let _span = CandidateSpan::enter(&CandidateId::new("cjson", 0, 0));
        emit_candidate_started(&CandidateId::new("cjson", 0, 0));
    }
}
