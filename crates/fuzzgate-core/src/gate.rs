//! Gate outcomes and the ordered chain they form.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The gates of the primary pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Syntax,
    Utility,
    Compile,
    Fuzz,
}

impl GateKind {
    pub const ORDER: [GateKind; 4] = [
        GateKind::Syntax,
        GateKind::Utility,
        GateKind::Compile,
        GateKind::Fuzz,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GateKind::Syntax => "syntax",
            GateKind::Utility => "utility",
            GateKind::Compile => "compile",
            GateKind::Fuzz => "fuzz",
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum GateResult {
    Pass,
    /// The candidate was judged and rejected. Carries raw tool output.
    Fail(String),
    /// The gate could not judge the candidate (missing file, unresolvable
    /// path, spawn failure).
    InfrastructureError(String),
}

impl GateResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateResult::Pass)
    }

    /// Diagnostic text, empty for `Pass`.
    pub fn diagnostic(&self) -> &str {
        match self {
            GateResult::Pass => "",
            GateResult::Fail(text) | GateResult::InfrastructureError(text) => text,
        }
    }
}

/// A gate result tagged with the gate that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub gate: GateKind,
    pub result: GateResult,
    pub duration_ms: u64,
}

/// Terminal state of an evaluation, one per reward tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    SyntaxFail,
    UtilityFail,
    CompileFail,
    FuzzFail,
    Success,
}

impl TerminalState {
    pub fn name(&self) -> &'static str {
        match self {
            TerminalState::SyntaxFail => "syntax_fail",
            TerminalState::UtilityFail => "utility_fail",
            TerminalState::CompileFail => "compile_fail",
            TerminalState::FuzzFail => "fuzz_fail",
            TerminalState::Success => "success",
        }
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered outcomes of the gates that actually ran.
///
/// Pushing enforces the pipeline order: each gate must follow the previous
/// one and nothing may follow a non-passing gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GateChain {
    outcomes: Vec<GateOutcome>,
}

impl GateChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an outcome. Returns `false` (and drops it) if the gate is out of
    /// order or the chain is already terminated.
    pub fn push(&mut self, outcome: GateOutcome) -> bool {
        if self.is_terminated() {
            return false;
        }
        let expected = GateKind::ORDER.get(self.outcomes.len());
        if expected != Some(&outcome.gate) {
            return false;
        }
        self.outcomes.push(outcome);
        true
    }

    pub fn outcomes(&self) -> &[GateOutcome] {
        &self.outcomes
    }

    /// The first non-passing outcome, if any.
    pub fn failure(&self) -> Option<&GateOutcome> {
        self.outcomes.iter().find(|o| !o.result.is_pass())
    }

    pub fn is_terminated(&self) -> bool {
        self.failure().is_some() || self.outcomes.len() == GateKind::ORDER.len()
    }

    /// Diagnostic of the failing gate, or empty.
    pub fn diagnostic(&self) -> &str {
        self.failure().map(|o| o.result.diagnostic()).unwrap_or("")
    }

    /// Terminal state once the chain has ended.
    ///
    /// Infrastructure errors score at the most negative floor whichever gate
    /// raised them. `None` while gates are still pending.
    pub fn terminal_state(&self) -> Option<TerminalState> {
        if let Some(failed) = self.failure() {
            if matches!(failed.result, GateResult::InfrastructureError(_)) {
                return Some(TerminalState::SyntaxFail);
            }
            return Some(match failed.gate {
                GateKind::Syntax => TerminalState::SyntaxFail,
                GateKind::Utility => TerminalState::UtilityFail,
                GateKind::Compile => TerminalState::CompileFail,
                GateKind::Fuzz => TerminalState::FuzzFail,
            });
        }
        (self.outcomes.len() == GateKind::ORDER.len()).then_some(TerminalState::Success)
    }
}
