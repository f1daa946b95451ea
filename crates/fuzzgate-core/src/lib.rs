//! fuzzgate core library
//!
//! Synchronous building blocks of the harness evaluation pipeline: artifact
//! paths, candidates, project metadata, gate outcomes, reward scoring and
//! evaluation records. Process orchestration lives in `fuzzgate-pipeline`.

pub mod artifact;
pub mod candidate;
pub mod config;
pub mod error;
pub mod gate;
pub mod logger;
pub mod metadata;
pub mod obs;
pub mod record;
pub mod scorer;
pub mod telemetry;

pub use artifact::{
    find_header_names, find_index, resolve_case_insensitive, ArtifactKind, ArtifactLayout,
    ArtifactStore, FsView, RealFs,
};
pub use candidate::{
    digest_source, extract_harness_source, Candidate, CandidateId, IncludeRewrite, SourceKind,
};
pub use config::{CoverageConfig, FuzzConfig, FuzzgateConfig, SchedulerConfig, ToolchainConfig};
pub use error::{FuzzgateError, Result};
pub use gate::{GateChain, GateKind, GateOutcome, GateResult, TerminalState};
pub use logger::{summarize, EvaluationLogger, RewardSummary};
pub use metadata::ProjectMetadata;
pub use record::{LogEntry, RewardRecord};
pub use scorer::{match_apis, LoopCounter, RewardPolicy, RewardScorer, StructureMetric};
pub use telemetry::init_tracing;
