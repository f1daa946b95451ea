//! fuzzgate pipeline
//!
//! Drives the external toolchain for candidate evaluation: syntax check,
//! API-diversity check, sanitized build, bounded fuzz run, scoring and
//! logging. Batches run concurrently behind a semaphore and the whole thing
//! is exposed to a trainer as a [`RewardTable`].

pub mod batch;
pub mod command;
pub mod compile;
pub mod coverage;
pub mod error;
pub mod fuzz;
pub mod pipeline;
pub mod registry;
pub mod runner;
pub mod session;
pub mod syntax;
pub mod utility;

pub use batch::{BatchEvaluator, BatchItem};
pub use command::{BuildMode, ToolCommand};
pub use compile::{BuildTarget, BuildTree, CompileGate};
pub use coverage::CoverageReport;
pub use error::{Result, RunnerError};
pub use fuzz::{scan_crashes, CoverageRun, FuzzInputs, FuzzOutcome, FuzzRunner, RunBudget};
pub use pipeline::EvaluationPipeline;
pub use registry::{ApiCoverageReward, HarnessReward, RewardFunction, RewardTable};
pub use runner::{retry_on_spawn_failure, run_captured, CapturedOutput, RetryPolicy};
pub use session::EvaluationSession;
pub use syntax::SyntaxGate;
pub use utility::UtilityGate;
