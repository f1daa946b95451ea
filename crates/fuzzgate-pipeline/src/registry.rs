//! Named reward functions for a training loop.
//!
//! The table is built once at startup and is read-only afterwards. The
//! trainer calls [`RewardTable::compute_all`] with each generation round and
//! gets one reward vector per function, each aligned with the completions.

use std::sync::Arc;

use async_trait::async_trait;
use fuzzgate_core::{match_apis, IncludeRewrite, ProjectMetadata, RewardPolicy};
use tokio::sync::Mutex;
use tracing::debug;

use crate::batch::{BatchEvaluator, BatchItem};
use crate::error::{Result, RunnerError};
use crate::session::EvaluationSession;

/// A reward signal over a round of completions.
#[async_trait]
pub trait RewardFunction: Send + Sync {
    /// Unique name within a table.
    fn name(&self) -> &str;

    /// One reward per completion, in order. `prompts` may be shorter than
    /// `completions`; missing prompts are treated as empty.
    async fn compute_reward(&self, completions: &[String], prompts: &[String]) -> Vec<f64>;
}

/// Ordered, immutable set of reward functions.
#[derive(Clone, Default)]
pub struct RewardTable {
    entries: Vec<Arc<dyn RewardFunction>>,
}

/// Builder for [`RewardTable`]; rejects duplicate names.
#[derive(Default)]
pub struct RewardTableBuilder {
    entries: Vec<Arc<dyn RewardFunction>>,
}

impl RewardTableBuilder {
    pub fn register(mut self, function: Arc<dyn RewardFunction>) -> Result<Self> {
        if self.entries.iter().any(|f| f.name() == function.name()) {
            return Err(RunnerError::DuplicateRewardFunction(
                function.name().to_string(),
            ));
        }
        self.entries.push(function);
        Ok(self)
    }

    pub fn build(self) -> RewardTable {
        RewardTable {
            entries: self.entries,
        }
    }
}

impl RewardTable {
    pub fn builder() -> RewardTableBuilder {
        RewardTableBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn RewardFunction>> {
        self.entries.iter().find(|f| f.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every function concurrently. Results keep registration order.
    pub async fn compute_all(
        &self,
        completions: &[String],
        prompts: &[String],
    ) -> Vec<(String, Vec<f64>)> {
        let futures = self.entries.iter().map(|f| async move {
            let rewards = f.compute_reward(completions, prompts).await;
            (f.name().to_string(), rewards)
        });
        futures::future::join_all(futures).await
    }
}

impl std::fmt::Debug for RewardTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardTable")
            .field("names", &self.names())
            .finish()
    }
}

impl std::fmt::Debug for RewardTableBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.entries.iter().map(|e| e.name()).collect();
        f.debug_struct("RewardTableBuilder")
            .field("names", &names)
            .finish()
    }
}

fn prompt_at(prompts: &[String], idx: usize) -> &str {
    prompts.get(idx).map(String::as_str).unwrap_or("")
}

/// The full gate pipeline as a reward function.
///
/// Every call is one generation round: the session epoch advances, the
/// completions are written as that epoch's harnesses and evaluated as a
/// batch.
pub struct HarnessReward {
    evaluator: BatchEvaluator,
    session: Mutex<EvaluationSession>,
}

impl HarnessReward {
    pub const NAME: &'static str = "fuzz_harness";

    pub fn new(evaluator: BatchEvaluator, session: EvaluationSession) -> Self {
        Self {
            evaluator,
            session: Mutex::new(session),
        }
    }

    /// Current session epoch.
    pub async fn epoch(&self) -> u32 {
        self.session.lock().await.epoch()
    }
}

#[async_trait]
impl RewardFunction for HarnessReward {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn compute_reward(&self, completions: &[String], prompts: &[String]) -> Vec<f64> {
        let candidates = {
            let mut session = self.session.lock().await;
            let epoch = session.next_round();
            debug!(epoch, size = completions.len(), "starting generation round");
            session.candidates(completions)
        };
        let items = candidates
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| BatchItem::new(candidate, prompt_at(prompts, i)))
            .collect();
        self.evaluator.rewards(items).await
    }
}

/// Static API-coverage reward: the coverage bonus alone, without compiling
/// or running anything.
pub struct ApiCoverageReward {
    metadata: Arc<ProjectMetadata>,
    policy: RewardPolicy,
    rewrites: Vec<IncludeRewrite>,
}

impl ApiCoverageReward {
    pub const NAME: &'static str = "api_coverage";

    pub fn new(metadata: Arc<ProjectMetadata>, policy: RewardPolicy) -> Self {
        Self {
            metadata,
            policy,
            rewrites: Vec::new(),
        }
    }

    pub fn with_rewrites(mut self, rewrites: Vec<IncludeRewrite>) -> Self {
        self.rewrites = rewrites;
        self
    }

    pub fn score(&self, completion: &str) -> f64 {
        let (mut source, _) = fuzzgate_core::extract_harness_source(completion);
        for rewrite in &self.rewrites {
            source = source.replace(&rewrite.from, &rewrite.to);
        }
        let matched = match_apis(&source, &self.metadata.apis).len();
        self.policy
            .coverage_bonus(matched, self.metadata.total_apis())
    }
}

#[async_trait]
impl RewardFunction for ApiCoverageReward {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn compute_reward(&self, completions: &[String], _prompts: &[String]) -> Vec<f64> {
        completions.iter().map(|c| self.score(c)).collect()
    }
}
