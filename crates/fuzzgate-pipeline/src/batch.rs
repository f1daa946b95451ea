//! Concurrent evaluation of a batch of candidates.
//!
//! Candidates are independent; each runs on its own task behind a semaphore
//! and results are returned in input order regardless of completion order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fuzzgate_core::obs::emit_batch_finished;
use fuzzgate_core::{Candidate, RewardRecord};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::pipeline::EvaluationPipeline;
use crate::runner::RetryPolicy;

/// One candidate with the prompt that produced it.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub candidate: Candidate,
    pub prompt: String,
}

impl BatchItem {
    pub fn new(candidate: Candidate, prompt: impl Into<String>) -> Self {
        Self {
            candidate,
            prompt: prompt.into(),
        }
    }
}

/// Evaluates batches with bounded parallelism.
#[derive(Debug, Clone)]
pub struct BatchEvaluator {
    pipeline: Arc<EvaluationPipeline>,
    concurrency: usize,
    retry: RetryPolicy,
    batch_timeout: Option<Duration>,
}

impl BatchEvaluator {
    /// Concurrency, retries and timeout come from the pipeline's
    /// `[scheduler]` section.
    pub fn new(pipeline: Arc<EvaluationPipeline>) -> Self {
        let scheduler = &pipeline.config().scheduler;
        let concurrency = scheduler.concurrency.max(1);
        let retry = RetryPolicy::from_config(scheduler);
        let batch_timeout = scheduler.batch_timeout_secs.map(Duration::from_secs);
        Self {
            pipeline,
            concurrency,
            retry,
            batch_timeout,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn pipeline(&self) -> &Arc<EvaluationPipeline> {
        &self.pipeline
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Evaluate every item and return one record per item, in input order.
    ///
    /// Candidates still running when the batch timeout expires are cancelled
    /// and recorded as infrastructure errors, as are tasks that panicked.
    /// Coverage side paths run on their own tasks once a candidate's record
    /// is in its slot; the deadline cancels them without touching records.
    pub async fn evaluate_batch(&self, items: Vec<BatchItem>) -> Vec<RewardRecord> {
        let started = Instant::now();
        let deadline = self
            .batch_timeout
            .map(|limit| tokio::time::Instant::now() + limit);
        let keys: Vec<_> = items
            .iter()
            .map(|item| (item.candidate.id().clone(), item.prompt.clone()))
            .collect();

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();
        for (idx, item) in items.into_iter().enumerate() {
            let pipeline = Arc::clone(&self.pipeline);
            let sem = Arc::clone(&sem);
            let retry = self.retry;
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let record = pipeline
                    .score_with_retry(&item.candidate, &item.prompt, &retry)
                    .await;
                (idx, record)
            });
        }

        let mut slots: Vec<Option<RewardRecord>> = vec![None; keys.len()];
        let mut coverage = JoinSet::new();
        let mut reason = "evaluation task failed";
        let primary = self.drain(&mut join_set, &mut slots, &sem, &mut coverage);
        let timed_out = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, primary).await.is_err(),
            None => {
                primary.await;
                false
            }
        };
        if timed_out {
            warn!(
                timeout_secs = self.batch_timeout.map(|t| t.as_secs()),
                pending = join_set.len(),
                "batch timed out, cancelling remaining candidates"
            );
            join_set.shutdown().await;
            reason = "batch timed out before evaluation finished";
        }

        let coverage_done = match deadline {
            _ if coverage.is_empty() => true,
            Some(_) if timed_out => false,
            Some(deadline) => tokio::time::timeout_at(deadline, drain_coverage(&mut coverage))
                .await
                .is_ok(),
            None => {
                drain_coverage(&mut coverage).await;
                true
            }
        };
        if !coverage_done {
            warn!(
                pending = coverage.len(),
                "batch deadline reached, cancelling coverage runs"
            );
            coverage.shutdown().await;
        }

        let records: Vec<RewardRecord> = slots
            .into_iter()
            .zip(keys)
            .map(|(slot, (id, prompt))| {
                slot.unwrap_or_else(|| self.pipeline.infrastructure_record(&id, &prompt, reason))
            })
            .collect();

        let mean = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.reward).sum::<f64>() / records.len() as f64
        };
        emit_batch_finished(records.len(), started.elapsed().as_millis() as u64, mean);
        records
    }

    /// Rewards only, aligned with `items`.
    pub async fn rewards(&self, items: Vec<BatchItem>) -> Vec<f64> {
        self.evaluate_batch(items)
            .await
            .into_iter()
            .map(|r| r.reward)
            .collect()
    }

    /// Fill `slots` as primary evaluations finish, queueing the coverage
    /// side path for each record that wants one.
    async fn drain(
        &self,
        join_set: &mut JoinSet<(usize, RewardRecord)>,
        slots: &mut [Option<RewardRecord>],
        sem: &Arc<Semaphore>,
        coverage: &mut JoinSet<()>,
    ) {
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, record)) => {
                    if self.pipeline.wants_coverage(&record) {
                        let pipeline = Arc::clone(&self.pipeline);
                        let sem = Arc::clone(sem);
                        let retry = self.retry;
                        let id = record.id.clone();
                        coverage.spawn(async move {
                            let _permit = sem.acquire_owned().await.ok();
                            pipeline.coverage_side_path(&id, &retry).await;
                        });
                    }
                    slots[idx] = Some(record);
                }
                Err(e) => warn!(error = %e, "evaluation task join error"),
            }
        }
    }
}

async fn drain_coverage(coverage: &mut JoinSet<()>) {
    while let Some(joined) = coverage.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "coverage task join error");
        }
    }
}
