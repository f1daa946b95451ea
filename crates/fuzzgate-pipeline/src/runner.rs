//! Captured process execution with timeouts, and spawn retry.

use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};

use fuzzgate_core::{GateResult, SchedulerConfig};
use tracing::{debug, warn};

use crate::command::ToolCommand;
use crate::error::{Result, RunnerError};

/// Output of a finished tool invocation.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub success: bool,
}

impl CapturedOutput {
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == Some(0)
    }
}

/// Run `cmd` to completion with stdout and stderr captured.
///
/// On timeout the child handle is dropped, which kills it.
pub async fn run_captured(cmd: &ToolCommand, timeout: Duration) -> Result<CapturedOutput> {
    let start = Instant::now();
    let program = cmd.program_name();
    debug!(command = %cmd.render(), "spawning tool");

    let child = cmd
        .to_command()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| RunnerError::Spawn {
            program: program.clone(),
            source,
        })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| RunnerError::Timeout {
            program: program.clone(),
            secs: timeout.as_secs(),
        })??;

    Ok(CapturedOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration_ms: start.elapsed().as_millis() as u64,
        success: output.status.success(),
    })
}

/// Fold a compiler invocation into a gate result.
///
/// Spawn failures stay errors so the caller can retry them. A timeout is a
/// verdict on the candidate; any other I/O problem is infrastructure.
pub fn tool_gate_result(run: Result<CapturedOutput>) -> Result<GateResult> {
    match run {
        Ok(out) if out.passed() => Ok(GateResult::Pass),
        Ok(out) => {
            let diagnostic = if !out.stderr.trim().is_empty() {
                out.stderr
            } else if !out.stdout.trim().is_empty() {
                out.stdout
            } else {
                match out.exit_code {
                    Some(code) => format!("exited with status {code}"),
                    None => "terminated by signal".to_string(),
                }
            };
            Ok(GateResult::Fail(diagnostic))
        }
        Err(err) if err.is_spawn_failure() => Err(err),
        Err(err @ RunnerError::Timeout { .. }) => Ok(GateResult::Fail(err.to_string())),
        Err(err) => Ok(GateResult::InfrastructureError(err.to_string())),
    }
}

/// Exponential backoff for spawn failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = run once).
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 0,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_retries: config.spawn_retries,
            backoff_base_ms: config.backoff_base_ms,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// Run `op`, retrying while it fails to spawn a process.
///
/// Other errors and successes return immediately. After the last retry the
/// spawn error itself is returned.
pub async fn retry_on_spawn_failure<F, Fut, T>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_retries + 1;
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_spawn_failure() && attempt < max_attempts => {
                let delay = policy.delay(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "spawn failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
