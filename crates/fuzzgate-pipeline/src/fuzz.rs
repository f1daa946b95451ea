//! Bounded fuzz execution and crash detection.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use fuzzgate_core::{ArtifactStore, FuzzConfig, GateResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::command::{fuzz_command, InputLimits, LibFuzzerArgs, ToolCommand};
use crate::error::{Result, RunnerError};

const CRASH_PREFIX: &str = "crash-";
const WORK_CORPUS: &str = "corpus";
const DIAGNOSTIC_TAIL_BYTES: usize = 2048;

/// Execution budget for one fuzz run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunBudget {
    pub max_runs: u64,
    pub max_wall_secs: u64,
}

/// Seed inputs for the fuzzer, resolved case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuzzInputs {
    pub corpus_dir: Option<PathBuf>,
    pub dictionary: Option<PathBuf>,
}

impl FuzzInputs {
    /// Resolve `build/<project>/{corpus,fuzzer.dict}`. Missing inputs are
    /// left out of the command line.
    pub fn resolve(store: &ArtifactStore, project: &str) -> Self {
        let layout = store.layout();
        let corpus_dir = store.resolve(&layout.corpus_dir(project)).ok();
        let dictionary = store.resolve(&layout.dictionary(project)).ok();
        if corpus_dir.is_none() {
            debug!(project, "no seed corpus found");
        }
        Self {
            corpus_dir,
            dictionary,
        }
    }

    /// Corpus arguments for a run writing into `output_dir`: the run's own
    /// corpus first, then the shared seeds, which are only read.
    pub fn corpus_dirs(&self, output_dir: &Path) -> Vec<PathBuf> {
        let mut dirs = vec![output_dir.join(WORK_CORPUS)];
        dirs.extend(self.corpus_dir.clone());
        dirs
    }
}

/// How a fuzz run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzOutcome {
    pub exit_code: Option<i32>,
    /// The child outlived `max_wall_secs + grace` and was killed.
    pub killed: bool,
    /// `crash-*` files in the output directory, sorted.
    pub crashes: Vec<PathBuf>,
    pub elapsed_ms: u64,
    pub log_path: PathBuf,
}

impl FuzzOutcome {
    /// Crash artifacts fail the run whatever the exit code was.
    pub fn gate_result(&self) -> GateResult {
        if !self.crashes.is_empty() {
            let names: Vec<String> = self
                .crashes
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect();
            return GateResult::Fail(format!(
                "fuzzer found {} crash artifact(s): {}",
                names.len(),
                names.join(", ")
            ));
        }
        if self.killed {
            return GateResult::Fail(format!(
                "fuzzer exceeded its wall budget and was killed after {}ms",
                self.elapsed_ms
            ));
        }
        match self.exit_code {
            Some(0) => GateResult::Pass,
            code => {
                let status = code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"));
                let tail = std::fs::read_to_string(&self.log_path)
                    .map(|log| tail_of(&log, DIAGNOSTIC_TAIL_BYTES).to_string())
                    .unwrap_or_default();
                GateResult::Fail(format!("fuzzer exited with {status}\n{tail}"))
            }
        }
    }
}

/// Metadata of a coverage-instrumented run. Not analysed further.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageRun {
    pub elapsed_ms: u64,
    pub iterations: u64,
    pub profile_path: PathBuf,
    pub profile_written: bool,
    pub log_path: PathBuf,
    pub success: bool,
}

/// Runs compiled fuzz executables under a wall budget.
#[derive(Debug, Clone)]
pub struct FuzzRunner {
    config: FuzzConfig,
}

impl FuzzRunner {
    pub fn new(config: FuzzConfig) -> Self {
        Self { config }
    }

    pub fn budget(&self) -> RunBudget {
        RunBudget {
            max_runs: self.config.max_runs,
            max_wall_secs: self.config.max_total_time_secs,
        }
    }

    /// Total time the parent waits before killing the child.
    pub fn wall_limit(&self, budget: RunBudget) -> Duration {
        Duration::from_secs(budget.max_wall_secs.saturating_add(self.config.grace_secs))
    }

    pub fn command(&self, binary: &Path, inputs: &FuzzInputs, output_dir: &Path, budget: RunBudget) -> ToolCommand {
        fuzz_command(
            binary,
            &LibFuzzerArgs {
                max_runs: budget.max_runs,
                max_total_time_secs: budget.max_wall_secs,
                artifact_dir: output_dir.to_path_buf(),
                dictionary: inputs.dictionary.clone(),
                corpus_dirs: inputs.corpus_dirs(output_dir),
                limits: Some(InputLimits {
                    rss_limit_mb: self.config.rss_limit_mb,
                    max_len: self.config.max_len,
                    input_timeout_secs: self.config.input_timeout_secs,
                }),
            },
        )
    }

    /// Run `binary` with its output (log and artifacts) in `output_dir`.
    ///
    /// The directory is recreated empty so crash files from a previous
    /// evaluation of the same candidate are not counted.
    pub async fn run(
        &self,
        store: &ArtifactStore,
        binary: &Path,
        inputs: &FuzzInputs,
        output_dir: &Path,
        budget: RunBudget,
    ) -> Result<FuzzOutcome> {
        fresh_dir(store, output_dir)?;
        let log_path = output_dir.join("log");
        let cmd = self.command(binary, inputs, output_dir, budget);

        let (status, killed, elapsed_ms) =
            self.supervise(&cmd, &log_path, self.wall_limit(budget)).await?;

        let crashes = scan_crashes(output_dir)?;
        if !crashes.is_empty() {
            warn!(count = crashes.len(), dir = %output_dir.display(), "fuzzer produced crash artifacts");
        }
        Ok(FuzzOutcome {
            exit_code: status.and_then(|s| s.code()),
            killed,
            crashes,
            elapsed_ms,
            log_path,
        })
    }

    /// Coverage counterpart of [`run`](Self::run).
    ///
    /// Sets `LLVM_PROFILE_FILE` to `<output_dir>/coverage.profraw` and logs to
    /// `coverage.log`. No per-input limits are passed.
    pub async fn run_coverage(
        &self,
        store: &ArtifactStore,
        binary: &Path,
        inputs: &FuzzInputs,
        output_dir: &Path,
        budget: RunBudget,
    ) -> Result<CoverageRun> {
        fresh_dir(store, output_dir)?;
        let log_path = output_dir.join("coverage.log");
        let profile_path = output_dir.join("coverage.profraw");

        let cmd = fuzz_command(
            binary,
            &LibFuzzerArgs {
                max_runs: budget.max_runs,
                max_total_time_secs: budget.max_wall_secs,
                artifact_dir: output_dir.to_path_buf(),
                dictionary: inputs.dictionary.clone(),
                corpus_dirs: inputs.corpus_dirs(output_dir),
                limits: None,
            },
        )
        .env("LLVM_PROFILE_FILE", &profile_path);

        let (status, killed, elapsed_ms) =
            self.supervise(&cmd, &log_path, self.wall_limit(budget)).await?;

        Ok(CoverageRun {
            elapsed_ms,
            iterations: budget.max_runs,
            profile_written: profile_path.is_file(),
            profile_path,
            log_path,
            success: !killed && status.is_some_and(|s| s.success()),
        })
    }

    /// Spawn `cmd` with stdout and stderr to `log_path` and wait up to
    /// `limit`, then SIGKILL the child and reap it.
    async fn supervise(
        &self,
        cmd: &ToolCommand,
        log_path: &Path,
        limit: Duration,
    ) -> Result<(Option<ExitStatus>, bool, u64)> {
        let log = File::create(log_path)?;
        let start = Instant::now();
        let mut child = cmd
            .to_command()
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: cmd.program_name(),
                source,
            })?;

        let (status, killed) = match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (Some(status?), false),
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "fuzzer exited before kill");
                }
                let status = child.wait().await.ok();
                (status, true)
            }
        };
        Ok((status, killed, start.elapsed().as_millis() as u64))
    }
}

/// Recreate `dir` empty, with an empty working corpus inside.
fn fresh_dir(store: &ArtifactStore, dir: &Path) -> Result<()> {
    store.delete(dir)?;
    std::fs::create_dir_all(dir.join(WORK_CORPUS))?;
    Ok(())
}

/// `crash-*` files directly under `dir`, sorted.
pub fn scan_crashes(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut crashes = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(CRASH_PREFIX) {
            crashes.push(entry.path());
        }
    }
    crashes.sort();
    Ok(crashes)
}

/// The last `max_bytes` of `text`, cut on a char boundary.
fn tail_of(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(exit_code: Option<i32>, killed: bool, crashes: Vec<PathBuf>) -> FuzzOutcome {
        FuzzOutcome {
            exit_code,
            killed,
            crashes,
            elapsed_ms: 10,
            log_path: PathBuf::from("/nonexistent/log"),
        }
    }

    #[test]
    fn test_crash_fails_even_with_zero_exit() {
        let result = outcome(Some(0), false, vec![PathBuf::from("/o/crash-deadbeef")]).gate_result();
        assert_eq!(
            result,
            GateResult::Fail("fuzzer found 1 crash artifact(s): crash-deadbeef".to_string())
        );
    }

    #[test]
    fn test_clean_exit_passes() {
        assert_eq!(outcome(Some(0), false, vec![]).gate_result(), GateResult::Pass);
    }

    #[test]
    fn test_killed_and_nonzero_fail() {
        assert!(!outcome(None, true, vec![]).gate_result().is_pass());
        assert!(!outcome(Some(1), false, vec![]).gate_result().is_pass());
    }

    #[test]
    fn test_scan_crashes_ignores_other_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["crash-02", "crash-01", "leak-ab", "timeout-cd", "log"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let crashes = scan_crashes(dir.path()).unwrap();
        assert_eq!(
            crashes,
            vec![dir.path().join("crash-01"), dir.path().join("crash-02")]
        );
    }

    #[test]
    fn test_wall_limit_adds_grace() {
        let runner = FuzzRunner::new(FuzzConfig {
            grace_secs: 5,
            ..FuzzConfig::default()
        });
        let budget = RunBudget {
            max_runs: 1,
            max_wall_secs: 10,
        };
        assert_eq!(runner.wall_limit(budget), Duration::from_secs(15));
    }

    #[test]
    fn test_tail_of_respects_char_boundaries() {
        let text = "ééééé";
        let tail = tail_of(text, 3);
        assert_eq!(tail, "é");
        assert_eq!(tail_of("abc", 10), "abc");
    }

    #[test]
    fn test_command_has_no_fork_mode_flags() {
        let runner = FuzzRunner::new(FuzzConfig::default());
        let cmd = runner.command(
            Path::new("/f/id_00000"),
            &FuzzInputs::default(),
            Path::new("/o/id_00000"),
            runner.budget(),
        );
        assert!(cmd.has_arg("-runs=10000"));
        assert!(cmd.has_arg("-max_total_time=60"));
        assert!(cmd.has_arg("-artifact_prefix=/o/id_00000/"));
        assert!(!cmd.has_arg("-jobs=1"));
        assert!(!cmd.has_arg("-workers=1"));
    }

    #[test]
    fn test_seed_corpus_is_never_the_write_target() {
        let runner = FuzzRunner::new(FuzzConfig::default());
        let inputs = FuzzInputs {
            corpus_dir: Some(PathBuf::from("/ws/build/cJSON/corpus")),
            dictionary: None,
        };
        let cmd = runner.command(
            Path::new("/f/id_00003"),
            &inputs,
            Path::new("/o/id_00003"),
            runner.budget(),
        );
        let args = cmd.get_args();
        let n = args.len();
        assert_eq!(args[n - 2], "/o/id_00003/corpus");
        assert_eq!(args[n - 1], "/ws/build/cJSON/corpus");
    }

    #[test]
    fn test_fresh_dir_recreates_work_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let out = dir.path().join("out");
        std::fs::create_dir_all(out.join(WORK_CORPUS)).unwrap();
        std::fs::write(out.join(WORK_CORPUS).join("unit"), "x").unwrap();
        std::fs::write(out.join("crash-01"), "").unwrap();

        fresh_dir(&store, &out).unwrap();

        assert!(out.join(WORK_CORPUS).is_dir());
        assert_eq!(std::fs::read_dir(out.join(WORK_CORPUS)).unwrap().count(), 0);
        assert!(scan_crashes(&out).unwrap().is_empty());
    }
}
