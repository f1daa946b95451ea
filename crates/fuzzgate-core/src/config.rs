//! Runtime configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration:
//!
//! ```toml
//! root = "/workspace/output"
//!
//! [toolchain]
//! cxx = "clang++"
//! extra-flags = ["-O2"]
//!
//! [fuzz]
//! max-total-time-secs = 60
//!
//! [scheduler]
//! concurrency = 4
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::candidate::IncludeRewrite;
use crate::error::{FuzzgateError, Result};
use crate::scorer::RewardPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ToolchainConfig {
    /// Compiler for `.cpp` harnesses.
    pub cxx: String,
    /// Compiler for `.c` harnesses.
    pub cc: String,
    pub cxx_std: String,
    pub c_std: String,
    /// Appended to fuzz and coverage builds.
    pub extra_flags: Vec<String>,
    /// Build fuzz binaries with `-g`.
    pub debug: bool,
    pub compile_timeout_secs: u64,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            cxx: "clang++".to_string(),
            cc: "clang".to_string(),
            cxx_std: "c++17".to_string(),
            c_std: "c11".to_string(),
            extra_flags: vec!["-O2".to_string()],
            debug: true,
            compile_timeout_secs: 120,
        }
    }
}

/// libFuzzer limits for the primary fuzz run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct FuzzConfig {
    pub max_runs: u64,
    pub max_total_time_secs: u64,
    /// Extra wall time granted before the child is killed.
    pub grace_secs: u64,
    pub rss_limit_mb: u64,
    pub max_len: u64,
    /// Per-input timeout (`-timeout=`).
    pub input_timeout_secs: u64,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            max_runs: 10_000,
            max_total_time_secs: 60,
            grace_secs: 60,
            rss_limit_mb: 512,
            max_len: 8192,
            input_timeout_secs: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct CoverageConfig {
    /// Run the coverage build and run after each successful evaluation.
    pub enabled: bool,
    pub max_runs: u64,
    pub max_total_time_secs: u64,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_runs: 10_000,
            max_total_time_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Candidates evaluated in parallel.
    pub concurrency: usize,
    /// Retries after a failed process spawn.
    pub spawn_retries: u32,
    pub backoff_base_ms: u64,
    /// Wall limit for a whole batch; unlimited when unset.
    pub batch_timeout_secs: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            spawn_retries: 3,
            backoff_base_ms: 100,
            batch_timeout_secs: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct FuzzgateConfig {
    /// Workspace root holding `build/` and `projects/`.
    pub root: PathBuf,
    pub toolchain: ToolchainConfig,
    pub fuzz: FuzzConfig,
    pub coverage: CoverageConfig,
    pub scheduler: SchedulerConfig,
    pub reward: RewardPolicy,
    pub include_rewrites: Vec<IncludeRewrite>,
}

impl Default for FuzzgateConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            toolchain: ToolchainConfig::default(),
            fuzz: FuzzConfig::default(),
            coverage: CoverageConfig::default(),
            scheduler: SchedulerConfig::default(),
            reward: RewardPolicy::default(),
            include_rewrites: Vec::new(),
        }
    }
}

impl FuzzgateConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: FuzzgateConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.concurrency == 0 {
            return Err(FuzzgateError::InvalidConfig(
                "scheduler.concurrency must be at least 1".to_string(),
            ));
        }
        if self.toolchain.cxx.trim().is_empty() || self.toolchain.cc.trim().is_empty() {
            return Err(FuzzgateError::InvalidConfig(
                "toolchain compilers must not be empty".to_string(),
            ));
        }
        if self.fuzz.max_total_time_secs == 0 {
            return Err(FuzzgateError::InvalidConfig(
                "fuzz.max-total-time-secs must be at least 1".to_string(),
            ));
        }
        if !(self.reward.coverage_floor >= 0.0 && self.reward.coverage_floor < 1.0) {
            return Err(FuzzgateError::InvalidConfig(
                "reward.coverage-floor must be in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}
