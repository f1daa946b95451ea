//! Persistence of evaluation records and reward summaries over them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::artifact::{ArtifactKind, ArtifactStore};
use crate::error::{FuzzgateError, Result};
use crate::record::RewardRecord;

/// Writes one text log plus one JSON sidecar per candidate.
///
/// Both files are replaced atomically, so re-evaluating the same
/// `(epoch, completion)` leaves no bytes of the previous record behind.
#[derive(Debug, Clone)]
pub struct EvaluationLogger {
    store: ArtifactStore,
}

impl EvaluationLogger {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    /// Persist `record` and return the text log path.
    pub fn write(&self, record: &RewardRecord) -> Result<PathBuf> {
        let layout = self.store.layout();
        let log_path = layout.path(&record.id, ArtifactKind::EvaluationLog);
        let json_path = layout.path(&record.id, ArtifactKind::EvaluationRecord);

        self.store
            .write_atomic(&log_path, record.render_log().as_bytes())?;
        let json = serde_json::to_vec_pretty(record)?;
        self.store.write_atomic(&json_path, &json)?;

        debug!(path = %log_path.display(), reward = record.reward, "evaluation record written");
        Ok(log_path)
    }

    /// Read back the JSON sidecar of a previous evaluation.
    pub fn read(&self, path: &Path) -> Result<RewardRecord> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| FuzzgateError::MalformedLog {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Aggregate rewards over a tree of evaluation logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RewardSummary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Keyed by terminal state name; logs without a sidecar count as `unknown`.
    pub by_state: BTreeMap<String, usize>,
    /// Log files with no parseable `reward:` line.
    pub unreadable: Vec<PathBuf>,
}

fn reward_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^reward:\s*(-?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)").expect("valid regex")
    })
}

/// First `reward:` value in a text log.
pub fn extract_reward(text: &str) -> Option<f64> {
    reward_line_re()
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
}

/// Scan `dir` recursively for `log_id_*.txt` files and summarise them.
///
/// Files are visited in sorted path order.
pub fn summarize(dir: &Path) -> Result<RewardSummary> {
    if !dir.is_dir() {
        return Err(FuzzgateError::NotADirectory(dir.to_path_buf()));
    }
    let mut logs = Vec::new();
    collect_logs(dir, &mut logs)?;
    logs.sort();

    let mut summary = RewardSummary::default();
    let mut total = 0.0;
    for path in logs {
        let text = fs::read_to_string(&path)?;
        let Some(reward) = extract_reward(&text) else {
            warn!(path = %path.display(), "no reward line in evaluation log");
            summary.unreadable.push(path);
            continue;
        };

        if summary.count == 0 {
            summary.min = reward;
            summary.max = reward;
        } else {
            summary.min = summary.min.min(reward);
            summary.max = summary.max.max(reward);
        }
        summary.count += 1;
        total += reward;

        let state = sidecar_state(&path).unwrap_or_else(|| "unknown".to_string());
        *summary.by_state.entry(state).or_insert(0) += 1;
    }
    if summary.count > 0 {
        summary.mean = total / summary.count as f64;
    }
    Ok(summary)
}

fn collect_logs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_logs(&path, out)?;
            continue;
        }
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("log_id_") && n.ends_with(".txt"));
        if is_log {
            out.push(path);
        }
    }
    Ok(())
}

fn sidecar_state(log_path: &Path) -> Option<String> {
    let content = fs::read_to_string(log_path.with_extension("json")).ok()?;
    let value: serde_json::Value = serde_json::from_str(&content).ok()?;
    value.get("state")?.as_str().map(str::to_string)
}
