//! Project metadata produced by the upstream static-analysis step.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FuzzgateError, Result};

/// Read-only description of the target library.
///
/// Loaded once per process and shared by every evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    #[serde(default)]
    pub project_name: Option<String>,

    /// Known API symbol names, in the order the analysis emitted them.
    #[serde(rename = "APIs")]
    pub apis: Vec<String>,

    /// Public header file names.
    #[serde(default)]
    pub header_name: Vec<String>,

    /// Free-form type context used for prompt construction.
    #[serde(default)]
    pub context: serde_json::Value,
}

impl ProjectMetadata {
    pub fn new(apis: Vec<String>) -> Self {
        Self {
            apis,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| FuzzgateError::InvalidMetadata(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn total_apis(&self) -> usize {
        self.apis.len()
    }
}
