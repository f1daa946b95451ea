//! Error taxonomy for fuzzgate-core.

use std::path::PathBuf;

/// Errors produced by the artifact, metadata and configuration layers.
///
/// None of these cross the evaluation boundary: the pipeline folds every
/// variant into a gate result before a reward is returned.
#[derive(Debug, thiserror::Error)]
pub enum FuzzgateError {
    #[error("no case-insensitive match for {path}")]
    NotFound { path: PathBuf },

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("harness source for {project}/{epoch:05}/{completion:05} not found")]
    MissingHarness {
        project: String,
        epoch: u32,
        completion: u32,
    },

    #[error("invalid project metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed evaluation log {path}: {reason}")]
    MalformedLog { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for fuzzgate-core operations.
pub type Result<T> = std::result::Result<T, FuzzgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = FuzzgateError::NotFound {
            path: PathBuf::from("/ws/BUILD/cjson"),
        };
        assert!(err.to_string().contains("/ws/BUILD/cjson"));
    }

    #[test]
    fn test_missing_harness_pads_indices() {
        let err = FuzzgateError::MissingHarness {
            project: "cjson".to_string(),
            epoch: 3,
            completion: 12,
        };
        assert_eq!(
            err.to_string(),
            "harness source for cjson/00003/00012 not found"
        );
    }
}
