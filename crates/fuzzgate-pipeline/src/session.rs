//! Epoch bookkeeping across training rounds.

use fuzzgate_core::{
    find_index, ArtifactStore, Candidate, CandidateId, FuzzgateError, IncludeRewrite,
};

/// Hands out candidate ids for successive batches of one project.
///
/// The epoch is advanced before each batch, so a fresh session writes its
/// first batch to `harness_00001`.
#[derive(Debug, Clone)]
pub struct EvaluationSession {
    project: String,
    epoch: u32,
    rewrites: Vec<IncludeRewrite>,
}

impl EvaluationSession {
    pub fn new(project: impl Into<String>) -> Self {
        Self::starting_at(project, 0)
    }

    pub fn starting_at(project: impl Into<String>, epoch: u32) -> Self {
        Self {
            project: project.into(),
            epoch,
            rewrites: Vec::new(),
        }
    }

    /// Continue after the highest `harness_EEEEE` directory already on disk.
    pub fn resume(
        store: &ArtifactStore,
        project: impl Into<String>,
    ) -> std::result::Result<Self, FuzzgateError> {
        let project = project.into();
        let harnesses = store.layout().project_dir(&project).join("harnesses");
        let mut epoch = 0;
        if harnesses.is_dir() {
            for entry in std::fs::read_dir(&harnesses)? {
                let entry = entry?;
                if !entry.path().is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let Some(index) = name.strip_prefix("harness_").and_then(find_index) else {
                    continue;
                };
                if let Ok(index) = index.parse::<u32>() {
                    epoch = epoch.max(index);
                }
            }
        }
        Ok(Self::starting_at(project, epoch))
    }

    pub fn with_rewrites(mut self, rewrites: Vec<IncludeRewrite>) -> Self {
        self.rewrites = rewrites;
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// The epoch of the most recent batch (0 before the first).
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Advance to the next batch and return its epoch.
    pub fn next_round(&mut self) -> u32 {
        self.epoch += 1;
        self.epoch
    }

    /// Turn raw completions into candidates of the current epoch, numbered
    /// by position.
    pub fn candidates(&self, completions: &[String]) -> Vec<Candidate> {
        completions
            .iter()
            .enumerate()
            .map(|(i, completion)| {
                let id = CandidateId::new(self.project.clone(), self.epoch, i as u32);
                Candidate::from_completion(id, completion, &self.rewrites)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_round_is_epoch_one() {
        let mut session = EvaluationSession::new("cjson");
        assert_eq!(session.epoch(), 0);
        assert_eq!(session.next_round(), 1);
        assert_eq!(session.next_round(), 2);
    }

    #[test]
    fn test_candidates_numbered_by_position() {
        let mut session = EvaluationSession::new("cjson");
        session.next_round();
        let completions = vec!["int a;".to_string(), "int b;".to_string()];
        let candidates = session.candidates(&completions);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id(), &CandidateId::new("cjson", 1, 0));
        assert_eq!(candidates[1].id(), &CandidateId::new("cjson", 1, 1));
    }

    #[test]
    fn test_resume_after_highest_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let harnesses = dir.path().join("projects/cjson/harnesses");
        for name in ["harness_00002", "harness_00007", "harness_00003"] {
            std::fs::create_dir_all(harnesses.join(name)).unwrap();
        }
        std::fs::write(harnesses.join("harness_00099"), "not a dir").unwrap();

        let store = ArtifactStore::new(dir.path());
        let mut session = EvaluationSession::resume(&store, "cJSON").unwrap();
        assert_eq!(session.epoch(), 7);
        assert_eq!(session.next_round(), 8);
    }

    #[test]
    fn test_resume_without_harnesses() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let session = EvaluationSession::resume(&store, "cjson").unwrap();
        assert_eq!(session.epoch(), 0);
    }
}
