//! Sanitized fuzz builds and coverage builds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fuzzgate_core::{ArtifactStore, FuzzgateError, GateResult, SourceKind, ToolchainConfig};
use tracing::debug;

use crate::command::{build_command, BuildMode, BuildSpec};
use crate::error::Result;
use crate::runner::{run_captured, tool_gate_result};

/// Compiler and language standard for a source kind.
pub fn compiler_for(toolchain: &ToolchainConfig, kind: SourceKind) -> (&str, &str) {
    match kind {
        SourceKind::Cpp => (toolchain.cxx.as_str(), toolchain.cxx_std.as_str()),
        SourceKind::C => (toolchain.cc.as_str(), toolchain.c_std.as_str()),
    }
}

/// The target library's prebuilt tree, resolved case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTree {
    pub include_dir: PathBuf,
    pub lib_dir: PathBuf,
    /// `lib/*.a`, sorted.
    pub archives: Vec<PathBuf>,
}

impl BuildTree {
    pub fn resolve(store: &ArtifactStore, project: &str) -> std::result::Result<Self, FuzzgateError> {
        let layout = store.layout();
        let include_dir = store.resolve(&layout.include_dir(project))?;
        let lib_dir = store.resolve(&layout.lib_dir(project))?;
        let archives = static_archives(&lib_dir)?;
        Ok(Self {
            include_dir,
            lib_dir,
            archives,
        })
    }
}

fn static_archives(lib_dir: &Path) -> std::result::Result<Vec<PathBuf>, FuzzgateError> {
    let mut archives = Vec::new();
    for entry in std::fs::read_dir(lib_dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "a") {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}

/// One harness to compile and where the executable goes.
#[derive(Debug, Clone, Copy)]
pub struct BuildTarget<'a> {
    pub source: &'a Path,
    pub kind: SourceKind,
    pub output: &'a Path,
    /// Required by coverage builds only.
    pub target_source_dir: Option<&'a Path>,
}

/// Builds fuzz and coverage executables from a harness.
#[derive(Debug, Clone)]
pub struct CompileGate {
    toolchain: ToolchainConfig,
}

impl CompileGate {
    pub fn new(toolchain: ToolchainConfig) -> Self {
        Self { toolchain }
    }

    /// Compile `target.source` into `target.output`.
    ///
    /// A stale file at the output path is deleted first and its directory
    /// created.
    pub async fn build(
        &self,
        store: &ArtifactStore,
        mode: BuildMode,
        tree: &BuildTree,
        target: BuildTarget<'_>,
    ) -> Result<GateResult> {
        let output = target.output;
        if let Err(e) = store.delete(output).and_then(|_| store.ensure_dir(output)) {
            return Ok(GateResult::InfrastructureError(e.to_string()));
        }

        let (compiler, std) = compiler_for(&self.toolchain, target.kind);
        let debug = mode == BuildMode::Fuzz && self.toolchain.debug;
        let spec = BuildSpec {
            compiler,
            std,
            source: target.source,
            output,
            include_dir: &tree.include_dir,
            lib_dir: &tree.lib_dir,
            archives: &tree.archives,
            target_source_dir: target.target_source_dir,
            debug,
            extra_flags: &self.toolchain.extra_flags,
        };
        let cmd = build_command(mode, &spec);
        debug!(mode = ?mode, output = %output.display(), "compiling harness");

        let timeout = Duration::from_secs(self.toolchain.compile_timeout_secs);
        tool_gate_result(run_captured(&cmd, timeout).await)
    }
}
