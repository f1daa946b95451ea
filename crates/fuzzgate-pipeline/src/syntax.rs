//! Syntax-only compile check.

use std::path::Path;
use std::time::Duration;

use fuzzgate_core::{GateResult, SourceKind, ToolchainConfig};

use crate::command::{syntax_command, ToolCommand};
use crate::compile::compiler_for;
use crate::error::Result;
use crate::runner::{run_captured, tool_gate_result};

/// Runs `-fsyntax-only` against the target's public headers.
#[derive(Debug, Clone)]
pub struct SyntaxGate {
    toolchain: ToolchainConfig,
}

impl SyntaxGate {
    pub fn new(toolchain: ToolchainConfig) -> Self {
        Self { toolchain }
    }

    pub fn command(&self, source: &Path, kind: SourceKind, include_dir: &Path) -> ToolCommand {
        let (compiler, std) = compiler_for(&self.toolchain, kind);
        syntax_command(compiler, std, include_dir, source)
    }

    /// `Pass` on exit zero, otherwise `Fail` with the compiler's stderr.
    pub async fn check(
        &self,
        source: &Path,
        kind: SourceKind,
        include_dir: &Path,
    ) -> Result<GateResult> {
        let cmd = self.command(source, kind, include_dir);
        let timeout = Duration::from_secs(self.toolchain.compile_timeout_secs);
        tool_gate_result(run_captured(&cmd, timeout).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_sources_use_c_compiler() {
        let gate = SyntaxGate::new(ToolchainConfig::default());
        let cmd = gate.command(Path::new("id_00000.c"), SourceKind::C, Path::new("/inc"));
        assert_eq!(cmd.program_name(), "clang");
        assert!(cmd.has_arg("-std=c11"));
        assert!(cmd.has_arg("-fsyntax-only"));
    }

    #[tokio::test]
    async fn test_check_with_shell_compiler() {
        let toolchain = ToolchainConfig {
            cxx: "true".to_string(),
            ..ToolchainConfig::default()
        };
        let gate = SyntaxGate::new(toolchain);
        let result = gate
            .check(Path::new("x.cpp"), SourceKind::Cpp, Path::new("/inc"))
            .await
            .unwrap();
        assert_eq!(result, GateResult::Pass);
    }

    #[tokio::test]
    async fn test_failing_compiler_is_fail() {
        let toolchain = ToolchainConfig {
            cxx: "false".to_string(),
            ..ToolchainConfig::default()
        };
        let gate = SyntaxGate::new(toolchain);
        let result = gate
            .check(Path::new("x.cpp"), SourceKind::Cpp, Path::new("/inc"))
            .await
            .unwrap();
        assert!(matches!(result, GateResult::Fail(_)));
    }
}
