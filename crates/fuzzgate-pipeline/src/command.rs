//! Tool command construction.
//!
//! Every external invocation (syntax check, fuzz build, coverage build, fuzz
//! run) is described as a [`ToolCommand`] before it is spawned, so argument
//! order can be asserted in tests without running anything.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

/// An external program plus its arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: OsString,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
}

impl ToolCommand {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Append `<flag><path>`, e.g. `-I/usr/include`.
    pub fn path_flag(self, flag: &str, path: &Path) -> Self {
        self.arg(joined(flag, path, ""))
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn get_env(&self) -> &[(OsString, OsString)] {
        &self.env
    }

    /// Whether `arg` appears verbatim.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Space-joined rendering for logs. Not shell-escaped.
    pub fn render(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// A tokio command with null stdin. The child is killed when its handle
    /// is dropped.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

fn joined(prefix: &str, path: &Path, suffix: &str) -> OsString {
    let mut out = OsString::from(prefix);
    out.push(path.as_os_str());
    out.push(suffix);
    out
}

/// `<compiler> -fsyntax-only -std=<std> -I<include> <source>`
pub fn syntax_command(compiler: &str, std: &str, include_dir: &Path, source: &Path) -> ToolCommand {
    ToolCommand::new(compiler)
        .arg("-fsyntax-only")
        .arg(format!("-std={std}"))
        .path_flag("-I", include_dir)
        .arg(source)
}

/// Which executable a build produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// ASan + UBSan + libFuzzer.
    Fuzz,
    /// Source-based coverage; sanitizers off, libFuzzer linked.
    Coverage,
}

/// Inputs shared by both build modes.
#[derive(Debug, Clone)]
pub struct BuildSpec<'a> {
    pub compiler: &'a str,
    pub std: &'a str,
    pub source: &'a Path,
    pub output: &'a Path,
    pub include_dir: &'a Path,
    pub lib_dir: &'a Path,
    /// Static archives linked in, normally `lib/*.a`.
    pub archives: &'a [PathBuf],
    /// Target sources exposed to coverage builds.
    pub target_source_dir: Option<&'a Path>,
    pub debug: bool,
    pub extra_flags: &'a [String],
}

pub fn build_command(mode: BuildMode, spec: &BuildSpec<'_>) -> ToolCommand {
    let mut cmd = ToolCommand::new(spec.compiler)
        .arg(format!("-std={}", spec.std))
        .path_flag("-I", spec.include_dir);

    if mode == BuildMode::Coverage {
        if let Some(src) = spec.target_source_dir {
            cmd = cmd.path_flag("-I", src);
        }
        cmd = cmd.args([
            "-fno-sanitize=all",
            "-fprofile-instr-generate",
            "-fcoverage-mapping",
        ]);
    }

    cmd = cmd
        .arg(spec.source)
        .path_flag("-L", spec.lib_dir)
        .args(spec.archives);

    cmd = match mode {
        BuildMode::Fuzz => cmd.args([
            "-fsanitize=address,undefined,fuzzer",
            "-fno-sanitize-recover=all",
            "-fno-omit-frame-pointer",
            "-fsanitize-link-c++-runtime",
        ]),
        BuildMode::Coverage => cmd.arg("-fsanitize=fuzzer"),
    };

    if spec.debug {
        cmd = cmd.arg("-g");
    }
    cmd.arg("-o").arg(spec.output).args(spec.extra_flags)
}

/// Per-input resource limits for the primary fuzz run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputLimits {
    pub rss_limit_mb: u64,
    pub max_len: u64,
    pub input_timeout_secs: u64,
}

/// libFuzzer command-line options.
///
/// No `-jobs`/`-workers`: the fuzzer runs as a single process so that
/// killing the direct child ends the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibFuzzerArgs {
    pub max_runs: u64,
    pub max_total_time_secs: u64,
    pub artifact_dir: PathBuf,
    pub dictionary: Option<PathBuf>,
    /// libFuzzer writes new inputs into the first directory and only reads
    /// the rest.
    pub corpus_dirs: Vec<PathBuf>,
    pub limits: Option<InputLimits>,
}

pub fn fuzz_command(binary: &Path, args: &LibFuzzerArgs) -> ToolCommand {
    let mut cmd = ToolCommand::new(binary)
        .arg(format!("-runs={}", args.max_runs))
        .arg(format!("-max_total_time={}", args.max_total_time_secs))
        .arg(joined("-artifact_prefix=", &args.artifact_dir, "/"));
    if let Some(dict) = &args.dictionary {
        cmd = cmd.path_flag("-dict=", dict);
    }
    if let Some(limits) = args.limits {
        cmd = cmd
            .arg(format!("-rss_limit_mb={}", limits.rss_limit_mb))
            .arg(format!("-max_len={}", limits.max_len))
            .arg(format!("-timeout={}", limits.input_timeout_secs));
    }
    cmd.args(&args.corpus_dirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(cmd: &ToolCommand) -> Vec<String> {
        cmd.get_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_syntax_command() {
        let cmd = syntax_command(
            "clang++",
            "c++17",
            Path::new("/ws/build/cJSON/include"),
            Path::new("/ws/h/id_00001.cpp"),
        );
        assert_eq!(cmd.program_name(), "clang++");
        assert_eq!(
            rendered(&cmd),
            vec![
                "-fsyntax-only",
                "-std=c++17",
                "-I/ws/build/cJSON/include",
                "/ws/h/id_00001.cpp"
            ]
        );
    }

    fn spec<'a>(archives: &'a [PathBuf], extra: &'a [String]) -> BuildSpec<'a> {
        BuildSpec {
            compiler: "clang++",
            std: "c++17",
            source: Path::new("/h/id_00000.cpp"),
            output: Path::new("/f/id_00000"),
            include_dir: Path::new("/b/include"),
            lib_dir: Path::new("/b/lib"),
            archives,
            target_source_dir: Some(Path::new("/b/src/cjson")),
            debug: true,
            extra_flags: extra,
        }
    }

    #[test]
    fn test_fuzz_build_flags() {
        let archives = vec![PathBuf::from("/b/lib/libcjson.a")];
        let extra = vec!["-O2".to_string()];
        let cmd = build_command(BuildMode::Fuzz, &spec(&archives, &extra));
        let args = rendered(&cmd);

        assert!(cmd.has_arg("-fsanitize=address,undefined,fuzzer"));
        assert!(cmd.has_arg("-fno-sanitize-recover=all"));
        assert!(cmd.has_arg("-fno-omit-frame-pointer"));
        assert!(cmd.has_arg("-L/b/lib"));
        assert!(cmd.has_arg("/b/lib/libcjson.a"));
        assert!(cmd.has_arg("-g"));
        assert!(!cmd.has_arg("-I/b/src/cjson"));
        assert!(!cmd.has_arg("-fprofile-instr-generate"));

        let o = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[o + 1], "/f/id_00000");
        assert_eq!(args.last().unwrap(), "-O2");
    }

    #[test]
    fn test_coverage_build_flags() {
        let archives = vec![];
        let mut s = spec(&archives, &[]);
        s.debug = false;
        let cmd = build_command(BuildMode::Coverage, &s);

        assert!(cmd.has_arg("-I/b/src/cjson"));
        assert!(cmd.has_arg("-fno-sanitize=all"));
        assert!(cmd.has_arg("-fprofile-instr-generate"));
        assert!(cmd.has_arg("-fcoverage-mapping"));
        assert!(cmd.has_arg("-fsanitize=fuzzer"));
        assert!(!cmd.has_arg("-fsanitize=address,undefined,fuzzer"));
        assert!(!cmd.has_arg("-g"));
    }

    #[test]
    fn test_fuzz_command_flags() {
        let args = LibFuzzerArgs {
            max_runs: 10_000,
            max_total_time_secs: 60,
            artifact_dir: PathBuf::from("/out/id_00002"),
            dictionary: Some(PathBuf::from("/b/fuzzer.dict")),
            corpus_dirs: vec![
                PathBuf::from("/out/id_00002/corpus"),
                PathBuf::from("/b/corpus"),
            ],
            limits: Some(InputLimits {
                rss_limit_mb: 512,
                max_len: 8192,
                input_timeout_secs: 2,
            }),
        };
        let cmd = fuzz_command(Path::new("/f/id_00002"), &args);
        assert_eq!(
            rendered(&cmd),
            vec![
                "-runs=10000",
                "-max_total_time=60",
                "-artifact_prefix=/out/id_00002/",
                "-dict=/b/fuzzer.dict",
                "-rss_limit_mb=512",
                "-max_len=8192",
                "-timeout=2",
                "/out/id_00002/corpus",
                "/b/corpus",
            ]
        );
        assert!(!cmd.get_args().iter().any(|a| a.to_string_lossy().starts_with("-jobs")));
    }

    #[test]
    fn test_env_and_render() {
        let cmd = ToolCommand::new("fuzzer")
            .arg("-runs=1")
            .env("LLVM_PROFILE_FILE", "/tmp/x.profraw");
        assert_eq!(cmd.render(), "fuzzer -runs=1");
        assert_eq!(cmd.get_env().len(), 1);
    }
}
