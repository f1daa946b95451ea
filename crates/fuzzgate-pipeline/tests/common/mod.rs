//! Scratch workspaces with a fake compiler and fake fuzzers.
//!
//! The fake compiler looks at markers in the harness source:
//!
//! - `BROKEN_SYNTAX` fails every invocation with a clang-style diagnostic
//! - `LINK_ERROR` fails builds (invocations with `-o`)
//! - `CRASH_ME` builds a fuzzer that drops a `crash-*` artifact
//! - `HANG_ME` builds a fuzzer that ignores SIGTERM and sleeps
//! - `COVERAGE_HANG` makes the coverage build hang the same way
//!
//! Otherwise coverage builds produce a fuzzer that writes `LLVM_PROFILE_FILE`.
//! The clean fuzzer saves one new unit into its first corpus directory, as
//! libFuzzer does. Hanging fuzzers leave their PID in `<artifact prefix>pid`.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use fuzzgate_core::{FuzzgateConfig, ProjectMetadata};
use fuzzgate_pipeline::{EvaluationPipeline, RetryPolicy};
use tempfile::TempDir;

pub const PROJECT: &str = "cJSON";

pub const APIS: [&str; 20] = [
    "cJSON_ParseWithLength",
    "cJSON_Delete",
    "cJSON_PrintUnformatted",
    "cJSON_GetArraySize",
    "cJSON_GetArrayItem",
    "cJSON_GetObjectItemCaseSensitive",
    "cJSON_IsString",
    "cJSON_IsNumber",
    "cJSON_Duplicate",
    "cJSON_Compare",
    "cJSON_CreateObject",
    "cJSON_AddItemToObject",
    "cJSON_DetachItemFromArray",
    "cJSON_Minify",
    "cJSON_GetErrorPtr",
    "cJSON_SetValuestring",
    "cJSON_ReplaceItemInArray",
    "cJSON_HasObjectItem",
    "cJSON_InitHooks",
    "cJSON_Version",
];

/// Five known APIs and two `for` loops.
pub const GOOD_HARNESS: &str = r#"#include <stdint.h>
#include <stdlib.h>
#include <cJSON.h>

extern "C" int LLVMFuzzerTestOneInput(const uint8_t *data, size_t size) {
    cJSON *root = cJSON_ParseWithLength((const char *)data, size);
    if (root == NULL) return 0;
    for (int i = 0; i < cJSON_GetArraySize(root); i++) {
        cJSON *item = cJSON_GetArrayItem(root, i);
        (void)item;
    }
    for (int round = 0; round < 2; round++) {
        char *out = cJSON_PrintUnformatted(root);
        free(out);
    }
    cJSON_Delete(root);
    return 0;
}
"#;

/// Only three distinct known APIs.
pub const NARROW_HARNESS: &str = r#"#include <cJSON.h>

extern "C" int LLVMFuzzerTestOneInput(const uint8_t *data, size_t size) {
    cJSON *root = cJSON_ParseWithLength((const char *)data, size);
    int n = cJSON_GetArraySize(root);
    (void)n;
    cJSON_Delete(root);
    return 0;
}
"#;

/// [`GOOD_HARNESS`] with a marker line understood by the fake toolchain.
pub fn marked(marker: &str) -> String {
    format!("// {marker}\n{GOOD_HARNESS}")
}

const COMPILER: &str = r#"#!/bin/sh
out=""
src=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  case "$a" in
    *.cpp|*.c) src="$a" ;;
  esac
  prev="$a"
done
if grep -q BROKEN_SYNTAX "$src"; then
  echo "$src:3:1: error: expected ';' after top level declarator" >&2
  exit 1
fi
if [ -z "$out" ]; then exit 0; fi
if grep -q LINK_ERROR "$src"; then
  echo "undefined reference to 'cJSON_Missing'" >&2
  exit 1
fi
tpl=clean
if grep -q CRASH_ME "$src"; then tpl=crash; fi
if grep -q HANG_ME "$src"; then tpl=hang; fi
case " $* " in
  *" -fprofile-instr-generate "*)
    tpl=coverage
    if grep -q COVERAGE_HANG "$src"; then tpl=hang; fi
    ;;
esac
cp "@TEMPLATES@/$tpl" "$out" && chmod +x "$out"
"#;

const CLEAN_FUZZER: &str = r#"#!/bin/sh
for a in "$@"; do
  case "$a" in
    -*) ;;
    *) echo '{}' > "$a/unit-0001"; break ;;
  esac
done
echo 'Done 10000 runs in 1 second(s)'
exit 0
"#;

const CRASH_FUZZER: &str = r#"#!/bin/sh
p=""
for a in "$@"; do
  case "$a" in
    -artifact_prefix=*) p="${a#-artifact_prefix=}" ;;
  esac
done
echo "==42==ERROR: AddressSanitizer: heap-buffer-overflow" >&2
touch "${p}crash-deadbeef"
exit 1
"#;

const HANG_FUZZER: &str = r#"#!/bin/sh
for a in "$@"; do
  case "$a" in
    -artifact_prefix=*) echo $$ > "${a#-artifact_prefix=}pid" ;;
  esac
done
trap '' TERM INT
exec sleep 30
"#;

const COVERAGE_FUZZER: &str = "#!/bin/sh\necho profile > \"$LLVM_PROFILE_FILE\"\nexit 0\n";

pub struct Workspace {
    pub dir: TempDir,
    pub compiler: PathBuf,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Fast settings pointing at the fake toolchain.
    pub fn config(&self) -> FuzzgateConfig {
        let mut config = FuzzgateConfig {
            root: self.root().to_path_buf(),
            ..FuzzgateConfig::default()
        };
        config.toolchain.cxx = self.compiler.display().to_string();
        config.toolchain.cc = self.compiler.display().to_string();
        config.toolchain.compile_timeout_secs = 30;
        config.fuzz.max_total_time_secs = 5;
        config.fuzz.grace_secs = 5;
        config.scheduler.backoff_base_ms = 20;
        config
    }

    pub fn pipeline(&self) -> EvaluationPipeline {
        self.pipeline_with(self.config())
    }

    pub fn pipeline_with(&self, config: FuzzgateConfig) -> EvaluationPipeline {
        EvaluationPipeline::new(config, metadata())
    }
}

pub fn metadata() -> ProjectMetadata {
    ProjectMetadata::new(APIS.iter().map(|s| s.to_string()).collect())
}

/// Freshly written scripts can briefly fail to exec with ETXTBSY while
/// another test thread forks; spawn retries absorb that.
pub fn retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 5,
        backoff_base_ms: 20,
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// A workspace with a `build/cJSON` tree and the fake toolchain.
pub fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let build = dir.path().join("build").join(PROJECT);
    fs::create_dir_all(build.join("include")).unwrap();
    fs::create_dir_all(build.join("lib")).unwrap();
    fs::create_dir_all(build.join("corpus")).unwrap();
    fs::create_dir_all(build.join("src").join(PROJECT)).unwrap();
    fs::write(build.join("include/cJSON.h"), "/* header */\n").unwrap();
    fs::write(build.join("lib/libcjson.a"), "").unwrap();
    fs::write(build.join("corpus/seed_0"), "[1, 2, 3]").unwrap();
    fs::write(build.join("fuzzer.dict"), "\"null\"\n").unwrap();

    let tools = dir.path().join("tools");
    let templates = tools.join("templates");
    fs::create_dir_all(&templates).unwrap();
    write_script(&templates.join("clean"), CLEAN_FUZZER);
    write_script(&templates.join("crash"), CRASH_FUZZER);
    write_script(&templates.join("hang"), HANG_FUZZER);
    write_script(&templates.join("coverage"), COVERAGE_FUZZER);

    let compiler = tools.join("fake-clang");
    let body = COMPILER.replace("@TEMPLATES@", &templates.display().to_string());
    write_script(&compiler, &body);

    Workspace { dir, compiler }
}

pub fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-9
}

/// PID written by a hanging fake fuzzer into `output_dir`.
pub fn hung_pid(output_dir: &Path) -> u32 {
    let text = fs::read_to_string(output_dir.join("pid")).unwrap();
    text.trim().parse().unwrap()
}

/// Running and not a zombie awaiting its reaper.
pub fn process_alive(pid: u32) -> bool {
    if Path::new("/proc/self").exists() {
        return match fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .is_some_and(|(_, rest)| !rest.starts_with('Z') && !rest.starts_with('X')),
            Err(_) => false,
        };
    }
    let output = Command::new("ps")
        .args(["-o", "stat=", "-p", &pid.to_string()])
        .output()
        .unwrap();
    let stat = String::from_utf8_lossy(&output.stdout);
    let stat = stat.trim();
    output.status.success() && !stat.is_empty() && !stat.starts_with('Z')
}

/// Poll until `pid` has exited, for at most `limit`.
pub fn wait_for_exit(pid: u32, limit: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if !process_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    !process_alive(pid)
}
