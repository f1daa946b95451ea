//! Log output for the `fuzzgate` binary.
//!
//! Everything goes to stderr. `fuzzgate evaluate` and `fuzzgate batch` print
//! their rewards as JSON on stdout, and the trainer reading that stream must
//! never see a log line in it.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const FUZZGATE_TARGETS: [&str; 3] = ["fuzzgate", "fuzzgate_core", "fuzzgate_pipeline"];

/// Directives used when `RUST_LOG` is unset: fuzzgate crates at `level`,
/// everything else at `warn`.
pub fn default_filter(level: Level) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(
        FUZZGATE_TARGETS
            .iter()
            .map(|target| format!("{target}={}", level.as_str())),
    );
    directives.join(",")
}

/// Install the global subscriber; only the first call in a process has any
/// effect. `json` switches to one JSON object per event.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(layer.json()).try_init().ok();
    } else {
        registry.with(layer).try_init().ok();
    }
}
