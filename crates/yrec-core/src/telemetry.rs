//! Log setup for the `yrec` binary.
//!
//! Logs go to stderr so stdout stays free for per-run progress lines and
//! summaries. Without `RUST_LOG`, only the YREC crates log at the requested
//! level; dependencies are held at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crate targets that get the requested level by default.
pub const LOG_TARGETS: &[&str] = &["yrec", "yrec_core", "yrec_batch"];

/// Filter directives used when `RUST_LOG` is unset, e.g.
/// `warn,yrec=info,yrec_core=info,yrec_batch=info`.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    std::iter::once("warn".to_string())
        .chain(LOG_TARGETS.iter().map(|t| format!("{t}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. `RUST_LOG` overrides `level` entirely.
///
/// A second call is a no-op.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let registry = tracing_subscriber::registry().with(filter);
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let installed = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
    if installed.is_ok() {
        tracing::debug!(json, level = %level, "Tracing initialised");
    }
}

/// `--verbose` turns on debug output.
pub fn level_for(verbose: bool) -> Level {
    if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    }
}
