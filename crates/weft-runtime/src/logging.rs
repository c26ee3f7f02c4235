#![forbid(unsafe_code)]

//! JSON structured log output (feature `tracing-json`).
//!
//! The runtime only emits `tracing` events; applications choose the
//! subscriber. This module offers a ready-made one: newline-delimited JSON on
//! stderr, filtered by an `EnvFilter` directive string (`RUST_LOG` syntax).
//!
//! Targets worth enabling:
//!
//! | target                          | level   | content                         |
//! |---------------------------------|---------|---------------------------------|
//! | `weft_runtime::reactive::tracker` | `trace` | session open/close, set sizes   |
//! | `weft_runtime::reactive`        | `debug` | reconciliation, disposal        |
//! | `weft_runtime::locator`         | `debug` | scope create/dispose            |
//! | `weft_widgets`                  | `debug` | scheduler flushes, renders      |

use tracing::Subscriber;
use tracing_subscriber::EnvFilter;

/// Build a JSON subscriber filtered by `directives` (for example
/// `"weft_runtime=debug"`).
///
/// Invalid directives fall back to `warn`.
pub fn json_subscriber(directives: &str) -> impl Subscriber + Send + Sync + 'static {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish()
}

/// Install [`json_subscriber`] as the global default.
///
/// Returns `false` if a global subscriber was already set.
pub fn init_json(directives: &str) -> bool {
    tracing::subscriber::set_global_default(json_subscriber(directives)).is_ok()
}
