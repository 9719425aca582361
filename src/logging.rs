//! `tracing` subscriber setup.
//!
//! Engine events carry dotted names under the `penumbra` target, e.g.
//! `relationship.save_entity`, `relationship.cascade_delete`, `query.execute`,
//! `query_cache.subscribe` and `db.open`. Per-record storage writes are emitted at
//! `trace` level (`memory_store.save`).

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{PenumbraError, Result};

/// Directive used when neither the caller nor `RUST_LOG` supplies one:
/// engine lifecycle and query events, without per-record chatter.
pub const DEFAULT_LOG_DIRECTIVE: &str = "penumbra=info";

/// Resolves the filter: explicit directive, then `RUST_LOG`, then
/// [`DEFAULT_LOG_DIRECTIVE`].
fn env_filter(directive: Option<&str>) -> Result<EnvFilter> {
    let parsed = match directive {
        Some(directive) => EnvFilter::try_new(directive),
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_LOG_DIRECTIVE)),
    };
    parsed.map_err(|e| PenumbraError::Schema(format!("invalid log directive: {e}")))
}

/// Installs a global `fmt` subscriber.
///
/// `directive` is any `EnvFilter` directive (`"penumbra=debug"`,
/// `"penumbra::cache=trace"`); `None` defers to `RUST_LOG` and then to
/// [`DEFAULT_LOG_DIRECTIVE`]. Fails if a global subscriber is already set.
pub fn init_logging(directive: Option<&str>) -> Result<()> {
    fmt()
        .with_env_filter(env_filter(directive)?)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| PenumbraError::Invalid("logging already initialized"))
}
