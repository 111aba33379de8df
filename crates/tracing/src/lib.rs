//! Subscriber setup for the relay's test suites.
//!
//! The networking crates log through [`tracing`] with targets such as `net::ecies`, `net::peer`,
//! `net::session` and `net::eth`. [`init_test_tracing`] installs a subscriber that prints those
//! events through the test harness, filtered by `RUST_LOG`:
//!
//! ```
//! relay_tracing::init_test_tracing();
//! tracing::debug!(target: "net::peer", "visible with RUST_LOG=net::peer=debug");
//! ```

#![doc(issue_tracker_base_url = "https://github.com/blxr-relay/relay/issues/")]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub use tracing;
pub use tracing_subscriber;

use tracing_subscriber::{filter::ParseError, EnvFilter};

/// Directives applied before `RUST_LOG`. They silence the async runtime's per-poll events, which
/// drown session logs once `trace` is enabled globally.
const QUIET_DIRECTIVES: [&str; 2] = ["mio=off", "tokio_util=off"];

/// Builds the filter from `RUST_LOG` plus `directives`, a comma separated list such as
/// `net::peer=trace,net::ecies=debug`.
///
/// Without `RUST_LOG` or a matching directive only errors are shown.
pub fn env_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    QUIET_DIRECTIVES
        .into_iter()
        .chain(directives.split(',').filter(|d| !d.is_empty()))
        .try_fold(EnvFilter::builder().from_env_lossy(), |filter, directive| {
            Ok(filter.add_directive(directive.parse()?))
        })
}

/// Installs a subscriber that writes through the test harness, so output is captured per test
/// unless `--nocapture` is passed.
///
/// Targets are printed since several sessions log side by side. Later calls, and calls after
/// another subscriber was set, do nothing.
pub fn init_test_tracing() {
    let filter = env_filter("").unwrap_or_else(|_| EnvFilter::from_default_env());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_test_writer()
        .try_init();
}
