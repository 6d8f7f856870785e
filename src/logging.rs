// src/logging.rs

use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

pub const LOG_ENV: &str = "HISTORIAN_LOG";

/// Installs the global subscriber; later calls are no-ops.
///
/// Levels come from `HISTORIAN_LOG` (e.g. `repo_historian::history=debug`),
/// defaulting to `repo_historian=info`. Output goes to stderr so JSON
/// results on stdout stay clean.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new("repo_historian=info"));

        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .with(filter)
            .init();
    });
}
