//! Logging setup and the crate-wide tracing prelude.
//!
//! Under systemd (`JOURNAL_STREAM` set) events go to the journal with
//! structured fields intact; otherwise they are formatted to stdout with
//! local timestamps. Filtering honors `RUST_LOG` and defaults to `info`.

use std::env;

use time::macros::format_description;
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt::time::LocalTime, prelude::*};

pub mod prelude {
    pub use ::tracing::{debug, error, info, trace, warn};
}

const DEFAULT_FILTER: LevelFilter = LevelFilter::INFO;

/// Install the global subscriber. Call once, early in `main`.
pub fn init_journald_or_stdout() {
    let filter = EnvFilter::builder()
        .with_default_directive(DEFAULT_FILTER.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(filter);

    if env::var_os("JOURNAL_STREAM").is_some() {
        match tracing_journald::layer() {
            Ok(journald) => {
                registry.with(journald).init();
                return;
            }
            Err(e) => eprintln!("journald unavailable ({e}), logging to stdout"),
        }
    }

    let timer = LocalTime::new(format_description!(
        "[hour]:[minute]:[second].[subsecond digits:3]"
    ));
    registry
        .with(tracing_subscriber::fmt::layer().with_timer(timer))
        .init();
}
