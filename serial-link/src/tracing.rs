//! Where serial-link's log events end up.
//!
//! The daemon picks a sink once, before opening any port: journald when
//! started by systemd, a filtered stdout writer otherwise. Modules only emit
//! events, importing the level macros from [`prelude`].

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Environment variable consulted for the log filter.
pub const FILTER_ENV: &str = "RUST_LOG";

/// Install a subscriber for the daemon.
///
/// Under systemd (detected through `JOURNAL_STREAM`) events go to journald,
/// anywhere else they are written to stdout.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_err() {
        init_stdout(LevelFilter::INFO);
        return;
    }

    match tracing_journald::layer() {
        Ok(layer) => tracing_subscriber::registry().with(layer).init(),
        Err(e) => {
            init_stdout(LevelFilter::INFO);
            error!(error = %e, "Failed to connect to journald, logging to stdout.");
        }
    }
}

/// Log to stdout, filtered by `RUST_LOG` with `default_level` as fallback.
pub fn init_stdout(default_level: LevelFilter) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var(FILTER_ENV)
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_timer(LocalTimer))
        .init();
}

// Serial traffic is bursty, so keep milliseconds in the timestamp. Local time
// falls back to UTC when the offset cannot be determined (multi-threaded
// startup on some platforms).
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let stamp = now
            .format(time::macros::format_description!(
                "[hour]:[minute]:[second].[subsecond digits:3]"
            ))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{}", stamp)
    }
}
