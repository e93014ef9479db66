//! Tracing subscriber setup for the `apx` binary.
//!
//! Diagnostics go to stderr next to progress output; stdout only carries
//! summaries.
//!
//! # Filter priority (highest to lowest)
//!
//! 1. `APX_LOG` (directives, e.g. `asset_pipeline=debug,warn`)
//! 2. `RUST_LOG`
//! 3. CLI flags (`-v` → debug, `-q` → error)
//! 4. Default: `warn`

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "APX_LOG";

const CRATE_TARGET: &str = "asset_pipeline";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    /// Verbose wins when both flags are given.
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    pub const fn default_level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::WARN,
            Self::Verbose => Level::DEBUG,
        }
    }
}

/// Install the global subscriber. Call once, before loading config.
pub fn init_subscriber(verbosity: Verbosity) {
    let filter = build_env_filter(verbosity, std::env::var(LOG_ENV).ok().as_deref());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_target(true)
        .with_level(true);

    if verbosity == Verbosity::Verbose {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.with_timer(fmt::time::uptime()))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.without_time().compact())
            .init();
    }
}

/// An unparseable `APX_LOG` falls through to `RUST_LOG` and then the flags.
fn build_env_filter(verbosity: Verbosity, project_directives: Option<&str>) -> EnvFilter {
    if let Some(directives) = project_directives {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return filter;
        }
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::try_new(fallback_directive(verbosity))
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_level().as_str()))
}

fn fallback_directive(verbosity: Verbosity) -> String {
    let level = verbosity.default_level();
    if verbosity == Verbosity::Verbose {
        // keep dependency chatter (hyper, rustls) at info
        format!("info,{}={}", CRATE_TARGET, level)
    } else {
        level.to_string()
    }
}
