//! Logging configuration for tradearea.
//!
//! Sets up the tracing subscriber used by the CLI. `-v` shows grid sizes,
//! census lookups and greedy picks; local search logs every improving swap
//! and restart, and those rounds only appear with `-vv`.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Module whose per-round events are held back until trace verbosity.
const LOCAL_SEARCH_TARGET: &str = "tradearea::optimize::local_search";

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only (`-q`).
    Quiet,
    /// Run summaries and stored-run reuse (info and above).
    #[default]
    Normal,
    /// Engine detail except local search rounds (`-v`).
    Verbose,
    /// Everything, including each local search round (`-vv`).
    Trace,
}

impl Verbosity {
    /// Level for the `-v` count and `-q` flag; quiet wins.
    #[must_use]
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        if quiet {
            return Self::Quiet;
        }
        match verbose {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Trace,
        }
    }

    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[must_use]
    pub fn filter_directives(&self) -> String {
        match self {
            Self::Verbose => format!("tradearea=debug,{LOCAL_SEARCH_TARGET}=info"),
            other => format!("tradearea={}", other.to_level_filter()),
        }
    }

    /// Convert verbosity to tracing level filter.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }
}

/// Initialize the logging system.
///
/// Call once at startup. `RUST_LOG` takes precedence over `verbosity`.
/// Output goes to stderr so that `--format json` results stay clean on stdout.
///
/// # Examples
///
/// ```no_run
/// use tradearea::{init_logging, logging::Verbosity};
///
/// // Same as `tradearea -vv optimize ...`: show every local search round
/// init_logging(Verbosity::from_flags(2, false));
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directives()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    // Ignore error if already set
    let _ = subscriber.try_init();
}

/// Initialize logging for tests.
///
/// Only warnings and errors are shown to keep test output clean.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_to_level() {
        assert_eq!(Verbosity::Quiet.to_level_filter(), Level::ERROR);
        assert_eq!(Verbosity::Normal.to_level_filter(), Level::INFO);
        assert_eq!(Verbosity::Verbose.to_level_filter(), Level::DEBUG);
        assert_eq!(Verbosity::Trace.to_level_filter(), Level::TRACE);
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(Verbosity::from_flags(0, false), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(1, false), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(3, false), Verbosity::Trace);
        assert_eq!(Verbosity::from_flags(2, true), Verbosity::Quiet);
    }

    #[test]
    fn test_filter_directives() {
        assert_eq!(Verbosity::Quiet.filter_directives(), "tradearea=ERROR");
        assert_eq!(Verbosity::Normal.filter_directives(), "tradearea=INFO");
        assert_eq!(
            Verbosity::Verbose.filter_directives(),
            "tradearea=debug,tradearea::optimize::local_search=info"
        );
        assert_eq!(Verbosity::Trace.filter_directives(), "tradearea=TRACE");
        for verbosity in [Verbosity::Quiet, Verbosity::Verbose, Verbosity::Trace] {
            assert!(EnvFilter::try_new(verbosity.filter_directives()).is_ok());
        }
    }

    #[test]
    fn test_verbosity_default() {
        assert_eq!(Verbosity::default(), Verbosity::Normal);
    }

    #[test]
    fn test_init_logging_with_all_verbosity_levels() {
        // Only the first call actually installs the subscriber
        init_logging(Verbosity::Quiet);
        init_logging(Verbosity::Normal);
        init_logging(Verbosity::Verbose);
        init_logging(Verbosity::Trace);
    }

    #[test]
    fn test_init_test_logging_does_not_panic() {
        init_test_logging();
    }
}
