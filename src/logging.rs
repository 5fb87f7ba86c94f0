//! Structured JSON logging.
//!
//! Every event is written as one JSON line with a timestamp, level, target
//! and fields. Output goes through a non-blocking writer so a slow stream
//! never holds up a response; the returned guard must be kept alive until
//! shutdown or buffered lines are lost.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// The server's stream.
    Stdout,
    /// Used by CLI commands whose results are printed on stdout.
    Stderr,
}

/// Installs the global subscriber. Level comes from `RUST_LOG`, default `info`.
pub fn init_logging(output: LogOutput) -> WorkerGuard {
    let (writer, guard) = match output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(false)
        .with_writer(writer)
        .try_init();

    guard
}
