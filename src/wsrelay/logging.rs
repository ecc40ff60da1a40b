use std::io;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Keeps the non-blocking writer's worker thread alive for the process
/// lifetime.
#[derive(Debug)]
pub struct LoggingRuntime {
    _guard: WorkerGuard,
}

/// Install the global tracing subscriber. Status lines go to standard
/// output; `RUST_LOG` overrides `level` when set.
pub fn init(level: &str) -> anyhow::Result<LoggingRuntime> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            let directive = match level.trim().to_ascii_lowercase().as_str() {
                "error" => "error",
                "warn" => "warn",
                "debug" => "debug",
                "trace" => "trace",
                _ => "info",
            };
            EnvFilter::try_new(directive)
        })
        .context("logging: init filter")?;

    let (writer, guard) = tracing_appender::non_blocking(io::stdout());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true),
        )
        .init();

    Ok(LoggingRuntime { _guard: guard })
}
