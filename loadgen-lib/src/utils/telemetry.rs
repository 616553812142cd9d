use std::{io::IsTerminal as _, path::Path};

use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing::{
        self,
        metadata::LevelFilter,
        subscriber::{EnvFilter, fmt::writer::BoxMakeWriter},
    },
};

/// Options for [`init_tracing`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryConfig<'a> {
    /// Use DEBUG instead of INFO as the default level.
    pub verbose: bool,
    /// Human oriented multi-line output.
    pub pretty: bool,
    /// Append to this file instead of writing to stderr.
    pub output: Option<&'a Path>,
}

/// Install the global tracing subscriber.
///
/// The default level can always be overwritten using the `RUST_LOG`
/// environment variable, e.g. `RUST_LOG=loadgen_lib::pool=trace`.
pub fn init_tracing(cfg: TelemetryConfig<'_>) -> Result<(), BoxError> {
    let directive = if cfg.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
    .into();

    let make_writer = match cfg.output {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .with_context(|| format!("open log file at path '{}'", path.display()))?;

            BoxMakeWriter::new(file)
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let subscriber = tracing::subscriber::fmt()
        .with_ansi(cfg.output.is_none() && std::io::stderr().is_terminal())
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(directive)
                .from_env_lossy(),
        )
        .with_writer(make_writer);

    if cfg.pretty {
        subscriber.pretty().try_init()?;
    } else {
        subscriber.try_init()?;
    }

    tracing::debug!("tracing is set up");
    Ok(())
}
