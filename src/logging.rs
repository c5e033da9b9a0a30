//! Tracing subscriber set-up.
//!
//! Filter precedence: `RUST_LOG`, then `-v` flags, then the configured level,
//! then `info`. Output goes to stderr (pretty or JSON) and optionally to a
//! daily-rotated file.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::config::LoggingSettings;

const LOG_FILE_PREFIX: &str = "chat-relay.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Build the level filter. An unparsable directive falls back to `info`
/// with a warning on stderr, since no subscriber exists yet.
pub fn build_filter(rust_log: Option<&str>, configured: &str, verbose: u8) -> EnvFilter {
    if let Some(directive) = rust_log.filter(|d| !d.trim().is_empty()) {
        match directive.parse::<EnvFilter>() {
            Ok(filter) => return filter,
            Err(e) => eprintln!("WARN: RUST_LOG='{}' is not a valid filter ({}); ignoring", directive, e),
        }
    }

    let level = match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    };

    match level.parse::<EnvFilter>() {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("WARN: log level '{}' is not a valid filter ({}); falling back to 'info'", level, e);
            EnvFilter::new("info")
        }
    }
}

/// Install the global subscriber. Keep the returned guard alive for the
/// process lifetime or buffered file output is lost.
pub fn init(settings: &LoggingSettings, verbose: u8, json: bool) -> Result<Option<WorkerGuard>> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(rust_log.as_deref(), &settings.level, verbose);
    let json = json || settings.json;

    let mut layers: Vec<BoxedLayer> = vec![filter.boxed()];

    let stderr_layer: BoxedLayer = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).with_target(true).boxed()
    };
    layers.push(stderr_layer);

    let guard = match &settings.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer: BoxedLayer = if json {
                fmt::layer().json().with_writer(writer).boxed()
            } else {
                fmt::layer().with_ansi(false).with_writer(writer).boxed()
            };
            layers.push(file_layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
