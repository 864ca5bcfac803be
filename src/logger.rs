use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub const LOG_FILE: &str = "embedhost.log";
pub const CALL_FILE: &str = "embedhost-calls.json";

/// Keeps the non-blocking file writers alive. Dropping it flushes them.
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug, Default)]
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

/// Install the global subscriber.
///
/// - `log_level` is an `EnvFilter` directive (e.g. `"info"` or
///   `"module_bridge=debug,info"`); `RUST_LOG` is ignored.
/// - Console output always goes to stderr.
/// - With a `log_dir`, a daily rolling text log is written there, along with
///   a daily rolling JSON file holding one line per completed channel call
///   (events on target `call`).
pub fn init_tracing(log_level: &str, log_dir: Option<&Path>) -> anyhow::Result<LogGuard> {
    let env_filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level `{log_level}`"))?;

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter);

    let mut guards = Vec::new();
    let file_layers = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("could not create log dir {}", dir.display()))?;

            let (txt_writer, txt_guard) =
                tracing_appender::non_blocking(RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE));
            let txt_layer = fmt::layer()
                .with_writer(txt_writer)
                .with_ansi(false)
                .with_filter(EnvFilter::try_new(log_level)?);

            let (json_writer, json_guard) =
                tracing_appender::non_blocking(RollingFileAppender::new(Rotation::DAILY, dir, CALL_FILE));
            let json_layer = fmt::layer()
                .json()
                .with_writer(json_writer)
                .with_target(true)
                .with_filter(EnvFilter::new("call=info"));

            guards.push(txt_guard);
            guards.push(json_guard);
            Some(txt_layer.and_then(json_layer))
        }
        None => None,
    };

    Registry::default()
        .with(console_layer)
        .with(file_layers)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(LogGuard { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_a_bad_level_before_installing_anything() {
        let err = init_tracing("module_bridge=loud", None).unwrap_err();
        assert!(err.to_string().contains("invalid log level"));
    }
}
