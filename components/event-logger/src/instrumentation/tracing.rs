// Local crates
use crate::helpers::load_config::{LogFormat, LogSettings};

// External crates
use anyhow::{Context, Result};
use console_subscriber::ConsoleLayer;
use std::io::IsTerminal;
use std::panic;
use tracing::error;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    filter::{Directive, EnvFilter},
    fmt,
    prelude::*,
    registry::Registry,
};

const LOG_FILE_NAME: &str = "vcel.log";

/// Install the global subscriber.
///
/// Diagnostics go to stderr, or to a daily rolling file under
/// `settings.directory`; stdout is reserved for event lines. The returned
/// guard flushes the non-blocking writer and must live until exit.
pub fn init_tracing(settings: &LogSettings) -> Result<WorkerGuard> {
    let (writer, guard) = match &settings.directory {
        Some(directory) => {
            tracing_appender::non_blocking(rolling::daily(directory, LOG_FILE_NAME))
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let mut filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)
            .with_context(|| format!("invalid log level {:?}", settings.level))?,
    };

    if settings.tokio_console {
        if let Ok(tokio_directive) = "tokio=trace".parse::<Directive>() {
            filter = filter.add_directive(tokio_directive);
        }
        if let Ok(runtime_directive) = "runtime=trace".parse::<Directive>() {
            filter = filter.add_directive(runtime_directive);
        }
    }

    // Colour only for an interactive stderr
    let ansi = use_ansi(settings, std::io::stderr().is_terminal());

    let text_layer = (settings.format == LogFormat::Text).then(|| {
        fmt::layer()
            .with_ansi(ansi)
            .with_writer(writer.clone())
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
    });

    let json_layer = (settings.format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_writer(writer.clone())
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
    });

    let console_layer = settings
        .tokio_console
        .then(|| ConsoleLayer::builder().spawn());

    let subscriber = Registry::default()
        .with(console_layer)
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(ErrorLayer::default());

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;

    Ok(guard)
}

fn use_ansi(settings: &LogSettings, stderr_is_terminal: bool) -> bool {
    settings.directory.is_none() && stderr_is_terminal
}

/// Log panics through tracing, then fall through to the default hook so the
/// message still reaches stderr.
pub fn init_panic_handler() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let msg = match panic_info.payload().downcast_ref::<&str>() {
            Some(s) => (*s).to_string(),
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => s.clone(),
                None => "Unknown panic".to_string(),
            },
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            message = %msg,
            location = %location,
            "Application panicked!"
        );

        previous(panic_info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_ansi_only_on_terminal_stderr() {
        let stderr = LogSettings::default();
        assert!(use_ansi(&stderr, true));
        assert!(!use_ansi(&stderr, false));

        let file = LogSettings {
            directory: Some(PathBuf::from("/var/log/vcel")),
            ..LogSettings::default()
        };
        assert!(!use_ansi(&file, true));
    }
}
