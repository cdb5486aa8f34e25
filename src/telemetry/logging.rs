//! `tracing` subscriber setup: console output, optional rotated log files
//! and the bridge into OpenTelemetry.

use opentelemetry_sdk::trace::Tracer;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::{LogLevel, LoggingConfig};
use crate::{KubetracerError, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

const LOG_FILE_PREFIX: &str = "kubetracer.log";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f UTC";

/// Keeps the background file writer alive; drop it last
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the configured level. When `tracer` is given, spans
/// from `tracing` macros are also exported through it.
pub fn init_logging(config: &LoggingConfig, tracer: Option<Tracer>) -> Result<LoggingGuard> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console = fmt::layer().with_writer(std::io::stderr).with_target(true);
    let console = if config.json {
        console
            .json()
            .with_current_span(true)
            .with_filter(filter(config.level)?)
            .boxed()
    } else {
        console.with_filter(filter(config.level)?).boxed()
    };
    layers.push(console);

    let mut file_guard = None;
    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir).map_err(|e| {
            KubetracerError::configuration_error(format!("Failed to create log directory: {}", e))
        })?;
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));
        file_guard = Some(guard);

        let file = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_timer(ChronoUtc::new(TIMESTAMP_FORMAT.to_string()))
            .with_file(true)
            .with_line_number(true);
        let file = if config.json {
            file.json()
                .with_span_list(true)
                .with_filter(filter(config.level)?)
                .boxed()
        } else {
            file.with_filter(filter(config.level)?).boxed()
        };
        layers.push(file);
    }

    if let Some(tracer) = tracer {
        layers.push(
            tracing_opentelemetry::layer()
                .with_tracer(tracer)
                .with_filter(filter(config.level)?)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| {
            KubetracerError::configuration_error(format!(
                "Failed to set global tracing subscriber: {}",
                e
            ))
        })?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// `RUST_LOG` if set, else this crate at `level` and everything else at warn
fn filter(level: LogLevel) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(level)))
        .map_err(|e| {
            KubetracerError::configuration_error(format!("Failed to create tracing filter: {}", e))
        })
}

fn default_directives(level: LogLevel) -> String {
    match level {
        LogLevel::Off => "off".to_string(),
        level => format!("kubetracer={},warn", level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(default_directives(LogLevel::Info), "kubetracer=info,warn");
        assert_eq!(default_directives(LogLevel::Trace), "kubetracer=trace,warn");
        assert_eq!(default_directives(LogLevel::Off), "off");
    }

    #[test]
    fn test_default_directives_parse() {
        for level in [LogLevel::Error, LogLevel::Debug, LogLevel::Off] {
            assert!(EnvFilter::try_new(default_directives(level)).is_ok());
        }
    }
}
