//! Configuration Management
//!
//! File-based configuration with environment variable overrides for the
//! telemetry pipeline that backs the tracing client: where spans are
//! exported, how the service identifies itself, and how logs are written.
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `telemetry.otlp_endpoint` (also enables telemetry) |
//! | `OTEL_EXPORTER_OTLP_HEADERS` | `telemetry.otlp_headers` (`k1=v1,k2=v2`) |
//! | `OTEL_SERVICE_NAME` | `telemetry.service_name` |
//! | `KUBETRACER_TRACER_NAME` | `telemetry.tracer_name` |
//! | `KUBETRACER_CONSOLE_EXPORT` | `telemetry.console_export` (also enables telemetry) |
//! | `KUBETRACER_EXPORT_MODE` | `telemetry.export_mode` (`batch` or `simple`) |
//! | `KUBETRACER_LOG_LEVEL` | `logging.level` |
//! | `KUBETRACER_LOG_JSON` | `logging.json` |
//! | `KUBETRACER_LOG_DIR` | `logging.log_dir` |

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable parsing error: {0}")]
    EnvVarParse(String),
    #[error("File parsing error: {0}")]
    FileParse(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct KubetracerConfig {
    /// OpenTelemetry export configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How finished spans are handed to the exporter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Buffer spans and export from a background task
    #[default]
    Batch,
    /// Export each span as it ends
    Simple,
}

impl FromStr for ExportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "batch" => Ok(Self::Batch),
            "simple" => Ok(Self::Simple),
            _ => Err(format!("Invalid export mode: {}", s)),
        }
    }
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    /// Whether a tracer provider is built at all
    #[serde(default)]
    pub enabled: bool,
    /// OTLP endpoint URL; port 4318 selects HTTP, anything else gRPC
    pub otlp_endpoint: Option<String>,
    /// Extra headers sent with OTLP/HTTP exports
    #[serde(default)]
    pub otlp_headers: HashMap<String, String>,
    /// Print finished spans to stdout
    #[serde(default)]
    pub console_export: bool,
    /// `service.name` resource attribute
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Instrumentation scope name of the tracer handed to the client
    #[serde(default = "default_tracer_name")]
    pub tracer_name: String,
    #[serde(default)]
    pub export_mode: ExportMode,
}

/// Log verbosity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// No log output at all
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(level)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OFF" => Ok(LogLevel::Off),
            "ERROR" => Ok(LogLevel::Error),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            "TRACE" => Ok(LogLevel::Trace),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Level for this crate when `RUST_LOG` is unset
    #[serde(default)]
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
    /// Also write daily-rotated log files into this directory
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Bridge `tracing` spans into the OpenTelemetry tracer
    #[serde(default = "default_true")]
    pub otel_bridge: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: None,
            otlp_headers: HashMap::new(),
            console_export: false,
            service_name: default_service_name(),
            tracer_name: default_tracer_name(),
            export_mode: ExportMode::Batch,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
            log_dir: None,
            otel_bridge: true,
        }
    }
}

impl TelemetryConfig {
    /// True when the endpoint speaks OTLP over HTTP
    pub fn uses_http(&self) -> bool {
        self.otlp_endpoint
            .as_deref()
            .is_some_and(|endpoint| endpoint.contains(":4318"))
    }
}

impl KubetracerConfig {
    /// Load configuration from a file (supports TOML, YAML, JSON)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let extension = path.extension().and_then(|s| s.to_str());

        match extension {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string()))
            }
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string()))
            }
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string()))
            }
            _ => Err(ConfigError::FileParse(
                "Unsupported file format. Use .toml, .yaml, .yml, or .json".to_string(),
            )),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Telemetry configuration
        if let Ok(endpoint) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.telemetry.enabled = true;
            config.telemetry.otlp_endpoint = Some(endpoint);
        }
        if let Ok(headers_str) = env::var("OTEL_EXPORTER_OTLP_HEADERS") {
            config.telemetry.otlp_headers = parse_otlp_headers(&headers_str)?;
        }
        if let Ok(service_name) = env::var("OTEL_SERVICE_NAME") {
            config.telemetry.service_name = service_name;
        }
        if let Ok(tracer_name) = env::var("KUBETRACER_TRACER_NAME") {
            config.telemetry.tracer_name = tracer_name;
        }
        if let Ok(console_export) = env::var("KUBETRACER_CONSOLE_EXPORT") {
            config.telemetry.console_export = parse_bool("KUBETRACER_CONSOLE_EXPORT", &console_export)?;
            if config.telemetry.console_export {
                config.telemetry.enabled = true;
            }
        }
        if let Ok(mode) = env::var("KUBETRACER_EXPORT_MODE") {
            config.telemetry.export_mode = mode
                .parse()
                .map_err(|e| ConfigError::EnvVarParse(format!("KUBETRACER_EXPORT_MODE: {}", e)))?;
        }

        // Logging configuration
        if let Ok(level) = env::var("KUBETRACER_LOG_LEVEL") {
            config.logging.level = level
                .parse()
                .map_err(|e| ConfigError::EnvVarParse(format!("KUBETRACER_LOG_LEVEL: {}", e)))?;
        }
        if let Ok(json) = env::var("KUBETRACER_LOG_JSON") {
            config.logging.json = parse_bool("KUBETRACER_LOG_JSON", &json)?;
        }
        if let Ok(dir) = env::var("KUBETRACER_LOG_DIR") {
            config.logging.log_dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }

    /// Merge configuration with environment variable overrides
    pub fn merge_with_env(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;

        // Environment takes precedence
        if env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
            self.telemetry.enabled = true;
            self.telemetry.otlp_endpoint = env_config.telemetry.otlp_endpoint;
        }
        if env::var("OTEL_EXPORTER_OTLP_HEADERS").is_ok() {
            self.telemetry.otlp_headers = env_config.telemetry.otlp_headers;
        }
        if env::var("OTEL_SERVICE_NAME").is_ok() {
            self.telemetry.service_name = env_config.telemetry.service_name;
        }
        if env::var("KUBETRACER_TRACER_NAME").is_ok() {
            self.telemetry.tracer_name = env_config.telemetry.tracer_name;
        }
        if env::var("KUBETRACER_CONSOLE_EXPORT").is_ok() {
            self.telemetry.console_export = env_config.telemetry.console_export;
            self.telemetry.enabled |= env_config.telemetry.console_export;
        }
        if env::var("KUBETRACER_EXPORT_MODE").is_ok() {
            self.telemetry.export_mode = env_config.telemetry.export_mode;
        }
        if env::var("KUBETRACER_LOG_LEVEL").is_ok() {
            self.logging.level = env_config.logging.level;
        }
        if env::var("KUBETRACER_LOG_JSON").is_ok() {
            self.logging.json = env_config.logging.json;
        }
        if env::var("KUBETRACER_LOG_DIR").is_ok() {
            self.logging.log_dir = env_config.logging.log_dir;
        }

        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.telemetry.validate()
    }
}

impl TelemetryConfig {
    /// Validate the telemetry section on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.otlp_endpoint.is_none() && !self.console_export {
            return Err(ConfigError::Validation(
                "OTLP endpoint or console export required when telemetry is enabled".to_string(),
            ));
        }
        if self.service_name.is_empty() {
            return Err(ConfigError::Validation(
                "Service name cannot be empty".to_string(),
            ));
        }
        if self.tracer_name.is_empty() {
            return Err(ConfigError::Validation(
                "Tracer name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::EnvVarParse(format!("{}: {}", var, e)))
}

/// Parse OTLP headers from environment variable format
/// Expected format: "key1=value1,key2=value2"
fn parse_otlp_headers(headers_str: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut headers = HashMap::new();

    for pair in headers_str.split(',') {
        match pair.trim().split_once('=') {
            Some((key, value)) => {
                headers.insert(key.to_string(), value.to_string());
            }
            None => {
                return Err(ConfigError::EnvVarParse(format!(
                    "Invalid OTLP header format: {}",
                    pair
                )));
            }
        }
    }

    Ok(headers)
}

// Default value functions for serde
fn default_service_name() -> String {
    "kubetracer".to_string()
}

fn default_tracer_name() -> String {
    "kubetracer".to_string()
}

fn default_true() -> bool {
    true
}
