use tracing::Level;
use tracing_subscriber::{
    fmt::time::UtcTime,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};
use std::path::{Path, PathBuf};
use std::sync::Once;
use anyhow::Result;

use crate::config::LoggingConfig as LoggingSettings;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Whether to enable structured logging (JSON format)
    pub structured: bool,
    /// Log file path (if None, logs only to stdout)
    pub file_path: Option<PathBuf>,
    /// Whether to include file/line info in logs
    pub include_location: bool,
    /// Environment filter override (e.g., "backup_warden=debug,aws_smithy_runtime=warn")
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            structured: false,
            file_path: None,
            include_location: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Build from the `logging` section of the configuration file
    pub fn from_settings(settings: &LoggingSettings) -> Result<Self> {
        let level: Level = settings
            .level
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid log level: {}", settings.level))?;

        Ok(Self {
            level,
            structured: settings.json,
            file_path: settings.file_path.as_ref().map(PathBuf::from),
            ..Default::default()
        })
    }
}

/// Initialize the global tracing subscriber
static INIT: Once = Once::new();

/// Install the subscriber once per process. Later calls only validate their filter.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(&config)?;

    let mut result = Ok(());
    INIT.call_once(|| {
        result = setup_tracing(config, env_filter);
    });
    result
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let filter = match &config.env_filter {
        Some(filter_str) => EnvFilter::try_new(filter_str)?,
        None => EnvFilter::from_default_env()
            .add_directive(format!("backup_warden={}", config.level).parse()?),
    };
    Ok(filter)
}

fn setup_tracing(config: LoggingConfig, env_filter: EnvFilter) -> Result<()> {
    // Console layer
    let console_layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_file(config.include_location)
        .with_line_number(config.include_location);
    let console_layer = if config.structured {
        console_layer.json().with_ansi(false).boxed()
    } else {
        console_layer.with_ansi(true).boxed()
    };

    // File layer if configured
    let file_layer = config.file_path.as_ref().map(|file_path| {
        let file_appender = tracing_appender::rolling::daily(
            file_path.parent().unwrap_or_else(|| Path::new(".")),
            file_path.file_name().and_then(|n| n.to_str()).unwrap_or("backup-warden.log"),
        );

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_timer(UtcTime::rfc_3339())
            .with_target(true)
            .with_ansi(false);

        if config.structured {
            file_layer.json().boxed()
        } else {
            file_layer.boxed()
        }
    });

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = ?config.level,
        structured = config.structured,
        file = ?config.file_path,
        "Logging initialized"
    );

    Ok(())
}

/// Logs the elapsed time of a run when dropped
pub struct PerfTimer {
    name: String,
    start: std::time::Instant,
}

impl PerfTimer {
    pub fn new(name: &str) -> Self {
        tracing::debug!(timer = name, "Starting performance timer");
        Self {
            name: name.to_string(),
            start: std::time::Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        tracing::info!(
            timer = %self.name,
            duration_ms = self.start.elapsed().as_millis() as u64,
            category = "performance",
            "Performance timer completed"
        );
    }
}
