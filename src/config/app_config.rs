use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::path::Path;
use anyhow::Result;

use crate::model::Filesource;

/// Main application configuration
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Installation ids the purge walks, in order
    #[serde(default)]
    pub installations: Vec<String>,
    /// Filesources by id
    #[serde(default)]
    pub filesources: BTreeMap<String, FilesourceConfig>,
}

/// Retention policy
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Report what would be deleted without deleting anything
    pub dry_run: bool,
    /// Number of newest dated backups kept per installation
    pub quantity: usize,
}

/// Logging configuration
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log file path (optional, logs to console only if None)
    #[serde(default)]
    pub file_path: Option<String>,
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

/// A filesource entry: where the data lives plus the installations it serves
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FilesourceConfig {
    #[serde(flatten)]
    pub filesource: Filesource,
    /// Installations stored in this filesource; empty means all of them
    #[serde(default)]
    pub installations: Vec<String>,
}

impl FilesourceConfig {
    pub fn serves(&self, installation: &str) -> bool {
        self.installations.is_empty() || self.installations.iter().any(|i| i == installation)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            quantity: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env_overrides<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = if path.as_ref().exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Retention overrides
        if let Some(dry_run) = lookup("BACKUP_WARDEN_DRY_RUN") {
            self.retention.dry_run = parse_flag(&dry_run)
                .ok_or_else(|| anyhow::anyhow!("BACKUP_WARDEN_DRY_RUN must be true or false, got '{}'", dry_run))?;
        }

        if let Some(quantity) = lookup("BACKUP_WARDEN_RETENTION_QUANTITY") {
            self.retention.quantity = quantity.trim().parse().map_err(|_| {
                anyhow::anyhow!("BACKUP_WARDEN_RETENTION_QUANTITY must be a positive integer, got '{}'", quantity)
            })?;
        }

        // Logging overrides
        if let Some(log_level) = lookup("BACKUP_WARDEN_LOG_LEVEL") {
            self.logging.level = log_level;
        }

        if let Some(log_file) = lookup("BACKUP_WARDEN_LOG_FILE") {
            self.logging.file_path = Some(log_file);
        }

        if let Some(json) = lookup("BACKUP_WARDEN_LOG_JSON") {
            self.logging.json = parse_flag(&json)
                .ok_or_else(|| anyhow::anyhow!("BACKUP_WARDEN_LOG_JSON must be true or false, got '{}'", json))?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.retention.quantity == 0 {
            return Err(anyhow::anyhow!("Retention quantity must be at least 1"));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level));
        }

        if let Some(empty) = self.installations.iter().find(|i| i.trim().is_empty()) {
            return Err(anyhow::anyhow!("Installation ids cannot be empty (got '{}')", empty));
        }

        for (id, entry) in &self.filesources {
            if entry.filesource.provider.trim().is_empty() || entry.filesource.product.trim().is_empty() {
                return Err(anyhow::anyhow!("Filesource '{}' needs both a provider and a product", id));
            }
            if let Some(unknown) = entry.installations.iter().find(|i| !self.installations.contains(i)) {
                return Err(anyhow::anyhow!(
                    "Filesource '{}' references unknown installation '{}'",
                    id,
                    unknown
                ));
            }
        }

        Ok(())
    }

    /// Generate default configuration file
    pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
        Self::default().save_to_file(path)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
