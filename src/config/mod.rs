pub mod app_config;

// Re-export main configuration types
pub use app_config::{AppConfig, FilesourceConfig, LoggingConfig, RetentionConfig};
