//! # backup-warden - Versioned backup retention across cloud object stores
//!
//! backup-warden lists, purges and transfers versioned backups kept in Amazon S3 and
//! Google Cloud Storage behind one provider-agnostic connector contract.
//!
//! ## Features
//!
//! - **Provider connectors**: S3 and GCS speak one contract; pagination, delete markers
//!   and generations are normalized per provider
//! - **Bucket layouts**: dedicated bucket per installation (v1) or one shared bucket with
//!   installation-prefixed keys (v2)
//! - **Bounded batches**: deletions and copies run through capped task queues and report
//!   every failed item instead of stopping at the first one
//! - **Retention purge**: keeps the newest N dated backups of each installation, dry run
//!   by default
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use backup_warden::config::AppConfig;
//! use backup_warden::directory::StaticDirectory;
//! use backup_warden::purge::PurgeEngine;
//! use backup_warden::storage::Dispatcher;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load_with_env_overrides("backup-warden.json")?;
//!     let directory = Arc::new(StaticDirectory::from_config(&config));
//!     let engine = PurgeEngine::new(Dispatcher::with_default_connectors(), directory, config.retention);
//!
//!     let report = engine.run().await?;
//!     println!("{} backups planned for deletion", report.planned());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`model`] - Filesources, credentials, object versions and backups
//! - [`storage`] - Connector contract, provider connectors, queue, retry and batch engines
//! - [`directory`] - Installation and filesource lookup
//! - [`purge`] - Retention planning and the purge workflow
//! - [`config`] - Configuration file and environment overrides
//! - [`logging`] - Tracing subscriber setup

pub mod model;
pub mod storage;
pub mod directory;
pub mod purge;
pub mod config;
pub mod logging;

pub use model::{Backup, BackupManifest, Credentials, FileVersions, Filesource, ObjectVersion};
pub use storage::{Connector, Dispatcher, StorageError};
pub use directory::{Directory, StaticDirectory};
pub use purge::{plan_retention, PurgeEngine, PurgeError, PurgeReport, RetentionPlan};
