use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use backup_warden::config::AppConfig;
use backup_warden::directory::{Directory, StaticDirectory};
use backup_warden::logging::{self, PerfTimer};
use backup_warden::model::Filesource;
use backup_warden::purge::PurgeEngine;
use backup_warden::storage::{BucketSettings, Dispatcher};

/// Versioned backup retention and transfer for S3 and Google Cloud Storage
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON)
    #[arg(long, short, default_value = "backup-warden.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the retention policy to every installation
    Purge {
        /// Actually delete (overrides a dry-run configuration)
        #[arg(long)]
        live: bool,

        /// Number of newest dated backups to keep (overrides the configuration)
        #[arg(long)]
        quantity: Option<usize>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the backups of one installation in one filesource
    ListBackups {
        #[arg(long)]
        installation: String,
        #[arg(long)]
        filesource: String,
    },

    /// Copy the current files of an installation into another installation
    Transfer {
        #[arg(long)]
        source_installation: String,
        #[arg(long)]
        source_filesource: String,
        #[arg(long)]
        destination_installation: String,
        #[arg(long)]
        destination_filesource: String,
    },

    /// Enable versioning, encryption and tags on a dedicated installation bucket
    ConfigureBucket {
        #[arg(long)]
        installation: String,
        #[arg(long)]
        filesource: String,

        /// Bucket tag as key=value, repeatable
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,

        /// Leave default encryption untouched
        #[arg(long)]
        no_encryption: bool,
    },

    /// Write a default configuration file
    InitConfig,
}

fn parse_tag(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, tag)) if !key.is_empty() => Ok((key.to_string(), tag.to_string())),
        _ => Err(format!("expected key=value, got '{}'", value)),
    }
}

async fn resolve_filesource(directory: &StaticDirectory, id: &str, installation: &str) -> Result<Filesource> {
    directory
        .resolve(id, installation)
        .await?
        .with_context(|| format!("filesource '{}' does not serve installation '{}'", id, installation))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::InitConfig = args.command {
        AppConfig::generate_default_config(&args.config)
            .with_context(|| format!("writing {}", args.config.display()))?;
        println!("Wrote default configuration to {}", args.config.display());
        return Ok(());
    }

    let config = AppConfig::load_with_env_overrides(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    logging::init_logging(logging::LoggingConfig::from_settings(&config.logging)?)?;
    config.validate()?;

    let dispatcher = Dispatcher::with_default_connectors();
    let directory = StaticDirectory::from_config(&config);

    match args.command {
        Command::Purge { live, quantity, json } => {
            let mut retention = config.retention.clone();
            if live {
                retention.dry_run = false;
            }
            if let Some(quantity) = quantity {
                anyhow::ensure!(quantity > 0, "--quantity must be at least 1");
                retention.quantity = quantity;
            }

            let engine = PurgeEngine::new(dispatcher, Arc::new(directory), retention);
            let report = engine.run().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for installation in &report.installations {
                    println!(
                        "{}: {} backups, {} planned, {} deleted, {} retained, {} failed",
                        installation.installation,
                        installation.backups_found,
                        installation.planned.len(),
                        installation.deleted.len(),
                        installation.retained.len(),
                        installation.failures.len() + installation.filesource_failures.len(),
                    );
                }
                for failed in &report.failed_installations {
                    println!("{}: FAILED ({})", failed.installation, failed.error);
                }
            }

            if report.has_failures() {
                anyhow::bail!("purge finished with failures");
            }
        }

        Command::ListBackups { installation, filesource } => {
            let filesource = resolve_filesource(&directory, &filesource, &installation).await?;
            for name in dispatcher.list_backups(&installation, &filesource).await? {
                match dispatcher.calculate_date(&filesource, &name) {
                    Ok(date) => println!("{}\t{}", name, date),
                    Err(_) => println!("{}\t-", name),
                }
            }
        }

        Command::Transfer {
            source_installation,
            source_filesource,
            destination_installation,
            destination_filesource,
        } => {
            let _timer = PerfTimer::new("backup_transfer");
            let source = resolve_filesource(&directory, &source_filesource, &source_installation).await?;
            let destination =
                resolve_filesource(&directory, &destination_filesource, &destination_installation).await?;

            let manifest = dispatcher.record_manifest(&source_installation, &source).await?;
            let copied = dispatcher
                .transfer_backup_files(
                    &source_installation,
                    &source,
                    &destination_installation,
                    &destination,
                    &manifest,
                )
                .await?;
            println!("Copied {} of {} recorded versions", copied, manifest.len());
        }

        Command::ConfigureBucket {
            installation,
            filesource,
            tags,
            no_encryption,
        } => {
            let filesource = resolve_filesource(&directory, &filesource, &installation).await?;
            let settings = BucketSettings {
                versioning: true,
                encryption: !no_encryption,
                tags: tags.into_iter().collect::<BTreeMap<_, _>>(),
            };
            dispatcher.configure_bucket(&installation, &settings, &filesource).await?;
            println!("Configured bucket for {}", installation);
        }

        Command::InitConfig => {}
    }

    Ok(())
}
