use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::RetentionConfig;
use crate::directory::Directory;
use crate::logging::PerfTimer;
use crate::model::Backup;
use crate::storage::dispatcher::Dispatcher;
use crate::storage::queue::{TaskQueue, PURGE_CONCURRENCY};

/// Failures that stop a purge run or one installation of it
#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    #[error("Installation list unavailable: {0:#}")]
    InstallationsUnavailable(anyhow::Error),

    #[error("Filesource list unavailable for installation {installation}: {error:#}")]
    FilesourcesUnavailable { installation: String, error: anyhow::Error },
}

/// Ranking of one installation's backups
#[derive(Debug, Clone, Default)]
pub struct RetentionPlan {
    /// Oldest dated backups beyond the retention quantity
    pub delete: Vec<Backup>,
    /// Newest `quantity` dated backups, oldest first
    pub keep: Vec<Backup>,
    /// Backups whose name carries no parseable date; never ranked, never deleted
    pub undated: Vec<Backup>,
}

/// Split `backups` into the ones to delete and the ones to keep.
///
/// Only dated backups are ranked. When there are no more dated backups than
/// `quantity` nothing is deleted.
pub fn plan_retention(backups: Vec<Backup>, quantity: usize) -> RetentionPlan {
    let (mut dated, undated): (Vec<Backup>, Vec<Backup>) = backups.into_iter().partition(|b| b.date.is_some());
    dated.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.name.cmp(&b.name)));

    if dated.len() <= quantity {
        return RetentionPlan {
            delete: Vec::new(),
            keep: dated,
            undated,
        };
    }

    let keep = dated.split_off(dated.len() - quantity);

    RetentionPlan {
        delete: dated,
        keep,
        undated,
    }
}

/// Report entry for one backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSummary {
    pub name: String,
    pub filesource_id: String,
    pub date: Option<NaiveDate>,
}

impl From<&Backup> for BackupSummary {
    fn from(backup: &Backup) -> Self {
        Self {
            name: backup.name.clone(),
            filesource_id: backup.filesource_id.clone(),
            date: backup.date,
        }
    }
}

/// A backup whose deletion did not complete
#[derive(Debug, Clone, Serialize)]
pub struct BackupFailure {
    pub backup: BackupSummary,
    pub error: String,
}

/// A filesource that could not be resolved or listed for an installation
#[derive(Debug, Clone, Serialize)]
pub struct FilesourceFailure {
    pub filesource_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallationReport {
    pub installation: String,
    pub dry_run: bool,
    pub backups_found: usize,
    /// Candidates for deletion (in dry-run mode nothing else happens to them)
    pub planned: Vec<BackupSummary>,
    pub deleted: Vec<BackupSummary>,
    /// Newest dated backups plus every undated one
    pub retained: Vec<BackupSummary>,
    pub undated: Vec<BackupSummary>,
    pub failures: Vec<BackupFailure>,
    pub filesource_failures: Vec<FilesourceFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallationFailure {
    pub installation: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub dry_run: bool,
    pub quantity: usize,
    pub installations: Vec<InstallationReport>,
    pub failed_installations: Vec<InstallationFailure>,
}

impl PurgeReport {
    pub fn planned(&self) -> usize {
        self.installations.iter().map(|i| i.planned.len()).sum()
    }

    pub fn deleted(&self) -> usize {
        self.installations.iter().map(|i| i.deleted.len()).sum()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_installations.is_empty()
            || self
                .installations
                .iter()
                .any(|i| !i.failures.is_empty() || !i.filesource_failures.is_empty())
    }
}

/// Retention purge over every installation known to the directory
pub struct PurgeEngine {
    dispatcher: Dispatcher,
    directory: Arc<dyn Directory>,
    retention: RetentionConfig,
}

impl PurgeEngine {
    pub fn new(dispatcher: Dispatcher, directory: Arc<dyn Directory>, retention: RetentionConfig) -> Self {
        Self {
            dispatcher,
            directory,
            retention,
        }
    }

    /// Purge every installation in turn. A failing installation is recorded and the
    /// run moves on; only an unavailable installation list fails the run.
    pub async fn run(&self) -> Result<PurgeReport, PurgeError> {
        let _timer = PerfTimer::new("backup_purge");

        let installations = self
            .directory
            .installations()
            .await
            .map_err(PurgeError::InstallationsUnavailable)?;

        info!(
            installations = installations.len(),
            dry_run = self.retention.dry_run,
            quantity = self.retention.quantity,
            "Starting backup purge"
        );

        let mut report = PurgeReport {
            dry_run: self.retention.dry_run,
            quantity: self.retention.quantity,
            ..Default::default()
        };

        for installation in installations {
            match self.purge_installation(&installation).await {
                Ok(installation_report) => report.installations.push(installation_report),
                Err(err) => {
                    error!(installation = %installation, error = %err, "Backup purge failed for installation");
                    report.failed_installations.push(InstallationFailure {
                        installation,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            dry_run = report.dry_run,
            installations = report.installations.len(),
            failed_installations = report.failed_installations.len(),
            planned = report.planned(),
            deleted = report.deleted(),
            "Backup purge complete"
        );

        Ok(report)
    }

    /// Purge one installation
    pub async fn purge_installation(&self, installation: &str) -> Result<InstallationReport, PurgeError> {
        let mut report = InstallationReport {
            installation: installation.to_string(),
            dry_run: self.retention.dry_run,
            ..Default::default()
        };

        let backups = self.collect_backups(installation, &mut report).await?;
        report.backups_found = backups.len();

        let plan = plan_retention(backups, self.retention.quantity);

        info!(
            installation = installation,
            backups = report.backups_found,
            dated = plan.delete.len() + plan.keep.len(),
            undated = plan.undated.len(),
            to_delete = plan.delete.len(),
            to_keep = plan.keep.len(),
            "Backup retention plan"
        );

        for backup in &plan.undated {
            warn!(
                installation = installation,
                backup = %backup.name,
                filesource = %backup.filesource_id,
                "Backup has no parseable date, retaining it"
            );
        }

        report.undated = plan.undated.iter().map(BackupSummary::from).collect();
        report.retained = plan.keep.iter().chain(plan.undated.iter()).map(BackupSummary::from).collect();
        report.planned = plan.delete.iter().map(BackupSummary::from).collect();

        if plan.delete.is_empty() {
            info!(
                installation = installation,
                quantity = self.retention.quantity,
                "Nothing to purge, dated backups within retention quantity"
            );
            return Ok(report);
        }

        if self.retention.dry_run {
            for backup in &plan.delete {
                info!(
                    installation = installation,
                    backup = %backup.name,
                    filesource = %backup.filesource_id,
                    date = ?backup.date,
                    "Dry run: would delete backup"
                );
            }
            return Ok(report);
        }

        self.delete_backups(installation, plan.delete, &mut report).await;
        Ok(report)
    }

    async fn collect_backups(&self, installation: &str, report: &mut InstallationReport) -> Result<Vec<Backup>, PurgeError> {
        let filesource_ids = self
            .directory
            .filesources()
            .await
            .map_err(|error| PurgeError::FilesourcesUnavailable {
                installation: installation.to_string(),
                error,
            })?;

        let mut backups = Vec::new();

        for filesource_id in filesource_ids {
            let filesource = match self.directory.resolve(&filesource_id, installation).await {
                Ok(Some(filesource)) => filesource,
                Ok(None) => {
                    debug!(installation = installation, filesource = %filesource_id, "Filesource does not serve installation");
                    continue;
                }
                Err(err) => {
                    error!(installation = installation, filesource = %filesource_id, error = %err, "Failed to resolve filesource");
                    report.filesource_failures.push(FilesourceFailure {
                        filesource_id,
                        error: format!("{:#}", err),
                    });
                    continue;
                }
            };

            let names = match self.dispatcher.list_backups(installation, &filesource).await {
                Ok(names) => names,
                Err(err) if err.is_not_found() => {
                    debug!(installation = installation, filesource = %filesource_id, "No bucket for installation in filesource");
                    continue;
                }
                Err(err) => {
                    error!(installation = installation, filesource = %filesource_id, error = %err, "Failed to list backups");
                    report.filesource_failures.push(FilesourceFailure {
                        filesource_id,
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            info!(installation = installation, filesource = %filesource_id, backups = names.len(), "Listed backups");

            for name in names {
                let date = match self.dispatcher.calculate_date(&filesource, &name) {
                    Ok(date) => Some(date),
                    Err(err) => {
                        warn!(installation = installation, backup = %name, error = %err, "Cannot date backup");
                        None
                    }
                };

                backups.push(Backup {
                    name,
                    filesource_id: filesource_id.clone(),
                    filesource: filesource.clone(),
                    date,
                });
            }
        }

        Ok(backups)
    }

    async fn delete_backups(&self, installation: &str, candidates: Vec<Backup>, report: &mut InstallationReport) {
        let queue = TaskQueue::new(PURGE_CONCURRENCY);
        queue.extend(candidates);

        let dispatcher = &self.dispatcher;
        let outcomes = queue
            .drain(move |backup: Backup| async move {
                info!(
                    installation = installation,
                    backup = %backup.name,
                    filesource = %backup.filesource_id,
                    "Deleting backup"
                );
                dispatcher.delete_all(installation, &backup.folder(), &backup.filesource).await
            })
            .await
            .outcomes;

        for outcome in outcomes {
            let summary = BackupSummary::from(&outcome.task);
            match outcome.result {
                Ok(objects) => {
                    info!(
                        installation = installation,
                        backup = %summary.name,
                        filesource = %summary.filesource_id,
                        objects = objects,
                        "Deleted backup"
                    );
                    report.deleted.push(summary);
                }
                Err(err) => {
                    error!(
                        installation = installation,
                        backup = %summary.name,
                        filesource = %summary.filesource_id,
                        error = %err,
                        "Failed to delete backup"
                    );
                    report.failures.push(BackupFailure {
                        backup: summary,
                        error: err.to_string(),
                    });
                }
            }
        }

        // outcomes arrive in completion order
        report.deleted.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.name.cmp(&b.name)));
        report
            .failures
            .sort_by(|a, b| a.backup.date.cmp(&b.backup.date).then_with(|| a.backup.name.cmp(&b.backup.name)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Credentials, Filesource};

    fn backup(name: &str, date: Option<(i32, u32, u32)>) -> Backup {
        Backup {
            name: name.to_string(),
            filesource_id: "primary".to_string(),
            filesource: Filesource::amazon(Credentials::default()),
            date: date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
        }
    }

    fn names(backups: &[Backup]) -> Vec<&str> {
        backups.iter().map(|b| b.name.as_str()).collect()
    }

    #[test]
    fn test_oldest_backup_is_purged() {
        let plan = plan_retention(
            vec![
                backup("mar", Some((2024, 3, 1))),
                backup("jan", Some((2024, 1, 1))),
                backup("feb", Some((2024, 2, 1))),
            ],
            2,
        );
        assert_eq!(names(&plan.delete), vec!["jan"]);
        assert_eq!(names(&plan.keep), vec!["feb", "mar"]);
    }

    #[test]
    fn test_within_quantity_nothing_is_purged() {
        let plan = plan_retention(vec![backup("a", Some((2024, 1, 1))), backup("b", Some((2024, 1, 2)))], 2);
        assert!(plan.delete.is_empty());
        assert_eq!(plan.keep.len(), 2);
    }

    #[test]
    fn test_undated_backups_are_not_ranked() {
        let plan = plan_retention(
            vec![
                backup("old", Some((2023, 1, 1))),
                backup("mystery-1", None),
                backup("new", Some((2024, 1, 1))),
                backup("mystery-2", None),
            ],
            1,
        );
        assert_eq!(names(&plan.delete), vec!["old"]);
        assert_eq!(names(&plan.keep), vec!["new"]);
        assert_eq!(plan.undated.len(), 2);
    }

    #[test]
    fn test_only_undated_backups_are_all_kept() {
        let plan = plan_retention(vec![backup("x", None), backup("y", None), backup("z", None)], 1);
        assert!(plan.delete.is_empty());
        assert!(plan.keep.is_empty());
        assert_eq!(plan.undated.len(), 3);
    }
}
