use std::collections::BTreeMap;
use tracing::{error, info};

use crate::model::{BackupManifest, Credentials, ObjectVersion};
use crate::storage::backend::{BatchFailure, Connector, CopyCommand, ObjectLocation, StorageError};
use crate::storage::locator::Locator;
use crate::storage::queue::{TaskQueue, COPY_CONCURRENCY};

/// Entries flagged as the latest version when the manifest was recorded (S3)
pub fn latest_by_flag(entries: &[ObjectVersion]) -> Vec<ObjectVersion> {
    entries.iter().filter(|entry| entry.is_latest).cloned().collect()
}

/// Highest generation per path, for providers without a latest flag (GCS)
pub fn latest_by_generation(entries: &[ObjectVersion]) -> Vec<ObjectVersion> {
    let mut newest: BTreeMap<&str, &ObjectVersion> = BTreeMap::new();

    for entry in entries {
        match newest.get(entry.path.as_str()) {
            Some(current) if generation_key(current) >= generation_key(entry) => {}
            _ => {
                newest.insert(entry.path.as_str(), entry);
            }
        }
    }

    newest.into_values().cloned().collect()
}

fn generation_key(entry: &ObjectVersion) -> (i64, &str) {
    (entry.version_id.parse().unwrap_or(i64::MIN), entry.version_id.as_str())
}

/// One copy per entry, pinned to the entry's version, laid out for each side's locator
pub fn plan_copies(source: &Locator, destination: &Locator, entries: &[ObjectVersion]) -> Vec<CopyCommand> {
    entries
        .iter()
        .map(|entry| CopyCommand {
            source: ObjectLocation {
                bucket: source.bucket().to_string(),
                key: source.key(&entry.path),
                version_id: Some(entry.version_id.clone()),
            },
            destination: ObjectLocation {
                bucket: destination.bucket().to_string(),
                key: destination.key(&entry.path),
                version_id: None,
            },
        })
        .collect()
}

/// Copy the current version of every manifest entry into the destination installation.
/// Copy failures are logged per item and reported together once the batch is done.
pub async fn transfer_backup_files<C>(
    connector: &C,
    source_installation: &str,
    source_credentials: &Credentials,
    destination_installation: &str,
    destination_credentials: &Credentials,
    manifest: &BackupManifest,
) -> Result<usize, StorageError>
where
    C: Connector + ?Sized,
{
    let source = Locator::resolve(source_installation, source_credentials)?;
    let destination = Locator::resolve(destination_installation, destination_credentials)?;

    let mut current = connector.current_versions(&manifest.public);
    current.extend(connector.current_versions(&manifest.private));

    let commands = plan_copies(&source, &destination, &current);

    info!(
        source = source_installation,
        destination = destination_installation,
        manifest_entries = manifest.len(),
        copies = commands.len(),
        "Transferring backup files"
    );

    let queue = TaskQueue::new(COPY_CONCURRENCY);
    queue.extend(commands);

    let report = queue
        .drain(move |command: CopyCommand| async move {
            connector
                .copy_version(&command, source_credentials, destination_credentials)
                .await
        })
        .await;

    let copied = report.succeeded();
    let failures: Vec<BatchFailure> = report
        .failures()
        .map(|(command, err)| {
            error!(
                source_bucket = %command.source.bucket,
                source_key = %command.source.key,
                version_id = command.source.version_id.as_deref().unwrap_or(""),
                destination_bucket = %command.destination.bucket,
                destination_key = %command.destination.key,
                error = %err,
                "Failed to copy object"
            );
            BatchFailure {
                bucket: command.source.bucket.clone(),
                path: command.source.key.clone(),
                version_id: command.source.version_id.clone(),
                error: err.to_string(),
            }
        })
        .collect();

    info!(
        source = source_installation,
        destination = destination_installation,
        copied = copied,
        failed = failures.len(),
        "Backup transfer finished"
    );

    if failures.is_empty() {
        Ok(copied)
    } else {
        Err(StorageError::AggregateBatch {
            succeeded: copied,
            failures,
        })
    }
}
