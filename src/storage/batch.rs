use tracing::{error, info};

use crate::model::Credentials;
use crate::storage::backend::{BatchFailure, Connector, StorageError};
use crate::storage::locator::Locator;
use crate::storage::queue::{TaskQueue, DELETE_CONCURRENCY};
use crate::storage::retry;

/// One version-qualified delete
#[derive(Debug, Clone)]
struct DeleteTask {
    key: String,
    path: String,
    version_id: String,
}

/// Delete every version and delete marker under `folder`.
///
/// Items are deleted through a bounded queue; a failing item never stops the others.
/// When `folder` is the root of a dedicated bucket, the bucket itself is removed once a
/// fresh listing confirms it is empty. Returns the number of deleted items,
/// `AggregateBatch` with that number and every failed item, or `BucketDeletion`
/// when every item went but the emptied bucket could not be removed.
pub async fn delete_all<C>(
    connector: &C,
    installation: &str,
    folder: &str,
    credentials: &Credentials,
) -> Result<usize, StorageError>
where
    C: Connector + ?Sized,
{
    let locator = Locator::resolve(installation, credentials)?;
    let listing = connector.list_file_versions(installation, folder, credentials).await?;

    info!(
        installation = installation,
        bucket = locator.bucket(),
        folder = folder,
        versions = listing.versions.len(),
        delete_markers = listing.delete_markers.len(),
        "Deleting object history"
    );

    let queue = TaskQueue::new(DELETE_CONCURRENCY);
    queue.extend(listing.versions.into_iter().map(|version| DeleteTask {
        key: locator.key(&version.path),
        path: version.path,
        version_id: version.version_id,
    }));
    queue.extend(listing.delete_markers.into_iter().map(|marker| DeleteTask {
        key: locator.key(&marker.path),
        path: marker.path,
        version_id: marker.version_id,
    }));

    let target = &locator;
    let report = queue
        .drain(move |task: DeleteTask| async move {
            match connector
                .remove_version(target, &task.key, &task.version_id, credentials)
                .await
            {
                // already gone is as good as deleted
                Err(err) if err.is_not_found() => Ok(()),
                other => other,
            }
        })
        .await;

    let deleted = report.succeeded();
    let failures: Vec<BatchFailure> = report
        .failures()
        .map(|(task, err)| BatchFailure {
            bucket: locator.bucket().to_string(),
            path: task.path.clone(),
            version_id: Some(task.version_id.clone()),
            error: err.to_string(),
        })
        .collect();

    for failure in &failures {
        error!(
            installation = installation,
            bucket = %failure.bucket,
            path = %failure.path,
            version_id = failure.version_id.as_deref().unwrap_or(""),
            error = %failure.error,
            "Failed to delete object version"
        );
    }

    info!(
        installation = installation,
        bucket = locator.bucket(),
        folder = folder,
        deleted = deleted,
        failed = failures.len(),
        "Object history deletion finished"
    );

    if !failures.is_empty() {
        // the bucket still holds the failed items, so it stays
        return Err(StorageError::AggregateBatch {
            succeeded: deleted,
            failures,
        });
    }

    if folder.is_empty() && !locator.is_shared() {
        if let Err(err) = remove_bucket_if_empty(connector, installation, &locator, credentials).await {
            error!(installation = installation, bucket = locator.bucket(), error = %err, "Failed to delete bucket");
            return Err(StorageError::BucketDeletion {
                bucket: locator.bucket().to_string(),
                deleted,
                message: err.to_string(),
            });
        }
    }

    Ok(deleted)
}

async fn remove_bucket_if_empty<C>(
    connector: &C,
    installation: &str,
    locator: &Locator,
    credentials: &Credentials,
) -> Result<(), StorageError>
where
    C: Connector + ?Sized,
{
    let remaining = connector.list_file_versions(installation, "", credentials).await?;
    if !remaining.is_empty() {
        info!(
            installation = installation,
            bucket = locator.bucket(),
            remaining = remaining.len(),
            "Bucket still holds objects, keeping it"
        );
        return Ok(());
    }

    let policy = connector.retry_policy();
    retry::with_backoff("delete_bucket", &policy, move || connector.remove_bucket(locator, credentials)).await?;
    info!(installation = installation, bucket = locator.bucket(), "Deleted empty bucket");
    Ok(())
}
