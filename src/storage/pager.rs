use futures::stream::{self, BoxStream, StreamExt};

use crate::model::Credentials;
use crate::storage::backend::{Connector, PageCursor, StorageError, VersionPage};
use crate::storage::locator::Locator;

enum PagerState {
    Start,
    Next(PageCursor),
    Done,
}

/// Lazy stream of listing pages under a raw key prefix.
///
/// Each poll issues at most one request; the cursor returned by a page is carried into
/// the next request until the provider stops returning one. Dropping the stream early
/// abandons the listing without leaving a request in flight.
pub fn version_pages<'a, C>(
    connector: &'a C,
    locator: &'a Locator,
    prefix: String,
    credentials: &'a Credentials,
) -> BoxStream<'a, Result<VersionPage, StorageError>>
where
    C: Connector + ?Sized,
{
    stream::try_unfold(PagerState::Start, move |state| {
        let prefix = prefix.clone();
        async move {
            let cursor = match state {
                PagerState::Start => None,
                PagerState::Next(cursor) => Some(cursor),
                PagerState::Done => return Ok(None),
            };

            let page = connector
                .list_versions_page(locator, &prefix, cursor.clone(), credentials)
                .await?;

            let next = match &page.next {
                Some(next) if Some(next) == cursor.as_ref() => {
                    return Err(StorageError::provider(format!(
                        "listing of {}/{} returned the same cursor twice",
                        locator.bucket(),
                        prefix
                    )));
                }
                Some(next) => PagerState::Next(next.clone()),
                None => PagerState::Done,
            };

            tracing::trace!(
                bucket = locator.bucket(),
                prefix = %prefix,
                versions = page.versions.len(),
                delete_markers = page.delete_markers.len(),
                "Fetched listing page"
            );

            Ok(Some((page, next)))
        }
    })
    .boxed()
}
