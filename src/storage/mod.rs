pub mod backend;
pub mod backends;
pub mod batch;
pub mod dispatcher;
pub mod locator;
pub mod naming;
pub mod pager;
pub mod queue;
pub mod retry;
pub mod transfer;

pub use backend::{
    BatchFailure, BucketSettings, Connector, ConnectorKind, CopyCommand, ObjectLocation, PageCursor, Product,
    Provider, StorageError, VersionPage,
};
pub use backends::{GcsConnector, MemoryConnector, S3Connector};
pub use dispatcher::Dispatcher;
pub use locator::Locator;
pub use queue::{DrainReport, QueueHandle, TaskOutcome, TaskQueue};
pub use retry::{RetryDecision, RetryPolicy};
