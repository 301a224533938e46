use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Concurrent deletions per `delete_all`
pub const DELETE_CONCURRENCY: usize = 100;
/// Concurrent copies per transfer
pub const COPY_CONCURRENCY: usize = 25;
/// Concurrent backup purges per installation
pub const PURGE_CONCURRENCY: usize = 10;

/// Result of one task, paired with the task itself for reporting
#[derive(Debug)]
pub struct TaskOutcome<T, R, E> {
    pub task: T,
    pub result: Result<R, E>,
}

/// Everything a drained queue produced
#[derive(Debug)]
pub struct DrainReport<T, R, E> {
    pub outcomes: Vec<TaskOutcome<T, R, E>>,
}

impl<T, R, E> DrainReport<T, R, E> {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&T, &E)> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err().map(|e| (&o.task, e)))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Cloneable handle for adding tasks to a queue, including from inside a running task
#[derive(Debug)]
pub struct QueueHandle<T> {
    sender: UnboundedSender<T>,
}

impl<T> Clone for QueueHandle<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> QueueHandle<T> {
    /// Returns false once the queue has drained and been dropped
    pub fn push(&self, task: T) -> bool {
        self.sender.send(task).is_ok()
    }
}

/// Work queue with a fixed concurrency cap.
///
/// Tasks are collected first and run by `drain`, which keeps at most `limit` handler
/// futures in flight, records every outcome independently and resolves once every
/// submitted task (late additions included) has finished. The handler futures are polled
/// by the draining task itself, so the report is only ever written from one place.
pub struct TaskQueue<T> {
    limit: usize,
    sender: UnboundedSender<T>,
    receiver: UnboundedReceiver<T>,
}

impl<T> TaskQueue<T> {
    pub fn new(limit: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            limit: limit.max(1),
            sender,
            receiver,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn handle(&self) -> QueueHandle<T> {
        QueueHandle {
            sender: self.sender.clone(),
        }
    }

    pub fn push(&self, task: T) {
        // the receiver lives as long as self, so this cannot fail
        let _ = self.sender.send(task);
    }

    pub fn extend<I: IntoIterator<Item = T>>(&self, tasks: I) {
        for task in tasks {
            self.push(task);
        }
    }

    /// Run every queued task through `handler` and wait for all of them
    pub async fn drain<F, Fut, R, E>(mut self, handler: F) -> DrainReport<T, R, E>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let handler = &handler;
        let mut in_flight = FuturesUnordered::new();
        let mut outcomes = Vec::new();

        loop {
            while in_flight.len() < self.limit {
                match self.receiver.try_recv() {
                    Ok(task) => in_flight.push(async move {
                        let result = handler(task.clone()).await;
                        TaskOutcome { task, result }
                    }),
                    Err(_) => break,
                }
            }

            match in_flight.next().await {
                Some(outcome) => outcomes.push(outcome),
                None => break,
            }
        }

        DrainReport { outcomes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let queue = TaskQueue::new(4);
        queue.extend(0..50u32);

        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let report = queue
            .drain(|_task| {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                }
            })
            .await;

        assert_eq!(report.len(), 50);
        assert_eq!(report.succeeded(), 50);
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_siblings() {
        let queue = TaskQueue::new(3);
        queue.extend(1..=10u32);

        let report = queue
            .drain(|task| async move {
                if task % 3 == 0 {
                    Err(format!("task {} failed", task))
                } else {
                    Ok(task * 10)
                }
            })
            .await;

        assert_eq!(report.len(), 10);
        assert_eq!(report.succeeded(), 7);
        let mut failed: Vec<u32> = report.failures().map(|(task, _)| *task).collect();
        failed.sort();
        assert_eq!(failed, vec![3, 6, 9]);
    }

    #[tokio::test]
    async fn test_late_additions_are_drained() {
        let queue = TaskQueue::new(2);
        let handle = queue.handle();
        queue.push(3u32);

        let report = queue
            .drain(|task| {
                let handle = handle.clone();
                async move {
                    if task > 0 {
                        handle.push(task - 1);
                    }
                    Ok::<_, String>(task)
                }
            })
            .await;

        let mut seen: Vec<u32> = report.outcomes.iter().map(|o| o.task).collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_queue_drains_immediately() {
        let queue: TaskQueue<u32> = TaskQueue::new(10);
        let report = queue.drain(|task| async move { Ok::<_, String>(task) }).await;
        assert!(report.is_empty());
    }
}
