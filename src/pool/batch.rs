//! Concurrent batch runner with join-then-aggregate semantics.
//!
//! One task per item, bounded by a semaphore. A failing item never cancels
//! its siblings; the runner joins everything, then reports one summary. The
//! caller decides what a non-empty failure set means, but the default
//! posture is that partial success is not silently acceptable.

use crate::models::{CutoverError, ItemFailure, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// One unit of work submitted to the runner.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: String,
    pub payload: Value,
}

impl BatchItem {
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Aggregated outcome of a batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<ItemFailure>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Collapse into a single aggregate error if any item failed.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.failed.is_empty() {
            Ok(self.succeeded)
        } else {
            Err(CutoverError::BatchPartialFailure {
                failures: self.failed,
            })
        }
    }
}

/// Executes independent sub-operations with bounded parallelism.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    max_parallelism: usize,
}

impl BatchRunner {
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            max_parallelism: max_parallelism.max(1),
        }
    }

    /// Run `worker` for every item and block until all of them finish.
    ///
    /// Worker panics are counted as failures of that item, not of the batch
    /// machinery.
    pub async fn run_all<W>(&self, items: Vec<BatchItem>, worker: W) -> BatchSummary
    where
        W: Fn(BatchItem) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let total = items.len();
        info!(
            items = total,
            max_parallelism = self.max_parallelism,
            "Starting batch"
        );

        let worker = Arc::new(worker);
        let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
        let mut handles = Vec::with_capacity(total);

        for item in items {
            let worker = Arc::clone(&worker);
            let semaphore = Arc::clone(&semaphore);
            let id = item.id.clone();
            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return Err(CutoverError::Internal("batch semaphore closed".to_string()))
                    }
                };
                worker(item).await
            });
            handles.push((id, handle));
        }

        let mut summary = BatchSummary::default();
        for (id, handle) in handles {
            match handle.await {
                Ok(Ok(())) => summary.succeeded.push(id),
                Ok(Err(e)) => {
                    warn!(item = %id, error = %e, "Batch item failed");
                    summary.failed.push(ItemFailure {
                        item_id: id,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(item = %id, error = %e, "Batch item panicked");
                    summary.failed.push(ItemFailure {
                        item_id: id,
                        message: format!("worker panicked: {e}"),
                    });
                }
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            "Batch finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn items(n: usize) -> Vec<BatchItem> {
        (0..n)
            .map(|i| BatchItem::new(format!("item-{i}"), json!({ "index": i })))
            .collect()
    }

    #[tokio::test]
    async fn every_worker_completes_before_run_all_returns() {
        let completed = Arc::new(AtomicUsize::new(0));
        let runner = BatchRunner::new(4);

        let counter = Arc::clone(&completed);
        let summary = runner
            .run_all(items(10), move |item| {
                let counter = Arc::clone(&counter);
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    if item.id.ends_with('3') || item.id.ends_with('7') {
                        Err(CutoverError::RemoteOperation(format!("{} rejected", item.id)))
                    } else {
                        Ok(())
                    }
                })
            })
            .await;

        assert_eq!(completed.load(Ordering::SeqCst), 10);
        assert_eq!(summary.succeeded.len(), 8);
        assert_eq!(summary.failed.len(), 2);
        let failed_ids: Vec<_> = summary.failed.iter().map(|f| f.item_id.as_str()).collect();
        assert!(failed_ids.contains(&"item-3"));
        assert!(failed_ids.contains(&"item-7"));
    }

    #[tokio::test]
    async fn all_failures_surface_in_one_aggregate_error() {
        let runner = BatchRunner::new(2);
        let summary = runner
            .run_all(items(3), |item| {
                Box::pin(async move {
                    Err(CutoverError::RemoteOperation(format!("{} broke", item.id)))
                })
            })
            .await;

        let err = summary.into_result().unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("item-0 broke"));
        assert!(rendered.contains("item-1 broke"));
        assert!(rendered.contains("item-2 broke"));
    }

    #[tokio::test]
    async fn parallelism_stays_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let runner = BatchRunner::new(2);

        let in_flight_c = Arc::clone(&in_flight);
        let peak_c = Arc::clone(&peak);
        let summary = runner
            .run_all(items(8), move |_item| {
                let in_flight = Arc::clone(&in_flight_c);
                let peak = Arc::clone(&peak_c);
                Box::pin(async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .await;

        assert!(summary.is_success());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn a_panicking_worker_counts_as_a_failed_item() {
        let runner = BatchRunner::new(4);
        let summary = runner
            .run_all(items(3), |item| {
                Box::pin(async move {
                    if item.id == "item-1" {
                        panic!("worker exploded");
                    }
                    Ok(())
                })
            })
            .await;

        assert_eq!(summary.succeeded.len(), 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].item_id, "item-1");
    }

    #[tokio::test]
    async fn empty_batch_is_a_success() {
        let runner = BatchRunner::new(4);
        let summary = runner
            .run_all(Vec::new(), |_item| Box::pin(async { Ok(()) }))
            .await;
        assert!(summary.is_success());
        assert!(summary.into_result().unwrap().is_empty());
    }
}
