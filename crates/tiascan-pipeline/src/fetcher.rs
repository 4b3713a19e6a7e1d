//! Fetch worker pool
//!
//! A fixed number of workers pull heights off a shared task queue, fetch
//! the block and its execution results from the node, and push the result
//! to the sequencer. A failed fetch is retried at the same height forever
//! with a fixed backoff; a stuck height stalls one worker slot, never the
//! queue. Workers observe cancellation between attempts and never push a
//! partial result.

use {
    crate::{
        metrics::PipelineMetrics,
        module::{Module, Output, Shutdown},
    },
    anyhow::Result,
    async_trait::async_trait,
    dashmap::DashMap,
    std::{sync::Arc, time::Duration},
    tiascan_common::types::{FetchedBlock, Height},
    tiascan_node::NodeApi,
    tokio::sync::{mpsc, Mutex},
    tracing::{debug, warn},
};

/// Fixed sleep between fetch attempts for the same height.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Handle the sync driver uses to enqueue heights. Deduplicates against
/// heights already queued or in flight.
#[derive(Clone)]
pub struct TaskQueue {
    pending: Arc<DashMap<Height, ()>>,
    tx: mpsc::Sender<Height>,
    metrics: Arc<PipelineMetrics>,
}

impl TaskQueue {
    /// Enqueues `height` unless it is already pending. Returns whether a
    /// task was actually submitted.
    pub async fn submit(&self, height: Height) -> bool {
        if self.pending.insert(height, ()).is_some() {
            return false;
        }
        if self.tx.send(height).await.is_err() {
            // Pool is shutting down; forget the reservation.
            self.pending.remove(&height);
            return false;
        }
        self.metrics
            .tasks_submitted
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        true
    }

    pub fn is_pending(&self, height: Height) -> bool {
        self.pending.contains_key(&height)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drops every reservation; used after a rollback checkpoint so the
    /// driver can resubmit from the new cursor.
    pub fn clear(&self) {
        self.pending.clear();
    }

    /// Drops reservations at or below `height`; stale entries from before
    /// a rollback would otherwise block resubmission forever.
    pub fn prune_through(&self, height: Height) {
        self.pending.retain(|h, _| *h > height);
    }
}

/// One fetch attempt's outcome, driving the per-worker state machine
/// `Attempting -> Backoff -> Attempting -> Delivered`.
enum Attempt {
    Delivered(Box<FetchedBlock>),
    Backoff,
    Cancelled,
}

pub struct Fetcher {
    node: Arc<dyn NodeApi>,
    threads_count: usize,
    pending: Arc<DashMap<Height, ()>>,
    tasks: Arc<Mutex<mpsc::Receiver<Height>>>,
    output: Output<FetchedBlock>,
    metrics: Arc<PipelineMetrics>,
}

impl Fetcher {
    pub fn new(
        node: Arc<dyn NodeApi>,
        threads_count: usize,
        output: Output<FetchedBlock>,
        metrics: Arc<PipelineMetrics>,
    ) -> (Self, TaskQueue) {
        // Plenty of slack so the driver never blocks on a deep backlog.
        let (tx, rx) = mpsc::channel(threads_count * 64);
        let pending = Arc::new(DashMap::new());

        let queue = TaskQueue {
            pending: pending.clone(),
            tx,
            metrics: metrics.clone(),
        };

        (
            Self {
                node,
                threads_count,
                pending,
                tasks: Arc::new(Mutex::new(rx)),
                output,
                metrics,
            },
            queue,
        )
    }
}

#[async_trait]
impl Module for Fetcher {
    fn name(&self) -> &'static str {
        "fetcher"
    }

    async fn run(mut self, mut shutdown: Shutdown) -> Result<()> {
        let mut workers = Vec::with_capacity(self.threads_count);
        for id in 0..self.threads_count {
            let worker = Worker {
                id,
                node: self.node.clone(),
                pending: self.pending.clone(),
                tasks: self.tasks.clone(),
                output: self.output.clone(),
                metrics: self.metrics.clone(),
            };
            let shutdown = shutdown.clone();
            workers.push(tokio::spawn(worker.run(shutdown)));
        }

        shutdown.cancelled().await;
        for worker in workers {
            let _ = worker.await;
        }
        Ok(())
    }
}

struct Worker {
    id: usize,
    node: Arc<dyn NodeApi>,
    pending: Arc<DashMap<Height, ()>>,
    tasks: Arc<Mutex<mpsc::Receiver<Height>>>,
    output: Output<FetchedBlock>,
    metrics: Arc<PipelineMetrics>,
}

impl Worker {
    async fn run(self, mut shutdown: Shutdown) {
        loop {
            let height = {
                let mut tasks = self.tasks.lock().await;
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    task = tasks.recv() => match task {
                        Some(height) => height,
                        None => return,
                    },
                }
            };

            match self.fetch_until_delivered(height, &mut shutdown).await {
                Attempt::Delivered(block) => {
                    self.pending.remove(&height);
                    if self.output.push(*block).await.is_err() {
                        return;
                    }
                    self.metrics
                        .blocks_fetched
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    debug!("worker {} delivered block {}", self.id, height);
                }
                Attempt::Cancelled => return,
                Attempt::Backoff => unreachable!("backoff is internal to the attempt loop"),
            }
        }
    }

    /// Retries the same height indefinitely. The node is assumed to
    /// eventually recover; dropping the task would lose the height.
    async fn fetch_until_delivered(&self, height: Height, shutdown: &mut Shutdown) -> Attempt {
        loop {
            let attempt = tokio::select! {
                _ = shutdown.cancelled() => Attempt::Cancelled,
                result = self.fetch(height) => match result {
                    Ok(block) => Attempt::Delivered(Box::new(block)),
                    Err(e) => {
                        warn!("fetch of block {} failed, will retry: {:#}", height, e);
                        self.metrics
                            .fetch_retries
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        Attempt::Backoff
                    }
                },
            };

            match attempt {
                Attempt::Backoff => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return Attempt::Cancelled,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
                other => return other,
            }
        }
    }

    async fn fetch(&self, height: Height) -> Result<FetchedBlock> {
        let block = self.node.block(height).await?;
        let results = self.node.block_results(height).await?;
        Ok(FetchedBlock { block, results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::connect;
    use crate::testutil::MockNode;

    #[tokio::test]
    async fn submit_deduplicates_pending_heights() {
        let node = Arc::new(MockNode::with_chain(10));
        let metrics = Arc::new(PipelineMetrics::new());
        let (output, _rx) = connect("fetched", 16);
        let (_fetcher, queue) = Fetcher::new(node, 2, output, metrics);

        assert!(queue.submit(3).await);
        assert!(!queue.submit(3).await);
        assert_eq!(queue.pending_len(), 1);

        queue.clear();
        assert!(queue.submit(3).await);
    }

    #[tokio::test]
    async fn workers_deliver_out_of_order_submissions() {
        let node = Arc::new(MockNode::with_chain(10));
        let metrics = Arc::new(PipelineMetrics::new());
        let (output, mut rx) = connect("fetched", 16);
        let (fetcher, queue) = Fetcher::new(node, 3, output, metrics);
        let handle = crate::module::spawn(fetcher);

        for height in [5, 3, 4, 1, 2] {
            assert!(queue.submit(height).await);
        }

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(rx.pop().await.unwrap().height());
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(queue.pending_len(), 0);

        handle.close().await;
    }

    #[tokio::test]
    async fn transient_failures_are_retried_not_lost() {
        let node = Arc::new(MockNode::with_chain(5));
        node.fail_next_fetches(2);
        let metrics = Arc::new(PipelineMetrics::new());
        let (output, mut rx) = connect("fetched", 4);
        let (fetcher, queue) = Fetcher::new(node, 1, output, metrics.clone());
        let handle = crate::module::spawn(fetcher);

        queue.submit(2).await;

        let block = tokio::time::timeout(Duration::from_secs(5), rx.pop())
            .await
            .expect("fetch must eventually succeed")
            .unwrap();
        assert_eq!(block.height(), 2);
        assert!(metrics.fetch_retries.load(std::sync::atomic::Ordering::Relaxed) >= 1);

        handle.close().await;
    }
}
