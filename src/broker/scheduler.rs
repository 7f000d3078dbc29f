//! Lease scheduler: cool-down timers returning dispatched records
//!
//! Scheduled returns are typed `(source_id, record, due)` entries on a
//! min-heap drained by one dedicated worker task. Each entry fires exactly
//! once; pending entries are dropped on shutdown and the records are
//! re-fetched from the store after a restart.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use super::pool::PoolManager;
use crate::models::ProxyRecord;

/// A scheduled pool return
#[derive(Debug)]
pub struct PendingReturn {
    pub source_id: i64,
    pub record: ProxyRecord,
    pub due: Instant,
}

/// Heap entry ordered earliest-due first, ties broken by arrival order
struct QueuedReturn {
    due: Instant,
    seq: u64,
    source_id: i64,
    record: ProxyRecord,
}

impl PartialEq for QueuedReturn {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for QueuedReturn {}

impl PartialOrd for QueuedReturn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedReturn {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse for earliest-due-first
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Handle used by sessions to arm cool-down timers
#[derive(Clone)]
pub struct LeaseScheduler {
    tx: mpsc::UnboundedSender<PendingReturn>,
}

impl LeaseScheduler {
    /// Create the scheduler handle and its worker. The worker must be spawned
    /// with a shutdown receiver for timers to fire.
    pub fn new(pools: Arc<PoolManager>) -> (Self, ReturnWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, ReturnWorker { pools, rx })
    }

    /// Schedule `record` to re-enter its pool after `interval`.
    ///
    /// The timer runs off dispatch time, not client receipt.
    pub fn schedule_return(&self, source_id: i64, record: ProxyRecord, interval: Duration) {
        let pending = PendingReturn {
            source_id,
            record,
            due: Instant::now() + interval,
        };

        if self.tx.send(pending).is_err() {
            debug!("Return worker gone, dropping scheduled return");
        }
    }
}

/// Worker draining the delay queue into the pools
pub struct ReturnWorker {
    pools: Arc<PoolManager>,
    rx: mpsc::UnboundedReceiver<PendingReturn>,
}

impl ReturnWorker {
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Lease return worker started");

        let mut heap: BinaryHeap<QueuedReturn> = BinaryHeap::new();
        let mut seq: u64 = 0;

        loop {
            // Release everything that has come due
            let now = Instant::now();
            while heap.peek().map_or(false, |entry| entry.due <= now) {
                if let Some(entry) = heap.pop() {
                    debug!(
                        proxy_id = entry.record.id,
                        source_id = entry.source_id,
                        "Returning lease to pool"
                    );
                    self.pools.push(entry.source_id, entry.record);
                }
            }

            let next_due = heap.peek().map(|entry| entry.due);

            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(pending) => {
                        seq += 1;
                        heap.push(QueuedReturn {
                            due: pending.due,
                            seq,
                            source_id: pending.source_id,
                            record: pending.record,
                        });
                    }
                    None => break,
                },
                _ = sleep_until(next_due.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))),
                    if next_due.is_some() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(pending = heap.len(), "Lease return worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, source_id: i64) -> ProxyRecord {
        ProxyRecord {
            id,
            credential: format!("10.0.0.{}:3128", id),
            source_id,
            priority: 0,
            blocked: false,
            provider_id: None,
            provider_name: None,
            updated_at: None,
            usage_interval: 30,
        }
    }

    fn start_worker(
        pools: Arc<PoolManager>,
    ) -> (LeaseScheduler, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (scheduler, worker) = LeaseScheduler::new(pools);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(worker.run(shutdown_rx));
        (scheduler, shutdown_tx, task)
    }

    #[tokio::test(start_paused = true)]
    async fn test_return_fires_after_interval() {
        let pools = Arc::new(PoolManager::new());
        let (scheduler, shutdown_tx, task) = start_worker(pools.clone());

        pools.push(1, record(7, 1));
        let popped = pools.pop(1).unwrap();
        scheduler.schedule_return(1, popped, Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(pools.len(1), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pools.len(1), 1);
        assert_eq!(pools.snapshot(1)[0].id, 7);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_return_pushes_exactly_once() {
        let pools = Arc::new(PoolManager::new());
        let (scheduler, shutdown_tx, task) = start_worker(pools.clone());

        scheduler.schedule_return(1, record(7, 1), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(pools.len(1), 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_fire_in_due_order() {
        let pools = Arc::new(PoolManager::new());
        let (scheduler, shutdown_tx, task) = start_worker(pools.clone());

        scheduler.schedule_return(1, record(8, 1), Duration::from_secs(3));
        scheduler.schedule_return(1, record(7, 1), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let snapshot = pools.snapshot(1);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, 7);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = pools.snapshot(1);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].id, 8);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending_returns() {
        let pools = Arc::new(PoolManager::new());
        let (scheduler, shutdown_tx, task) = start_worker(pools.clone());

        scheduler.schedule_return(1, record(7, 1), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(10)).await;

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(pools.len(1), 0);
    }
}
