use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{self, JoinHandle};
use tracing::{debug, warn};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// One step of the pipeline. `apply` may be called concurrently from every
/// worker of a stage with unrelated items, so implementations keep no
/// per-item state on `self`.
#[async_trait]
pub trait Transform<T, U>: Send + Sync + 'static
where
    T: Send + 'static,
    U: Send + 'static,
{
    async fn apply(&self, item: T) -> Vec<U>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StageStats {
    pub stage: &'static str,
    pub workers: usize,
    pub consumed: usize,
    pub emitted: usize,
}

#[derive(Clone, Copy, Debug, Default)]
struct WorkerReport {
    consumed: usize,
    emitted: usize,
}

/// A bounded worker pool around one transform.
#[derive(Debug)]
pub struct Stage<F> {
    name: &'static str,
    workers: usize,
    capacity: usize,
    transform: Arc<F>,
}

pub struct StageHandle<U> {
    output: mpsc::Receiver<U>,
    supervisor: JoinHandle<StageStats>,
}

impl<U> StageHandle<U> {
    pub fn into_parts(self) -> (mpsc::Receiver<U>, JoinHandle<StageStats>) {
        (self.output, self.supervisor)
    }
}

impl<F> Stage<F> {
    pub fn new(name: &'static str, transform: F) -> Self {
        Self {
            name,
            workers: 1,
            capacity: DEFAULT_CHANNEL_CAPACITY,
            transform: Arc::new(transform),
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Starts the workers, the dispatcher feeding them from `input`, and the
    /// supervisor that owns the output side.
    ///
    /// The returned output channel closes only after every worker has exited:
    /// workers hold clones of the sender and the supervisor drops the last
    /// one once it has observed all worker completions.
    pub fn spawn<T, U>(self, input: mpsc::Receiver<T>) -> StageHandle<U>
    where
        F: Transform<T, U>,
        T: Send + 'static,
        U: Send + 'static,
    {
        let Stage {
            name,
            workers,
            capacity,
            transform,
        } = self;
        let (output_tx, output_rx) = mpsc::channel::<U>(capacity);

        let mut worker_txs = Vec::with_capacity(workers);
        let mut worker_handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (tx, rx) = mpsc::channel::<T>(1);
            worker_txs.push(tx);
            worker_handles.push(task::spawn(run_worker(
                rx,
                output_tx.clone(),
                transform.clone(),
            )));
        }

        let dispatcher = task::spawn(dispatch(input, worker_txs));

        let supervisor = task::spawn(async move {
            let mut stats = StageStats {
                stage: name,
                workers,
                consumed: 0,
                emitted: 0,
            };
            let mut pending: FuturesUnordered<_> = worker_handles.into_iter().collect();
            while let Some(done) = pending.next().await {
                match done {
                    Ok(report) => {
                        stats.consumed += report.consumed;
                        stats.emitted += report.emitted;
                    }
                    Err(e) => warn!(stage = name, error = %e, "worker exited abnormally"),
                }
            }
            let _ = dispatcher.await;
            drop(output_tx);
            debug!(
                stage = name,
                consumed = stats.consumed,
                emitted = stats.emitted,
                "stage finished"
            );
            stats
        });

        StageHandle {
            output: output_rx,
            supervisor,
        }
    }
}

/// Convenience form of [`Stage::spawn`] with the default channel capacity.
pub fn run_stage<T, U, F>(
    name: &'static str,
    input: mpsc::Receiver<T>,
    workers: usize,
    transform: F,
) -> StageHandle<U>
where
    F: Transform<T, U>,
    T: Send + 'static,
    U: Send + 'static,
{
    Stage::new(name, transform).workers(workers).spawn(input)
}

async fn run_worker<T, U, F>(
    mut rx: mpsc::Receiver<T>,
    tx: mpsc::Sender<U>,
    transform: Arc<F>,
) -> WorkerReport
where
    F: Transform<T, U>,
    T: Send + 'static,
    U: Send + 'static,
{
    let mut report = WorkerReport::default();
    while let Some(item) = rx.recv().await {
        report.consumed += 1;
        for out in transform.apply(item).await {
            if tx.send(out).await.is_err() {
                // downstream hung up, nothing left to do
                return report;
            }
            report.emitted += 1;
        }
    }
    report
}

// hands each input item to an idle worker if there is one, otherwise waits on
// the next worker in turn. stops once the input closes or every worker is gone.
async fn dispatch<T: Send + 'static>(mut input: mpsc::Receiver<T>, mut workers: Vec<mpsc::Sender<T>>) {
    let mut next = 0usize;
    while let Some(item) = input.recv().await {
        workers.retain(|tx| !tx.is_closed());
        if workers.is_empty() {
            break;
        }
        let len = workers.len();
        let mut pending = Some(item);
        for offset in 0..len {
            let slot = (next + offset) % len;
            let candidate = match pending.take() {
                Some(candidate) => candidate,
                None => break,
            };
            match workers[slot].try_send(candidate) {
                Ok(()) => {
                    next = slot + 1;
                    break;
                }
                Err(TrySendError::Full(back)) | Err(TrySendError::Closed(back)) => {
                    pending = Some(back)
                }
            }
        }
        if let Some(item) = pending {
            let slot = next % len;
            next = slot + 1;
            let _ = workers[slot].send(item).await;
        }
    }
}
