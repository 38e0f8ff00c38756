use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::observability::FANOUT_WORKERS_TOTAL;

/// One task per key, results collected on a shared channel.
///
/// Every worker holds a sender; the channel closes once the last worker
/// finishes, so draining `next` until `None` is the join. Workers observe a
/// child of the given token and stop when it fires. Dropping the fan-out
/// aborts whatever is still running.
pub struct Fanout<T> {
    results: mpsc::Receiver<T>,
    workers: JoinSet<()>,
}

impl<T: Send + 'static> Fanout<T> {
    pub fn spawn<K, F, Fut>(
        keys: impl IntoIterator<Item = K>,
        cancel: &CancellationToken,
        worker: F,
    ) -> Self
    where
        F: Fn(K) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let jobs: Vec<Fut> = keys.into_iter().map(worker).collect();
        // Room for every result, so a worker never waits on the aggregator.
        let (tx, rx) = mpsc::channel(jobs.len().max(1));
        let mut workers = JoinSet::new();

        metrics::counter!(FANOUT_WORKERS_TOTAL).increment(jobs.len() as u64);
        for job in jobs {
            let tx = tx.clone();
            let token = cancel.child_token();
            workers.spawn(async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {}
                    out = job => {
                        let _ = tx.send(out).await;
                    }
                }
            });
        }

        Self { results: rx, workers }
    }

    /// Next result in completion order; `None` once every worker is done.
    pub async fn next(&mut self) -> Option<T> {
        self.results.recv().await
    }

    /// Workers that have not finished yet.
    pub fn outstanding(&mut self) -> usize {
        while self.workers.try_join_next().is_some() {}
        self.workers.len()
    }
}
