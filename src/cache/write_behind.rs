use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::CacheTier;
use crate::observability::{CACHE_WRITES_DROPPED_TOTAL, CACHE_WRITES_FAILED_TOTAL, CACHE_WRITE_BATCH_SIZE};

enum WriteCommand {
    Set { key: String, value: String },
    Flush { response: oneshot::Sender<()> },
}

/// Fire-and-forget cache writes.
///
/// `submit` never blocks and never fails: writes go onto a bounded queue
/// drained by one background task. A full queue drops the write, a failed
/// write is logged, and in both cases the caller never finds out. Writes are
/// applied in submission order.
#[derive(Clone)]
pub struct WriteBehind {
    tx: mpsc::Sender<WriteCommand>,
}

impl WriteBehind {
    /// Spawn the background writer. Must be called inside a tokio runtime.
    pub fn spawn(cache: Arc<dyn CacheTier>, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        tokio::spawn(write_behind_loop(cache, rx));
        Self { tx }
    }

    pub fn submit(&self, key: String, value: u64) {
        let cmd = WriteCommand::Set { key, value: value.to_string() };
        match self.tx.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(WriteCommand::Set { key, .. })) => {
                warn!("cache write queue full, dropping write for {key}");
                metrics::counter!(CACHE_WRITES_DROPPED_TOTAL).increment(1);
            }
            Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Closed(_)) => {
                debug!("cache writer stopped, dropping write");
                metrics::counter!(CACHE_WRITES_DROPPED_TOTAL).increment(1);
            }
        }
    }

    /// Wait until every write submitted before this call has been applied
    /// (or has failed). Used at shutdown and by tests.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(WriteCommand::Flush { response: tx }).await.is_err() {
            return;
        }
        let _ = rx.await;
    }
}

/// Pending writes of one batch: one slot per key, in first-submission order,
/// holding the latest value.
#[derive(Default)]
struct Batch {
    slots: HashMap<String, usize>,
    writes: Vec<(String, String)>,
}

impl Batch {
    fn set(&mut self, key: String, value: String) {
        match self.slots.get(&key) {
            Some(&i) => self.writes[i].1 = value,
            None => {
                self.slots.insert(key.clone(), self.writes.len());
                self.writes.push((key, value));
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    fn take(&mut self) -> Vec<(String, String)> {
        self.slots.clear();
        std::mem::take(&mut self.writes)
    }
}

/// 1. Block until the first command arrives.
/// 2. Drain everything immediately available into a batch.
/// 3. Apply the batch; only the last value per key is written.
/// 4. Answer flushes after the writes queued ahead of them.
async fn write_behind_loop(cache: Arc<dyn CacheTier>, mut rx: mpsc::Receiver<WriteCommand>) {
    let mut batch = Batch::default();
    while let Some(cmd) = rx.recv().await {
        let mut flushes = Vec::new();
        push(&mut batch, &mut flushes, cmd);
        while let Ok(cmd) = rx.try_recv() {
            if !flushes.is_empty() {
                // Keep flush ordering strict: apply what precedes it first.
                apply_batch(cache.as_ref(), &mut batch).await;
                for f in flushes.drain(..) {
                    let _ = f.send(());
                }
            }
            push(&mut batch, &mut flushes, cmd);
        }
        apply_batch(cache.as_ref(), &mut batch).await;
        for f in flushes {
            let _ = f.send(());
        }
    }
}

fn push(batch: &mut Batch, flushes: &mut Vec<oneshot::Sender<()>>, cmd: WriteCommand) {
    match cmd {
        WriteCommand::Set { key, value } => batch.set(key, value),
        WriteCommand::Flush { response } => flushes.push(response),
    }
}

async fn apply_batch(cache: &dyn CacheTier, batch: &mut Batch) {
    if batch.is_empty() {
        return;
    }
    let writes = batch.take();
    metrics::histogram!(CACHE_WRITE_BATCH_SIZE).record(writes.len() as f64);
    for (key, value) in writes {
        if let Err(e) = cache.set(&key, &value).await {
            warn!("cache write for {key} failed: {e}");
            metrics::counter!(CACHE_WRITES_FAILED_TOTAL).increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::error::StorageError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BrokenCache {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl CacheTier for BrokenCache {
        async fn get_multi(&self, _keys: &[String]) -> Result<HashMap<String, String>, StorageError> {
            Ok(HashMap::new())
        }
        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Cache("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn submitted_writes_land_after_flush() {
        let cache = Arc::new(MemoryCache::new());
        let writer = WriteBehind::spawn(cache.clone(), 16);

        writer.submit("H1_cap".into(), 10);
        writer.submit("H1_2024-01-02_2024-01-02".into(), 5);
        writer.flush().await;

        assert_eq!(cache.peek("H1_cap").as_deref(), Some("10"));
        assert_eq!(cache.peek("H1_2024-01-02_2024-01-02").as_deref(), Some("5"));
    }

    #[test]
    fn batch_keeps_first_position_and_last_value() {
        let mut batch = Batch::default();
        for n in 0..2000u32 {
            batch.set(format!("k{}", n % 500), n.to_string());
        }
        let writes = batch.take();
        assert_eq!(writes.len(), 500);
        assert_eq!(writes[0], ("k0".to_string(), "1500".to_string()));
        assert_eq!(writes[499], ("k499".to_string(), "1999".to_string()));
        assert!(batch.is_empty());

        batch.set("k0".into(), "1".into());
        assert_eq!(batch.take(), vec![("k0".to_string(), "1".to_string())]);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let cache = Arc::new(MemoryCache::new());
        let writer = WriteBehind::spawn(cache.clone(), 16);

        for n in 1..=5 {
            writer.submit("k".into(), n);
        }
        writer.flush().await;

        assert_eq!(cache.peek("k").as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn failing_cache_is_swallowed() {
        let cache = Arc::new(BrokenCache { attempts: AtomicUsize::new(0) });
        let writer = WriteBehind::spawn(cache.clone(), 4);

        writer.submit("a".into(), 1);
        writer.submit("b".into(), 2);
        writer.flush().await;

        assert_eq!(cache.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let cache = Arc::new(MemoryCache::new());
        let writer = WriteBehind::spawn(cache.clone(), 1);

        // On the current-thread runtime the writer cannot run until we yield,
        // so everything past the first queued write is dropped.
        for n in 0..100 {
            writer.submit(format!("k{n}"), n);
        }
        writer.flush().await;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peek("k0").as_deref(), Some("0"));
    }
}
