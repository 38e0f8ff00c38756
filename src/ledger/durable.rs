use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use super::{CapacitySource, NightLedger};
use crate::error::StorageError;
use crate::model::{BookingRow, Event, HotelCapacity, Night};
use crate::observability::{JOURNAL_FLUSH_BATCH_SIZE, JOURNAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

/// Query side of the store, rebuilt from the journal on open.
#[derive(Default)]
struct Index {
    capacities: DashMap<String, u32>,
    rows: DashMap<(String, Night), Vec<BookingRow>>,
}

impl Index {
    fn apply(&self, event: &Event) {
        match event {
            Event::CapacityProvisioned { hotel_id, rooms } => {
                self.capacities.entry(hotel_id.clone()).or_insert(*rooms);
            }
            Event::RoomsBooked { rows } => {
                for row in rows {
                    self.rows
                        .entry((row.hotel_id.clone(), row.night))
                        .or_default()
                        .push(row.clone());
                }
            }
        }
    }
}

struct JournalAppend {
    event: Event,
    response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the journal and batches appends for group commit.
/// 1. Block until the first append arrives.
/// 2. Drain all immediately available appends (the batch window).
/// 3. Single flush_sync for the whole batch.
/// 4. Apply the batch to the index, then answer every sender.
///
/// Applying here rather than in the caller means a request dropped while
/// waiting for its ack cannot leave the index behind the journal.
async fn journal_writer_loop(mut wal: Wal, index: Arc<Index>, mut rx: mpsc::Receiver<JournalAppend>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(JOURNAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        if result.is_ok() {
            for append in &batch {
                index.apply(&append.event);
            }
        } else {
            tracing::error!("journal {} flush failed: {result:?}", wal.path().display());
        }
        for append in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = append.response.send(r);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[JournalAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for append in batch {
        if let Err(e) = wal.append_buffered(&append.event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

/// Journal-backed durable store holding both the capacity collection and
/// the booking collection.
pub struct DurableStore {
    index: Arc<Index>,
    tx: mpsc::Sender<JournalAppend>,
}

impl DurableStore {
    /// Replay the journal at `path` and start its writer. Must be called
    /// inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;

        let index = Arc::new(Index::default());
        for event in &events {
            index.apply(event);
        }
        tracing::info!(
            "journal {} replayed: {} events, {} hotels",
            path.display(),
            events.len(),
            index.capacities.len()
        );

        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(wal, index.clone(), rx));
        Ok(Self { index, tx })
    }

    async fn append(&self, event: Event) -> Result<(), StorageError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(JournalAppend { event, response: tx })
            .await
            .map_err(|_| StorageError::Durable("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StorageError::Durable("journal writer dropped response".into()))?
            .map_err(|e| StorageError::Durable(e.to_string()))
    }

    /// Record a hotel's capacity. Capacity is immutable: returns `false`
    /// without writing if the hotel is already provisioned.
    pub async fn provision(&self, hotel_id: &str, rooms: u32) -> Result<bool, StorageError> {
        if self.index.capacities.contains_key(hotel_id) {
            return Ok(false);
        }
        self.append(Event::CapacityProvisioned { hotel_id: hotel_id.to_string(), rooms })
            .await?;
        Ok(true)
    }

    pub fn hotel_count(&self) -> usize {
        self.index.capacities.len()
    }

    /// All rows booked for (hotel, night), in commit order.
    pub fn rows_for(&self, hotel_id: &str, night: Night) -> Vec<BookingRow> {
        self.index
            .rows
            .get(&(hotel_id.to_string(), night))
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self) -> usize {
        self.index.rows.iter().map(|e| e.value().len()).sum()
    }
}

#[async_trait]
impl CapacitySource for DurableStore {
    async fn capacities_in(&self, hotel_ids: &[String]) -> Result<Vec<HotelCapacity>, StorageError> {
        Ok(hotel_ids
            .iter()
            .filter_map(|id| {
                self.index.capacities.get(id).map(|rooms| HotelCapacity {
                    hotel_id: id.clone(),
                    rooms: *rooms,
                })
            })
            .collect())
    }
}

#[async_trait]
impl NightLedger for DurableStore {
    async fn count_booked(&self, hotel_id: &str, night: Night) -> Result<u64, StorageError> {
        Ok(self
            .index
            .rows
            .get(&(hotel_id.to_string(), night))
            .map(|rows| rows.iter().map(|r| u64::from(r.rooms)).sum())
            .unwrap_or(0))
    }

    async fn insert(&self, row: BookingRow) -> Result<(), StorageError> {
        self.append(Event::RoomsBooked { rows: vec![row] }).await
    }

    /// One journal record per stay: replay sees all of its nights or none.
    async fn insert_all(&self, rows: Vec<BookingRow>) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }
        self.append(Event::RoomsBooked { rows }).await
    }
}
