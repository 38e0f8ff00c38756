mod durable;

pub use durable::DurableStore;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::{BookingRow, HotelCapacity, Night};

/// The capacity collection: total rooms per hotel.
#[async_trait]
pub trait CapacitySource: Send + Sync {
    /// One batched lookup (`hotel_id IN (...)`). Unknown hotels are absent
    /// from the result.
    async fn capacities_in(&self, hotel_ids: &[String]) -> Result<Vec<HotelCapacity>, StorageError>;
}

/// The booking collection: append-only rows, one per (hotel, night, reservation).
#[async_trait]
pub trait NightLedger: Send + Sync {
    /// Sum of `rooms` over rows whose boundaries equal `night`'s.
    async fn count_booked(&self, hotel_id: &str, night: Night) -> Result<u64, StorageError>;

    async fn insert(&self, row: BookingRow) -> Result<(), StorageError>;

    /// Append the rows of one stay. Stores that can commit them atomically
    /// should override this.
    async fn insert_all(&self, rows: Vec<BookingRow>) -> Result<(), StorageError> {
        for row in rows {
            self.insert(row).await?;
        }
        Ok(())
    }
}
