use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{CacheTier, WriteBehind, parse_count};
use crate::error::StorageError;
use crate::ledger::CapacitySource;
use crate::observability::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, CAPACITY_QUERIES_TOTAL};

use super::keys::capacity_key;

/// Cache-aside read path for hotel capacities. Capacity never changes, so a
/// cached value never goes stale; it is only ever absent.
pub struct CapacityStore {
    cache: Arc<dyn CacheTier>,
    source: Arc<dyn CapacitySource>,
    writer: WriteBehind,
}

impl CapacityStore {
    pub fn new(cache: Arc<dyn CacheTier>, source: Arc<dyn CapacitySource>, writer: WriteBehind) -> Self {
        Self { cache, source, writer }
    }

    /// Capacities for many hotels: one batched cache get, then one batched
    /// durable query for whatever missed. Unknown hotels are left out.
    pub async fn get_capacities(&self, hotel_ids: &[String]) -> Result<HashMap<String, u64>, StorageError> {
        if hotel_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = hotel_ids.iter().map(|id| capacity_key(id)).collect();
        let cached = self.cache.get_multi(&keys).await?;

        let mut resolved = HashMap::with_capacity(hotel_ids.len());
        let mut missing = Vec::new();
        for (hotel_id, key) in hotel_ids.iter().zip(&keys) {
            match cached.get(key).and_then(|raw| parse_count(key, raw)) {
                Some(rooms) => {
                    resolved.insert(hotel_id.clone(), rooms);
                }
                None => missing.push(hotel_id.clone()),
            }
        }
        metrics::counter!(CACHE_HITS_TOTAL, "kind" => "capacity").increment(resolved.len() as u64);
        metrics::counter!(CACHE_MISSES_TOTAL, "kind" => "capacity").increment(missing.len() as u64);

        if !missing.is_empty() {
            metrics::counter!(CAPACITY_QUERIES_TOTAL).increment(1);
            for cap in self.source.capacities_in(&missing).await? {
                let rooms = u64::from(cap.rooms);
                self.writer.submit(capacity_key(&cap.hotel_id), rooms);
                resolved.insert(cap.hotel_id, rooms);
            }
        }
        Ok(resolved)
    }

    /// Capacity of one hotel via a single cache get.
    pub async fn capacity(&self, hotel_id: &str) -> Result<Option<u64>, StorageError> {
        let key = capacity_key(hotel_id);
        if let Some(rooms) = self.cache.get(&key).await?.and_then(|raw| parse_count(&key, &raw)) {
            metrics::counter!(CACHE_HITS_TOTAL, "kind" => "capacity").increment(1);
            return Ok(Some(rooms));
        }
        metrics::counter!(CACHE_MISSES_TOTAL, "kind" => "capacity").increment(1);
        metrics::counter!(CAPACITY_QUERIES_TOTAL).increment(1);

        let found = self
            .source
            .capacities_in(&[hotel_id.to_string()])
            .await?
            .into_iter()
            .find(|c| c.hotel_id == hotel_id)
            .map(|c| u64::from(c.rooms));
        if let Some(rooms) = found {
            self.writer.submit(key, rooms);
        }
        Ok(found)
    }
}
