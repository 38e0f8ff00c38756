use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use ulid::Ulid;

use crate::cache::parse_count;
use crate::model::{BookingRow, Night, Outcome, ReserveRequest};
use crate::observability::{
    CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, LEDGER_QUERIES_TOTAL, RESERVATIONS_TOTAL,
    RESERVE_DURATION_SECONDS, outcome_label,
};

use super::{CapacityGuard, ConsistencyMode, GuardError, RequestScope, ValidReserve, validate_reserve};

/// A night that passed the check, with the count it will have once committed.
struct PlannedNight {
    night: Night,
    key: String,
    new_count: u64,
}

impl CapacityGuard {
    /// Book `room_number` rooms at one hotel for every night of the stay, or
    /// nothing at all.
    ///
    /// Cancellation and the request deadline are honoured up to the commit;
    /// once rows are being appended the commit runs to completion.
    pub async fn reserve(
        &self,
        request: &ReserveRequest,
        cancel: &CancellationToken,
    ) -> Result<Outcome, GuardError> {
        let started = Instant::now();
        let result = match validate_reserve(request) {
            Ok(valid) => {
                let scope = self.scope(cancel);
                match self.options.mode {
                    ConsistencyMode::Serialized => self.reserve_serialized(&valid, &scope).await,
                    ConsistencyMode::Legacy => self.reserve_unsynchronized(&valid, &scope).await,
                }
            }
            Err(e) => Err(e.into()),
        };
        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => outcome_label(&result)).increment(1);
        metrics::histogram!(RESERVE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn reserve_serialized(
        &self,
        req: &ValidReserve,
        scope: &RequestScope,
    ) -> Result<Outcome, GuardError> {
        let _held = scope
            .run(async { Ok::<_, GuardError>(self.locks.lock_stay(&req.hotel_id, &req.nights).await) })
            .await?;

        let capacity = scope.run(self.hotel_capacity(&req.hotel_id)).await?;

        let mut planned = Vec::with_capacity(req.nights.len());
        for night in &req.nights {
            metrics::counter!(LEDGER_QUERIES_TOTAL).increment(1);
            let count = scope
                .run(async {
                    self.ledger
                        .count_booked(&req.hotel_id, *night)
                        .await
                        .map_err(GuardError::from)
                })
                .await?;
            if count.saturating_add(req.rooms) > capacity {
                debug!(
                    "reserve {} rejected on {}: {count} booked + {} > {capacity}",
                    req.hotel_id,
                    night.in_date(),
                    req.rooms
                );
                return Ok(Outcome::rejected(&req.hotel_id));
            }
            planned.push(self.plan(req, *night, count));
        }

        // Ledger first: under the locks it is the source of truth. The cache
        // copy is best effort and can be overwritten by an older count from
        // a concurrent availability lookup.
        self.ledger.insert_all(rows_for(req, &planned)).await?;
        for p in planned {
            self.writer.submit(p.key, p.new_count);
        }
        debug!("reserve {} accepted for {} nights", req.hotel_id, req.nights.len());
        Ok(Outcome::accepted(&req.hotel_id))
    }

    /// Check every night, then commit. Nothing spans the two phases, so
    /// concurrent calls for the same night can both pass the check.
    async fn reserve_unsynchronized(
        &self,
        req: &ValidReserve,
        scope: &RequestScope,
    ) -> Result<Outcome, GuardError> {
        let mut capacity: Option<u64> = None;
        let mut planned = Vec::with_capacity(req.nights.len());

        for night in &req.nights {
            let key = self.options.key_scheme.night_key(&req.hotel_id, night);
            let count = scope.run(self.cached_count(&req.hotel_id, *night, &key)).await?;
            let cap = match capacity {
                Some(c) => c,
                None => {
                    let c = scope.run(self.hotel_capacity(&req.hotel_id)).await?;
                    capacity = Some(c);
                    c
                }
            };
            if count.saturating_add(req.rooms) > cap {
                debug!(
                    "reserve {} rejected on {}: {count} booked + {} > {cap}",
                    req.hotel_id,
                    night.in_date(),
                    req.rooms
                );
                return Ok(Outcome::rejected(&req.hotel_id));
            }
            planned.push(self.plan(req, *night, count));
        }

        // Counts only reach the cache once every night has passed.
        for p in &planned {
            self.writer.submit(p.key.clone(), p.new_count);
        }
        self.ledger.insert_all(rows_for(req, &planned)).await?;
        debug!("reserve {} accepted for {} nights", req.hotel_id, req.nights.len());
        Ok(Outcome::accepted(&req.hotel_id))
    }

    fn plan(&self, req: &ValidReserve, night: Night, count: u64) -> PlannedNight {
        PlannedNight {
            night,
            key: self.options.key_scheme.night_key(&req.hotel_id, &night),
            new_count: count.saturating_add(req.rooms),
        }
    }

    /// Booked count for a night: cache first, ledger on miss.
    async fn cached_count(&self, hotel_id: &str, night: Night, key: &str) -> Result<u64, GuardError> {
        if let Some(count) = self.cache.get(key).await?.and_then(|raw| parse_count(key, &raw)) {
            metrics::counter!(CACHE_HITS_TOTAL, "kind" => "night").increment(1);
            return Ok(count);
        }
        metrics::counter!(CACHE_MISSES_TOTAL, "kind" => "night").increment(1);
        metrics::counter!(LEDGER_QUERIES_TOTAL).increment(1);
        Ok(self.ledger.count_booked(hotel_id, night).await?)
    }

    async fn hotel_capacity(&self, hotel_id: &str) -> Result<u64, GuardError> {
        self.capacities
            .capacity(hotel_id)
            .await?
            .ok_or_else(|| GuardError::UnknownHotel(hotel_id.to_string()))
    }
}

fn rows_for(req: &ValidReserve, planned: &[PlannedNight]) -> Vec<BookingRow> {
    planned
        .iter()
        .map(|p| BookingRow {
            id: Ulid::new(),
            hotel_id: req.hotel_id.clone(),
            customer_name: req.customer_name.clone(),
            night: p.night,
            rooms: req.rooms as u32,
        })
        .collect()
}
