use std::collections::HashSet;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::parse_count;
use crate::error::StorageError;
use crate::model::{AvailabilityRequest, Night};
use crate::observability::{
    AVAILABILITY_CHECKS_TOTAL, AVAILABILITY_DURATION_SECONDS, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL,
    LEDGER_QUERIES_TOTAL, status_label,
};

use super::fanout::Fanout;
use super::{CapacityGuard, GuardError, RequestScope, ValidAvailability, validate_availability};

/// One (hotel, night) to evaluate, with its cache key.
struct NightLookup {
    hotel: usize,
    night: Night,
    key: String,
}

/// Running verdict for one hotel.
struct Tally {
    capacity: u64,
    fits: bool,
    pending: usize,
}

/// Every hotel is either ruled out or has all of its nights evaluated.
fn decided(tallies: &[Option<Tally>]) -> bool {
    tallies.iter().flatten().all(|t| !t.fits || t.pending == 0)
}

fn fits(count: u64, rooms: u64, capacity: u64) -> bool {
    count.saturating_add(rooms) <= capacity
}

impl CapacityGuard {
    /// The subset of `hotel_ids` with `room_number` rooms free on every night
    /// of the stay. Never writes to the ledger; populating the cache is its
    /// only side effect. The result has no particular order.
    pub async fn check_availability(
        &self,
        request: &AvailabilityRequest,
        cancel: &CancellationToken,
    ) -> Result<HashSet<String>, GuardError> {
        let started = Instant::now();
        let result = match validate_availability(request) {
            Ok(valid) => {
                let scope = self.scope(cancel);
                scope.run(self.evaluate_availability(&valid, &scope)).await
            }
            Err(e) => Err(e.into()),
        };
        metrics::counter!(AVAILABILITY_CHECKS_TOTAL, "status" => status_label(&result)).increment(1);
        metrics::histogram!(AVAILABILITY_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn evaluate_availability(
        &self,
        req: &ValidAvailability,
        scope: &RequestScope,
    ) -> Result<HashSet<String>, GuardError> {
        let capacities = self.capacities.get_capacities(&req.hotel_ids).await?;

        // Hotels without a known capacity can never fit and are dropped here.
        let mut tallies: Vec<Option<Tally>> = req
            .hotel_ids
            .iter()
            .map(|id| {
                capacities.get(id).map(|&capacity| Tally { capacity, fits: true, pending: 0 })
            })
            .collect();

        let mut lookups = Vec::new();
        for (hotel, id) in req.hotel_ids.iter().enumerate() {
            if tallies[hotel].is_none() {
                debug!("availability: no capacity for {id}");
                continue;
            }
            for night in &req.nights {
                lookups.push(NightLookup {
                    hotel,
                    night: *night,
                    key: self.options.key_scheme.night_key(id, night),
                });
            }
        }
        if lookups.is_empty() {
            return Ok(HashSet::new());
        }

        let keys: Vec<String> = lookups.iter().map(|l| l.key.clone()).collect();
        let cached = self.cache.get_multi(&keys).await?;

        // Hits first, so nights of hotels already ruled out are never fetched.
        let mut misses = Vec::new();
        for lookup in lookups {
            let Some(tally) = tallies[lookup.hotel].as_mut() else { continue };
            match cached.get(&lookup.key).and_then(|raw| parse_count(&lookup.key, raw)) {
                Some(count) => {
                    metrics::counter!(CACHE_HITS_TOTAL, "kind" => "night").increment(1);
                    if !fits(count, req.rooms, tally.capacity) {
                        tally.fits = false;
                    }
                }
                None => misses.push(lookup),
            }
        }
        misses.retain(|l| tallies[l.hotel].as_ref().is_some_and(|t| t.fits));
        metrics::counter!(CACHE_MISSES_TOTAL, "kind" => "night").increment(misses.len() as u64);
        for lookup in &misses {
            if let Some(tally) = tallies[lookup.hotel].as_mut() {
                tally.pending += 1;
            }
        }

        let mut fanout = self.spawn_lookups(req, misses, scope);
        while !decided(&tallies) {
            let Some(result) = fanout.next().await else { break };
            let (hotel, count) = result?;
            if let Some(tally) = tallies[hotel].as_mut() {
                tally.pending -= 1;
                if !fits(count, req.rooms, tally.capacity) {
                    tally.fits = false;
                }
            }
        }
        let running = fanout.outstanding();
        if running > 0 {
            debug!("availability decided with {running} lookups still running");
        }
        // Lookups for hotels already ruled out are aborted here.
        drop(fanout);

        let mut available = HashSet::new();
        for (hotel, tally) in tallies.into_iter().enumerate() {
            let Some(tally) = tally else { continue };
            if tally.fits && tally.pending > 0 {
                return Err(GuardError::Internal(format!(
                    "{} lookups for {} ended without a result",
                    tally.pending, req.hotel_ids[hotel]
                )));
            }
            if tally.fits {
                available.insert(req.hotel_ids[hotel].clone());
            }
        }
        Ok(available)
    }

    /// One worker per missed key: count from the ledger, write the count back
    /// to the cache, report `(hotel index, count)`.
    fn spawn_lookups(
        &self,
        req: &ValidAvailability,
        misses: Vec<NightLookup>,
        scope: &RequestScope,
    ) -> Fanout<Result<(usize, u64), StorageError>> {
        let hotel_ids = req.hotel_ids.clone();
        Fanout::spawn(misses, scope.token(), |lookup| {
            let ledger = self.ledger.clone();
            let writer = self.writer.clone();
            let permits = self.lookup_permits.clone();
            let hotel_id = hotel_ids[lookup.hotel].clone();
            async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| StorageError::Durable("lookup pool closed".into()))?;
                metrics::counter!(LEDGER_QUERIES_TOTAL).increment(1);
                let count = ledger.count_booked(&hotel_id, lookup.night).await?;
                writer.submit(lookup.key, count);
                Ok((lookup.hotel, count))
            }
        })
    }
}
