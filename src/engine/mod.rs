mod availability;
mod capacity;
mod error;
mod fanout;
mod keys;
mod locks;
mod reserve;

pub use capacity::CapacityStore;
pub use error::GuardError;
pub use fanout::Fanout;
pub use keys::{NightKeyScheme, capacity_key};
pub use locks::NightLocks;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::cache::{CacheTier, WriteBehind};
use crate::error::ValidationError;
use crate::ledger::{CapacitySource, NightLedger};
use crate::limits::*;
use crate::model::{AvailabilityRequest, Night, ReserveRequest, Stay};

/// How Reserve guards the gap between its check and its commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// Per-(hotel, night) locks held from check to commit; counts are read
    /// from the ledger. Concurrent reserves cannot jointly overbook a night.
    ///
    /// The cache is not covered by the locks. An availability lookup that
    /// read the ledger before a reserve committed can write its older count
    /// back after the reserve's newer one, and the cached count stays low
    /// until the next reserve of that night. Availability answers can be
    /// optimistic in that window; reserves are not, since they never read
    /// the cache in this mode.
    #[default]
    Serialized,
    /// The historical unsynchronized check-then-commit. Counts come from the
    /// cache when present, and two concurrent reserves for the same night can
    /// both pass the check and overbook it.
    Legacy,
}

impl std::str::FromStr for ConsistencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serialized" => Ok(ConsistencyMode::Serialized),
            "legacy" => Ok(ConsistencyMode::Legacy),
            other => Err(format!("unknown consistency mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardOptions {
    pub mode: ConsistencyMode,
    pub key_scheme: NightKeyScheme,
    /// Ledger lookups allowed in flight at once across all availability checks.
    pub max_concurrent_lookups: usize,
    pub write_behind_capacity: usize,
    /// Deadline applied to each request on top of the caller's token.
    pub request_timeout: Option<Duration>,
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self {
            mode: ConsistencyMode::default(),
            key_scheme: NightKeyScheme::default(),
            max_concurrent_lookups: 256,
            write_behind_capacity: 4096,
            request_timeout: None,
        }
    }
}

/// Orchestrates Reserve and CheckAvailability over the cache, the capacity
/// collection and the booking ledger.
pub struct CapacityGuard {
    cache: Arc<dyn CacheTier>,
    ledger: Arc<dyn NightLedger>,
    capacities: CapacityStore,
    writer: WriteBehind,
    locks: NightLocks,
    lookup_permits: Arc<Semaphore>,
    options: GuardOptions,
}

impl CapacityGuard {
    /// Must be called inside a tokio runtime: spawns the cache writer.
    pub fn new(
        cache: Arc<dyn CacheTier>,
        capacity_source: Arc<dyn CapacitySource>,
        ledger: Arc<dyn NightLedger>,
        options: GuardOptions,
    ) -> Self {
        let writer = WriteBehind::spawn(cache.clone(), options.write_behind_capacity);
        let capacities = CapacityStore::new(cache.clone(), capacity_source, writer.clone());
        Self {
            cache,
            ledger,
            capacities,
            writer,
            locks: NightLocks::new(),
            lookup_permits: Arc::new(Semaphore::new(options.max_concurrent_lookups.max(1))),
            options,
        }
    }

    pub fn options(&self) -> &GuardOptions {
        &self.options
    }

    pub fn capacities(&self) -> &CapacityStore {
        &self.capacities
    }

    /// Wait for every cache write submitted so far to be applied.
    pub async fn settle(&self) {
        self.writer.flush().await;
    }

    fn scope(&self, cancel: &CancellationToken) -> RequestScope {
        let token = cancel.child_token();
        RequestScope {
            deadline: self.options.request_timeout.map(|t| Instant::now() + t),
            _cancel_on_drop: token.clone().drop_guard(),
            token,
        }
    }
}

/// Cancellation scope of one request: the caller's token plus the optional
/// deadline. Workers spawned for the request hang off `token`, which is
/// cancelled when the scope is dropped.
pub(super) struct RequestScope {
    token: CancellationToken,
    deadline: Option<Instant>,
    _cancel_on_drop: DropGuard,
}

impl RequestScope {
    /// Run `fut` unless the request is cancelled or past its deadline first.
    pub(super) async fn run<T, F>(&self, fut: F) -> Result<T, GuardError>
    where
        F: Future<Output = Result<T, GuardError>>,
    {
        if self.token.is_cancelled() {
            return Err(GuardError::Cancelled);
        }
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(GuardError::Cancelled),
            _ = deadline => {
                self.token.cancel();
                Err(GuardError::DeadlineExceeded)
            }
            out = fut => out,
        }
    }

    pub(super) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

// ── Validation ───────────────────────────────────────────────────

pub(super) struct ValidReserve {
    pub hotel_id: String,
    pub customer_name: String,
    pub nights: Vec<Night>,
    pub rooms: u64,
}

pub(super) struct ValidAvailability {
    /// Deduplicated, in request order.
    pub hotel_ids: Vec<String>,
    pub nights: Vec<Night>,
    pub rooms: u64,
}

fn validate_rooms(n: i64) -> Result<u64, ValidationError> {
    if n <= 0 {
        return Err(ValidationError::NonPositiveRooms(n));
    }
    if n > MAX_ROOMS_PER_REQUEST {
        return Err(ValidationError::LimitExceeded("too many rooms requested"));
    }
    Ok(n as u64)
}

fn validate_hotel_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::MissingField("hotel id"));
    }
    if id.len() > MAX_HOTEL_ID_LEN {
        return Err(ValidationError::LimitExceeded("hotel id too long"));
    }
    Ok(())
}

pub(super) fn validate_reserve(req: &ReserveRequest) -> Result<ValidReserve, ValidationError> {
    validate_hotel_id(&req.hotel_id)?;
    if req.customer_name.is_empty() {
        return Err(ValidationError::MissingField("customer name"));
    }
    if req.customer_name.len() > MAX_CUSTOMER_NAME_LEN {
        return Err(ValidationError::LimitExceeded("customer name too long"));
    }
    let rooms = validate_rooms(req.room_number)?;
    let stay = Stay::parse(&req.in_date, &req.out_date)?;
    Ok(ValidReserve {
        hotel_id: req.hotel_id.clone(),
        customer_name: req.customer_name.clone(),
        nights: stay.nights(),
        rooms,
    })
}

pub(super) fn validate_availability(req: &AvailabilityRequest) -> Result<ValidAvailability, ValidationError> {
    if req.hotel_ids.len() > MAX_HOTELS_PER_QUERY {
        return Err(ValidationError::LimitExceeded("too many hotel ids"));
    }
    let mut seen = HashSet::with_capacity(req.hotel_ids.len());
    let mut hotel_ids = Vec::with_capacity(req.hotel_ids.len());
    for id in &req.hotel_ids {
        validate_hotel_id(id)?;
        if seen.insert(id.as_str()) {
            hotel_ids.push(id.clone());
        }
    }
    let rooms = validate_rooms(req.room_number)?;
    let stay = Stay::parse(&req.in_date, &req.out_date)?;
    Ok(ValidAvailability { hotel_ids, nights: stay.nights(), rooms })
}
