mod memory;
mod write_behind;

pub use memory::MemoryCache;
pub use write_behind::WriteBehind;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StorageError;

/// Key → decimal-integer cache in front of the durable stores.
///
/// Entries are advisory: they may be stale or absent and nothing relies on
/// them for correctness. A miss is reported as `None` (or an absent key in
/// `get_multi`), never as an error.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Batched lookup. Partial results are allowed.
    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, String>, StorageError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Raw write. Request paths never await this; they submit to [`WriteBehind`].
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Parse a cached count. An unparsable value is logged and treated as a miss.
pub fn parse_count(key: &str, raw: &str) -> Option<u64> {
    match raw.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!("ignoring unparsable cache value for {key}: {raw:?}");
            metrics::counter!(crate::observability::CACHE_UNPARSABLE_TOTAL).increment(1);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_count_accepts_decimal() {
        assert_eq!(parse_count("k", "42"), Some(42));
        assert_eq!(parse_count("k", " 7\n"), Some(7));
    }

    #[test]
    fn parse_count_treats_garbage_as_miss() {
        assert_eq!(parse_count("k", ""), None);
        assert_eq!(parse_count("k", "-3"), None);
        assert_eq!(parse_count("k", "ten"), None);
    }
}
