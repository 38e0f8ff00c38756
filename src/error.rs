/// Failure of the cache or of a durable store. A cache miss is not a
/// `StorageError`; lookups report misses as `None` or as absent map keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    Cache(String),
    Durable(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Cache(e) => write!(f, "cache error: {e}"),
            StorageError::Durable(e) => write!(f, "durable store error: {e}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Request rejected before any I/O was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    BadDate(String),
    EmptyStay { in_date: String, out_date: String },
    NonPositiveRooms(i64),
    MissingField(&'static str),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::BadDate(raw) => {
                write!(f, "invalid date {raw:?}: expected YYYY-MM-DD")
            }
            ValidationError::EmptyStay { in_date, out_date } => {
                write!(f, "check-out {out_date} must be after check-in {in_date}")
            }
            ValidationError::NonPositiveRooms(n) => {
                write!(f, "room number must be positive, got {n}")
            }
            ValidationError::MissingField(name) => write!(f, "missing {name}"),
            ValidationError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for ValidationError {}
