/// Longest stay a single request may cover.
pub const MAX_STAY_NIGHTS: usize = 366;

/// Most hotels one availability query may name.
pub const MAX_HOTELS_PER_QUERY: usize = 1024;

pub const MAX_ROOMS_PER_REQUEST: i64 = 10_000;

pub const MAX_HOTEL_ID_LEN: usize = 128;
pub const MAX_CUSTOMER_NAME_LEN: usize = 256;

/// Journal records larger than this are treated as corruption on replay.
pub const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Longest JSON request line accepted by the front door.
pub const MAX_REQUEST_LINE_LEN: usize = 256 * 1024;
