use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::ValidationError;
use crate::limits::MAX_STAY_NIGHTS;

/// Wire and storage format of every calendar date.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| ValidationError::BadDate(raw.to_string()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// One night of a stay: half-open `[start, end)` where `end` is the next day.
/// This is the atomic unit capacity is tracked over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Night {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Night {
    /// The night beginning on `date`. `None` only at the end of the calendar.
    pub fn starting(date: NaiveDate) -> Option<Self> {
        date.succ_opt().map(|end| Self { start: date, end })
    }

    pub fn in_date(&self) -> String {
        format_date(self.start)
    }

    pub fn out_date(&self) -> String {
        format_date(self.end)
    }
}

/// A validated check-in (inclusive) to check-out (exclusive) range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn parse(in_date: &str, out_date: &str) -> Result<Self, ValidationError> {
        let check_in = parse_date(in_date)?;
        let check_out = parse_date(out_date)?;
        if check_in >= check_out {
            return Err(ValidationError::EmptyStay {
                in_date: in_date.to_string(),
                out_date: out_date.to_string(),
            });
        }
        let nights = (check_out - check_in).num_days();
        if nights > MAX_STAY_NIGHTS as i64 {
            return Err(ValidationError::LimitExceeded("stay too long"));
        }
        Ok(Self { check_in, check_out })
    }

    /// Nights of the stay in chronological order.
    pub fn nights(&self) -> Vec<Night> {
        self.check_in
            .iter_days()
            .take_while(|d| *d < self.check_out)
            .filter_map(Night::starting)
            .collect()
    }
}

/// Total rooms a hotel has. Written once by provisioning, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotelCapacity {
    pub hotel_id: String,
    pub rooms: u32,
}

/// One booked night of one reservation. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRow {
    pub id: Ulid,
    pub hotel_id: String,
    pub customer_name: String,
    pub night: Night,
    pub rooms: u32,
}

/// The journal record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CapacityProvisioned { hotel_id: String, rooms: u32 },
    /// All rows of one stay, committed as a single record.
    RoomsBooked { rows: Vec<BookingRow> },
}

// ── Requests and results ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub hotel_id: String,
    pub customer_name: String,
    pub in_date: String,
    pub out_date: String,
    pub room_number: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRequest {
    pub hotel_ids: Vec<String>,
    pub in_date: String,
    pub out_date: String,
    pub room_number: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub accepted: bool,
    pub hotel_id: String,
}

impl Outcome {
    pub fn accepted(hotel_id: &str) -> Self {
        Self { accepted: true, hotel_id: hotel_id.to_string() }
    }

    pub fn rejected(hotel_id: &str) -> Self {
        Self { accepted: false, hotel_id: hotel_id.to_string() }
    }

    /// The reservation reply: the hotel id when accepted, nothing otherwise.
    pub fn hotel_ids(&self) -> Vec<String> {
        if self.accepted {
            vec![self.hotel_id.clone()]
        } else {
            Vec::new()
        }
    }
}
