use serde::{Deserialize, Serialize};

use crate::model::{Night, format_date};

/// Cache key holding a hotel's total capacity.
pub fn capacity_key(hotel_id: &str) -> String {
    format!("{hotel_id}_cap")
}

/// How a (hotel, night) pair is spelled as a cache key.
///
/// Both schemes are one-to-one per night, so either keeps counts consistent
/// as long as every writer uses the same one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NightKeyScheme {
    /// `<hotel>_<end>_<end>`: the night's end date twice. This is what
    /// deployed caches already hold.
    #[default]
    Legacy,
    /// `<hotel>_<start>_<end>`: the night's actual boundaries.
    Boundaries,
}

impl NightKeyScheme {
    pub fn night_key(&self, hotel_id: &str, night: &Night) -> String {
        let end = format_date(night.end);
        match self {
            NightKeyScheme::Legacy => format!("{hotel_id}_{end}_{end}"),
            NightKeyScheme::Boundaries => format!("{hotel_id}_{}_{end}", format_date(night.start)),
        }
    }
}

impl std::str::FromStr for NightKeyScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(NightKeyScheme::Legacy),
            "boundaries" => Ok(NightKeyScheme::Boundaries),
            other => Err(format!("unknown key scheme {other:?}")),
        }
    }
}
