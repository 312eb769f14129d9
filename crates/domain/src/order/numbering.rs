//! Human-readable, year-scoped order numbers.

use std::str::FromStr;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

const PREFIX: &str = "ORD";

/// An order number of the form `ORD-<year>-<5-digit sequence>`.
///
/// The sequence restarts at 1 every calendar year (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderNumber {
    year: i32,
    sequence: u32,
}

impl OrderNumber {
    pub fn new(year: i32, sequence: u32) -> Self {
        Self { year, sequence }
    }

    /// Number for the next order of `now`'s year, given how many orders were
    /// already created since that year started.
    pub fn next(now: DateTime<Utc>, created_this_year: u64) -> Self {
        let sequence = u32::try_from(created_this_year + 1).unwrap_or(u32::MAX);
        Self::new(now.year(), sequence)
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

/// First instant of the calendar year containing `now`.
pub fn year_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{PREFIX}-{}-{:05}", self.year, self.sequence)
    }
}

impl FromStr for OrderNumber {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::OrderNumber(s.to_string());
        let mut parts = s.splitn(3, '-');

        if parts.next() != Some(PREFIX) {
            return Err(invalid());
        }
        let year = parts
            .next()
            .and_then(|y| y.parse::<i32>().ok())
            .ok_or_else(invalid)?;
        let sequence = parts
            .next()
            .filter(|seq| seq.len() >= 5 && seq.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|seq| seq.parse::<u32>().ok())
            .ok_or_else(invalid)?;

        Ok(Self { year, sequence })
    }
}

impl TryFrom<String> for OrderNumber {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OrderNumber> for String {
    fn from(number: OrderNumber) -> Self {
        number.to_string()
    }
}
