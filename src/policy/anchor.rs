//! Calendar-day anchoring for renewal and grant-expiry checks.
//!
//! "Same day" is decided against a single server-fixed UTC offset, not the
//! evaluator's local timezone — every instance of the service must agree on
//! when a grant day ends, regardless of where it runs. The platform operates
//! in one no-DST timezone, so a plain offset is sufficient.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// Converts instants to calendar days under a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayAnchor {
    offset: FixedOffset,
}

impl DayAnchor {
    /// Anchor days to UTC.
    pub fn utc() -> Self {
        Self {
            offset: FixedOffset::east_opt(0).unwrap(),
        }
    }

    /// Anchor days to a whole-hour UTC offset.
    ///
    /// Returns `None` for offsets outside the valid range (±14 h).
    pub fn from_offset_hours(hours: i32) -> Option<Self> {
        FixedOffset::east_opt(hours * 3600).map(|offset| Self { offset })
    }

    /// The calendar date of `t` under this anchor.
    pub fn local_date(&self, t: DateTime<Utc>) -> NaiveDate {
        t.with_timezone(&self.offset).date_naive()
    }

    /// Whether `a` and `b` fall on the same calendar day under this anchor.
    pub fn same_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.local_date(a) == self.local_date(b)
    }
}

impl Default for DayAnchor {
    fn default() -> Self {
        Self::utc()
    }
}
