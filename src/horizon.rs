use chrono::{DateTime, Duration, Utc};

use crate::model::{Hour, Span};

/// Converts instants to hour offsets from an hour-truncated epoch and back.
///
/// Offsets are fixed-width: anything before the epoch or more than
/// 65535 hours after it wraps instead of failing. Callers keep their
/// windows inside the horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    epoch: DateTime<Utc>,
}

impl Horizon {
    pub fn new(first_day: DateTime<Utc>) -> Self {
        Self {
            epoch: truncate_to_hour(first_day),
        }
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// `floor((truncate_to_hour(point) - epoch) / 1h)`, truncated to 16 bits.
    pub fn offset(&self, point: DateTime<Utc>) -> Hour {
        let hours = (truncate_to_hour(point) - self.epoch).num_hours();
        hours as Hour
    }

    pub fn instant(&self, offset: Hour) -> DateTime<Utc> {
        self.epoch + Duration::hours(i64::from(offset))
    }

    /// Encode a window; `None` when it is empty after truncation.
    pub fn window(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<Span> {
        Span::try_new(self.offset(from), self.offset(to))
    }
}

fn truncate_to_hour(point: DateTime<Utc>) -> DateTime<Utc> {
    let into_hour = point.timestamp().rem_euclid(3600);
    point
        - Duration::seconds(into_hour)
        - Duration::nanoseconds(i64::from(point.timestamp_subsec_nanos()))
}
