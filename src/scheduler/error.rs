use chrono::{DateTime, Utc};

use crate::model::{LotRef, Span};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// No single free row contains the requested window.
    #[error("failed to get previous slot: no free row of lot {lot} contains {window}")]
    PreviousSlotNotFound { lot: LotRef, window: Span },
    /// Cancel of a window that is (at least partly) still free.
    #[error("window {window} of lot {lot} is not booked: overlaps free row {free}")]
    NotBooked { lot: LotRef, window: Span, free: Span },
    #[error("empty window: {from} is not before {to} at hour granularity")]
    EmptyWindow {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    #[error("storage task failed: {0}")]
    Join(String),
}

impl SchedulerError {
    /// Absence of an expected free or adjacent row.
    pub fn is_not_found(&self) -> bool {
        match self {
            SchedulerError::Store(e) => e.is_not_found(),
            SchedulerError::PreviousSlotNotFound { .. } => true,
            _ => false,
        }
    }
}
