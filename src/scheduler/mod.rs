mod carve;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use carve::{plan_booking, plan_cancel, BookingPlan, CancelPlan};
pub use error::SchedulerError;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::horizon::Horizon;
use crate::model::*;
use crate::observability::{OPS_TOTAL, OP_DURATION_SECONDS};
use crate::store::{Deadline, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Budget for each operation's statements. `None` disables the check.
    pub statement_timeout_ms: Option<u64>,
    /// Cancel between two free rows joins all three into one.
    pub coalesce: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            statement_timeout_ms: Some(5_000),
            coalesce: true,
        }
    }
}

/// Search, RegisterLot, Book and Cancel over the per-node timeslot tables.
///
/// Holds no interval state of its own: every decision is a read inside the
/// same transaction as the write it guards.
pub struct Scheduler {
    store: Arc<Store>,
    horizon: Horizon,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, first_day: DateTime<Utc>) -> Self {
        Self::with_settings(store, first_day, SchedulerSettings::default())
    }

    pub fn with_settings(store: Arc<Store>, first_day: DateTime<Utc>, settings: SchedulerSettings) -> Self {
        Self {
            store,
            horizon: Horizon::new(first_day),
            settings,
        }
    }

    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Encode a caller window; empty after truncation is rejected.
    fn window(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Span, SchedulerError> {
        self.horizon
            .window(from, to)
            .ok_or(SchedulerError::EmptyWindow { from, to })
    }

    /// Run storage work off the async runtime with a fresh deadline,
    /// recording the op's outcome and latency.
    async fn blocking<T, F>(&self, op: &'static str, work: F) -> Result<T, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(&Store, Deadline) -> Result<T, SchedulerError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let deadline = Deadline::after(self.settings.statement_timeout_ms.map(Duration::from_millis));
        let started = Instant::now();

        let result = match tokio::task::spawn_blocking(move || work(&store, deadline)).await {
            Ok(result) => result,
            Err(e) => Err(SchedulerError::Join(e.to_string())),
        };

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(OPS_TOTAL, "op" => op, "status" => status).increment(1);
        metrics::histogram!(OP_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
        result
    }
}
