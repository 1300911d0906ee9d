use tracing::{debug, info};

use crate::model::*;
use crate::store::{unit_of_work, Neighbors, SlotPatch, SlotQuery, Timeslots, TxScope};

use super::carve::{plan_booking, plan_cancel, BookingPlan, CancelPlan};
use super::{Scheduler, SchedulerError};

impl Scheduler {
    /// Insert the lot's single fully-free row `[0, 65535)`.
    pub async fn register_lot(&self, node: NodeId, key: ClassKey, lot: LotRef) -> Result<(), SchedulerError> {
        let id = self
            .blocking("register_lot", move |store, deadline| {
                let table = store.tables().table(node)?;
                store.with_conn(|conn| {
                    Timeslots::new(conn, table, deadline)
                        .add(&key, &lot, Span::FULL)
                        .map_err(SchedulerError::from)
                })
            })
            .await?;
        info!(%node, region = %key.region, %lot, id, "registered lot");
        Ok(())
    }

    /// Carve `[slot.start_at, slot.end_at)` out of the free row containing it.
    pub async fn book(&self, slot: &TimeSlot) -> Result<(), SchedulerError> {
        let window = self.window(slot.start_at, slot.end_at)?;
        let TimeSlot { node, key, lot, .. } = *slot;

        self.blocking("book", move |store, deadline| {
            let table = store.tables().table(node)?;
            store.with_conn(|conn| {
                unit_of_work(conn, |scope: &mut TxScope<'_, SchedulerError>| {
                    let slots = Timeslots::new(scope.conn(), table, deadline);
                    let mut found = slots.list(&SlotQuery::for_lot(&key, &lot, window).limit(1))?;
                    let Some(free) = found.pop() else {
                        return Err(SchedulerError::PreviousSlotNotFound { lot, window });
                    };

                    let plan = plan_booking(free.span, window);
                    debug!(%node, %lot, %window, free = %free.span, ?plan, "booking");
                    match plan {
                        BookingPlan::Consume => slots.del(&lot, free.id)?,
                        BookingPlan::Shrink(rest) => slots.upd(&SlotPatch::resize(free.id, lot, rest))?,
                        BookingPlan::Split { head, tail } => {
                            slots.upd(&SlotPatch {
                                id: free.id,
                                lot,
                                start_at: None,
                                end_at: Some(head.end),
                            })?;
                            slots.add(&key, &lot, tail)?;
                        }
                    }
                    Ok(())
                })
            })
        })
        .await
    }

    /// Return `[slot.start_at, slot.end_at)` to the free pool, merging it
    /// into adjacent free rows.
    pub async fn cancel(&self, slot: &TimeSlot) -> Result<(), SchedulerError> {
        let window = self.window(slot.start_at, slot.end_at)?;
        let TimeSlot { node, key, lot, .. } = *slot;
        let coalesce = self.settings.coalesce;

        self.blocking("cancel", move |store, deadline| {
            let table = store.tables().table(node)?;
            store.with_conn(|conn| {
                unit_of_work(conn, |scope: &mut TxScope<'_, SchedulerError>| {
                    let slots = Timeslots::new(scope.conn(), table, deadline);
                    if let Some(free) = slots.overlapping(&key, &lot, window)?.first() {
                        return Err(SchedulerError::NotBooked {
                            lot,
                            window,
                            free: free.span,
                        });
                    }

                    let neighbors = if coalesce {
                        slots.neighbors(&key, &lot, window)?
                    } else {
                        match slots.get(&key, &lot, window) {
                            Ok(rec) => Neighbors::from_adjacent(rec, window),
                            Err(e) if e.is_not_found() => Neighbors::default(),
                            Err(e) => return Err(e.into()),
                        }
                    };

                    let plan = plan_cancel(
                        neighbors.before.map(|r| (r.id, r.span)),
                        neighbors.after.map(|r| (r.id, r.span)),
                        window,
                        coalesce,
                    );
                    debug!(%node, %lot, %window, ?plan, "cancelling");
                    match plan {
                        CancelPlan::Insert => {
                            slots.add(&key, &lot, window)?;
                        }
                        CancelPlan::MergeBefore { id, end } => {
                            slots.upd(&SlotPatch { id, lot, start_at: None, end_at: Some(end) })?;
                        }
                        CancelPlan::MergeAfter { id, start } => {
                            slots.upd(&SlotPatch { id, lot, start_at: Some(start), end_at: None })?;
                        }
                        CancelPlan::Coalesce { keep, drop, end } => {
                            slots.del(&lot, drop)?;
                            slots.upd(&SlotPatch { id: keep, lot, start_at: None, end_at: Some(end) })?;
                        }
                    }
                    Ok(())
                })
            })
        })
        .await
    }
}
