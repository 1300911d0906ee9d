use crate::model::*;
use crate::store::{SlotQuery, SlotRecord, Timeslots};

use super::{Scheduler, SchedulerError};

impl Scheduler {
    /// Free rows whose interval contains `[query.from, query.to]`.
    /// A non-empty result means the window is free on those lots.
    pub async fn search(&self, query: &Query) -> Result<Vec<FreeSlot>, SchedulerError> {
        let node = query.node;
        let slot_query = SlotQuery {
            region: query.region,
            area: query.area,
            locality: query.locality,
            sublocality: query.sublocality,
            housing_id: query.housing_id,
            lot_id: query.lot_id,
            from: self.horizon.offset(query.from),
            to: self.horizon.offset(query.to),
            offset: query.offset,
            limit: query.limit,
        };

        let records = self
            .blocking("search", move |store, deadline| {
                let table = store.tables().table(node)?;
                store.with_conn(|conn| {
                    Timeslots::new(conn, table, deadline)
                        .list(&slot_query)
                        .map_err(SchedulerError::from)
                })
            })
            .await?;

        Ok(records
            .into_iter()
            .map(|rec| self.free_slot(node, rec))
            .collect())
    }

    /// Every free row of one lot, ordered by start.
    pub async fn timeline(&self, node: NodeId, key: ClassKey, lot: LotRef) -> Result<Vec<FreeSlot>, SchedulerError> {
        let records = self
            .blocking("timeline", move |store, deadline| {
                let table = store.tables().table(node)?;
                store.with_conn(|conn| {
                    Timeslots::new(conn, table, deadline)
                        .timeline(&key, &lot)
                        .map_err(SchedulerError::from)
                })
            })
            .await?;

        Ok(records
            .into_iter()
            .map(|rec| self.free_slot(node, rec))
            .collect())
    }

    fn free_slot(&self, node: NodeId, rec: SlotRecord) -> FreeSlot {
        FreeSlot {
            node,
            key: rec.key,
            lot: rec.lot,
            span: rec.span,
            start_at: self.horizon.instant(rec.span.start),
            end_at: self.horizon.instant(rec.span.end),
        }
    }
}
