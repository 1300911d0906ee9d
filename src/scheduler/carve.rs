use crate::model::{Hour, Span};

/// How a free row changes when `window` is booked out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingPlan {
    /// Window covers the whole row: delete it. Shrinking it to zero length
    /// would keep its start in the unique slot index and leave an empty row
    /// that containment search can match.
    Consume,
    /// Window touches one edge: the row becomes the remainder.
    Shrink(Span),
    /// Window is strictly inside: row becomes `head`, a new row holds `tail`.
    Split { head: Span, tail: Span },
}

/// Carve `window` out of `free`. Caller guarantees `free` contains `window`.
pub fn plan_booking(free: Span, window: Span) -> BookingPlan {
    debug_assert!(free.contains_span(&window));
    if window.start == free.start {
        if window.end == free.end {
            return BookingPlan::Consume;
        }
        return BookingPlan::Shrink(Span::new(window.end, free.end));
    }
    let head = Span::new(free.start, window.start);
    if window.end < free.end {
        BookingPlan::Split {
            head,
            tail: Span::new(window.end, free.end),
        }
    } else {
        BookingPlan::Shrink(head)
    }
}

/// How the free rows around a cancelled window change. Rows are named by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPlan {
    /// No adjacent free row: insert the window as a new row.
    Insert,
    /// Extend the preceding row's end to the window's end.
    MergeBefore { id: i64, end: Hour },
    /// Extend the following row's start to the window's start.
    MergeAfter { id: i64, start: Hour },
    /// Extend the preceding row to the following row's end, then delete
    /// the following row.
    Coalesce { keep: i64, drop: i64, end: Hour },
}

/// Decide the merge for `window` given its adjacent free rows as `(id, span)`.
/// Without `coalesce` only one neighbor is merged, the preceding one first.
pub fn plan_cancel(
    before: Option<(i64, Span)>,
    after: Option<(i64, Span)>,
    window: Span,
    coalesce: bool,
) -> CancelPlan {
    match (before, after) {
        (Some((keep, _)), Some((drop, a))) if coalesce => CancelPlan::Coalesce { keep, drop, end: a.end },
        (Some((id, _)), _) => CancelPlan::MergeBefore { id, end: window.end },
        (None, Some((id, _))) => CancelPlan::MergeAfter { id, start: window.start },
        (None, None) => CancelPlan::Insert,
    }
}
