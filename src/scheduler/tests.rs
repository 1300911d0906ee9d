use std::sync::Arc;

use chrono::{Duration, TimeZone};

use super::*;
use crate::store::{NodeRegistry, StoreError};

fn day0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn hours(n: i64) -> DateTime<Utc> {
    day0() + Duration::hours(n)
}

fn node() -> NodeId {
    "xx".parse().unwrap()
}

fn key() -> ClassKey {
    ClassKey::new("fi".parse().unwrap(), 91, 4, 2)
}

fn lot() -> LotRef {
    LotRef::new(18_000_000_000, 42)
}

fn scheduler_with(settings: SchedulerSettings) -> Scheduler {
    let store = Store::in_memory(NodeRegistry::new([node()])).unwrap();
    Scheduler::with_settings(Arc::new(store), day0(), settings)
}

fn scheduler() -> Scheduler {
    scheduler_with(SchedulerSettings::default())
}

fn slot(lot: LotRef, from: i64, to: i64) -> TimeSlot {
    TimeSlot {
        node: node(),
        key: key(),
        lot,
        start_at: hours(from),
        end_at: hours(to),
    }
}

fn window_query(from: i64, to: i64) -> Query {
    Query {
        area: Some(key().area),
        locality: Some(key().locality),
        sublocality: Some(key().sublocality),
        housing_id: Some(lot().housing_id),
        lot_id: Some(lot().lot_id),
        ..Query::new(node(), key().region, hours(from), hours(to))
    }
}

async fn spans(s: &Scheduler, lot: LotRef) -> Vec<Span> {
    s.timeline(node(), key(), lot)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.span)
        .collect()
}

/// Free rows are sorted, disjoint and inside the horizon; free plus
/// booked hours cover it exactly.
async fn assert_partition(s: &Scheduler, lot: LotRef, booked_hours: u32) {
    let free = spans(s, lot).await;
    for pair in free.windows(2) {
        assert!(pair[0].end <= pair[1].start, "overlap in {free:?}");
    }
    let free_hours: u32 = free.iter().map(Span::hours).sum();
    assert_eq!(free_hours + booked_hours, Span::FULL.hours(), "{free:?}");
}

// ── Concrete scenario ────────────────────────────────────

#[tokio::test]
async fn register_book_search_cancel() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();
    assert_eq!(spans(&s, lot()).await, vec![Span::FULL]);

    s.book(&slot(lot(), 24, 72)).await.unwrap();
    assert_eq!(
        spans(&s, lot()).await,
        vec![Span::new(0, 24), Span::new(72, 65_535)]
    );

    assert!(s.search(&window_query(24, 72)).await.unwrap().is_empty());
    let hits = s.search(&window_query(72, 73)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].span, Span::new(72, 65_535));
    assert_eq!(hits[0].start_at, hours(72));
    assert_eq!(hits[0].lot, lot());
    assert_eq!(hits[0].node, node());

    s.cancel(&slot(lot(), 24, 72)).await.unwrap();
    assert_eq!(spans(&s, lot()).await, vec![Span::FULL]);
}

#[tokio::test]
async fn search_after_register_finds_full_row() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();
    for (from, to) in [(0, 1), (100, 2_000), (65_000, 65_535)] {
        let hits = s.search(&window_query(from, to)).await.unwrap();
        assert_eq!(hits.len(), 1, "window [{from}, {to})");
        assert_eq!(hits[0].span, Span::FULL);
        assert_eq!(hits[0].end_at, hours(65_535));
    }
}

#[tokio::test]
async fn search_filters_are_optional() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();
    s.register_lot(node(), key(), LotRef::new(7, 8)).await.unwrap();

    let q = Query::new(node(), key().region, hours(10), hours(20));
    assert_eq!(s.search(&q).await.unwrap().len(), 2);

    let q = Query {
        area: Some(0),
        ..Query::new(node(), key().region, hours(10), hours(20))
    };
    assert!(s.search(&q).await.unwrap().is_empty());

    let q = Query {
        limit: Some(1),
        ..Query::new(node(), key().region, hours(10), hours(20))
    };
    assert_eq!(s.search(&q).await.unwrap().len(), 1);
}

// ── Book ─────────────────────────────────────────────────

#[tokio::test]
async fn left_aligned_booking_shrinks_only() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();

    s.book(&slot(lot(), 0, 10)).await.unwrap();
    assert_eq!(spans(&s, lot()).await, vec![Span::new(10, 65_535)]);

    s.book(&slot(lot(), 10, 12)).await.unwrap();
    assert_eq!(spans(&s, lot()).await, vec![Span::new(12, 65_535)]);
    assert_partition(&s, lot(), 12).await;
}

#[tokio::test]
async fn interior_booking_splits() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();
    let before = spans(&s, lot()).await.len();

    s.book(&slot(lot(), 100, 110)).await.unwrap();
    let after = spans(&s, lot()).await;
    assert_eq!(after.len(), before + 1);
    assert_eq!(after, vec![Span::new(0, 100), Span::new(110, 65_535)]);
}

#[tokio::test]
async fn right_aligned_booking_shrinks_without_insert() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();
    s.book(&slot(lot(), 50, 60)).await.unwrap();

    // [0, 50) ends where the booking ends.
    s.book(&slot(lot(), 40, 50)).await.unwrap();
    assert_eq!(
        spans(&s, lot()).await,
        vec![Span::new(0, 40), Span::new(60, 65_535)]
    );
    assert_partition(&s, lot(), 20).await;
}

#[tokio::test]
async fn booking_whole_row_removes_it() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();
    s.book(&slot(lot(), 10, 20)).await.unwrap();
    s.book(&slot(lot(), 0, 10)).await.unwrap();
    assert_eq!(spans(&s, lot()).await, vec![Span::new(20, 65_535)]);
    assert_partition(&s, lot(), 20).await;
}

#[tokio::test]
async fn booking_not_contained_fails_without_mutation() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();
    s.book(&slot(lot(), 24, 72)).await.unwrap();
    let before = spans(&s, lot()).await;

    for (from, to) in [(20, 30), (24, 72), (70, 80), (0, 100)] {
        let err = s.book(&slot(lot(), from, to)).await.unwrap_err();
        assert!(
            matches!(err, SchedulerError::PreviousSlotNotFound { .. }),
            "[{from}, {to}): {err}"
        );
        assert!(err.is_not_found());
    }
    assert_eq!(spans(&s, lot()).await, before);
}

#[tokio::test]
async fn booking_unregistered_lot_fails() {
    let s = scheduler();
    let err = s.book(&slot(lot(), 1, 2)).await.unwrap_err();
    assert!(matches!(err, SchedulerError::PreviousSlotNotFound { .. }));
}

#[tokio::test]
async fn full_range_lot_ids() {
    let s = scheduler();
    let big = LotRef::new(u64::MAX, 1 << 63);
    s.register_lot(node(), key(), big).await.unwrap();
    s.book(&slot(big, 24, 72)).await.unwrap();

    let q = Query {
        housing_id: Some(u64::MAX),
        lot_id: Some(1 << 63),
        ..Query::new(node(), key().region, hours(72), hours(80))
    };
    let hits = s.search(&q).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].lot, big);
    assert_eq!(hits[0].span, Span::new(72, 65_535));

    s.cancel(&slot(big, 24, 72)).await.unwrap();
    assert_eq!(spans(&s, big).await, vec![Span::FULL]);
}

#[tokio::test]
async fn lots_do_not_interact() {
    let s = scheduler();
    let other = LotRef::new(lot().housing_id, lot().lot_id + 1);
    s.register_lot(node(), key(), lot()).await.unwrap();
    s.register_lot(node(), key(), other).await.unwrap();

    s.book(&slot(lot(), 24, 72)).await.unwrap();
    assert_eq!(spans(&s, other).await, vec![Span::FULL]);
    s.book(&slot(other, 24, 72)).await.unwrap();
    s.cancel(&slot(lot(), 24, 72)).await.unwrap();
    assert_eq!(
        spans(&s, other).await,
        vec![Span::new(0, 24), Span::new(72, 65_535)]
    );
}

#[tokio::test]
async fn empty_window_rejected() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();
    let mut same_hour = slot(lot(), 5, 5);
    same_hour.end_at = same_hour.start_at + Duration::minutes(30);
    assert!(matches!(
        s.book(&same_hour).await,
        Err(SchedulerError::EmptyWindow { .. })
    ));
    assert!(matches!(
        s.cancel(&slot(lot(), 9, 3)).await,
        Err(SchedulerError::EmptyWindow { .. })
    ));
}

// ── Cancel ───────────────────────────────────────────────

#[tokio::test]
async fn cancel_merges_single_neighbor() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();
    s.book(&slot(lot(), 10, 30)).await.unwrap();

    // Preceding neighbor [0, 10) grows to [0, 20).
    s.cancel(&slot(lot(), 10, 20)).await.unwrap();
    assert_eq!(
        spans(&s, lot()).await,
        vec![Span::new(0, 20), Span::new(30, 65_535)]
    );

    s.book(&slot(lot(), 0, 20)).await.unwrap();
    // Following neighbor [30, ..) grows back to 25.
    s.cancel(&slot(lot(), 25, 30)).await.unwrap();
    assert_eq!(spans(&s, lot()).await, vec![Span::new(25, 65_535)]);
    assert_partition(&s, lot(), 25).await;
}

#[tokio::test]
async fn cancel_without_neighbors_inserts() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();
    s.book(&slot(lot(), 10, 40)).await.unwrap();

    s.cancel(&slot(lot(), 20, 30)).await.unwrap();
    assert_eq!(
        spans(&s, lot()).await,
        vec![Span::new(0, 10), Span::new(20, 30), Span::new(40, 65_535)]
    );
    assert_partition(&s, lot(), 20).await;
}

#[tokio::test]
async fn cancel_of_free_window_is_not_booked() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();
    s.book(&slot(lot(), 10, 20)).await.unwrap();
    let before = spans(&s, lot()).await;

    for (from, to) in [(0, 5), (15, 25), (30, 40)] {
        let err = s.cancel(&slot(lot(), from, to)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotBooked { .. }), "{err}");
    }
    assert_eq!(spans(&s, lot()).await, before);
}

#[tokio::test]
async fn cancel_without_coalesce_merges_one_side() {
    let s = scheduler_with(SchedulerSettings {
        coalesce: false,
        ..SchedulerSettings::default()
    });
    s.register_lot(node(), key(), lot()).await.unwrap();
    s.book(&slot(lot(), 24, 72)).await.unwrap();

    s.cancel(&slot(lot(), 24, 72)).await.unwrap();
    assert_eq!(
        spans(&s, lot()).await,
        vec![Span::new(0, 72), Span::new(72, 65_535)]
    );
    // Still free as a whole even though stored as two rows.
    assert_partition(&s, lot(), 0).await;
    assert!(s.search(&window_query(24, 72)).await.unwrap().len() == 1);
    assert!(s.search(&window_query(70, 74)).await.unwrap().is_empty());
}

#[tokio::test]
async fn round_trips_keep_partition() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();
    let windows = [(0, 8), (30, 40), (100, 200), (8, 30), (65_000, 65_535), (40, 41)];

    let mut booked = 0;
    for (from, to) in windows {
        s.book(&slot(lot(), from, to)).await.unwrap();
        booked += (to - from) as u32;
        assert_partition(&s, lot(), booked).await;
    }
    for (from, to) in windows.iter().rev() {
        s.cancel(&slot(lot(), *from, *to)).await.unwrap();
        booked -= (to - from) as u32;
        assert_partition(&s, lot(), booked).await;
        assert_eq!(s.search(&window_query(*from, *to)).await.unwrap().len(), 1);
    }
    assert_eq!(spans(&s, lot()).await, vec![Span::FULL]);
}

// ── Registration and storage errors ──────────────────────

#[tokio::test]
async fn duplicate_register_fails() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();
    let err = s.register_lot(node(), key(), lot()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Store(StoreError::Duplicate { .. })), "{err}");
    assert_eq!(spans(&s, lot()).await, vec![Span::FULL]);
}

#[tokio::test]
async fn unknown_node_fails_before_sql() {
    let s = scheduler();
    let other: NodeId = "zz".parse().unwrap();
    let err = s.register_lot(other, key(), lot()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Store(StoreError::UnknownNode(n)) if n == other));

    let mut q = window_query(1, 2);
    q.node = other;
    assert!(matches!(
        s.search(&q).await,
        Err(SchedulerError::Store(StoreError::UnknownNode(_)))
    ));
}

#[tokio::test]
async fn expired_deadline_rolls_back() {
    let s = scheduler();
    s.register_lot(node(), key(), lot()).await.unwrap();

    let rushed = Scheduler::with_settings(
        Arc::clone(&s.store),
        day0(),
        SchedulerSettings {
            statement_timeout_ms: Some(0),
            coalesce: true,
        },
    );
    let err = rushed.book(&slot(lot(), 24, 72)).await.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Store(StoreError::DeadlineExceeded { .. })
    ));
    assert_eq!(spans(&s, lot()).await, vec![Span::FULL]);
}
