// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::entry::EntryId;
use crate::group::ConsumerGroup;

#[test]
fn test_new_delivery_advances_cursor() {
    let mut group = ConsumerGroup::new();
    assert_eq!(group.next_new(), EntryId(1));

    group.deliver_new("worker-a", &[EntryId(1), EntryId(2)], 100);

    assert_eq!(group.next_new(), EntryId(3));
    assert_eq!(group.pending_count(), 2);
    assert_eq!(group.pending(EntryId(1)).unwrap().delivery_count, 1);
}

#[test]
fn test_redelivery_increments_once_per_delivery() {
    let mut group = ConsumerGroup::new();
    group.deliver_new("worker-a", &[EntryId(1)], 100);

    group.redeliver(&[EntryId(1)], 200);
    group.redeliver(&[EntryId(1)], 300);

    let p = group.pending(EntryId(1)).unwrap();
    assert_eq!(p.delivery_count, 3);
    assert_eq!(p.last_delivered_ms, 300);
    // Cursor is untouched by redelivery
    assert_eq!(group.next_new(), EntryId(2));
}

#[test]
fn test_redeliver_skips_acked_entries() {
    let mut group = ConsumerGroup::new();
    group.deliver_new("worker-a", &[EntryId(1)], 100);
    assert!(group.ack(EntryId(1)));

    group.redeliver(&[EntryId(1)], 200);
    assert!(group.pending(EntryId(1)).is_none());
}

#[test]
fn test_pending_for_filters_by_owner() {
    let mut group = ConsumerGroup::new();
    group.deliver_new("worker-a", &[EntryId(1), EntryId(3)], 100);
    group.deliver_new("worker-b", &[EntryId(2)], 100);

    assert_eq!(group.pending_for("worker-a", 10), vec![EntryId(1), EntryId(3)]);
    assert_eq!(group.pending_for("worker-b", 10), vec![EntryId(2)]);
    assert_eq!(group.pending_for("worker-a", 1), vec![EntryId(1)]);
}

#[test]
fn test_claim_moves_idle_entries_only() {
    let mut group = ConsumerGroup::new();
    group.deliver_new("worker-a", &[EntryId(1)], 1_000);
    group.deliver_new("worker-a", &[EntryId(2)], 9_000);

    let idle = group.idle_for_others("worker-b", 5_000, 10_000, 10);
    assert_eq!(idle, vec![EntryId(1)]);

    group.claim("worker-b", &idle, 10_000);
    let p = group.pending(EntryId(1)).unwrap();
    assert_eq!(p.consumer, "worker-b");
    assert_eq!(p.delivery_count, 2);
    assert_eq!(group.pending(EntryId(2)).unwrap().consumer, "worker-a");
}

#[test]
fn test_ack_is_idempotent() {
    let mut group = ConsumerGroup::new();
    group.deliver_new("worker-a", &[EntryId(1)], 100);

    assert!(group.ack(EntryId(1)));
    assert!(!group.ack(EntryId(1)));
    assert!(!group.ack(EntryId(42)));
    assert_eq!(group.pending_count(), 0);
}
