//! Tests for FreeSpaceMap
//!
//! These tests verify:
//! - Lowest-address-first allocation
//! - Bounded and unbounded reservations
//! - Double mark / double free detection
//! - Fill rate, fragmentation and move priority
//! - Allocation invariants under random operation sequences (proptest)

use chunkvault::{FreeSpaceMap, Reservation, VaultError, BLOCK_SIZE, STORE_HEADER_BLOCKS};
use proptest::prelude::*;

// =============================================================================
// Helper Functions
// =============================================================================

fn new_map() -> FreeSpaceMap {
    FreeSpaceMap::new(STORE_HEADER_BLOCKS, BLOCK_SIZE)
}

fn mark(map: &mut FreeSpaceMap, block: u64, blocks: u64) {
    map.mark_used(block * BLOCK_SIZE, blocks * BLOCK_SIZE).unwrap();
}

fn alloc(map: &mut FreeSpaceMap, blocks: u64, reservation: Reservation) -> u64 {
    map.allocate(blocks * BLOCK_SIZE, reservation) / BLOCK_SIZE
}

// =============================================================================
// Allocation Tests
// =============================================================================

#[test]
fn test_new_map_reserves_store_header() {
    let map = new_map();

    assert!(map.is_used(0, STORE_HEADER_BLOCKS * BLOCK_SIZE));
    assert_eq!(map.first_free(), STORE_HEADER_BLOCKS * BLOCK_SIZE);
    assert_eq!(map.after_last_block(), STORE_HEADER_BLOCKS);
}

#[test]
fn test_allocate_takes_lowest_fitting_run() {
    let mut map = new_map();
    mark(&mut map, 2, 2);
    mark(&mut map, 5, 3);
    // Holes: [4,5) and [8,..)

    assert_eq!(alloc(&mut map, 1, Reservation::NONE), 4);
    assert_eq!(alloc(&mut map, 2, Reservation::NONE), 8);
    assert_eq!(map.after_last_block(), 10);
}

#[test]
fn test_partial_block_lengths_round_up() {
    let mut map = new_map();
    let pos = map.allocate(BLOCK_SIZE + 1, Reservation::NONE);

    assert_eq!(pos, 2 * BLOCK_SIZE);
    assert!(map.is_used(pos, 2 * BLOCK_SIZE));
    assert_eq!(map.after_last_block(), 4);
}

#[test]
fn test_bounded_reservation_is_skipped() {
    let mut map = new_map();
    mark(&mut map, 2, 2);
    mark(&mut map, 8, 2);
    // Hole [4,8) partly reserved

    let reservation = Reservation::bounded(4, 6);
    assert_eq!(map.predict_allocation(2, reservation), 6);
    assert_eq!(alloc(&mut map, 2, reservation), 6);
    assert!(map.is_free(4 * BLOCK_SIZE, 2 * BLOCK_SIZE));
}

#[test]
fn test_unbounded_reservation_sends_overlap_to_boundary() {
    let mut map = new_map();
    mark(&mut map, 2, 2);
    mark(&mut map, 8, 2);

    assert_eq!(map.predict_allocation(1, Reservation::unbounded(3)), 10);
    assert_eq!(map.predict_allocation(1, Reservation::unbounded(6)), 4);
    assert_eq!(alloc(&mut map, 3, Reservation::unbounded(6)), 10);
}

#[test]
fn test_empty_reservation_constrains_nothing() {
    assert!(!Reservation::NONE.overlaps(0, 100));
    assert!(Reservation::bounded(4, 6).overlaps(5, 1));
    assert!(!Reservation::bounded(4, 6).overlaps(6, 3));
    assert!(!Reservation::bounded(4, 6).overlaps(2, 2));
    assert!(Reservation::unbounded(4).overlaps(1_000, 1));
}

// =============================================================================
// Mark / Free Tests
// =============================================================================

#[test]
fn test_double_mark_is_corruption() {
    let mut map = new_map();
    mark(&mut map, 2, 4);

    let result = map.mark_used(5 * BLOCK_SIZE, 2 * BLOCK_SIZE);

    assert!(matches!(result, Err(VaultError::Corruption(_))));
    assert!(map.is_free(6 * BLOCK_SIZE, BLOCK_SIZE));
}

#[test]
fn test_double_free_is_corruption() {
    let mut map = new_map();
    mark(&mut map, 2, 4);
    map.free(2 * BLOCK_SIZE, 2 * BLOCK_SIZE).unwrap();

    let result = map.free(3 * BLOCK_SIZE, 2 * BLOCK_SIZE);

    assert!(matches!(result, Err(VaultError::Corruption(_))));
    assert!(map.is_used(4 * BLOCK_SIZE, 2 * BLOCK_SIZE));
}

#[test]
fn test_header_blocks_cannot_be_freed() {
    let mut map = new_map();
    assert!(matches!(map.free(0, BLOCK_SIZE), Err(VaultError::Corruption(_))));
}

#[test]
fn test_freeing_tail_lowers_boundary() {
    let mut map = new_map();
    mark(&mut map, 2, 4);
    mark(&mut map, 10, 2);
    assert_eq!(map.last_free(), 12 * BLOCK_SIZE);

    map.free(10 * BLOCK_SIZE, 2 * BLOCK_SIZE).unwrap();

    assert_eq!(map.after_last_block(), 6);
    assert_eq!(map.last_free(), 6 * BLOCK_SIZE);
}

// =============================================================================
// Statistics Tests
// =============================================================================

#[test]
fn test_fill_rate_bounds() {
    let mut map = new_map();
    assert_eq!(map.fill_rate(), 0);

    mark(&mut map, 2, 10);
    assert_eq!(map.fill_rate(), 100);

    map.free(4 * BLOCK_SIZE, 5 * BLOCK_SIZE).unwrap();
    assert_eq!(map.fill_rate(), 50);
    assert_eq!(map.projected_fill_rate(4), 10);

    map.clear();
    assert_eq!(map.fill_rate(), 0);
    assert_eq!(map.used_blocks(), STORE_HEADER_BLOCKS);
}

#[test]
fn test_repeated_tail_allocations_signal_fragmentation() {
    let mut map = new_map();
    // Single-block holes between single used blocks
    for block in (2..=40).step_by(2) {
        mark(&mut map, block, 1);
    }

    alloc(&mut map, 2, Reservation::NONE);
    assert!(!map.is_fragmented());

    alloc(&mut map, 2, Reservation::NONE);
    assert!(map.is_fragmented());
}

#[test]
fn test_hole_allocations_do_not_signal_fragmentation() {
    let mut map = new_map();
    mark(&mut map, 2, 2);
    mark(&mut map, 20, 2);

    for _ in 0..4 {
        alloc(&mut map, 2, Reservation::NONE);
    }

    assert!(!map.is_fragmented());
}

#[test]
fn test_move_priority_prefers_isolated_chunks() {
    let mut map = new_map();
    mark(&mut map, 2, 8);
    mark(&mut map, 20, 2);

    let big = map.move_priority(2);
    let small = map.move_priority(20);

    assert!(small > big, "small {} should outrank big {}", small, big);
    assert_eq!(map.move_priority(15), 0);
}

#[test]
fn test_move_priority_ignores_tail() {
    let mut map = new_map();
    mark(&mut map, 2, 2);
    mark(&mut map, 6, 2);
    let before_tail = map.move_priority(6);

    mark(&mut map, 30, 1);
    let with_hole_after = map.move_priority(6);

    assert!(with_hole_after > before_tail);
}

// =============================================================================
// Property Tests
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Allocate { blocks: u64, low: u64, span: Option<u64> },
    Free { index: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1u64..8, 0u64..64, prop::option::of(0u64..16))
            .prop_map(|(blocks, low, span)| Op::Allocate { blocks, low, span }),
        1 => any::<usize>().prop_map(|index| Op::Free { index }),
    ]
}

proptest! {
    #[test]
    fn prop_allocations_never_overlap_or_hit_reservation(
        ops in prop::collection::vec(op_strategy(), 1..80)
    ) {
        let mut map = new_map();
        let mut live: Vec<(u64, u64)> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate { blocks, low, span } => {
                    let reservation = match span {
                        Some(span) => Reservation::bounded(low, low + span),
                        None => Reservation::unbounded(low),
                    };
                    let boundary = map.after_last_block();
                    let predicted = map.predict_allocation(blocks, reservation);
                    let start = map.allocate(blocks * BLOCK_SIZE, reservation) / BLOCK_SIZE;

                    prop_assert_eq!(start, predicted);
                    prop_assert!(start >= STORE_HEADER_BLOCKS);
                    match reservation.high {
                        Some(_) => prop_assert!(!reservation.overlaps(start, blocks)),
                        None => prop_assert!(start + blocks <= low || start >= boundary),
                    }
                    for &(other, len) in &live {
                        prop_assert!(start + blocks <= other || other + len <= start);
                    }
                    live.push((start, blocks));
                }
                Op::Free { index } => {
                    if live.is_empty() {
                        continue;
                    }
                    let (start, len) = live.swap_remove(index % live.len());
                    map.free(start * BLOCK_SIZE, len * BLOCK_SIZE).unwrap();
                    prop_assert!(map.free(start * BLOCK_SIZE, len * BLOCK_SIZE).is_err());
                }
            }
        }

        for &(start, len) in &live {
            prop_assert!(map.is_used(start * BLOCK_SIZE, len * BLOCK_SIZE));
        }
        let live_blocks: u64 = live.iter().map(|&(_, len)| len).sum();
        prop_assert_eq!(map.used_blocks(), STORE_HEADER_BLOCKS + live_blocks);
    }

    #[test]
    fn prop_append_only_allocates_at_boundary(
        sizes in prop::collection::vec(1u64..6, 1..30)
    ) {
        let mut map = new_map();
        let mut blocks = Vec::new();
        for size in &sizes {
            blocks.push((alloc(&mut map, *size, Reservation::NONE), *size));
        }
        // Punch holes, then append with the whole in-use region reserved
        for &(start, len) in blocks.iter().step_by(2) {
            map.free(start * BLOCK_SIZE, len * BLOCK_SIZE).unwrap();
        }
        for size in sizes {
            let boundary = map.after_last_block();
            let reservation = Reservation::bounded(0, boundary);
            prop_assert_eq!(alloc(&mut map, size, reservation), boundary);
        }
    }
}
