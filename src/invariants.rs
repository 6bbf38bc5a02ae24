//! Debug invariant checker (design notes §9: "a separate feature-gated
//! module reads the engine and walks all invariants without any global
//! state").
//!
//! Only compiled in with the `debug-invariants` feature; re-derives every
//! bullet of spec.md §3 from scratch and reports the first violation
//! found. Intended for test suites and CI, not hot loops — it is
//! `O(n + m)` per call.

#![cfg(feature = "debug-invariants")]
#![forbid(unsafe_code)]

use crate::partition::{BlockIdx, PartitionStore, SplitCounter};

#[derive(Debug, thiserror::Error)]
pub enum InvariantViolation {
    #[error("state {0:?} back-pointer into states_in_blocks is wrong: pos={1}, but states_in_blocks[{1}]={2:?}")]
    BadStatePos(crate::lts::StateIdx, u32, crate::lts::StateIdx),
    #[error("block {0:?} range is not contiguous with its bottom/non-bottom split")]
    BadBlockRange(BlockIdx),
    #[error("block {0:?} bottom state at position {1} has nonzero inert-out-count")]
    BottomStateNotInert(BlockIdx, u32),
    #[error("block {0:?} non-bottom state at position {1} has zero inert-out-count")]
    NonBottomStateIsInert(BlockIdx, u32),
    #[error("constellation {0:?} range does not equal the union of its blocks' ranges")]
    BadConstellationRange(crate::partition::ConstellationIdx),
    #[error("duplicate BLC set for (block {0:?}, label {1:?}, target constellation {2:?})")]
    DuplicateBlcSet(BlockIdx, crate::lts::EffectiveLabel, crate::partition::ConstellationIdx),
    #[error("block {0:?}'s constellation-inert BLC set is not first in its list")]
    InertNotFirst(BlockIdx),
    #[error("transition {0:?} back-pointer into its BLC set is inconsistent")]
    BadBlcMembership(crate::partition::TransIdx),
    #[error("state {0:?} has a defined split counter outside an active split")]
    CounterNotUndefined(crate::lts::StateIdx),
}

/// Re-check every invariant of spec.md §3. Call between public stabilizer
/// steps, never mid-split (the counter-undefined check would fail).
pub fn check_all(store: &PartitionStore) -> Result<(), InvariantViolation> {
    check_state_positions(store)?;
    check_block_bottom_split(store)?;
    check_constellation_ranges(store)?;
    check_blc_uniqueness(store)?;
    check_blc_membership_back_pointers(store)?;
    check_counters_undefined(store)?;
    Ok(())
}

fn check_state_positions(store: &PartitionStore) -> Result<(), InvariantViolation> {
    for (pos, &s) in store.states_in_blocks.iter().enumerate() {
        let recorded = store.state(s).pos;
        if recorded != pos as u32 {
            return Err(InvariantViolation::BadStatePos(s, recorded, store.states_in_blocks[recorded as usize]));
        }
    }
    Ok(())
}

fn check_block_bottom_split(store: &PartitionStore) -> Result<(), InvariantViolation> {
    for (i, b) in store.blocks.iter().enumerate() {
        if b.is_empty() {
            continue;
        }
        if !(b.range.start <= b.bottom_end && b.bottom_end <= b.range.end) {
            return Err(InvariantViolation::BadBlockRange(BlockIdx(i as u32)));
        }
        for pos in b.bottom_range() {
            let s = store.states_in_blocks[pos as usize];
            if !store.state(s).is_bottom() {
                return Err(InvariantViolation::BottomStateNotInert(BlockIdx(i as u32), pos));
            }
        }
        for pos in b.non_bottom_range() {
            let s = store.states_in_blocks[pos as usize];
            if store.state(s).is_bottom() {
                return Err(InvariantViolation::NonBottomStateIsInert(BlockIdx(i as u32), pos));
            }
        }
    }
    Ok(())
}

fn check_constellation_ranges(store: &PartitionStore) -> Result<(), InvariantViolation> {
    for (i, c) in store.constellations.iter().enumerate() {
        let mut total = 0u32;
        for &b in &c.blocks {
            total += store.block(b).len();
        }
        if total != c.range.end - c.range.start {
            return Err(InvariantViolation::BadConstellationRange(crate::partition::ConstellationIdx(i as u32)));
        }
    }
    Ok(())
}

fn check_blc_uniqueness(store: &PartitionStore) -> Result<(), InvariantViolation> {
    use std::collections::HashSet;
    let mut seen = HashSet::new();
    for (i, block) in store.blocks.iter().enumerate() {
        if block.is_empty() {
            continue;
        }
        let mut saw_inert = false;
        for (pos, &blc) in block.blc_sets.iter().enumerate() {
            let set = store.blc_set(blc);
            let key = (set.source_block, set.label, set.target_constellation);
            if !seen.insert(key) {
                return Err(InvariantViolation::DuplicateBlcSet(key.0, key.1, key.2));
            }
            if crate::blc::can_be_constellation_inert_head(store, blc) {
                if pos != 0 {
                    return Err(InvariantViolation::InertNotFirst(BlockIdx(i as u32)));
                }
                saw_inert = true;
            }
        }
        let _ = saw_inert;
    }
    Ok(())
}

fn check_blc_membership_back_pointers(store: &PartitionStore) -> Result<(), InvariantViolation> {
    for (i, set) in store.blc.iter().enumerate() {
        for &t in &set.members {
            if store.trans(t).blc_set.as_usize() != i {
                return Err(InvariantViolation::BadBlcMembership(t));
            }
        }
    }
    Ok(())
}

fn check_counters_undefined(store: &PartitionStore) -> Result<(), InvariantViolation> {
    for (i, s) in store.states.iter().enumerate() {
        if !matches!(s.counter, SplitCounter::Undefined) {
            return Err(InvariantViolation::CounterNotUndefined(crate::lts::StateIdx(i as u32)));
        }
    }
    Ok(())
}
