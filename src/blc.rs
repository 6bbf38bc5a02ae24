//! BLC maintainer (C3)
//!
//! Keeps the `(source block, label, target constellation)` index
//! consistent across two kinds of structural change: a block being split
//! in two (§4.3 "split block's membership in BLC sets") and a block being
//! carved off into its own, smaller constellation (§4.3 "update BLC after
//! constellation carve-off"). Both preserve stability flags, the
//! constellation-inert-first ordering of a block's BLC list, and — when a
//! main/co-splitter pair is in play — that the main splitter immediately
//! follows its co-splitter in that list.
//!
//! Deletion of an emptied BLC set is deferred across one call to either
//! operation (mirroring the teacher-language's
//! `m_BLC_indicators_to_be_deleted`, called out in spec.md §9): the moved
//! indices are collected and flushed only once ordering for this call has
//! been fully established, via `PendingDeletions::flush`.

#![forbid(unsafe_code)]

use crate::lts::EffectiveLabel;
use crate::partition::{BlcIdx, BlockIdx, ConstellationIdx, PartitionStore, TransIdx};

/// Deletions collected during one BLC-maintainer call, flushed at its end
/// so that main/co-splitter ordering decisions made mid-call are not
/// disturbed by an early deletion.
#[derive(Default)]
pub struct PendingDeletions(Vec<BlcIdx>);

impl PendingDeletions {
    pub fn push(&mut self, idx: BlcIdx) {
        self.0.push(idx);
    }

    pub fn flush(self, store: &mut PartitionStore) {
        for idx in self.0 {
            store.delete_blc_if_empty(idx);
        }
    }
}

/// Move `moved` (transitions whose source state has just been relocated
/// from block `old` to block `new`) into `new`'s BLC sets, preserving
/// stability and ordering.
///
/// When `old_constellation`/`new_constellation` are given, the call is
/// happening during a main/co-split phase: the co-splitter (targeting
/// `old_constellation`) must already exist in `new`'s list and the main
/// splitter (targeting `new_constellation`) is inserted immediately after
/// it. Without them (a plain block split unrelated to any constellation
/// carve-off), empty old sets may be deleted immediately.
pub fn split_block_membership(
    store: &mut PartitionStore,
    old: BlockIdx,
    new: BlockIdx,
    moved: &[TransIdx],
    main_co: Option<(ConstellationIdx, ConstellationIdx)>,
) {
    let mut pending = PendingDeletions::default();
    let mut touched_old = Vec::new();

    for &t in moved {
        let (label, target_const, old_blc) = {
            let tr = store.trans(t);
            (tr.label, store.blc_set(tr.blc_set).target_constellation, tr.blc_set)
        };
        let was_marked = {
            let set = store.blc_set(old_blc);
            set.members[..set.marked as usize].contains(&t)
        };
        let was_stable = store.blc_set(old_blc).stable;

        remove_member(store, old_blc, t);
        touched_old.push(old_blc);

        let new_blc = match main_co {
            Some((old_const, new_const)) if target_const == new_const => {
                let co = store.find_or_create_blc(new, label, old_const);
                let main = store.find_or_create_blc(new, label, new_const);
                place_after(store, new, co, main);
                main
            }
            _ => store.find_or_create_blc(new, label, target_const),
        };

        store.blc_set_mut(new_blc).stable = was_stable;
        insert_member(store, new_blc, t, was_marked && !was_stable);
    }

    touched_old.sort_by_key(BlcIdx::as_usize);
    touched_old.dedup();
    for idx in touched_old {
        if main_co.is_some() {
            pending.push(idx);
        } else {
            store.delete_blc_if_empty(idx);
        }
    }
    pending.flush(store);
}

/// After block `carved` has been detached to form its own new (small)
/// constellation `new_const` (formerly part of `old_const`): every
/// transition *into* `carved` is promoted from its existing BLC set (which
/// targeted `old_const`, the co-splitter) into a freshly created main
/// splitter targeting `new_const`, placed immediately after that
/// co-splitter in its source block's list. Source blocks whose old set
/// became empty have that set deleted once this call is done.
pub fn update_after_carve_off(
    store: &mut PartitionStore,
    carved: BlockIdx,
    old_const: ConstellationIdx,
    new_const: ConstellationIdx,
    incoming_to_carved: &[TransIdx],
) -> Vec<BlcIdx> {
    let mut pending = PendingDeletions::default();
    let mut new_main_sets = Vec::new();
    let mut touched_old = Vec::new();

    for &t in incoming_to_carved {
        let (source, label, co_idx) = {
            let tr = store.trans(t);
            let source = store.state(tr.from).block;
            (source, tr.label, tr.blc_set)
        };
        debug_assert_eq!(
            store.blc_set(co_idx).target_constellation,
            old_const,
            "transition into the carved block must currently be indexed under the old constellation"
        );
        remove_member(store, co_idx, t);
        touched_old.push(co_idx);

        let main_idx = store.find_or_create_blc(source, label, new_const);
        place_after(store, source, co_idx, main_idx);
        // A freshly detached constellation always starts life as a new,
        // unstable splitter — its very existence is the evidence that
        // triggers a 4-way split on `source`.
        store.blc_set_mut(main_idx).stable = false;
        insert_member(store, main_idx, t, false);
        new_main_sets.push(main_idx);
    }

    let _ = carved;
    touched_old.sort_by_key(BlcIdx::as_usize);
    touched_old.dedup();
    for idx in touched_old {
        pending.push(idx);
    }
    pending.flush(store);

    new_main_sets.sort_by_key(BlcIdx::as_usize);
    new_main_sets.dedup();
    new_main_sets
}

/// Remove `t` from `blc`'s membership, preserving the marked/unmarked
/// partition (order within either half does not matter). O(1) via
/// `Transition::pos_in_blc` instead of a scan.
pub(crate) fn remove_member(store: &mut PartitionStore, blc: BlcIdx, t: TransIdx) {
    let pos = store.trans(t).pos_in_blc;
    let set = store.blc_set(blc);
    if set.members.get(pos as usize).copied() != Some(t) {
        return;
    }
    let marked = set.marked;
    let last = set.members.len() as u32 - 1;
    if pos < marked {
        let new_marked = marked - 1;
        store.swap_blc_members(blc, pos, new_marked);
        store.blc_set_mut(blc).marked = new_marked;
        store.swap_blc_members(blc, new_marked, last);
    } else {
        store.swap_blc_members(blc, pos, last);
    }
    store.blc_set_mut(blc).members.pop();
}

pub(crate) fn insert_member(store: &mut PartitionStore, blc: BlcIdx, t: TransIdx, marked: bool) {
    store.trans_mut(t).blc_set = blc;
    let last = {
        let set = store.blc_set_mut(blc);
        set.members.push(t);
        set.members.len() as u32 - 1
    };
    store.trans_mut(t).pos_in_blc = last;
    if marked {
        let marked_pos = store.blc_set(blc).marked;
        store.swap_blc_members(blc, marked_pos, last);
        store.blc_set_mut(blc).marked += 1;
    }
}

/// Reorder `block`'s BLC list so that `main` sits immediately after `co`
/// (spec.md §3's main-splitter-after-co-splitter invariant), preserving
/// the constellation-inert-first rule (never moves position 0 unless
/// `co` itself occupies it and `main` would too — which cannot happen,
/// a main splitter is by construction never constellation-inert).
fn place_after(store: &mut PartitionStore, block: BlockIdx, co: BlcIdx, main: BlcIdx) {
    let list = &mut store.block_mut(block).blc_sets;
    let Some(main_pos) = list.iter().position(|&b| b == main) else {
        return;
    };
    let Some(co_pos) = list.iter().position(|&b| b == co) else {
        return;
    };
    if main_pos == co_pos + 1 {
        return;
    }
    let main_val = list.remove(main_pos);
    let co_pos = list.iter().position(|&b| b == co).unwrap();
    list.insert(co_pos + 1, main_val);
}

/// Is `blc` a label such that it could ever be the constellation-inert
/// head of its block's list?
pub fn can_be_constellation_inert_head(store: &PartitionStore, blc: BlcIdx) -> bool {
    let set = store.blc_set(blc);
    set.label.is_tau() && store.block(set.source_block).constellation == set.target_constellation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lts::{LabelIdx, StateIdx};
    use crate::partition::{Constellation, Transition};

    fn two_block_store() -> PartitionStore {
        let mut p = PartitionStore::default();
        p.states_in_blocks = vec![StateIdx(0), StateIdx(1)];
        p.states = vec![
            crate::partition::State {
                block: BlockIdx(0),
                pos: 0,
                inert_out_count: 0,
                counter: crate::partition::SplitCounter::Undefined,
            },
            crate::partition::State {
                block: BlockIdx(1),
                pos: 1,
                inert_out_count: 0,
                counter: crate::partition::SplitCounter::Undefined,
            },
        ];
        p.blocks.push(crate::partition::Block {
            range: 0..1,
            bottom_end: 1,
            constellation: ConstellationIdx(0),
            blc_sets: Vec::new(),
            has_new_bottom_states: false,
        });
        p.blocks.push(crate::partition::Block {
            range: 1..2,
            bottom_end: 2,
            constellation: ConstellationIdx(0),
            blc_sets: Vec::new(),
            has_new_bottom_states: false,
        });
        p.constellations.push(Constellation {
            range: 0..2,
            blocks: vec![BlockIdx(0), BlockIdx(1)],
        });
        p
    }

    #[test]
    fn split_moves_transitions_into_new_blocks_set() {
        let mut p = two_block_store();
        let label = EffectiveLabel::Visible(LabelIdx(0));
        let blc = p.find_or_create_blc(BlockIdx(0), label, ConstellationIdx(0));
        p.trans.push(Transition {
            from: StateIdx(0),
            label,
            to: StateIdx(1),
            blc_set: blc,
            pos_in_blc: 0,
        });
        let t0 = TransIdx(0);
        p.blc_set_mut(blc).members.push(t0);

        // Carve a third block "new" = BlockIdx(2) out of BlockIdx(0).
        p.blocks.push(crate::partition::Block {
            range: 0..1,
            bottom_end: 1,
            constellation: ConstellationIdx(0),
            blc_sets: Vec::new(),
            has_new_bottom_states: false,
        });
        split_block_membership(&mut p, BlockIdx(0), BlockIdx(2), &[t0], None);

        assert!(p.blc_set(blc).members.is_empty());
        let moved_to = p.trans(t0).blc_set;
        assert_eq!(p.blc_set(moved_to).source_block, BlockIdx(2));
        assert_eq!(p.blc_set(moved_to).members, vec![t0]);
    }
}
