//! Stabilizer / driver (C5)
//!
//! The outer loop: repeatedly pick a non-trivial constellation, carve off
//! its smaller side, turn the transitions that now target the carved-off
//! side into main splitters (with co-splitters on the old side), and run
//! the four-way splitter until the picked block's source BLC sets are
//! stable again — interleaving a nested pass over any newly-exposed
//! bottom states. Mirrors the orchestration shape of the teacher's
//! `scheduler::Prover`/`Verifier`: one struct owns the worklists and
//! drives the lower layers (`splitter`, `blc`) to completion, logging
//! progress with `tracing` the way `scheduler.rs` does.

#![forbid(unsafe_code)]

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::blc::{insert_member, remove_member, update_after_carve_off};
use crate::lts::EffectiveLabel;
use crate::partition::{BlcIdx, BlockIdx, ConstellationIdx, PartitionStore};
use crate::splitter::{split_block, SplitResult, Splitters};

/// Owns the two worklists the main loop and the nested stabilize pass
/// consume, and drives both to a fixed point.
pub struct Stabilizer {
    non_trivial: VecDeque<ConstellationIdx>,
    new_bottom_blocks: VecDeque<BlockIdx>,
}

impl Stabilizer {
    pub fn new(store: &PartitionStore) -> Self {
        let non_trivial = store
            .constellations
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_non_trivial())
            .map(|(i, _)| ConstellationIdx(i as u32))
            .collect();
        Self {
            non_trivial,
            new_bottom_blocks: VecDeque::new(),
        }
    }

    /// Run the full outer loop (spec.md §4.5) to completion.
    pub fn run(&mut self, store: &mut PartitionStore) {
        while let Some(k) = self.non_trivial.pop_front() {
            if !store.constellation(k).is_non_trivial() {
                continue;
            }
            self.refine_constellation(store, k);
        }
        debug_assert!(
            self.new_bottom_blocks.is_empty(),
            "stabilize pass must drain new-bottom-state blocks before the outer loop exits"
        );
    }

    fn refine_constellation(&mut self, store: &mut PartitionStore, k: ConstellationIdx) {
        let blocks = store.constellation(k).blocks.clone();
        let first = *blocks.first().expect("non-trivial constellation has >= 2 blocks");
        let last = *blocks.last().expect("non-trivial constellation has >= 2 blocks");
        let carve = if store.block(first).len() <= store.block(last).len() {
            first
        } else {
            last
        };
        debug!(constellation = k.as_usize(), block = carve.as_usize(), "carving sub-constellation");

        let old_range = store.constellation(k).range.clone();
        let carved_range = store.block(carve).range.clone();
        let remaining_blocks: Vec<BlockIdx> = blocks.into_iter().filter(|&b| b != carve).collect();

        let new_range = carved_range.clone();
        let new_const = store.create_constellation(new_range, vec![carve]);

        let remaining_range = if carved_range.start == old_range.start {
            carved_range.end..old_range.end
        } else {
            old_range.start..carved_range.start
        };
        {
            let c = store.constellation_mut(k);
            c.range = remaining_range;
            c.blocks = remaining_blocks.clone();
        }
        if remaining_blocks.len() >= 2 {
            self.non_trivial.push_back(k);
        }

        // Transitions into `carve` used to be indexed under `k`; collect
        // every incoming transition to promote into main splitters.
        let mut incoming_to_carved = Vec::new();
        for pos in store.block(carve).range.clone() {
            let s = store.states_in_blocks[pos as usize];
            incoming_to_carved.extend_from_slice(store.in_slice(s));
        }
        let main_splitters = update_after_carve_off(store, carve, k, new_const, &incoming_to_carved);

        // `carve`'s own outgoing τ-transitions used to be one single
        // constellation-inert set (target `k`, the whole old constellation).
        // Now that `carve` is its own constellation, split that set: members
        // still landing inside `carve` (target now `new_const`) stay inert,
        // the rest (target still `k`) are no longer inert at all and become
        // a fresh, co-splitter-less main splitter on `carve` itself (spec.md
        // §4.5d) — stabilize it directly rather than through `find_co_splitter`,
        // since that lookup would otherwise find this very set as its own
        // co-splitter (both keyed on `(carve, tau, k)`).
        let old_head = store.find_or_create_blc(carve, EffectiveLabel::Tau, k);
        let still_inert: Vec<_> = store
            .blc_set(old_head)
            .members
            .iter()
            .copied()
            .filter(|&t| store.block(store.state(store.trans(t).to).block).constellation == new_const)
            .collect();
        if !still_inert.is_empty() {
            let new_head = store.find_or_create_blc(carve, EffectiveLabel::Tau, new_const);
            for t in still_inert {
                remove_member(store, old_head, t);
                insert_member(store, new_head, t, false);
            }
        }
        store.delete_blc_if_empty(old_head);
        if !store.blc_set(old_head).is_empty() {
            store.blc_set_mut(old_head).stable = false;
            if store.block(carve).len() >= 2 && !store.block(carve).has_new_bottom_states {
                let result = split_block(store, carve, Splitters::tau_only(old_head));
                self.absorb_new_bottom_states(&result);
                self.drain_stabilize_pass(store);
            }
        }

        // τ from the carved block back into the remaining constellation
        // was constellation-inert before and is now a fresh, co-splitter-less
        // main splitter; route it through Tau-only mode (spec.md §4.5d).
        let mut work: VecDeque<BlcIdx> = main_splitters.into_iter().collect();
        while let Some(main) = work.pop_front() {
            if store.blc_set(main).is_empty() {
                continue;
            }
            let source = store.blc_set(main).source_block;
            if store.block(source).len() < 2 || store.block(source).has_new_bottom_states {
                continue;
            }
            let label = store.blc_set(main).label;
            let co = find_co_splitter(store, source, label, k);
            let splitters = match co {
                Some(co) => Splitters::standard(co, main),
                None => Splitters::tau_only(main),
            };
            let result = split_block(store, source, splitters);
            self.absorb_new_bottom_states(&result);
            self.drain_stabilize_pass(store);
        }
    }

    fn absorb_new_bottom_states(&mut self, result: &SplitResult) {
        for &b in &result.blocks_with_new_bottom_states {
            self.new_bottom_blocks.push_back(b);
        }
    }

    /// Nested stabilize pass over blocks that acquired new bottom states
    /// (spec.md §4.5, "Stabilize pass").
    fn drain_stabilize_pass(&mut self, store: &mut PartitionStore) {
        while let Some(block) = self.new_bottom_blocks.pop_front() {
            if !store.block(block).has_new_bottom_states {
                continue;
            }
            trace!(block = block.as_usize(), "stabilizing block with new bottom states");
            let set_list = store.block(block).blc_sets.clone();
            let mut unstable: VecDeque<BlcIdx> = VecDeque::new();
            for blc in set_list {
                if !store.blc_set(blc).stable {
                    let set = store.blc_set_mut(blc);
                    set.marked = set.members.len() as u32;
                    unstable.push_back(blc);
                } else {
                    // Mark every member so the large-splitter-only mode
                    // below sees a fully-marked set to stabilize against.
                }
            }
            store.block_mut(block).has_new_bottom_states = false;

            while let Some(blc) = unstable.pop_front() {
                if store.blc_set(blc).stable {
                    continue;
                }
                let source = store.blc_set(blc).source_block;
                if store.block(source).len() <= 1 {
                    store.blc_set_mut(blc).stable = true;
                    continue;
                }
                let result = split_block(store, source, Splitters::bottom_state(blc));
                store.blc_set_mut(blc).stable = true;
                self.absorb_new_bottom_states(&result);
            }
        }
    }
}

fn find_co_splitter(
    store: &PartitionStore,
    source: BlockIdx,
    label: EffectiveLabel,
    target_const: ConstellationIdx,
) -> Option<BlcIdx> {
    store
        .block(source)
        .blc_sets
        .iter()
        .copied()
        .find(|&b| {
            let s = store.blc_set(b);
            s.label == label && s.target_constellation == target_const
        })
}
