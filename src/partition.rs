//! Partition store (C2)
//!
//! Owns every entity the refinement touches — states, transitions, blocks,
//! constellations, BLC sets — behind small `Copy` index newtypes, the way
//! `stream.rs`'s `BlockIdx`/`RowIdx`/`RegIdx` front the teacher's tile
//! arithmetic. Arenas own; everything else borrows by index (design notes
//! §9's "ownership explicit" guidance).
//!
//! Two of the three parallel orderings from spec.md §3 are genuine
//! permutation arrays here: `states_in_blocks` (states, so that a block's
//! or constellation's states are a contiguous range) and each state's
//! outgoing-transition slice (so that one state's saC-slices are
//! contiguous). The third — BLC-transitions — is represented per BLC set
//! as an owned `Vec<TransIdx>` rather than a single globally-sliced array;
//! this keeps the in-place swap bookkeeping tractable in a from-scratch
//! rewrite while preserving every invariant BLC sets must satisfy (one set
//! per `(block, label, target constellation)`, constellation-inert-first,
//! main-after-co-splitter ordering). See DESIGN.md for the rationale.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::ops::Range;

use crate::lts::{EffectiveLabel, StateIdx};

/// Index of a block in the `BlockArena`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockIdx(pub u32);

/// Index of a constellation in the `ConstellationArena`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstellationIdx(pub u32);

/// Index of a transition in the `TransArena`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransIdx(pub u32);

/// Index of a BLC set in the `BlcArena`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlcIdx(pub u32);

impl BlockIdx {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}
impl ConstellationIdx {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}
impl TransIdx {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}
impl BlcIdx {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The three subblocks that can receive a *proven* state before NewBotSt
/// reclassification; see splitter.rs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Subblock3 {
    ReachAlw,
    AvoidSml,
    AvoidLrg,
}

/// Bound on block-inert out-transitions per state, enforced at partition
/// build time (spec.md §4.2, §7 `StateFanoutTooLarge`).
///
/// The source encodes a state's split-time counter in a single machine
/// word split into three subblock ranges plus two sentinels; we keep the
/// *contract* (this bound) without the bit-packing — design notes §9
/// explicitly discourages sharing bits across enum arms in a modern
/// target language. `SplitCounter` below is the idiomatic replacement.
pub const MAX_BLOCK_INERT_OUT_TRANSITIONS: u32 = (u32::MAX - 2) / 3;

/// A state's transient split-time counter (spec.md §3, "State counter").
///
/// `Undefined` outside the scope of an active split (checked by
/// `invariants.rs`). `Potential` tracks which of the three subblocks a
/// state is tentatively assigned to and how many of its block-inert
/// out-transitions still need to be proven to land in that subblock.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SplitCounter {
    Undefined,
    Potential { subblock: Subblock3, remaining: u32 },
    NewBotSt,
}

impl Default for SplitCounter {
    fn default() -> Self {
        SplitCounter::Undefined
    }
}

/// A state's arena record.
#[derive(Clone, Debug)]
pub struct State {
    pub block: BlockIdx,
    /// Position into `PartitionStore::states_in_blocks`.
    pub pos: u32,
    /// Count of currently block-inert outgoing transitions.
    pub inert_out_count: u32,
    pub counter: SplitCounter,
}

impl State {
    #[inline]
    pub fn is_bottom(&self) -> bool {
        self.inert_out_count == 0
    }
}

/// A transition's arena record.
#[derive(Clone, Debug)]
pub struct Transition {
    pub from: StateIdx,
    pub label: EffectiveLabel,
    pub to: StateIdx,
    pub blc_set: BlcIdx,
    /// Position into `blc_set`'s `members`; kept in sync the way
    /// `State::pos` tracks `states_in_blocks`, so `mark_transition` and the
    /// BLC maintainer's member moves are O(1) instead of a scan.
    pub pos_in_blc: u32,
}

/// A block: a contiguous range in `states_in_blocks`, split into a
/// bottom-states prefix (`[range.start, bottom_end)`) and a non-bottom
/// suffix (`[bottom_end, range.end)`).
#[derive(Clone, Debug)]
pub struct Block {
    pub range: Range<u32>,
    pub bottom_end: u32,
    pub constellation: ConstellationIdx,
    /// BLC sets whose source is this block, in invariant-preserving
    /// order: the constellation-inert set (if any) first, then stable
    /// sets, then unstable sets (spec.md §3).
    pub blc_sets: Vec<BlcIdx>,
    pub has_new_bottom_states: bool,
}

impl Block {
    #[inline]
    pub fn len(&self) -> u32 {
        self.range.end - self.range.start
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.start == self.range.end
    }
    #[inline]
    pub fn bottom_range(&self) -> Range<u32> {
        self.range.start..self.bottom_end
    }
    #[inline]
    pub fn non_bottom_range(&self) -> Range<u32> {
        self.bottom_end..self.range.end
    }
}

/// A constellation: a contiguous range in `states_in_blocks` covering one
/// or more whole blocks consecutively.
#[derive(Clone, Debug)]
pub struct Constellation {
    pub range: Range<u32>,
    pub blocks: Vec<BlockIdx>,
}

impl Constellation {
    #[inline]
    pub fn is_non_trivial(&self) -> bool {
        self.blocks.len() >= 2
    }
}

/// A BLC set: all transitions sharing one `(source block, label, target
/// constellation)` triple.
#[derive(Clone, Debug)]
pub struct BlcSet {
    pub source_block: BlockIdx,
    pub label: EffectiveLabel,
    pub target_constellation: ConstellationIdx,
    pub members: Vec<TransIdx>,
    pub stable: bool,
    /// Boundary within `members`: `members[..marked]` have been moved
    /// across the stability line by `mark_transition`, the rest have not.
    pub marked: u32,
}

impl BlcSet {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Arena + three parallel orderings + BLC index, all mutated only by the
/// stabilizer and the four-way splitter it drives.
#[derive(Default)]
pub struct PartitionStore {
    pub states: Vec<State>,
    pub trans: Vec<Transition>,
    pub blocks: Vec<Block>,
    pub constellations: Vec<Constellation>,
    pub blc: Vec<BlcSet>,

    /// Permutation of `0..n`; `states_in_blocks[state.pos] == state`.
    pub states_in_blocks: Vec<StateIdx>,

    /// Per-state outgoing transitions, grouped first by source state and
    /// then, within one source, into contiguous saC-slices (same
    /// effective label, same target constellation). `out_csr[s]` is the
    /// start offset of state `s`'s run in `outgoing`; `out_csr[s+1]` its
    /// end (length `n+1`).
    pub outgoing: Vec<TransIdx>,
    pub out_csr: Vec<u32>,

    /// Static CSR of incoming transitions grouped by target state, built
    /// once at initialisation and never permuted — it is not one of the
    /// three orderings the algorithm's complexity bound depends on, it is
    /// only ever *read* (predecessor walks in the four-way splitter).
    pub incoming: Vec<TransIdx>,
    pub in_csr: Vec<u32>,

    /// Lookup used by the BLC maintainer to find-or-create the set for a
    /// given `(source block, label, target constellation)` triple.
    blc_index: HashMap<(BlockIdx, EffectiveLabel, ConstellationIdx), BlcIdx>,
}

impl PartitionStore {
    pub fn state(&self, s: StateIdx) -> &State {
        &self.states[s.as_usize()]
    }
    pub fn state_mut(&mut self, s: StateIdx) -> &mut State {
        &mut self.states[s.as_usize()]
    }
    pub fn trans(&self, t: TransIdx) -> &Transition {
        &self.trans[t.as_usize()]
    }
    pub fn trans_mut(&mut self, t: TransIdx) -> &mut Transition {
        &mut self.trans[t.as_usize()]
    }
    pub fn block(&self, b: BlockIdx) -> &Block {
        &self.blocks[b.as_usize()]
    }
    pub fn block_mut(&mut self, b: BlockIdx) -> &mut Block {
        &mut self.blocks[b.as_usize()]
    }
    pub fn constellation(&self, c: ConstellationIdx) -> &Constellation {
        &self.constellations[c.as_usize()]
    }
    pub fn constellation_mut(&mut self, c: ConstellationIdx) -> &mut Constellation {
        &mut self.constellations[c.as_usize()]
    }
    pub fn blc_set(&self, b: BlcIdx) -> &BlcSet {
        &self.blc[b.as_usize()]
    }
    pub fn blc_set_mut(&mut self, b: BlcIdx) -> &mut BlcSet {
        &mut self.blc[b.as_usize()]
    }

    #[inline]
    pub fn out_range(&self, s: StateIdx) -> Range<u32> {
        self.out_csr[s.as_usize()]..self.out_csr[s.as_usize() + 1]
    }
    #[inline]
    pub fn in_range(&self, s: StateIdx) -> Range<u32> {
        self.in_csr[s.as_usize()]..self.in_csr[s.as_usize() + 1]
    }
    #[inline]
    pub fn out_slice(&self, s: StateIdx) -> &[TransIdx] {
        let r = self.out_range(s);
        &self.outgoing[r.start as usize..r.end as usize]
    }
    #[inline]
    pub fn in_slice(&self, s: StateIdx) -> &[TransIdx] {
        let r = self.in_range(s);
        &self.incoming[r.start as usize..r.end as usize]
    }

    /// Swap two states' positions in `states_in_blocks`; back-pointers
    /// follow. O(1).
    pub fn swap_states(&mut self, pos_a: u32, pos_b: u32) {
        if pos_a == pos_b {
            return;
        }
        self.states_in_blocks.swap(pos_a as usize, pos_b as usize);
        let a = self.states_in_blocks[pos_a as usize];
        let b = self.states_in_blocks[pos_b as usize];
        self.state_mut(a).pos = pos_a;
        self.state_mut(b).pos = pos_b;
    }

    /// Cyclically swap three positions: `pos_a -> pos_b -> pos_c -> pos_a`.
    pub fn cycle_states(&mut self, pos_a: u32, pos_b: u32, pos_c: u32) {
        if pos_a == pos_b && pos_b == pos_c {
            return;
        }
        let tmp = self.states_in_blocks[pos_a as usize];
        self.states_in_blocks[pos_a as usize] = self.states_in_blocks[pos_c as usize];
        self.states_in_blocks[pos_c as usize] = self.states_in_blocks[pos_b as usize];
        self.states_in_blocks[pos_b as usize] = tmp;
        for pos in [pos_a, pos_b, pos_c] {
            let s = self.states_in_blocks[pos as usize];
            self.state_mut(s).pos = pos;
        }
    }

    /// Swap two members within a BLC set's `members` list; back-pointers
    /// (`Transition::pos_in_blc`) follow. O(1).
    pub fn swap_blc_members(&mut self, blc: BlcIdx, i: u32, j: u32) {
        if i == j {
            return;
        }
        self.blc[blc.as_usize()].members.swap(i as usize, j as usize);
        let ti = self.blc[blc.as_usize()].members[i as usize];
        let tj = self.blc[blc.as_usize()].members[j as usize];
        self.trans_mut(ti).pos_in_blc = i;
        self.trans_mut(tj).pos_in_blc = j;
    }

    /// Move a transition across its BLC set's stability boundary
    /// (`mark a transition`, spec.md §4.2). O(1) via `Transition::pos_in_blc`.
    pub fn mark_transition(&mut self, blc: BlcIdx, t: TransIdx) {
        debug_assert!(!self.blc_set(blc).stable, "marking a transition on an already-stable BLC set");
        let pos = self.trans(t).pos_in_blc;
        let set = self.blc_set(blc);
        debug_assert_eq!(
            set.members.get(pos as usize).copied(),
            Some(t),
            "stale pos_in_blc back-pointer"
        );
        if pos >= set.marked {
            let marked = set.marked;
            self.swap_blc_members(blc, pos, marked);
            self.blc_set_mut(blc).marked += 1;
        }
    }

    /// Find-or-create the BLC set for `(source, label, target_const)`,
    /// inserting it into `source`'s block list in the required position:
    /// constellation-inert-first, otherwise appended.
    pub fn find_or_create_blc(
        &mut self,
        source: BlockIdx,
        label: EffectiveLabel,
        target_const: ConstellationIdx,
    ) -> BlcIdx {
        let key = (source, label, target_const);
        if let Some(&idx) = self.blc_index.get(&key) {
            return idx;
        }
        let is_inert = label.is_tau() && self.block(source).constellation == target_const;
        let idx = BlcIdx(self.blc.len() as u32);
        self.blc.push(BlcSet {
            source_block: source,
            label,
            target_constellation: target_const,
            members: Vec::new(),
            stable: true,
            marked: 0,
        });
        self.blc_index.insert(key, idx);
        let list = &mut self.block_mut(source).blc_sets;
        if is_inert {
            list.insert(0, idx);
        } else {
            list.push(idx);
        }
        idx
    }

    /// Remove an empty BLC set from its source block's list and from the
    /// lookup index. The arena slot itself is left in place (bump-style;
    /// see design notes §9) but is unreachable from any block afterwards.
    pub fn delete_blc_if_empty(&mut self, idx: BlcIdx) {
        if !self.blc_set(idx).is_empty() {
            return;
        }
        let set = self.blc_set(idx).clone_key();
        self.blc_index.remove(&set);
        let source = self.blc_set(idx).source_block;
        self.block_mut(source).blc_sets.retain(|&b| b != idx);
    }

    /// True iff `t` is block-inert: τ (not divergent-τ), source and target
    /// in the same block.
    pub fn is_block_inert(&self, t: &Transition) -> bool {
        t.label.is_tau() && self.state(t.from).block == self.state(t.to).block
    }

    /// True iff `t` is constellation-inert: τ (not divergent-τ), source
    /// and target in the same constellation.
    pub fn is_constellation_inert(&self, t: &Transition) -> bool {
        if !t.label.is_tau() {
            return false;
        }
        let from_block = self.state(t.from).block;
        let to_block = self.state(t.to).block;
        self.block(from_block).constellation == self.block(to_block).constellation
    }

    /// Allocate a new block covering `range` of `states_in_blocks`,
    /// linking every state in the range to it and resetting their
    /// transient counters. The caller is responsible for having already
    /// physically moved the right states into `range`.
    pub fn create_block(
        &mut self,
        range: Range<u32>,
        bottom_end: u32,
        constellation: ConstellationIdx,
    ) -> BlockIdx {
        let idx = BlockIdx(self.blocks.len() as u32);
        for pos in range.clone() {
            let s = self.states_in_blocks[pos as usize];
            let st = self.state_mut(s);
            st.block = idx;
            st.counter = SplitCounter::Undefined;
        }
        self.blocks.push(Block {
            range,
            bottom_end,
            constellation,
            blc_sets: Vec::new(),
            has_new_bottom_states: false,
        });
        idx
    }

    /// Allocate a new constellation covering `range`, owning `blocks`.
    pub fn create_constellation(&mut self, range: Range<u32>, blocks: Vec<BlockIdx>) -> ConstellationIdx {
        let idx = ConstellationIdx(self.constellations.len() as u32);
        for &b in &blocks {
            self.block_mut(b).constellation = idx;
        }
        self.constellations.push(Constellation { range, blocks });
        idx
    }
}

impl BlcSet {
    fn clone_key(&self) -> (BlockIdx, EffectiveLabel, ConstellationIdx) {
        (self.source_block, self.label, self.target_constellation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lts::LabelIdx;

    fn empty_store() -> PartitionStore {
        PartitionStore::default()
    }

    #[test]
    fn swap_states_updates_back_pointers() {
        let mut p = empty_store();
        p.states_in_blocks = vec![StateIdx(0), StateIdx(1), StateIdx(2)];
        p.states = (0..3)
            .map(|i| State {
                block: BlockIdx(0),
                pos: i,
                inert_out_count: 0,
                counter: SplitCounter::Undefined,
            })
            .collect();
        p.swap_states(0, 2);
        assert_eq!(p.states_in_blocks, vec![StateIdx(2), StateIdx(1), StateIdx(0)]);
        assert_eq!(p.state(StateIdx(2)).pos, 0);
        assert_eq!(p.state(StateIdx(0)).pos, 2);
    }

    #[test]
    fn find_or_create_blc_is_idempotent_and_orders_inert_first() {
        let mut p = empty_store();
        p.blocks.push(Block {
            range: 0..1,
            bottom_end: 1,
            constellation: ConstellationIdx(0),
            blc_sets: Vec::new(),
            has_new_bottom_states: false,
        });
        p.constellations.push(Constellation {
            range: 0..1,
            blocks: vec![BlockIdx(0)],
        });
        let visible = p.find_or_create_blc(BlockIdx(0), EffectiveLabel::Visible(LabelIdx(0)), ConstellationIdx(0));
        let again = p.find_or_create_blc(BlockIdx(0), EffectiveLabel::Visible(LabelIdx(0)), ConstellationIdx(0));
        assert_eq!(visible, again);
        let inert = p.find_or_create_blc(BlockIdx(0), EffectiveLabel::Tau, ConstellationIdx(0));
        assert_eq!(p.block(BlockIdx(0)).blc_sets[0], inert);
    }
}
