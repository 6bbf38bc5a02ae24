//! Initialiser / finaliser (C6)
//!
//! `build` turns a validated `Lts` into a `PartitionStore` holding one
//! block and one constellation, with BLC sets for every `(label,
//! constellation)` pair populated up front — the source's
//! `INIT_WITHOUT_BLC_SETS` toggle (spec.md §9) is resolved here in favour
//! of building them eagerly; see DESIGN.md. `first_refinement` then drives
//! the special one-constellation initial split, and `emit_quotient`
//! assembles the output LTS once the stabilizer has run to completion.

#![forbid(unsafe_code)]

use std::collections::VecDeque;

use tracing::debug;

use crate::blc::can_be_constellation_inert_head;
use crate::lts::{EffectiveLabel, Lts, StateIdx};
use crate::partition::{
    Block, BlockIdx, Constellation, PartitionStore, SplitCounter, State, Transition,
};
use crate::splitter::{split_block, Splitters};
use crate::BisimOptions;

/// Build the initial partition store: one block, one constellation, BLC
/// sets populated for every label present.
pub fn build(lts: &Lts, options: BisimOptions) -> Result<PartitionStore, crate::BisimError> {
    let n = lts.num_states() as usize;
    let mut store = PartitionStore::default();

    store.states = (0..n)
        .map(|i| State {
            block: BlockIdx(0),
            pos: i as u32,
            inert_out_count: 0,
            counter: SplitCounter::Undefined,
        })
        .collect();
    store.states_in_blocks = (0..n as u32).map(StateIdx).collect();

    let effective = |raw: &crate::lts::RawTransition| -> EffectiveLabel {
        if options.branching {
            lts.effective_label(raw, options.preserve_divergence)
        } else {
            EffectiveLabel::Visible(raw.label)
        }
    };

    // Count block-inert (here: tau, self-block trivially true, only one
    // block exists) out-transitions per state, and reject states whose
    // fan-out exceeds the counter-encoding bound (spec.md §4.2, §7).
    let mut out_buckets: Vec<Vec<Transition>> = vec![Vec::new(); n];
    for raw in lts.transitions() {
        let label = effective(raw);
        out_buckets[raw.from.as_usize()].push(Transition {
            from: raw.from,
            label,
            to: raw.to,
            blc_set: crate::partition::BlcIdx(0),
            pos_in_blc: 0,
        });
    }
    for (i, bucket) in out_buckets.iter().enumerate() {
        let inert = bucket.iter().filter(|t| t.label.is_tau()).count() as u32;
        if inert > crate::partition::MAX_BLOCK_INERT_OUT_TRANSITIONS {
            return Err(crate::BisimError::StateFanoutTooLarge {
                state: i as u32,
                count: inert,
                limit: crate::partition::MAX_BLOCK_INERT_OUT_TRANSITIONS,
            });
        }
        store.states[i].inert_out_count = inert;
    }

    // Flatten into the outgoing CSR, assigning each transition its arena
    // index, then build the matching incoming CSR.
    store.out_csr = vec![0u32; n + 1];
    store.trans.reserve(lts.transitions().len());
    for (i, bucket) in out_buckets.into_iter().enumerate() {
        store.out_csr[i] = store.trans.len() as u32;
        for t in bucket {
            let idx = crate::partition::TransIdx(store.trans.len() as u32);
            store.outgoing.push(idx);
            store.trans.push(t);
        }
    }
    store.out_csr[n] = store.trans.len() as u32;

    let mut in_buckets: Vec<Vec<crate::partition::TransIdx>> = vec![Vec::new(); n];
    for (i, t) in store.trans.iter().enumerate() {
        in_buckets[t.to.as_usize()].push(crate::partition::TransIdx(i as u32));
    }
    store.in_csr = vec![0u32; n + 1];
    for (i, bucket) in in_buckets.into_iter().enumerate() {
        store.in_csr[i] = store.incoming.len() as u32;
        store.incoming.extend(bucket);
    }
    store.in_csr[n] = store.incoming.len() as u32;

    // Bottom-before-non-bottom ordering within the (only) block.
    store
        .states_in_blocks
        .sort_by_key(|s| if store.state(*s).is_bottom() { 0 } else { 1 });
    for (pos, s) in store.states_in_blocks.clone().into_iter().enumerate() {
        store.state_mut(s).pos = pos as u32;
    }
    let bottom_end = store
        .states_in_blocks
        .iter()
        .position(|s| !store.state(*s).is_bottom())
        .unwrap_or(n) as u32;

    let const0 = crate::partition::ConstellationIdx(0);
    store.constellations.push(Constellation {
        range: 0..n as u32,
        blocks: vec![BlockIdx(0)],
    });
    store.blocks.push(Block {
        range: 0..n as u32,
        bottom_end,
        constellation: const0,
        blc_sets: Vec::new(),
        has_new_bottom_states: false,
    });

    // BLC construction: one set per label, eagerly populated (the
    // `INIT_WITHOUT_BLC_SETS = false` choice, see DESIGN.md).
    let all_trans: Vec<crate::partition::TransIdx> =
        (0..store.trans.len() as u32).map(crate::partition::TransIdx).collect();
    for t in all_trans {
        let label = store.trans(t).label;
        let blc = store.find_or_create_blc(BlockIdx(0), label, const0);
        let pos = store.blc_set(blc).members.len() as u32;
        store.trans_mut(t).blc_set = blc;
        store.trans_mut(t).pos_in_blc = pos;
        store.blc_set_mut(blc).members.push(t);
    }
    debug!(states = n, transitions = store.trans.len(), "built initial partition");
    Ok(store)
}

/// First refinement (spec.md §4.6): stabilize the single initial
/// constellation against every non-tau effective label in turn, reusing
/// the four-way splitter's Tau-only mode (the special one-splitter
/// initialization path spec.md describes). Each label's pass only needs
/// to look at the blocks that existed when that label's turn began —
/// states block-inertly reaching an `a`-labelled transition are the same
/// `ReachAlw` computation the main loop performs later for visible
/// splitters, so no separate algorithm is required here.
pub fn first_refinement(store: &mut PartitionStore, lts: &Lts, options: BisimOptions) {
    let const0 = crate::partition::ConstellationIdx(0);
    let mut labels: Vec<EffectiveLabel> = (0..lts.num_labels())
        .map(crate::lts::LabelIdx)
        .map(EffectiveLabel::Visible)
        .collect();
    if options.preserve_divergence {
        labels.push(EffectiveLabel::DivergentTau);
    }

    for label in labels {
        if label.is_tau() {
            continue;
        }
        let snapshot: Vec<BlockIdx> = (0..store.blocks.len() as u32).map(BlockIdx).collect();
        for block in snapshot {
            if store.block(block).is_empty() || store.block(block).len() < 2 {
                continue;
            }
            if store.block(block).constellation != const0 {
                // Shouldn't happen before any constellation carve-off,
                // kept as a defensive bound for reentrancy.
                continue;
            }
            let blc = store.find_or_create_blc(block, label, const0);
            if store.blc_set(blc).is_empty() {
                continue;
            }
            let _ = split_block(store, block, Splitters::tau_only(blc));
        }
    }
}

/// Mark every BLC set stable after the first refinement has run; this is
/// the baseline the main loop's constellation carve-offs perturb.
pub fn mark_all_stable(store: &mut PartitionStore) {
    for set in &mut store.blc {
        set.stable = true;
        set.marked = set.members.len() as u32;
    }
}

/// The output of a completed run: one state per equivalence class.
#[derive(Debug, Clone)]
pub struct QuotientLts {
    pub num_states: u32,
    pub num_labels: u32,
    pub tau: crate::lts::LabelIdx,
    pub initial_state: StateIdx,
    pub transitions: Vec<crate::lts::RawTransition>,
    pub state_labels: Vec<String>,
}

/// Assign each block a fresh quotient state id and emit one transition
/// per BLC set (skipping the constellation-inert tau self-loop), state
/// labels concatenated across each class, initial state relocated.
pub fn emit_quotient(store: &PartitionStore, lts: &Lts) -> QuotientLts {
    let mut block_to_quotient: Vec<Option<u32>> = vec![None; store.blocks.len()];
    let mut next_id = 0u32;
    let mut order: Vec<BlockIdx> = Vec::new();
    for pos in 0..store.states_in_blocks.len() {
        let s = store.states_in_blocks[pos];
        let b = store.state(s).block;
        if block_to_quotient[b.as_usize()].is_none() {
            block_to_quotient[b.as_usize()] = Some(next_id);
            order.push(b);
            next_id += 1;
        }
    }

    let mut state_labels = vec![String::new(); order.len()];
    for (qid, &b) in order.iter().enumerate() {
        let mut label = String::new();
        for pos in store.block(b).range.clone() {
            let s = store.states_in_blocks[pos as usize];
            label.push_str(lts.state_label(s));
        }
        state_labels[qid] = label;
    }

    let mut transitions = Vec::new();
    let mut seen: VecDeque<(u32, EffectiveLabel, u32)> = VecDeque::new();
    for &b in &order {
        let qid_from = block_to_quotient[b.as_usize()].unwrap();
        for &blc in &store.block(b).blc_sets {
            let set = store.blc_set(blc);
            if set.is_empty() {
                continue;
            }
            if can_be_constellation_inert_head(store, blc) {
                // τ staying inside the same quotient state: not observable.
                continue;
            }
            let any_member = set.members[0];
            let to_block = store.state(store.trans(any_member).to).block;
            let qid_to = block_to_quotient[to_block.as_usize()].unwrap();
            let key = (qid_from, set.label, qid_to);
            if seen.contains(&key) {
                continue;
            }
            seen.push_back(key);
            let label = match set.label {
                EffectiveLabel::Tau => lts.tau(),
                EffectiveLabel::DivergentTau => lts.tau(),
                EffectiveLabel::Visible(l) => l,
            };
            transitions.push(crate::lts::RawTransition {
                from: StateIdx(qid_from),
                label,
                to: StateIdx(qid_to),
            });
        }
    }

    let initial_block = store.state(lts.initial_state()).block;
    let initial_state = StateIdx(block_to_quotient[initial_block.as_usize()].unwrap());

    QuotientLts {
        num_states: order.len() as u32,
        num_labels: lts.num_labels(),
        tau: lts.tau(),
        initial_state,
        transitions,
        state_labels,
    }
}
