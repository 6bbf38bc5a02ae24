//! Confirms the `INIT_WITHOUT_BLC_SETS = false` resolution (spec.md §9,
//! DESIGN.md): BLC sets must already be fully populated immediately after
//! `init::build`, before `first_refinement` ever runs, since
//! `split_block_membership` assumes every transition's `blc_set` already
//! points at a valid entry. Gated on `debug-invariants` since it pokes at
//! crate-internal modules not meant for routine downstream use.

#![cfg(feature = "debug-invariants")]

use bisim_refine::init;
use bisim_refine::partition::BlcIdx;
use bisim_refine::{BisimOptions, LabelIdx, Lts, RawTransition, StateIdx};

#[test]
fn every_transition_has_a_valid_blc_set_right_after_build() {
    let transitions = vec![
        RawTransition { from: StateIdx(0), label: LabelIdx(1), to: StateIdx(1) },
        RawTransition { from: StateIdx(1), label: LabelIdx(0), to: StateIdx(2) },
        RawTransition { from: StateIdx(0), label: LabelIdx(0), to: StateIdx(2) },
    ];
    let lts = Lts::new(3, 2, LabelIdx(1), StateIdx(0), transitions, vec![]).unwrap();
    let store = init::build(&lts, BisimOptions::default()).unwrap();

    for t in &store.trans {
        let blc = t.blc_set;
        assert!(blc.as_usize() < store.blc.len(), "dangling BLC reference {blc:?}");
    }

    // Every BLC set a transition points to must actually list that
    // transition back: `find_or_create_blc` plus the eager population
    // loop in `init::build` must be mutually consistent.
    for (i, t) in store.trans.iter().enumerate() {
        let idx = t.blc_set;
        let set = &store.blc[idx.as_usize()];
        assert!(set.members.contains(&bisim_refine::partition::TransIdx(i as u32)));
    }

    let _: BlcIdx = store.trans[0].blc_set;
}
