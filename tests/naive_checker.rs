//! Property test comparing the engine against a direct, unoptimized
//! fixpoint computation of branching bisimulation — the same style of
//! check as comparing a fast algorithm's reduced LTS against a reference
//! algorithm's reduced LTS by state/transition count (`compare_lts` /
//! `reduce_lts` in the weak-bisimulation reference material this crate is
//! grounded on). The naive side recomputes the largest branching
//! bisimulation as a relational fixpoint directly from spec.md §2's
//! definition, with no BLC/constellation machinery at all, so an
//! agreement between the two is strong evidence the optimized engine's
//! splitting is correct.

use std::collections::{HashSet, VecDeque};

use proptest::prelude::*;

use bisim_refine::{reduce, BisimOptions, LabelIdx, Lts, RawTransition, StateIdx};

const TAU: u32 = 0;

/// Largest branching bisimulation over `n` states as an `n x n` boolean
/// relation, computed by iterating the standard game-theoretic fixpoint:
/// start from the universal relation and repeatedly discard pairs that a
/// single transition can witness as distinguishable, until nothing
/// changes. `O(rounds * n^2 * m)`; fine for the small random instances
/// this test generates, not meant for production use.
fn naive_branching_classes(n: usize, trans: &[(u32, u32, u32)]) -> usize {
    let mut rel = vec![vec![true; n]; n];
    loop {
        let mut next = rel.clone();
        for s in 0..n {
            for t in 0..n {
                if !rel[s][t] {
                    continue;
                }
                next[s][t] = matches_one_way(s, t, &rel, trans) && matches_one_way(t, s, &rel, trans);
            }
        }
        if next == rel {
            break;
        }
        rel = next;
    }

    // `rel` at the fixpoint is reflexive and symmetric by construction; it
    // need not be transitive in general, but for the largest branching
    // bisimulation it is (it's the union of all bisimulation relations).
    // Count its connected components.
    let mut seen = vec![false; n];
    let mut classes = 0;
    for s in 0..n {
        if seen[s] {
            continue;
        }
        classes += 1;
        for t in 0..n {
            if rel[s][t] {
                seen[t] = true;
            }
        }
    }
    classes
}

/// Can every transition out of `s` be matched by `t`, using `rel` as the
/// current approximation of branching bisimilarity?
fn matches_one_way(s: usize, t: usize, rel: &[Vec<bool>], trans: &[(u32, u32, u32)]) -> bool {
    for &(from, label, to) in trans.iter().filter(|&&(f, _, _)| f as usize == s) {
        let to = to as usize;
        if label == TAU && rel[to][t] {
            // s can take this step "invisibly": t stays put and is still
            // related to s's post-state.
            continue;
        }
        if !exists_matching_step(t, s, label, to, rel, trans) {
            return false;
        }
    }
    true
}

/// Does `t` have a tau-path (through states still related to `s`) to some
/// `t0` with a `label`-transition to a `t1` related to `to`?
fn exists_matching_step(
    t: usize,
    s: usize,
    label: u32,
    to: usize,
    rel: &[Vec<bool>],
    trans: &[(u32, u32, u32)],
) -> bool {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(t);
    queue.push_back(t);
    while let Some(t0) = queue.pop_front() {
        if !rel[s][t0] {
            continue;
        }
        for &(f, l, t1) in trans.iter().filter(|&&(f, _, _)| f as usize == t0) {
            let t1 = t1 as usize;
            if l == label && rel[to][t1] {
                return true;
            }
            if l == TAU && visited.insert(t1) {
                queue.push_back(t1);
            }
        }
        let _ = t0;
    }
    false
}

fn arb_lts() -> impl Strategy<Value = (u32, Vec<(u32, u32, u32)>)> {
    (2u32..=6).prop_flat_map(|n| {
        let trans = proptest::collection::vec((0..n, 0u32..3, 0..n), 0..(n as usize * 3));
        (Just(n), trans)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn engine_class_count_matches_naive_fixpoint((n, raw_trans) in arb_lts()) {
        let transitions: Vec<RawTransition> = raw_trans
            .iter()
            .map(|&(f, l, t)| RawTransition { from: StateIdx(f), label: LabelIdx(l), to: StateIdx(t) })
            .collect();
        let lts = Lts::new(n, 3, LabelIdx(TAU), StateIdx(0), transitions, vec![]).unwrap();
        let q = reduce(&lts, BisimOptions::default()).unwrap();
        let naive_classes = naive_branching_classes(n as usize, &raw_trans);
        prop_assert_eq!(q.num_states as usize, naive_classes);
    }
}
