//! Crate root: public surface and top-level orchestration
//!
//! This module is the single entry-point for downstream users. It
//! re-exports the LTS view, the public options struct, the unified error
//! type, and the `reduce` function that drives build → first refinement →
//! the main stabilization loop → quotient emission (C6, spec.md §4.6).
//!
//! ## Invariants
//!
//! - **Totality.** `reduce` is total on well-formed input: the only
//!   recoverable failures are input malformation (`BisimError::InvalidLts`)
//!   and state fan-out exceeding the counter-encoding bound
//!   (`BisimError::StateFanoutTooLarge`). Everything else is an internal
//!   consistency invariant, checked by `invariants::check_all` under the
//!   `debug-invariants` feature, never a recoverable error (spec.md §7).
//! - **Determinism.** The output partition depends only on the input LTS
//!   and `BisimOptions`, never on iteration or allocation order (spec.md
//!   §5).

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod blc;
pub mod init;
pub mod invariants;
pub mod lts;
pub mod partition;
pub mod splitter;
pub mod stabilize;

pub use crate::init::QuotientLts;
pub use crate::lts::{EffectiveLabel, LabelIdx, Lts, LtsError, RawTransition, StateIdx};

/// Configuration for a `reduce` run (spec.md §6). `preserve_divergence`
/// requires `branching`; `BisimOptions::new` rejects the invalid
/// combination, while `Default` and a direct struct literal both produce a
/// valid one as long as the caller respects that constraint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BisimOptions {
    pub branching: bool,
    pub preserve_divergence: bool,
}

impl Default for BisimOptions {
    fn default() -> Self {
        Self { branching: true, preserve_divergence: false }
    }
}

impl BisimOptions {
    /// Validating constructor; prefer this over a struct literal when the
    /// flags come from an external source (CLI args, config file) rather
    /// than a compile-time constant.
    pub fn new(branching: bool, preserve_divergence: bool) -> Result<Self, BisimError> {
        if preserve_divergence && !branching {
            return Err(BisimError::DivergenceWithoutBranching);
        }
        Ok(Self { branching, preserve_divergence })
    }
}

/// Errors surfaced by the engine's external interface (spec.md §7).
///
/// Every other failure mode is an internal consistency invariant, checked
/// by `invariants::check_all` under the `debug-invariants` feature rather
/// than surfaced as a variant here.
#[derive(Debug, thiserror::Error)]
pub enum BisimError {
    #[error(transparent)]
    InvalidLts(#[from] lts::LtsError),

    #[error("state {state} has {count} block-inert outgoing transitions, exceeding the limit of {limit}")]
    StateFanoutTooLarge { state: u32, count: u32, limit: u32 },

    #[error("preserve_divergence requires branching to also be set")]
    DivergenceWithoutBranching,
}

/// Run the partition-refinement engine to completion and return the
/// quotient LTS (spec.md §4.6, §6).
pub fn reduce(lts: &Lts, options: BisimOptions) -> Result<QuotientLts, BisimError> {
    if options.preserve_divergence && !options.branching {
        return Err(BisimError::DivergenceWithoutBranching);
    }

    let mut store = init::build(lts, options)?;
    init::first_refinement(&mut store, lts, options);
    init::mark_all_stable(&mut store);

    #[cfg(feature = "debug-invariants")]
    invariants::check_all(&store).expect("invariant violated after first refinement");

    let mut stabilizer = stabilize::Stabilizer::new(&store);
    stabilizer.run(&mut store);

    #[cfg(feature = "debug-invariants")]
    invariants::check_all(&store).expect("invariant violated after the main loop");

    Ok(init::emit_quotient(&store, lts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lts::RawTransition;

    fn lts_from(
        n: u32,
        num_labels: u32,
        tau: u32,
        initial: u32,
        trans: &[(u32, u32, u32)],
    ) -> Lts {
        let transitions = trans
            .iter()
            .map(|&(f, l, t)| RawTransition {
                from: StateIdx(f),
                label: LabelIdx(l),
                to: StateIdx(t),
            })
            .collect();
        Lts::new(n, num_labels, LabelIdx(tau), StateIdx(initial), transitions, vec![]).unwrap()
    }

    #[test]
    fn divergence_without_branching_is_rejected() {
        let err = BisimOptions::new(false, true).unwrap_err();
        assert!(matches!(err, BisimError::DivergenceWithoutBranching));
    }

    #[test]
    fn s1_strong_equivalent_targets_merge() {
        // Two a-transitions from s0 to otherwise-indistinguishable
        // targets, branching=false (strong bisimulation): the targets
        // merge since neither has any outgoing transition. `branching:
        // false` means the designated tau label is never consulted, so any
        // valid in-range label id is a fine placeholder here.
        let lts = lts_from(3, 1, 0, 0, &[(0, 0, 1), (0, 0, 2)]);
        let opts = BisimOptions { branching: false, preserve_divergence: false };
        let q = reduce(&lts, opts).unwrap();
        assert_eq!(q.num_states, 2);
    }

    #[test]
    fn s2_tau_step_to_equivalent_state_merges() {
        let lts = lts_from(2, 1, 0, 0, &[(0, 0, 1)]);
        let q = reduce(&lts, BisimOptions::default()).unwrap();
        assert_eq!(q.num_states, 1);
    }

    #[test]
    fn s3_divergence_preservation_separates_looping_state() {
        let lts = lts_from(2, 1, 0, 0, &[(0, 0, 0)]);
        let opts = BisimOptions { branching: true, preserve_divergence: true };
        let q = reduce(&lts, opts).unwrap();
        assert_eq!(q.num_states, 2);
    }

    #[test]
    fn s4_tau_prefixed_branch_collapses_to_one_class_per_continuation() {
        let lts = lts_from(4, 2, 1, 0, &[(0, 1, 1), (1, 0, 2), (0, 0, 3)]);
        let q = reduce(&lts, BisimOptions::default()).unwrap();
        assert_eq!(q.num_states, 2);
    }

    #[test]
    fn s5_label_signature_difference_keeps_states_apart() {
        let lts = lts_from(3, 2, 1, 0, &[(0, 0, 1), (0, 1, 2), (1, 0, 0), (2, 1, 0)]);
        let opts = BisimOptions { branching: false, preserve_divergence: false };
        let q = reduce(&lts, opts).unwrap();
        assert_eq!(q.num_states, 3);
    }

    #[test]
    fn s6_tau_chain_collapses_regardless_of_length() {
        for n in [2u32, 5, 20] {
            // Chain 0 -tau-> 1 -tau-> ... -> (n-1) -a-> n, plus a direct
            // shortcut (n+1) -a-> n. Expected: 2 classes regardless of n.
            let mut trans = Vec::new();
            for i in 0..n - 1 {
                trans.push((i, 1u32, i + 1));
            }
            trans.push((n - 1, 0u32, n));
            trans.push((n + 1, 0u32, n));
            let lts = lts_from(n + 2, 2, 1, 0, &trans);
            let q = reduce(&lts, BisimOptions::default()).unwrap();
            assert_eq!(q.num_states, 2, "n={n}");
        }
    }

    #[test]
    fn output_never_exceeds_input_state_count() {
        let lts = lts_from(4, 2, 1, 0, &[(0, 1, 1), (1, 0, 2), (0, 0, 3)]);
        let q = reduce(&lts, BisimOptions::default()).unwrap();
        assert!(q.num_states <= 4);
    }

    #[test]
    fn invalid_lts_is_propagated() {
        let bad = Lts::new(
            1,
            1,
            LabelIdx(0),
            StateIdx(0),
            vec![RawTransition { from: StateIdx(5), label: LabelIdx(0), to: StateIdx(0) }],
            vec![],
        );
        assert!(bad.is_err());
    }
}
