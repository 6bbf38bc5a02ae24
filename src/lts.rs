//! Labelled transition system view (C1)
//!
//! An immutable, validated view over the input LTS: state/label counts,
//! the transition list, the τ-label id, and the `is_tau` predicate. When
//! divergence preservation is requested a τ-self-loop is treated as if it
//! carried a synthetic "divergent-τ" label that is not τ; `effective_label`
//! computes this on demand rather than rewriting the transition list.

#![forbid(unsafe_code)]

use std::fmt;

/// Dense state index `0..n`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateIdx(pub u32);

impl StateIdx {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Dense label index `0..num_labels`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelIdx(pub u32);

impl LabelIdx {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A single `(from, label, to)` transition as given in the input LTS.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RawTransition {
    pub from: StateIdx,
    pub label: LabelIdx,
    pub to: StateIdx,
}

/// Errors surfaced while validating an input LTS.
#[derive(Debug, thiserror::Error)]
pub enum LtsError {
    #[error("transition references state {0} but the LTS only has {1} states")]
    StateOutOfRange(u32, u32),
    #[error("transition references label {0} but the LTS only has {1} labels")]
    LabelOutOfRange(u32, u32),
    #[error("tau label {0} is not a valid label index (num_labels={1})")]
    BadTauLabel(u32, u32),
    #[error("initial state {0} is not a valid state index (num_states={1})")]
    BadInitialState(u32, u32),
}

/// An immutable, validated labelled transition system.
///
/// Constructed once from caller-supplied state/label counts and a
/// transition list; never mutated by the refinement engine (the engine
/// mutates only the partition store built on top of it, and the final
/// quotient is assembled into a separate `QuotientLts`).
#[derive(Debug, Clone)]
pub struct Lts {
    num_states: u32,
    num_labels: u32,
    tau: LabelIdx,
    initial_state: StateIdx,
    transitions: Vec<RawTransition>,
    /// Optional per-state payload, concatenated across an equivalence
    /// class into the quotient's state labels (spec.md §6).
    state_labels: Vec<String>,
}

impl Lts {
    /// Validate and build an LTS view.
    ///
    /// `state_labels`, if non-empty, must have exactly `num_states`
    /// entries; an empty vec means "no payload" and the quotient's state
    /// labels stay empty too.
    pub fn new(
        num_states: u32,
        num_labels: u32,
        tau: LabelIdx,
        initial_state: StateIdx,
        transitions: Vec<RawTransition>,
        state_labels: Vec<String>,
    ) -> Result<Self, LtsError> {
        if tau.as_usize() as u32 >= num_labels {
            return Err(LtsError::BadTauLabel(tau.0, num_labels));
        }
        if initial_state.as_usize() as u32 >= num_states {
            return Err(LtsError::BadInitialState(initial_state.0, num_states));
        }
        for t in &transitions {
            if t.from.0 >= num_states {
                return Err(LtsError::StateOutOfRange(t.from.0, num_states));
            }
            if t.to.0 >= num_states {
                return Err(LtsError::StateOutOfRange(t.to.0, num_states));
            }
            if t.label.0 >= num_labels {
                return Err(LtsError::LabelOutOfRange(t.label.0, num_labels));
            }
        }
        debug_assert!(
            state_labels.is_empty() || state_labels.len() as u32 == num_states,
            "state_labels must be empty or cover every state"
        );
        Ok(Self {
            num_states,
            num_labels,
            tau,
            initial_state,
            transitions,
            state_labels,
        })
    }

    #[inline]
    pub fn num_states(&self) -> u32 {
        self.num_states
    }

    #[inline]
    pub fn num_labels(&self) -> u32 {
        self.num_labels
    }

    #[inline]
    pub fn tau(&self) -> LabelIdx {
        self.tau
    }

    #[inline]
    pub fn initial_state(&self) -> StateIdx {
        self.initial_state
    }

    #[inline]
    pub fn transitions(&self) -> &[RawTransition] {
        &self.transitions
    }

    #[inline]
    pub fn state_label(&self, s: StateIdx) -> &str {
        self.state_labels
            .get(s.as_usize())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// True iff `label` is the τ-label.
    #[inline]
    pub fn is_tau(&self, label: LabelIdx) -> bool {
        label == self.tau
    }

    /// True iff `t` is a τ-self-loop (`from == to`, label == τ).
    #[inline]
    pub fn is_tau_self_loop(&self, t: &RawTransition) -> bool {
        self.is_tau(t.label) && t.from == t.to
    }

    /// The label the partition-refinement engine should actually key on.
    ///
    /// Under divergence preservation a τ-self-loop is treated as a
    /// synthetic label distinct from τ and from every other label, so it
    /// can never be block-inert: this is what prevents a diverging state
    /// from being silently merged with a non-diverging one (spec.md
    /// §8 property 4). The synthetic label is represented as
    /// `num_labels` (one past every real label id), which is never a
    /// valid `LabelIdx` an input transition can carry (see `new`'s
    /// validation), so it cannot collide.
    #[inline]
    pub fn effective_label(&self, t: &RawTransition, preserve_divergence: bool) -> EffectiveLabel {
        if preserve_divergence && self.is_tau_self_loop(t) {
            EffectiveLabel::DivergentTau
        } else if self.is_tau(t.label) {
            EffectiveLabel::Tau
        } else {
            EffectiveLabel::Visible(t.label)
        }
    }
}

/// The label an outgoing transition is grouped under for saC-slicing and
/// BLC purposes, distinguishing real τ from the synthetic divergent-τ.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EffectiveLabel {
    Tau,
    DivergentTau,
    Visible(LabelIdx),
}

impl EffectiveLabel {
    #[inline]
    pub fn is_tau(self) -> bool {
        matches!(self, EffectiveLabel::Tau)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(from: u32, label: u32, to: u32) -> RawTransition {
        RawTransition {
            from: StateIdx(from),
            label: LabelIdx(label),
            to: StateIdx(to),
        }
    }

    #[test]
    fn rejects_out_of_range_state() {
        let err = Lts::new(2, 1, LabelIdx(0), StateIdx(0), vec![raw(0, 0, 5)], vec![])
            .unwrap_err();
        assert!(matches!(err, LtsError::StateOutOfRange(5, 2)));
    }

    #[test]
    fn rejects_out_of_range_label() {
        let err = Lts::new(2, 1, LabelIdx(0), StateIdx(0), vec![raw(0, 3, 1)], vec![])
            .unwrap_err();
        assert!(matches!(err, LtsError::LabelOutOfRange(3, 1)));
    }

    #[test]
    fn rejects_bad_tau() {
        let err = Lts::new(2, 1, LabelIdx(9), StateIdx(0), vec![], vec![]).unwrap_err();
        assert!(matches!(err, LtsError::BadTauLabel(9, 1)));
    }

    #[test]
    fn effective_label_distinguishes_divergent_tau() {
        let lts = Lts::new(1, 1, LabelIdx(0), StateIdx(0), vec![raw(0, 0, 0)], vec![]).unwrap();
        let t = lts.transitions()[0];
        assert_eq!(lts.effective_label(&t, false), EffectiveLabel::Tau);
        assert_eq!(
            lts.effective_label(&t, true),
            EffectiveLabel::DivergentTau
        );
    }
}
