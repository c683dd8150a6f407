//! Distal segment and synapse model.
//!
//! A segment is a cluster of synapses on a cell that recognizes one pattern
//! of prior cell activity. Each synapse points back at a source cell
//! (column, cell-in-column) and carries a permanence value; only synapses at
//! or above the connected threshold count toward activation. Segments also
//! keep the activation bookkeeping (positive/total activations, a tiered
//! exponential duty-cycle estimate) that the temporal memory uses for
//! confidence scores and least-recently-useful eviction.

use crate::types::{Permanence, Real, UInt};
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Iteration checkpoints at which the duty-cycle smoothing rate changes.
///
/// Below the first checkpoint the duty cycle is an exact average; beyond it,
/// an exponential moving average whose alpha is taken from
/// [`DUTY_CYCLE_ALPHAS`] at the highest tier not exceeding the current
/// iteration. Every cached duty cycle must be refreshed when the global
/// iteration crosses one of these checkpoints, otherwise segments decayed
/// under different alphas stop being comparable.
pub const DUTY_CYCLE_TIERS: [u32; 9] = [
    0, 100, 320, 1_000, 3_200, 10_000, 32_000, 100_000, 320_000,
];

/// Smoothing rates corresponding to [`DUTY_CYCLE_TIERS`].
///
/// The first entry is unused (tier 0 uses the exact average).
pub const DUTY_CYCLE_ALPHAS: [Real; 9] = [
    0.0, 0.0032, 0.0010, 0.00032, 0.0001, 0.000_032, 0.00001, 0.000_003_2, 0.000_001,
];

/// A synapse from a distal segment back to a source cell.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DistalSynapse {
    /// Column of the source cell.
    pub src_column: UInt,
    /// Index of the source cell within its column.
    pub src_cell: UInt,
    /// Connection strength, in `[0, permanence_max]`.
    pub permanence: Permanence,
}

/// A distal dendrite segment: an ordered collection of synapses plus
/// activation bookkeeping. Owned by exactly one cell.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Segment {
    /// Unique, monotonically increasing segment id.
    pub id: u32,

    /// True for segments that predict the very next time step.
    pub is_sequence_segment: bool,

    /// The synapses on this segment.
    pub synapses: SmallVec<[DistalSynapse; 16]>,

    /// Learning iteration at which this segment was last active.
    pub last_active_iteration: u32,

    /// Number of iterations at which this segment was correctly active.
    pub positive_activations: u32,

    /// Number of iterations at which this segment was scored.
    pub total_activations: u32,

    /// Cached duty-cycle value.
    last_duty_cycle: Real,

    /// Learning iteration at which the cached duty cycle was computed.
    last_duty_cycle_iteration: u32,
}

impl Segment {
    /// Creates a new segment, counted as active at the creating iteration.
    pub fn new(id: u32, is_sequence_segment: bool, iteration: u32) -> Self {
        Self {
            id,
            is_sequence_segment,
            synapses: SmallVec::new(),
            last_active_iteration: iteration,
            positive_activations: 1,
            total_activations: 1,
            last_duty_cycle: 0.0,
            last_duty_cycle_iteration: iteration,
        }
    }

    /// Returns the number of synapses on this segment.
    pub fn num_synapses(&self) -> usize {
        self.synapses.len()
    }

    /// Appends a synapse. No duplicate check is performed; the caller filters
    /// candidate source cells before calling this.
    pub fn add_synapse(&mut self, src_column: UInt, src_cell: UInt, permanence: Permanence) {
        self.synapses.push(DistalSynapse {
            src_column,
            src_cell,
            permanence,
        });
    }

    /// Adds `delta` to each listed synapse's permanence, clipped to
    /// `[0, permanence_max]`.
    ///
    /// Returns true if any synapse was driven to exactly 0, which signals the
    /// caller that the segment has trimming candidates.
    ///
    /// Out-of-range indices are programming errors and panic.
    pub fn update_synapses(
        &mut self,
        indices: &[usize],
        delta: Permanence,
        permanence_max: Permanence,
    ) -> bool {
        let mut any_zeroed = false;
        for &i in indices {
            let syn = &mut self.synapses[i];
            syn.permanence = (syn.permanence + delta).clamp(0.0, permanence_max);
            if syn.permanence == 0.0 {
                any_zeroed = true;
            }
        }
        any_zeroed
    }

    /// Applies `delta` to every synapse, clipped to `[0, permanence_max]`,
    /// then removes synapses at 0. Returns the number of synapses removed.
    pub fn decay_synapses(&mut self, delta: Permanence, permanence_max: Permanence) -> usize {
        for syn in &mut self.synapses {
            syn.permanence = (syn.permanence + delta).clamp(0.0, permanence_max);
        }
        let before = self.synapses.len();
        self.synapses.retain(|syn| syn.permanence > 0.0);
        before - self.synapses.len()
    }

    /// Evicts `n` synapses to make room for new ones in fixed-capacity mode.
    ///
    /// Prefers the lowest-permanence synapses among `inactive_indices`, then
    /// falls back to the lowest-permanence active ones.
    pub fn free_n_synapses(&mut self, n: usize, inactive_indices: &[usize]) {
        if n == 0 {
            return;
        }

        let mut inactive: Vec<usize> = inactive_indices.to_vec();
        inactive.sort_by(|&a, &b| {
            self.synapses[a]
                .permanence
                .partial_cmp(&self.synapses[b].permanence)
                .unwrap()
        });

        let mut active: Vec<usize> = (0..self.synapses.len())
            .filter(|i| !inactive_indices.contains(i))
            .collect();
        active.sort_by(|&a, &b| {
            self.synapses[a]
                .permanence
                .partial_cmp(&self.synapses[b].permanence)
                .unwrap()
        });

        let mut doomed: Vec<usize> = inactive
            .into_iter()
            .chain(active)
            .take(n.min(self.synapses.len()))
            .collect();

        // Remove back-to-front so earlier indices stay valid.
        doomed.sort_unstable();
        for i in doomed.into_iter().rev() {
            self.synapses.remove(i);
        }
    }

    /// Counts synapses whose source cell is reported active.
    ///
    /// With `connected_only`, only synapses at or above `connected_perm`
    /// count; otherwise raw (potential) activity is measured.
    pub fn activity_level<F>(
        &self,
        is_active: F,
        connected_perm: Permanence,
        connected_only: bool,
    ) -> usize
    where
        F: Fn(UInt, UInt) -> bool,
    {
        self.synapses
            .iter()
            .filter(|syn| !connected_only || syn.permanence >= connected_perm)
            .filter(|syn| is_active(syn.src_column, syn.src_cell))
            .count()
    }

    /// Returns whether enough connected synapses have active sources.
    pub fn is_active<F>(
        &self,
        is_active: F,
        connected_perm: Permanence,
        activation_threshold: UInt,
    ) -> bool
    where
        F: Fn(UInt, UInt) -> bool,
    {
        self.activity_level(is_active, connected_perm, true) >= activation_threshold as usize
    }

    /// Tiered exponential-moving-average activation frequency estimate.
    ///
    /// For iteration counts within the first tier the exact average
    /// `positive_activations / iteration` is returned. Beyond that the cached
    /// value decays as `(1 - alpha)^age`, gaining `alpha` when `active`,
    /// where `alpha` comes from the tier table for the current iteration.
    ///
    /// With `read_only` the cache is left untouched; otherwise the cached
    /// value and its timestamp are refreshed. [`refresh_duty_cycle`] must be
    /// applied to every segment whenever `iteration` crosses a tier
    /// checkpoint so that all caches decay under the same alpha.
    ///
    /// [`refresh_duty_cycle`]: Segment::refresh_duty_cycle
    pub fn duty_cycle(&mut self, iteration: u32, active: bool, read_only: bool) -> Real {
        debug_assert!(iteration > 0);

        if iteration <= DUTY_CYCLE_TIERS[1] {
            let duty_cycle = self.positive_activations as Real / iteration as Real;
            if !read_only {
                self.last_duty_cycle = duty_cycle;
                self.last_duty_cycle_iteration = iteration;
            }
            return duty_cycle;
        }

        let age = iteration - self.last_duty_cycle_iteration;
        if age == 0 && !active {
            return self.last_duty_cycle;
        }

        let alpha = Self::duty_cycle_alpha(iteration);
        let mut duty_cycle = (1.0 - alpha).powi(age as i32) * self.last_duty_cycle;
        if active {
            duty_cycle += alpha;
        }

        if !read_only {
            self.last_duty_cycle = duty_cycle;
            self.last_duty_cycle_iteration = iteration;
        }
        duty_cycle
    }

    /// Re-anchors the cached duty cycle at the current iteration.
    ///
    /// Called on every segment when the global iteration crosses a tier
    /// checkpoint.
    pub fn refresh_duty_cycle(&mut self, iteration: u32) {
        self.duty_cycle(iteration, false, false);
    }

    /// Returns whether `iteration` is one of the tier checkpoints.
    pub fn is_tier_checkpoint(iteration: u32) -> bool {
        DUTY_CYCLE_TIERS.contains(&iteration)
    }

    fn duty_cycle_alpha(iteration: u32) -> Real {
        let mut alpha = DUTY_CYCLE_ALPHAS[1];
        for (i, &tier) in DUTY_CYCLE_TIERS.iter().enumerate().skip(1) {
            if iteration > tier {
                alpha = DUTY_CYCLE_ALPHAS[i];
            }
        }
        alpha
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn segment_with_permanences(perms: &[Permanence]) -> Segment {
        let mut seg = Segment::new(0, true, 1);
        for (i, &p) in perms.iter().enumerate() {
            seg.add_synapse(i as UInt, 0, p);
        }
        seg
    }

    #[test]
    fn test_update_synapses_clips_and_reports_zero() {
        let mut seg = segment_with_permanences(&[0.05, 0.5, 0.95]);

        let zeroed = seg.update_synapses(&[0, 1, 2], 0.1, 1.0);
        assert!(!zeroed);
        assert!((seg.synapses[0].permanence - 0.15).abs() < 1e-6);
        assert_eq!(seg.synapses[2].permanence, 1.0);

        let zeroed = seg.update_synapses(&[0], -0.2, 1.0);
        assert!(zeroed);
        assert_eq!(seg.synapses[0].permanence, 0.0);
    }

    #[test]
    fn test_free_n_synapses_prefers_weak_inactive() {
        // Synapses 1 and 3 are inactive; 1 is the weakest inactive.
        let mut seg = segment_with_permanences(&[0.9, 0.2, 0.8, 0.4]);
        seg.free_n_synapses(1, &[1, 3]);

        assert_eq!(seg.num_synapses(), 3);
        assert!(seg.synapses.iter().all(|s| s.permanence != 0.2));
    }

    #[test]
    fn test_free_n_synapses_falls_back_to_active() {
        let mut seg = segment_with_permanences(&[0.9, 0.2, 0.8]);
        // Only one inactive candidate but two evictions requested; the
        // weakest active synapse (0.8) goes second.
        seg.free_n_synapses(2, &[1]);

        assert_eq!(seg.num_synapses(), 1);
        assert!((seg.synapses[0].permanence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_activity_level_connected_only() {
        let seg = segment_with_permanences(&[0.6, 0.3, 0.7]);
        // All sources active.
        let all = |_c: UInt, _i: UInt| true;
        assert_eq!(seg.activity_level(all, 0.5, false), 3);
        assert_eq!(seg.activity_level(all, 0.5, true), 2);
        assert!(seg.is_active(all, 0.5, 2));
        assert!(!seg.is_active(all, 0.5, 3));
    }

    #[test]
    fn test_duty_cycle_exact_in_first_tier() {
        let mut seg = Segment::new(0, true, 1);
        seg.positive_activations = 5;
        assert!((seg.duty_cycle(50, false, true) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_duty_cycle_decays_beyond_first_tier() {
        let mut seg = Segment::new(0, true, 1);
        seg.positive_activations = 100;
        // Anchor the cache at the end of the first tier.
        let at_tier = seg.duty_cycle(100, false, false);
        assert!((at_tier - 1.0).abs() < 1e-6);

        let later = seg.duty_cycle(1_000, false, true);
        assert!(later < at_tier);
        assert!(later > 0.0);
    }

    #[test]
    fn test_duty_cycle_active_bump() {
        let mut seg = Segment::new(0, true, 1);
        seg.positive_activations = 10;
        seg.duty_cycle(200, false, false);
        let idle = seg.duty_cycle(300, false, true);
        let bumped = seg.duty_cycle(300, true, true);
        assert!(bumped > idle);
    }

    proptest! {
        #[test]
        fn prop_permanences_stay_bounded(
            perms in proptest::collection::vec(0.0f32..=1.0, 1..20),
            deltas in proptest::collection::vec(-0.5f32..0.5, 1..10),
        ) {
            let mut seg = segment_with_permanences(&perms);
            let indices: Vec<usize> = (0..perms.len()).collect();
            for delta in deltas {
                seg.update_synapses(&indices, delta, 1.0);
                for syn in &seg.synapses {
                    prop_assert!((0.0..=1.0).contains(&syn.permanence));
                }
            }
        }
    }

    #[test]
    fn test_decay_synapses_removes_dead() {
        let mut seg = segment_with_permanences(&[0.05, 0.5]);
        let removed = seg.decay_synapses(-0.1, 1.0);
        assert_eq!(removed, 1);
        assert_eq!(seg.num_synapses(), 1);
        assert!((seg.synapses[0].permanence - 0.4).abs() < 1e-6);
    }
}
