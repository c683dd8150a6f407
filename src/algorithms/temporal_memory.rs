//! Backtracking Temporal Memory implementation.
//!
//! The Temporal Memory learns sequences of column activations by growing
//! distal segments between cells, and predicts the columns of the next time
//! step. The backtracking variant keeps a short history of recent inputs;
//! when the current input falls out of the learned sequence, it replays that
//! history from progressively later starting points to re-acquire the
//! sequence context instead of staying burst-locked.
//!
//! Inference and learning run as separate phase pairs over dual `t`/`t-1`
//! state buffers. Inference activates predicted cells (or bursts a whole
//! column on a miss) and derives the next prediction plus per-column
//! confidences from segment duty cycles. Learning maintains exactly one
//! learn cell per active column, reinforces or creates the segment that
//! predicted it, and queues phase-2 segment updates that are only applied
//! once the prediction is confirmed by bottom-up input.

use std::collections::VecDeque;

use crate::algorithms::Segment;
use crate::error::{Result, VelesError};
use crate::types::{Permanence, Real, Sdr, UInt};
use crate::utils::Random;

use ahash::{AHashMap, AHashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What `compute` returns as the output SDR over all cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OutputType {
    /// Union of the active and predicted inference state.
    #[default]
    Normal,
    /// Active inference state only.
    ActiveState,
    /// Active inference state, reduced to the most confident cell per column.
    ActiveState1CellPerCol,
}

/// Parameters for creating a backtracking Temporal Memory.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TemporalMemoryParams {
    /// Number of columns.
    pub num_columns: UInt,

    /// Number of cells per column.
    pub cells_per_column: UInt,

    /// Initial permanence for new synapses.
    pub initial_perm: Permanence,

    /// Permanence threshold for a synapse to be considered connected.
    pub connected_perm: Permanence,

    /// Upper bound for synapse permanences.
    pub permanence_max: Permanence,

    /// Permanence increment for active synapses during learning.
    pub permanence_inc: Permanence,

    /// Permanence decrement for inactive synapses during learning.
    pub permanence_dec: Permanence,

    /// Number of active connected synapses for a segment to fire.
    pub activation_threshold: UInt,

    /// Minimum raw segment activity to be considered a (weak) match
    /// during learning.
    pub min_threshold: UInt,

    /// Target number of synapses on a segment after learning.
    pub new_synapse_count: UInt,

    /// Permanence subtracted from aging synapses every `max_age`
    /// iterations. 0.0 disables global decay.
    pub global_decay: Permanence,

    /// Global decay period in learning iterations. 0 disables aging.
    pub max_age: UInt,

    /// Whether cells pool over multiple time steps via non-sequence
    /// segments.
    pub do_pooling: bool,

    /// Queued segment updates older than this many learning iterations
    /// are dropped unapplied.
    pub seg_update_valid_duration: UInt,

    /// Number of iterations before prediction statistics start
    /// accumulating.
    pub burn_in: UInt,

    /// Prediction-after-mismatch length: how many out-of-sequence steps
    /// learning tolerates before starting over on start cells.
    pub pam_length: UInt,

    /// Maximum inference backtrack history length. 0 disables inference
    /// backtracking.
    pub max_inf_backtrack: UInt,

    /// Maximum learning backtrack history length. 0 disables learning
    /// backtracking.
    pub max_lrn_backtrack: UInt,

    /// Maximum learned sequence length before learning restarts on start
    /// cells. 0 means unlimited.
    pub max_seq_length: UInt,

    /// Maximum segments per cell; -1 means unlimited. Setting this selects
    /// fixed-capacity mode, which is incompatible with global decay.
    pub max_segments_per_cell: i32,

    /// Maximum synapses per segment; -1 means unlimited. Must be set
    /// together with `max_segments_per_cell`.
    pub max_synapses_per_segment: i32,

    /// Output SDR flavor.
    pub output_type: OutputType,

    /// Random seed (negative for a random seed).
    pub seed: i64,
}

impl Default for TemporalMemoryParams {
    fn default() -> Self {
        Self {
            num_columns: 500,
            cells_per_column: 10,
            initial_perm: 0.11,
            connected_perm: 0.50,
            permanence_max: 1.0,
            permanence_inc: 0.10,
            permanence_dec: 0.10,
            activation_threshold: 12,
            min_threshold: 8,
            new_synapse_count: 15,
            global_decay: 0.10,
            max_age: 100_000,
            do_pooling: false,
            seg_update_valid_duration: 5,
            burn_in: 2,
            pam_length: 1,
            max_inf_backtrack: 10,
            max_lrn_backtrack: 5,
            max_seq_length: 32,
            max_segments_per_cell: -1,
            max_synapses_per_segment: -1,
            output_type: OutputType::Normal,
            seed: 42,
        }
    }
}

/// Prediction quality telemetry, accumulated after `burn_in` iterations.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PredictionStats {
    /// Number of scored predictions.
    pub n_predictions: u32,
    /// Average fraction of active columns that were predicted one step
    /// ahead.
    pub prediction_score_avg2: Real,
    /// Total active columns that were not predicted.
    pub total_missing: u32,
    /// Total predicted columns that did not become active.
    pub total_extra: u32,
}

/// A queued permanence change for one segment (or a segment to be created),
/// dated so stale updates can expire.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct SegmentUpdate {
    column: UInt,
    cell: UInt,
    /// None means create a new segment on the cell.
    segment_id: Option<u32>,
    /// Indices of the segment's synapses whose sources were active.
    active_synapses: Vec<usize>,
    /// Source cells for synapses to be grown, as (column, cell).
    new_synapses: Vec<(UInt, UInt)>,
    sequence_segment: bool,
    create_date: u32,
}

/// Dual-buffer inference state. `roll` shifts `t` into `t-1` at the top of
/// each time step; backtracking snapshots and restores the whole struct.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct InferenceState {
    active_t: Vec<bool>,
    active_t1: Vec<bool>,
    predicted_t: Vec<bool>,
    predicted_t1: Vec<bool>,
    cell_confidence_t: Vec<Real>,
    cell_confidence_t1: Vec<Real>,
    col_confidence_t: Vec<Real>,
    col_confidence_t1: Vec<Real>,
}

impl InferenceState {
    fn new(num_cells: usize, num_columns: usize) -> Self {
        Self {
            active_t: vec![false; num_cells],
            active_t1: vec![false; num_cells],
            predicted_t: vec![false; num_cells],
            predicted_t1: vec![false; num_cells],
            cell_confidence_t: vec![0.0; num_cells],
            cell_confidence_t1: vec![0.0; num_cells],
            col_confidence_t: vec![0.0; num_columns],
            col_confidence_t1: vec![0.0; num_columns],
        }
    }

    fn roll(&mut self) {
        self.active_t1.copy_from_slice(&self.active_t);
        self.predicted_t1.copy_from_slice(&self.predicted_t);
        self.cell_confidence_t1.copy_from_slice(&self.cell_confidence_t);
        self.col_confidence_t1.copy_from_slice(&self.col_confidence_t);
    }

    fn clear(&mut self) {
        self.active_t.fill(false);
        self.active_t1.fill(false);
        self.predicted_t.fill(false);
        self.predicted_t1.fill(false);
        self.cell_confidence_t.fill(0.0);
        self.cell_confidence_t1.fill(0.0);
        self.col_confidence_t.fill(0.0);
        self.col_confidence_t1.fill(0.0);
    }
}

/// Dual-buffer learning state. Unlike inference, at most one cell per
/// active column is on.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct LearningState {
    active_t: Vec<bool>,
    active_t1: Vec<bool>,
    predicted_t: Vec<bool>,
    predicted_t1: Vec<bool>,
}

impl LearningState {
    fn new(num_cells: usize) -> Self {
        Self {
            active_t: vec![false; num_cells],
            active_t1: vec![false; num_cells],
            predicted_t: vec![false; num_cells],
            predicted_t1: vec![false; num_cells],
        }
    }

    fn roll(&mut self) {
        self.active_t1.copy_from_slice(&self.active_t);
        self.predicted_t1.copy_from_slice(&self.predicted_t);
    }

    fn clear(&mut self) {
        self.active_t.fill(false);
        self.active_t1.fill(false);
        self.predicted_t.fill(false);
        self.predicted_t1.fill(false);
    }
}

/// Which state buffer a learning helper should read cell activity from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateView {
    LrnActiveT,
    LrnActiveT1,
}

/// The backtracking Temporal Memory algorithm.
///
/// # Example
///
/// ```rust
/// use veles::algorithms::{BacktrackingTemporalMemory, TemporalMemoryParams};
/// use veles::types::Sdr;
///
/// let mut tm = BacktrackingTemporalMemory::new(TemporalMemoryParams {
///     num_columns: 100,
///     cells_per_column: 4,
///     ..Default::default()
/// }).unwrap();
///
/// let mut active_columns = Sdr::new(&[100]);
/// active_columns.set_sparse(&[1, 5, 10, 20]).unwrap();
///
/// let output = tm.compute(&active_columns, true, true);
/// assert_eq!(output.size(), 400);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BacktrackingTemporalMemory {
    // Configuration
    num_columns: UInt,
    cells_per_column: UInt,
    num_cells: usize,
    initial_perm: Permanence,
    connected_perm: Permanence,
    permanence_max: Permanence,
    permanence_inc: Permanence,
    permanence_dec: Permanence,
    activation_threshold: UInt,
    min_threshold: UInt,
    new_synapse_count: UInt,
    global_decay: Permanence,
    max_age: UInt,
    do_pooling: bool,
    seg_update_valid_duration: UInt,
    burn_in: UInt,
    pam_length: UInt,
    max_inf_backtrack: UInt,
    max_lrn_backtrack: UInt,
    max_seq_length: UInt,
    max_segments_per_cell: i32,
    max_synapses_per_segment: i32,
    output_type: OutputType,

    // Segments, indexed [column][cell].
    cells: Vec<Vec<Vec<Segment>>>,
    next_segment_id: u32,

    // State buffers
    inf: InferenceState,
    lrn: LearningState,

    // Queued phase-2 updates, keyed by the owning (column, cell).
    #[cfg_attr(feature = "serde", serde(with = "update_map_serde"))]
    segment_updates: AHashMap<(UInt, UInt), Vec<SegmentUpdate>>,

    // Input history for backtracking (newest at the back; the current
    // input is the last entry during a compute).
    prev_inf_patterns: VecDeque<Vec<UInt>>,
    prev_lrn_patterns: VecDeque<Vec<UInt>>,

    // Sequence bookkeeping
    pam_counter: UInt,
    learned_seq_length: UInt,
    avg_learned_seq_length: Real,
    avg_input_density: Real,
    reset_called: bool,

    // Iteration counters
    iteration_idx: u32,
    lrn_iteration_idx: u32,

    // Prediction statistics
    n_predictions: u32,
    prediction_score_total2: Real,
    total_missing: u32,
    total_extra: u32,

    rng: Random,
}

#[cfg(feature = "serde")]
mod update_map_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(
        map: &AHashMap<(UInt, UInt), Vec<SegmentUpdate>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let entries: Vec<(&(UInt, UInt), &Vec<SegmentUpdate>)> = map.iter().collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> std::result::Result<AHashMap<(UInt, UInt), Vec<SegmentUpdate>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries: Vec<((UInt, UInt), Vec<SegmentUpdate>)> = Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

impl BacktrackingTemporalMemory {
    /// Creates a new Temporal Memory with the given parameters.
    pub fn new(params: TemporalMemoryParams) -> Result<Self> {
        Self::validate_params(&params)?;

        let num_cells = params.num_columns as usize * params.cells_per_column as usize;
        let cells = (0..params.num_columns)
            .map(|_| vec![Vec::new(); params.cells_per_column as usize])
            .collect();

        Ok(Self {
            num_columns: params.num_columns,
            cells_per_column: params.cells_per_column,
            num_cells,
            initial_perm: params.initial_perm,
            connected_perm: params.connected_perm,
            permanence_max: params.permanence_max,
            permanence_inc: params.permanence_inc,
            permanence_dec: params.permanence_dec,
            activation_threshold: params.activation_threshold,
            min_threshold: params.min_threshold,
            new_synapse_count: params.new_synapse_count,
            global_decay: params.global_decay,
            max_age: params.max_age,
            do_pooling: params.do_pooling,
            seg_update_valid_duration: params.seg_update_valid_duration,
            burn_in: params.burn_in,
            pam_length: params.pam_length,
            max_inf_backtrack: params.max_inf_backtrack,
            max_lrn_backtrack: params.max_lrn_backtrack,
            max_seq_length: params.max_seq_length,
            max_segments_per_cell: params.max_segments_per_cell,
            max_synapses_per_segment: params.max_synapses_per_segment,
            output_type: params.output_type,

            cells,
            next_segment_id: 0,

            inf: InferenceState::new(num_cells, params.num_columns as usize),
            lrn: LearningState::new(num_cells),

            segment_updates: AHashMap::new(),
            prev_inf_patterns: VecDeque::new(),
            prev_lrn_patterns: VecDeque::new(),

            pam_counter: params.pam_length,
            learned_seq_length: 0,
            avg_learned_seq_length: 0.0,
            avg_input_density: 0.0,
            reset_called: false,

            iteration_idx: 0,
            lrn_iteration_idx: 0,

            n_predictions: 0,
            prediction_score_total2: 0.0,
            total_missing: 0,
            total_extra: 0,

            rng: Random::new(params.seed),
        })
    }

    fn validate_params(params: &TemporalMemoryParams) -> Result<()> {
        if params.num_columns == 0 {
            return Err(VelesError::InvalidParameter {
                name: "num_columns",
                message: "Must be > 0".to_string(),
            });
        }
        if params.cells_per_column == 0 {
            return Err(VelesError::InvalidParameter {
                name: "cells_per_column",
                message: "Must be > 0".to_string(),
            });
        }
        if params.pam_length == 0 {
            return Err(VelesError::InvalidParameter {
                name: "pam_length",
                message: "Must be > 0".to_string(),
            });
        }
        if params.connected_perm > params.permanence_max {
            return Err(VelesError::InvalidParameter {
                name: "connected_perm",
                message: "Must not exceed permanence_max".to_string(),
            });
        }
        if params.initial_perm < 0.0 || params.initial_perm > params.permanence_max {
            return Err(VelesError::InvalidParameter {
                name: "initial_perm",
                message: "Must be in [0, permanence_max]".to_string(),
            });
        }
        if params.activation_threshold > params.new_synapse_count {
            return Err(VelesError::InvalidParameter {
                name: "activation_threshold",
                message: "Must not exceed new_synapse_count, or segments could \
                          never fire"
                    .to_string(),
            });
        }
        if params.min_threshold > params.activation_threshold {
            return Err(VelesError::InvalidParameter {
                name: "min_threshold",
                message: "Must not exceed activation_threshold".to_string(),
            });
        }
        if params.global_decay < 0.0 || params.global_decay > 1.0 {
            return Err(VelesError::InvalidParameter {
                name: "global_decay",
                message: "Must be in [0, 1]".to_string(),
            });
        }
        // Fixed-capacity mode: both caps set, and no aging machinery that
        // would silently shrink segments out from under the eviction logic.
        if params.max_segments_per_cell > 0 || params.max_synapses_per_segment > 0 {
            if params.max_segments_per_cell <= 0 || params.max_synapses_per_segment <= 0 {
                return Err(VelesError::InvalidParameter {
                    name: "max_segments_per_cell",
                    message: "max_segments_per_cell and max_synapses_per_segment \
                              must be set together"
                        .to_string(),
                });
            }
            if params.global_decay != 0.0 || params.max_age != 0 {
                return Err(VelesError::InvalidParameter {
                    name: "global_decay",
                    message: "Fixed-capacity mode requires global_decay == 0 and \
                              max_age == 0"
                        .to_string(),
                });
            }
            if (params.max_synapses_per_segment as UInt) < params.new_synapse_count {
                return Err(VelesError::InvalidParameter {
                    name: "max_synapses_per_segment",
                    message: "Must be at least new_synapse_count".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Main compute method.
    ///
    /// Takes the currently active columns (bottom-up input) and advances
    /// the temporal memory one time step. Returns the output SDR over all
    /// cells, per the configured [`OutputType`].
    ///
    /// # Panics
    ///
    /// Panics if `active_columns` does not have `num_columns` bits.
    pub fn compute(
        &mut self,
        active_columns: &Sdr,
        enable_learn: bool,
        enable_inference: bool,
    ) -> Sdr {
        assert_eq!(
            active_columns.size(),
            self.num_columns as usize,
            "active column SDR size does not match num_columns"
        );

        self.iteration_idx += 1;
        if enable_learn {
            self.lrn_iteration_idx += 1;
            // Cached duty cycles decay under the alpha of the tier they were
            // written in; re-anchor all of them when the tier changes.
            if Segment::is_tier_checkpoint(self.lrn_iteration_idx) {
                let iteration = self.lrn_iteration_idx;
                for column in self.cells.iter_mut() {
                    for cell in column.iter_mut() {
                        for segment in cell.iter_mut() {
                            segment.refresh_duty_cycle(iteration);
                        }
                    }
                }
            }
        }

        let active: Vec<UInt> = active_columns.get_sparse().to_vec();

        let density = active.len() as Real;
        if self.avg_input_density == 0.0 {
            self.avg_input_density = density;
        } else {
            self.avg_input_density = 0.99 * self.avg_input_density + 0.01 * density;
        }

        if enable_inference {
            self.update_inference_state(&active);
        }

        if enable_learn {
            self.update_learning_state(&active);

            if self.global_decay > 0.0
                && self.max_age > 0
                && self.lrn_iteration_idx % self.max_age == 0
            {
                self.apply_global_decay();
            }
        }

        let output = self.compute_output();

        if enable_inference {
            self.update_stats(&active);
        }

        self.reset_called = false;
        output
    }

    /// Resets sequence state between sequences.
    ///
    /// Clears all cell state, input history and pending segment updates.
    /// The next `compute` starts the sequence on start cells.
    pub fn reset(&mut self) {
        if self.learned_seq_length > 0 {
            let length = self.learned_seq_length as Real;
            self.update_avg_learned_seq_length(length);
        }
        self.learned_seq_length = 0;

        self.inf.clear();
        self.lrn.clear();
        self.segment_updates.clear();
        self.prev_inf_patterns.clear();
        self.prev_lrn_patterns.clear();
        self.pam_counter = self.pam_length;
        self.reset_called = true;
    }

    // ========================================================================
    // Inference
    // ========================================================================

    fn update_inference_state(&mut self, active: &[UInt]) {
        self.inf.roll();

        if self.max_inf_backtrack > 0 {
            if self.prev_inf_patterns.len() > self.max_inf_backtrack as usize {
                self.prev_inf_patterns.pop_front();
            }
            self.prev_inf_patterns.push_back(active.to_vec());
        }

        let in_sequence = self.infer_phase1(active, self.reset_called);
        if !in_sequence && self.max_inf_backtrack > 0 {
            self.infer_backtrack(active);
        } else {
            let in_sequence = self.infer_phase2();
            if !in_sequence && self.max_inf_backtrack > 0 {
                self.infer_backtrack(active);
            }
        }
    }

    /// Computes the active inference state for the current input.
    ///
    /// Predicted cells in an active column turn on; a column with no
    /// predicted cells bursts. With `use_start_cells` only cell 0 of each
    /// active column turns on and the step counts as in-sequence.
    fn infer_phase1(&mut self, active: &[UInt], use_start_cells: bool) -> bool {
        let cpc = self.cells_per_column as usize;
        self.inf.active_t.fill(false);

        let mut num_predicted_columns = 0usize;
        if use_start_cells {
            for &c in active {
                self.inf.active_t[c as usize * cpc] = true;
            }
        } else {
            for &c in active {
                let base = c as usize * cpc;
                let mut any_predicted = false;
                for i in 0..cpc {
                    if self.inf.predicted_t1[base + i] {
                        self.inf.active_t[base + i] = true;
                        any_predicted = true;
                    }
                }
                if any_predicted {
                    num_predicted_columns += 1;
                } else {
                    for i in 0..cpc {
                        self.inf.active_t[base + i] = true;
                    }
                }
            }
        }

        use_start_cells || num_predicted_columns as Real >= 0.5 * active.len() as Real
    }

    /// Computes the predicted inference state and confidences from the
    /// active state.
    ///
    /// Raw segment activity at or above the activation threshold
    /// contributes the segment's duty cycle to the cell and column
    /// confidences; connected activity at the threshold marks the cell
    /// predicted. Confidences are normalized to sum to 1.
    fn infer_phase2(&mut self) -> bool {
        let cpc = self.cells_per_column as usize;
        let num_columns = self.num_columns as usize;
        let connected_perm = self.connected_perm;
        let threshold = self.activation_threshold as usize;
        let iteration = self.lrn_iteration_idx.max(1);

        let mut predicted = vec![false; self.num_cells];
        let mut cell_confidence = vec![0.0; self.num_cells];
        let mut col_confidence = vec![0.0; num_columns];

        {
            let active_state = &self.inf.active_t;
            let is_active =
                |c: UInt, i: UInt| active_state[c as usize * cpc + i as usize];

            for (c, column) in self.cells.iter_mut().enumerate() {
                for (i, cell) in column.iter_mut().enumerate() {
                    for segment in cell.iter_mut() {
                        let activity =
                            segment.activity_level(is_active, connected_perm, false);
                        if activity < threshold {
                            continue;
                        }

                        let duty_cycle = segment.duty_cycle(iteration, false, true);
                        cell_confidence[c * cpc + i] += duty_cycle;
                        col_confidence[c] += duty_cycle;

                        if segment.is_active(is_active, connected_perm, threshold as UInt) {
                            predicted[c * cpc + i] = true;
                        }
                    }
                }
            }
        }

        let sum: Real = col_confidence.iter().sum();
        if sum > 0.0 {
            for v in &mut cell_confidence {
                *v /= sum;
            }
            for v in &mut col_confidence {
                *v /= sum;
            }
        }

        let num_predicted_columns = (0..num_columns)
            .filter(|&c| predicted[c * cpc..(c + 1) * cpc].iter().any(|&p| p))
            .count();

        self.inf.predicted_t = predicted;
        self.inf.cell_confidence_t = cell_confidence;
        self.inf.col_confidence_t = col_confidence;

        num_predicted_columns as Real >= 0.5 * self.avg_input_density
    }

    /// Replays recent inputs from start cells, looking for an earlier
    /// starting point that makes the current input in-sequence.
    ///
    /// The first (oldest) starting offset whose replay stays in sequence
    /// all the way through the current input wins and its state is kept.
    /// If none works, the pre-backtrack state is restored unchanged and
    /// the failed history entries are discarded.
    fn infer_backtrack(&mut self, active: &[UInt]) {
        let num_prev = self.prev_inf_patterns.len().saturating_sub(1);
        if num_prev == 0 {
            return;
        }
        let current_offset = num_prev;

        let backup = self.inf.clone();
        let mut bad_offsets: Vec<usize> = Vec::new();
        let mut success: Option<usize> = None;

        for start in 0..num_prev {
            let mut in_sequence = false;
            for offset in start..=num_prev {
                let pattern: Vec<UInt> = if offset == current_offset {
                    active.to_vec()
                } else {
                    self.prev_inf_patterns[offset].clone()
                };

                self.inf.roll();
                in_sequence = self.infer_phase1(&pattern, offset == start);
                if !in_sequence {
                    break;
                }
                in_sequence = self.infer_phase2();
                if !in_sequence {
                    break;
                }
            }

            if in_sequence {
                success = Some(start);
                break;
            }
            bad_offsets.push(start);
        }

        if success.is_none() {
            // No starting point locked on; put the pre-backtrack state back
            // and derive the prediction from the burst input as usual.
            self.inf = backup;
            self.infer_phase2();
        }

        // Drop history entries that can never seed a successful replay.
        let start = success.unwrap_or(usize::MAX);
        let mut num_to_pop = 0;
        for i in 0..num_prev {
            if bad_offsets.contains(&i) || i < start {
                num_to_pop += 1;
            } else {
                break;
            }
        }
        for _ in 0..num_to_pop {
            self.prev_inf_patterns.pop_front();
        }
    }

    // ========================================================================
    // Learning
    // ========================================================================

    fn update_learning_state(&mut self, active: &[UInt]) {
        self.lrn.roll();

        if self.max_lrn_backtrack > 0 {
            if self.prev_lrn_patterns.len() > self.max_lrn_backtrack as usize {
                self.prev_lrn_patterns.pop_front();
            }
            self.prev_lrn_patterns.push_back(active.to_vec());
        }

        // Bottom-up input has arrived; confirmed predictions can now be
        // applied.
        self.process_segment_updates(active);

        if self.pam_counter > 0 {
            self.pam_counter -= 1;
        }
        self.learned_seq_length += 1;

        if !self.reset_called {
            let in_sequence = self.learn_phase1(active, false);
            if in_sequence {
                self.pam_counter = self.pam_length;
            }
        }

        // Start over on start cells after a reset, when the PAM counter
        // expires, or when the learned sequence grows past its cap.
        if self.reset_called
            || self.pam_counter == 0
            || (self.max_seq_length != 0 && self.learned_seq_length >= self.max_seq_length)
        {
            let seq_length = if self.pam_counter == 0 {
                self.learned_seq_length.saturating_sub(self.pam_length)
            } else {
                self.learned_seq_length
            };
            self.update_avg_learned_seq_length(seq_length as Real);

            let mut back_steps = 0;
            if !self.reset_called {
                back_steps = self.learn_backtrack();
            }

            if self.reset_called || back_steps == 0 {
                self.lrn.active_t.fill(false);
                let cpc = self.cells_per_column as usize;
                for &c in active {
                    self.lrn.active_t[c as usize * cpc] = true;
                }
                self.prev_lrn_patterns.clear();
            }

            self.pam_counter = self.pam_length;
            self.learned_seq_length = back_steps;
            self.segment_updates.clear();
        }

        self.learn_phase2(false);
    }

    /// Activates one learn cell per active column and reinforces the
    /// segment that predicted it.
    ///
    /// A column with exactly one predicted learn cell keeps it. Otherwise
    /// the best matching cell (against the previous learn state) is
    /// reinforced immediately if its segment is a sequence segment, or a
    /// fresh sequence segment is grown on a cell picked by
    /// `get_cell_for_new_segment`.
    fn learn_phase1(&mut self, active: &[UInt], read_only: bool) -> bool {
        let cpc = self.cells_per_column as usize;
        self.lrn.active_t.fill(false);

        let mut num_unpredicted = 0usize;
        for &c in active {
            let base = c as usize * cpc;

            let predicted: Vec<usize> = (0..cpc)
                .filter(|&i| self.lrn.predicted_t1[base + i])
                .collect();
            if predicted.len() == 1 {
                self.lrn.active_t[base + predicted[0]] = true;
                continue;
            }

            num_unpredicted += 1;
            if read_only {
                continue;
            }

            let best = self.get_best_matching_cell(c, StateView::LrnActiveT1, self.min_threshold);
            let matched_sequence = best.and_then(|(i, segment_id, _)| {
                let segment = self.find_segment(c, i, segment_id)?;
                segment.is_sequence_segment.then_some((i, segment_id))
            });

            if let Some((i, segment_id)) = matched_sequence {
                self.lrn.active_t[base + i as usize] = true;
                let update = self.get_segment_active_synapses(
                    c,
                    i,
                    Some(segment_id),
                    StateView::LrnActiveT1,
                    true,
                );
                if let Some(segment) = self.find_segment_mut(c, i, segment_id) {
                    segment.total_activations += 1;
                }
                let trim = self.adapt_segment(&update);
                if trim {
                    self.trim_segments_in_cell(c, i, 0.000_01, 0);
                }
            } else {
                let i = self.get_cell_for_new_segment(c);
                self.lrn.active_t[base + i as usize] = true;
                let mut update =
                    self.get_segment_active_synapses(c, i, None, StateView::LrnActiveT1, true);
                update.sequence_segment = true;
                self.adapt_segment(&update);
            }
        }

        num_unpredicted < active.len() / 2
    }

    /// Computes the learn prediction: at most one cell per column, the one
    /// with the best matching segment, and queues that segment for a dated
    /// update to be applied if the prediction is confirmed.
    fn learn_phase2(&mut self, read_only: bool) {
        let cpc = self.cells_per_column as usize;
        self.lrn.predicted_t.fill(false);

        for c in 0..self.num_columns {
            let Some((i, segment_id, activity)) =
                self.get_best_matching_cell(c, StateView::LrnActiveT, self.activation_threshold)
            else {
                continue;
            };

            self.lrn.predicted_t[c as usize * cpc + i as usize] = true;
            if read_only {
                continue;
            }

            let update = self.get_segment_active_synapses(
                c,
                i,
                Some(segment_id),
                StateView::LrnActiveT,
                activity < self.new_synapse_count as usize,
            );
            if let Some(segment) = self.find_segment_mut(c, i, segment_id) {
                segment.total_activations += 1;
            }
            self.add_to_segment_updates(c, i, update);

            if self.do_pooling {
                // Queue a pooling update against the previous learn state,
                // on a non-sequence segment.
                let pooling_segment = self.get_best_matching_segment(c, i, StateView::LrnActiveT1);
                let update = self.get_segment_active_synapses(
                    c,
                    i,
                    pooling_segment,
                    StateView::LrnActiveT1,
                    true,
                );
                self.add_to_segment_updates(c, i, update);
            }
        }
    }

    /// Tries to re-anchor learning at an earlier point of the recent input
    /// history. Returns the number of steps of history now considered
    /// learned (0 when no starting point worked).
    fn learn_backtrack(&mut self) -> UInt {
        let num_prev = self.prev_lrn_patterns.len().saturating_sub(1);
        if num_prev == 0 {
            return 0;
        }

        let backup = self.lrn.clone();
        let mut bad_offsets: Vec<usize> = Vec::new();
        let mut success: Option<usize> = None;

        // Dry-run each starting offset, oldest first.
        for start in 0..num_prev {
            if self.learn_backtrack_from(start, true) {
                success = Some(start);
                break;
            }
            bad_offsets.push(start);
        }

        let Some(start) = success else {
            self.lrn = backup;
            self.prev_lrn_patterns.clear();
            return 0;
        };

        // Replay for real, applying the queued learning this time.
        self.learn_backtrack_from(start, false);

        let mut num_to_pop = 0;
        for i in 0..num_prev {
            if bad_offsets.contains(&i) || i <= start {
                num_to_pop += 1;
            } else {
                break;
            }
        }
        for _ in 0..num_to_pop {
            self.prev_lrn_patterns.pop_front();
        }

        (num_prev - start) as UInt
    }

    /// Replays the learning history from `start`, seeding start cells at
    /// the origin. Returns whether the replay stayed in sequence through
    /// the current input.
    fn learn_backtrack_from(&mut self, start: usize, read_only: bool) -> bool {
        let num_prev = self.prev_lrn_patterns.len() - 1;
        let current_offset = num_prev;

        if !read_only {
            self.segment_updates.clear();
        }

        let mut in_sequence = true;
        for offset in start..=num_prev {
            let pattern = self.prev_lrn_patterns[offset].clone();
            self.lrn.roll();

            if !read_only {
                self.process_segment_updates(&pattern);
            }

            if offset == start {
                self.lrn.active_t.fill(false);
                let cpc = self.cells_per_column as usize;
                for &c in &pattern {
                    self.lrn.active_t[c as usize * cpc] = true;
                }
                in_sequence = true;
            } else {
                in_sequence = self.learn_phase1(&pattern, read_only);
            }

            if !in_sequence || offset == current_offset {
                break;
            }

            self.learn_phase2(read_only);
        }

        in_sequence
    }

    /// Applies, keeps, or drops the queued segment updates now that the
    /// current bottom-up input is known.
    ///
    /// Updates for cells that received input are applied; updates for cells
    /// still predicted under pooling are kept; everything else is dropped.
    /// Updates older than `seg_update_valid_duration` expire unapplied.
    fn process_segment_updates(&mut self, active: &[UInt]) {
        let active_set: AHashSet<UInt> = active.iter().copied().collect();
        let cpc = self.cells_per_column as usize;

        let keys: Vec<(UInt, UInt)> = self.segment_updates.keys().copied().collect();
        let mut trim_list: Vec<(UInt, UInt)> = Vec::new();

        for key in keys {
            let (c, i) = key;
            let apply = active_set.contains(&c);
            let keep = !apply
                && self.do_pooling
                && self.lrn.predicted_t[c as usize * cpc + i as usize];

            let Some(updates) = self.segment_updates.remove(&key) else {
                continue;
            };
            if !apply && !keep {
                continue;
            }

            let mut kept = Vec::new();
            for update in updates {
                if self.lrn_iteration_idx - update.create_date > self.seg_update_valid_duration {
                    continue;
                }
                if apply {
                    let trim = self.adapt_segment(&update);
                    if trim {
                        trim_list.push((c, i));
                    }
                } else {
                    kept.push(update);
                }
            }
            if !kept.is_empty() {
                self.segment_updates.insert(key, kept);
            }
        }

        for (c, i) in trim_list {
            self.trim_segments_in_cell(c, i, 0.000_01, 0);
        }
    }

    /// Applies one segment update: reinforce listed synapses, punish the
    /// rest, grow the requested new synapses (evicting in fixed-capacity
    /// mode), or create a brand-new segment.
    ///
    /// Returns true if any synapse was driven to zero permanence.
    fn adapt_segment(&mut self, update: &SegmentUpdate) -> bool {
        let c = update.column as usize;
        let i = update.cell as usize;

        let Some(segment_id) = update.segment_id else {
            let mut segment = Segment::new(
                self.next_segment_id,
                update.sequence_segment,
                self.lrn_iteration_idx,
            );
            self.next_segment_id += 1;
            for &(src_column, src_cell) in &update.new_synapses {
                segment.add_synapse(src_column, src_cell, self.initial_perm);
            }
            self.cells[c][i].push(segment);
            return false;
        };

        let iteration = self.lrn_iteration_idx;
        let permanence_inc = self.permanence_inc;
        let permanence_dec = self.permanence_dec;
        let permanence_max = self.permanence_max;
        let initial_perm = self.initial_perm;
        let max_synapses = self.max_synapses_per_segment;

        // The segment can have been trimmed or decayed away while the
        // update sat in the queue.
        let Some(segment) = self.cells[c][i].iter_mut().find(|s| s.id == segment_id) else {
            return false;
        };

        segment.last_active_iteration = iteration;
        segment.positive_activations += 1;
        segment.duty_cycle(iteration.max(1), true, false);

        let num_synapses = segment.num_synapses();
        let active: Vec<usize> = update
            .active_synapses
            .iter()
            .copied()
            .filter(|&idx| idx < num_synapses)
            .collect();
        let inactive: Vec<usize> =
            (0..num_synapses).filter(|idx| !active.contains(idx)).collect();

        let trim = segment.update_synapses(&inactive, -permanence_dec, permanence_max);
        segment.update_synapses(&active, permanence_inc, permanence_max);

        if max_synapses > 0
            && segment.num_synapses() + update.new_synapses.len() > max_synapses as usize
        {
            let num_to_free =
                segment.num_synapses() + update.new_synapses.len() - max_synapses as usize;
            segment.free_n_synapses(num_to_free, &inactive);
        }
        for &(src_column, src_cell) in &update.new_synapses {
            segment.add_synapse(src_column, src_cell, initial_perm);
        }

        trim
    }

    /// Builds a segment update listing the segment's currently active
    /// synapses and, if requested, new synapses to grow toward the
    /// active cells of `view`.
    fn get_segment_active_synapses(
        &mut self,
        column: UInt,
        cell: UInt,
        segment_id: Option<u32>,
        view: StateView,
        grow_new_synapses: bool,
    ) -> SegmentUpdate {
        let cpc = self.cells_per_column as usize;

        let mut active_synapses = Vec::new();
        if let Some(id) = segment_id {
            if let Some(segment) = self.find_segment(column, cell, id) {
                let state = self.state_view(view);
                active_synapses = segment
                    .synapses
                    .iter()
                    .enumerate()
                    .filter(|(_, syn)| {
                        state[syn.src_column as usize * cpc + syn.src_cell as usize]
                    })
                    .map(|(idx, _)| idx)
                    .collect();
            }
        }

        let mut new_synapses = Vec::new();
        if grow_new_synapses {
            let num_to_add =
                (self.new_synapse_count as usize).saturating_sub(active_synapses.len());
            if num_to_add > 0 {
                new_synapses =
                    self.choose_cells_to_learn_on(column, cell, segment_id, num_to_add, view);
            }
        }

        SegmentUpdate {
            column,
            cell,
            segment_id,
            active_synapses,
            new_synapses,
            sequence_segment: false,
            create_date: self.lrn_iteration_idx,
        }
    }

    /// Picks up to `n` source cells for new synapses from the active cells
    /// of `view`, excluding cells the segment already connects to.
    fn choose_cells_to_learn_on(
        &mut self,
        column: UInt,
        cell: UInt,
        segment_id: Option<u32>,
        n: usize,
        view: StateView,
    ) -> Vec<(UInt, UInt)> {
        let cpc = self.cells_per_column as usize;

        let existing: AHashSet<(UInt, UInt)> = segment_id
            .and_then(|id| self.find_segment(column, cell, id))
            .map(|segment| {
                segment
                    .synapses
                    .iter()
                    .map(|syn| (syn.src_column, syn.src_cell))
                    .collect()
            })
            .unwrap_or_default();

        let state = self.state_view(view);
        let candidates: Vec<(UInt, UInt)> = state
            .iter()
            .enumerate()
            .filter(|&(_, &on)| on)
            .map(|(idx, _)| ((idx / cpc) as UInt, (idx % cpc) as UInt))
            .filter(|src| !existing.contains(src))
            .collect();

        if candidates.len() <= n {
            return candidates;
        }
        self.rng.sample(candidates, n)
    }

    fn add_to_segment_updates(&mut self, column: UInt, cell: UInt, update: SegmentUpdate) {
        if update.active_synapses.is_empty() && update.new_synapses.is_empty() {
            return;
        }
        self.segment_updates
            .entry((column, cell))
            .or_default()
            .push(update);
    }

    /// Finds the cell in a column with the most active segment against
    /// `view`, at or above `min_threshold` raw activity.
    ///
    /// Returns (cell, segment id, activity). On equal activity the later
    /// cell wins, matching the scan order.
    fn get_best_matching_cell(
        &self,
        column: UInt,
        view: StateView,
        min_threshold: UInt,
    ) -> Option<(UInt, u32, usize)> {
        let cpc = self.cells_per_column as usize;
        let state = self.state_view(view);
        let is_active = |c: UInt, i: UInt| state[c as usize * cpc + i as usize];

        let mut best: Option<(UInt, u32, usize)> = None;
        let mut best_activity = min_threshold as usize;

        for (i, cell) in self.cells[column as usize].iter().enumerate() {
            let mut max_activity = 0usize;
            let mut max_id = None;
            for segment in cell {
                let activity = segment.activity_level(is_active, self.connected_perm, false);
                if activity > max_activity {
                    max_activity = activity;
                    max_id = Some(segment.id);
                }
            }
            if max_activity >= best_activity {
                if let Some(id) = max_id {
                    best_activity = max_activity;
                    best = Some((i as UInt, id, max_activity));
                }
            }
        }

        best
    }

    /// Finds the most active segment on one cell against `view`, at or
    /// above `min_threshold` raw activity.
    fn get_best_matching_segment(
        &self,
        column: UInt,
        cell: UInt,
        view: StateView,
    ) -> Option<u32> {
        let cpc = self.cells_per_column as usize;
        let state = self.state_view(view);
        let is_active = |c: UInt, i: UInt| state[c as usize * cpc + i as usize];

        let mut best = None;
        let mut best_activity = self.min_threshold as usize;
        for segment in &self.cells[column as usize][cell as usize] {
            let activity = segment.activity_level(is_active, self.connected_perm, false);
            if activity >= best_activity {
                best_activity = activity;
                best = Some(segment.id);
            }
        }
        best
    }

    /// Picks the cell of a column to grow a new segment on.
    ///
    /// Cell 0 is the start cell and never receives segments when the
    /// column has more than one cell. In fixed-capacity mode, a full
    /// column evicts the segment with the lowest duty cycle first.
    fn get_cell_for_new_segment(&mut self, column: UInt) -> UInt {
        if self.max_segments_per_cell < 0 {
            return if self.cells_per_column > 1 {
                self.rng.get_uint32_range(1, self.cells_per_column)
            } else {
                0
            };
        }

        let (min_cell, max_cell) = if self.cells_per_column == 1 {
            (0, 0)
        } else {
            (1, self.cells_per_column - 1)
        };

        let candidates: Vec<UInt> = (min_cell..=max_cell)
            .filter(|&i| {
                self.cells[column as usize][i as usize].len()
                    < self.max_segments_per_cell as usize
            })
            .collect();
        if !candidates.is_empty() {
            let pick = self.rng.get_usize(candidates.len());
            return candidates[pick];
        }

        // Column is full: evict the least useful segment.
        let iteration = self.lrn_iteration_idx.max(1);
        let mut victim_cell = min_cell;
        let mut victim_id = 0;
        let mut victim_duty_cycle = Real::MAX;
        for i in min_cell..=max_cell {
            for segment in self.cells[column as usize][i as usize].iter_mut() {
                let duty_cycle = segment.duty_cycle(iteration, false, true);
                if duty_cycle < victim_duty_cycle {
                    victim_duty_cycle = duty_cycle;
                    victim_cell = i;
                    victim_id = segment.id;
                }
            }
        }

        self.remove_updates_for_segment(column, victim_cell, victim_id);
        self.cells[column as usize][victim_cell as usize].retain(|s| s.id != victim_id);
        victim_cell
    }

    fn remove_updates_for_segment(&mut self, column: UInt, cell: UInt, segment_id: u32) {
        let mut now_empty = false;
        if let Some(updates) = self.segment_updates.get_mut(&(column, cell)) {
            updates.retain(|u| u.segment_id != Some(segment_id));
            now_empty = updates.is_empty();
        }
        if now_empty {
            self.segment_updates.remove(&(column, cell));
        }
    }

    /// Ages out synapses segment-wide. Segments left with no synapses are
    /// removed. Returns (segments removed, synapses removed).
    fn apply_global_decay(&mut self) -> (usize, usize) {
        let iteration = self.lrn_iteration_idx;
        let max_age = self.max_age;
        let decay = self.global_decay;
        let permanence_max = self.permanence_max;

        let mut segments_removed = 0;
        let mut synapses_removed = 0;

        for column in self.cells.iter_mut() {
            for cell in column.iter_mut() {
                cell.retain_mut(|segment| {
                    let age = iteration - segment.last_active_iteration;
                    if age <= max_age {
                        return true;
                    }
                    synapses_removed += segment.decay_synapses(-decay, permanence_max);
                    if segment.num_synapses() == 0 {
                        segments_removed += 1;
                        false
                    } else {
                        true
                    }
                });
            }
        }

        (segments_removed, synapses_removed)
    }

    // ========================================================================
    // Output and statistics
    // ========================================================================

    fn compute_output(&self) -> Sdr {
        let cpc = self.cells_per_column as usize;
        let mut output = Sdr::new(&[self.num_cells as UInt]);

        let sparse: Vec<UInt> = match self.output_type {
            OutputType::Normal => (0..self.num_cells)
                .filter(|&idx| self.inf.active_t[idx] || self.inf.predicted_t[idx])
                .map(|idx| idx as UInt)
                .collect(),
            OutputType::ActiveState => (0..self.num_cells)
                .filter(|&idx| self.inf.active_t[idx])
                .map(|idx| idx as UInt)
                .collect(),
            OutputType::ActiveState1CellPerCol => (0..self.num_columns as usize)
                .filter_map(|c| {
                    let base = c * cpc;
                    (base..base + cpc)
                        .filter(|&idx| self.inf.active_t[idx])
                        .max_by(|&a, &b| {
                            self.inf.cell_confidence_t[a]
                                .partial_cmp(&self.inf.cell_confidence_t[b])
                                .unwrap()
                                // prefer the lower cell on ties
                                .then(b.cmp(&a))
                        })
                })
                .map(|idx| idx as UInt)
                .collect(),
        };

        output.set_sparse_unchecked(sparse);
        output
    }

    /// Scores how well the previous prediction matched the current input.
    fn update_stats(&mut self, active: &[UInt]) {
        if active.is_empty() {
            return;
        }
        let cpc = self.cells_per_column as usize;

        let column_predicted = |c: usize| -> bool {
            self.inf.predicted_t1[c * cpc..(c + 1) * cpc].iter().any(|&p| p)
        };

        let matched = active
            .iter()
            .filter(|&&c| column_predicted(c as usize))
            .count();
        let missing = active.len() - matched;

        let active_set: AHashSet<UInt> = active.iter().copied().collect();
        let extra = (0..self.num_columns as usize)
            .filter(|&c| column_predicted(c) && !active_set.contains(&(c as UInt)))
            .count();

        if self.iteration_idx > self.burn_in && !self.reset_called {
            self.n_predictions += 1;
            self.prediction_score_total2 += matched as Real / active.len() as Real;
            self.total_missing += missing as u32;
            self.total_extra += extra as u32;
        }
    }

    /// Returns the accumulated prediction statistics.
    pub fn stats(&self) -> PredictionStats {
        PredictionStats {
            n_predictions: self.n_predictions,
            prediction_score_avg2: if self.n_predictions > 0 {
                self.prediction_score_total2 / self.n_predictions as Real
            } else {
                0.0
            },
            total_missing: self.total_missing,
            total_extra: self.total_extra,
        }
    }

    /// Clears the accumulated prediction statistics.
    pub fn reset_stats(&mut self) {
        self.n_predictions = 0;
        self.prediction_score_total2 = 0.0;
        self.total_missing = 0;
        self.total_extra = 0;
    }

    /// Predicts column confidences `n_steps` into the future.
    ///
    /// Does not modify the temporal memory; the forward simulation runs on
    /// a clone. Index 0 is the already-computed one-step prediction.
    pub fn predict(&self, n_steps: usize) -> Vec<Vec<Real>> {
        assert!(n_steps > 0);

        let mut tm = self.clone();
        let mut result = Vec::with_capacity(n_steps);
        result.push(tm.inf.col_confidence_t.clone());

        for _ in 1..n_steps {
            // Feed the prediction back in as the active state.
            tm.inf.roll();
            tm.inf.active_t.copy_from_slice(&tm.inf.predicted_t1);
            tm.infer_phase2();
            result.push(tm.inf.col_confidence_t.clone());
        }
        result
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Finalizes a trained network for inference-only use.
    ///
    /// Drops all pending segment updates and trims away synapses with
    /// near-zero permanence along with segments too small to ever reach
    /// the activation threshold, then refreshes every cached duty cycle.
    pub fn finish_learning(&mut self) {
        self.segment_updates.clear();
        self.trim_segments(0.0001, self.activation_threshold);

        let iteration = self.lrn_iteration_idx.max(1);
        for column in self.cells.iter_mut() {
            for cell in column.iter_mut() {
                for segment in cell.iter_mut() {
                    segment.refresh_duty_cycle(iteration);
                }
            }
        }

        if self.cells_per_column > 1 {
            debug_assert!(self
                .cells
                .iter()
                .all(|column| column[0].is_empty()));
        }
    }

    /// Removes synapses below `min_permanence` and segments left with
    /// fewer than `min_num_synapses` synapses.
    ///
    /// Returns (segments removed, synapses removed).
    pub fn trim_segments(
        &mut self,
        min_permanence: Permanence,
        min_num_synapses: UInt,
    ) -> (usize, usize) {
        let mut total_segments = 0;
        let mut total_synapses = 0;
        for c in 0..self.num_columns {
            for i in 0..self.cells_per_column {
                let (segments, synapses) =
                    self.trim_segments_in_cell(c, i, min_permanence, min_num_synapses);
                total_segments += segments;
                total_synapses += synapses;
            }
        }
        (total_segments, total_synapses)
    }

    fn trim_segments_in_cell(
        &mut self,
        column: UInt,
        cell: UInt,
        min_permanence: Permanence,
        min_num_synapses: UInt,
    ) -> (usize, usize) {
        let mut segments_removed = 0;
        let mut synapses_removed = 0;

        self.cells[column as usize][cell as usize].retain_mut(|segment| {
            let before = segment.num_synapses();
            segment.synapses.retain(|syn| syn.permanence >= min_permanence);
            synapses_removed += before - segment.num_synapses();

            if segment.num_synapses() == 0
                || (segment.num_synapses() as UInt) < min_num_synapses
            {
                synapses_removed += segment.num_synapses();
                segments_removed += 1;
                false
            } else {
                true
            }
        });

        (segments_removed, synapses_removed)
    }

    // ========================================================================
    // Helpers and getters
    // ========================================================================

    fn state_view(&self, view: StateView) -> &[bool] {
        match view {
            StateView::LrnActiveT => &self.lrn.active_t,
            StateView::LrnActiveT1 => &self.lrn.active_t1,
        }
    }

    fn find_segment(&self, column: UInt, cell: UInt, segment_id: u32) -> Option<&Segment> {
        self.cells[column as usize][cell as usize]
            .iter()
            .find(|s| s.id == segment_id)
    }

    fn find_segment_mut(
        &mut self,
        column: UInt,
        cell: UInt,
        segment_id: u32,
    ) -> Option<&mut Segment> {
        self.cells[column as usize][cell as usize]
            .iter_mut()
            .find(|s| s.id == segment_id)
    }

    fn update_avg_learned_seq_length(&mut self, length: Real) {
        let alpha = if self.lrn_iteration_idx < 100 { 0.5 } else { 0.1 };
        self.avg_learned_seq_length =
            (1.0 - alpha) * self.avg_learned_seq_length + alpha * length;
    }

    /// Returns the number of columns.
    pub fn num_columns(&self) -> usize {
        self.num_columns as usize
    }

    /// Returns the number of cells per column.
    pub fn cells_per_column(&self) -> UInt {
        self.cells_per_column
    }

    /// Returns the total number of cells.
    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    /// Returns the total number of segments.
    pub fn num_segments(&self) -> usize {
        self.cells
            .iter()
            .flat_map(|column| column.iter())
            .map(Vec::len)
            .sum()
    }

    /// Returns the number of segments on one cell.
    pub fn num_segments_in_cell(&self, column: UInt, cell: UInt) -> usize {
        self.cells[column as usize][cell as usize].len()
    }

    /// Returns the total number of synapses.
    pub fn num_synapses(&self) -> usize {
        self.cells
            .iter()
            .flat_map(|column| column.iter())
            .flat_map(|cell| cell.iter())
            .map(Segment::num_synapses)
            .sum()
    }

    /// Returns the active inference state (one flag per cell).
    pub fn inf_active_state(&self) -> &[bool] {
        &self.inf.active_t
    }

    /// Returns the predicted inference state (one flag per cell).
    pub fn inf_predicted_state(&self) -> &[bool] {
        &self.inf.predicted_t
    }

    /// Returns the per-cell confidences, normalized over the whole layer.
    pub fn cell_confidence(&self) -> &[Real] {
        &self.inf.cell_confidence_t
    }

    /// Returns the per-column confidences, normalized to sum to 1.
    pub fn col_confidence(&self) -> &[Real] {
        &self.inf.col_confidence_t
    }

    /// Returns the exponential moving average of the bottom-up input
    /// density.
    pub fn avg_input_density(&self) -> Real {
        self.avg_input_density
    }

    /// Returns the moving average of learned sequence lengths.
    pub fn avg_learned_seq_length(&self) -> Real {
        self.avg_learned_seq_length
    }

    /// Returns the current inference iteration.
    pub fn iteration_idx(&self) -> u32 {
        self.iteration_idx
    }

    /// Returns the current learning iteration.
    pub fn lrn_iteration_idx(&self) -> u32 {
        self.lrn_iteration_idx
    }

    /// Returns the remaining prediction-after-mismatch allowance.
    pub fn pam_counter(&self) -> UInt {
        self.pam_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> TemporalMemoryParams {
        TemporalMemoryParams {
            num_columns: 50,
            cells_per_column: 4,
            activation_threshold: 3,
            min_threshold: 2,
            new_synapse_count: 5,
            initial_perm: 0.6,
            connected_perm: 0.5,
            ..Default::default()
        }
    }

    fn sdr_from(columns: &[UInt], size: UInt) -> Sdr {
        let mut sdr = Sdr::new(&[size]);
        sdr.set_sparse(columns).unwrap();
        sdr
    }

    #[test]
    fn test_create_temporal_memory() {
        let tm = BacktrackingTemporalMemory::new(TemporalMemoryParams {
            num_columns: 100,
            cells_per_column: 4,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(tm.num_columns(), 100);
        assert_eq!(tm.cells_per_column(), 4);
        assert_eq!(tm.num_cells(), 400);
        assert_eq!(tm.num_segments(), 0);
    }

    #[test]
    fn test_invalid_params() {
        assert!(BacktrackingTemporalMemory::new(TemporalMemoryParams {
            num_columns: 0,
            ..Default::default()
        })
        .is_err());

        assert!(BacktrackingTemporalMemory::new(TemporalMemoryParams {
            pam_length: 0,
            ..Default::default()
        })
        .is_err());

        assert!(BacktrackingTemporalMemory::new(TemporalMemoryParams {
            activation_threshold: 20,
            new_synapse_count: 10,
            ..Default::default()
        })
        .is_err());

        // Fixed-capacity caps must come as a pair.
        assert!(BacktrackingTemporalMemory::new(TemporalMemoryParams {
            max_segments_per_cell: 8,
            max_synapses_per_segment: -1,
            global_decay: 0.0,
            max_age: 0,
            ..Default::default()
        })
        .is_err());

        // Fixed-capacity mode excludes global decay.
        assert!(BacktrackingTemporalMemory::new(TemporalMemoryParams {
            max_segments_per_cell: 8,
            max_synapses_per_segment: 32,
            global_decay: 0.1,
            max_age: 100,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_fixed_capacity_synapse_cap_validated() {
        let result = BacktrackingTemporalMemory::new(TemporalMemoryParams {
            max_segments_per_cell: 8,
            max_synapses_per_segment: 4,
            new_synapse_count: 15,
            global_decay: 0.0,
            max_age: 0,
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_first_input_bursts() {
        let mut tm = BacktrackingTemporalMemory::new(small_params()).unwrap();
        let pattern = sdr_from(&[1, 5, 9], 50);

        let output = tm.compute(&pattern, false, true);

        // No reset, no prior context: all cells of each active column burst.
        let sparse = output.get_sparse();
        assert_eq!(sparse.len(), 3 * 4);
        for &c in &[1u32, 5, 9] {
            for i in 0..4 {
                assert!(sparse.contains(&(c * 4 + i)));
            }
        }
    }

    #[test]
    fn test_reset_uses_start_cells() {
        let mut tm = BacktrackingTemporalMemory::new(small_params()).unwrap();
        let pattern = sdr_from(&[1, 5, 9], 50);

        tm.reset();
        tm.compute(&pattern, true, true);

        // Only the start cell of each active column is on.
        let active: Vec<usize> = tm
            .inf_active_state()
            .iter()
            .enumerate()
            .filter(|&(_, &on)| on)
            .map(|(idx, _)| idx)
            .collect();
        assert_eq!(active, vec![4, 20, 36]);
    }

    #[test]
    fn test_sequence_learning_predicts_next_pattern() {
        let mut tm = BacktrackingTemporalMemory::new(small_params()).unwrap();
        let a = sdr_from(&[0, 1, 2, 3, 4], 50);
        let b = sdr_from(&[10, 11, 12, 13, 14], 50);

        for _ in 0..10 {
            tm.reset();
            tm.compute(&a, true, true);
            tm.compute(&b, true, true);
        }

        tm.reset();
        tm.compute(&a, false, true);

        // Confidence should concentrate on the columns of B.
        let confidence = tm.col_confidence();
        let b_confidence: Real = (10..15).map(|c| confidence[c]).sum();
        assert!(
            b_confidence > 0.5,
            "expected confidence on next pattern, got {}",
            b_confidence
        );
    }

    #[test]
    fn test_start_cells_never_grow_segments() {
        let mut tm = BacktrackingTemporalMemory::new(small_params()).unwrap();
        let patterns: Vec<Sdr> = (0..5)
            .map(|p| sdr_from(&[p * 10, p * 10 + 1, p * 10 + 2], 50))
            .collect();

        for _ in 0..10 {
            tm.reset();
            for pattern in &patterns {
                tm.compute(pattern, true, true);
            }
        }

        for c in 0..50 {
            assert_eq!(tm.num_segments_in_cell(c, 0), 0);
        }
        assert!(tm.num_segments() > 0);
    }

    #[test]
    fn test_single_cell_columns_use_cell_zero() {
        let mut tm = BacktrackingTemporalMemory::new(TemporalMemoryParams {
            cells_per_column: 1,
            ..small_params()
        })
        .unwrap();
        let a = sdr_from(&[0, 1, 2, 3, 4], 50);
        let b = sdr_from(&[10, 11, 12, 13, 14], 50);

        for _ in 0..5 {
            tm.reset();
            tm.compute(&a, true, true);
            tm.compute(&b, true, true);
        }

        // With one cell per column, cell 0 is the only place to learn.
        let on_cell_zero: usize = (0..50).map(|c| tm.num_segments_in_cell(c, 0)).sum();
        assert!(on_cell_zero > 0);
    }

    #[test]
    fn test_finish_learning_clears_updates_and_trims() {
        let mut tm = BacktrackingTemporalMemory::new(small_params()).unwrap();
        let a = sdr_from(&[0, 1, 2, 3, 4], 50);
        let b = sdr_from(&[10, 11, 12, 13, 14], 50);

        for _ in 0..10 {
            tm.reset();
            tm.compute(&a, true, true);
            tm.compute(&b, true, true);
        }

        tm.finish_learning();
        assert!(tm.segment_updates.is_empty());
        // Surviving segments are all big enough to fire.
        for column in &tm.cells {
            for cell in column {
                for segment in cell {
                    assert!(
                        segment.num_synapses() >= tm.activation_threshold as usize
                    );
                }
            }
        }
    }

    #[test]
    fn test_predict_shape() {
        let mut tm = BacktrackingTemporalMemory::new(small_params()).unwrap();
        let a = sdr_from(&[0, 1, 2, 3, 4], 50);
        tm.reset();
        tm.compute(&a, true, true);

        let predictions = tm.predict(3);
        assert_eq!(predictions.len(), 3);
        for step in &predictions {
            assert_eq!(step.len(), 50);
        }
    }

    #[test]
    fn test_output_types() {
        let build = |output_type| {
            BacktrackingTemporalMemory::new(TemporalMemoryParams {
                output_type,
                ..small_params()
            })
            .unwrap()
        };
        let pattern = sdr_from(&[1, 5, 9], 50);

        let mut normal = build(OutputType::Normal);
        let mut active = build(OutputType::ActiveState);
        let mut one_cell = build(OutputType::ActiveState1CellPerCol);

        let out_normal = normal.compute(&pattern, true, true);
        let out_active = active.compute(&pattern, true, true);
        let out_one = one_cell.compute(&pattern, true, true);

        // Active-state output is a subset of the normal union output.
        assert!(out_active.get_sum() <= out_normal.get_sum());
        // At most one cell per active column.
        assert_eq!(out_one.get_sum(), 3);
    }

    #[test]
    fn test_stats_accumulate_after_burn_in() {
        let mut tm = BacktrackingTemporalMemory::new(TemporalMemoryParams {
            burn_in: 1,
            ..small_params()
        })
        .unwrap();
        let a = sdr_from(&[0, 1, 2, 3, 4], 50);
        let b = sdr_from(&[10, 11, 12, 13, 14], 50);

        for _ in 0..10 {
            tm.reset();
            tm.compute(&a, true, true);
            tm.compute(&b, true, true);
        }

        let stats = tm.stats();
        assert!(stats.n_predictions > 0);

        tm.reset_stats();
        assert_eq!(tm.stats().n_predictions, 0);
        assert_eq!(tm.stats().prediction_score_avg2, 0.0);
    }

    #[test]
    fn test_trim_segments_removes_weak_synapses() {
        let mut tm = BacktrackingTemporalMemory::new(small_params()).unwrap();

        // Hand-build a segment with one weak and several strong synapses.
        let mut segment = Segment::new(0, true, 1);
        segment.add_synapse(1, 1, 0.9);
        segment.add_synapse(2, 1, 0.9);
        segment.add_synapse(3, 1, 0.9);
        segment.add_synapse(4, 1, 0.05);
        tm.cells[0][1].push(segment);

        let (segments, synapses) = tm.trim_segments(0.1, 3);
        assert_eq!(segments, 0);
        assert_eq!(synapses, 1);
        assert_eq!(tm.cells[0][1][0].num_synapses(), 3);

        // Trimming below the minimum size removes the whole segment.
        let (segments, _) = tm.trim_segments(0.1, 4);
        assert_eq!(segments, 1);
        assert_eq!(tm.num_segments(), 0);
    }

    #[test]
    fn test_global_decay_removes_stale_segments() {
        let mut tm = BacktrackingTemporalMemory::new(TemporalMemoryParams {
            global_decay: 0.2,
            max_age: 1,
            initial_perm: 0.15,
            ..small_params()
        })
        .unwrap();

        let a = sdr_from(&[0, 1, 2, 3, 4], 50);
        let b = sdr_from(&[10, 11, 12, 13, 14], 50);
        tm.reset();
        tm.compute(&a, true, true);
        tm.compute(&b, true, true);
        let grown = tm.num_segments();
        assert!(grown > 0);

        // Keep learning on fresh input; stale segments age out, losing
        // 0.2 permanence per iteration until they vanish.
        let c = sdr_from(&[20, 21, 22, 23, 24], 50);
        let d = sdr_from(&[30, 31, 32, 33, 34], 50);
        for _ in 0..10 {
            tm.compute(&c, true, true);
            tm.compute(&d, true, true);
        }

        // The a -> b transition lived on b's columns; those segments were
        // never reinforced again and must be gone.
        let remaining_old: usize = (10..15)
            .map(|col| {
                (0..4)
                    .map(|i| tm.num_segments_in_cell(col, i))
                    .sum::<usize>()
            })
            .sum();
        assert_eq!(remaining_old, 0);
    }

    #[test]
    fn test_avg_input_density_tracks_input() {
        let mut tm = BacktrackingTemporalMemory::new(small_params()).unwrap();
        let pattern = sdr_from(&[0, 1, 2, 3, 4], 50);

        tm.compute(&pattern, false, true);
        assert!((tm.avg_input_density() - 5.0).abs() < 1e-6);

        let wide = sdr_from(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9], 50);
        tm.compute(&wide, false, true);
        assert!(tm.avg_input_density() > 5.0);
        assert!(tm.avg_input_density() < 10.0);
    }
}
