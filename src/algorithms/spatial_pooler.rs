//! Spatial Pooler implementation.
//!
//! The Spatial Pooler maps input patterns onto a sparse set of active columns.
//! Each column owns a potential pool of input bits with scalar permanences;
//! synapses at or above the connected threshold contribute to the column's
//! overlap with the current input. Columns compete through global or local
//! inhibition, and learning nudges the winners' permanences toward the input
//! while boosting keeps starved columns in the game.

use crate::error::{Result, VelesError};
use crate::types::{Permanence, Real, Sdr, UInt, MAX_PERMANENCE, MIN_PERMANENCE};
use crate::utils::{Neighborhood, Random, Topology, WrappingMode};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Parameters for creating a Spatial Pooler.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialPoolerParams {
    /// Dimensions of the input space (e.g., `vec![100]` for 100 inputs).
    pub input_dimensions: Vec<UInt>,

    /// Dimensions of the column space (e.g., `vec![2048]` for 2048 columns).
    pub column_dimensions: Vec<UInt>,

    /// Receptive-field radius in the input space around each column's
    /// mapped center.
    pub potential_radius: UInt,

    /// Fraction of inputs within the potential radius that a column can
    /// form synapses with (0.0-1.0).
    pub potential_pct: Real,

    /// If true, all columns compete globally. If false, columns compete
    /// only within their inhibition neighborhood.
    pub global_inhibition: bool,

    /// Target fraction of active columns per inhibition area. Must be 0.0
    /// when `num_active_columns_per_inh_area` is used instead.
    pub local_area_density: Real,

    /// Absolute number of winners per inhibition area. If > 0 this is the
    /// sparsity control and `local_area_density` must be 0.0.
    pub num_active_columns_per_inh_area: UInt,

    /// Minimum overlap for a column to be considered during inhibition.
    pub stimulus_threshold: UInt,

    /// Permanence decrement for synapses on inactive inputs during learning.
    pub syn_perm_inactive_dec: Permanence,

    /// Permanence increment for synapses on active inputs during learning.
    pub syn_perm_active_inc: Permanence,

    /// Permanence threshold for a synapse to be considered connected.
    pub syn_perm_connected: Permanence,

    /// Minimum fraction of the (neighborhood) max overlap duty cycle below
    /// which a column's permanences get bumped.
    pub min_pct_overlap_duty_cycles: Real,

    /// Minimum fraction of the (neighborhood) max active duty cycle below
    /// which a column gets boosted.
    pub min_pct_active_duty_cycles: Real,

    /// Period (in iterations) for duty cycle smoothing.
    pub duty_cycle_period: UInt,

    /// Boost factor for columns that are never active. 1.0 disables boosting.
    pub max_boost: Real,

    /// Whether topology wraps around the space boundaries.
    pub wrap_around: bool,

    /// Random seed (negative for a random seed).
    pub seed: i64,
}

impl Default for SpatialPoolerParams {
    fn default() -> Self {
        Self {
            input_dimensions: vec![100],
            column_dimensions: vec![2048],
            potential_radius: 16,
            potential_pct: 0.5,
            global_inhibition: true,
            local_area_density: 0.05,
            num_active_columns_per_inh_area: 0,
            stimulus_threshold: 0,
            syn_perm_inactive_dec: 0.008,
            syn_perm_active_inc: 0.05,
            syn_perm_connected: 0.1,
            min_pct_overlap_duty_cycles: 0.001,
            min_pct_active_duty_cycles: 0.001,
            duty_cycle_period: 1000,
            max_boost: 10.0,
            wrap_around: true,
            seed: 1,
        }
    }
}

/// The Spatial Pooler algorithm.
///
/// Creates sparse distributed representations of input patterns and learns
/// stable representations through competitive inhibition and Hebbian
/// permanence updates.
///
/// # Example
///
/// ```rust
/// use veles::algorithms::{SpatialPooler, SpatialPoolerParams};
/// use veles::types::Sdr;
///
/// let mut sp = SpatialPooler::new(SpatialPoolerParams {
///     input_dimensions: vec![100],
///     column_dimensions: vec![200],
///     potential_radius: 50,
///     ..Default::default()
/// }).unwrap();
///
/// let mut input = Sdr::new(&[100]);
/// let mut output = Sdr::new(&[200]);
///
/// input.set_sparse(&[1, 5, 10, 20, 30]).unwrap();
/// sp.compute(&input, true, &mut output);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialPooler {
    // Configuration
    input_dimensions: Vec<UInt>,
    column_dimensions: Vec<UInt>,
    num_inputs: usize,
    num_columns: usize,
    potential_radius: UInt,
    potential_pct: Real,
    global_inhibition: bool,
    local_area_density: Real,
    num_active_columns_per_inh_area: UInt,
    stimulus_threshold: UInt,
    inhibition_radius: UInt,
    duty_cycle_period: UInt,
    max_boost: Real,
    wrap_around: bool,
    update_period: UInt,

    // Permanence parameters
    syn_perm_inactive_dec: Permanence,
    syn_perm_active_inc: Permanence,
    syn_perm_below_stimulus_inc: Permanence,
    syn_perm_connected: Permanence,
    min_pct_overlap_duty_cycles: Real,
    min_pct_active_duty_cycles: Real,
    init_connected_pct: Real,

    // Per-column synapses. potential/permanences/connected are parallel
    // per-column vectors; connected and connected_counts are derived from
    // permanences and only ever rewritten by update_permanences_for_column.
    potential_pools: Vec<Vec<UInt>>,
    permanences: Vec<Vec<Permanence>>,
    connected: Vec<Vec<bool>>,
    connected_counts: Vec<UInt>,

    // Duty cycle and boosting state
    boost_factors: Vec<Real>,
    overlap_duty_cycles: Vec<Real>,
    active_duty_cycles: Vec<Real>,
    min_overlap_duty_cycles: Vec<Real>,
    min_active_duty_cycles: Vec<Real>,
    boosted_overlaps: Vec<Real>,

    // Iteration counters
    iteration_num: UInt,
    iteration_learn_num: UInt,

    // Cached neighbor map for local inhibition
    #[cfg_attr(feature = "serde", serde(skip))]
    neighbor_map: Neighborhood,

    rng: Random,
}

impl SpatialPooler {
    /// Creates a new Spatial Pooler with the given parameters.
    ///
    /// Returns an error if the parameters are inconsistent, including the
    /// case where some column's potential pool is too small to ever reach
    /// the stimulus threshold.
    pub fn new(params: SpatialPoolerParams) -> Result<Self> {
        Self::validate_params(&params)?;

        let num_inputs = Topology::num_elements(&params.input_dimensions);
        let num_columns = Topology::num_elements(&params.column_dimensions);

        let mut sp = Self {
            input_dimensions: params.input_dimensions.clone(),
            column_dimensions: params.column_dimensions.clone(),
            num_inputs,
            num_columns,
            potential_radius: params.potential_radius,
            potential_pct: params.potential_pct,
            global_inhibition: params.global_inhibition,
            local_area_density: params.local_area_density,
            num_active_columns_per_inh_area: params.num_active_columns_per_inh_area,
            stimulus_threshold: params.stimulus_threshold,
            inhibition_radius: 0,
            duty_cycle_period: params.duty_cycle_period,
            max_boost: params.max_boost,
            wrap_around: params.wrap_around,
            update_period: 50,

            syn_perm_inactive_dec: params.syn_perm_inactive_dec,
            syn_perm_active_inc: params.syn_perm_active_inc,
            syn_perm_below_stimulus_inc: params.syn_perm_connected / 10.0,
            syn_perm_connected: params.syn_perm_connected,
            min_pct_overlap_duty_cycles: params.min_pct_overlap_duty_cycles,
            min_pct_active_duty_cycles: params.min_pct_active_duty_cycles,
            init_connected_pct: 0.5,

            potential_pools: Vec::with_capacity(num_columns),
            permanences: Vec::with_capacity(num_columns),
            connected: Vec::with_capacity(num_columns),
            connected_counts: vec![0; num_columns],

            boost_factors: vec![1.0; num_columns],
            overlap_duty_cycles: vec![0.0; num_columns],
            active_duty_cycles: vec![0.0; num_columns],
            min_overlap_duty_cycles: vec![0.0; num_columns],
            min_active_duty_cycles: vec![0.0; num_columns],
            boosted_overlaps: vec![0.0; num_columns],

            iteration_num: 0,
            iteration_learn_num: 0,

            neighbor_map: Neighborhood::new(),
            rng: Random::new(params.seed),
        };

        sp.initialize_columns()?;
        sp.update_inhibition_radius();

        Ok(sp)
    }

    fn validate_params(params: &SpatialPoolerParams) -> Result<()> {
        if params.input_dimensions.is_empty()
            || params.input_dimensions.iter().any(|&d| d == 0)
        {
            return Err(VelesError::InvalidParameter {
                name: "input_dimensions",
                message: "Must be non-empty with positive extents".to_string(),
            });
        }
        if params.column_dimensions.is_empty()
            || params.column_dimensions.iter().any(|&d| d == 0)
        {
            return Err(VelesError::InvalidParameter {
                name: "column_dimensions",
                message: "Must be non-empty with positive extents".to_string(),
            });
        }
        if params.potential_pct <= 0.0 || params.potential_pct > 1.0 {
            return Err(VelesError::InvalidParameter {
                name: "potential_pct",
                message: "Must be in range (0, 1]".to_string(),
            });
        }
        // Exactly one sparsity control is in effect.
        if params.num_active_columns_per_inh_area > 0 {
            if params.local_area_density != 0.0 {
                return Err(VelesError::InvalidParameter {
                    name: "local_area_density",
                    message: "Must be 0.0 when num_active_columns_per_inh_area is set"
                        .to_string(),
                });
            }
        } else if params.local_area_density <= 0.0 || params.local_area_density > 0.5 {
            return Err(VelesError::InvalidParameter {
                name: "local_area_density",
                message: "Must be in range (0, 0.5]".to_string(),
            });
        }
        if params.syn_perm_connected < MIN_PERMANENCE
            || params.syn_perm_connected > MAX_PERMANENCE
        {
            return Err(VelesError::InvalidParameter {
                name: "syn_perm_connected",
                message: "Must be in range [0, 1]".to_string(),
            });
        }
        if params.duty_cycle_period == 0 {
            return Err(VelesError::InvalidParameter {
                name: "duty_cycle_period",
                message: "Must be positive".to_string(),
            });
        }
        if params.max_boost < 1.0 {
            return Err(VelesError::InvalidParameter {
                name: "max_boost",
                message: "Must be at least 1.0".to_string(),
            });
        }
        Ok(())
    }

    /// Builds every column's potential pool and initial permanences.
    fn initialize_columns(&mut self) -> Result<()> {
        for column in 0..self.num_columns {
            let potential = self.init_map_potential(column);

            if potential.len() < self.stimulus_threshold as usize {
                return Err(VelesError::InvalidParameter {
                    name: "stimulus_threshold",
                    message: format!(
                        "Column {} has a potential pool of {} inputs, \
                         below the stimulus threshold of {}",
                        column,
                        potential.len(),
                        self.stimulus_threshold
                    ),
                });
            }

            let permanences = self.init_permanences(potential.len());
            let connected = vec![false; potential.len()];

            self.potential_pools.push(potential);
            self.permanences.push(permanences);
            self.connected.push(connected);

            // Raise permanences until the column can reach the stimulus
            // threshold at all, then derive the connected flags.
            self.update_permanences_for_column(column, true);
        }

        Ok(())
    }

    /// Maps a column to its potential pool of input indices (sorted).
    fn init_map_potential(&mut self, column: usize) -> Vec<UInt> {
        let center_input = Topology::map_column_to_input(
            column,
            &self.column_dimensions,
            &self.input_dimensions,
        );

        let neighborhood = Topology::neighborhood(
            center_input,
            &self.input_dimensions,
            self.potential_radius,
            self.wrapping_mode(),
        );

        let num_potential =
            (((neighborhood.len() as Real) * self.potential_pct).round() as usize).max(1);

        let mut sampled = self.rng.sample(neighborhood, num_potential);
        sampled.sort_unstable();
        sampled.into_iter().map(|i| i as UInt).collect()
    }

    /// Random initial permanences, roughly half connected.
    fn init_permanences(&mut self, pool_size: usize) -> Vec<Permanence> {
        (0..pool_size)
            .map(|_| {
                if self.rng.get_real64() < self.init_connected_pct as f64 {
                    let p = self.syn_perm_connected
                        + self.rng.get_real32() * self.syn_perm_active_inc / 4.0;
                    p.min(MAX_PERMANENCE)
                } else {
                    let p = self.syn_perm_connected * self.rng.get_real32();
                    p.max(MIN_PERMANENCE)
                }
            })
            .collect()
    }

    fn wrapping_mode(&self) -> WrappingMode {
        if self.wrap_around {
            WrappingMode::Wrap
        } else {
            WrappingMode::NoWrap
        }
    }

    /// The sole mutation path for a column's permanences.
    ///
    /// Clips permanences to `[0, 1]`, optionally raises all of them until
    /// the column has at least `stimulus_threshold` connected synapses,
    /// then rewrites the connected flags and count. Keeping every write
    /// behind this method is what keeps `connected` and `connected_counts`
    /// consistent with `permanences`.
    fn update_permanences_for_column(&mut self, column: usize, raise_perm: bool) {
        let perms = &mut self.permanences[column];
        for p in perms.iter_mut() {
            *p = p.clamp(MIN_PERMANENCE, MAX_PERMANENCE);
        }

        if raise_perm && self.stimulus_threshold > 0 {
            loop {
                let num_connected = perms
                    .iter()
                    .filter(|&&p| p >= self.syn_perm_connected)
                    .count();
                if num_connected >= self.stimulus_threshold as usize {
                    break;
                }
                for p in perms.iter_mut() {
                    *p = (*p + self.syn_perm_below_stimulus_inc).min(MAX_PERMANENCE);
                }
            }
        }

        let mut count = 0;
        for (flag, &p) in self.connected[column].iter_mut().zip(perms.iter()) {
            *flag = p >= self.syn_perm_connected;
            if *flag {
                count += 1;
            }
        }
        self.connected_counts[column] = count;
    }

    /// The main compute method.
    ///
    /// Takes an input SDR and produces an output SDR of active columns.
    /// With `learn` set, also updates permanences, duty cycles and boost
    /// factors.
    ///
    /// # Panics
    ///
    /// Panics if the input or output dimensions do not match the pooler's.
    pub fn compute(&mut self, input: &Sdr, learn: bool, output: &mut Sdr) {
        assert_eq!(
            input.size(),
            self.num_inputs,
            "input SDR size does not match input dimensions"
        );
        assert_eq!(
            output.size(),
            self.num_columns,
            "output SDR size does not match column dimensions"
        );

        self.iteration_num += 1;
        if learn {
            self.iteration_learn_num += 1;
        }

        if !self.global_inhibition && self.neighbor_map.is_empty() {
            // Restored from serialization; the cache is rebuilt on demand.
            self.rebuild_neighbor_map();
        }

        let overlaps = self.calculate_overlaps(input);

        // Boosting only shapes the competition while learning; inference
        // sees raw overlaps.
        if learn {
            for (b, (&o, &f)) in self
                .boosted_overlaps
                .iter_mut()
                .zip(overlaps.iter().zip(&self.boost_factors))
            {
                *b = o as Real * f;
            }
        } else {
            for (b, &o) in self.boosted_overlaps.iter_mut().zip(&overlaps) {
                *b = o as Real;
            }
        }

        let active_columns = self.inhibit_columns();
        output.set_sparse_unchecked(active_columns.iter().map(|&c| c as UInt).collect());

        if learn {
            self.adapt_synapses(input, &active_columns);
            self.update_duty_cycles(&overlaps, &active_columns);
            self.bump_up_weak_columns();
            self.update_boost_factors();

            if self.iteration_num % self.update_period == 0 {
                self.update_inhibition_radius();
                self.update_min_duty_cycles();
            }
        }
    }

    /// Counts connected synapses on active inputs, per column.
    fn calculate_overlaps(&self, input: &Sdr) -> Vec<UInt> {
        let dense = input.get_dense();

        (0..self.num_columns)
            .map(|column| {
                self.potential_pools[column]
                    .iter()
                    .zip(&self.connected[column])
                    .filter(|&(&input_idx, &is_connected)| {
                        is_connected && dense[input_idx as usize] != 0
                    })
                    .count() as UInt
            })
            .collect()
    }

    fn inhibit_columns(&mut self) -> Vec<usize> {
        let density = self.active_density();
        if self.global_inhibition
            || self.inhibition_radius as usize > *self.column_dimensions.iter().max().unwrap() as usize
        {
            self.inhibit_columns_global(density)
        } else {
            self.inhibit_columns_local(density)
        }
    }

    /// Target fraction of winners per inhibition area.
    fn active_density(&self) -> Real {
        if self.num_active_columns_per_inh_area > 0 {
            let inhibition_area = if self.global_inhibition {
                self.num_columns
            } else {
                let diameter = 2 * self.inhibition_radius as usize + 1;
                self.column_dimensions
                    .iter()
                    .map(|&d| diameter.min(d as usize))
                    .product()
            };
            (self.num_active_columns_per_inh_area as Real / inhibition_area as Real).min(0.5)
        } else {
            self.local_area_density
        }
    }

    /// Global inhibition: the top `density * num_columns` columns win.
    ///
    /// Ties are broken deterministically in favor of the lower column index.
    fn inhibit_columns_global(&self, density: Real) -> Vec<usize> {
        let num_active = (((self.num_columns as Real) * density).round() as usize)
            .clamp(1, self.num_columns);

        let mut order: Vec<usize> = (0..self.num_columns).collect();
        // Stable sort on descending overlap keeps equal-overlap columns in
        // ascending index order.
        order.sort_by(|&a, &b| {
            self.boosted_overlaps[b]
                .partial_cmp(&self.boosted_overlaps[a])
                .unwrap()
        });

        let mut active: Vec<usize> = order
            .into_iter()
            .take(num_active)
            .filter(|&c| self.boosted_overlaps[c] >= self.stimulus_threshold as Real)
            .collect();
        active.sort_unstable();
        active
    }

    /// Local inhibition: each column competes within its neighborhood.
    ///
    /// A winner's overlap is nudged up in a scratch copy so that a later
    /// tied neighbor does not win as well; with a fixed column order this
    /// makes tie-breaking deterministic.
    fn inhibit_columns_local(&self, density: Real) -> Vec<usize> {
        let mut overlaps = self.boosted_overlaps.clone();
        let max_overlap = overlaps.iter().cloned().fold(0.0_f32, Real::max);
        let tie_break = max_overlap / 1000.0;

        let mut active = Vec::new();
        for column in 0..self.num_columns {
            let overlap = self.boosted_overlaps[column];
            if overlap < self.stimulus_threshold as Real {
                continue;
            }

            let neighbors = match self.neighbor_map.get(column) {
                Some(n) => n,
                None => continue,
            };

            let num_bigger = neighbors
                .iter()
                .filter(|&&n| overlaps[n] > overlap)
                .count();

            let max_active = (((neighbors.len() + 1) as Real) * density).ceil() as usize;
            if num_bigger < max_active {
                active.push(column);
                overlaps[column] += tie_break;
            }
        }

        active
    }

    /// Moves winning columns' permanences toward the input pattern.
    fn adapt_synapses(&mut self, input: &Sdr, active_columns: &[usize]) {
        let dense = input.get_dense();

        for &column in active_columns {
            for (perm, &input_idx) in self.permanences[column]
                .iter_mut()
                .zip(&self.potential_pools[column])
            {
                if dense[input_idx as usize] != 0 {
                    *perm += self.syn_perm_active_inc;
                } else {
                    *perm -= self.syn_perm_inactive_dec;
                }
            }
            self.update_permanences_for_column(column, true);
        }
    }

    /// Moving-average update of overlap and active duty cycles.
    ///
    /// The effective window is `min(duty_cycle_period, iteration_num)` so
    /// that early estimates are exact averages rather than being dragged
    /// toward zero by the full period.
    fn update_duty_cycles(&mut self, overlaps: &[UInt], active_columns: &[usize]) {
        let period = self.duty_cycle_period.min(self.iteration_num) as Real;

        for (dc, &overlap) in self.overlap_duty_cycles.iter_mut().zip(overlaps) {
            let value = if overlap > 0 { 1.0 } else { 0.0 };
            *dc = ((period - 1.0) * *dc + value) / period;
        }

        for dc in self.active_duty_cycles.iter_mut() {
            *dc = (period - 1.0) * *dc / period;
        }
        for &column in active_columns {
            self.active_duty_cycles[column] += 1.0 / period;
        }
    }

    /// Raises permanences of columns that rarely overlap the input.
    fn bump_up_weak_columns(&mut self) {
        for column in 0..self.num_columns {
            if self.overlap_duty_cycles[column] >= self.min_overlap_duty_cycles[column] {
                continue;
            }
            for perm in self.permanences[column].iter_mut() {
                *perm += self.syn_perm_below_stimulus_inc;
            }
            self.update_permanences_for_column(column, false);
        }
    }

    /// Recomputes boost factors from active duty cycles.
    ///
    /// A column at or above its minimum duty cycle is not boosted (factor
    /// 1.0); a column that is never active gets `max_boost`; in between the
    /// factor interpolates linearly.
    fn update_boost_factors(&mut self) {
        for column in 0..self.num_columns {
            let min_duty = self.min_active_duty_cycles[column];
            if min_duty <= 0.0 {
                continue;
            }
            let duty = self.active_duty_cycles[column];
            self.boost_factors[column] = if duty > min_duty {
                1.0
            } else {
                (1.0 - self.max_boost) / min_duty * duty + self.max_boost
            };
        }
    }

    /// Updates the inhibition radius from the average connected span and
    /// the column/input density ratio, then rebuilds the neighbor cache.
    fn update_inhibition_radius(&mut self) {
        if self.global_inhibition {
            self.inhibition_radius = *self.column_dimensions.iter().max().unwrap_or(&1);
            return;
        }

        let total_span: Real = (0..self.num_columns)
            .map(|c| self.avg_connected_span_for_column(c))
            .sum();
        let avg_span = total_span / self.num_columns as Real;
        let avg_columns_per_input = self.avg_columns_per_input();

        let diameter = avg_span * avg_columns_per_input;
        self.inhibition_radius = (((diameter - 1.0) / 2.0).round().max(1.0)) as UInt;

        self.rebuild_neighbor_map();
    }

    fn rebuild_neighbor_map(&mut self) {
        self.neighbor_map = Neighborhood::compute_all(
            &self.column_dimensions,
            self.inhibition_radius,
            self.wrapping_mode(),
        );
    }

    /// Average per-dimension extent of a column's connected inputs.
    fn avg_connected_span_for_column(&self, column: usize) -> Real {
        let connected: Vec<usize> = self.potential_pools[column]
            .iter()
            .zip(&self.connected[column])
            .filter(|&(_, &is_connected)| is_connected)
            .map(|(&input_idx, _)| input_idx as usize)
            .collect();

        if connected.is_empty() {
            return 0.0;
        }

        let num_dims = self.input_dimensions.len();
        let mut total_span = 0.0;
        for dim in 0..num_dims {
            let coords = connected
                .iter()
                .map(|&c| Topology::index_to_coordinates(c, &self.input_dimensions)[dim]);
            let min = coords.clone().min().unwrap();
            let max = coords.max().unwrap();
            total_span += (max - min + 1) as Real;
        }
        total_span / num_dims as Real
    }

    fn avg_columns_per_input(&self) -> Real {
        let num_dims = self.column_dimensions.len().max(self.input_dimensions.len());
        (0..num_dims)
            .map(|dim| {
                let col = self.column_dimensions.get(dim).copied().unwrap_or(1) as Real;
                let inp = self.input_dimensions.get(dim).copied().unwrap_or(1) as Real;
                col / inp
            })
            .product()
    }

    /// Recomputes the per-column duty cycle floors.
    fn update_min_duty_cycles(&mut self) {
        if self.global_inhibition {
            let max_overlap = self
                .overlap_duty_cycles
                .iter()
                .cloned()
                .fold(0.0_f32, Real::max);
            let max_active = self
                .active_duty_cycles
                .iter()
                .cloned()
                .fold(0.0_f32, Real::max);

            let min_overlap = self.min_pct_overlap_duty_cycles * max_overlap;
            let min_active = self.min_pct_active_duty_cycles * max_active;
            self.min_overlap_duty_cycles.fill(min_overlap);
            self.min_active_duty_cycles.fill(min_active);
        } else {
            for column in 0..self.num_columns {
                let neighbors = match self.neighbor_map.get(column) {
                    Some(n) => n,
                    None => continue,
                };

                let max_overlap = neighbors
                    .iter()
                    .chain(std::iter::once(&column))
                    .map(|&n| self.overlap_duty_cycles[n])
                    .fold(0.0_f32, Real::max);
                let max_active = neighbors
                    .iter()
                    .chain(std::iter::once(&column))
                    .map(|&n| self.active_duty_cycles[n])
                    .fold(0.0_f32, Real::max);

                self.min_overlap_duty_cycles[column] =
                    self.min_pct_overlap_duty_cycles * max_overlap;
                self.min_active_duty_cycles[column] =
                    self.min_pct_active_duty_cycles * max_active;
            }
        }
    }

    // ========================================================================
    // Getters
    // ========================================================================

    /// Returns the input dimensions.
    pub fn input_dimensions(&self) -> &[UInt] {
        &self.input_dimensions
    }

    /// Returns the column dimensions.
    pub fn column_dimensions(&self) -> &[UInt] {
        &self.column_dimensions
    }

    /// Returns the number of inputs.
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Returns the number of columns.
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// Returns the potential radius.
    pub fn potential_radius(&self) -> UInt {
        self.potential_radius
    }

    /// Returns the potential percent.
    pub fn potential_pct(&self) -> Real {
        self.potential_pct
    }

    /// Returns whether global inhibition is enabled.
    pub fn global_inhibition(&self) -> bool {
        self.global_inhibition
    }

    /// Returns the local area density.
    pub fn local_area_density(&self) -> Real {
        self.local_area_density
    }

    /// Returns the number of winners per inhibition area.
    pub fn num_active_columns_per_inh_area(&self) -> UInt {
        self.num_active_columns_per_inh_area
    }

    /// Returns whether neighborhoods wrap around the column space.
    pub fn wrap_around(&self) -> bool {
        self.wrap_around
    }

    /// Returns the stimulus threshold.
    pub fn stimulus_threshold(&self) -> UInt {
        self.stimulus_threshold
    }

    /// Returns the current inhibition radius.
    pub fn inhibition_radius(&self) -> UInt {
        self.inhibition_radius
    }

    /// Returns the duty cycle period.
    pub fn duty_cycle_period(&self) -> UInt {
        self.duty_cycle_period
    }

    /// Returns the maximum boost factor.
    pub fn max_boost(&self) -> Real {
        self.max_boost
    }

    /// Returns the current iteration number.
    pub fn iteration_num(&self) -> UInt {
        self.iteration_num
    }

    /// Returns the current learning iteration number.
    pub fn iteration_learn_num(&self) -> UInt {
        self.iteration_learn_num
    }

    /// Returns the connected permanence threshold.
    pub fn syn_perm_connected(&self) -> Permanence {
        self.syn_perm_connected
    }

    /// Returns the active synapse permanence increment.
    pub fn syn_perm_active_inc(&self) -> Permanence {
        self.syn_perm_active_inc
    }

    /// Returns the inactive synapse permanence decrement.
    pub fn syn_perm_inactive_dec(&self) -> Permanence {
        self.syn_perm_inactive_dec
    }

    /// Returns the minimum overlap duty cycle fraction.
    pub fn min_pct_overlap_duty_cycles(&self) -> Real {
        self.min_pct_overlap_duty_cycles
    }

    /// Returns the minimum active duty cycle fraction.
    pub fn min_pct_active_duty_cycles(&self) -> Real {
        self.min_pct_active_duty_cycles
    }

    /// Returns the per-column boost factors.
    pub fn boost_factors(&self) -> &[Real] {
        &self.boost_factors
    }

    /// Returns the per-column overlap duty cycles.
    pub fn overlap_duty_cycles(&self) -> &[Real] {
        &self.overlap_duty_cycles
    }

    /// Returns the per-column active duty cycles.
    pub fn active_duty_cycles(&self) -> &[Real] {
        &self.active_duty_cycles
    }

    /// Returns the boosted overlaps from the last compute.
    pub fn boosted_overlaps(&self) -> &[Real] {
        &self.boosted_overlaps
    }

    /// Returns a column's potential pool (sorted input indices).
    pub fn potential_pool(&self, column: usize) -> &[UInt] {
        &self.potential_pools[column]
    }

    /// Returns a column's synapses as (input index, permanence) pairs.
    pub fn get_permanences(&self, column: usize) -> Vec<(UInt, Permanence)> {
        self.potential_pools[column]
            .iter()
            .zip(&self.permanences[column])
            .map(|(&input, &perm)| (input, perm))
            .collect()
    }

    /// Returns the number of connected synapses per column.
    pub fn connected_counts(&self) -> &[UInt] {
        &self.connected_counts
    }

    // ========================================================================
    // Setters (runtime-tunable parameters)
    // ========================================================================

    /// Sets the stimulus threshold.
    pub fn set_stimulus_threshold(&mut self, threshold: UInt) {
        self.stimulus_threshold = threshold;
    }

    /// Sets the maximum boost factor.
    pub fn set_max_boost(&mut self, max_boost: Real) {
        self.max_boost = max_boost;
    }

    /// Sets the duty cycle period.
    pub fn set_duty_cycle_period(&mut self, period: UInt) {
        self.duty_cycle_period = period;
    }

    /// Sets the active synapse permanence increment.
    pub fn set_syn_perm_active_inc(&mut self, inc: Permanence) {
        self.syn_perm_active_inc = inc;
    }

    /// Sets the inactive synapse permanence decrement.
    pub fn set_syn_perm_inactive_dec(&mut self, dec: Permanence) {
        self.syn_perm_inactive_dec = dec;
    }

    /// Sets the connected permanence threshold.
    ///
    /// Every column's connected flags and counts are recomputed against the
    /// new threshold, so connected-consistency holds across the change.
    pub fn set_syn_perm_connected(&mut self, connected: Permanence) {
        self.syn_perm_connected = connected;
        for column in 0..self.num_columns {
            self.update_permanences_for_column(column, false);
        }
    }

    /// Sets the minimum overlap duty cycle fraction.
    pub fn set_min_pct_overlap_duty_cycles(&mut self, min_pct: Real) {
        self.min_pct_overlap_duty_cycles = min_pct;
    }

    /// Sets the minimum active duty cycle fraction.
    pub fn set_min_pct_active_duty_cycles(&mut self, min_pct: Real) {
        self.min_pct_active_duty_cycles = min_pct;
    }

    /// Sets the local area density and clears the per-area winner count.
    pub fn set_local_area_density(&mut self, density: Real) {
        self.local_area_density = density;
        self.num_active_columns_per_inh_area = 0;
    }

    /// Sets the number of winners per inhibition area and clears the local
    /// area density, which would otherwise take precedence.
    pub fn set_num_active_columns_per_inh_area(&mut self, num_active: UInt) {
        self.num_active_columns_per_inh_area = num_active;
        self.local_area_density = 0.0;
    }

    /// Switches between global and local inhibition.
    pub fn set_global_inhibition(&mut self, global: bool) {
        self.global_inhibition = global;
        self.update_inhibition_radius();
        if !global && self.neighbor_map.is_empty() {
            self.rebuild_neighbor_map();
        }
    }
}

impl PartialEq for SpatialPooler {
    fn eq(&self, other: &Self) -> bool {
        self.input_dimensions == other.input_dimensions
            && self.column_dimensions == other.column_dimensions
            && self.potential_radius == other.potential_radius
            && (self.potential_pct - other.potential_pct).abs() < 1e-6
            && self.global_inhibition == other.global_inhibition
            && (self.local_area_density - other.local_area_density).abs() < 1e-6
            && self.stimulus_threshold == other.stimulus_threshold
            && self.iteration_num == other.iteration_num
            && self.potential_pools == other.potential_pools
            && self.permanences == other.permanences
            && self.connected_counts == other.connected_counts
    }
}
