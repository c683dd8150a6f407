//! HTM algorithms implementation.
//!
//! - **Segment**: the distal dendrite model (synapses, duty cycles)
//! - **Spatial Pooler**: creates sparse column representations of inputs
//! - **Temporal Memory**: learns sequences with backtracking recovery

mod segment;
mod spatial_pooler;
mod temporal_memory;

pub use segment::{DistalSynapse, Segment, DUTY_CYCLE_ALPHAS, DUTY_CYCLE_TIERS};
pub use spatial_pooler::{SpatialPooler, SpatialPoolerParams};
pub use temporal_memory::{
    BacktrackingTemporalMemory, OutputType, PredictionStats, TemporalMemoryParams,
};
