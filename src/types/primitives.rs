//! Primitive type definitions for HTM algorithms.
//!
//! Type aliases keep the algorithm code close to the HTM literature while
//! leaving one place to change numeric widths.

/// Default unsigned integer type.
pub type UInt = u32;

/// Default floating point type.
pub type Real = f32;

/// Index type for cells (and columns, which are cell groups).
pub type CellIdx = u32;

/// Synapse permanence value.
pub type Permanence = Real;

/// Minimum permanence value.
pub const MIN_PERMANENCE: Permanence = 0.0;

/// Maximum permanence value.
pub const MAX_PERMANENCE: Permanence = 1.0;

/// Epsilon for floating point comparisons and deterministic tie-breaking.
pub const EPSILON: Real = 1e-6;

/// Element type for dense SDR representation.
pub type ElemDense = u8;

/// Element type for sparse SDR representation (indices).
pub type ElemSparse = UInt;
