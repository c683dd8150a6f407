//! # Veles - Hierarchical Temporal Memory core in Rust
//!
//! Veles implements the two algorithms at the heart of Hierarchical Temporal
//! Memory (HTM): the Spatial Pooler and the backtracking Temporal Memory.
//!
//! ## Overview
//!
//! HTM models a patch of neocortex as columns of cells with modifiable
//! synapses. The two engines in this crate are:
//!
//! - **Spatial Pooler**: turns an input bit vector into a sparse set of
//!   active columns via columnar competition, with boosting and duty cycles
//!   keeping all columns in play.
//! - **Backtracking Temporal Memory**: learns sequences over the active
//!   columns, predicts the next input, and replays recent input history to
//!   recover sequence context after a miss.
//!
//! Data flows encoder -> `SpatialPooler::compute` -> active columns ->
//! `BacktrackingTemporalMemory::compute` -> active/predicted cell state.
//! Encoders, classifiers and anomaly scoring are downstream collaborators
//! and live outside this crate.
//!
//! ## Quick Start
//!
//! ```rust
//! use veles::prelude::*;
//!
//! let mut sp = SpatialPooler::new(SpatialPoolerParams {
//!     input_dimensions: vec![100],
//!     column_dimensions: vec![256],
//!     ..Default::default()
//! }).unwrap();
//!
//! let mut tm = BacktrackingTemporalMemory::new(TemporalMemoryParams {
//!     num_columns: 256,
//!     cells_per_column: 8,
//!     ..Default::default()
//! }).unwrap();
//!
//! let mut input = Sdr::new(&[100]);
//! let mut columns = Sdr::new(&[256]);
//! input.set_sparse(&[1, 5, 10, 20, 30]).unwrap();
//!
//! sp.compute(&input, true, &mut columns);
//! let output = tm.compute(&columns, true, true);
//! assert_eq!(output.size(), 256 * 8);
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): serialization/deserialization support for checkpointing

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]

pub mod types;
pub mod algorithms;
pub mod utils;

#[cfg(feature = "serde")]
pub mod serialization;

/// Re-export of commonly used types and traits for convenience.
pub mod prelude {
    pub use crate::types::{
        CellIdx, Permanence, Real, Sdr, UInt, EPSILON, MAX_PERMANENCE, MIN_PERMANENCE,
    };
    pub use crate::algorithms::{
        BacktrackingTemporalMemory, DistalSynapse, OutputType, PredictionStats, Segment,
        SpatialPooler, SpatialPoolerParams, TemporalMemoryParams,
    };
    pub use crate::utils::{Random, Topology, WrappingMode};

    #[cfg(feature = "serde")]
    pub use crate::serialization::{Serializable, SerializableFormat};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library.
pub mod error {
    use thiserror::Error;

    /// Main error type for veles operations.
    #[derive(Error, Debug)]
    pub enum VelesError {
        /// Invalid dimensions provided.
        #[error("Invalid dimensions: {0}")]
        InvalidDimensions(String),

        /// Invalid parameter value.
        #[error("Invalid parameter '{name}': {message}")]
        InvalidParameter {
            /// Name of the invalid parameter.
            name: &'static str,
            /// Description of the error.
            message: String,
        },

        /// Index out of bounds.
        #[error("Index {index} out of bounds (size: {size})")]
        IndexOutOfBounds {
            /// The invalid index.
            index: usize,
            /// The valid size.
            size: usize,
        },

        /// Dimension mismatch between SDRs or other structures.
        #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
        DimensionMismatch {
            /// Expected dimensions.
            expected: Vec<u32>,
            /// Actual dimensions.
            actual: Vec<u32>,
        },

        /// SDR data is invalid (e.g., unsorted sparse indices).
        #[error("Invalid SDR data: {0}")]
        InvalidSdrData(String),

        /// Serialization error.
        #[cfg(feature = "serde")]
        #[error("Serialization error: {message}")]
        SerializationError {
            /// Description of the serialization error.
            message: String,
        },

        /// I/O error.
        #[error("I/O error: {message}")]
        IoError {
            /// Description of the I/O error.
            message: String,
        },
    }

    /// Result type alias using VelesError.
    pub type Result<T> = std::result::Result<T, VelesError>;
}

pub use error::{Result, VelesError};
