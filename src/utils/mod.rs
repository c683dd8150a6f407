//! Utility modules for the HTM library.
//!
//! Random number generation and N-dimensional topology helpers used by both
//! engines.

mod random;
mod topology;

pub use random::Random;
pub use topology::{Neighborhood, Topology, WrappingMode};
