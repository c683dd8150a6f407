//! Sparse Distributed Representation (SDR) implementation.
//!
//! An SDR is a group of boolean values of which typically only a small
//! fraction are active. The sparse form (a sorted list of active indices) is
//! canonical here; the dense form is materialized on demand. Both engines
//! exchange SDRs: the Spatial Pooler consumes an encoder SDR and emits an
//! active-column SDR, which the Temporal Memory consumes as bottom-up input.

use crate::error::{Result, VelesError};
use crate::types::{ElemDense, ElemSparse, Real, UInt};
use crate::utils::Random;

use std::fmt;

/// Type alias for dense SDR data (array of bytes, 0 or 1).
pub type SdrDense = Vec<ElemDense>;

/// Type alias for sparse SDR data (sorted indices of active bits).
pub type SdrSparse = Vec<ElemSparse>;

/// Sparse Distributed Representation.
///
/// # Example
///
/// ```rust
/// use veles::types::Sdr;
///
/// let mut sdr = Sdr::new(&[10, 10]);
/// sdr.set_sparse(&[1, 4, 8, 15, 42]).unwrap();
/// assert_eq!(sdr.get_sum(), 5);
/// assert_eq!(sdr.get_dense().len(), 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sdr {
    dimensions: Vec<UInt>,
    size: usize,
    sparse: SdrSparse,
}

impl Sdr {
    /// Creates a new SDR with the given dimensions, initialized to all zeros.
    ///
    /// # Panics
    ///
    /// Panics if `dimensions` is empty.
    pub fn new(dimensions: &[UInt]) -> Self {
        assert!(!dimensions.is_empty(), "SDR dimensions cannot be empty");
        let size = dimensions.iter().map(|&d| d as usize).product();
        Self {
            dimensions: dimensions.to_vec(),
            size,
            sparse: Vec::new(),
        }
    }

    /// Returns the dimensions of this SDR.
    pub fn dimensions(&self) -> &[UInt] {
        &self.dimensions
    }

    /// Returns the total number of bits.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Clears all bits.
    pub fn zero(&mut self) {
        self.sparse.clear();
    }

    /// Sets the active bits from sparse indices.
    ///
    /// Indices are sorted and deduplicated internally. Out-of-range indices
    /// yield [`VelesError::InvalidSdrData`].
    pub fn set_sparse(&mut self, indices: &[ElemSparse]) -> Result<()> {
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= self.size) {
            return Err(VelesError::InvalidSdrData(format!(
                "index {} out of range for SDR of size {}",
                bad, self.size
            )));
        }
        let mut sparse = indices.to_vec();
        sparse.sort_unstable();
        sparse.dedup();
        self.sparse = sparse;
        Ok(())
    }

    /// Sets the active bits from sparse indices without validation.
    ///
    /// The caller must guarantee indices are sorted, unique and in range.
    pub fn set_sparse_unchecked(&mut self, indices: SdrSparse) {
        debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        debug_assert!(indices.last().map_or(true, |&i| (i as usize) < self.size));
        self.sparse = indices;
    }

    /// Returns the sorted indices of active bits.
    pub fn get_sparse(&self) -> &[ElemSparse] {
        &self.sparse
    }

    /// Sets the bits from a dense byte array (non-zero means active).
    pub fn set_dense(&mut self, data: &[ElemDense]) -> Result<()> {
        if data.len() != self.size {
            return Err(VelesError::InvalidSdrData(format!(
                "dense data length {} does not match SDR size {}",
                data.len(),
                self.size
            )));
        }
        self.sparse = data
            .iter()
            .enumerate()
            .filter(|(_, &v)| v != 0)
            .map(|(i, _)| i as ElemSparse)
            .collect();
        Ok(())
    }

    /// Materializes the dense representation.
    pub fn get_dense(&self) -> SdrDense {
        let mut dense = vec![0; self.size];
        for &i in &self.sparse {
            dense[i as usize] = 1;
        }
        dense
    }

    /// Returns whether the bit at the given flat index is active.
    pub fn contains(&self, index: ElemSparse) -> bool {
        self.sparse.binary_search(&index).is_ok()
    }

    /// Returns the number of active bits.
    pub fn get_sum(&self) -> usize {
        self.sparse.len()
    }

    /// Returns the fraction of active bits.
    pub fn get_sparsity(&self) -> Real {
        if self.size == 0 {
            return 0.0;
        }
        self.sparse.len() as Real / self.size as Real
    }

    /// Returns the number of active bits shared with another SDR.
    ///
    /// # Panics
    ///
    /// Panics if the SDRs have different sizes.
    pub fn get_overlap(&self, other: &Sdr) -> usize {
        assert_eq!(self.size, other.size, "SDR sizes must match for overlap");
        let mut overlap = 0;
        let mut a = self.sparse.iter().peekable();
        let mut b = other.sparse.iter().peekable();
        while let (Some(&&x), Some(&&y)) = (a.peek(), b.peek()) {
            match x.cmp(&y) {
                std::cmp::Ordering::Less => {
                    a.next();
                }
                std::cmp::Ordering::Greater => {
                    b.next();
                }
                std::cmp::Ordering::Equal => {
                    overlap += 1;
                    a.next();
                    b.next();
                }
            }
        }
        overlap
    }

    /// Randomizes the SDR to the given sparsity.
    pub fn randomize(&mut self, sparsity: Real, rng: &mut Random) {
        let num_active = (sparsity * self.size as Real).round() as usize;
        let mut indices: Vec<ElemSparse> = rng
            .sample_indices(self.size, num_active)
            .into_iter()
            .map(|i| i as ElemSparse)
            .collect();
        indices.sort_unstable();
        self.sparse = indices;
    }
}

impl fmt::Display for Sdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SDR({:?}) {:?}", self.dimensions, self.sparse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sdr_is_empty() {
        let sdr = Sdr::new(&[10, 10]);
        assert_eq!(sdr.size(), 100);
        assert_eq!(sdr.get_sum(), 0);
        assert_eq!(sdr.get_sparsity(), 0.0);
    }

    #[test]
    fn test_set_sparse_sorts_and_dedups() {
        let mut sdr = Sdr::new(&[20]);
        sdr.set_sparse(&[5, 1, 5, 3]).unwrap();
        assert_eq!(sdr.get_sparse(), &[1, 3, 5]);
    }

    #[test]
    fn test_set_sparse_out_of_range() {
        let mut sdr = Sdr::new(&[10]);
        assert!(sdr.set_sparse(&[10]).is_err());
    }

    #[test]
    fn test_dense_round_trip() {
        let mut sdr = Sdr::new(&[8]);
        sdr.set_dense(&[0, 1, 0, 0, 1, 0, 0, 1]).unwrap();
        assert_eq!(sdr.get_sparse(), &[1, 4, 7]);
        assert_eq!(sdr.get_dense(), vec![0, 1, 0, 0, 1, 0, 0, 1]);
    }

    #[test]
    fn test_overlap() {
        let mut a = Sdr::new(&[50]);
        let mut b = Sdr::new(&[50]);
        a.set_sparse(&[1, 2, 3, 4]).unwrap();
        b.set_sparse(&[3, 4, 5, 6]).unwrap();
        assert_eq!(a.get_overlap(&b), 2);
    }

    #[test]
    fn test_randomize_hits_target_sparsity() {
        let mut sdr = Sdr::new(&[1000]);
        let mut rng = Random::new(42);
        sdr.randomize(0.1, &mut rng);
        assert_eq!(sdr.get_sum(), 100);
        // Sorted and unique.
        assert!(sdr.get_sparse().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_contains() {
        let mut sdr = Sdr::new(&[10]);
        sdr.set_sparse(&[2, 7]).unwrap();
        assert!(sdr.contains(2));
        assert!(!sdr.contains(3));
    }
}
