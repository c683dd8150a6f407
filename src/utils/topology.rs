//! N-dimensional topology utilities.
//!
//! The Spatial Pooler's input and column spaces are N-dimensional grids.
//! This module converts between flat indices and coordinates, enumerates
//! neighborhoods within a radius (wrapping or clipped), and maps columns to
//! their receptive-field centers in the input space.

use crate::types::UInt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How neighborhoods behave at the edges of the space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WrappingMode {
    /// The space behaves like a torus.
    Wrap,
    /// Neighborhoods are clipped at the boundaries.
    NoWrap,
}

/// Static helpers for N-dimensional index math.
#[derive(Debug)]
pub struct Topology;

impl Topology {
    /// Returns the total number of elements in a space.
    pub fn num_elements(dimensions: &[UInt]) -> usize {
        dimensions.iter().map(|&d| d as usize).product()
    }

    /// Converts a flat index into coordinates (row-major order).
    pub fn index_to_coordinates(index: usize, dimensions: &[UInt]) -> Vec<UInt> {
        let mut coords = vec![0; dimensions.len()];
        let mut remainder = index;
        for (i, &dim) in dimensions.iter().enumerate().rev() {
            coords[i] = (remainder % dim as usize) as UInt;
            remainder /= dim as usize;
        }
        coords
    }

    /// Converts coordinates into a flat index (row-major order).
    pub fn coordinates_to_index(coordinates: &[UInt], dimensions: &[UInt]) -> usize {
        let mut index = 0;
        for (&coord, &dim) in coordinates.iter().zip(dimensions) {
            debug_assert!(coord < dim);
            index = index * dim as usize + coord as usize;
        }
        index
    }

    /// Returns all flat indices within `radius` of `center`, including the
    /// center itself, in ascending coordinate order.
    pub fn neighborhood(
        center: usize,
        dimensions: &[UInt],
        radius: UInt,
        wrapping: WrappingMode,
    ) -> Vec<usize> {
        let center_coords = Self::index_to_coordinates(center, dimensions);
        let radius = radius as i64;

        // Per-dimension candidate coordinates around the center.
        let mut axes: Vec<Vec<UInt>> = Vec::with_capacity(dimensions.len());
        for (&c, &dim) in center_coords.iter().zip(dimensions) {
            let c = c as i64;
            let dim = dim as i64;
            let mut axis = Vec::new();
            match wrapping {
                WrappingMode::Wrap => {
                    if 2 * radius + 1 >= dim {
                        axis.extend(0..dim as UInt);
                    } else {
                        for offset in -radius..=radius {
                            axis.push((c + offset).rem_euclid(dim) as UInt);
                        }
                        axis.sort_unstable();
                    }
                }
                WrappingMode::NoWrap => {
                    let low = (c - radius).max(0);
                    let high = (c + radius).min(dim - 1);
                    axis.extend((low..=high).map(|v| v as UInt));
                }
            }
            axes.push(axis);
        }

        // Cartesian product of the per-dimension axes.
        let mut result = Vec::with_capacity(axes.iter().map(Vec::len).product());
        let mut cursor = vec![0usize; axes.len()];
        loop {
            let coords: Vec<UInt> = cursor.iter().zip(&axes).map(|(&i, axis)| axis[i]).collect();
            result.push(Self::coordinates_to_index(&coords, dimensions));

            let mut dim = axes.len();
            loop {
                if dim == 0 {
                    return result;
                }
                dim -= 1;
                cursor[dim] += 1;
                if cursor[dim] < axes[dim].len() {
                    break;
                }
                cursor[dim] = 0;
            }
        }
    }

    /// Maps a column to the input index at the center of its receptive field.
    ///
    /// Columns are spread proportionally over the input space, offset by half
    /// a stride for even coverage.
    pub fn map_column_to_input(
        column: usize,
        column_dimensions: &[UInt],
        input_dimensions: &[UInt],
    ) -> usize {
        let column_coords = Self::index_to_coordinates(column, column_dimensions);
        let input_coords: Vec<UInt> = column_coords
            .iter()
            .zip(column_dimensions)
            .zip(input_dimensions)
            .map(|((&coord, &col_dim), &in_dim)| {
                let ratio = coord as f64 / col_dim as f64;
                let center = (in_dim as f64 * ratio) + (in_dim as f64 / col_dim as f64) * 0.5;
                (center as UInt).min(in_dim - 1)
            })
            .collect();
        Self::coordinates_to_index(&input_coords, input_dimensions)
    }
}

/// Precomputed neighbor lists for every element of a space.
///
/// Local inhibition consults each column's neighborhood every compute cycle;
/// recomputing those from scratch would dominate the run time, so the lists
/// are cached and rebuilt only when the inhibition radius changes.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Neighborhood {
    neighbors: Vec<Vec<usize>>,
}

impl Neighborhood {
    /// Creates an empty neighborhood cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the neighbor list for every element of the space.
    ///
    /// The center element itself is excluded from its own list.
    pub fn compute_all(dimensions: &[UInt], radius: UInt, wrapping: WrappingMode) -> Self {
        let num = Topology::num_elements(dimensions);
        let neighbors = (0..num)
            .map(|center| {
                Topology::neighborhood(center, dimensions, radius, wrapping)
                    .into_iter()
                    .filter(|&n| n != center)
                    .collect()
            })
            .collect();
        Self { neighbors }
    }

    /// Returns the neighbor list for an element.
    pub fn get(&self, element: usize) -> Option<&Vec<usize>> {
        self.neighbors.get(element)
    }

    /// Returns the number of cached elements.
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Returns whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_coordinate_round_trip() {
        let dims = vec![4, 5, 6];
        for index in 0..Topology::num_elements(&dims) {
            let coords = Topology::index_to_coordinates(index, &dims);
            assert_eq!(Topology::coordinates_to_index(&coords, &dims), index);
        }
    }

    #[test]
    fn test_neighborhood_1d_no_wrap() {
        let hood = Topology::neighborhood(1, &[10], 2, WrappingMode::NoWrap);
        assert_eq!(hood, vec![0, 1, 2, 3]);

        let hood = Topology::neighborhood(9, &[10], 2, WrappingMode::NoWrap);
        assert_eq!(hood, vec![7, 8, 9]);
    }

    #[test]
    fn test_neighborhood_1d_wrap() {
        let mut hood = Topology::neighborhood(0, &[10], 1, WrappingMode::Wrap);
        hood.sort_unstable();
        assert_eq!(hood, vec![0, 1, 9]);
    }

    #[test]
    fn test_neighborhood_radius_covers_space() {
        let hood = Topology::neighborhood(3, &[8], 10, WrappingMode::Wrap);
        assert_eq!(hood.len(), 8);
    }

    #[test]
    fn test_neighborhood_2d() {
        // Center of a 5x5 grid, radius 1: 3x3 block.
        let hood = Topology::neighborhood(12, &[5, 5], 1, WrappingMode::NoWrap);
        assert_eq!(hood, vec![6, 7, 8, 11, 12, 13, 16, 17, 18]);
    }

    #[test]
    fn test_map_column_to_input() {
        // 4 columns over 12 inputs: centers at 1, 4, 7, 10.
        assert_eq!(Topology::map_column_to_input(0, &[4], &[12]), 1);
        assert_eq!(Topology::map_column_to_input(1, &[4], &[12]), 4);
        assert_eq!(Topology::map_column_to_input(2, &[4], &[12]), 7);
        assert_eq!(Topology::map_column_to_input(3, &[4], &[12]), 10);
    }

    #[test]
    fn test_neighborhood_cache_excludes_center() {
        let hood = Neighborhood::compute_all(&[10], 2, WrappingMode::NoWrap);
        assert_eq!(hood.len(), 10);
        assert!(!hood.get(5).unwrap().contains(&5));
        assert_eq!(hood.get(5).unwrap().len(), 4);
    }
}
