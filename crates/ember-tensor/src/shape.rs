//! Tensor shapes
//!
//! The leading dimension is the row dimension. Sparse variables address
//! storage row by row, so most operations here are phrased in terms of
//! `rows` (the leading extent) and `row_elems` (elements per row).

use serde::{Deserialize, Serialize};

/// Dimension extents of a tensor, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Shape with the given extents. Zero extents are allowed; a sparse
    /// variable usually starts life as `[0, width]`.
    pub fn new(dims: Vec<usize>) -> Self {
        Self(dims)
    }

    /// The rank-0 shape of a scalar.
    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    /// Dimension extents, outermost first.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Extent of the row dimension. A scalar counts as one row.
    pub fn rows(&self) -> usize {
        self.0.first().copied().unwrap_or(1)
    }

    /// Elements per row, i.e. the product of all non-leading extents.
    ///
    /// Valid on shapes of materialized tensors; construction has already
    /// checked the product for overflow. For untrusted shapes use
    /// [`Shape::checked_row_elems`].
    pub fn row_elems(&self) -> usize {
        self.0.iter().skip(1).product()
    }

    /// Elements per row, or `None` if the product overflows.
    pub fn checked_row_elems(&self) -> Option<usize> {
        self.0
            .iter()
            .skip(1)
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Total element count.
    ///
    /// Valid on shapes of materialized tensors, like [`Shape::row_elems`].
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    /// Total element count, or `None` if the product overflows.
    pub fn checked_numel(&self) -> Option<usize> {
        self.0
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// This shape with the row extent replaced. A scalar becomes rank 1.
    pub fn with_rows(&self, rows: usize) -> Self {
        let mut dims = self.0.clone();
        if dims.is_empty() {
            dims.push(rows);
        } else {
            dims[0] = rows;
        }
        Self(dims)
    }
}
