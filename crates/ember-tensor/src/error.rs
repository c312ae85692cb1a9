//! Error types for tensor primitives

use thiserror::Error;

use crate::dtype::DType;

/// Tensor primitive errors.
#[derive(Debug, Error)]
pub enum TensorError {
    /// Typed access with an element type the tensor does not hold.
    #[error("dtype mismatch: requested {requested}, tensor holds {actual}")]
    DtypeMismatch {
        /// Element type the caller asked for
        requested: DType,
        /// Element type the tensor stores
        actual: DType,
    },

    /// Row index outside the tensor's current row count.
    #[error("row {row} out of bounds for tensor with {rows} rows")]
    RowOutOfBounds {
        /// The offending row index
        row: usize,
        /// Rows the tensor currently has
        rows: usize,
    },

    /// Row operation on a tensor whose shape has no row dimension.
    #[error("tensor of rank 0 has no row dimension")]
    NoRowDimension,

    /// Deserialized buffer whose element count disagrees with its shape.
    #[error("buffer of {len} elements does not match shape {dims:?}")]
    BufferShapeMismatch {
        /// Elements the buffer actually holds
        len: usize,
        /// Dimension extents that arrived with the buffer
        dims: Vec<usize>,
    },

    /// Buffer growth failed, either in the allocator or because the
    /// requested size does not fit in memory arithmetic.
    #[error("growing tensor to {rows} rows failed: {reason}")]
    AllocFailed {
        /// Row count the tensor was being grown to
        rows: usize,
        /// Allocator or overflow detail
        reason: String,
    },
}

/// Result type for tensor operations.
pub type TensorResult<T> = Result<T, TensorError>;
