//! Error types for the shard store

use ember_tensor::TensorError;
use thiserror::Error;

/// Shard store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Slot lookup for a name that was never created.
    #[error("slot '{slot}' not found on variable '{variable}'")]
    SlotNotFound {
        /// Owning variable
        variable: String,
        /// Requested slot name
        slot: String,
    },

    /// Variable lookup for a name that is not registered.
    #[error("variable '{0}' not found")]
    VariableNotFound(String),

    /// Variable registration over a name that already exists.
    #[error("variable '{0}' already exists")]
    VariableExists(String),

    /// Row id beyond what this shard's slicer can address.
    #[error("row {id} not addressable: shard addresses {limit} rows")]
    RowUnaddressable {
        /// The offending row id
        id: usize,
        /// Rows this shard can address
        limit: usize,
    },

    /// Row-tracking slot whose row count disagrees with its variable.
    #[error("slot '{slot}' has {actual} rows, variable has {expected}")]
    SlotRowMismatch {
        /// The offending slot name
        slot: String,
        /// Row count the variable currently has
        expected: usize,
        /// Row count the slot tensor arrived with
        actual: usize,
    },

    /// Registry is at its configured variable cap.
    #[error("variable limit reached ({limit})")]
    VariableLimit {
        /// Configured maximum
        limit: usize,
    },

    /// Failure in the tensor layer, typically allocation or typed access.
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Result type for shard store operations.
pub type StoreResult<T> = Result<T, StoreError>;
