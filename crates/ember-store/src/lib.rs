//! Per-shard variable and optimizer-slot storage for a distributed
//! parameter server
//!
//! A parameter server splits every trainable variable across shards by
//! key range. This crate is the storage layer one shard runs:
//!
//! - [`Variable`]: one shard's slice of a named parameter, owning the
//!   primary tensor, the [`RowSlicer`] describing the slice, and a map of
//!   named [`Slot`]s carrying optimizer state
//! - [`ShardStore`]: the registry owning every variable on the shard,
//!   handing them out behind `Arc`
//! - [`VariableSnapshot`]: deep, serializable copies for checkpointing
//!
//! # Access protocol
//!
//! Each variable is guarded by two reader-writer locks, taken in a fixed
//! order (variable, then slots) and only in three combinations:
//!
//! ```text
//!                 variable lock    slots lock
//! read                read            read       shape/content reads
//! slot insert         read            write      + slot creation
//! exclusive           write           write      structural mutation
//! ```
//!
//! The locks never escape. Callers enter a combination through a scoped
//! accessor and receive a view ([`ReadAccess`], [`SlotInsertAccess`],
//! [`ExclusiveAccess`]) exposing exactly what that state permits, so a
//! forbidden operation is a compile error rather than a race. Because the
//! order is fixed and the slots lock is only ever acquired with the
//! variable lock already held, the protocol cannot deadlock across
//! threads; the one rule left to callers is not to nest access scopes on
//! the same variable.
//!
//! # Example
//!
//! ```
//! use ember_store::{RowSlicer, ShardStore, StoreConfig};
//! use ember_tensor::{DType, Init, Shape, Tensor};
//!
//! fn main() -> ember_store::StoreResult<()> {
//!     let store = ShardStore::new(StoreConfig::default());
//!
//!     // A sparse embedding table: zero rows up front, 8 floats per row.
//!     let data = Tensor::new(DType::F32, Shape::new(vec![0, 8]), Init::Zeros)?;
//!     let emb = store.create_variable("emb", data, RowSlicer::unbounded())?;
//!
//!     // Optimizer state appears lazily, created exactly once.
//!     emb.with_slot_insert_access(|var| {
//!         var.get_variable_like_slot("momentum", DType::F32, || Init::Zeros)
//!             .map(|_| ())
//!     })?;
//!
//!     // Sparse updates grow the table on demand; row-tracking slots
//!     // follow in lockstep.
//!     emb.with_exclusive_access(|var| var.reshape_id(41))?;
//!     emb.with_read_access(|var| {
//!         let momentum = var.get_existing_slot("momentum")?;
//!         assert_eq!(var.rows(), momentum.rows());
//!         Ok(())
//!     })
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod registry;
pub mod slicer;
pub mod snapshot;
pub mod variable;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use registry::{ShardStats, ShardStore};
pub use slicer::RowSlicer;
pub use snapshot::{SlotRecord, VariableSnapshot};
pub use variable::{
    DEFAULT_ROW_BLOCK, ExclusiveAccess, ReadAccess, Slot, SlotContext, SlotInsertAccess,
    SlotJoiner, SlotMap, Variable, VariableStats,
};
