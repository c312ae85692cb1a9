//! Dense tensor primitives for the ember parameter shard store
//!
//! This crate holds the value layer the shard store is built on:
//!
//! - [`Tensor`]: an exclusively owned, row-major buffer with a typed
//!   element store, grown and compacted one row at a time
//! - [`Shape`]: dimension bookkeeping with the leading dimension treated
//!   as the row dimension
//! - [`Init`]: deterministic row initializers, seeded so that staged
//!   growth produces the same values as one-shot growth
//! - [`DType`]: the supported element types
//!
//! Nothing here ever allocates infallibly on a growth path: row growth
//! goes through `try_reserve` and checked size arithmetic, and reports
//! [`TensorError::AllocFailed`] instead of aborting.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dtype;
pub mod error;
pub mod init;
pub mod shape;
pub mod tensor;

pub use dtype::DType;
pub use error::{TensorError, TensorResult};
pub use init::Init;
pub use shape::Shape;
pub use tensor::{Element, Tensor, TensorBuf};
