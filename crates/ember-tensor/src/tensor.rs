//! Owned dense tensors with row-granular resizing
//!
//! A [`Tensor`] owns its buffer outright. The buffer is a typed enum
//! rather than raw bytes, so element access never depends on alignment
//! casts, and serde sees real values. Growth appends whole rows and runs
//! the tensor's initializer over them; compaction removes whole rows and
//! preserves the relative order of the survivors.

use std::collections::{BTreeSet, TryReserveError};
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::error::{TensorError, TensorResult};
use crate::init::Init;
use crate::shape::Shape;

/// Rust types usable as tensor elements.
pub trait Element:
    Sized + Copy + PartialEq + fmt::Debug + Send + Sync + 'static
{
    /// Tag for this element type.
    const DTYPE: DType;

    /// Cast from the f64 initializer domain.
    fn from_f64(value: f64) -> Self;

    /// Borrow the buffer's elements when it holds this element type.
    fn from_buf(buf: &TensorBuf) -> Option<&[Self]>;

    /// Mutably borrow the buffer's storage when it holds this element type.
    fn from_buf_mut(buf: &mut TensorBuf) -> Option<&mut Vec<Self>>;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            fn from_buf(buf: &TensorBuf) -> Option<&[Self]> {
                match buf {
                    TensorBuf::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn from_buf_mut(buf: &mut TensorBuf) -> Option<&mut Vec<Self>> {
                match buf {
                    TensorBuf::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(f32, DType::F32, F32);
impl_element!(f64, DType::F64, F64);
impl_element!(i32, DType::I32, I32);
impl_element!(i64, DType::I64, I64);

/// Type-erased element storage, one variant per supported element type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorBuf {
    /// f32 elements
    F32(Vec<f32>),
    /// f64 elements
    F64(Vec<f64>),
    /// i32 elements
    I32(Vec<i32>),
    /// i64 elements
    I64(Vec<i64>),
}

/// Run `$body` with `$v` bound to whichever vector the buffer holds.
macro_rules! for_each_buf {
    ($buf:expr, $v:ident => $body:expr) => {
        match $buf {
            TensorBuf::F32($v) => $body,
            TensorBuf::F64($v) => $body,
            TensorBuf::I32($v) => $body,
            TensorBuf::I64($v) => $body,
        }
    };
}

impl TensorBuf {
    /// Empty buffer for the given element type.
    pub fn empty(dtype: DType) -> Self {
        match dtype {
            DType::F32 => TensorBuf::F32(Vec::new()),
            DType::F64 => TensorBuf::F64(Vec::new()),
            DType::I32 => TensorBuf::I32(Vec::new()),
            DType::I64 => TensorBuf::I64(Vec::new()),
        }
    }

    /// Element type this buffer stores.
    pub fn dtype(&self) -> DType {
        match self {
            TensorBuf::F32(_) => DType::F32,
            TensorBuf::F64(_) => DType::F64,
            TensorBuf::I32(_) => DType::I32,
            TensorBuf::I64(_) => DType::I64,
        }
    }

    /// Element count.
    pub fn len(&self) -> usize {
        for_each_buf!(self, v => v.len())
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        for_each_buf!(self, v => v.try_reserve_exact(additional))
    }

    fn truncate(&mut self, len: usize) {
        for_each_buf!(self, v => v.truncate(len));
    }
}

/// An exclusively owned, dense, row-major tensor.
///
/// The leading dimension is the row dimension; growth and compaction are
/// row-granular and keep surviving rows in their relative order. The
/// initializer travels with the tensor and fills every row it ever gains,
/// so value-level behavior survives serialization and cloning. `Clone`
/// deep-copies the buffer. Deserialization rejects payloads whose buffer
/// length disagrees with the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TensorRepr")]
pub struct Tensor {
    shape: Shape,
    init: Init,
    buf: TensorBuf,
}

// Deserialization funnels through this mirror: a serialized form whose
// buffer length disagrees with its shape never becomes a `Tensor`. Every
// other construction path maintains that invariant itself.
#[derive(Deserialize)]
#[serde(rename = "Tensor")]
struct TensorRepr {
    shape: Shape,
    init: Init,
    buf: TensorBuf,
}

impl TryFrom<TensorRepr> for Tensor {
    type Error = TensorError;

    fn try_from(repr: TensorRepr) -> TensorResult<Self> {
        if repr.shape.checked_numel() != Some(repr.buf.len()) {
            return Err(TensorError::BufferShapeMismatch {
                len: repr.buf.len(),
                dims: repr.shape.dims().to_vec(),
            });
        }
        Ok(Self {
            shape: repr.shape,
            init: repr.init,
            buf: repr.buf,
        })
    }
}

impl Tensor {
    /// Allocate a tensor of `shape` with every row filled by `init`.
    pub fn new(dtype: DType, shape: Shape, init: Init) -> TensorResult<Self> {
        let numel = shape
            .checked_numel()
            .ok_or_else(|| alloc_failed(shape.rows(), "element count overflows usize"))?;
        let mut buf = TensorBuf::empty(dtype);
        buf.try_reserve(numel)
            .map_err(|e| alloc_failed(shape.rows(), e.to_string()))?;

        // Fill row by row so Uniform draws each row's own stream.
        let rows = if shape.rank() == 0 { 1 } else { shape.rows() };
        let per_row = shape.checked_row_elems().unwrap_or(0);
        for_each_buf!(&mut buf, v => grow_rows_typed(v, &init, 0..rows, per_row));

        Ok(Self { shape, init, buf })
    }

    /// Zero-filled tensor of `shape`.
    pub fn zeros(dtype: DType, shape: Shape) -> TensorResult<Self> {
        Self::new(dtype, shape, Init::Zeros)
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.buf.dtype()
    }

    /// Dimension extents.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Initializer applied to rows this tensor gains.
    pub fn init(&self) -> Init {
        self.init
    }

    /// Current row count.
    pub fn rows(&self) -> usize {
        self.shape.rows()
    }

    /// Elements per row.
    pub fn row_elems(&self) -> usize {
        self.shape.row_elems()
    }

    /// Total element count.
    pub fn numel(&self) -> usize {
        self.buf.len()
    }

    /// Payload size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.buf.len() * self.dtype().size_bytes()
    }

    /// Grow to `target_rows`, filling the new rows with the initializer.
    ///
    /// A target at or below the current row count is a no-op. On error the
    /// tensor is unchanged.
    pub fn try_grow_rows(&mut self, target_rows: usize) -> TensorResult<()> {
        if self.shape.rank() == 0 {
            return Err(TensorError::NoRowDimension);
        }
        let rows = self.shape.rows();
        if target_rows <= rows {
            return Ok(());
        }
        let per_row = self
            .shape
            .checked_row_elems()
            .ok_or_else(|| alloc_failed(target_rows, "row size overflows usize"))?;
        if per_row == 0 {
            // Zero-width rows carry no elements; only the shape moves.
            self.shape = self.shape.with_rows(target_rows);
            return Ok(());
        }
        let added = (target_rows - rows)
            .checked_mul(per_row)
            .ok_or_else(|| alloc_failed(target_rows, "element count overflows usize"))?;
        self.buf
            .len()
            .checked_add(added)
            .ok_or_else(|| alloc_failed(target_rows, "element count overflows usize"))?;
        self.buf
            .try_reserve(added)
            .map_err(|e| alloc_failed(target_rows, e.to_string()))?;

        for_each_buf!(&mut self.buf, v => {
            grow_rows_typed(v, &self.init, rows..target_rows, per_row)
        });
        self.shape = self.shape.with_rows(target_rows);
        Ok(())
    }

    /// Drop rows from the tail, keeping the first `rows`.
    ///
    /// No-op when the tensor already has `rows` rows or fewer, or has no
    /// row dimension.
    pub fn truncate_rows(&mut self, rows: usize) {
        if self.shape.rank() == 0 || rows >= self.shape.rows() {
            return;
        }
        self.buf.truncate(rows * self.shape.row_elems());
        self.shape = self.shape.with_rows(rows);
    }

    /// Remove the given rows, compacting the survivors in their relative
    /// order. Indexes at or beyond the current row count are ignored;
    /// rank-0 tensors are untouched.
    pub fn remove_rows(&mut self, ids: &BTreeSet<usize>) {
        if self.shape.rank() == 0 {
            return;
        }
        let rows = self.shape.rows();
        if ids.range(..rows).next().is_none() {
            return;
        }
        let per_row = self.shape.row_elems();
        let kept = for_each_buf!(&mut self.buf, v => {
            remove_rows_typed(v, per_row, rows, ids)
        });
        self.shape = self.shape.with_rows(kept);
    }

    /// Borrow the elements as a flat slice.
    pub fn as_slice<T: Element>(&self) -> TensorResult<&[T]> {
        T::from_buf(&self.buf).ok_or(TensorError::DtypeMismatch {
            requested: T::DTYPE,
            actual: self.dtype(),
        })
    }

    /// Mutably borrow the elements as a flat slice.
    pub fn as_mut_slice<T: Element>(&mut self) -> TensorResult<&mut [T]> {
        let actual = self.dtype();
        T::from_buf_mut(&mut self.buf)
            .map(Vec::as_mut_slice)
            .ok_or(TensorError::DtypeMismatch { requested: T::DTYPE, actual })
    }

    /// Borrow one row. A rank-0 tensor exposes its value as row 0.
    pub fn row<T: Element>(&self, row: usize) -> TensorResult<&[T]> {
        let rows = self.rows();
        if row >= rows {
            return Err(TensorError::RowOutOfBounds { row, rows });
        }
        let per_row = self.shape.row_elems();
        let slice = self.as_slice::<T>()?;
        Ok(&slice[row * per_row..(row + 1) * per_row])
    }

    /// Mutably borrow one row.
    pub fn row_mut<T: Element>(&mut self, row: usize) -> TensorResult<&mut [T]> {
        let rows = self.rows();
        if row >= rows {
            return Err(TensorError::RowOutOfBounds { row, rows });
        }
        let per_row = self.shape.row_elems();
        let slice = self.as_mut_slice::<T>()?;
        Ok(&mut slice[row * per_row..(row + 1) * per_row])
    }
}

fn alloc_failed(rows: usize, reason: impl Into<String>) -> TensorError {
    TensorError::AllocFailed { rows, reason: reason.into() }
}

fn grow_rows_typed<T: Element>(
    v: &mut Vec<T>,
    init: &Init,
    rows: Range<usize>,
    per_row: usize,
) {
    for row in rows {
        let start = v.len();
        v.resize(start + per_row, T::from_f64(0.0));
        init.fill_row(row, &mut v[start..]);
    }
}

fn remove_rows_typed<T: Copy>(
    v: &mut Vec<T>,
    per_row: usize,
    rows: usize,
    ids: &BTreeSet<usize>,
) -> usize {
    let mut write = 0usize;
    for row in 0..rows {
        if ids.contains(&row) {
            continue;
        }
        if write != row {
            let src = row * per_row;
            v.copy_within(src..src + per_row, write * per_row);
        }
        write += 1;
    }
    v.truncate(write * per_row);
    write
}
