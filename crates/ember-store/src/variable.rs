//! Variable aggregate: one named tensor, its slots, and the access protocol
//!
//! A [`Variable`] owns the primary tensor for one shard of a trainable
//! parameter, the slicer describing which slice of the key space that is,
//! and a map of named slots holding optimizer state. Two reader-writer
//! locks guard it, always taken in the same order (variable, then slots)
//! and only ever in three combinations:
//!
//! | access            | variable lock | slots lock | permits                          |
//! |-------------------|---------------|------------|----------------------------------|
//! | read              | read          | read       | reading shape, contents, slots   |
//! | slot insert       | read          | write      | the above, plus new slots        |
//! | exclusive         | write         | write      | structural and content mutation  |
//!
//! The locks are private. Each combination is entered through a scoped
//! accessor (`with_read_access`, `with_slot_insert_access`,
//! `with_exclusive_access`) that hands the closure a view exposing exactly
//! the operations that state permits, so an unsound combination does not
//! compile. Access scopes must not be nested on the same variable; a
//! queued writer would deadlock the inner acquisition.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ember_tensor::{DType, Init, Shape, Tensor};

use crate::error::{StoreError, StoreResult};
use crate::slicer::RowSlicer;

/// Fallback growth quantum for variables built outside a store.
pub const DEFAULT_ROW_BLOCK: usize = 64;

/// How a slot's row dimension relates to its variable's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotJoiner {
    /// The slot's rows track the variable's row count in lockstep:
    /// growth and compaction of the variable propagate to the slot.
    VariableLike,
    /// The slot keeps a fixed shape of its own, independent of the
    /// variable's rows.
    AnyOne,
}

/// Auxiliary state attached to a variable, typically per-parameter
/// optimizer accumulators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    /// The slot's owned tensor.
    pub tensor: Tensor,
    /// Join policy tying the tensor's rows to the variable.
    pub joiner: SlotJoiner,
}

/// Slot name to slot. Iteration order carries no meaning.
pub type SlotMap = HashMap<String, Slot>;

/// Data and slicer travel together; they are only ever replaced as a pair.
#[derive(Debug)]
struct VariableCore {
    data: Tensor,
    slicer: RowSlicer,
}

/// Operation counters for one variable. All counters are monotonic.
#[derive(Debug, Default)]
pub struct VariableStats {
    slots_created: AtomicU64,
    reshapes: AtomicU64,
    rows_grown: AtomicU64,
    rows_removed: AtomicU64,
}

impl VariableStats {
    fn record_slot_created(&self) {
        self.slots_created.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reshape(&self, grown: usize) {
        self.reshapes.fetch_add(1, Ordering::Relaxed);
        self.rows_grown.fetch_add(grown as u64, Ordering::Relaxed);
    }

    fn record_clear(&self, removed: usize) {
        self.rows_removed.fetch_add(removed as u64, Ordering::Relaxed);
    }

    /// Slots created over the variable's lifetime.
    pub fn slots_created(&self) -> u64 {
        self.slots_created.load(Ordering::Relaxed)
    }

    /// Growth operations that actually grew rows.
    pub fn reshapes(&self) -> u64 {
        self.reshapes.load(Ordering::Relaxed)
    }

    /// Rows added by growth, summed over the primary tensor only.
    pub fn rows_grown(&self) -> u64 {
        self.rows_grown.load(Ordering::Relaxed)
    }

    /// Rows removed by compaction, primary tensor only.
    pub fn rows_removed(&self) -> u64 {
        self.rows_removed.load(Ordering::Relaxed)
    }
}

/// One shard's storage for a named trainable parameter.
///
/// See the [module documentation](self) for the access protocol. A
/// variable is cheap to share behind an `Arc`; all mutation goes through
/// the scoped accessors.
#[derive(Debug)]
pub struct Variable {
    name: String,
    real_inited: AtomicBool,
    row_block: usize,
    stats: VariableStats,
    // Lock order is core before slots, everywhere. The three accessors
    // below are the only code that touches either lock.
    core: RwLock<VariableCore>,
    slots: RwLock<SlotMap>,
}

impl Variable {
    /// Variable over an initial tensor and slicer, with an empty slot map
    /// and `real_inited` unset.
    pub fn new(data: Tensor, slicer: RowSlicer, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            real_inited: AtomicBool::new(false),
            row_block: DEFAULT_ROW_BLOCK,
            stats: VariableStats::default(),
            core: RwLock::new(VariableCore { data, slicer }),
            slots: RwLock::new(SlotMap::new()),
        }
    }

    /// Set the row growth quantum. Values below 1 are treated as 1.
    pub fn with_row_block(mut self, row_block: usize) -> Self {
        self.row_block = row_block.max(1);
        self
    }

    /// The variable's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Row growth quantum used by [`ExclusiveAccess::reshape_id`].
    pub fn row_block(&self) -> usize {
        self.row_block
    }

    /// Whether the payload has been populated with real values, as
    /// opposed to placeholder contents awaiting initialization.
    pub fn real_inited(&self) -> bool {
        self.real_inited.load(Ordering::Acquire)
    }

    /// Publish (or retract) the initialized flag.
    pub fn set_real_inited(&self, inited: bool) {
        self.real_inited.store(inited, Ordering::Release);
    }

    /// Operation counters.
    pub fn stats(&self) -> &VariableStats {
        &self.stats
    }

    /// Run `f` under read access: shape, contents and the slot map are
    /// all stable for the duration. Many threads may hold read access to
    /// the same variable at once.
    pub fn with_read_access<R>(&self, f: impl FnOnce(&ReadAccess<'_>) -> R) -> R {
        let core = self.core.read();
        let slots = self.slots.read();
        f(&ReadAccess { slots, core, name: &self.name })
    }

    /// Run `f` under slot-insert access: everything read access allows,
    /// plus creating slots. Shape and contents stay stable; concurrent
    /// readers are excluded only from the slot map itself.
    pub fn with_slot_insert_access<R>(
        &self,
        f: impl FnOnce(&mut SlotInsertAccess<'_>) -> R,
    ) -> R {
        let core = self.core.read();
        let slots = self.slots.write();
        let mut access = SlotInsertAccess {
            slots,
            core,
            name: &self.name,
            stats: &self.stats,
        };
        f(&mut access)
    }

    /// Run `f` under exclusive access: structural mutation of the payload
    /// and every slot. Taking the variable lock in write mode first means
    /// the slots lock is uncontended by the time it is acquired.
    pub fn with_exclusive_access<R>(
        &self,
        f: impl FnOnce(&mut ExclusiveAccess<'_>) -> R,
    ) -> R {
        let core = self.core.write();
        let slots = self.slots.write();
        let mut access = ExclusiveAccess {
            slots,
            core,
            name: &self.name,
            stats: &self.stats,
            row_block: self.row_block,
        };
        f(&mut access)
    }

    /// Deep-copy the payload into an independent variable with the same
    /// name, slicer and `real_inited` flag.
    ///
    /// The copy starts with an empty slot map; optimizer state attached
    /// to the original is not carried over. Callers that need the slots
    /// too should capture a [`crate::snapshot::VariableSnapshot`] instead.
    pub fn deep_clone(&self) -> Self {
        let copy = self.with_read_access(|access| {
            Self::new(
                access.core.data.clone(),
                access.core.slicer.clone(),
                self.name.clone(),
            )
        });
        let copy = copy.with_row_block(self.row_block);
        copy.set_real_inited(self.real_inited());
        debug!(variable = self.name.as_str(), "deep cloned without slots");
        copy
    }
}

fn find_slot<'a>(slots: &'a SlotMap, variable: &str, name: &str) -> StoreResult<&'a Tensor> {
    slots.get(name).map(|s| &s.tensor).ok_or_else(|| StoreError::SlotNotFound {
        variable: variable.to_string(),
        slot: name.to_string(),
    })
}

/// View over a variable under read access.
pub struct ReadAccess<'v> {
    // Declared before `core` so guards release in reverse acquisition order.
    slots: RwLockReadGuard<'v, SlotMap>,
    core: RwLockReadGuard<'v, VariableCore>,
    name: &'v str,
}

impl ReadAccess<'_> {
    /// The primary tensor.
    pub fn data(&self) -> &Tensor {
        &self.core.data
    }

    /// The shard's slicing descriptor.
    pub fn slicer(&self) -> &RowSlicer {
        &self.core.slicer
    }

    /// Current row count of the primary tensor.
    pub fn rows(&self) -> usize {
        self.core.data.rows()
    }

    /// Whether a slot with this name exists.
    pub fn has_slot(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// The slot with this name, if any.
    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.get(name)
    }

    /// The tensor of an existing slot. Never creates; absence is an
    /// error with no side effect.
    pub fn get_existing_slot(&self, name: &str) -> StoreResult<&Tensor> {
        find_slot(&self.slots, self.name, name)
    }

    /// The full slot map.
    pub fn slot_map(&self) -> &SlotMap {
        &self.slots
    }

    /// Names of all slots, in no particular order.
    pub fn slot_names(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }
}

/// Geometry handed to slot creators, plus factories producing well-formed
/// slots for each join policy.
pub struct SlotContext {
    rows: usize,
}

impl SlotContext {
    /// Current row count of the owning variable.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Build a row-tracking slot shaped `[rows, inner_shape...]`, so a
    /// scalar-per-row slot passes an empty `inner_shape`.
    pub fn variable_like(
        &self,
        dtype: DType,
        inner_shape: &[usize],
        init: Init,
    ) -> StoreResult<Slot> {
        let mut dims = Vec::with_capacity(inner_shape.len() + 1);
        dims.push(self.rows);
        dims.extend_from_slice(inner_shape);
        let tensor = Tensor::new(dtype, Shape::new(dims), init)?;
        Ok(Slot { tensor, joiner: SlotJoiner::VariableLike })
    }

    /// Build a fixed-shape slot of exactly `shape`.
    pub fn any_one(&self, dtype: DType, shape: &[usize], init: Init) -> StoreResult<Slot> {
        let tensor = Tensor::new(dtype, Shape::new(shape.to_vec()), init)?;
        Ok(Slot { tensor, joiner: SlotJoiner::AnyOne })
    }
}

/// View over a variable under slot-insert access.
pub struct SlotInsertAccess<'v> {
    slots: RwLockWriteGuard<'v, SlotMap>,
    core: RwLockReadGuard<'v, VariableCore>,
    name: &'v str,
    stats: &'v VariableStats,
}

impl SlotInsertAccess<'_> {
    /// The primary tensor.
    pub fn data(&self) -> &Tensor {
        &self.core.data
    }

    /// The shard's slicing descriptor.
    pub fn slicer(&self) -> &RowSlicer {
        &self.core.slicer
    }

    /// Current row count of the primary tensor.
    pub fn rows(&self) -> usize {
        self.core.data.rows()
    }

    /// Whether a slot with this name exists.
    pub fn has_slot(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// The tensor of an existing slot. Never creates.
    pub fn get_existing_slot(&self, name: &str) -> StoreResult<&Tensor> {
        find_slot(&self.slots, self.name, name)
    }

    /// The full slot map.
    pub fn slot_map(&self) -> &SlotMap {
        &self.slots
    }

    /// The tensor for `name`, creating the slot if absent.
    ///
    /// `creator` runs only on absence and must hand back a fully formed
    /// slot; a row-tracking slot has to arrive with the variable's current
    /// row count. Under contention exactly one creator runs; later callers
    /// observe the winner's slot and their creators are dropped unused.
    pub fn get_or_create_slot(
        &mut self,
        name: &str,
        creator: impl FnOnce(&SlotContext) -> StoreResult<Slot>,
    ) -> StoreResult<&Tensor> {
        use std::collections::hash_map::Entry;

        let rows = self.core.data.rows();
        match self.slots.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(&entry.into_mut().tensor),
            Entry::Vacant(entry) => {
                let slot = creator(&SlotContext { rows })?;
                if slot.joiner == SlotJoiner::VariableLike && slot.tensor.rows() != rows {
                    return Err(StoreError::SlotRowMismatch {
                        slot: name.to_string(),
                        expected: rows,
                        actual: slot.tensor.rows(),
                    });
                }
                self.stats.record_slot_created();
                debug!(
                    variable = self.name,
                    slot = name,
                    joiner = ?slot.joiner,
                    rows = slot.tensor.rows(),
                    "slot created"
                );
                Ok(&entry.insert(slot).tensor)
            }
        }
    }

    /// Lookup-or-create a row-tracking slot with one element per row.
    pub fn get_variable_like_slot(
        &mut self,
        name: &str,
        dtype: DType,
        init: impl FnOnce() -> Init,
    ) -> StoreResult<&Tensor> {
        self.get_or_create_slot(name, |ctx| ctx.variable_like(dtype, &[], init()))
    }

    /// Lookup-or-create a row-tracking slot with `inner_shape` per row.
    pub fn get_variable_like_slot_with_shape(
        &mut self,
        name: &str,
        dtype: DType,
        inner_shape: &[usize],
        init: impl FnOnce() -> Init,
    ) -> StoreResult<&Tensor> {
        self.get_or_create_slot(name, |ctx| ctx.variable_like(dtype, inner_shape, init()))
    }

    /// Lookup-or-create a fixed-shape slot of exactly `shape`.
    pub fn get_any_one_slot(
        &mut self,
        name: &str,
        dtype: DType,
        shape: &[usize],
        init: impl FnOnce() -> Init,
    ) -> StoreResult<&Tensor> {
        self.get_or_create_slot(name, |ctx| ctx.any_one(dtype, shape, init()))
    }
}

/// View over a variable under exclusive access.
pub struct ExclusiveAccess<'v> {
    slots: RwLockWriteGuard<'v, SlotMap>,
    core: RwLockWriteGuard<'v, VariableCore>,
    name: &'v str,
    stats: &'v VariableStats,
    row_block: usize,
}

impl ExclusiveAccess<'_> {
    /// The primary tensor.
    pub fn data(&self) -> &Tensor {
        &self.core.data
    }

    /// The shard's slicing descriptor.
    pub fn slicer(&self) -> &RowSlicer {
        &self.core.slicer
    }

    /// Current row count of the primary tensor.
    pub fn rows(&self) -> usize {
        self.core.data.rows()
    }

    /// Whether a slot with this name exists.
    pub fn has_slot(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// The tensor of an existing slot. Never creates.
    pub fn get_existing_slot(&self, name: &str) -> StoreResult<&Tensor> {
        find_slot(&self.slots, self.name, name)
    }

    /// The full slot map.
    pub fn slot_map(&self) -> &SlotMap {
        &self.slots
    }

    /// Mutable access to the primary tensor's contents.
    pub fn data_mut(&mut self) -> &mut Tensor {
        &mut self.core.data
    }

    /// Mutable access to an existing slot's tensor.
    pub fn slot_tensor_mut(&mut self, name: &str) -> StoreResult<&mut Tensor> {
        self.slots
            .get_mut(name)
            .map(|s| &mut s.tensor)
            .ok_or_else(|| StoreError::SlotNotFound {
                variable: self.name.to_string(),
                slot: name.to_string(),
            })
    }

    /// Replace data and slicer together, returning the previous pair.
    /// There is deliberately no way to replace one without the other.
    ///
    /// Row-tracking slots must already match the incoming row count;
    /// restore paths clear the slot map first (see
    /// [`ExclusiveAccess::take_slots`]) and reinstall slots afterwards.
    pub fn replace_payload(
        &mut self,
        data: Tensor,
        slicer: RowSlicer,
    ) -> StoreResult<(Tensor, RowSlicer)> {
        let rows = data.rows();
        for (name, slot) in self.slots.iter() {
            if slot.joiner == SlotJoiner::VariableLike && slot.tensor.rows() != rows {
                return Err(StoreError::SlotRowMismatch {
                    slot: name.clone(),
                    expected: rows,
                    actual: slot.tensor.rows(),
                });
            }
        }
        debug!(variable = self.name, rows, "payload replaced");
        let old_data = std::mem::replace(&mut self.core.data, data);
        let old_slicer = std::mem::replace(&mut self.core.slicer, slicer);
        Ok((old_data, old_slicer))
    }

    /// Make row `id` addressable, growing the primary tensor and every
    /// row-tracking slot to a common block-aligned row count.
    ///
    /// The target is `id + 1` rounded up to the row block, capped at the
    /// slicer's capacity. New rows are filled by each tensor's own
    /// initializer. On failure every tensor is restored to its previous
    /// row count before the error is returned; an id the slicer cannot
    /// address fails with [`StoreError::RowUnaddressable`] without
    /// touching anything.
    pub fn reshape_id(&mut self, id: usize) -> StoreResult<()> {
        if !self.core.slicer.can_address(id) {
            let limit = self.core.slicer.capacity().unwrap_or(usize::MAX);
            return Err(StoreError::RowUnaddressable { id, limit });
        }
        let rows = self.core.data.rows();
        if id < rows {
            return Ok(());
        }

        let mut target = round_up_rows(id.saturating_add(1), self.row_block);
        if let Some(capacity) = self.core.slicer.capacity() {
            target = target.min(capacity);
        }

        // The primary tensor grows first; on failure nothing has changed.
        self.core.data.try_grow_rows(target)?;

        let mut failure: Option<(String, StoreError)> = None;
        for (name, slot) in self.slots.iter_mut() {
            if slot.joiner != SlotJoiner::VariableLike {
                continue;
            }
            if let Err(err) = slot.tensor.try_grow_rows(target) {
                failure = Some((name.clone(), err.into()));
                break;
            }
        }

        if let Some((failed, err)) = failure {
            // Growth only appended rows, so truncating back to the old
            // row count is an exact restore. Tensors that never grew are
            // untouched by it.
            self.core.data.truncate_rows(rows);
            for slot in self.slots.values_mut() {
                if slot.joiner == SlotJoiner::VariableLike {
                    slot.tensor.truncate_rows(rows);
                }
            }
            warn!(
                variable = self.name,
                id,
                target,
                slot = failed.as_str(),
                "slot growth failed, rolled back"
            );
            return Err(err);
        }

        self.stats.record_reshape(target - rows);
        debug!(
            variable = self.name,
            id,
            old_rows = rows,
            new_rows = target,
            "rows grown"
        );
        Ok(())
    }

    /// Remove the given rows from the primary tensor and every
    /// row-tracking slot, compacting survivors in order.
    ///
    /// Ids at or beyond the current row count are ignored, duplicates
    /// count once, and an effectively empty request is a no-op. This
    /// operation cannot fail.
    pub fn clear_ids(&mut self, ids: &[usize]) {
        let rows = self.core.data.rows();
        let victims: BTreeSet<usize> = ids.iter().copied().filter(|&id| id < rows).collect();
        if victims.is_empty() {
            return;
        }

        self.core.data.remove_rows(&victims);
        for slot in self.slots.values_mut() {
            if slot.joiner == SlotJoiner::VariableLike {
                slot.tensor.remove_rows(&victims);
            }
        }

        self.stats.record_clear(victims.len());
        debug!(
            variable = self.name,
            removed = victims.len(),
            rows = self.core.data.rows(),
            "rows cleared"
        );
    }

    /// Replace the whole slot map, validating that every row-tracking
    /// slot matches the variable's current row count.
    pub fn set_slots(&mut self, slots: SlotMap) -> StoreResult<()> {
        let rows = self.core.data.rows();
        for (name, slot) in &slots {
            if slot.joiner == SlotJoiner::VariableLike && slot.tensor.rows() != rows {
                return Err(StoreError::SlotRowMismatch {
                    slot: name.clone(),
                    expected: rows,
                    actual: slot.tensor.rows(),
                });
            }
        }
        debug!(variable = self.name, slots = slots.len(), "slot map replaced");
        *self.slots = slots;
        Ok(())
    }

    /// Take the slot map out, leaving it empty.
    pub fn take_slots(&mut self) -> SlotMap {
        std::mem::take(&mut *self.slots)
    }
}

fn round_up_rows(wanted: usize, block: usize) -> usize {
    wanted.div_ceil(block).saturating_mul(block)
}
