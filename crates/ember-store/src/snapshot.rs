//! Point-in-time copies of variables for save and restore
//!
//! A [`VariableSnapshot`] is a plain-data deep copy: payload, slicer,
//! the `real_inited` flag and every slot, all serde-serializable. It is
//! the intended way to move a variable with its optimizer state, since
//! [`crate::variable::Variable::deep_clone`] deliberately leaves slots
//! behind.

use serde::{Deserialize, Serialize};
use tracing::debug;

use ember_tensor::Tensor;

use crate::error::{StoreError, StoreResult};
use crate::slicer::RowSlicer;
use crate::variable::{Slot, SlotJoiner, SlotMap, Variable};

/// One slot captured by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRecord {
    /// Slot name within its variable.
    pub name: String,
    /// Join policy the slot was created with.
    pub joiner: SlotJoiner,
    /// Deep copy of the slot's tensor.
    pub tensor: Tensor,
}

/// Deep copy of one variable at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSnapshot {
    /// The variable's name.
    pub name: String,
    /// Whether the payload held real values when captured.
    pub real_inited: bool,
    /// Deep copy of the primary tensor.
    pub data: Tensor,
    /// The slicing descriptor.
    pub slicer: RowSlicer,
    /// Every slot, sorted by name for stable output.
    pub slots: Vec<SlotRecord>,
}

impl VariableSnapshot {
    /// Capture a variable under read access.
    pub fn capture(variable: &Variable) -> Self {
        let snapshot = variable.with_read_access(|access| {
            let mut slots: Vec<SlotRecord> = access
                .slot_map()
                .iter()
                .map(|(name, slot)| SlotRecord {
                    name: name.clone(),
                    joiner: slot.joiner,
                    tensor: slot.tensor.clone(),
                })
                .collect();
            slots.sort_by(|a, b| a.name.cmp(&b.name));
            Self {
                name: variable.name().to_string(),
                real_inited: variable.real_inited(),
                data: access.data().clone(),
                slicer: access.slicer().clone(),
                slots,
            }
        });
        debug!(
            variable = snapshot.name.as_str(),
            slots = snapshot.slots.len(),
            rows = snapshot.data.rows(),
            "variable captured"
        );
        snapshot
    }

    /// Check the snapshot's internal coherence: every row-tracking slot
    /// record must agree with the payload's row count.
    ///
    /// Both restore paths run this before touching any variable, so a bad
    /// snapshot (deserialized from elsewhere, or edited through the public
    /// fields) fails up front rather than partway through application.
    pub fn validate(&self) -> StoreResult<()> {
        let rows = self.data.rows();
        for record in &self.slots {
            if record.joiner == SlotJoiner::VariableLike && record.tensor.rows() != rows {
                return Err(StoreError::SlotRowMismatch {
                    slot: record.name.clone(),
                    expected: rows,
                    actual: record.tensor.rows(),
                });
            }
        }
        Ok(())
    }

    /// Rebuild the slot map this snapshot captured.
    pub fn slot_map(&self) -> SlotMap {
        self.slots
            .iter()
            .map(|record| {
                let slot = Slot {
                    tensor: record.tensor.clone(),
                    joiner: record.joiner,
                };
                (record.name.clone(), slot)
            })
            .collect()
    }

    /// Materialize a fresh variable from this snapshot.
    pub fn restore(&self, row_block: usize) -> StoreResult<Variable> {
        self.validate()?;
        let variable = Variable::new(self.data.clone(), self.slicer.clone(), self.name.clone())
            .with_row_block(row_block);
        variable.with_exclusive_access(|access| access.set_slots(self.slot_map()))?;
        variable.set_real_inited(self.real_inited);
        Ok(variable)
    }

    /// Overwrite an existing variable in place: payload, slots and the
    /// initialized flag all come from the snapshot.
    ///
    /// An incoherent snapshot is rejected by [`VariableSnapshot::validate`]
    /// before the variable is touched; on error the variable is exactly as
    /// it was.
    pub fn apply_to(&self, variable: &Variable) -> StoreResult<()> {
        self.validate()?;
        variable.with_exclusive_access(|access| -> StoreResult<()> {
            access.take_slots();
            access.replace_payload(self.data.clone(), self.slicer.clone())?;
            access.set_slots(self.slot_map())
        })?;
        variable.set_real_inited(self.real_inited);
        debug!(variable = self.name.as_str(), "snapshot applied");
        Ok(())
    }
}
