//! Shard-level variable registry
//!
//! One [`ShardStore`] owns every variable a shard holds. Variables hand
//! out as `Arc`s, so server threads can keep working against a variable
//! while the registry is queried or grown concurrently; removal drops the
//! registry's reference and the variable dies with its last holder.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use ember_tensor::Tensor;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::slicer::RowSlicer;
use crate::snapshot::VariableSnapshot;
use crate::variable::Variable;

/// Registry counters. All counters are monotonic.
#[derive(Debug, Default)]
pub struct ShardStats {
    variables_created: AtomicU64,
    variables_removed: AtomicU64,
    snapshots_taken: AtomicU64,
}

impl ShardStats {
    fn record_created(&self) {
        self.variables_created.fetch_add(1, Ordering::Relaxed);
    }

    fn record_removed(&self, count: u64) {
        self.variables_removed.fetch_add(count, Ordering::Relaxed);
    }

    fn record_snapshot(&self) {
        self.snapshots_taken.fetch_add(1, Ordering::Relaxed);
    }

    /// Variables created over the shard's lifetime.
    pub fn variables_created(&self) -> u64 {
        self.variables_created.load(Ordering::Relaxed)
    }

    /// Variables removed, including bulk clears.
    pub fn variables_removed(&self) -> u64 {
        self.variables_removed.load(Ordering::Relaxed)
    }

    /// Whole-shard snapshot captures.
    pub fn snapshots_taken(&self) -> u64 {
        self.snapshots_taken.load(Ordering::Relaxed)
    }
}

/// Per-shard owner of all variables.
pub struct ShardStore {
    config: StoreConfig,
    variables: DashMap<String, Arc<Variable>>,
    stats: ShardStats,
}

impl ShardStore {
    /// Store with the given configuration.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            variables: DashMap::new(),
            stats: ShardStats::default(),
        }
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Registry counters.
    pub fn stats(&self) -> &ShardStats {
        &self.stats
    }

    /// Register a new variable under `name`.
    ///
    /// Fails with [`StoreError::VariableExists`] when the name is taken
    /// and [`StoreError::VariableLimit`] when the shard is at capacity.
    pub fn create_variable(
        &self,
        name: &str,
        data: Tensor,
        slicer: RowSlicer,
    ) -> StoreResult<Arc<Variable>> {
        self.check_capacity()?;
        match self.variables.entry(name.to_string()) {
            Entry::Occupied(_) => Err(StoreError::VariableExists(name.to_string())),
            Entry::Vacant(entry) => {
                let rows = data.rows();
                let variable = Arc::new(
                    Variable::new(data, slicer, name).with_row_block(self.config.row_block),
                );
                entry.insert(Arc::clone(&variable));
                self.stats.record_created();
                info!(variable = name, rows, "variable created");
                Ok(variable)
            }
        }
    }

    /// Look up a variable by name.
    pub fn variable(&self, name: &str) -> StoreResult<Arc<Variable>> {
        self.variables
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::VariableNotFound(name.to_string()))
    }

    /// The variable under `name`, creating it if absent.
    ///
    /// `creator` produces the initial payload and runs only on absence,
    /// with the same winner-takes-all contract as slot creation: under
    /// contention exactly one creator runs.
    pub fn get_or_create_variable(
        &self,
        name: &str,
        creator: impl FnOnce() -> StoreResult<(Tensor, RowSlicer)>,
    ) -> StoreResult<Arc<Variable>> {
        if let Some(entry) = self.variables.get(name) {
            return Ok(Arc::clone(entry.value()));
        }
        // Capacity is checked before the entry guard: holding a shard write
        // lock while len() walks the shards would self-deadlock.
        self.check_capacity()?;
        match self.variables.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let (data, slicer) = creator()?;
                let rows = data.rows();
                let variable = Arc::new(
                    Variable::new(data, slicer, name).with_row_block(self.config.row_block),
                );
                entry.insert(Arc::clone(&variable));
                self.stats.record_created();
                info!(variable = name, rows, "variable created");
                Ok(variable)
            }
        }
    }

    /// Drop a variable and with it every slot it holds. Threads still
    /// holding the `Arc` keep a working variable; the registry forgets it.
    pub fn remove_variable(&self, name: &str) -> StoreResult<()> {
        match self.variables.remove(name) {
            Some(_) => {
                self.stats.record_removed(1);
                info!(variable = name, "variable removed");
                Ok(())
            }
            None => Err(StoreError::VariableNotFound(name.to_string())),
        }
    }

    /// Whether a variable with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Number of registered variables.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Names of all registered variables, in no particular order.
    pub fn variable_names(&self) -> Vec<String> {
        self.variables.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop every variable.
    pub fn clear(&self) {
        let dropped = self.variables.len() as u64;
        self.variables.clear();
        self.stats.record_removed(dropped);
        info!(dropped, "store cleared");
    }

    /// Capture a snapshot of every variable. Each variable is captured
    /// under its own read access; the set is not atomic across variables.
    pub fn capture_all(&self) -> Vec<VariableSnapshot> {
        let mut snapshots: Vec<VariableSnapshot> = self
            .variables
            .iter()
            .map(|entry| VariableSnapshot::capture(entry.value()))
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        self.stats.record_snapshot();
        info!(variables = snapshots.len(), "snapshot captured");
        snapshots
    }

    /// Restore variables from snapshots. An existing variable is
    /// overwritten in place; a missing one is registered fresh. Restoring
    /// into a fuller store than the capacity allows fails partway, with
    /// every variable restored so far kept.
    pub fn restore_all(&self, snapshots: &[VariableSnapshot]) -> StoreResult<()> {
        for snapshot in snapshots {
            match self.variables.get(snapshot.name.as_str()) {
                Some(entry) => snapshot.apply_to(entry.value())?,
                None => {
                    self.check_capacity()?;
                    let variable = Arc::new(snapshot.restore(self.config.row_block)?);
                    self.variables.insert(snapshot.name.clone(), variable);
                    self.stats.record_created();
                }
            }
        }
        info!(variables = snapshots.len(), "snapshot restored");
        Ok(())
    }

    fn check_capacity(&self) -> StoreResult<()> {
        if let Some(limit) = self.config.max_variables {
            if self.variables.len() >= limit {
                return Err(StoreError::VariableLimit { limit });
            }
        }
        Ok(())
    }
}

impl Default for ShardStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
