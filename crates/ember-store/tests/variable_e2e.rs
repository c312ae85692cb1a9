//! End-to-end flows over a shard store: the sparse-embedding lifecycle,
//! checkpoint roundtrips, and clone semantics.

use ember_store::{RowSlicer, ShardStore, StoreConfig, StoreResult, VariableSnapshot};
use ember_tensor::{DType, Init, Shape, Tensor};

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn sparse_store() -> ShardStore {
    ShardStore::new(StoreConfig { row_block: 8, max_variables: None })
}

/// A training shard's life for one embedding table: the variable starts
/// empty, optimizer state appears lazily, sparse updates grow it on
/// demand, and retired ids are compacted away.
#[test]
fn test_sparse_embedding_lifecycle() {
    init_logs();
    let store = sparse_store();

    let data = Tensor::new(DType::F32, Shape::new(vec![0, 4]), Init::Zeros).unwrap();
    let emb = store
        .create_variable("emb", data, RowSlicer::unbounded())
        .unwrap();
    assert!(!emb.real_inited());

    // First optimizer step: momentum comes into existence with zero rows.
    emb.with_slot_insert_access(|var| {
        var.get_variable_like_slot("momentum", DType::F32, || Init::Zeros)
            .map(|slot| assert_eq!(slot.rows(), 0))
    })
    .unwrap();

    // A sparse push touches id 5: both tensors jump to the row block.
    emb.with_exclusive_access(|var| var.reshape_id(5)).unwrap();
    emb.with_read_access(|var| {
        assert_eq!(var.rows(), 8);
        assert_eq!(var.get_existing_slot("momentum").unwrap().rows(), 8);
    });

    // Apply the update under exclusive access.
    emb.with_exclusive_access(|var| -> StoreResult<()> {
        var.data_mut().row_mut::<f32>(5)?.fill(1.0);
        var.slot_tensor_mut("momentum")?.row_mut::<f32>(5)?.fill(0.5);
        Ok(())
    })
    .unwrap();
    emb.set_real_inited(true);

    // Stamp the neighbors so compaction order is visible.
    emb.with_exclusive_access(|var| -> StoreResult<()> {
        var.data_mut().row_mut::<f32>(4)?.fill(4.0);
        var.data_mut().row_mut::<f32>(6)?.fill(6.0);
        Ok(())
    })
    .unwrap();

    // Retire id 5; id 6 slides down, relative order intact.
    emb.with_exclusive_access(|var| var.clear_ids(&[5]));
    emb.with_read_access(|var| {
        assert_eq!(var.rows(), 7);
        assert_eq!(var.data().row::<f32>(4).unwrap(), &[4.0; 4]);
        assert_eq!(var.data().row::<f32>(5).unwrap(), &[6.0; 4]);
        assert_eq!(var.get_existing_slot("momentum").unwrap().rows(), 7);
    });

    assert!(emb.real_inited());
    assert_eq!(emb.stats().reshapes(), 1);
    assert_eq!(emb.stats().rows_grown(), 8);
    assert_eq!(emb.stats().rows_removed(), 1);
}

#[test]
fn test_two_slots_follow_growth_independently_of_fixed_state() {
    init_logs();
    let store = sparse_store();
    let data = Tensor::new(DType::F32, Shape::new(vec![0, 2]), Init::Zeros).unwrap();
    let var = store
        .create_variable("w", data, RowSlicer::unbounded())
        .unwrap();

    var.with_slot_insert_access(|v| -> StoreResult<()> {
        v.get_variable_like_slot_with_shape("adam_m", DType::F32, &[2], || Init::Zeros)?;
        v.get_variable_like_slot_with_shape("adam_v", DType::F32, &[2], || Init::Zeros)?;
        v.get_any_one_slot("step", DType::I64, &[1], || Init::Zeros)?;
        Ok(())
    })
    .unwrap();

    var.with_exclusive_access(|v| v.reshape_id(20)).unwrap();
    var.with_read_access(|v| {
        assert_eq!(v.rows(), 24);
        assert_eq!(v.get_existing_slot("adam_m").unwrap().shape().dims(), &[24, 2]);
        assert_eq!(v.get_existing_slot("adam_v").unwrap().shape().dims(), &[24, 2]);
        assert_eq!(v.get_existing_slot("step").unwrap().shape().dims(), &[1]);
    });
}

#[test]
fn test_snapshot_roundtrip_through_store() {
    init_logs();
    let store = sparse_store();
    let data = Tensor::new(
        DType::F32,
        Shape::new(vec![0, 3]),
        Init::Uniform { low: -1.0, high: 1.0, seed: 7 },
    )
    .unwrap();
    let var = store
        .create_variable("emb", data, RowSlicer::bounded(0, 1024))
        .unwrap();
    var.with_slot_insert_access(|v| {
        v.get_variable_like_slot("momentum", DType::F32, || Init::Zeros)
            .map(|_| ())
    })
    .unwrap();
    var.with_exclusive_access(|v| v.reshape_id(9)).unwrap();
    var.set_real_inited(true);

    let snapshots = store.capture_all();
    assert_eq!(snapshots.len(), 1);

    // Restore into an empty store: the variable reappears whole.
    let fresh = sparse_store();
    fresh.restore_all(&snapshots).unwrap();
    let restored = fresh.variable("emb").unwrap();
    assert!(restored.real_inited());
    restored.with_read_access(|v| {
        assert_eq!(v.rows(), 16);
        assert_eq!(v.slicer().capacity(), Some(1024));
        assert_eq!(v.get_existing_slot("momentum").unwrap().rows(), 16);
    });

    // The restored payload is value-identical.
    let again = VariableSnapshot::capture(&restored);
    assert_eq!(again, snapshots[0]);
}

#[test]
fn test_corrupt_checkpoint_fails_at_decode() {
    init_logs();
    let store = sparse_store();
    let data = Tensor::new(DType::F32, Shape::new(vec![0, 2]), Init::Zeros).unwrap();
    let var = store
        .create_variable("emb", data, RowSlicer::unbounded())
        .unwrap();
    var.with_slot_insert_access(|v| {
        v.get_variable_like_slot("momentum", DType::F32, || Init::Zeros)
            .map(|_| ())
    })
    .unwrap();
    var.with_exclusive_access(|v| v.reshape_id(3)).unwrap();

    let snapshot = VariableSnapshot::capture(&var);
    let mut value = serde_json::to_value(&snapshot).unwrap();

    // A checkpoint whose slot buffer lost elements in transit fails to
    // decode instead of panicking on first row access after restore.
    value["slots"][0]["tensor"]["buf"]["F32"]
        .as_array_mut()
        .unwrap()
        .pop();
    let err = serde_json::from_value::<VariableSnapshot>(value).unwrap_err();
    assert!(err.to_string().contains("does not match shape"));
}

#[test]
fn test_restore_overwrites_diverged_variable() {
    init_logs();
    let store = sparse_store();
    let data = Tensor::new(DType::F32, Shape::new(vec![0, 2]), Init::Fill(1.0)).unwrap();
    let var = store
        .create_variable("emb", data, RowSlicer::unbounded())
        .unwrap();
    var.with_exclusive_access(|v| v.reshape_id(3)).unwrap();

    let snapshots = store.capture_all();

    // Diverge after the checkpoint.
    var.with_exclusive_access(|v| v.reshape_id(50)).unwrap();
    var.with_exclusive_access(|v| -> StoreResult<()> {
        v.data_mut().row_mut::<f32>(0)?.fill(-9.0);
        Ok(())
    })
    .unwrap();

    store.restore_all(&snapshots).unwrap();
    var.with_read_access(|v| {
        assert_eq!(v.rows(), 8);
        assert_eq!(v.data().row::<f32>(0).unwrap(), &[1.0, 1.0]);
    });
}

#[test]
fn test_deep_clone_leaves_optimizer_state_behind() {
    init_logs();
    let store = sparse_store();
    let data = Tensor::new(DType::F32, Shape::new(vec![0, 2]), Init::Zeros).unwrap();
    let var = store
        .create_variable("emb", data, RowSlicer::unbounded())
        .unwrap();
    var.with_slot_insert_access(|v| {
        v.get_variable_like_slot("momentum", DType::F32, || Init::Zeros)
            .map(|_| ())
    })
    .unwrap();
    var.with_exclusive_access(|v| v.reshape_id(4)).unwrap();
    var.set_real_inited(true);

    let copy = var.deep_clone();

    // Payload and identity carry over; slots do not. Snapshots are the
    // tool for moving optimizer state.
    assert_eq!(copy.name(), "emb");
    assert!(copy.real_inited());
    copy.with_read_access(|v| {
        assert_eq!(v.rows(), 8);
        assert!(v.slot_names().is_empty());
    });
    var.with_read_access(|v| assert!(v.has_slot("momentum")));
}

#[test]
fn test_growth_is_deterministic_across_staging() {
    init_logs();
    let init = Init::Uniform { low: 0.0, high: 1.0, seed: 99 };

    // One variable grows in three steps, the other in one.
    let staged = ShardStore::default()
        .create_variable(
            "w",
            Tensor::new(DType::F32, Shape::new(vec![0, 4]), init).unwrap(),
            RowSlicer::unbounded(),
        )
        .unwrap();
    staged.with_exclusive_access(|v| v.reshape_id(10)).unwrap();
    staged.with_exclusive_access(|v| v.reshape_id(100)).unwrap();
    staged.with_exclusive_access(|v| v.reshape_id(150)).unwrap();

    let one_shot = ShardStore::default()
        .create_variable(
            "w",
            Tensor::new(DType::F32, Shape::new(vec![0, 4]), init).unwrap(),
            RowSlicer::unbounded(),
        )
        .unwrap();
    one_shot.with_exclusive_access(|v| v.reshape_id(150)).unwrap();

    staged.with_read_access(|a| {
        one_shot.with_read_access(|b| {
            assert_eq!(a.rows(), b.rows());
            assert_eq!(
                a.data().as_slice::<f32>().unwrap(),
                b.data().as_slice::<f32>().unwrap()
            );
        });
    });
}
