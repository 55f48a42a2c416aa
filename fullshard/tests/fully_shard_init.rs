//! Initialization tests for `fully_shard`.
//!
//! Each test runs once per rank on a simulated world. Every rank builds its
//! own model, so assertions are made from that rank's point of view.

use std::collections::HashSet;

use fullshard::nn::{mlp, sequential, MlpConfig};
use fullshard::{
    fully_shard, init_device_mesh, parallelize_module, replicate, resolve_managed_modules,
    resolve_managed_states, Device, DeviceType, Error, FullyShardOptions, ModuleId, ModuleTree,
    ParallelStyle, RankContext, TensorId, World,
};

fn states(tree: &ModuleTree, root: ModuleId) -> Vec<TensorId> {
    let mut all = tree.parameters(root);
    all.extend(tree.buffers(root));
    all
}

fn tp_plan() -> [(&'static str, ParallelStyle); 2] {
    [
        ("in_proj", ParallelStyle::Colwise),
        ("out_proj", ParallelStyle::Rowwise),
    ]
}

// ---------------------------------------------------------------------------
// Device placement of plain tensors
// ---------------------------------------------------------------------------

#[test]
fn test_move_states_to_device_tensor() {
    World::new(1)
        .with_cuda_devices(1)
        .run(|ctx| {
            let mut tree = ModuleTree::new();
            let model = mlp(&mut tree, MlpConfig::new(8).with_buffer());
            for t in states(&tree, model) {
                assert_eq!(tree.tensor(t).device(), Device::cpu());
            }

            fully_shard(&mut tree, model, None, ctx, FullyShardOptions::default())?;

            let cuda_device = ctx.current_device(DeviceType::Cuda);
            for t in states(&tree, model) {
                assert_eq!(tree.tensor(t).device(), cuda_device);
            }
            Ok(())
        })
        .unwrap();
}

// ---------------------------------------------------------------------------
// Device placement of distributed tensors
// ---------------------------------------------------------------------------

#[test]
fn test_move_states_to_device_dtensor_valid() {
    let world = World::new(4).with_cuda_devices(4);
    world
        .run(|ctx| {
            let dp_size = 2;
            let global_mesh = init_device_mesh(
                DeviceType::Cuda,
                &[dp_size, ctx.world_size / dp_size],
                Some(&["dp", "tp"]),
                ctx,
            )?;
            let dp_mesh = global_mesh.get("dp")?;
            let tp_mesh = global_mesh.get("tp")?;

            let mut tree = ModuleTree::new();
            let model = mlp(&mut tree, MlpConfig::new(8).with_buffer());
            parallelize_module(&mut tree, model, &tp_mesh, &tp_plan(), ctx)?;

            let cuda_device = ctx.current_device(DeviceType::Cuda);
            for t in states(&tree, model) {
                let tensor = tree.tensor(t);
                if tensor.is_distributed() {
                    assert_eq!(tensor.device(), cuda_device);
                    assert_eq!(tensor.local_device(), cuda_device);
                } else {
                    assert_eq!(tensor.device(), Device::cpu());
                }
            }

            fully_shard(&mut tree, model, Some(&dp_mesh), ctx, FullyShardOptions::default())?;

            for t in states(&tree, model) {
                let tensor = tree.tensor(t);
                assert_eq!(tensor.device(), cuda_device);
                if tensor.is_distributed() {
                    assert_eq!(tensor.local_device(), cuda_device);
                }
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_move_states_to_device_dtensor_invalid() {
    World::new(4)
        .with_cuda_devices(4)
        .run(|ctx| {
            let dp_size = 2;
            let shape = [dp_size, ctx.world_size / dp_size];
            let names: &[&str] = &["dp", "tp"];
            let global_cuda_mesh = init_device_mesh(DeviceType::Cuda, &shape, Some(names), ctx)?;
            let global_cpu_mesh = init_device_mesh(DeviceType::Cpu, &shape, Some(names), ctx)?;
            let dp_mesh = global_cuda_mesh.get("dp")?;
            // mismatched meshes
            let tp_mesh = global_cpu_mesh.get("tp")?;

            let mut tree = ModuleTree::new();
            let model = mlp(&mut tree, MlpConfig::new(8).with_buffer());
            parallelize_module(&mut tree, model, &tp_mesh, &tp_plan(), ctx)?;
            for t in states(&tree, model) {
                let tensor = tree.tensor(t);
                assert_eq!(tensor.device(), Device::cpu());
                assert_eq!(tensor.local_device(), Device::cpu());
            }

            let err = fully_shard(&mut tree, model, Some(&dp_mesh), ctx, FullyShardOptions::default())
                .unwrap_err();
            assert!(matches!(err, Error::MeshDeviceTypeMismatch { .. }));
            assert_eq!(
                err.to_string(),
                "Requires DTensor to have mesh of the same type as the FSDP mesh but got cpu for DTensor and cuda for FSDP"
            );

            // Nothing moved, nothing claimed.
            for t in states(&tree, model) {
                assert_eq!(tree.tensor(t).device(), Device::cpu());
            }
            assert!(!tree.claim(model).is_claimed());
            Ok(())
        })
        .unwrap();
}

// ---------------------------------------------------------------------------
// Mesh argument
// ---------------------------------------------------------------------------

#[test]
fn test_invalid_mesh_ndim() {
    World::new(2)
        .with_cuda_devices(2)
        .run(|ctx| {
            let mesh = init_device_mesh(DeviceType::Cuda, &[ctx.world_size, 1, 1], None, ctx)?;
            let mut tree = ModuleTree::new();
            let model = mlp(&mut tree, MlpConfig::new(8));
            let err = fully_shard(&mut tree, model, Some(&mesh), ctx, FullyShardOptions::default())
                .unwrap_err();
            assert_eq!(
                err.to_string(),
                "fully_shard expects a 1D or 2D DeviceMesh but got DeviceMesh([[[0]], [[1]]])"
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_2d_mesh_accepted() {
    World::new(4)
        .with_cuda_devices(4)
        .run(|ctx| {
            let mesh = init_device_mesh(DeviceType::Cuda, &[2, 2], Some(&["replicate", "shard"]), ctx)?;
            let mut tree = ModuleTree::new();
            let model = mlp(&mut tree, MlpConfig::new(8));
            let state = fully_shard(&mut tree, model, Some(&mesh), ctx, FullyShardOptions::default())?;
            assert_eq!(state.mesh.ndim(), 2);
            assert_eq!(state.device, Device::cuda(ctx.rank));
            Ok(())
        })
        .unwrap();
}

// ---------------------------------------------------------------------------
// Managed modules and states
// ---------------------------------------------------------------------------

fn check_managed_modules(managed: &[ModuleId], expected: &[ModuleId]) {
    assert_eq!(managed.len(), expected.len());
    let managed: HashSet<_> = managed.iter().collect();
    let expected: HashSet<_> = expected.iter().collect();
    assert_eq!(managed, expected);
}

fn check_managed_states(
    (params, buffers): (Vec<TensorId>, Vec<TensorId>),
    expected_params: &[TensorId],
    expected_buffers: &[TensorId],
) {
    assert_eq!(params.len(), expected_params.len());
    assert_eq!(buffers.len(), expected_buffers.len());
    assert_eq!(
        params.iter().collect::<HashSet<_>>(),
        expected_params.iter().collect::<HashSet<_>>()
    );
    assert_eq!(
        buffers.iter().collect::<HashSet<_>>(),
        expected_buffers.iter().collect::<HashSet<_>>()
    );
}

fn single_cuda() -> RankContext {
    RankContext {
        rank: 0,
        world_size: 1,
        cuda_device_count: 1,
    }
}

#[test]
fn test_managed_modules_single() {
    let mut tree = ModuleTree::new();
    let model = mlp(&mut tree, MlpConfig::new(8));
    let managed = resolve_managed_modules(&tree, model);
    check_managed_modules(&managed, &tree.modules(model));
}

#[test]
fn test_managed_modules_nested() {
    let mut tree = ModuleTree::new();
    let mlps: Vec<_> = (0..2).map(|_| mlp(&mut tree, MlpConfig::new(8))).collect();
    let model = sequential(&mut tree, &mlps);
    fully_shard(&mut tree, mlps[0], None, &single_cuda(), FullyShardOptions::default()).unwrap();

    let managed = resolve_managed_modules(&tree, model);
    let mut expected = tree.modules(mlps[1]);
    expected.push(model);
    check_managed_modules(&managed, &expected);
}

#[test]
fn test_managed_modules_nested_fully_shard_and_replicate() {
    let mut tree = ModuleTree::new();
    let mlps: Vec<_> = (0..3).map(|_| mlp(&mut tree, MlpConfig::new(8))).collect();
    let model = sequential(&mut tree, &mlps);
    replicate(&mut tree, mlps[0]).unwrap();
    fully_shard(&mut tree, mlps[2], None, &single_cuda(), FullyShardOptions::default()).unwrap();

    let managed = resolve_managed_modules(&tree, model);
    let mut expected = tree.modules(mlps[1]);
    expected.push(model);
    check_managed_modules(&managed, &expected);
}

#[test]
fn test_managed_modules_duplicate() {
    let mut tree = ModuleTree::new();
    let shared = mlp(&mut tree, MlpConfig::new(8));
    let model = sequential(&mut tree, &[shared, shared]);

    let managed = resolve_managed_modules(&tree, model);
    let mut expected = tree.modules(shared);
    expected.push(model);
    check_managed_modules(&managed, &expected);

    let (params, _) = resolve_managed_states(&tree, &managed);
    assert_eq!(params.len(), tree.parameters(shared).len());
}

#[test]
fn test_managed_states_shared_params_and_buffers() {
    let mut tree = ModuleTree::new();
    let mlps: Vec<_> = (0..3)
        .map(|_| mlp(&mut tree, MlpConfig::new(8).with_buffer()))
        .collect();
    let model = sequential(&mut tree, &mlps);

    let in_proj = |tree: &ModuleTree, i: usize| tree.child(mlps[i], "in_proj").unwrap();
    let shared_weight = tree.parameter(in_proj(&tree, 1), "weight").unwrap();
    let target = in_proj(&tree, 0);
    tree.register_parameter(target, "weight", shared_weight);
    let target = in_proj(&tree, 2);
    tree.register_parameter(target, "weight", shared_weight);
    let shared_buffer = tree.buffer(mlps[2], "buffer").unwrap();
    tree.register_buffer(mlps[1], "buffer", shared_buffer);

    let managed = resolve_managed_modules(&tree, model);
    let states = resolve_managed_states(&tree, &managed);
    let expected_params = tree.parameters(model);
    let expected_buffers = tree.buffers(model);
    // 3 MLPs * 4 params, minus the two aliased weights; 3 buffers minus one alias.
    assert_eq!(expected_params.len(), 10);
    assert_eq!(expected_buffers.len(), 2);
    check_managed_states(states, &expected_params, &expected_buffers);
}

#[test]
fn test_managed_states_nested_fully_shard() {
    let mut tree = ModuleTree::new();
    let mlps: Vec<_> = (0..2)
        .map(|_| mlp(&mut tree, MlpConfig::new(8).with_buffer()))
        .collect();
    let model = sequential(&mut tree, &mlps);
    fully_shard(&mut tree, mlps[0], None, &single_cuda(), FullyShardOptions::default()).unwrap();

    let managed = resolve_managed_modules(&tree, model);
    let states = resolve_managed_states(&tree, &managed);
    check_managed_states(states, &tree.parameters(mlps[1]), &tree.buffers(mlps[1]));
}
