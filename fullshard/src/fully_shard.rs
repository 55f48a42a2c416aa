//! Wrapping entry points.
//!
//! [`fully_shard`] claims a module's subtree for fully sharded data
//! parallelism: it validates the mesh, resolves the managed modules and
//! states, moves those states onto the mesh's device, and marks the module
//! so that a later `fully_shard` on an ancestor treats it as opaque.
//! [`replicate`] only marks the module; its data-parallel machinery lives
//! elsewhere.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::device::{Device, DeviceType};
use crate::managed::{resolve_managed_modules, resolve_managed_states};
use crate::mesh::{init_device_mesh, DeviceMesh};
use crate::module::{ModuleId, ModuleTree, TensorId, WrapId, WrapKind};
use crate::world::RankContext;
use crate::{Error, Result};

/// Options accepted by [`fully_shard`].
///
/// Can be parsed from a JSON object; missing fields take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FullyShardOptions {
    /// Free the unsharded parameters after forward and re-gather them for
    /// backward.
    #[serde(default = "default_reshard_after_forward")]
    pub reshard_after_forward: bool,
}

fn default_reshard_after_forward() -> bool {
    true
}

impl Default for FullyShardOptions {
    fn default() -> Self {
        Self {
            reshard_after_forward: default_reshard_after_forward(),
        }
    }
}

impl FullyShardOptions {
    /// # Errors
    /// Returns an error if the JSON is malformed.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
}

/// What one [`fully_shard`] call took ownership of.
#[derive(Debug, Clone)]
pub struct FsdpState {
    pub module: ModuleId,
    pub wrap_id: WrapId,
    pub mesh: DeviceMesh,
    pub device: Device,
    pub managed_modules: Vec<ModuleId>,
    pub params: Vec<TensorId>,
    pub buffers: Vec<TensorId>,
    pub options: FullyShardOptions,
}

/// Apply fully sharded data parallelism to `module`.
///
/// With no `mesh`, a 1-D mesh over the whole world on the context's
/// default device type is used.
///
/// # Errors
/// - [`Error::InvalidMeshDim`] if the mesh is not 1-D or 2-D.
/// - [`Error::MeshDeviceTypeMismatch`] if a managed distributed tensor
///   lives on a mesh of a different device type.
/// - [`Error::DTensorDevice`] if a managed distributed tensor is on the
///   right device type but not on this rank's device.
/// - [`Error::AlreadyWrapped`] if `module` already carries a claim.
///
/// On error no tensor has been moved and the module is left unclaimed.
pub fn fully_shard(
    tree: &mut ModuleTree,
    module: ModuleId,
    mesh: Option<&DeviceMesh>,
    ctx: &RankContext,
    options: FullyShardOptions,
) -> Result<FsdpState> {
    let mesh = match mesh {
        Some(mesh) => mesh.clone(),
        None => init_device_mesh(ctx.default_device_type(), &[ctx.world_size], None, ctx)?,
    };
    if !matches!(mesh.ndim(), 1 | 2) {
        return Err(Error::InvalidMeshDim {
            mesh: mesh.to_string(),
        });
    }
    tree.ensure_unclaimed(module)?;
    let device = ctx.current_device(mesh.device_type());

    let managed_modules = resolve_managed_modules(tree, module);
    let (params, buffers) = resolve_managed_states(tree, &managed_modules);
    move_states_to_device(tree, params.iter().chain(&buffers).copied(), device)?;

    let wrap_id = tree.set_claim(module, WrapKind::FullyShard)?;
    info!(
        module = module.index(),
        mesh = %mesh,
        device = %device,
        modules = managed_modules.len(),
        params = params.len(),
        buffers = buffers.len(),
        "Applied fully_shard"
    );

    Ok(FsdpState {
        module,
        wrap_id,
        mesh,
        device,
        managed_modules,
        params,
        buffers,
        options,
    })
}

/// Mark `module` as replicated so enclosing wrappers leave it alone.
///
/// # Errors
/// Returns [`Error::AlreadyWrapped`] if `module` already carries a claim.
pub fn replicate(tree: &mut ModuleTree, module: ModuleId) -> Result<WrapId> {
    let wrap_id = tree.set_claim(module, WrapKind::Replicate)?;
    info!(module = module.index(), "Applied replicate");
    Ok(wrap_id)
}

/// Check every tensor first, then move the local ones.
fn move_states_to_device(
    tree: &mut ModuleTree,
    tensors: impl Iterator<Item = TensorId>,
    device: Device,
) -> Result<()> {
    let mut to_move = Vec::new();
    for id in tensors {
        let tensor = tree.tensor(id);
        if tensor.device() == device || tensor.device().device_type() == DeviceType::Meta {
            continue;
        }
        if let Some(spec) = tensor.dist_spec() {
            let dtensor_type = spec.mesh.device_type();
            if dtensor_type != device.device_type() {
                return Err(Error::MeshDeviceTypeMismatch {
                    dtensor: dtensor_type,
                    fsdp: device.device_type(),
                });
            }
            return Err(Error::DTensorDevice {
                expected: dtensor_type,
                got: tensor.device().to_string(),
            });
        }
        to_move.push(id);
    }
    for id in to_move {
        debug!(tensor = id.index(), from = %tree.tensor(id).device(), to = %device, "Moving state");
        tree.tensor_mut(id).to(device);
    }
    Ok(())
}
