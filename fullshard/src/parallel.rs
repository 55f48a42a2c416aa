//! Tensor-parallel module transformation.
//!
//! [`parallelize_module`] rewrites the parameters of selected linear layers
//! into distributed tensors over a 1-D mesh. Only the layout metadata
//! changes: each parameter records its placement, this rank's shard shape,
//! and the mesh device the shard lives on.

use std::collections::HashSet;

use tracing::info;

use crate::mesh::DeviceMesh;
use crate::module::{ModuleId, ModuleTree};
use crate::nn::LINEAR;
use crate::shard::{local_shape, ParallelStyle, ShardConfig};
use crate::tensor::{LocalShard, Tensor};
use crate::world::RankContext;
use crate::{Error, Result};

/// Apply `plan` to the submodules of `root` over `mesh`.
///
/// Each plan entry is a dotted submodule path and the style to apply. All
/// parameters of a target are moved onto the calling rank's mesh device.
///
/// # Errors
/// - [`Error::InvalidMesh`] if `mesh` is not 1-D or does not contain the
///   calling rank.
/// - [`Error::ModuleNotFound`] if a path does not resolve.
/// - [`Error::UnsupportedParallelStyle`] if a target is not a `Linear`, a
///   parameter is already distributed, or the plan reaches the same
///   parameter twice (a repeated path or a weight shared between targets).
/// - [`Error::InvalidShape`] if a sharded dimension does not divide evenly
///   over the mesh.
///
/// Validation covers the whole plan before any parameter is rewritten.
pub fn parallelize_module(
    tree: &mut ModuleTree,
    root: ModuleId,
    mesh: &DeviceMesh,
    plan: &[(&str, ParallelStyle)],
    ctx: &RankContext,
) -> Result<()> {
    if mesh.ndim() != 1 {
        return Err(Error::InvalidMesh(format!(
            "tensor parallelism expects a 1D DeviceMesh but got {mesh}"
        )));
    }
    let shard = ShardConfig {
        rank: mesh
            .local_rank(0)
            .ok_or_else(|| Error::InvalidMesh(format!("rank {} is not part of {mesh}", ctx.rank)))?,
        world_size: mesh.size(),
    };
    let device = ctx.current_device(mesh.device_type());

    let mut rewrites = Vec::new();
    let mut queued = HashSet::new();
    for &(path, style) in plan {
        let target = tree.submodule(root, path)?;
        if tree.type_name(target) != LINEAR {
            return Err(Error::UnsupportedParallelStyle {
                path: path.to_string(),
                reason: format!("{style:?} only applies to Linear, got {}", tree.type_name(target)),
            });
        }
        for (name, id) in tree.direct_parameters(target) {
            let tensor = tree.tensor(id);
            if tensor.is_distributed() {
                return Err(Error::UnsupportedParallelStyle {
                    path: path.to_string(),
                    reason: format!("{name} is already distributed"),
                });
            }
            if !queued.insert(id) {
                return Err(Error::UnsupportedParallelStyle {
                    path: path.to_string(),
                    reason: format!("{name} is already targeted by an earlier plan entry"),
                });
            }
            let placement = style.placement_for(name);
            let shape = local_shape(tensor.shape(), placement, shard).ok_or_else(|| {
                Error::InvalidShape(format!(
                    "{path}.{name} with shape {:?} cannot be placed as {placement} over {} ranks",
                    tensor.shape(),
                    shard.world_size
                ))
            })?;
            let local = LocalShard {
                shape,
                dtype: tensor.dtype(),
                device,
            };
            rewrites.push((id, placement, local));
        }
        info!(path, style = ?style, mesh = %mesh, "Parallelized module");
    }

    for (id, placement, local) in rewrites {
        tree.tensor_mut(id).distribute(mesh.clone(), vec![placement], local);
    }
    Ok(())
}
