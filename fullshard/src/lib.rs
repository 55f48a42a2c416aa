//! fullshard: initialization for fully sharded data-parallel wrapping
//!
//! This crate decides what a `fully_shard` call on a module owns: which
//! sub-modules and which parameters and buffers it manages, skipping any
//! subtree an earlier wrapper already claimed, and where those states must
//! live given the device mesh. Tensors, meshes and tensor-parallel layouts
//! are modelled as metadata only.

pub mod device;
pub mod dtype;
pub mod error;
pub mod fully_shard;
pub mod managed;
pub mod mesh;
pub mod module;
pub mod nn;
pub mod parallel;
pub mod shard;
pub mod tensor;
pub mod world;

pub use device::{Device, DeviceType};
pub use dtype::DType;
pub use error::{Error, Result};
pub use fully_shard::{fully_shard, replicate, FsdpState, FullyShardOptions};
pub use managed::{resolve_managed_modules, resolve_managed_states};
pub use mesh::{init_device_mesh, DeviceMesh};
pub use module::{Claim, ModuleId, ModuleTree, TensorId, WrapId, WrapKind};
pub use nn::MlpConfig;
pub use parallel::parallelize_module;
pub use shard::{ParallelStyle, Placement, ShardConfig};
pub use tensor::{Tensor, TensorData};
pub use world::{RankContext, World};
