//! Common building blocks
//!
//! Constructors that add standard layers to a [`ModuleTree`] and return the
//! new module's id. Layers are identified by their type name, which is what
//! [`parallelize_module`](crate::parallelize_module) checks against.

use crate::device::Device;
use crate::dtype::DType;
use crate::module::{ModuleId, ModuleTree};
use crate::tensor::TensorData;

pub const LINEAR: &str = "Linear";
pub const MLP: &str = "MLP";
pub const SEQUENTIAL: &str = "Sequential";

/// `Linear(in_features, out_features)` with a `[out, in]` weight and an
/// optional `[out]` bias.
#[must_use]
pub fn linear(
    tree: &mut ModuleTree,
    in_features: usize,
    out_features: usize,
    bias: bool,
    device: Device,
) -> ModuleId {
    let m = tree.add_module(LINEAR);
    let weight = tree.add_tensor(TensorData::parameter(
        &[out_features, in_features],
        DType::F32,
        device,
    ));
    tree.register_parameter(m, "weight", weight);
    if bias {
        let b = tree.add_tensor(TensorData::parameter(&[out_features], DType::F32, device));
        tree.register_parameter(m, "bias", b);
    }
    m
}

/// Configuration for [`mlp`].
#[derive(Debug, Clone, Copy)]
pub struct MlpConfig {
    pub dim: usize,
    pub device: Device,
    /// Register a non-trainable `[dim]` tensor named `buffer`.
    pub with_buffer: bool,
}

impl MlpConfig {
    #[must_use]
    pub const fn new(dim: usize) -> Self {
        Self {
            dim,
            device: Device::cpu(),
            with_buffer: false,
        }
    }

    #[must_use]
    pub const fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    #[must_use]
    pub const fn with_buffer(mut self) -> Self {
        self.with_buffer = true;
        self
    }
}

/// Two-layer MLP: `in_proj` and `out_proj`, both `Linear(dim, dim)`.
#[must_use]
pub fn mlp(tree: &mut ModuleTree, config: MlpConfig) -> ModuleId {
    let m = tree.add_module(MLP);
    let in_proj = linear(tree, config.dim, config.dim, true, config.device);
    let out_proj = linear(tree, config.dim, config.dim, true, config.device);
    tree.register_module(m, "in_proj", in_proj);
    tree.register_module(m, "out_proj", out_proj);
    if config.with_buffer {
        let buffer = tree.add_tensor(TensorData::new(&[config.dim], DType::F32, config.device));
        tree.register_buffer(m, "buffer", buffer);
    }
    m
}

/// A container whose children are named `"0"`, `"1"`, ... in order.
/// The same module may be passed more than once.
#[must_use]
pub fn sequential(tree: &mut ModuleTree, children: &[ModuleId]) -> ModuleId {
    let m = tree.add_module(SEQUENTIAL);
    for (i, &child) in children.iter().enumerate() {
        tree.register_module(m, &i.to_string(), child);
    }
    m
}
