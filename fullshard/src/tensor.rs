//! Leaf tensor metadata
//!
//! Tensors here carry shape, dtype and placement but no element storage.
//! A tensor is either local (one logical device) or distributed over a
//! [`DeviceMesh`], in which case it also records the shape and device of
//! the shard this rank holds.

use crate::device::Device;
use crate::dtype::DType;
use crate::mesh::DeviceMesh;
use crate::shard::Placement;

/// Shape/dtype interface shared by every tensor-like type.
pub trait Tensor {
    /// Returns the shape of the tensor as a slice of dimensions
    fn shape(&self) -> &[usize];

    /// Returns the data type of tensor elements
    fn dtype(&self) -> DType;

    /// Returns the total number of elements in the tensor
    fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    /// Returns the number of dimensions (rank) of the tensor
    fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Returns the size of the tensor data in bytes
    fn size_in_bytes(&self) -> usize {
        self.numel() * self.dtype().size_in_bytes()
    }
}

/// The shard of a distributed tensor held by this rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalShard {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub device: Device,
}

impl Tensor for LocalShard {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }
}

/// Layout of a distributed tensor: one placement per mesh dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistSpec {
    pub mesh: DeviceMesh,
    pub placements: Vec<Placement>,
    pub local: LocalShard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    Local,
    Distributed(DistSpec),
}

/// A parameter or buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorData {
    shape: Vec<usize>,
    dtype: DType,
    device: Device,
    requires_grad: bool,
    layout: Layout,
}

impl TensorData {
    /// A local tensor that does not require gradients.
    #[must_use]
    pub fn new(shape: &[usize], dtype: DType, device: Device) -> Self {
        Self {
            shape: shape.to_vec(),
            dtype,
            device,
            requires_grad: false,
            layout: Layout::Local,
        }
    }

    /// A local trainable tensor.
    #[must_use]
    pub fn parameter(shape: &[usize], dtype: DType, device: Device) -> Self {
        Self {
            requires_grad: dtype.is_floating_point(),
            ..Self::new(shape, dtype, device)
        }
    }

    /// Logical device. For a distributed tensor this is the device of the
    /// local shard at construction time and is kept in sync by [`Self::to`].
    #[must_use]
    pub const fn device(&self) -> Device {
        self.device
    }

    #[must_use]
    pub const fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    pub fn dist_spec(&self) -> Option<&DistSpec> {
        match &self.layout {
            Layout::Local => None,
            Layout::Distributed(spec) => Some(spec),
        }
    }

    #[must_use]
    pub fn is_distributed(&self) -> bool {
        self.dist_spec().is_some()
    }

    /// Device of the storage this rank actually holds.
    #[must_use]
    pub fn local_device(&self) -> Device {
        self.dist_spec().map_or(self.device, |spec| spec.local.device)
    }

    /// Shape of the storage this rank actually holds.
    #[must_use]
    pub fn local_shape(&self) -> &[usize] {
        self.dist_spec()
            .map_or(self.shape.as_slice(), |spec| spec.local.shape.as_slice())
    }

    /// Turn this tensor into a distributed one. Both the logical and the
    /// local device become `local.device`.
    pub fn distribute(&mut self, mesh: DeviceMesh, placements: Vec<Placement>, local: LocalShard) {
        self.device = local.device;
        self.layout = Layout::Distributed(DistSpec {
            mesh,
            placements,
            local,
        });
    }

    /// Move the tensor (and its local shard, if distributed) to `device`.
    pub fn to(&mut self, device: Device) {
        self.device = device;
        if let Layout::Distributed(spec) = &mut self.layout {
            spec.local.device = device;
        }
    }
}

impl Tensor for TensorData {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }
}
