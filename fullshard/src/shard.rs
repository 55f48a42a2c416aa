//! Sharding layout types
//!
//! Describes how a distributed tensor is laid out over a device mesh and how
//! tensor-parallel styles map onto linear-layer weights. These types carry
//! layout metadata only; no data is exchanged between ranks.

use std::fmt;

/// Describes this rank's position along one mesh dimension.
#[derive(Debug, Clone, Copy)]
pub struct ShardConfig {
    /// This rank's index along the dimension (`0..world_size`)
    pub rank: usize,
    /// Number of ranks along the dimension
    pub world_size: usize,
}

impl ShardConfig {
    /// Compute the shard range for a dimension of size `dim`.
    ///
    /// Returns `(start, shard_size)` where the shard covers
    /// `[start .. start + shard_size)`.
    ///
    /// # Panics
    /// Panics if `dim` is not evenly divisible by `world_size`.
    #[must_use]
    pub fn shard_range(&self, dim: usize) -> (usize, usize) {
        assert_eq!(
            dim % self.world_size,
            0,
            "Dimension {dim} is not evenly divisible by world_size {}",
            self.world_size
        );
        let shard_size = dim / self.world_size;
        let start = self.rank * shard_size;
        (start, shard_size)
    }
}

/// How a distributed tensor is laid out along one mesh dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Every rank holds the full tensor.
    Replicate,
    /// Split evenly along the given tensor dimension.
    Shard(usize),
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replicate => write!(f, "Replicate()"),
            Self::Shard(dim) => write!(f, "Shard(dim={dim})"),
        }
    }
}

/// Tensor-parallel style applied to a linear layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelStyle {
    /// Column-parallel: split along the output dimension (rows of the weight
    /// matrix). Each rank gets rows `[rank*N/tp .. (rank+1)*N/tp]`; the bias
    /// is split the same way.
    Colwise,
    /// Row-parallel: split along the input dimension (columns of the weight
    /// matrix). Each rank gets columns `[rank*K/tp .. (rank+1)*K/tp]`; the
    /// bias is replicated and added after the all-reduce.
    Rowwise,
}

impl ParallelStyle {
    /// Placement of a linear-layer parameter (`weight` or `bias`) under this
    /// style. Anything else is replicated.
    #[must_use]
    pub fn placement_for(self, param_name: &str) -> Placement {
        match (self, param_name) {
            (Self::Colwise, "weight" | "bias") => Placement::Shard(0),
            (Self::Rowwise, "weight") => Placement::Shard(1),
            _ => Placement::Replicate,
        }
    }
}

/// Local shard shape of a tensor with global shape `shape` under
/// `placement` on one mesh dimension.
///
/// Returns `None` if the sharded dimension does not exist or is not evenly
/// divisible by the mesh dimension size.
#[must_use]
pub fn local_shape(shape: &[usize], placement: Placement, shard: ShardConfig) -> Option<Vec<usize>> {
    match placement {
        Placement::Replicate => Some(shape.to_vec()),
        Placement::Shard(dim) => {
            let size = *shape.get(dim)?;
            if size % shard.world_size != 0 {
                return None;
            }
            let (_, shard_size) = shard.shard_range(size);
            let mut local = shape.to_vec();
            local[dim] = shard_size;
            Some(local)
        }
    }
}
