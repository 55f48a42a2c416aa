//! Device meshes
//!
//! A [`DeviceMesh`] arranges the ranks of a world into an n-dimensional
//! grid. Dimensions may be named (e.g. `("dp", "tp")`) so that a
//! 2-D mesh can be sliced into the 1-D sub-mesh a given parallelism
//! strategy runs over. A mesh is always seen from one rank: slicing keeps
//! the calling rank's coordinates on every other dimension.

use std::fmt;

use crate::device::DeviceType;
use crate::world::RankContext;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMesh {
    device_type: DeviceType,
    shape: Vec<usize>,
    /// Global ranks in row-major order.
    ranks: Vec<usize>,
    dim_names: Option<Vec<String>>,
    /// Global rank of the caller that owns this view.
    rank: usize,
}

/// Build a mesh spanning every rank in the world.
///
/// Ranks are laid out in row-major order over `shape`.
///
/// # Errors
/// Returns [`Error::InvalidMesh`] if `shape` is empty, has a zero-size
/// dimension, does not multiply out to the world size, or if `dim_names`
/// has the wrong length or repeats a name.
pub fn init_device_mesh(
    device_type: DeviceType,
    shape: &[usize],
    dim_names: Option<&[&str]>,
    ctx: &RankContext,
) -> Result<DeviceMesh> {
    if shape.is_empty() {
        return Err(Error::InvalidMesh("mesh shape must be non-empty".to_string()));
    }
    if shape.contains(&0) {
        return Err(Error::InvalidMesh(format!(
            "mesh shape {shape:?} has a zero-size dimension"
        )));
    }
    let size: usize = shape.iter().product();
    if size != ctx.world_size {
        return Err(Error::InvalidMesh(format!(
            "mesh shape {shape:?} has {size} ranks but world size is {}",
            ctx.world_size
        )));
    }
    let dim_names = dim_names
        .map(|names| validate_dim_names(names, shape.len()))
        .transpose()?;

    Ok(DeviceMesh {
        device_type,
        shape: shape.to_vec(),
        ranks: (0..size).collect(),
        dim_names,
        rank: ctx.rank,
    })
}

fn validate_dim_names(names: &[&str], ndim: usize) -> Result<Vec<String>> {
    if names.len() != ndim {
        return Err(Error::InvalidMesh(format!(
            "expected {ndim} mesh dim names but got {}",
            names.len()
        )));
    }
    let mut owned: Vec<String> = Vec::with_capacity(ndim);
    for name in names {
        if owned.iter().any(|n| n == name) {
            return Err(Error::InvalidMesh(format!("duplicate mesh dim name {name:?}")));
        }
        owned.push((*name).to_string());
    }
    Ok(owned)
}

impl DeviceMesh {
    #[must_use]
    pub const fn device_type(&self) -> DeviceType {
        self.device_type
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of ranks in the mesh.
    #[must_use]
    pub fn size(&self) -> usize {
        self.ranks.len()
    }

    #[must_use]
    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    #[must_use]
    pub fn dim_names(&self) -> Option<&[String]> {
        self.dim_names.as_deref()
    }

    /// The caller's coordinates in the mesh, or `None` if it is not a member.
    #[must_use]
    pub fn coordinate(&self) -> Option<Vec<usize>> {
        let flat = self.ranks.iter().position(|&r| r == self.rank)?;
        let mut coord = vec![0; self.shape.len()];
        let mut rem = flat;
        for (c, &dim) in coord.iter_mut().zip(&self.shape).rev() {
            *c = rem % dim;
            rem /= dim;
        }
        Some(coord)
    }

    /// The caller's index along mesh dimension `dim`.
    #[must_use]
    pub fn local_rank(&self, dim: usize) -> Option<usize> {
        self.coordinate().and_then(|c| c.get(dim).copied())
    }

    /// Slice out the 1-D sub-mesh along the named dimension that contains
    /// the calling rank.
    ///
    /// # Errors
    /// Returns [`Error::InvalidMesh`] if the mesh has no dim names, the name
    /// is unknown, or the caller is not part of the mesh.
    pub fn get(&self, name: &str) -> Result<Self> {
        let names = self.dim_names.as_ref().ok_or_else(|| {
            Error::InvalidMesh(format!("cannot slice {self} by {name:?}: mesh has no dim names"))
        })?;
        let dim = names.iter().position(|n| n == name).ok_or_else(|| {
            Error::InvalidMesh(format!("mesh dim {name:?} not found in {names:?}"))
        })?;
        let coord = self.coordinate().ok_or_else(|| {
            Error::InvalidMesh(format!("rank {} is not part of {self}", self.rank))
        })?;

        let strides = row_major_strides(&self.shape);
        let base: usize = coord
            .iter()
            .zip(&strides)
            .enumerate()
            .filter(|(d, _)| *d != dim)
            .map(|(_, (c, s))| c * s)
            .sum();
        let ranks = (0..self.shape[dim])
            .map(|i| self.ranks[base + i * strides[dim]])
            .collect();

        Ok(Self {
            device_type: self.device_type,
            shape: vec![self.shape[dim]],
            ranks,
            dim_names: Some(vec![name.to_string()]),
            rank: self.rank,
        })
    }
}

fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

fn write_nested(f: &mut fmt::Formatter<'_>, shape: &[usize], ranks: &[usize]) -> fmt::Result {
    let Some((&outer, inner)) = shape.split_first() else {
        return write!(f, "{}", ranks[0]);
    };
    let chunk = ranks.len() / outer;
    write!(f, "[")?;
    for (i, part) in ranks.chunks(chunk.max(1)).enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write_nested(f, inner, part)?;
    }
    write!(f, "]")
}

/// Formats as `DeviceMesh([[0, 1], [2, 3]])`.
impl fmt::Display for DeviceMesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceMesh(")?;
        write_nested(f, &self.shape, &self.ranks)?;
        write!(f, ")")
    }
}
