//! Error types for fullshard

use thiserror::Error;

use crate::device::DeviceType;
use crate::module::WrapKind;

/// Result type alias using fullshard's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fullshard operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("fully_shard expects a 1D or 2D DeviceMesh but got {mesh}")]
    InvalidMeshDim { mesh: String },

    #[error(
        "Requires DTensor to have mesh of the same type as the FSDP mesh but got {dtensor} for DTensor and {fsdp} for FSDP"
    )]
    MeshDeviceTypeMismatch { dtensor: DeviceType, fsdp: DeviceType },

    #[error("Expects DTensor to be moved to {expected} but got {got}")]
    DTensorDevice { expected: DeviceType, got: String },

    #[error("Invalid device mesh: {0}")]
    InvalidMesh(String),

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Unsupported parallel style for {path}: {reason}")]
    UnsupportedParallelStyle { path: String, reason: String },

    #[error("Module {module} is already wrapped by {existing}")]
    AlreadyWrapped { module: usize, existing: WrapKind },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
