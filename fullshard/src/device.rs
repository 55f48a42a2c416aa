//! Device identifiers
//!
//! A [`Device`] names where a tensor's storage lives. Only the metadata is
//! modelled here; moving a tensor between devices updates its [`Device`]
//! and nothing else.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Kind of device a tensor or mesh lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Host memory
    Cpu,
    /// NVIDIA GPU
    Cuda,
    /// Shape-only placeholder with no storage
    Meta,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::Meta => write!(f, "meta"),
        }
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "meta" => Ok(Self::Meta),
            other => Err(Error::InvalidDevice(format!(
                "unknown device type {other:?}"
            ))),
        }
    }
}

/// A concrete device: a type plus an optional ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    kind: DeviceType,
    index: Option<usize>,
}

impl Device {
    #[must_use]
    pub const fn cpu() -> Self {
        Self {
            kind: DeviceType::Cpu,
            index: None,
        }
    }

    #[must_use]
    pub const fn cuda(index: usize) -> Self {
        Self {
            kind: DeviceType::Cuda,
            index: Some(index),
        }
    }

    #[must_use]
    pub const fn meta() -> Self {
        Self {
            kind: DeviceType::Meta,
            index: None,
        }
    }

    /// The device type (`cpu`, `cuda`, `meta`).
    #[must_use]
    pub const fn device_type(&self) -> DeviceType {
        self.kind
    }

    /// The device ordinal, if any. CPU and meta devices have none.
    #[must_use]
    pub const fn index(&self) -> Option<usize> {
        self.index
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}:{i}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Parses `cpu`, `meta`, `cuda` (ordinal 0) or `cuda:N`.
impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, index) = match s.split_once(':') {
            Some((kind, index)) => {
                let index = index
                    .parse::<usize>()
                    .map_err(|_| Error::InvalidDevice(format!("bad device ordinal in {s:?}")))?;
                (kind.parse::<DeviceType>()?, Some(index))
            }
            None => (s.parse::<DeviceType>()?, None),
        };
        match kind {
            DeviceType::Cuda => Ok(Self::cuda(index.unwrap_or(0))),
            DeviceType::Cpu | DeviceType::Meta if index.is_some() => Err(Error::InvalidDevice(
                format!("{kind} devices take no ordinal, got {s:?}"),
            )),
            DeviceType::Cpu => Ok(Self::cpu()),
            DeviceType::Meta => Ok(Self::meta()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        assert_eq!(Device::cpu().to_string(), "cpu");
        assert_eq!(Device::cuda(3).to_string(), "cuda:3");
        assert_eq!(Device::meta().to_string(), "meta");
    }

    #[test]
    fn test_device_parse() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::cpu());
        assert_eq!("cuda".parse::<Device>().unwrap(), Device::cuda(0));
        assert_eq!("cuda:2".parse::<Device>().unwrap(), Device::cuda(2));
        assert!("cpu:1".parse::<Device>().is_err());
        assert!("tpu".parse::<Device>().is_err());
        assert!("cuda:x".parse::<Device>().is_err());
    }

    #[test]
    fn test_device_equality_includes_index() {
        assert_ne!(Device::cuda(0), Device::cuda(1));
        assert_eq!(Device::cuda(1).device_type(), DeviceType::Cuda);
        assert_eq!(Device::cpu().index(), None);
    }
}
