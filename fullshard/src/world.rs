//! Simulated multi-rank world.
//!
//! [`World`] runs the same closure once per rank on scoped threads, each
//! with its own [`RankContext`], so code written against a process group
//! can be driven from a single test process. Every rank builds its own
//! module tree; nothing is shared between ranks except the closure.

use std::panic;
use std::thread;

use crate::device::{Device, DeviceType};
use crate::Result;

/// One rank's view of the world.
#[derive(Debug, Clone, Copy)]
pub struct RankContext {
    /// This participant's rank (`0..world_size`)
    pub rank: usize,
    /// Total number of participants
    pub world_size: usize,
    /// Accelerators visible to this process
    pub cuda_device_count: usize,
}

impl RankContext {
    /// A single-rank context with no accelerators.
    #[must_use]
    pub const fn single() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            cuda_device_count: 0,
        }
    }

    /// The device this rank uses for the given device type.
    ///
    /// Ranks are assigned accelerators round-robin. With no accelerators
    /// visible, ordinal 0 is still returned so metadata stays well-formed.
    #[must_use]
    pub fn current_device(&self, device_type: DeviceType) -> Device {
        match device_type {
            DeviceType::Cpu => Device::cpu(),
            DeviceType::Meta => Device::meta(),
            DeviceType::Cuda => Device::cuda(self.rank % self.cuda_device_count.max(1)),
        }
    }

    /// Accelerator when one is visible, otherwise CPU.
    #[must_use]
    pub const fn default_device_type(&self) -> DeviceType {
        if self.cuda_device_count > 0 {
            DeviceType::Cuda
        } else {
            DeviceType::Cpu
        }
    }
}

/// A group of ranks run in lock-step on scoped threads.
#[derive(Debug, Clone, Copy)]
pub struct World {
    world_size: usize,
    cuda_device_count: usize,
}

impl World {
    /// # Panics
    /// Panics if `world_size` is zero.
    #[must_use]
    pub fn new(world_size: usize) -> Self {
        assert!(world_size > 0, "world_size must be positive");
        Self {
            world_size,
            cuda_device_count: 0,
        }
    }

    /// Pretend `count` accelerators are visible to every rank.
    #[must_use]
    pub const fn with_cuda_devices(mut self, count: usize) -> Self {
        self.cuda_device_count = count;
        self
    }

    #[must_use]
    pub const fn world_size(&self) -> usize {
        self.world_size
    }

    /// Run `f` once per rank and wait for all ranks.
    ///
    /// # Errors
    /// Returns the lowest-ranked error if any rank fails.
    ///
    /// # Panics
    /// Re-raises the panic of the first rank that panicked.
    pub fn run<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&RankContext) -> Result<()> + Send + Sync,
    {
        let results = thread::scope(|s| {
            let handles: Vec<_> = (0..self.world_size)
                .map(|rank| {
                    let f = &f;
                    let ctx = RankContext {
                        rank,
                        world_size: self.world_size,
                        cuda_device_count: self.cuda_device_count,
                    };
                    s.spawn(move || f(&ctx))
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
                .collect::<Vec<_>>()
        });

        results.into_iter().collect()
    }
}
