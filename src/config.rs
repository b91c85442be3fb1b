//! Host configuration
//!
//! Knobs for the emulated host. Drivers never read this; only
//! [`SimHost`](crate::kern::sim::SimHost) does.

use log::LevelFilter;

/// Configuration for an emulated host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// First simulated physical address handed out for coherent memory
    pub dma_phys_base: u64,
    /// Upper bound on outstanding coherent memory, in bytes
    pub dma_budget: usize,
    /// Base of the simulated user address space
    pub user_base: usize,
    /// Size of the simulated user address space
    pub user_size: usize,
    /// Maximum framebuffers (display nodes) the host accepts
    pub max_framebuffers: u32,
    /// Console log level
    pub log_level: LevelFilter,
}

impl HostConfig {
    pub const fn new() -> Self {
        Self {
            dma_phys_base: 0x8000_0000,
            dma_budget: 64 * 1024 * 1024,
            user_base: 0x1000_0000,
            user_size: 0x4000_0000,
            max_framebuffers: 32,
            log_level: LevelFilter::Info,
        }
    }

    /// Set the coherent memory budget
    pub const fn with_dma_budget(mut self, bytes: usize) -> Self {
        self.dma_budget = bytes;
        self
    }

    /// Set the simulated physical base for coherent memory
    pub const fn with_dma_phys_base(mut self, phys: u64) -> Self {
        self.dma_phys_base = phys;
        self
    }

    /// Set the user address space window
    pub const fn with_user_space(mut self, base: usize, size: usize) -> Self {
        self.user_base = base;
        self.user_size = size;
        self
    }

    /// Set the framebuffer slot count
    pub const fn with_max_framebuffers(mut self, n: u32) -> Self {
        self.max_framebuffers = n;
        self
    }

    /// Set the console log level
    pub const fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new()
    }
}
