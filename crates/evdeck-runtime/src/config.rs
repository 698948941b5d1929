//! Kernel configuration.
//!
//! Library defaults, overridable per-field from the environment or
//! programmatically with the builder methods.
//!
//! # Example
//!
//! ```rust,ignore
//! use evdeck_runtime::KernelConfig;
//!
//! // Defaults with env overrides
//! let config = KernelConfig::from_env();
//!
//! // Or customize programmatically
//! let config = KernelConfig::new()
//!     .max_entries(4096)
//!     .wait_poll_interval_us(0);
//! ```

use evdeck_core::env::env_get;
use evdeck_core::EngineError;

use crate::channel::WIRE_RING_SLOTS;

mod defaults {
    use super::WIRE_RING_SLOTS;

    pub const RING_CAPACITY: usize = WIRE_RING_SLOTS;
    pub const MAX_ENTRIES: usize = 1024;
    pub const WAIT_POLL_INTERVAL_US: u64 = 100;
}

/// Kernel tunables with builder pattern.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Slots in each process channel's request and response ring.
    /// Must be a power of two.
    pub ring_capacity: usize,
    /// Capacity of the routing entry arena (in-flight event ceiling).
    pub max_entries: usize,
    /// Sleep between WAIT polls; 0 spins with a scheduler yield.
    pub wait_poll_interval_us: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl KernelConfig {
    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `EVD_RING_CAPACITY` - per-channel ring slots (power of two)
    /// - `EVD_MAX_ENTRIES` - routing entry arena capacity
    /// - `EVD_WAIT_POLL_US` - WAIT poll interval in microseconds
    pub fn from_env() -> Self {
        Self {
            ring_capacity: env_get("EVD_RING_CAPACITY", defaults::RING_CAPACITY),
            max_entries: env_get("EVD_MAX_ENTRIES", defaults::MAX_ENTRIES),
            wait_poll_interval_us: env_get("EVD_WAIT_POLL_US", defaults::WAIT_POLL_INTERVAL_US),
        }
    }

    /// Library defaults, ignoring the environment.
    pub fn new() -> Self {
        Self {
            ring_capacity: defaults::RING_CAPACITY,
            max_entries: defaults::MAX_ENTRIES,
            wait_poll_interval_us: defaults::WAIT_POLL_INTERVAL_US,
        }
    }

    /// Preset: busy-poll WAIT, large arena. Burns a core per waiter.
    pub fn low_latency() -> Self {
        Self::new().max_entries(4096).wait_poll_interval_us(0)
    }

    /// Preset: long WAIT poll interval for battery/background use.
    pub fn low_power() -> Self {
        Self::new().wait_poll_interval_us(5_000)
    }

    // Builder methods

    pub fn ring_capacity(mut self, n: usize) -> Self {
        self.ring_capacity = n;
        self
    }

    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    pub fn wait_poll_interval_us(mut self, us: u64) -> Self {
        self.wait_poll_interval_us = us;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.ring_capacity == 0 || !self.ring_capacity.is_power_of_two() {
            return Err(EngineError::InvalidCapacity(self.ring_capacity));
        }
        if self.max_entries == 0 {
            return Err(EngineError::InvalidCapacity(self.max_entries));
        }
        Ok(())
    }
}
