//! Resource ceilings and timeouts
//!
//! These are fixed tunables, not computed from host capacity. Every
//! workspace gets the same ceiling; the configuration file may override
//! them per deployment.

/// Memory ceiling per workspace, in MiB (swap is capped to the same value)
pub const MEMORY_LIMIT_MB: u64 = 512;

/// Relative CPU weight per workspace (`--cpu-shares`, 1024 = one full share)
pub const CPU_SHARES: u32 = 512;

/// Maximum number of processes per workspace
pub const PIDS_LIMIT: u32 = 256;

/// Upper bound for a single runtime call (create, exec, inject, remove)
pub const COMMAND_TIMEOUT_SECS: u64 = 30;

/// Upper bound for the base image build
pub const BUILD_TIMEOUT_SECS: u64 = 600;
