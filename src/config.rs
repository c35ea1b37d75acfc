use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How much of the cycle is echoed on the diagnostics stream.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Verbosity {
    /// Start and end markers only (errors are always reported).
    #[default]
    Minimal,
    /// Geometry, pass count and every planned segment.
    Verbose,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CycleConfig {
    pub verbosity: Verbosity,
    pub straight_code: u32,
    pub bore_code: u32,
    /// Positions closer than this (mm) count as the same commanded point.
    pub tolerance: f64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::Minimal,
            straight_code: 800,
            bore_code: 801,
            tolerance: 1e-4,
        }
    }
}

impl CycleConfig {
    /// Both cycles need their own code, and the tolerance must be usable.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.straight_code == self.bore_code {
            return Err(ConfigError::CodeCollision(self.bore_code));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(ConfigError::BadTolerance(self.tolerance));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LatheConfig {
    pub rapid_feed: f64, // mm/min
    pub accel: f64,      // mm/s²
    pub x_range: (f64, f64),
    pub z_range: (f64, f64),
    // Simulation step used while waiting on a barrier.
    pub barrier_dt_ms: f64,
    pub max_barrier_ticks: usize,
}

impl Default for LatheConfig {
    fn default() -> Self {
        Self {
            rapid_feed: 6_000.0,
            accel: 500.0,
            x_range: (-10_000.0, 10_000.0),
            z_range: (-10_000.0, 10_000.0),
            barrier_dt_ms: 5.0,
            max_barrier_ticks: 5_000_000,
        }
    }
}
