//! Simulation configuration - timing, loop cap, and randomness
//!
//! Loaded from YAML; every field is optional:
//! ```yaml
//! max_loop_iterations: 3
//! logic_latency_ms: 100
//! startup_delay_ms: 200
//! time_scale: 0.5        # 0 skips all delays
//! seed: 42               # reproducible latencies and branch choices
//! latency:
//!   tools:                 # merged over the built-in table
//!     my_connector: { min_ms: 100, max_ms: 300 }
//!   fallback: { min_ms: 150, max_ms: 400 }
//! transfer_kb: { min_kb: 5.0, max_kb: 25.0 }
//! ```

use crate::core::entropy::SizeRange;
use crate::core::error::SimError;
use crate::core::latency::LatencyTable;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCAL_CONFIG: &str = "flowsim.yml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Iterations a `while` node runs before taking its exit port
    pub max_loop_iterations: u32,
    /// Fixed latency for logic, tool and data nodes
    pub logic_latency_ms: u64,
    /// Pause between the start log and the first node
    pub startup_delay_ms: u64,
    /// Multiplier on every simulated delay
    pub time_scale: f64,
    pub latency: LatencyTable,
    pub transfer_kb: SizeRange,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: 3,
            logic_latency_ms: 100,
            startup_delay_ms: 200,
            time_scale: 1.0,
            latency: LatencyTable::default(),
            transfer_kb: SizeRange::default(),
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Load config from YAML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))?;
        let config: SimulationConfig = serde_yaml::from_str(&content).map_err(SimError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Auto-detect config
    /// Priority:
    /// 1. ./flowsim.yml
    /// 2. <user config dir>/flowsim/config.yml
    /// 3. Built-in defaults
    pub fn auto_load() -> crate::Result<Self> {
        for path in Self::search_paths() {
            if path.exists() {
                log::info!("Using simulation config {}", path.display());
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("flowsim").join("config.yml"));
        }
        paths
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if !self.time_scale.is_finite() || self.time_scale < 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "time_scale must be a non-negative number, got {}",
                self.time_scale
            )));
        }
        if self.max_loop_iterations == 0 {
            return Err(SimError::InvalidConfig(
                "max_loop_iterations must be at least 1".to_string(),
            ));
        }

        let ranges = self
            .latency
            .tools
            .iter()
            .map(|(name, range)| (name.as_str(), range))
            .chain(std::iter::once(("fallback", &self.latency.fallback)));
        for (name, range) in ranges {
            if range.min_ms > range.max_ms {
                return Err(SimError::InvalidConfig(format!(
                    "latency range for '{}' has min_ms > max_ms",
                    name
                )));
            }
        }

        let sizes = &self.transfer_kb;
        if !(sizes.min_kb >= 0.0 && sizes.min_kb <= sizes.max_kb) || !sizes.max_kb.is_finite() {
            return Err(SimError::InvalidConfig(
                "transfer_kb needs 0 <= min_kb <= max_kb".to_string(),
            ));
        }

        Ok(())
    }

    /// Same config with every delay skipped
    pub fn instant(mut self) -> Self {
        self.time_scale = 0.0;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn logic_latency(&self) -> Duration {
        Duration::from_millis(self.logic_latency_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}
