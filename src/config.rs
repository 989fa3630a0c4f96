//! Service configuration (SPEC_FULL §10.3). `ServiceConfig::canonical()`
//! mirrors the `SimulationConfig::canonical()` pattern from the teacher —
//! a single hand-written fixture standing in for what a deployed instance
//! would otherwise load from a config file or environment.

use std::time::Duration;

use crate::metrics::{DEFAULT_CONFIDENCE_LEVELS, DEFAULT_PERCENTILE_LEVELS};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub max_concurrent_jobs_per_user: usize,
    pub default_batch_size: usize,
    pub progress_throttle_iterations: u64,
    pub progress_throttle_wall_clock: Duration,
    pub job_soft_timeout: Duration,
    pub default_percentile_levels: Vec<f64>,
    pub default_confidence_levels: Vec<f64>,
}

impl ServiceConfig {
    pub fn canonical() -> Self {
        ServiceConfig {
            max_concurrent_jobs_per_user: 5,
            default_batch_size: 1000,
            progress_throttle_iterations: 1000,
            progress_throttle_wall_clock: Duration::from_millis(100),
            job_soft_timeout: Duration::from_secs(30 * 60),
            default_percentile_levels: DEFAULT_PERCENTILE_LEVELS.to_vec(),
            default_confidence_levels: DEFAULT_CONFIDENCE_LEVELS.to_vec(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_config_has_sane_defaults() {
        let cfg = ServiceConfig::canonical();
        assert!(cfg.max_concurrent_jobs_per_user > 0);
        assert!(cfg.default_batch_size > 0);
        assert_eq!(cfg.default_confidence_levels, DEFAULT_CONFIDENCE_LEVELS.to_vec());
    }
}
