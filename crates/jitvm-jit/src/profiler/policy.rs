//! Threshold policy driving the profiler's state transitions. Kept
//! separate from `counters` so the thresholds (configurable, sourced from
//! [`crate::config::JitConfig`]) don't need to be threaded through every
//! atomic-counter method.

use crate::config::JitConfig;

/// The Cold->Warm edge fires at this fraction of the full function
/// threshold.
const WARM_FRACTION: f64 = 0.10;

#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub warm_at: u64,
    pub hot_at: u64,
    pub loop_hot_at: u64,
}

impl Policy {
    pub fn from_config(config: &JitConfig) -> Self {
        let hot_at = config.hotspot_threshold as u64;
        Self {
            warm_at: ((hot_at as f64) * WARM_FRACTION).ceil() as u64,
            hot_at,
            loop_hot_at: config.loop_threshold as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warm_threshold_is_ten_percent_of_hot() {
        let config = JitConfig {
            hotspot_threshold: 1000,
            ..JitConfig::default()
        };
        let policy = Policy::from_config(&config);
        assert_eq!(policy.warm_at, 100);
        assert_eq!(policy.hot_at, 1000);
    }
}
