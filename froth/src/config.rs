//! # Pipeline configuration

use crate::roi::Statistic;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters of the pyramidal Lucas-Kanade estimator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LkParams {
    /// Distance between tracked grid points, in pixels.
    pub grid_step: usize,
    /// Half size of the tracking window, the window is `2 * half_window + 1` wide.
    pub half_window: usize,
    /// Number of pyramid levels above the full resolution frame.
    pub levels: usize,
    /// Gauss-Newton iterations per level.
    pub iterations: usize,
    /// Stop iterating once the update is smaller than this, in pixels.
    pub epsilon: f32,
    /// Minimum eigenvalue of the normalised structure tensor for a point to be tracked.
    pub min_eigen: f32,
    /// Minimum share of grid points that must be tracked for the field to be accepted.
    pub min_tracked_ratio: f32,
}

impl Default for LkParams {
    fn default() -> Self {
        Self {
            grid_step: 8,
            half_window: 7,
            levels: 2,
            iterations: 10,
            epsilon: 0.01,
            min_eigen: 1e-3,
            min_tracked_ratio: 0.05,
        }
    }
}

/// Settings of the whole measurement pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub estimator: LkParams,
    /// Statistic reducing displacement samples within each region.
    pub aggregation: Statistic,
    /// Number of recent samples kept per region for live readouts.
    pub history_window: usize,
    /// Window of the rolling average, in seconds.
    pub average_window_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            estimator: Default::default(),
            aggregation: Default::default(),
            history_window: 4096,
            average_window_secs: 30.0,
        }
    }
}

impl PipelineConfig {
    /// Rolling average window. Values too large for a `Duration` saturate.
    pub fn average_window(&self) -> Duration {
        Duration::try_from_secs_f64(self.average_window_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{
                "estimator": { "grid_step": 4 },
                "aggregation": "Median"
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.aggregation, Statistic::Median);
        assert_eq!(cfg.history_window, 4096);
        assert_eq!(cfg.estimator.grid_step, 4);
        assert_eq!(cfg.estimator.half_window, LkParams::default().half_window);
    }

    #[test]
    fn average_window_saturates() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{ "average_window_secs": 1e20 }"#).unwrap();
        assert_eq!(cfg.average_window(), Duration::MAX);

        let cfg = PipelineConfig {
            average_window_secs: -5.0,
            ..Default::default()
        };
        assert_eq!(cfg.average_window(), Duration::ZERO);

        let cfg = PipelineConfig {
            average_window_secs: f64::NAN,
            ..Default::default()
        };
        assert_eq!(cfg.average_window(), Duration::ZERO);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = PipelineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(serde_json::from_str::<PipelineConfig>(&json).unwrap(), cfg);
    }
}
