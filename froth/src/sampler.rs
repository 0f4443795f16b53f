//! # Velocity sampler
//!
//! Converts per-region pixel displacements into calibrated velocity samples and records them.
//! The sampler also keeps a short window of recent samples per region, used for live readouts
//! such as the latest velocity and the rolling average.

use crate::prelude::v1::*;
use nalgebra as na;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Converts displacements to velocities and keeps recent samples of each region.
#[derive(Clone, Debug)]
pub struct VelocitySampler {
    recent: BTreeMap<RoiId, VecDeque<VelocitySample>>,
    capacity: usize,
}

impl Default for VelocitySampler {
    fn default() -> Self {
        Self::new(PipelineConfig::default().history_window)
    }
}

impl VelocitySampler {
    /// Create a sampler keeping up to `capacity` recent samples per region.
    pub fn new(capacity: usize) -> Self {
        Self {
            recent: Default::default(),
            capacity: capacity.max(1),
        }
    }

    /// Produce a sample and append it to the session history.
    ///
    /// # Arguments
    ///
    /// * `roi` - region the displacement belongs to.
    /// * `delta` - pixel displacement of the region over the frame pair.
    /// * `frame_index` - index of the later frame of the pair.
    /// * `t0` - capture time of the earlier frame.
    /// * `t1` - capture time of the later frame.
    /// * `calibration` - locked calibration of the session.
    /// * `history` - session history to append to.
    ///
    /// # Errors
    ///
    /// * `NonPositiveInterval` if `t1 <= t0`.
    /// * `OutOfOrderSample` if the history already holds a sample at or after `t1`.
    ///
    /// In both cases nothing is recorded.
    #[allow(clippy::too_many_arguments)]
    pub fn sample(
        &mut self,
        roi: RoiId,
        delta: na::Vector2<f32>,
        frame_index: u64,
        t0: Duration,
        t1: Duration,
        calibration: &CalibrationSpec,
        history: &mut SessionHistory,
    ) -> Result<VelocitySample> {
        let dt = t1
            .checked_sub(t0)
            .filter(|dt| !dt.is_zero())
            .ok_or(Error::NonPositiveInterval)?
            .as_secs_f32();

        let delta_physical = calibration.to_physical(delta);
        let velocity = delta_physical / dt;

        let sample = VelocitySample {
            roi_id: roi,
            frame_index,
            timestamp: t1,
            delta_pixels: delta,
            delta_physical,
            speed: velocity.magnitude(),
            angle: calibration.relative_angle(delta),
            projected_speed: calibration.project(velocity),
        };

        history.append(sample.clone())?;

        let recent = self.recent.entry(roi).or_default();
        if recent.len() >= self.capacity {
            recent.pop_front();
        }
        recent.push_back(sample.clone());

        Ok(sample)
    }

    /// Most recent accepted sample of a region.
    pub fn latest(&self, roi: RoiId) -> Option<&VelocitySample> {
        self.recent.get(&roi).and_then(VecDeque::back)
    }

    /// Recent samples of a region, oldest first.
    pub fn recent(&self, roi: RoiId) -> impl Iterator<Item = &VelocitySample> + '_ {
        self.recent.get(&roi).into_iter().flatten()
    }

    /// Mean overflow-projected speed of the samples within `window` of the latest one.
    pub fn mean_projected_speed(&self, roi: RoiId, window: Duration) -> Option<f32> {
        let latest = self.latest(roi)?.timestamp;
        let start = latest.saturating_sub(window);

        let (sum, cnt) = self
            .recent(roi)
            .filter(|s| s.timestamp >= start)
            .fold((0.0, 0usize), |(sum, cnt), s| (sum + s.projected_speed, cnt + 1));

        if cnt > 0 {
            Some(sum / cnt as f32)
        } else {
            None
        }
    }

    /// Forget the recent samples of one region.
    pub fn remove(&mut self, roi: RoiId) {
        self.recent.remove(&roi);
    }

    pub fn clear(&mut self) {
        self.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Calibration;
    use assert_approx_eq::assert_approx_eq;

    fn spec() -> CalibrationSpec {
        let mut c = Calibration::default();
        c.set_ruler(na::Point2::new(0.0, 0.0), na::Point2::new(100.0, 0.0), 10.0)
            .unwrap();
        c.set_overflow_direction(na::Vector2::new(1.0, 0.0)).unwrap();
        c.lock().unwrap()
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn calibrated_sample() {
        let spec = spec();
        let mut history = SessionHistory::default();
        let mut sampler = VelocitySampler::new(8);

        let s = sampler
            .sample(
                RoiId(0),
                na::Vector2::new(20.0, 0.0),
                1,
                ms(0),
                ms(500),
                &spec,
                &mut history,
            )
            .unwrap();

        assert_approx_eq!(s.delta_physical.x, 2.0);
        assert_approx_eq!(s.speed, 4.0);
        assert_approx_eq!(s.angle, 0.0);
        assert_approx_eq!(s.projected_speed, 4.0);
        assert_eq!(history.samples(RoiId(0)).len(), 1);
        assert_eq!(sampler.latest(RoiId(0)), Some(&s));
    }

    #[test]
    fn opposite_motion_projects_negative() {
        let spec = spec();
        let mut history = SessionHistory::default();
        let mut sampler = VelocitySampler::new(8);
        let s = sampler
            .sample(
                RoiId(0),
                na::Vector2::new(-10.0, 0.0),
                1,
                ms(0),
                ms(1000),
                &spec,
                &mut history,
            )
            .unwrap();
        assert_approx_eq!(s.speed, 1.0);
        assert_approx_eq!(s.projected_speed, -1.0);
        assert_approx_eq!(s.angle.abs(), std::f32::consts::PI);
    }

    #[test]
    fn zero_interval_is_dropped() {
        let spec = spec();
        let mut history = SessionHistory::default();
        let mut sampler = VelocitySampler::new(8);

        for (t0, t1) in [(ms(40), ms(40)), (ms(80), ms(40))] {
            assert!(matches!(
                sampler.sample(
                    RoiId(0),
                    na::Vector2::new(1.0, 0.0),
                    1,
                    t0,
                    t1,
                    &spec,
                    &mut history
                ),
                Err(Error::NonPositiveInterval)
            ));
        }

        assert!(history.is_empty());
        assert!(sampler.latest(RoiId(0)).is_none());
    }

    #[test]
    fn out_of_order_keeps_latest() {
        let spec = spec();
        let mut history = SessionHistory::default();
        let mut sampler = VelocitySampler::new(8);
        let v = na::Vector2::new(1.0, 0.0);

        let first = sampler
            .sample(RoiId(0), v, 2, ms(40), ms(80), &spec, &mut history)
            .unwrap();

        assert!(matches!(
            sampler.sample(RoiId(0), v, 1, ms(0), ms(40), &spec, &mut history),
            Err(Error::OutOfOrderSample(0))
        ));

        assert_eq!(sampler.latest(RoiId(0)), Some(&first));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn bounded_window_and_average() {
        let spec = spec();
        let mut history = SessionHistory::default();
        let mut sampler = VelocitySampler::new(4);

        // 10 px per second is 1 unit per second, alternate between 1 and 3 units per second.
        for i in 0..10u64 {
            let px = if i % 2 == 0 { 10.0 } else { 30.0 };
            sampler
                .sample(
                    RoiId(3),
                    na::Vector2::new(px, 0.0),
                    i + 1,
                    Duration::from_secs(i),
                    Duration::from_secs(i + 1),
                    &spec,
                    &mut history,
                )
                .unwrap();
        }

        assert_eq!(sampler.recent(RoiId(3)).count(), 4);
        assert_eq!(history.samples(RoiId(3)).len(), 10);

        assert_approx_eq!(
            sampler
                .mean_projected_speed(RoiId(3), Duration::from_secs(30))
                .unwrap(),
            2.0
        );
        // Only the last sample lies within a zero window.
        assert_approx_eq!(
            sampler
                .mean_projected_speed(RoiId(3), Duration::ZERO)
                .unwrap(),
            3.0
        );
        assert!(sampler
            .mean_projected_speed(RoiId(4), Duration::from_secs(1))
            .is_none());
    }
}
