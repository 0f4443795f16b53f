//! # Per-region sample history

use crate::error::{Error, Result};
use crate::roi::RoiId;
use log::*;
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Calibrated velocity of one region over one frame pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VelocitySample {
    pub roi_id: RoiId,
    /// Index of the later frame of the pair.
    pub frame_index: u64,
    /// Capture time of the later frame of the pair.
    pub timestamp: Duration,
    pub delta_pixels: na::Vector2<f32>,
    pub delta_physical: na::Vector2<f32>,
    /// Magnitude of the physical velocity, in units per second.
    pub speed: f32,
    /// Signed angle from the overflow direction, in radians.
    pub angle: f32,
    /// Signed velocity component along the overflow direction, in units per second.
    pub projected_speed: f32,
}

/// Append-only, time ordered samples of every region.
#[derive(Clone, Debug, Default)]
pub struct SessionHistory {
    samples: BTreeMap<RoiId, Vec<VelocitySample>>,
}

impl SessionHistory {
    /// Append a sample to its region.
    ///
    /// The sample must be strictly newer than the last one recorded for the region, otherwise it
    /// is rejected with `OutOfOrderSample` and the history is left untouched.
    pub fn append(&mut self, sample: VelocitySample) -> Result<()> {
        let samples = self.samples.entry(sample.roi_id).or_default();

        if let Some(last) = samples.last() {
            if sample.timestamp <= last.timestamp {
                warn!(
                    "dropping out of order sample for ROI {}: {:?} <= {:?}",
                    sample.roi_id, sample.timestamp, last.timestamp
                );
                return Err(Error::OutOfOrderSample(sample.roi_id.0));
            }
        }

        samples.push(sample);

        Ok(())
    }

    /// Samples of a region in time order.
    pub fn samples(&self, roi: RoiId) -> &[VelocitySample] {
        self.samples.get(&roi).map(Vec::as_slice).unwrap_or_default()
    }

    /// Last sample of a region.
    pub fn last(&self, roi: RoiId) -> Option<&VelocitySample> {
        self.samples.get(&roi).and_then(|s| s.last())
    }

    /// Iterate regions with their samples, in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (RoiId, &[VelocitySample])> + '_ {
        self.samples.iter().map(|(id, s)| (*id, s.as_slice()))
    }

    /// Total number of samples across regions.
    pub fn len(&self) -> usize {
        self.samples.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard the samples of one region.
    pub fn remove(&mut self, roi: RoiId) {
        self.samples.remove(&roi);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(roi: u32, ms: u64) -> VelocitySample {
        VelocitySample {
            roi_id: RoiId(roi),
            frame_index: ms,
            timestamp: Duration::from_millis(ms),
            delta_pixels: na::Vector2::new(1.0, 0.0),
            delta_physical: na::Vector2::new(0.1, 0.0),
            speed: 1.0,
            angle: 0.0,
            projected_speed: 1.0,
        }
    }

    #[test]
    fn monotonic_per_roi() {
        let mut h = SessionHistory::default();
        h.append(sample(0, 10)).unwrap();
        h.append(sample(0, 20)).unwrap();
        // Other regions are ordered independently.
        h.append(sample(1, 5)).unwrap();

        let before = h.samples(RoiId(0)).to_vec();

        assert!(matches!(
            h.append(sample(0, 20)),
            Err(Error::OutOfOrderSample(0))
        ));
        assert!(matches!(
            h.append(sample(0, 15)),
            Err(Error::OutOfOrderSample(0))
        ));

        assert_eq!(h.samples(RoiId(0)), before.as_slice());
        assert_eq!(h.len(), 3);

        h.append(sample(0, 21)).unwrap();
        assert!(h
            .samples(RoiId(0))
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn remove_and_clear() {
        let mut h = SessionHistory::default();
        h.append(sample(0, 1)).unwrap();
        h.append(sample(1, 1)).unwrap();
        h.remove(RoiId(0));
        assert!(h.samples(RoiId(0)).is_empty());
        assert_eq!(h.last(RoiId(1)).map(|s| s.frame_index), Some(1));
        h.clear();
        assert!(h.is_empty());
    }
}
