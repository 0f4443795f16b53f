//! # Session statistics
//!
//! Counts of processed frames and of recoverable per-frame conditions, plus estimator timings.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Frames handed to the pipeline.
    pub frames_received: u64,
    /// Frames replaced in the handoff slot before being processed.
    pub frames_skipped: u64,
    /// Frame pairs that went through estimation and aggregation.
    pub pairs_processed: u64,
    pub samples_recorded: u64,
    pub insufficient_texture: u64,
    pub empty_roi: u64,
    pub non_positive_interval: u64,
    pub out_of_order: u64,
    /// Time spent in flow estimation, one entry per estimated pair.
    #[serde(skip)]
    pub estimator_times: Vec<Duration>,
}

impl SessionStats {
    /// Count a recoverable condition. Returns `false` if the error is not a per-frame one.
    pub fn record_error(&mut self, err: &Error) -> bool {
        let counter = match err {
            Error::InsufficientTexture => &mut self.insufficient_texture,
            Error::EmptyRoi(_) => &mut self.empty_roi,
            Error::NonPositiveInterval => &mut self.non_positive_interval,
            Error::OutOfOrderSample(_) => &mut self.out_of_order,
            _ => return false,
        };

        *counter += 1;

        true
    }

    /// Total estimation time in seconds and average time in milliseconds.
    pub fn estimator_perf(&self) -> (f32, f32) {
        calc_perf(&self.estimator_times)
    }
}

fn calc_perf(times: &[Duration]) -> (f32, f32) {
    let total = times.iter().map(Duration::as_secs_f32).sum::<f32>();
    let len = times.len();

    let len = if len > 0 { len as f32 } else { 1.0 };

    (total, total * 1000.0 / len)
}
