//! # Optical flow estimator

use crate::prelude::v1::*;

/// Generic optical flow estimator.
///
/// Implementations compute the displacement of the image content between two frames. Whether
/// the resulting field is dense or sparse is up to the implementation, the rest of the pipeline
/// only iterates its valid samples.
pub trait FlowEstimator {
    /// Estimate the displacement field between two frames.
    ///
    /// Results must be deterministic for identical inputs.
    ///
    /// # Arguments
    ///
    /// * `prev` - earlier frame of the pair.
    /// * `next` - later frame of the pair.
    ///
    /// # Errors
    ///
    /// * `DimensionMismatch` if the frames differ in size.
    /// * `InsufficientTexture` if no confident estimate could be made. The caller should skip
    /// the pair.
    fn estimate(&mut self, prev: &Frame, next: &Frame) -> Result<DisplacementField>;

    /// Short name of the algorithm, used in logs and stats.
    fn name(&self) -> &str;
}

impl<T: FlowEstimator + ?Sized> FlowEstimator for Box<T> {
    fn estimate(&mut self, prev: &Frame, next: &Frame) -> Result<DisplacementField> {
        (**self).estimate(prev, next)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
