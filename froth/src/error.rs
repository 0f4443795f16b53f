//! # Error kinds

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the measurement pipeline.
///
/// Geometry and calibration errors are returned at registration time and need user correction.
/// Per-frame errors are recoverable, see [`Error::is_recoverable`].
#[derive(Error, Debug)]
pub enum Error {
    /// Ruler endpoints coincide, real distance is not positive, or the overflow vector has zero
    /// length.
    #[error("invalid calibration: {0}")]
    InvalidCalibration(&'static str),

    /// A conversion was requested before the required calibration part was set.
    #[error("not calibrated: {0}")]
    NotCalibrated(&'static str),

    /// Calibration was already locked for this session.
    #[error("calibration is locked, reset the session to recalibrate")]
    CalibrationLocked,

    /// Consecutive frames have different sizes.
    #[error("frame dimensions differ: {0:?} vs {1:?}")]
    DimensionMismatch((usize, usize), (usize, usize)),

    /// The flow estimator could not produce a confident estimate.
    #[error("insufficient texture for flow estimation")]
    InsufficientTexture,

    /// No displacement entries fell inside the region.
    #[error("no displacement samples inside ROI {0}")]
    EmptyRoi(u32),

    /// The region polygon is not a simple polygon with at least 3 vertices.
    #[error("invalid ROI geometry: {0}")]
    InvalidGeometry(&'static str),

    /// Elapsed time between the frames of a pair is zero or negative.
    #[error("non-positive frame interval")]
    NonPositiveInterval,

    /// A sample was not newer than the last recorded sample of its ROI.
    #[error("out of order sample for ROI {0}")]
    OutOfOrderSample(u32),

    /// Frame buffer does not match its declared dimensions.
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    /// The operation is not permitted in the current session state.
    #[error("operation not allowed while session is {0}")]
    InvalidState(&'static str),

    /// No ROI with this identifier is registered.
    #[error("unknown ROI {0}")]
    UnknownRoi(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Check whether the error only affects the current frame pair.
    ///
    /// Recoverable errors make the affected ROI skip a sample, processing continues with the next
    /// frame pair.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientTexture
                | Self::EmptyRoi(_)
                | Self::NonPositiveInterval
                | Self::OutOfOrderSample(_)
        )
    }
}
