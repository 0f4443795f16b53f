//! # Froth Velocity Measurement Library
//!
//! This library turns a stream of froth surface frames into calibrated, timestamped velocity
//! measurements. Optical flow is computed between consecutive frames, reduced per region of
//! interest, converted into physical units, and recorded per region for export.
//!
//! The easiest way to use the library is to import its prelude:
//!
//! ```
//! use froth::prelude::v1::*;
//! ```
//!
//! You may need [`nalgebra`](https://crates.io/crates/nalgebra) to make use of the functionality.

pub mod calibration;
pub mod config;
pub mod error;
pub mod estimator;
pub mod export;
pub mod field;
pub mod frame;
pub mod history;
pub mod pipeline;
pub mod roi;
pub mod sampler;
pub mod session;
pub mod stats;

pub mod prelude {
    pub mod v1 {
        pub use crate::{
            calibration::{Calibration, CalibrationSpec},
            config::{LkParams, PipelineConfig},
            error::{Error, Result},
            estimator::FlowEstimator,
            export::{CsvDirExporter, Exporter, JsonExporter, SessionSnapshot, Table},
            field::DisplacementField,
            frame::{Frame, RGBA},
            history::{SessionHistory, VelocitySample},
            pipeline::Pipeline,
            roi::{Roi, RoiId, Statistic},
            sampler::VelocitySampler,
            session::{Session, SessionState},
            stats::SessionStats,
        };
    }
}
