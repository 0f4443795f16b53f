//! # Measurement session
//!
//! A session owns the calibration, the regions and the recorded history of one continuous
//! analysis run. Every operation is gated by the session state:
//!
//! `NotStarted -> Calibrating -> Running -> Finalized`
//!
//! Calibration can only be edited before it is locked, samples are only produced while running,
//! and [`Session::reset`] returns to the initial state from anywhere.

use crate::prelude::v1::*;
use crate::roi::Polygon;
use log::*;
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    NotStarted,
    Calibrating,
    Running,
    Finalized,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Calibrating => "calibrating",
            Self::Running => "running",
            Self::Finalized => "finalized",
        }
    }
}

/// Processed frame pair, identified by its later frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame_index: u64,
    pub timestamp: Duration,
}

/// Outcome of processing one frame pair.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub samples: Vec<VelocitySample>,
    /// Regions that produced no sample, with the reason.
    pub skipped: Vec<(RoiId, Error)>,
}

pub struct Session {
    state: SessionState,
    config: PipelineConfig,
    calibration: Calibration,
    spec: Option<CalibrationSpec>,
    rois: Vec<Roi>,
    next_roi: u32,
    sampler: VelocitySampler,
    history: SessionHistory,
    frames: Vec<FrameRecord>,
    stats: SessionStats,
    epoch: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl Session {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            state: SessionState::NotStarted,
            sampler: VelocitySampler::new(config.history_window),
            config,
            calibration: Default::default(),
            spec: None,
            rois: vec![],
            next_roi: 0,
            history: Default::default(),
            frames: vec![],
            stats: Default::default(),
            epoch: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Counter incremented on every reset.
    ///
    /// Work started under an older epoch must not be applied to the session.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Set the ruler, see [`Calibration::set_ruler`]. Returns pixels per unit.
    pub fn set_ruler(
        &mut self,
        a: na::Point2<f32>,
        b: na::Point2<f32>,
        real_distance: f32,
    ) -> Result<f32> {
        self.check_calibrating()?;
        let ppu = self.calibration.set_ruler(a, b, real_distance)?;
        self.state = SessionState::Calibrating;
        info!("ruler set: {:.3} px per unit", ppu);
        Ok(ppu)
    }

    pub fn set_overflow_direction(&mut self, direction: na::Vector2<f32>) -> Result<()> {
        self.check_calibrating()?;
        self.calibration.set_overflow_direction(direction)?;
        self.state = SessionState::Calibrating;
        Ok(())
    }

    pub fn set_overflow_points(
        &mut self,
        start: na::Point2<f32>,
        end: na::Point2<f32>,
    ) -> Result<()> {
        self.set_overflow_direction(end - start)
    }

    /// Set the overflow direction from degrees anticlockwise from the horizontal.
    pub fn set_overflow_degrees(&mut self, degrees: f32) -> Result<()> {
        self.check_calibrating()?;
        self.calibration.set_overflow_degrees(degrees)?;
        self.state = SessionState::Calibrating;
        Ok(())
    }

    /// Lock the calibration and start the session.
    pub fn lock_calibration(&mut self) -> Result<CalibrationSpec> {
        self.check_calibrating()?;
        let spec = self.calibration.lock()?;
        info!(
            "calibration locked: {:.3} px per unit, overflow at {:.1} deg",
            spec.pixels_per_unit,
            spec.overflow_degrees()
        );
        self.spec = Some(spec);
        self.state = SessionState::Running;
        Ok(spec)
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Locked calibration, if the session has started.
    pub fn calibration_spec(&self) -> Option<&CalibrationSpec> {
        self.spec.as_ref()
    }

    /// Register a region.
    pub fn add_roi(&mut self, name: impl Into<String>, polygon: Polygon) -> Result<RoiId> {
        if self.state == SessionState::Finalized {
            return Err(Error::InvalidState(self.state.as_str()));
        }

        let id = RoiId(self.next_roi);
        self.next_roi += 1;

        let roi = Roi::new(id, name, polygon);
        debug!("added ROI {} ({}) with bounds {:?}", id, roi.name(), roi.polygon().bounds());
        self.rois.push(roi);

        Ok(id)
    }

    /// Validate vertices and register them as a region.
    pub fn add_polygon(
        &mut self,
        name: impl Into<String>,
        vertices: Vec<na::Point2<f32>>,
    ) -> Result<RoiId> {
        let polygon = Polygon::new(vertices)?;
        self.add_roi(name, polygon)
    }

    /// Remove a region together with its recorded samples.
    pub fn remove_roi(&mut self, id: RoiId) -> Result<Roi> {
        if self.state == SessionState::Finalized {
            return Err(Error::InvalidState(self.state.as_str()));
        }

        let idx = self
            .rois
            .iter()
            .position(|r| r.id() == id)
            .ok_or(Error::UnknownRoi(id.0))?;

        self.history.remove(id);
        self.sampler.remove(id);

        Ok(self.rois.remove(idx))
    }

    /// Remove the most recently added region.
    pub fn remove_last_roi(&mut self) -> Result<Option<Roi>> {
        match self.rois.last() {
            Some(roi) => self.remove_roi(roi.id()).map(Some),
            None => Ok(None),
        }
    }

    pub fn rois(&self) -> &[Roi] {
        &self.rois
    }

    pub fn roi(&self, id: RoiId) -> Option<&Roi> {
        self.rois.iter().find(|r| r.id() == id)
    }

    /// Check that a frame pair can be processed.
    ///
    /// A non-positive interval is counted as a dropped pair.
    pub fn check_pair(&mut self, prev: &Frame, next: &Frame) -> Result<()> {
        self.check_running()?;
        prev.check_dim(next)?;

        if next.timestamp() <= prev.timestamp() {
            return Err(self.drop_pair(Error::NonPositiveInterval));
        }

        Ok(())
    }

    /// Estimate flow between two frames and record a sample for every region that has one.
    ///
    /// Per-frame conditions that affect a whole pair (`InsufficientTexture`,
    /// `NonPositiveInterval`) are returned as errors. Conditions affecting single regions are
    /// listed in the report.
    pub fn process_pair<E: FlowEstimator + ?Sized>(
        &mut self,
        estimator: &mut E,
        prev: &Frame,
        next: &Frame,
    ) -> Result<FrameReport> {
        self.check_pair(prev, next)?;

        let timer = Instant::now();
        let field = estimator.estimate(prev, next);
        self.apply_estimate(prev, next, field, timer.elapsed())
    }

    /// Apply the result of a flow estimation performed outside of the session.
    pub fn apply_estimate(
        &mut self,
        prev: &Frame,
        next: &Frame,
        field: Result<DisplacementField>,
        elapsed: Duration,
    ) -> Result<FrameReport> {
        self.check_running()?;

        self.stats.estimator_times.push(elapsed);

        match field {
            Ok(field) => self.process_field(&field, prev.timestamp(), next.index(), next.timestamp()),
            Err(e) if e.is_recoverable() => Err(self.drop_pair(e)),
            Err(e) => Err(e),
        }
    }

    /// Aggregate a displacement field for every region and record the samples.
    ///
    /// # Arguments
    ///
    /// * `field` - displacement field of the frame pair.
    /// * `t0` - capture time of the earlier frame.
    /// * `frame_index` - index of the later frame.
    /// * `t1` - capture time of the later frame.
    pub fn process_field(
        &mut self,
        field: &DisplacementField,
        t0: Duration,
        frame_index: u64,
        t1: Duration,
    ) -> Result<FrameReport> {
        let spec = *self.check_running()?;

        if t1 <= t0 {
            return Err(self.drop_pair(Error::NonPositiveInterval));
        }

        self.stats.pairs_processed += 1;
        self.frames.push(FrameRecord {
            frame_index,
            timestamp: t1,
        });

        let mut report = FrameReport::default();

        for roi in &self.rois {
            let res = roi
                .aggregate(field, self.config.aggregation)
                .and_then(|delta| {
                    self.sampler.sample(
                        roi.id(),
                        delta,
                        frame_index,
                        t0,
                        t1,
                        &spec,
                        &mut self.history,
                    )
                });

            match res {
                Ok(sample) => {
                    self.stats.samples_recorded += 1;
                    report.samples.push(sample);
                }
                Err(e) => {
                    debug!("ROI {} skipped frame {}: {}", roi.id(), frame_index, e);
                    self.stats.record_error(&e);
                    report.skipped.push((roi.id(), e));
                }
            }
        }

        Ok(report)
    }

    /// Latest accepted sample of a region.
    pub fn latest(&self, roi: RoiId) -> Option<&VelocitySample> {
        self.sampler.latest(roi)
    }

    /// Rolling average of the overflow-projected speed of a region.
    pub fn average_projected_speed(&self, roi: RoiId) -> Option<f32> {
        self.sampler
            .mean_projected_speed(roi, self.config.average_window())
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    pub fn frames(&self) -> &[FrameRecord] {
        &self.frames
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Take a point in time snapshot of the session.
    ///
    /// Live history is not modified and processing may continue afterwards.
    pub fn finalize(&self) -> Result<SessionSnapshot> {
        let calibration = match self.state {
            SessionState::Running | SessionState::Finalized => self.spec,
            _ => None,
        }
        .ok_or(Error::NotCalibrated("calibration is not locked"))?;

        Ok(SessionSnapshot::new(
            calibration,
            self.rois.iter().map(|roi| {
                (
                    roi.id(),
                    roi.name().to_string(),
                    self.history.samples(roi.id()).to_vec(),
                )
            }),
            self.frames.clone(),
        ))
    }

    /// Finish the session, returning its final snapshot.
    ///
    /// No further samples are accepted until the session is reset.
    pub fn end(&mut self) -> Result<SessionSnapshot> {
        self.check_running()?;
        let snapshot = self.finalize()?;
        self.state = SessionState::Finalized;
        info!(
            "session ended with {} samples over {} frame pairs",
            self.history.len(),
            self.frames.len()
        );
        Ok(snapshot)
    }

    /// Discard calibration, regions and history, and return to the initial state.
    pub fn reset(&mut self) {
        let epoch = self.epoch + 1;
        *self = Self::new(self.config.clone());
        self.epoch = epoch;
        info!("session reset (epoch {})", epoch);
    }

    fn drop_pair(&mut self, err: Error) -> Error {
        debug!("dropping frame pair: {}", err);
        self.stats.record_error(&err);
        err
    }

    fn check_calibrating(&self) -> Result<()> {
        match self.state {
            SessionState::NotStarted | SessionState::Calibrating => Ok(()),
            _ => Err(Error::CalibrationLocked),
        }
    }

    fn check_running(&self) -> Result<&CalibrationSpec> {
        match (self.state, self.spec.as_ref()) {
            (SessionState::Running, Some(spec)) => Ok(spec),
            (SessionState::Finalized, _) => Err(Error::InvalidState(self.state.as_str())),
            _ => Err(Error::NotCalibrated("calibration is not locked")),
        }
    }
}
