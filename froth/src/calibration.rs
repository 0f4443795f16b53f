//! # Pixel to physical unit calibration
//!
//! Calibration has two parts. The ruler is a pair of points with a known real world distance
//! between them, giving a pixels-per-unit ratio. The overflow direction is a vector that defines
//! angle zero for every reported motion.
//!
//! Both parts are set on a [`Calibration`] while the session is being set up, and are frozen
//! into a [`CalibrationSpec`] once locked.

use crate::error::{Error, Result};
use nalgebra as na;
use serde::{Deserialize, Serialize};

/// Reference segment of known real world length.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ruler {
    pub a: na::Point2<f32>,
    pub b: na::Point2<f32>,
    pub real_distance: f32,
}

impl Ruler {
    pub fn pixels_per_unit(&self) -> f32 {
        (self.b - self.a).magnitude() / self.real_distance
    }
}

/// Calibration that is still being edited.
#[derive(Clone, Debug, Default)]
pub struct Calibration {
    ruler: Option<Ruler>,
    overflow: Option<na::Unit<na::Vector2<f32>>>,
    locked: bool,
}

impl Calibration {
    /// Set the ruler.
    ///
    /// # Arguments
    ///
    /// * `a` - first ruler endpoint, in frame pixels.
    /// * `b` - second ruler endpoint, in frame pixels.
    /// * `real_distance` - real world distance between the endpoints.
    pub fn set_ruler(
        &mut self,
        a: na::Point2<f32>,
        b: na::Point2<f32>,
        real_distance: f32,
    ) -> Result<f32> {
        self.check_unlocked()?;

        if !is_finite(&a.coords) || !is_finite(&b.coords) {
            return Err(Error::InvalidCalibration("ruler endpoint is not finite"));
        }

        if a == b {
            return Err(Error::InvalidCalibration("ruler endpoints coincide"));
        }

        if !(real_distance > 0.0) || !real_distance.is_finite() {
            return Err(Error::InvalidCalibration("ruler distance must be positive"));
        }

        let ruler = Ruler {
            a,
            b,
            real_distance,
        };

        let ppu = ruler.pixels_per_unit();

        if !(ppu > 0.0) || !ppu.is_finite() {
            return Err(Error::InvalidCalibration("ruler scale is out of range"));
        }

        self.ruler = Some(ruler);

        Ok(ppu)
    }

    /// Set the overflow direction from a vector.
    pub fn set_overflow_direction(&mut self, direction: na::Vector2<f32>) -> Result<()> {
        self.check_unlocked()?;

        if !is_finite(&direction) {
            return Err(Error::InvalidCalibration("overflow direction is not finite"));
        }

        let dir = na::Unit::try_new(direction, 0.0)
            .filter(|d| is_finite(d))
            .ok_or(Error::InvalidCalibration("overflow direction has zero length"))?;

        self.overflow = Some(dir);

        Ok(())
    }

    /// Set the overflow direction from an arrow drawn between two points.
    pub fn set_overflow_points(
        &mut self,
        start: na::Point2<f32>,
        end: na::Point2<f32>,
    ) -> Result<()> {
        self.set_overflow_direction(end - start)
    }

    /// Set the overflow direction from an on-screen angle.
    ///
    /// The angle is in degrees, anticlockwise from the horizontal. Image rows grow downwards, so
    /// the vertical component is negated.
    pub fn set_overflow_degrees(&mut self, degrees: f32) -> Result<()> {
        if !degrees.is_finite() {
            return Err(Error::InvalidCalibration("overflow angle is not finite"));
        }

        let rad = degrees.to_radians();
        self.set_overflow_direction(na::Vector2::new(rad.cos(), -rad.sin()))
    }

    pub fn ruler(&self) -> Option<&Ruler> {
        self.ruler.as_ref()
    }

    pub fn overflow(&self) -> Option<na::Unit<na::Vector2<f32>>> {
        self.overflow
    }

    pub fn pixels_per_unit(&self) -> Result<f32> {
        self.ruler
            .as_ref()
            .map(Ruler::pixels_per_unit)
            .ok_or(Error::NotCalibrated("ruler is not set"))
    }

    /// Convert a pixel displacement to physical units.
    pub fn to_physical(&self, delta: na::Vector2<f32>) -> Result<na::Vector2<f32>> {
        Ok(delta / self.pixels_per_unit()?)
    }

    /// Signed angle, in radians, from the overflow direction to `delta`.
    pub fn relative_angle(&self, delta: na::Vector2<f32>) -> Result<f32> {
        let dir = self
            .overflow
            .ok_or(Error::NotCalibrated("overflow direction is not set"))?;
        Ok(signed_angle(&dir, &delta))
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Lock the calibration.
    ///
    /// Both the ruler and the overflow direction must have been set. After locking, every setter
    /// fails with `CalibrationLocked` until [`Calibration::reset`] is called.
    pub fn lock(&mut self) -> Result<CalibrationSpec> {
        self.check_unlocked()?;

        let ruler = self
            .ruler
            .ok_or(Error::NotCalibrated("ruler is not set"))?;
        let overflow = self
            .overflow
            .ok_or(Error::NotCalibrated("overflow direction is not set"))?;

        self.locked = true;

        Ok(CalibrationSpec {
            pixels_per_unit: ruler.pixels_per_unit(),
            ruler,
            overflow,
        })
    }

    /// Clear both calibration parts and the lock.
    pub fn reset(&mut self) {
        *self = Default::default();
    }

    fn check_unlocked(&self) -> Result<()> {
        if self.locked {
            Err(Error::CalibrationLocked)
        } else {
            Ok(())
        }
    }
}

/// Locked calibration.
///
/// This is passed explicitly to every sampling call, so samples recorded in a session are always
/// interpreted with the calibration they were captured under.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSpec {
    pub ruler: Ruler,
    pub pixels_per_unit: f32,
    pub overflow: na::Unit<na::Vector2<f32>>,
}

impl CalibrationSpec {
    /// Convert a pixel displacement to physical units.
    pub fn to_physical(&self, delta: na::Vector2<f32>) -> na::Vector2<f32> {
        delta / self.pixels_per_unit
    }

    /// Signed angle, in radians, from the overflow direction to `delta`.
    ///
    /// Positive angles turn from image x towards image y (clockwise on screen).
    pub fn relative_angle(&self, delta: na::Vector2<f32>) -> f32 {
        signed_angle(&self.overflow, &delta)
    }

    /// Signed length of `v` along the overflow direction.
    pub fn project(&self, v: na::Vector2<f32>) -> f32 {
        self.overflow.dot(&v)
    }

    /// Overflow direction as an on-screen angle, degrees anticlockwise from the horizontal.
    pub fn overflow_degrees(&self) -> f32 {
        (-self.overflow.y).atan2(self.overflow.x).to_degrees()
    }
}

fn is_finite(v: &na::Vector2<f32>) -> bool {
    v.iter().all(|c| c.is_finite())
}

fn signed_angle(dir: &na::Unit<na::Vector2<f32>>, v: &na::Vector2<f32>) -> f32 {
    dir.perp(v).atan2(dir.dot(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f32::consts::FRAC_PI_2;

    fn calibrated() -> Calibration {
        let mut c = Calibration::default();
        c.set_ruler(na::Point2::new(0.0, 0.0), na::Point2::new(100.0, 0.0), 10.0)
            .unwrap();
        c.set_overflow_direction(na::Vector2::new(1.0, 0.0)).unwrap();
        c
    }

    #[test]
    fn ruler_ratio() {
        let c = calibrated();
        assert_approx_eq!(c.pixels_per_unit().unwrap(), 10.0);
        let phys = c.to_physical(na::Vector2::new(20.0, 0.0)).unwrap();
        assert_approx_eq!(phys.x, 2.0);
        assert_approx_eq!(phys.y, 0.0);
    }

    #[test]
    fn ruler_ratio_diagonal() {
        let mut c = Calibration::default();
        for i in 1..50 {
            let d = i as f32 * 0.7;
            let ppu = c
                .set_ruler(na::Point2::new(3.0, 4.0), na::Point2::new(6.0, 8.0), d)
                .unwrap();
            assert_approx_eq!(ppu, 5.0 / d);
        }
    }

    #[test]
    fn to_physical_is_linear() {
        let c = calibrated();
        let v = na::Vector2::new(3.5, -7.25);
        for k in [-3.0f32, -0.5, 0.0, 1.0, 2.0, 12.5] {
            let lhs = c.to_physical(v * k).unwrap();
            let rhs = c.to_physical(v).unwrap() * k;
            assert_approx_eq!(lhs.x, rhs.x, 1e-5);
            assert_approx_eq!(lhs.y, rhs.y, 1e-5);
        }
    }

    #[test]
    fn relative_angle_quarter_turn() {
        let c = calibrated();
        assert_approx_eq!(
            c.relative_angle(na::Vector2::new(0.0, 5.0)).unwrap(),
            FRAC_PI_2
        );
        assert_approx_eq!(
            c.relative_angle(na::Vector2::new(0.0, -5.0)).unwrap(),
            -FRAC_PI_2
        );
    }

    #[test]
    fn invalid_ruler() {
        let mut c = Calibration::default();
        let p = na::Point2::new(1.0, 1.0);
        assert!(matches!(
            c.set_ruler(p, p, 1.0),
            Err(Error::InvalidCalibration(_))
        ));
        assert!(matches!(
            c.set_ruler(p, na::Point2::new(2.0, 1.0), 0.0),
            Err(Error::InvalidCalibration(_))
        ));
        assert!(matches!(
            c.set_ruler(p, na::Point2::new(2.0, 1.0), -4.0),
            Err(Error::InvalidCalibration(_))
        ));
        assert!(matches!(
            c.set_overflow_direction(na::Vector2::zeros()),
            Err(Error::InvalidCalibration(_))
        ));
    }

    #[test]
    fn non_finite_ruler() {
        let mut c = Calibration::default();
        let o = na::Point2::new(0.0, 0.0);

        for (a, b, d) in [
            (na::Point2::new(f32::NAN, 0.0), na::Point2::new(100.0, 0.0), 10.0),
            (o, na::Point2::new(f32::INFINITY, 0.0), 10.0),
            (o, na::Point2::new(0.0, f32::NEG_INFINITY), 10.0),
            (o, na::Point2::new(100.0, 0.0), f32::INFINITY),
            (o, na::Point2::new(100.0, 0.0), f32::NAN),
            // Both finite, but the ratio overflows.
            (na::Point2::new(-3e38, 0.0), na::Point2::new(3e38, 0.0), 1e-3),
        ] {
            assert!(matches!(
                c.set_ruler(a, b, d),
                Err(Error::InvalidCalibration(_))
            ));
        }

        assert!(c.ruler().is_none());
        assert!(matches!(c.pixels_per_unit(), Err(Error::NotCalibrated(_))));
    }

    #[test]
    fn overflow_from_points() {
        let mut c = Calibration::default();
        c.set_overflow_points(na::Point2::new(10.0, 10.0), na::Point2::new(10.0, 4.0))
            .unwrap();
        let dir = c.overflow().unwrap();
        assert_approx_eq!(dir.x, 0.0);
        assert_approx_eq!(dir.y, -1.0);

        assert!(matches!(
            c.set_overflow_points(na::Point2::new(2.0, 3.0), na::Point2::new(2.0, 3.0)),
            Err(Error::InvalidCalibration(_))
        ));
        // A rejected arrow leaves the previous direction in place.
        assert_eq!(c.overflow(), Some(dir));
    }

    #[test]
    fn tiny_overflow_vector() {
        let mut c = Calibration::default();
        c.set_overflow_direction(na::Vector2::new(1e-10, 0.0))
            .unwrap();
        assert_approx_eq!(c.overflow().unwrap().x, 1.0);

        assert!(matches!(
            c.set_overflow_direction(na::Vector2::new(f32::NAN, 1.0)),
            Err(Error::InvalidCalibration(_))
        ));
        assert!(matches!(
            c.set_overflow_direction(na::Vector2::new(f32::INFINITY, 0.0)),
            Err(Error::InvalidCalibration(_))
        ));
    }

    #[test]
    fn uncalibrated_conversions_fail() {
        let c = Calibration::default();
        assert!(matches!(
            c.to_physical(na::Vector2::new(1.0, 0.0)),
            Err(Error::NotCalibrated(_))
        ));
        assert!(matches!(
            c.relative_angle(na::Vector2::new(1.0, 0.0)),
            Err(Error::NotCalibrated(_))
        ));
    }

    #[test]
    fn lock_freezes_calibration() {
        let mut c = calibrated();
        let spec = c.lock().unwrap();
        assert_approx_eq!(spec.pixels_per_unit, 10.0);
        assert!(matches!(
            c.set_ruler(na::Point2::new(0.0, 0.0), na::Point2::new(1.0, 0.0), 1.0),
            Err(Error::CalibrationLocked)
        ));
        assert!(matches!(
            c.set_overflow_degrees(45.0),
            Err(Error::CalibrationLocked)
        ));
        assert!(matches!(c.lock(), Err(Error::CalibrationLocked)));

        c.reset();
        assert!(!c.is_locked());
        assert!(c.ruler().is_none());
    }

    #[test]
    fn lock_requires_both_parts() {
        let mut c = Calibration::default();
        c.set_overflow_degrees(90.0).unwrap();
        assert!(matches!(c.lock(), Err(Error::NotCalibrated(_))));
        assert!(!c.is_locked());
    }

    #[test]
    fn overflow_degrees_point_up() {
        let mut c = Calibration::default();
        c.set_ruler(na::Point2::new(0.0, 0.0), na::Point2::new(20.0, 0.0), 1.0)
            .unwrap();
        c.set_overflow_degrees(90.0).unwrap();
        let dir = c.overflow().unwrap();
        assert_approx_eq!(dir.x, 0.0);
        assert_approx_eq!(dir.y, -1.0);

        let spec = c.lock().unwrap();
        assert_approx_eq!(spec.overflow_degrees(), 90.0, 1e-4);
        // Froth rising on screen moves against image y.
        assert_approx_eq!(spec.project(na::Vector2::new(0.0, -3.0)), 3.0);
    }
}
