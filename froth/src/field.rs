//! # Displacement field
//!
//! Output of a flow estimator for one frame pair. The field is a regular grid of sample points
//! laid over the frame. A dense field has one sample per pixel, a sparse one samples every
//! `step` pixels. Individual samples can be marked invalid when the estimator could not track
//! them.

use nalgebra::*;

/// Grid of displacement vectors, in pixel units.
#[derive(Clone, Debug)]
pub struct DisplacementField {
    vf: Matrix2xX<f32>,
    valid: Vec<bool>,
    width: usize,
    origin: Point2<f32>,
    step: f32,
    frame_dim: (usize, usize),
}

impl DisplacementField {
    /// Create a new displacement field with every sample valid and zero.
    ///
    /// # Arguments
    ///
    /// * `width` - number of samples horizontally.
    /// * `height` - number of samples vertically.
    /// * `origin` - frame coordinate of sample `(0, 0)`.
    /// * `step` - distance between neighbouring samples, in pixels.
    /// * `frame_dim` - dimensions of the frames the field was computed on.
    pub fn new(
        width: usize,
        height: usize,
        origin: Point2<f32>,
        step: f32,
        frame_dim: (usize, usize),
    ) -> Self {
        Self {
            vf: Matrix2xX::repeat(width * height, 0f32),
            valid: vec![true; width * height],
            width,
            origin,
            step,
            frame_dim,
        }
    }

    /// Create a dense field with one sample per frame pixel.
    pub fn dense(frame_width: usize, frame_height: usize) -> Self {
        Self::new(
            frame_width,
            frame_height,
            Point2::origin(),
            1.0,
            (frame_width, frame_height),
        )
    }

    /// Create a sparse field sampling every `step` pixels, with a `margin` pixel border.
    pub fn grid(frame_width: usize, frame_height: usize, step: usize, margin: usize) -> Self {
        let step = step.max(1);
        let count = |len: usize| {
            if len > 2 * margin {
                (len - 2 * margin - 1) / step + 1
            } else {
                0
            }
        };

        Self::new(
            count(frame_width),
            count(frame_height),
            Point2::new(margin as f32, margin as f32),
            step as f32,
            (frame_width, frame_height),
        )
    }

    /// Get width and height of the sample grid.
    pub fn dim(&self) -> (usize, usize) {
        if self.width == 0 {
            (0, 0)
        } else {
            (self.width, self.vf.ncols() / self.width)
        }
    }

    /// Get dimensions of the frames the field covers.
    pub fn frame_dim(&self) -> (usize, usize) {
        self.frame_dim
    }

    /// Get number of samples in the grid.
    ///
    /// This is the same as `width * height`
    pub fn size(&self) -> usize {
        self.vf.ncols()
    }

    /// Number of valid samples.
    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    /// Frame coordinate of a grid sample.
    pub fn position(&self, x: usize, y: usize) -> Point2<f32> {
        self.origin + Vector2::new(x as f32, y as f32) * self.step
    }

    /// Set motion at given grid position.
    ///
    /// # Arguments
    ///
    /// * `x` - horizontal grid coordinate to set at.
    /// * `y` - vertical grid coordinate to set at.
    /// * `motion` - motion to set.
    pub fn set_motion(&mut self, x: usize, y: usize, motion: Vector2<f32>) {
        let idx = self.width * y + x;
        self.vf.set_column(idx, &motion);
        self.valid[idx] = true;
    }

    /// Mark a grid sample as untracked.
    pub fn invalidate(&mut self, x: usize, y: usize) {
        let idx = self.width * y + x;
        self.vf.set_column(idx, &Vector2::zeros());
        self.valid[idx] = false;
    }

    /// Get motion at grid coordinates, `None` if the sample is invalid.
    pub fn get_motion(&self, x: usize, y: usize) -> Option<Vector2<f32>> {
        let idx = self.width * y + x;
        if self.valid[idx] {
            Some(self.vf.column(idx).into())
        } else {
            None
        }
    }

    /// Iterate every valid element of the field.
    ///
    /// The resulting iterator yields `(position, motion)` entries, with positions in frame
    /// pixels.
    pub fn iter(&self) -> impl Iterator<Item = (Point2<f32>, Vector2<f32>)> + '_ {
        let (width, height) = self.dim();
        (0..height).flat_map(move |y| {
            (0..width).filter_map(move |x| {
                self.get_motion(x, y)
                    .map(|motion| (self.position(x, y), motion))
            })
        })
    }

    /// Iterate valid elements whose position lies within an axis aligned box.
    ///
    /// Only the grid cells overlapping the box are visited.
    pub fn iter_within(
        &self,
        min: Point2<f32>,
        max: Point2<f32>,
    ) -> impl Iterator<Item = (Point2<f32>, Vector2<f32>)> + '_ {
        let (width, height) = self.dim();

        let range = |lo: f32, hi: f32, origin: f32, len: usize| {
            let start = ((lo - origin) / self.step).ceil().max(0.0) as usize;
            let end = if hi < origin {
                0
            } else {
                (((hi - origin) / self.step).floor() as usize)
                    .saturating_add(1)
                    .min(len)
            };
            start..end.max(start)
        };

        let xs = range(min.x, max.x, self.origin.x, width);
        let ys = range(min.y, max.y, self.origin.y, height);

        ys.flat_map(move |y| {
            xs.clone().filter_map(move |x| {
                self.get_motion(x, y)
                    .map(|motion| (self.position(x, y), motion))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_layout() {
        let f = DisplacementField::grid(100, 50, 10, 5);
        assert_eq!(f.dim(), (9, 4));
        assert_eq!(f.frame_dim(), (100, 50));
        assert_eq!(f.position(0, 0), Point2::new(5.0, 5.0));
        assert_eq!(f.position(8, 3), Point2::new(85.0, 35.0));
    }

    #[test]
    fn tiny_frame_has_empty_grid() {
        let f = DisplacementField::grid(8, 8, 4, 4);
        assert_eq!(f.size(), 0);
        assert_eq!(f.iter().count(), 0);
    }

    #[test]
    fn invalid_samples_are_skipped() {
        let mut f = DisplacementField::dense(3, 2);
        f.set_motion(1, 1, Vector2::new(1.0, 2.0));
        f.invalidate(0, 0);
        assert_eq!(f.valid_count(), 5);
        assert_eq!(f.get_motion(0, 0), None);
        assert_eq!(f.get_motion(1, 1), Some(Vector2::new(1.0, 2.0)));
        assert!(f.iter().all(|(p, _)| p != Point2::new(0.0, 0.0)));
    }

    #[test]
    fn box_iteration_matches_filter() {
        let f = DisplacementField::grid(64, 48, 6, 3);
        let min = Point2::new(10.5, 7.0);
        let max = Point2::new(40.0, 33.0);
        let expected = f
            .iter()
            .filter(|(p, _)| p.x >= min.x && p.x <= max.x && p.y >= min.y && p.y <= max.y)
            .map(|(p, _)| p)
            .collect::<Vec<_>>();
        let got = f.iter_within(min, max).map(|(p, _)| p).collect::<Vec<_>>();
        assert!(!expected.is_empty());
        assert_eq!(expected, got);
    }

    #[test]
    fn box_outside_field() {
        let f = DisplacementField::grid(64, 48, 6, 3);
        assert_eq!(
            f.iter_within(Point2::new(-20.0, -20.0), Point2::new(-1.0, -1.0))
                .count(),
            0
        );
        assert_eq!(
            f.iter_within(Point2::new(100.0, 100.0), Point2::new(200.0, 200.0))
                .count(),
            0
        );
    }
}
