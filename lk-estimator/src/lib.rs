//! # Pyramidal Lucas-Kanade flow estimator
//!
//! Tracks a regular grid of points from one frame to the next. Every point is tracked coarse to
//! fine over an image pyramid, refining the displacement with Gauss-Newton iterations on each
//! level. Points whose neighbourhood lacks texture in both directions are left invalid.

use froth::prelude::v1::*;
use log::*;
use nalgebra as na;
use rayon::prelude::*;

/// Grayscale image with intensities in `[0; 1]`.
#[derive(Clone)]
struct Image {
    data: Vec<f32>,
    width: usize,
    height: usize,
}

impl Image {
    fn from_frame(frame: &Frame) -> Self {
        let (width, height) = frame.dim();
        Self {
            data: frame.as_slice().iter().map(|&v| v as f32 / 255.0).collect(),
            width,
            height,
        }
    }

    fn get(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.data[y * self.width + x]
    }

    /// Bilinear sample, clamped to the border.
    fn sample(&self, x: f32, y: f32) -> f32 {
        let x = x.clamp(0.0, (self.width - 1) as f32);
        let y = y.clamp(0.0, (self.height - 1) as f32);

        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let (x0, y0) = (x0 as isize, y0 as isize);

        let top = self.get(x0, y0) * (1.0 - fx) + self.get(x0 + 1, y0) * fx;
        let bottom = self.get(x0, y0 + 1) * (1.0 - fx) + self.get(x0 + 1, y0 + 1) * fx;

        top * (1.0 - fy) + bottom * fy
    }

    /// Blur with a `[1 2 1] / 4` kernel and drop every second row and column.
    fn downsample(&self) -> Self {
        let width = (self.width + 1) / 2;
        let height = (self.height + 1) / 2;

        let blur = |x: isize, y: isize| {
            let row = |y| {
                (self.get(x - 1, y) + 2.0 * self.get(x, y) + self.get(x + 1, y)) * 0.25
            };
            (row(y - 1) + 2.0 * row(y) + row(y + 1)) * 0.25
        };

        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| blur(2 * x as isize, 2 * y as isize))
            .collect();

        Self {
            data,
            width,
            height,
        }
    }

    /// Central difference gradients.
    fn gradients(&self) -> (Self, Self) {
        let mut gx = Vec::with_capacity(self.data.len());
        let mut gy = Vec::with_capacity(self.data.len());

        for y in 0..self.height as isize {
            for x in 0..self.width as isize {
                gx.push((self.get(x + 1, y) - self.get(x - 1, y)) * 0.5);
                gy.push((self.get(x, y + 1) - self.get(x, y - 1)) * 0.5);
            }
        }

        let wrap = |data| Self {
            data,
            width: self.width,
            height: self.height,
        };

        (wrap(gx), wrap(gy))
    }
}

struct Level {
    prev: Image,
    next: Image,
    gx: Image,
    gy: Image,
}

/// Lucas-Kanade estimator over a sparse grid.
#[derive(Default)]
pub struct LucasKanade {
    params: LkParams,
}

impl From<LkParams> for LucasKanade {
    fn from(params: LkParams) -> Self {
        Self { params }
    }
}

impl LucasKanade {
    pub fn params(&self) -> &LkParams {
        &self.params
    }

    fn build_pyramid(&self, prev: &Frame, next: &Frame) -> Vec<Level> {
        let window = 2 * self.params.half_window + 1;

        let mut prev = Image::from_frame(prev);
        let mut next = Image::from_frame(next);
        let mut levels = vec![];

        loop {
            let (gx, gy) = prev.gradients();
            let (down_prev, down_next) = (prev.downsample(), next.downsample());

            levels.push(Level { prev, next, gx, gy });

            // Coarser levels must still fit a whole window.
            if levels.len() > self.params.levels
                || down_prev.width < window
                || down_prev.height < window
            {
                break;
            }

            prev = down_prev;
            next = down_next;
        }

        levels
    }

    /// Track a single point, returning its displacement at full resolution.
    fn track(&self, levels: &[Level], point: na::Point2<f32>) -> Option<na::Vector2<f32>> {
        let hw = self.params.half_window as isize;
        let area = ((2 * hw + 1) * (2 * hw + 1)) as f32;

        let mut guess = na::Vector2::<f32>::zeros();

        for (lvl, level) in levels.iter().enumerate().rev() {
            let scale = (1 << lvl) as f32;
            let p = point / scale;

            let window = (-hw..=hw)
                .flat_map(|wy| (-hw..=hw).map(move |wx| (wx as f32, wy as f32)))
                .map(|(wx, wy)| {
                    let (x, y) = (p.x + wx, p.y + wy);
                    (
                        (x, y),
                        level.prev.sample(x, y),
                        na::Vector2::new(level.gx.sample(x, y), level.gy.sample(x, y)),
                    )
                })
                .collect::<Vec<_>>();

            let g = window
                .iter()
                .fold(na::Matrix2::<f32>::zeros(), |acc, (_, _, grad)| {
                    acc + grad * grad.transpose()
                });

            let (a, b, c) = (g[(0, 0)], g[(0, 1)], g[(1, 1)]);
            let min_eigen = (a + c - ((a - c).powi(2) + 4.0 * b * b).sqrt()) * 0.5 / area;

            let inverse = if min_eigen >= self.params.min_eigen {
                g.try_inverse()
            } else {
                None
            };

            match inverse {
                Some(inverse) => {
                    for _ in 0..self.params.iterations {
                        let mismatch = window.iter().fold(
                            na::Vector2::<f32>::zeros(),
                            |acc, &((x, y), i0, grad)| {
                                let i1 = level.next.sample(x + guess.x, y + guess.y);
                                acc + grad * (i1 - i0)
                            },
                        );

                        let delta = -(inverse * mismatch);
                        guess += delta;

                        if delta.magnitude() < self.params.epsilon {
                            break;
                        }
                    }
                }
                // Coarse levels may lose the texture, the finest one must not.
                None if lvl == 0 => return None,
                None => {}
            }

            if lvl > 0 {
                guess *= 2.0;
            }
        }

        let (w, h) = (levels[0].prev.width as f32, levels[0].prev.height as f32);
        let target = point + guess;

        if guess.iter().all(|v| v.is_finite())
            && (0.0..w).contains(&target.x)
            && (0.0..h).contains(&target.y)
        {
            Some(guess)
        } else {
            None
        }
    }
}

impl FlowEstimator for LucasKanade {
    fn estimate(&mut self, prev: &Frame, next: &Frame) -> Result<DisplacementField> {
        prev.check_dim(next)?;

        let (w, h) = prev.dim();
        let mut field = DisplacementField::grid(
            w,
            h,
            self.params.grid_step,
            self.params.half_window,
        );

        if field.size() == 0 {
            return Err(Error::InvalidFrame("frame is smaller than the tracking window"));
        }

        let levels = self.build_pyramid(prev, next);
        let (gw, gh) = field.dim();

        let tracked = (0..gw * gh)
            .into_par_iter()
            .map(|i| self.track(&levels, field.position(i % gw, i / gw)))
            .collect::<Vec<_>>();

        for (i, motion) in tracked.into_iter().enumerate() {
            match motion {
                Some(motion) => field.set_motion(i % gw, i / gw, motion),
                None => field.invalidate(i % gw, i / gw),
            }
        }

        let ratio = field.valid_count() as f32 / field.size() as f32;

        trace!(
            "tracked {}/{} points over {} levels",
            field.valid_count(),
            field.size(),
            levels.len()
        );

        if field.valid_count() == 0 || ratio < self.params.min_tracked_ratio {
            return Err(Error::InsufficientTexture);
        }

        Ok(field)
    }

    fn name(&self) -> &str {
        "lucas-kanade"
    }
}
