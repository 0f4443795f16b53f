//! # Regions of interest
//!
//! A region is a simple polygon in frame pixel coordinates. Each region reduces the
//! displacement samples that fall inside it to one representative vector per frame pair.

use crate::error::{Error, Result};
use crate::field::DisplacementField;
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance for boundary tests, in pixels.
const EDGE_EPS: f32 = 1e-4;

/// Stable identifier of a region within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoiId(pub u32);

impl fmt::Display for RoiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Statistic used to reduce the displacement samples of a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statistic {
    /// Coordinate-wise mean.
    Mean,
    /// Coordinate-wise median.
    Median,
    /// Mean weighted by the magnitude of each sample.
    MagnitudeWeighted,
}

impl Default for Statistic {
    fn default() -> Self {
        Self::Mean
    }
}

impl Statistic {
    /// Reduce a set of vectors to one, `None` if the set is empty.
    pub fn reduce(&self, vectors: &[na::Vector2<f32>]) -> Option<na::Vector2<f32>> {
        if vectors.is_empty() {
            return None;
        }

        let ret = match self {
            Self::Mean => vectors.iter().sum::<na::Vector2<f32>>() / vectors.len() as f32,
            Self::Median => {
                let median = |mut vals: Vec<f32>| {
                    vals.sort_by(|a, b| a.total_cmp(b));
                    let mid = vals.len() / 2;
                    if vals.len() % 2 == 0 {
                        (vals[mid - 1] + vals[mid]) * 0.5
                    } else {
                        vals[mid]
                    }
                };
                na::Vector2::new(
                    median(vectors.iter().map(|v| v.x).collect()),
                    median(vectors.iter().map(|v| v.y).collect()),
                )
            }
            Self::MagnitudeWeighted => {
                let (sum, weight) = vectors
                    .iter()
                    .map(|v| (v * v.magnitude(), v.magnitude()))
                    .fold((na::Vector2::<f32>::zeros(), 0.0), |(s, w), (v, m)| {
                        (s + v, w + m)
                    });

                if weight > 0.0 {
                    sum / weight
                } else {
                    na::Vector2::zeros()
                }
            }
        };

        Some(ret)
    }
}

/// Simple polygon with at least 3 vertices.
///
/// Serialized as its vertex list, deserialization goes through [`Polygon::new`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<na::Point2<f32>>", into = "Vec<na::Point2<f32>>")]
pub struct Polygon {
    vertices: Vec<na::Point2<f32>>,
    min: na::Point2<f32>,
    max: na::Point2<f32>,
}

impl Polygon {
    /// Validate and create a polygon.
    ///
    /// Fails with `InvalidGeometry` for fewer than 3 vertices, zero area, repeated consecutive
    /// vertices or self intersecting edges.
    pub fn new(vertices: Vec<na::Point2<f32>>) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(Error::InvalidGeometry("fewer than 3 vertices"));
        }

        if vertices.iter().any(|v| !v.x.is_finite() || !v.y.is_finite()) {
            return Err(Error::InvalidGeometry("non-finite vertex"));
        }

        let n = vertices.len();
        let edge = |i: usize| (vertices[i], vertices[(i + 1) % n]);

        if (0..n).any(|i| {
            let (a, b) = edge(i);
            a == b
        }) {
            return Err(Error::InvalidGeometry("repeated vertex"));
        }

        if signed_area(&vertices).abs() <= EDGE_EPS {
            return Err(Error::InvalidGeometry("zero area"));
        }

        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = edge(i);
                let (c, d) = edge(j);

                let adjacent = j == i + 1 || (i == 0 && j == n - 1);

                let bad = if adjacent {
                    // Shared vertex is the only allowed contact, reject folding back.
                    let (shared, p, q) = if j == i + 1 { (b, a, d) } else { (a, b, c) };
                    orient(shared, p, q).abs() <= EDGE_EPS && (p - shared).dot(&(q - shared)) > 0.0
                } else {
                    segments_intersect(a, b, c, d)
                };

                if bad {
                    return Err(Error::InvalidGeometry("self intersecting polygon"));
                }
            }
        }

        let min = vertices
            .iter()
            .fold(vertices[0], |m, v| na::Point2::new(m.x.min(v.x), m.y.min(v.y)));
        let max = vertices
            .iter()
            .fold(vertices[0], |m, v| na::Point2::new(m.x.max(v.x), m.y.max(v.y)));

        Ok(Self { vertices, min, max })
    }

    /// Create an axis aligned rectangle.
    ///
    /// # Arguments
    ///
    /// * `x` - left edge.
    /// * `y` - top edge.
    /// * `w` - width, must be positive.
    /// * `h` - height, must be positive.
    pub fn rect(x: f32, y: f32, w: f32, h: f32) -> Result<Self> {
        if !(w > 0.0 && h > 0.0) {
            return Err(Error::InvalidGeometry("rectangle must have positive size"));
        }

        Self::new(vec![
            na::Point2::new(x, y),
            na::Point2::new(x + w, y),
            na::Point2::new(x + w, y + h),
            na::Point2::new(x, y + h),
        ])
    }

    pub fn vertices(&self) -> &[na::Point2<f32>] {
        &self.vertices
    }

    /// Axis aligned bounding box, as `(min, max)`.
    pub fn bounds(&self) -> (na::Point2<f32>, na::Point2<f32>) {
        (self.min, self.max)
    }

    pub fn area(&self) -> f32 {
        signed_area(&self.vertices).abs()
    }

    /// Area centroid of the polygon.
    pub fn centroid(&self) -> na::Point2<f32> {
        let n = self.vertices.len();
        let a = signed_area(&self.vertices);
        let (cx, cy) = (0..n).fold((0.0, 0.0), |(cx, cy), i| {
            let p = self.vertices[i];
            let q = self.vertices[(i + 1) % n];
            let cross = p.x * q.y - q.x * p.y;
            (cx + (p.x + q.x) * cross, cy + (p.y + q.y) * cross)
        });
        na::Point2::new(cx / (6.0 * a), cy / (6.0 * a))
    }

    /// Check whether a point lies inside the polygon. Boundary points are inside.
    pub fn contains(&self, p: na::Point2<f32>) -> bool {
        if p.x < self.min.x - EDGE_EPS
            || p.y < self.min.y - EDGE_EPS
            || p.x > self.max.x + EDGE_EPS
            || p.y > self.max.y + EDGE_EPS
        {
            return false;
        }

        let n = self.vertices.len();

        if (0..n).any(|i| on_segment(self.vertices[i], self.vertices[(i + 1) % n], p)) {
            return true;
        }

        // Crossing number test.
        let mut inside = false;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            if (a.y > p.y) != (b.y > p.y) {
                let x = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
                if p.x < x {
                    inside = !inside;
                }
            }
        }

        inside
    }
}

impl TryFrom<Vec<na::Point2<f32>>> for Polygon {
    type Error = Error;

    fn try_from(vertices: Vec<na::Point2<f32>>) -> Result<Self> {
        Self::new(vertices)
    }
}

impl From<Polygon> for Vec<na::Point2<f32>> {
    fn from(polygon: Polygon) -> Self {
        polygon.vertices
    }
}

/// Local reference frame of a region, used to draw its axes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalAxes {
    pub origin: na::Point2<f32>,
    pub x: na::Unit<na::Vector2<f32>>,
    pub y: na::Unit<na::Vector2<f32>>,
}

/// Named region of interest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    id: RoiId,
    name: String,
    polygon: Polygon,
}

impl Roi {
    pub fn new(id: RoiId, name: impl Into<String>, polygon: Polygon) -> Self {
        Self {
            id,
            name: name.into(),
            polygon,
        }
    }

    pub fn id(&self) -> RoiId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn polygon(&self) -> &Polygon {
        &self.polygon
    }

    /// Get the local axes of the region.
    ///
    /// The origin is the centroid. The x axis follows the overflow direction, or image x when it
    /// is not known yet. The y axis is x turned a quarter anticlockwise on screen.
    pub fn axes(&self, overflow: Option<na::Unit<na::Vector2<f32>>>) -> LocalAxes {
        let x = overflow.unwrap_or_else(na::Vector2::x_axis);
        let y = na::Unit::new_unchecked(na::Vector2::new(x.y, -x.x));
        LocalAxes {
            origin: self.polygon.centroid(),
            x,
            y,
        }
    }

    /// Reduce the displacement samples inside the region to a single vector.
    ///
    /// Fails with `EmptyRoi` if no valid sample falls inside.
    pub fn aggregate(
        &self,
        field: &DisplacementField,
        statistic: Statistic,
    ) -> Result<na::Vector2<f32>> {
        let (min, max) = self.polygon.bounds();

        let selected = field
            .iter_within(
                min - na::Vector2::repeat(EDGE_EPS),
                max + na::Vector2::repeat(EDGE_EPS),
            )
            .filter(|(pos, _)| self.polygon.contains(*pos))
            .map(|(_, motion)| motion)
            .collect::<Vec<_>>();

        statistic
            .reduce(&selected)
            .ok_or(Error::EmptyRoi(self.id.0))
    }
}

fn signed_area(vertices: &[na::Point2<f32>]) -> f32 {
    let n = vertices.len();
    (0..n)
        .map(|i| {
            let p = vertices[i];
            let q = vertices[(i + 1) % n];
            p.x * q.y - q.x * p.y
        })
        .sum::<f32>()
        * 0.5
}

fn orient(a: na::Point2<f32>, b: na::Point2<f32>, c: na::Point2<f32>) -> f32 {
    (b - a).perp(&(c - a))
}

fn on_segment(a: na::Point2<f32>, b: na::Point2<f32>, p: na::Point2<f32>) -> bool {
    let ab = b - a;
    let len = ab.magnitude();
    // Distance from the line, then the projection range.
    if (orient(a, b, p) / len).abs() > EDGE_EPS {
        return false;
    }
    let t = (p - a).dot(&ab);
    t >= -EDGE_EPS * len && t <= len * len + EDGE_EPS * len
}

fn segments_intersect(
    a: na::Point2<f32>,
    b: na::Point2<f32>,
    c: na::Point2<f32>,
    d: na::Point2<f32>,
) -> bool {
    let d1 = orient(c, d, a);
    let d2 = orient(c, d, b);
    let d3 = orient(a, b, c);
    let d4 = orient(a, b, d);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    on_segment(c, d, a) || on_segment(c, d, b) || on_segment(a, b, c) || on_segment(a, b, d)
}
