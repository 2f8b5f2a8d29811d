use nalgebra::{Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TargetError {
    #[error("cols and rows must be >= 2 (got {cols}x{rows})")]
    GridTooSmall { cols: usize, rows: usize },
    #[error("spacing must be positive and finite (got {0})")]
    InvalidSpacing(f64),
}

/// Planar checkerboard: `cols` x `rows` inner corners, `spacing` between
/// adjacent corners in world units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetGeometry {
    pub cols: usize,
    pub rows: usize,
    pub spacing: f64,
}

impl TargetGeometry {
    pub fn new(cols: usize, rows: usize, spacing: f64) -> Result<Self, TargetError> {
        let geometry = Self {
            cols,
            rows,
            spacing,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn validate(&self) -> Result<(), TargetError> {
        if self.cols < 2 || self.rows < 2 {
            return Err(TargetError::GridTooSmall {
                cols: self.cols,
                rows: self.rows,
            });
        }
        if !(self.spacing.is_finite() && self.spacing > 0.0) {
            return Err(TargetError::InvalidSpacing(self.spacing));
        }
        Ok(())
    }

    /// Number of corners on the board.
    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize) -> usize {
        j * self.cols + i
    }

    /// Board-frame position of corner `(i, j)`; the board lies in `z = 0`.
    pub fn object_point(&self, i: usize, j: usize) -> Point3<f64> {
        Point3::new(i as f64 * self.spacing, j as f64 * self.spacing, 0.0)
    }

    /// All corners in row-major order.
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        (0..self.rows)
            .flat_map(|j| (0..self.cols).map(move |i| (i, j)))
            .map(|(i, j)| self.object_point(i, j))
            .collect()
    }
}

/// Ordered pixel positions of every board corner found in one image.
///
/// Points are row-major: corner `(i, j)` lives at index `j * cols + i`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointObservation {
    pub cols: usize,
    pub rows: usize,
    pub points: Vec<Point2<f64>>,
}

impl PointObservation {
    /// Returns `None` unless `points.len() == cols * rows`.
    pub fn new(cols: usize, rows: usize, points: Vec<Point2<f64>>) -> Option<Self> {
        (points.len() == cols * rows).then_some(Self { cols, rows, points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> Point2<f64> {
        self.points[j * self.cols + i]
    }

    pub fn row(&self, j: usize) -> &[Point2<f64>] {
        &self.points[j * self.cols..(j + 1) * self.cols]
    }

    /// Whether this observation has the shape of `geometry`.
    pub fn matches(&self, geometry: &TargetGeometry) -> bool {
        self.cols == geometry.cols && self.rows == geometry.rows && self.len() == geometry.len()
    }

    /// Board corners in the order top-left, top-right, bottom-right, bottom-left.
    pub fn outside_corners(&self) -> [Point2<f64>; 4] {
        let (c, r) = (self.cols - 1, self.rows - 1);
        [self.get(0, 0), self.get(c, 0), self.get(c, r), self.get(0, r)]
    }

    /// Same corners with every point mapped through `f`.
    pub fn map_points(&self, f: impl FnMut(&Point2<f64>) -> Point2<f64>) -> Self {
        Self {
            cols: self.cols,
            rows: self.rows,
            points: self.points.iter().map(f).collect(),
        }
    }

    /// Sum of the first-to-last corner vectors of every row.
    fn i_axis(&self) -> Vector2<f64> {
        (0..self.rows)
            .map(|j| self.get(self.cols - 1, j) - self.get(0, j))
            .sum()
    }

    /// Relabels the grid by `quarter_turns` in-plane turns; handedness is
    /// kept. Odd turns exist only for square grids.
    pub fn rotated(&self, quarter_turns: usize) -> Option<Self> {
        let (c, r) = (self.cols, self.rows);
        let k = quarter_turns % 4;
        if k % 2 == 1 && c != r {
            return None;
        }
        let mut points = Vec::with_capacity(self.len());
        for j in 0..r {
            for i in 0..c {
                let (oi, oj) = match k {
                    0 => (i, j),
                    1 => (j, c - 1 - i),
                    2 => (c - 1 - i, r - 1 - j),
                    _ => (r - 1 - j, i),
                };
                points.push(self.get(oi, oj));
            }
        }
        Some(Self {
            cols: c,
            rows: r,
            points,
        })
    }

    /// The relabelling of this grid whose `i` axis best follows the `i` axis
    /// of `reference`, an observation of the same board from a nearby camera.
    pub fn aligned_to(&self, reference: &Self) -> Self {
        let target = reference.i_axis();
        (0..4)
            .filter_map(|k| self.rotated(k))
            .map(|obs| (obs.i_axis().dot(&target), obs))
            .fold(None, |best: Option<(f64, Self)>, cand| match best {
                Some(b) if b.0 >= cand.0 => Some(b),
                _ => Some(cand),
            })
            .map_or_else(|| self.clone(), |(_, obs)| obs)
    }
}
