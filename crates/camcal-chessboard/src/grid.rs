//! Lattice assembly over corner candidates.
//!
//! A seed corner and two of its neighbours fix the lattice directions; the
//! lattice then grows cell by cell, predicting each empty cell from filled
//! neighbours (straight-line extrapolation and parallelogram completion) and
//! claiming the nearest unused candidate close enough to the prediction.

use std::collections::{BTreeSet, HashMap};

use kiddo::{KdTree, SquaredEuclidean};
use log::debug;
use nalgebra::{Point2, Vector2};

use crate::params::GridParams;

pub type Cell = (i32, i32);

const AXES: [Cell; 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// Candidate indices keyed by lattice cell, normalized so that the smallest
/// `i` and `j` are zero.
#[derive(Clone, Debug, PartialEq)]
pub struct Lattice {
    pub cells: HashMap<Cell, usize>,
    pub width: usize,
    pub height: usize,
}

impl Lattice {
    fn from_cells(cells: HashMap<Cell, usize>) -> Option<Self> {
        let min_i = cells.keys().map(|c| c.0).min()?;
        let max_i = cells.keys().map(|c| c.0).max()?;
        let min_j = cells.keys().map(|c| c.1).min()?;
        let max_j = cells.keys().map(|c| c.1).max()?;
        let cells = cells
            .into_iter()
            .map(|((i, j), idx)| ((i - min_i, j - min_j), idx))
            .collect();
        Some(Self {
            cells,
            width: (max_i - min_i + 1) as usize,
            height: (max_j - min_j + 1) as usize,
        })
    }

    /// Every cell of the bounding rectangle is filled.
    pub fn is_complete(&self) -> bool {
        self.cells.len() == self.width * self.height
    }

    /// Complete and of size `cols x rows` in either orientation.
    pub fn fits(&self, cols: usize, rows: usize) -> bool {
        self.is_complete()
            && ((self.width, self.height) == (cols, rows)
                || (self.width, self.height) == (rows, cols))
    }
}

struct Growth<'a> {
    points: &'a [Point2<f64>],
    tree: &'a KdTree<f64, 2>,
    cells: HashMap<Cell, usize>,
    used: Vec<bool>,
}

impl Growth<'_> {
    fn pos(&self, c: Cell) -> Option<Vector2<f64>> {
        self.cells.get(&c).map(|&idx| self.points[idx].coords)
    }

    fn claim(&mut self, c: Cell, idx: usize) {
        self.cells.insert(c, idx);
        self.used[idx] = true;
    }

    /// Predicted position of `c`, smallest neighbouring step, and number of predictors.
    fn predict(&self, (i, j): Cell) -> Option<(Vector2<f64>, f64, usize)> {
        let mut sum = Vector2::zeros();
        let mut n = 0usize;
        let mut step = f64::INFINITY;

        for (di, dj) in AXES {
            let near = self.pos((i - di, j - dj));
            let far = self.pos((i - 2 * di, j - 2 * dj));
            if let (Some(a), Some(b)) = (near, far) {
                sum += 2.0 * a - b;
                n += 1;
                step = step.min((a - b).norm());
            }
        }
        for di in [1, -1] {
            for dj in [1, -1] {
                let a = self.pos((i - di, j));
                let b = self.pos((i, j - dj));
                let c = self.pos((i - di, j - dj));
                if let (Some(a), Some(b), Some(c)) = (a, b, c) {
                    sum += a + b - c;
                    n += 1;
                    step = step.min((a - c).norm()).min((b - c).norm());
                }
            }
        }

        (n > 0).then(|| (sum / n as f64, step, n))
    }

    fn nearest(&self, p: &Vector2<f64>) -> Option<(usize, f64)> {
        self.tree
            .nearest_n::<SquaredEuclidean>(&[p.x, p.y], 1)
            .first()
            .map(|nn| (nn.item as usize, nn.distance.sqrt()))
    }

    fn grow(&mut self, params: &GridParams, limit: usize) -> bool {
        let mut failed: HashMap<Cell, usize> = HashMap::new();
        loop {
            let frontier: BTreeSet<Cell> = self
                .cells
                .keys()
                .flat_map(|&(i, j)| AXES.iter().map(move |&(di, dj)| (i + di, j + dj)))
                .filter(|c| !self.cells.contains_key(c))
                .collect();

            let mut added = false;
            for cell in frontier {
                let Some((pred, step, n)) = self.predict(cell) else {
                    continue;
                };
                if failed.get(&cell).is_some_and(|&m| m >= n) {
                    continue;
                }
                match self.nearest(&pred) {
                    Some((idx, dist))
                        if !self.used[idx] && dist <= params.match_tolerance * step =>
                    {
                        self.claim(cell, idx);
                        added = true;
                    }
                    _ => {
                        failed.insert(cell, n);
                    }
                }
            }

            if self.cells.len() > limit {
                return false;
            }
            if !added {
                return true;
            }
        }
    }
}

/// Picks the lattice directions at `seed`: the nearest neighbour, and the
/// nearest neighbour that is at least `min_axis_angle_deg` away from that axis.
fn seed_axes(
    points: &[Point2<f64>],
    tree: &KdTree<f64, 2>,
    seed: usize,
    params: &GridParams,
) -> Option<(usize, usize)> {
    let s = points[seed];
    let neighbours: Vec<usize> = tree
        .nearest_n::<SquaredEuclidean>(&[s.x, s.y], params.k_neighbors + 1)
        .iter()
        .map(|nn| nn.item as usize)
        .filter(|&idx| idx != seed)
        .collect();

    let (&first, rest) = neighbours.split_first()?;
    let u = points[first] - s;
    let lu = u.norm();
    if lu < 1e-9 {
        return None;
    }
    let max_cos = params.min_axis_angle_deg.to_radians().cos();
    let second = rest.iter().copied().find(|&idx| {
        let v = points[idx] - s;
        let lv = v.norm();
        lv > 1e-9 && (u.dot(&v) / (lu * lv)).abs() < max_cos
    })?;
    Some((first, second))
}

/// Tries up to `params.max_seeds` seeds (in the given order) and returns the
/// first lattice that fits `cols x rows`.
pub fn assemble_grid(
    points: &[Point2<f64>],
    cols: usize,
    rows: usize,
    params: &GridParams,
) -> Option<Lattice> {
    if points.len() < 3 {
        return None;
    }
    let coords: Vec<[f64; 2]> = points.iter().map(|p| [p.x, p.y]).collect();
    let tree: KdTree<f64, 2> = (&coords).into();
    let limit = cols * rows;

    for seed in 0..points.len().min(params.max_seeds) {
        let Some((a, b)) = seed_axes(points, &tree, seed, params) else {
            continue;
        };
        let mut growth = Growth {
            points,
            tree: &tree,
            cells: HashMap::new(),
            used: vec![false; points.len()],
        };
        growth.claim((0, 0), seed);
        growth.claim((1, 0), a);
        growth.claim((0, 1), b);

        if !growth.grow(params, limit) {
            debug!("seed {seed}: lattice outgrew {cols}x{rows}");
            continue;
        }
        let Some(lattice) = Lattice::from_cells(growth.cells) else {
            continue;
        };
        if lattice.fits(cols, rows) {
            debug!("seed {seed}: {}x{} lattice", lattice.width, lattice.height);
            return Some(lattice);
        }
        debug!(
            "seed {seed}: {}x{} lattice with {} cells does not fit {cols}x{rows}",
            lattice.width,
            lattice.height,
            lattice.cells.len()
        );
    }
    None
}
