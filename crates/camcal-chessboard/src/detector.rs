use camcal_core::{GrayImageView, PointObservation, TargetGeometry};
use chess_corners::find_chess_corners_image;
use log::{debug, info};
use nalgebra::{Point2, Vector2};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::corners::{adapt_chess_corner, merge_near_duplicates, Candidate};
use crate::error::DetectionFailure;
use crate::grid::{assemble_grid, Lattice};
use crate::params::ChessboardParams;

/// Smallest side that fits the radius-5 ChESS ring plus the suppression margin.
const MIN_SIDE: usize = 13;

/// Finds the inner corners of a known checkerboard in grayscale images.
///
/// Output order is row-major over `cols x rows`: the `i` axis (length
/// `cols`) points toward +x in the image (toward +y when that axis is
/// vertical) and the `j` axis completes a right-handed frame with x right and
/// y down. When the `i` axis is close to vertical the sign rule can resolve
/// differently in two cameras; stereo callers relabel the second grid with
/// [`PointObservation::aligned_to`].
#[derive(Clone, Debug)]
pub struct ChessboardDetector {
    geometry: TargetGeometry,
    params: ChessboardParams,
}

impl ChessboardDetector {
    pub fn new(geometry: TargetGeometry) -> Self {
        Self::with_params(geometry, ChessboardParams::default())
    }

    pub fn with_params(geometry: TargetGeometry, params: ChessboardParams) -> Self {
        Self { geometry, params }
    }

    pub fn geometry(&self) -> &TargetGeometry {
        &self.geometry
    }

    pub fn params(&self) -> &ChessboardParams {
        &self.params
    }

    /// ChESS corners from `chess-corners`, near-duplicates merged, strongest
    /// first. Empty when the view does not describe a valid buffer.
    pub fn candidates(&self, image: &GrayImageView<'_>) -> Vec<Candidate> {
        let Some(img) = ::image::GrayImage::from_raw(
            image.width as u32,
            image.height as u32,
            image.data.to_vec(),
        ) else {
            return Vec::new();
        };
        let chess = &self.params.chess;
        let found: Vec<Candidate> = find_chess_corners_image(&img, &chess.to_chess_config())
            .iter()
            .filter_map(adapt_chess_corner)
            .collect();
        merge_near_duplicates(found, chess.merge_radius_px)
    }

    /// Detect and order every board corner, all or nothing.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, image),
            fields(width = image.width, height = image.height)
        )
    )]
    pub fn detect(&self, image: &GrayImageView<'_>) -> Result<PointObservation, DetectionFailure> {
        let expected = image.width * image.height;
        if image.data.len() != expected {
            return Err(DetectionFailure::InvalidBuffer {
                expected,
                got: image.data.len(),
            });
        }
        if image.width < MIN_SIDE || image.height < MIN_SIDE {
            return Err(DetectionFailure::ImageTooSmall {
                width: image.width,
                height: image.height,
            });
        }

        let (cols, rows) = (self.geometry.cols, self.geometry.rows);
        let candidates = self.candidates(image);
        debug!("{} corner candidates", candidates.len());
        if candidates.len() < self.geometry.len() {
            return Err(DetectionFailure::TooFewCorners {
                found: candidates.len(),
                needed: self.geometry.len(),
            });
        }

        let positions: Vec<Point2<f64>> = candidates.iter().map(|c| c.position).collect();
        let lattice = assemble_grid(&positions, cols, rows, &self.params.grid).ok_or(
            DetectionFailure::GridNotFound {
                cols,
                rows,
                candidates: candidates.len(),
            },
        )?;

        let points = order_lattice(&lattice, &positions, cols, rows)?;

        let border = self.params.border_px;
        let (w, h) = (image.width as f64, image.height as f64);
        if let Some(p) = points
            .iter()
            .find(|p| p.x < border || p.y < border || p.x > w - border || p.y > h - border)
        {
            return Err(DetectionFailure::NearBorder {
                x: p.x,
                y: p.y,
                border,
            });
        }

        info!("detected {cols}x{rows} chessboard");
        PointObservation::new(cols, rows, points).ok_or(DetectionFailure::DegenerateGrid)
    }
}

fn mean_step(grid: &[Vec<Point2<f64>>], di: usize, dj: usize) -> Vector2<f64> {
    let mut sum = Vector2::zeros();
    let mut n = 0usize;
    for j in 0..grid.len() - dj {
        for i in 0..grid[j].len() - di {
            sum += grid[j + dj][i + di] - grid[j][i];
            n += 1;
        }
    }
    sum / n.max(1) as f64
}

/// Maps a lattice onto the canonical row-major ordering.
fn order_lattice(
    lattice: &Lattice,
    points: &[Point2<f64>],
    cols: usize,
    rows: usize,
) -> Result<Vec<Point2<f64>>, DetectionFailure> {
    let mut grid = vec![vec![Point2::origin(); lattice.width]; lattice.height];
    for (&(i, j), &idx) in &lattice.cells {
        grid[j as usize][i as usize] = points[idx];
    }

    let swap = if cols != rows {
        (lattice.width, lattice.height) != (cols, rows)
    } else {
        let (ui, uj) = (mean_step(&grid, 1, 0), mean_step(&grid, 0, 1));
        uj.x.abs() > ui.x.abs()
    };
    if swap {
        grid = (0..lattice.width)
            .map(|i| (0..lattice.height).map(|j| grid[j][i]).collect())
            .collect();
    }
    if grid.len() != rows || grid.iter().any(|row| row.len() != cols) {
        return Err(DetectionFailure::DegenerateGrid);
    }

    let mut ui = mean_step(&grid, 1, 0);
    let uj = mean_step(&grid, 0, 1);
    let flip_i = if ui.x.abs() > 1e-6 * ui.norm() {
        ui.x < 0.0
    } else {
        ui.y < 0.0
    };
    if flip_i {
        ui = -ui;
    }
    let cross = ui.x * uj.y - ui.y * uj.x;
    if cross.abs() <= 1e-9 * ui.norm() * uj.norm() {
        return Err(DetectionFailure::DegenerateGrid);
    }
    let flip_j = cross < 0.0;

    let mut out = Vec::with_capacity(cols * rows);
    for j in 0..rows {
        for i in 0..cols {
            let ii = if flip_i { cols - 1 - i } else { i };
            let jj = if flip_j { rows - 1 - j } else { j };
            out.push(grid[jj][ii]);
        }
    }
    Ok(out)
}
