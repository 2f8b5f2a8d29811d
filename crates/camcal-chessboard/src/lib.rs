//! Checkerboard corner detector.
//!
//! Pipeline: ChESS corners from `chess-corners`, near-duplicate merging,
//! lattice assembly over a KD-tree of candidates, canonical ordering.
//! Detection is all-or-nothing: either every inner corner of the
//! requested board is returned in order, or a [`DetectionFailure`] says why not.
//!
//! ```no_run
//! use camcal_chessboard::ChessboardDetector;
//! use camcal_core::{GrayImage, TargetGeometry};
//!
//! let geometry = TargetGeometry::new(8, 6, 0.108)?;
//! let detector = ChessboardDetector::new(geometry);
//! let image = GrayImage::filled(640, 480, 0);
//! match detector.detect(&image.view()) {
//!     Ok(obs) => println!("{} corners", obs.len()),
//!     Err(e) => println!("no board: {e}"),
//! }
//! # Ok::<(), camcal_core::TargetError>(())
//! ```

mod corners;
mod detector;
mod error;
mod grid;
mod params;

pub use corners::{adapt_chess_corner, merge_near_duplicates, Candidate};
pub use detector::ChessboardDetector;
pub use error::DetectionFailure;
pub use grid::{assemble_grid, Lattice};
pub use params::{ChessParams, ChessboardParams, GridParams};
