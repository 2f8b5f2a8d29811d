/// Why a single image produced no usable board detection.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DetectionFailure {
    #[error("image buffer holds {got} bytes, expected {expected}")]
    InvalidBuffer { expected: usize, got: usize },
    #[error("image {width}x{height} is too small for corner detection")]
    ImageTooSmall { width: usize, height: usize },
    #[error("found {found} corner candidates, need at least {needed}")]
    TooFewCorners { found: usize, needed: usize },
    #[error("no complete {cols}x{rows} grid among {candidates} corner candidates")]
    GridNotFound {
        cols: usize,
        rows: usize,
        candidates: usize,
    },
    #[error("detected grid has degenerate orientation")]
    DegenerateGrid,
    #[error("corner ({x:.1}, {y:.1}) lies within {border} px of the image edge")]
    NearBorder { x: f64, y: f64, border: f64 },
}
