//! The detection filter step: which images contribute and why the others
//! were dropped.

use std::fmt;

use camcal_chessboard::{ChessboardDetector, DetectionFailure};
use camcal_core::PointObservation;
use log::{debug, warn};

use crate::detect::GrayFrame;

#[derive(Clone, Debug, PartialEq)]
pub enum DiscardReason {
    Detection(DetectionFailure),
    LeftDetection(DetectionFailure),
    RightDetection(DetectionFailure),
    SizeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
}

impl DiscardReason {
    pub fn detection_failure(&self) -> Option<&DetectionFailure> {
        match self {
            Self::Detection(f) | Self::LeftDetection(f) | Self::RightDetection(f) => Some(f),
            Self::SizeMismatch { .. } => None,
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detection(e) => write!(f, "{e}"),
            Self::LeftDetection(e) => write!(f, "left: {e}"),
            Self::RightDetection(e) => write!(f, "right: {e}"),
            Self::SizeMismatch { expected, got } => write!(
                f,
                "image is {}x{}, expected {}x{}",
                got.0, got.1, expected.0, expected.1
            ),
        }
    }
}

/// Contributing and discarded input indices of one calibration call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub contributing: Vec<usize>,
    pub discarded: Vec<(usize, DiscardReason)>,
}

impl BatchSummary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn usable(&self) -> usize {
        self.contributing.len()
    }

    /// First detection failure, in input order.
    pub fn first_failure(&self) -> Option<DetectionFailure> {
        self.discarded
            .iter()
            .find_map(|(_, r)| r.detection_failure().cloned())
    }

    pub(crate) fn discard(&mut self, index: usize, reason: DiscardReason) {
        warn!("input {index} discarded: {reason}");
        self.discarded.push((index, reason));
    }
}

/// Tracks the size of the first usable image.
#[derive(Default)]
struct SizeGate(Option<(usize, usize)>);

impl SizeGate {
    fn admit(&mut self, size: (usize, usize)) -> Result<(), DiscardReason> {
        match self.0 {
            None => {
                self.0 = Some(size);
                Ok(())
            }
            Some(expected) if expected == size => Ok(()),
            Some(expected) => Err(DiscardReason::SizeMismatch {
                expected,
                got: size,
            }),
        }
    }
}

/// Detections of every usable image plus the common image size.
pub(crate) struct MonoBatch {
    pub observations: Vec<PointObservation>,
    pub summary: BatchSummary,
    pub size: Option<(usize, usize)>,
}

pub(crate) fn detect_mono<I: GrayFrame>(detector: &ChessboardDetector, images: &[I]) -> MonoBatch {
    let mut summary = BatchSummary::new(images.len());
    let mut gate = SizeGate::default();
    let mut observations = Vec::new();
    for (index, frame) in images.iter().enumerate() {
        let view = frame.gray_view();
        let outcome = detector
            .detect(&view)
            .map_err(DiscardReason::Detection)
            .and_then(|obs| gate.admit(view.size()).map(|_| obs));
        match outcome {
            Ok(obs) => {
                debug!("input {index} contributes");
                summary.contributing.push(index);
                observations.push(obs);
            }
            Err(reason) => summary.discard(index, reason),
        }
    }
    MonoBatch {
        observations,
        summary,
        size: gate.0,
    }
}

pub(crate) struct StereoBatch {
    pub left: Vec<PointObservation>,
    pub right: Vec<PointObservation>,
    pub summary: BatchSummary,
    pub size: Option<(usize, usize)>,
}

/// A pair contributes only when both sides detect and both match the size
/// of the first usable pair. Right grids are relabelled to follow the left
/// ones, which the per-image ordering rule alone does not ensure for boards
/// held near 90 degrees of roll.
pub(crate) fn detect_stereo<L: GrayFrame, R: GrayFrame>(
    detector: &ChessboardDetector,
    left: &[L],
    right: &[R],
) -> StereoBatch {
    let mut summary = BatchSummary::new(left.len());
    let mut gate = SizeGate::default();
    let (mut lobs, mut robs) = (Vec::new(), Vec::new());
    for (index, (l, r)) in left.iter().zip(right).enumerate() {
        let (lv, rv) = (l.gray_view(), r.gray_view());
        let outcome = detector
            .detect(&lv)
            .map_err(DiscardReason::LeftDetection)
            .and_then(|a| {
                detector
                    .detect(&rv)
                    .map_err(DiscardReason::RightDetection)
                    .map(|b| {
                        let b = b.aligned_to(&a);
                        (a, b)
                    })
            })
            .and_then(|pair| {
                gate.admit(lv.size())?;
                gate.admit(rv.size())?;
                Ok(pair)
            });
        match outcome {
            Ok((a, b)) => {
                summary.contributing.push(index);
                lobs.push(a);
                robs.push(b);
            }
            Err(reason) => summary.discard(index, reason),
        }
    }
    StereoBatch {
        left: lobs,
        right: robs,
        summary,
        size: gate.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camcal_core::{GrayImage, TargetGeometry};

    #[test]
    fn blank_images_are_all_discarded() {
        let detector = ChessboardDetector::new(TargetGeometry::new(4, 3, 0.1).unwrap());
        let images = vec![GrayImage::filled(64, 48, 100), GrayImage::filled(64, 48, 30)];
        let batch = detect_mono(&detector, &images);
        assert_eq!(batch.summary.total, 2);
        assert_eq!(batch.summary.usable(), 0);
        assert_eq!(batch.summary.discarded.len(), 2);
        assert!(matches!(
            batch.summary.first_failure(),
            Some(DetectionFailure::TooFewCorners { found: 0, .. })
        ));
        assert!(batch.size.is_none());
    }

    #[test]
    fn size_gate_keeps_first_size() {
        let mut gate = SizeGate::default();
        assert!(gate.admit((640, 480)).is_ok());
        assert!(gate.admit((640, 480)).is_ok());
        assert_eq!(
            gate.admit((320, 240)),
            Err(DiscardReason::SizeMismatch {
                expected: (640, 480),
                got: (320, 240)
            })
        );
    }

    #[test]
    fn reasons_render_for_reports() {
        let r = DiscardReason::RightDetection(DetectionFailure::DegenerateGrid);
        assert!(r.to_string().starts_with("right: "));
        assert!(r.detection_failure().is_some());
    }
}
