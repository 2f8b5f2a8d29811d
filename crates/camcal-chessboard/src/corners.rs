use chess_corners::CornerDescriptor;
use nalgebra::Point2;

/// Corner candidate handed to the grid assembly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub position: Point2<f64>,
    pub strength: f32,
}

/// Converts a `chess-corners` descriptor; corners with a non-finite position
/// or response are dropped.
pub fn adapt_chess_corner(c: &CornerDescriptor) -> Option<Candidate> {
    let (x, y) = (c.x as f64, c.y as f64);
    (x.is_finite() && y.is_finite() && c.response.is_finite()).then(|| Candidate {
        position: Point2::new(x, y),
        strength: c.response,
    })
}

/// Strongest-first candidates with every corner within `radius` pixels of a
/// stronger one folded into it.
pub fn merge_near_duplicates(mut candidates: Vec<Candidate>, radius: f64) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    if radius <= 0.0 {
        return candidates;
    }
    let r2 = radius * radius;
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        if kept
            .iter()
            .all(|k| (k.position - c.position).norm_squared() > r2)
        {
            kept.push(c);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(x: f64, y: f64, strength: f32) -> Candidate {
        Candidate {
            position: Point2::new(x, y),
            strength,
        }
    }

    #[test]
    fn close_pair_keeps_the_stronger_corner() {
        let merged = merge_near_duplicates(
            vec![
                cand(10.0, 10.0, 3.0),
                cand(10.6, 10.4, 9.0),
                cand(30.0, 10.0, 5.0),
            ],
            1.5,
        );
        assert_eq!(merged, vec![cand(10.6, 10.4, 9.0), cand(30.0, 10.0, 5.0)]);
    }

    #[test]
    fn distinct_corners_survive_and_are_sorted() {
        let merged = merge_near_duplicates(
            vec![cand(0.0, 0.0, 1.0), cand(5.0, 0.0, 4.0), cand(0.0, 5.0, 2.0)],
            1.5,
        );
        let strengths: Vec<f32> = merged.iter().map(|c| c.strength).collect();
        assert_eq!(strengths, [4.0, 2.0, 1.0]);
    }

    #[test]
    fn zero_radius_disables_merging() {
        let merged = merge_near_duplicates(vec![cand(1.0, 1.0, 1.0), cand(1.0, 1.0, 2.0)], 0.0);
        assert_eq!(merged.len(), 2);
    }
}
