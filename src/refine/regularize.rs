//! Displacement regularization.
//!
//! A weighted vector-median filter over the sparse per-control-point
//! displacement lattice: outlier estimates are replaced by the consensus
//! of their window, and the count of contributing neighbors becomes the
//! point's mass, later used to normalize blended displacements.

use glam::DVec2;

use crate::refine::displace::DisplacementField;

/// Minimum number of confident candidates a window must hold before a
/// median is meaningful. Below the quorum the point contributes nothing.
const MEDIAN_QUORUM: usize = 2;

/// Regularize one displacement field into `xy_shift` and `mass`.
///
/// For every lattice point the confident entries (db > 0) inside the
/// clipped window of radius `median_radius` are collected; the vector
/// minimizing the summed L1 distance to the others is accumulated into
/// `xy_shift`, and the candidate count into `mass`. Window indexing clips
/// at the lattice edge, it does not wrap.
pub(crate) fn regularize_displacements(
    xy_shift: &mut [DVec2],
    mass: &mut [f64],
    field: &DisplacementField,
    median_radius: usize,
) {
    let width = field.db.width();
    let height = field.db.height();
    assert_eq!(xy_shift.len(), width * height, "shift lattice shape mismatch");
    assert_eq!(mass.len(), xy_shift.len(), "mass lattice shape mismatch");

    let mut window: Vec<DVec2> = Vec::with_capacity((2 * median_radius + 1).pow(2));

    for y in 0..height {
        let y0 = y.saturating_sub(median_radius);
        let y1 = (y + median_radius).min(height - 1);
        for x in 0..width {
            let x0 = x.saturating_sub(median_radius);
            let x1 = (x + median_radius).min(width - 1);

            window.clear();
            for wy in y0..=y1 {
                for wx in x0..=x1 {
                    if field.db[(wx, wy)] > 0.0 {
                        window.push(DVec2::new(field.dx[(wx, wy)], field.dy[(wx, wy)]));
                    }
                }
            }

            if window.len() < MEDIAN_QUORUM {
                continue;
            }

            let idx = y * width + x;
            xy_shift[idx] += vector_median(&window);
            mass[idx] += window.len() as f64;
        }
    }
}

/// The candidate minimizing the sum of L1 distances to all others. Ties
/// resolve to the earliest candidate in scan order.
fn vector_median(candidates: &[DVec2]) -> DVec2 {
    let mut best = candidates[0];
    let mut best_cost = f64::MAX;
    for &c in candidates {
        let cost: f64 = candidates
            .iter()
            .map(|o| (c.x - o.x).abs() + (c.y - o.y).abs())
            .sum();
        if cost < best_cost {
            best_cost = cost;
            best = c;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_from(
        width: usize,
        height: usize,
        entries: &[(usize, usize, f64, f64)],
    ) -> DisplacementField {
        let mut field = DisplacementField::new(width, height);
        for &(x, y, dx, dy) in entries {
            field.dx[(x, y)] = dx;
            field.dy[(x, y)] = dy;
            field.db[(x, y)] = 1.0;
        }
        field
    }

    #[test]
    fn test_uniform_field_passes_through() {
        let entries: Vec<(usize, usize, f64, f64)> = (0..3)
            .flat_map(|y| (0..3).map(move |x| (x, y, 2.0, -1.0)))
            .collect();
        let field = field_from(3, 3, &entries);

        let mut shift = vec![DVec2::ZERO; 9];
        let mut mass = vec![0.0; 9];
        regularize_displacements(&mut shift, &mut mass, &field, 1);

        for &s in &shift {
            assert_eq!(s, DVec2::new(2.0, -1.0));
        }
        // the center sees the full 3x3 window
        assert_eq!(mass[4], 9.0);
        // a corner sees a clipped 2x2 window
        assert_eq!(mass[0], 4.0);
    }

    #[test]
    fn test_outlier_is_replaced_by_window_median() {
        let mut entries: Vec<(usize, usize, f64, f64)> = (0..3)
            .flat_map(|y| (0..3).map(move |x| (x, y, 1.0, 1.0)))
            .collect();
        entries[4] = (1, 1, 50.0, -50.0); // center is an outlier
        let field = field_from(3, 3, &entries);

        let mut shift = vec![DVec2::ZERO; 9];
        let mut mass = vec![0.0; 9];
        regularize_displacements(&mut shift, &mut mass, &field, 1);

        assert_eq!(shift[4], DVec2::new(1.0, 1.0));
    }

    #[test]
    fn test_below_quorum_contributes_nothing() {
        // A single confident estimate surrounded by silence.
        let field = field_from(3, 3, &[(1, 1, 5.0, 5.0)]);

        let mut shift = vec![DVec2::ZERO; 9];
        let mut mass = vec![0.0; 9];
        regularize_displacements(&mut shift, &mut mass, &field, 1);

        assert!(shift.iter().all(|s| *s == DVec2::ZERO));
        assert!(mass.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_radius_zero_is_a_no_op() {
        // With no neighbors in the window, no point reaches the quorum,
        // so applying the filter twice changes nothing.
        let entries: Vec<(usize, usize, f64, f64)> = (0..4)
            .flat_map(|y| (0..4).map(move |x| (x, y, 3.0, 4.0)))
            .collect();
        let field = field_from(4, 4, &entries);

        let mut shift = vec![DVec2::new(0.5, 0.5); 16];
        let before = shift.clone();
        let mut mass = vec![0.0; 16];
        regularize_displacements(&mut shift, &mut mass, &field, 0);
        regularize_displacements(&mut shift, &mut mass, &field, 0);

        assert_eq!(shift, before);
        assert!(mass.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_empty_confidence_plane() {
        let field = DisplacementField::new(5, 5);
        let mut shift = vec![DVec2::ZERO; 25];
        let mut mass = vec![0.0; 25];
        regularize_displacements(&mut shift, &mut mass, &field, 2);
        assert!(shift.iter().all(|s| *s == DVec2::ZERO));
        assert!(mass.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_mass_accumulates_across_calls() {
        let entries: Vec<(usize, usize, f64, f64)> = (0..2)
            .flat_map(|y| (0..2).map(move |x| (x, y, 1.0, 0.0)))
            .collect();
        let field = field_from(2, 2, &entries);

        let mut shift = vec![DVec2::ZERO; 4];
        let mut mass = vec![0.0; 4];
        regularize_displacements(&mut shift, &mut mass, &field, 1);
        regularize_displacements(&mut shift, &mut mass, &field, 1);

        assert_eq!(mass[0], 8.0);
        assert_eq!(shift[0], DVec2::new(2.0, 0.0));
    }

    #[test]
    fn test_vector_median_prefers_consensus() {
        let candidates = [
            DVec2::new(0.0, 0.0),
            DVec2::new(0.1, 0.0),
            DVec2::new(10.0, 10.0),
        ];
        let m = vector_median(&candidates);
        assert!(m.x < 1.0 && m.y < 1.0);
    }
}
