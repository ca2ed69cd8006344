//! Tests for the transform families.

use super::*;
use glam::DVec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn unit_bbox(w: f64, h: f64) -> DAabb {
    DAabb::new(DVec2::ZERO, DVec2::new(w, h))
}

/// Regular grid transform whose mosaic positions equal its uv lattice
/// plus an optional offset.
fn offset_grid(rows: usize, cols: usize, w: f64, h: f64, offset: DVec2) -> GridTransform {
    let mut xy = Vec::new();
    for r in 0..=rows {
        for c in 0..=cols {
            let frac = DVec2::new(c as f64 / cols as f64, r as f64 / rows as f64);
            xy.push(DVec2::new(frac.x * w, frac.y * h) + offset);
        }
    }
    GridTransform::setup(rows, cols, DVec2::ZERO, DVec2::new(w, h), &xy)
}

// ----------------------------------------------------------------
// Legendre polynomial transform
// ----------------------------------------------------------------

#[test]
fn test_legendre_identity_after_setup() {
    let mut t = LegendreTransform::new(2);
    t.setup(&unit_bbox(256.0, 128.0), 0.0, 0.0);

    for &(x, y) in &[(0.0, 0.0), (256.0, 128.0), (37.5, 90.25), (128.0, 64.0)] {
        let p = DVec2::new(x, y);
        let q = t.transform(p);
        assert!((q - p).length() < 1e-12, "{p:?} -> {q:?}");
    }
}

#[test]
fn test_legendre_inverse_roundtrip() {
    // A mildly warped degree-4 transform must invert to 1e-8 inside its
    // bounding box.
    let mut t = LegendreTransform::new(4);
    t.setup(&unit_bbox(200.0, 200.0), 0.0, 0.0);
    {
        let half = t.coefficients_per_dimension();
        let mut params = t.parameters().to_vec();
        params[index_a(2, 0)] = 0.01;
        params[index_a(0, 2)] = -0.007;
        params[half + index_a(1, 1)] = 0.012;
        params[half + index_a(2, 1)] = -0.003;
        t.set_parameters(&params);
    }

    for &(x, y) in &[(10.0, 10.0), (100.0, 100.0), (25.0, 160.0), (190.0, 40.0)] {
        let p = DVec2::new(x, y);
        let q = t.transform(p);
        let back = t.transform_inv(q).expect("inverse failed");
        assert!(
            (back - p).length() < 1e-8,
            "{p:?} -> {q:?} -> {back:?}"
        );
    }
}

#[test]
fn test_legendre_jacobian_matches_finite_differences() {
    let mut t = LegendreTransform::new(3);
    t.setup(&unit_bbox(100.0, 80.0), 0.0, 0.0);
    {
        let half = t.coefficients_per_dimension();
        let mut params = t.parameters().to_vec();
        params[index_a(1, 1)] = 0.02;
        params[half + index_a(2, 0)] = -0.015;
        t.set_parameters(&params);
    }

    let p = DVec2::new(31.0, 47.0);
    let (_, jac) = t.eval(p);
    let h = 1e-6;
    let fx = (t.transform(p + DVec2::new(h, 0.0)) - t.transform(p - DVec2::new(h, 0.0)))
        / (2.0 * h);
    let fy = (t.transform(p + DVec2::new(0.0, h)) - t.transform(p - DVec2::new(0.0, h)))
        / (2.0 * h);

    assert!((jac[0][0] - fx.x).abs() < 1e-6);
    assert!((jac[1][0] - fx.y).abs() < 1e-6);
    assert!((jac[0][1] - fy.x).abs() < 1e-6);
    assert!((jac[1][1] - fy.y).abs() < 1e-6);
}

#[test]
fn test_legendre_fit_recovers_source_parameters() {
    // Fit a degree-2 transform to samples generated by a known degree-2
    // transform; the recovered parameters must match to 1e-8.
    let mut source = LegendreTransform::new(2);
    source.setup(&unit_bbox(100.0, 100.0), 0.0, 0.0);
    {
        let half = source.coefficients_per_dimension();
        let mut params = source.parameters().to_vec();
        params[index_a(2, 0)] = 0.02;
        params[index_a(1, 1)] = -0.01;
        params[half + index_a(0, 2)] = 0.015;
        source.set_parameters(&params);
    }

    let mut rng = StdRng::seed_from_u64(42);
    let mosaic: Vec<DVec2> = (0..9)
        .map(|_| {
            DVec2::new(
                rng.random_range(0.0..100.0),
                rng.random_range(0.0..100.0),
            )
        })
        .collect();
    let tile: Vec<DVec2> = mosaic.iter().map(|&p| source.transform(p)).collect();

    let mut fitted = LegendreTransform::new(2);
    fitted.setup(&unit_bbox(100.0, 100.0), 0.0, 0.0);
    assert!(fitted.solve_for_parameters(0, 3, &mosaic, &tile));

    for (a, b) in fitted.parameters().iter().zip(source.parameters()) {
        assert!((a - b).abs() < 1e-8, "{a} vs {b}");
    }
}

#[test]
fn test_legendre_fit_refuses_underdetermined_system() {
    let mut t = LegendreTransform::new(2);
    t.setup(&unit_bbox(10.0, 10.0), 0.0, 0.0);
    let before = t.parameters().to_vec();

    // Degree 0..3 needs 6 points per dimension; 4 is not enough.
    let mosaic = vec![
        DVec2::new(1.0, 1.0),
        DVec2::new(2.0, 5.0),
        DVec2::new(7.0, 3.0),
        DVec2::new(4.0, 8.0),
    ];
    let tile = mosaic.clone();
    assert!(!t.solve_for_parameters(0, 3, &mosaic, &tile));
    assert_eq!(t.parameters(), &before[..]);
}

#[test]
fn test_legendre_fit_refuses_degenerate_points() {
    // Nine copies of the same point are rank deficient; the previous
    // parameters survive.
    let mut t = LegendreTransform::new(2);
    t.setup(&unit_bbox(10.0, 10.0), 0.0, 0.0);
    let before = t.parameters().to_vec();

    let mosaic = vec![DVec2::new(5.0, 5.0); 9];
    let tile = vec![DVec2::new(5.0, 5.0); 9];
    assert!(!t.solve_for_parameters(0, 3, &mosaic, &tile));
    assert_eq!(t.parameters(), &before[..]);
}

#[test]
fn test_legendre_shared_params_mask_excludes_translation() {
    let t = LegendreTransform::new(3);
    let mask = t.shared_params_mask(true);
    assert_eq!(mask.len(), t.parameters().len());
    assert!(!mask[index_a(0, 0)]);
    assert!(!mask[t.index_b(0, 0)]);
    let shared = mask.iter().filter(|&&m| m).count();
    assert_eq!(shared, mask.len() - 2);
}

#[test]
fn test_legendre_setup_translation_moves_output() {
    let mut t = LegendreTransform::new(1);
    t.setup(&unit_bbox(64.0, 64.0), 0.0, 0.0);
    let p = DVec2::new(20.0, 30.0);
    let before = t.transform(p);
    t.setup_translation(5.0, -3.0);
    // Folding (tx, ty) into the warp origin shifts the input domain.
    let after = t.transform(p - DVec2::new(5.0, -3.0));
    assert!((after - before).length() < 1e-12);
}

#[test]
fn test_count_coefficients() {
    // Degree block d holds d + 1 coefficients.
    assert_eq!(LegendreTransform::count_coefficients(0, 1), 1);
    assert_eq!(LegendreTransform::count_coefficients(0, 3), 6);
    assert_eq!(LegendreTransform::count_coefficients(2, 1), 3);
    assert_eq!(LegendreTransform::count_coefficients(1, 2), 5);
}

// ----------------------------------------------------------------
// Grid / mesh transforms
// ----------------------------------------------------------------

#[test]
fn test_grid_vertices_map_exactly() {
    let t = offset_grid(4, 4, 1.0, 1.0, DVec2::new(10.0, -5.0));
    for r in 0..=4 {
        for c in 0..=4 {
            let v = *t.vertex(r, c);
            let uv = t.transform(v.xy).expect("vertex xy must hit the mesh");
            assert!((uv - v.uv).length() < 1e-12);
            let xy = t.transform_inv(v.uv).expect("vertex uv must hit the mesh");
            assert!((xy - v.xy).length() < 1e-12);
        }
    }
}

#[test]
fn test_grid_roundtrip_interior_points() {
    let t = offset_grid(3, 5, 1.0, 1.0, DVec2::new(2.5, 7.25));
    let mut rng = StdRng::seed_from_u64(9);
    for _ in 0..50 {
        let xy = DVec2::new(
            rng.random_range(2.5..3.5),
            rng.random_range(7.25..8.25),
        );
        let uv = t.transform(xy).expect("interior point missed the mesh");
        let back = t.transform_inv(uv).expect("uv point missed the mesh");
        assert!((back - xy).length() < 1e-12, "{xy:?} -> {uv:?} -> {back:?}");
    }
}

#[test]
fn test_grid_miss_outside_mesh() {
    let t = offset_grid(2, 2, 1.0, 1.0, DVec2::ZERO);
    assert!(t.transform(DVec2::new(5.0, 5.0)).is_none());
    assert!(t.transform(DVec2::new(-0.5, 0.5)).is_none());
    assert!(t.transform_inv(DVec2::new(2.0, 2.0)).is_none());
}

#[test]
fn test_grid_rebuild_is_idempotent() {
    let mut t = offset_grid(3, 3, 1.0, 1.0, DVec2::new(1.0, 2.0));
    let probes: Vec<DVec2> = (0..20)
        .map(|i| DVec2::new(1.0 + (i as f64) * 0.045, 2.0 + (i as f64 * 7.0 % 19.0) / 19.0))
        .collect();
    let before: Vec<_> = probes.iter().map(|&p| t.transform(p)).collect();

    let zero = vec![DVec2::ZERO; t.grid.mesh.len()];
    t.grid.update(&zero);

    let after: Vec<_> = probes.iter().map(|&p| t.transform(p)).collect();
    assert_eq!(before, after);
}

#[test]
fn test_grid_update_displaces_queries() {
    let mut t = offset_grid(2, 2, 1.0, 1.0, DVec2::ZERO);
    let d = DVec2::new(3.0, -1.5);
    let shift = vec![d; t.grid.mesh.len()];
    t.grid.update(&shift);

    // A uniform displacement moves the whole mesh rigidly.
    let uv = DVec2::new(0.4, 0.6);
    let xy = t.transform_inv(uv).unwrap();
    assert!((xy - (uv + d)).length() < 1e-12);
    assert!((t.transform(xy).unwrap() - uv).length() < 1e-12);
}

#[test]
fn test_grid_shift_translates_all_vertices() {
    let mut t = offset_grid(2, 3, 1.0, 1.0, DVec2::ZERO);
    let before: Vec<DVec2> = t.grid.mesh.iter().map(|v| v.xy).collect();
    t.grid.shift(DVec2::new(-2.0, 4.0));
    for (v, b) in t.grid.mesh.iter().zip(&before) {
        assert_eq!(v.xy, *b + DVec2::new(-2.0, 4.0));
    }
}

#[test]
fn test_grid_uv_invariant_under_update() {
    let mut t = offset_grid(2, 2, 1.0, 1.0, DVec2::ZERO);
    let uv_before: Vec<DVec2> = t.grid.mesh.iter().map(|v| v.uv).collect();
    let shift: Vec<DVec2> = (0..t.grid.mesh.len())
        .map(|i| DVec2::new(i as f64 * 0.1, -(i as f64) * 0.05))
        .collect();
    t.grid.update(&shift);
    let uv_after: Vec<DVec2> = t.grid.mesh.iter().map(|v| v.uv).collect();
    assert_eq!(uv_before, uv_after);
}

#[test]
fn test_grid_jacobian_weights_sum_to_one() {
    let t = offset_grid(3, 3, 1.0, 1.0, DVec2::ZERO);
    let (_, weights) = t.jacobian(DVec2::new(0.37, 0.61)).unwrap();
    let sum: f64 = weights.iter().sum();
    assert!((sum - 1.0).abs() < 1e-12);
    assert!(weights.iter().all(|&w| (0.0..=1.0).contains(&w)));
}

#[test]
fn test_mesh_transform_over_external_triangulation() {
    // A single quad split along the other diagonal than the grid family
    // uses.
    let uv = [
        DVec2::new(0.0, 0.0),
        DVec2::new(1.0, 0.0),
        DVec2::new(1.0, 1.0),
        DVec2::new(0.0, 1.0),
    ];
    let xy: Vec<DVec2> = uv.iter().map(|&p| p * 2.0 + DVec2::new(1.0, 1.0)).collect();
    let triangles = [[0usize, 1, 2], [0, 2, 3]];

    let t = MeshTransform::setup(
        DVec2::ZERO,
        DVec2::new(1.0, 1.0),
        &uv,
        &xy,
        &triangles,
        16,
        16,
    )
    .unwrap();
    assert!(t.is_ready());

    let uv_pt = DVec2::new(0.25, 0.5);
    let xy_pt = t.transform_inv(uv_pt).unwrap();
    assert!((xy_pt - (uv_pt * 2.0 + DVec2::new(1.0, 1.0))).length() < 1e-12);
    assert!((t.transform(xy_pt).unwrap() - uv_pt).length() < 1e-12);
}

#[test]
fn test_mesh_transform_rejects_empty_input() {
    assert!(
        MeshTransform::setup(
            DVec2::ZERO,
            DVec2::new(1.0, 1.0),
            &[],
            &[],
            &[],
            16,
            16
        )
        .is_none()
    );
}

// ----------------------------------------------------------------
// MosaicTransform facade
// ----------------------------------------------------------------

#[test]
fn test_control_lattice_shapes() {
    let grid = offset_grid(4, 4, 256.0, 256.0, DVec2::ZERO);
    let bbox = unit_bbox(256.0, 256.0);

    let t = MosaicTransform::Grid(grid);
    let lattice = t.control_lattice(&bbox, 8, 8);
    assert_eq!((lattice.rows, lattice.cols), (4, 4));
    assert_eq!(lattice.uv.len(), 25);

    let mut poly = LegendreTransform::new(2);
    poly.setup(&bbox, 0.0, 0.0);
    let t = MosaicTransform::Polynomial(poly);
    let lattice = t.control_lattice(&bbox, 4, 4);
    assert_eq!((lattice.rows, lattice.cols), (4, 4));
    assert_eq!(lattice.uv.len(), 25);
    assert_eq!(lattice.uv[0], DVec2::ZERO);
    assert_eq!(lattice.uv[24], DVec2::new(256.0, 256.0));
}

#[test]
fn test_apply_displacements_to_polynomial() {
    // A uniform displacement of the control set refits to a translated
    // polynomial.
    let bbox = unit_bbox(128.0, 128.0);
    let mut poly = LegendreTransform::new(1);
    poly.setup(&bbox, 0.0, 0.0);
    let mut t = MosaicTransform::Polynomial(poly);

    let lattice = t.control_lattice(&bbox, 4, 4);
    let d = DVec2::new(7.0, -4.0);
    let centers: Vec<Option<DVec2>> =
        lattice.uv.iter().map(|&uv| t.transform_inv(uv)).collect();
    let shift = vec![d; lattice.uv.len()];

    assert!(t.apply_displacements(&lattice, &centers, &shift));

    // A tile anchor now sits at its old mosaic position plus d.
    let probe = lattice.uv[7];
    let xy = t.transform_inv(probe).unwrap();
    assert!((xy - (probe + d)).length() < 1e-6, "{xy:?}");
}
