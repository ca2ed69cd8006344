use criterion::{Criterion, black_box, criterion_group, criterion_main};
use glam::DVec2;
use tessera::{
    Buffer2, CorrelationConfig, GridTransform, MosaicTile, MosaicTransform, NullProgress,
    RefineConfig, find_correlation, refine_mosaic,
};

fn noise_image(w: usize, h: usize, seed: u32) -> Buffer2<f32> {
    // xorshift noise; benches only need stable broadband texture
    let mut state = seed | 1;
    let mut img = Buffer2::new_filled(w, h, 0.0f32);
    for v in img.pixels_mut() {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        *v = (state & 0xffff) as f32 / 65535.0;
    }
    img
}

fn identity_grid(rows: usize, cols: usize, w: f64, h: f64, offset: DVec2) -> GridTransform {
    let mut xy = Vec::new();
    for r in 0..=rows {
        for c in 0..=cols {
            let frac = DVec2::new(c as f64 / cols as f64, r as f64 / rows as f64);
            xy.push(DVec2::new(frac.x * w, frac.y * h) + offset);
        }
    }
    GridTransform::setup(rows, cols, DVec2::ZERO, DVec2::new(w, h), &xy)
}

fn bench_phase_correlation(c: &mut Criterion) {
    let fixed = noise_image(128, 128, 0xbeef);
    let moving = noise_image(128, 128, 0xcafe);
    let config = CorrelationConfig::default();

    c.bench_function("phase_correlation_128", |b| {
        b.iter(|| find_correlation(black_box(&fixed), black_box(&moving), &config));
    });
}

fn bench_refine_pass(c: &mut Criterion) {
    let scene = noise_image(200, 200, 0x5eed);
    let mut tile0 = Buffer2::new_filled(128, 128, 0.0f32);
    let mut tile1 = Buffer2::new_filled(128, 128, 0.0f32);
    for y in 0..128 {
        for x in 0..128 {
            tile0[(x, y)] = scene[(x + 8, y + 8)];
            tile1[(x, y)] = scene[(x + 13, y + 5)];
        }
    }
    let tiles = vec![MosaicTile::new(tile0), MosaicTile::new(tile1)];

    let config = RefineConfig {
        neighborhood: 32,
        num_passes: 1,
        keep_first_tile_fixed: true,
        num_threads: 1,
        ..RefineConfig::default()
    };

    c.bench_function("refine_two_tiles_one_pass", |b| {
        b.iter(|| {
            let mut transforms = vec![
                MosaicTransform::Grid(identity_grid(2, 2, 128.0, 128.0, DVec2::ZERO)),
                MosaicTransform::Grid(identity_grid(2, 2, 128.0, 128.0, DVec2::ZERO)),
            ];
            refine_mosaic(&tiles, &mut transforms, &config, &NullProgress).unwrap()
        });
    });
}

criterion_group!(benches, bench_phase_correlation, bench_refine_pass);
criterion_main!(benches);
