// benches/benchmarks.rs -- Host reference pipelines.
//
//   cargo bench --bench benchmarks
//
// These are the CPU paths the GPU pipelines are checked against; the
// numbers give the baseline the device versions are compared to in
// gpu_benchmarks.rs.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use levelgrid::boundary::extract_boundary_points;
use levelgrid::contour::{extract_contour, HistogramPyramid};
use levelgrid::eikonal::{smooth_field, SmoothingConfig};
use levelgrid::winding::{winding_field, WindingConfig};
use levelgrid::{Field, Polygon};

// ============================================================
// Helpers
// ============================================================

/// Free surface with a stretched distance away from the interface, so the
/// smoother has real work to do.
fn make_surface(w: usize, h: usize) -> Field<f32> {
    let (cx, cy, r) = (w as f32 * 0.45, h as f32 * 0.55, w.min(h) as f32 * 0.3);
    Field::sample_sdf(w, h, |x, y| {
        let d = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt() - r;
        if d.abs() > 1.0 { 2.0 * d } else { d }
    })
}

fn make_solids() -> Vec<Polygon> {
    vec![
        Polygon::circle([0.3, 0.3], 0.12, 96).unwrap(),
        Polygon::closed(&[[0.55, 0.1], [0.9, 0.15], [0.75, 0.45]]).unwrap(),
        Polygon::circle([0.7, 0.75], 0.18, 128).unwrap(),
    ]
}

// ============================================================
// Per-stage benchmarks
// ============================================================

fn bench_boundary(c: &mut Criterion) {
    let solids = make_solids();
    let mut group = c.benchmark_group("boundary");
    for res in [64u32, 256, 1024] {
        group.bench_with_input(BenchmarkId::new("extract_3_solids", res), &res, |b, &res| {
            b.iter(|| {
                for s in &solids {
                    extract_boundary_points(s, res).unwrap();
                }
            })
        });
    }
    group.finish();
}

fn bench_contour(c: &mut Criterion) {
    let mut group = c.benchmark_group("contour");
    for size in [128usize, 512] {
        let field = make_surface(size, size);
        group.bench_with_input(BenchmarkId::new("pyramid", size), &field, |b, f| {
            b.iter(|| HistogramPyramid::build(f).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("extract", size), &field, |b, f| {
            b.iter(|| extract_contour(f).unwrap())
        });
    }
    group.finish();
}

fn bench_winding(c: &mut Criterion) {
    let solids = make_solids();
    let config = WindingConfig { scale: 128.0, ..Default::default() };
    c.bench_function("winding_128x128_3_solids", |b| {
        b.iter(|| winding_field(128, 128, &solids, config))
    });
}

fn bench_eikonal(c: &mut Criterion) {
    let field = make_surface(128, 128);
    let config = SmoothingConfig::default();
    c.bench_function("eikonal_128x128_2_passes", |b| {
        b.iter(|| smooth_field(&field, config))
    });
}

criterion_group!(benches, bench_boundary, bench_contour, bench_winding, bench_eikonal);
criterion_main!(benches);
