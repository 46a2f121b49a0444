// benches/gpu_benchmarks.rs — GPU pipeline benchmarks.
//
// Mirrors benchmarks.rs. Each stage runs the host reference and the device
// pipeline in the same group for direct comparison.
//
//   cargo bench --bench gpu_benchmarks
//
// CRITERION + GPU CAVEATS
// ────────────────────────
// Wall time includes uniform uploads, bind group creation, submit and the
// blocking read-backs each pipeline performs (boundary counts, pyramid
// total). That is what a frame pays, so it is what we measure.
//
// The first iterations pay driver pipeline compilation; warm-up is set
// explicitly for stable numbers.

use criterion::{criterion_group, criterion_main, Criterion};
use std::time::Duration;

use levelgrid::boundary::extract_boundary_points;
use levelgrid::contour::extract_contour;
use levelgrid::eikonal::{smooth_field, SmoothingConfig};
use levelgrid::gpu::boundary::SolidBoundaryPipeline;
use levelgrid::gpu::contour::MarchingSquaresPipeline;
use levelgrid::gpu::pyramid::HistogramPyramid;
use levelgrid::gpu::smoothing::SignedDistanceSmoother;
use levelgrid::gpu::solid::SolidObject;
use levelgrid::{Field, GraphicsShared, HeadlessRasterizer, KernelModule, Polygon, Session, SessionConfig};
use levelgrid::{Simulation, SimulationConfig};

// ============================================================
// Shared helpers
// ============================================================

fn make_surface(w: usize, h: usize) -> Field<f32> {
    let (cx, cy, r) = (w as f32 * 0.45, h as f32 * 0.55, w.min(h) as f32 * 0.3);
    Field::sample_sdf(w, h, |x, y| {
        let d = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt() - r;
        if d.abs() > 1.0 { 2.0 * d } else { d }
    })
}

fn session() -> Session {
    let config = SessionConfig::from_env().expect("bad LEVELGRID_PROFILE");
    Session::new(config).expect("no GPU adapter")
}

// ============================================================
// Boundary extraction: CPU vs GPU
// ============================================================

fn bench_boundary(c: &mut Criterion) {
    let gpu = session();
    let mut pipeline = SolidBoundaryPipeline::new();
    pipeline.compile(&gpu).unwrap();

    let outline = Polygon::circle([0.5, 0.5], 0.3, 256).unwrap();
    let solid = SolidObject::upload(&gpu, &outline).unwrap();

    let mut group = c.benchmark_group("boundary");
    group.warm_up_time(Duration::from_secs(2));

    group.bench_function("cpu_circle256_res512", |b| {
        b.iter(|| extract_boundary_points(&outline, 512).unwrap())
    });

    group.bench_function("gpu_circle256_res512", |b| {
        // A fresh arena per iteration: extraction is append-only.
        b.iter(|| {
            let mut arena = gpu.create_arena::<f32>(1 << 16).unwrap();
            pipeline.extract(&gpu, &solid, &mut arena, 512).unwrap()
        })
    });

    group.finish();
}

// ============================================================
// Marching squares: CPU vs GPU
// ============================================================

fn bench_contour(c: &mut Criterion) {
    let gpu = session();
    let mut pipeline = MarchingSquaresPipeline::new();
    pipeline.compile(&gpu).unwrap();

    let field = make_surface(512, 512);
    let phi = gpu.allocate_2d_image(512, 512, Some(field.as_slice())).unwrap();
    let pyramid = HistogramPyramid::new(&gpu, 512, 512).unwrap();
    let mut raster = HeadlessRasterizer::new();

    let mut group = c.benchmark_group("contour");
    group.warm_up_time(Duration::from_secs(2));

    group.bench_function("cpu_512x512", |b| b.iter(|| extract_contour(&field).unwrap()));

    group.bench_function("gpu_512x512", |b| {
        b.iter(|| pipeline.march(&gpu, &phi, &pyramid, &mut raster, &[]).unwrap())
    });

    group.finish();
}

// ============================================================
// Eikonal smoothing: CPU vs GPU
// ============================================================

fn bench_eikonal(c: &mut Criterion) {
    let gpu = session();
    let config = SmoothingConfig::default();
    let mut smoother = SignedDistanceSmoother::new(config);
    smoother.compile(&gpu).unwrap();

    let field = make_surface(256, 256);
    let pair = gpu.allocate_image_pair(256, 256, Some(field.as_slice())).unwrap();
    let mut surface = Some(GraphicsShared::new(pair));

    let mut group = c.benchmark_group("eikonal");
    group.warm_up_time(Duration::from_secs(2));

    group.bench_function("cpu_256x256", |b| b.iter(|| smooth_field(&field, config)));

    group.bench_function("gpu_256x256", |b| {
        b.iter(|| {
            let s = surface.take().unwrap();
            surface = Some(smoother.smooth(&gpu, s, &[]).unwrap());
        })
    });

    group.finish();
}

// ============================================================
// Full frame
// ============================================================

fn bench_frame(c: &mut Criterion) {
    let gpu = session();
    let config = SimulationConfig { width: 256, height: 256, resolution: 256, ..Default::default() };
    let solids = [
        Polygon::circle([0.3, 0.3], 0.1, 64).unwrap(),
        Polygon::closed(&[[0.6, 0.1], [0.9, 0.1], [0.9, 0.3], [0.6, 0.3]]).unwrap(),
    ];
    let mut sim = Simulation::init(&gpu, config, &solids, &make_surface(256, 256)).unwrap();
    let mut raster = HeadlessRasterizer::new();

    let mut group = c.benchmark_group("frame");
    group.warm_up_time(Duration::from_secs(2));
    group.bench_function("display_256x256", |b| b.iter(|| sim.display(&gpu, &mut raster).unwrap()));
    group.finish();
}

criterion_group!(benches, bench_boundary, bench_contour, bench_eikonal, bench_frame);
criterion_main!(benches);
