//! Benchmarks for the isopycnal binning engine.
//!
//! Run with: `cargo bench --bench binning_bench`
//!
//! Measures the per-column kernel and the chunk driver on synthetic
//! stratified profiles at a coastal-model-like grid size.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use isobin_rs::{bin_chunk, bin_column, DensityGrid, DensityGridSpec, GridColumn, SourceGrid};
use ndarray::Array3;

/// Synthetic stratified profiles with a weak seasonal wiggle so columns are
/// not all identical.
fn generate_fields(n_time: usize, src: &SourceGrid) -> (Array3<f64>, Array3<f64>) {
    let n_depth = src.depth.len();
    let n_points = src.n_points();
    let temp = Array3::from_shape_fn((n_time, n_depth, n_points), |(t, k, i)| {
        let seasonal = 0.5 * (t as f64 * 0.5).sin();
        let regional = 2.0 * (i as f64 * 0.01).cos();
        24.0 + seasonal + regional - 0.8 * k as f64
    });
    let salt = Array3::from_shape_fn((n_time, n_depth, n_points), |(_, k, i)| {
        34.0 + 0.02 * k as f64 + 0.3 * (i as f64 * 0.02).sin()
    });
    (temp, salt)
}

fn bench_column_kernel(c: &mut Criterion) {
    let grid = DensityGrid::build(&DensityGridSpec::default());
    let n_depth = 40;
    let depth: Vec<f64> = (0..n_depth).map(|k| 25.0 * k as f64 + 12.5).collect();
    let bounds: Vec<f64> = (0..=n_depth).map(|k| 25.0 * k as f64).collect();
    let temperature: Vec<f64> = (0..n_depth).map(|k| 24.0 - 0.5 * k as f64).collect();
    let salinity = vec![34.5; n_depth];

    c.bench_function("bin_column", |b| {
        b.iter(|| {
            let col = GridColumn {
                depth: black_box(&depth),
                bounds: &bounds,
                temperature: &temperature,
                salinity: &salinity,
            };
            black_box(bin_column(&col, &grid))
        })
    });
}

fn bench_chunk(c: &mut Criterion) {
    let mut group = c.benchmark_group("bin_chunk");
    group.sample_size(10);

    let grid = DensityGrid::build(&DensityGridSpec::default());
    for &(n_lat, n_lon) in &[(30usize, 36usize), (60, 72)] {
        let src = SourceGrid {
            depth: (0..30).map(|k| 30.0 * k as f64 + 15.0).collect(),
            depth_bounds: (0..=30).map(|k| 30.0 * k as f64).collect(),
            n_lat,
            n_lon,
        };
        let (temp, salt) = generate_fields(12, &src);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{n_lat}x{n_lon}")),
            &src,
            |b, src| {
                b.iter(|| {
                    black_box(
                        bin_chunk(temp.view(), salt.view(), src, &grid)
                            .expect("shapes agree"),
                    )
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_column_kernel, bench_chunk);
criterion_main!(benches);
