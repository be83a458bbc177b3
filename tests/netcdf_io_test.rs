//! Round-trip tests for the NetCDF writers and readers.
//!
//! Only built with the `netcdf` feature:
//! `cargo test --features netcdf`

#![cfg(feature = "netcdf")]

use isobin_rs::{
    ensemble_stats, is_valid_f64, process_chunk, read_bowl_sigma, read_zonal_variable,
    stack_members, DensityGrid, DensityGridSpec, EnsembleConfig, EnsembleInput, EnsembleWriter,
    IdentityRegridder, SourceGrid, TargetGrid, WriterConfig, ZonalWriter,
};
use ndarray::{Array2, Array3, Array4};

fn setup() -> (SourceGrid, DensityGrid, TargetGrid) {
    let source = SourceGrid {
        depth: (0..15).map(|k| 20.0 * k as f64 + 10.0).collect(),
        depth_bounds: (0..=15).map(|k| 20.0 * k as f64).collect(),
        n_lat: 2,
        n_lon: 3,
    };
    let grid = DensityGrid::build(&DensityGridSpec::default());
    let codes = Array2::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]).unwrap();
    let target =
        TargetGrid::from_basin_codes(vec![-30.0, 30.0], vec![0.0, 120.0, 240.0], codes.view())
            .unwrap();
    (source, grid, target)
}

#[test]
fn zonal_file_round_trip() {
    let (source, grid, target) = setup();
    let n_depth = source.depth.len();
    let n_points = source.n_points();
    let temp = Array3::from_shape_fn((12, n_depth, n_points), |(_, k, _)| 26.0 - 1.5 * k as f64);
    let salt = Array3::from_elem((12, n_depth, n_points), 35.0);
    let regridder = IdentityRegridder::new(2, 3);
    let out = process_chunk(
        temp.view(),
        salt.view(),
        &source,
        &grid,
        &target,
        &regridder,
    )
    .unwrap();
    let annual = out.annual.expect("one full year");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zonal.nc");
    let path = path.to_str().unwrap();

    let config = WriterConfig::new(path).with_title("round trip");
    let mut writer =
        ZonalWriter::create(&config, &grid.axis_levels(), &target.lat, &target.lon).unwrap();
    writer.append_annual(0, &annual).unwrap();
    drop(writer);

    // Reading back across the basin suffixes reproduces the written values
    // at f32 precision
    let depth = read_zonal_variable(path, "isondepth").unwrap();
    assert_eq!(depth.dim(), (1, 4, grid.n_levels() + 1, 2));
    for b in 0..4 {
        for l in 0..=grid.n_levels() {
            for j in 0..2 {
                let written = annual.zonal.depth[[0, b, l, j]];
                let read = depth[[0, b, l, j]];
                if is_valid_f64(written) {
                    assert!(
                        (written - read).abs() < 1e-2,
                        "basin {b} level {l}: wrote {written}, read {read}"
                    );
                } else {
                    assert!(!is_valid_f64(read));
                }
            }
        }
    }

    let bowl = read_bowl_sigma(path).unwrap();
    assert_eq!(bowl.dim(), (1, 4, 2));
}

#[test]
fn ensemble_file_has_all_variants() {
    let members: Vec<Array4<f64>> = (0..3)
        .map(|r| Array4::from_shape_fn((4, 1, 5, 2), |(t, _, l, _)| r as f64 + t as f64 + l as f64))
        .collect();
    let field = stack_members(&members).unwrap();
    let bowl = Array4::from_elem((3, 4, 1, 2), 24.0);
    let input = EnsembleInput {
        field: field.view(),
        bowl_sigma: bowl.view(),
        member_agreement: None,
        member_bowl_field: None,
    };
    let levels = [25.0, 25.5, 26.0, 26.5, 27.0];
    let stats = ensemble_stats(&input, &levels, &EnsembleConfig::new((0, 2))).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ensemble.nc");
    let path = path.to_str().unwrap();

    // One basin in the stats; the writer still emits all four suffixed
    // variables, the missing basins fully masked
    let padded = {
        let (t, _, l, j) = stats.mean.dim();
        let mut mean = Array4::from_elem((t, 4, l, j), isobin_rs::FILL_VALUE_F64);
        let mut coverage = mean.clone();
        let mut agreement = mean.clone();
        let mut bowl_masked = mean.clone();
        mean.index_axis_mut(ndarray::Axis(1), 0)
            .assign(&stats.mean.index_axis(ndarray::Axis(1), 0));
        coverage
            .index_axis_mut(ndarray::Axis(1), 0)
            .assign(&stats.coverage.index_axis(ndarray::Axis(1), 0));
        agreement
            .index_axis_mut(ndarray::Axis(1), 0)
            .assign(&stats.agreement.index_axis(ndarray::Axis(1), 0));
        bowl_masked
            .index_axis_mut(ndarray::Axis(1), 0)
            .assign(&stats.bowl_masked.index_axis(ndarray::Axis(1), 0));
        isobin_rs::EnsembleStats {
            mean,
            coverage,
            agreement,
            bowl_masked,
            std_dev: None,
        }
    };

    let config = WriterConfig::new(path);
    let mut writer = EnsembleWriter::create(&config, &levels, &[-30.0, 30.0], 4).unwrap();
    writer.write_variable("isonthick", &padded).unwrap();
    drop(writer);

    let file = netcdf::open(path).unwrap();
    for name in [
        "isonpercent",
        "isonthick",
        "isonthickAgree",
        "isonthickBowl",
        "isonthicka",
        "isonthickp",
        "isonthicki",
    ] {
        assert!(file.variable(name).is_some(), "missing {name}");
    }
}
