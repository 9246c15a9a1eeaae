use las::point::{Classification, Format};
use las::{Builder, Point, Transform, Vector, Writer};
use point_cloud_pipeline::config::AreaConfig;
use point_cloud_pipeline::geotiff::read_geotiff;
use point_cloud_pipeline::laz::read_points;
use point_cloud_pipeline::layout::list_files;
use point_cloud_pipeline::mosaic::ResampleMethod;
use point_cloud_pipeline::smooth::SmoothMethod;
use point_cloud_pipeline::{Pipeline, PipelineConfig, PipelineError, Stage};
use std::path::Path;

/// Sloped ground sampled every half metre over a 20 x 20 m tile.
fn write_tile(path: &Path, x0: f64, spike: Option<(f64, f64, f64)>) {
    let mut builder = Builder::from((1, 2));
    builder.point_format = Format::new(1).unwrap();
    let t = Transform {
        scale: 0.001,
        offset: 0.0,
    };
    builder.transforms = Vector { x: t, y: t, z: t };
    let header = builder.into_header().unwrap();
    let mut writer = Writer::from_path(path, header).unwrap();

    for i in 0..40 {
        for j in 0..40 {
            let x = x0 + i as f64 * 0.5;
            let y = j as f64 * 0.5;
            writer
                .write_point(Point {
                    x,
                    y,
                    z: 10.0 + 0.1 * x,
                    classification: Classification::new(2).unwrap(),
                    gps_time: Some(0.0),
                    ..Default::default()
                })
                .unwrap();
        }
    }
    if let Some((x, y, z)) = spike {
        writer
            .write_point(Point {
                x,
                y,
                z,
                classification: Classification::new(1).unwrap(),
                gps_time: Some(0.0),
                ..Default::default()
            })
            .unwrap();
    }
    writer.close().unwrap();
}

fn synthetic_config(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig {
        working_dir: dir.to_path_buf(),
        areas: vec![AreaConfig {
            name: "synth".to_string(),
            links: Vec::new(),
        }],
        ..PipelineConfig::default()
    };
    config.mosaic.method = ResampleMethod::Bilinear;
    config.smooth.filter = SmoothMethod::Median {
        filter_x: 3,
        filter_y: 3,
        sig_digits: 2,
    };
    config.render.settings.width = 32;
    config.render.settings.height = 32;
    config.render.settings.supersample = 1;
    config.render.settings.orbit_frames = 2;
    config
}

#[test]
fn full_run_produces_every_stage_output() {
    let tmp = tempfile::tempdir().unwrap();
    let config = synthetic_config(tmp.path());
    let pipeline = Pipeline::new(config).unwrap();
    let layout = pipeline.layout(&pipeline.config().areas[0]);
    layout.create().unwrap();

    write_tile(
        &layout.las_dir().join("tile_a.las"),
        0.0,
        Some((10.25, 10.25, 80.0)),
    );
    write_tile(&layout.las_dir().join("tile_b.las"), 20.0, None);

    pipeline.run().unwrap();

    // Info report for the first tile.
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(layout.info_report()).unwrap()).unwrap();
    assert_eq!(report["point_count"], 1601);

    // Outlier filtering replaced the sources and dropped the spike.
    let filtered = list_files(&layout.las_dir(), "las").unwrap();
    assert_eq!(
        filtered,
        vec![
            layout.las_dir().join("tile_a_rmv_out.las"),
            layout.las_dir().join("tile_b_rmv_out.las"),
        ]
    );
    let (_, points) = read_points(&filtered[0]).unwrap();
    assert_eq!(points.len(), 1600);
    assert!(points.iter().all(|p| p.z < 20.0));

    // One raster per tile, merged into a seamless mosaic.
    assert_eq!(list_files(&layout.tif_dir(), "tif").unwrap().len(), 2);
    let mosaic = read_geotiff(&layout.mosaic_path("bilinear")).unwrap();
    assert_eq!((mosaic.cols, mosaic.rows), (40, 20));
    let stats = mosaic.statistics();
    assert!(stats.valid_cells >= 38 * 18);
    assert!(stats.max < 14.5);
    assert!(stats.min >= 10.0);

    let smoothed = read_geotiff(&layout.filtered_mosaic_path("bilinear")).unwrap();
    assert_eq!((smoothed.cols, smoothed.rows), (40, 20));
    assert_eq!(smoothed.statistics().valid_cells, stats.valid_cells);

    for name in ["synth_isometric.png", "synth_ortho.png", "synth_orbit.gif"] {
        assert!(layout.render_dir().join(name).is_file(), "{} missing", name);
    }
}

#[test]
fn only_stage_runs_even_when_disabled() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = synthetic_config(tmp.path());
    config.info.run = false;
    let pipeline = Pipeline::new(config).unwrap();
    let area = pipeline.config().areas[0].clone();
    let layout = pipeline.layout(&area);
    layout.create().unwrap();
    write_tile(&layout.las_dir().join("tile.las"), 0.0, None);

    pipeline.run_stage(&area, Stage::Info).unwrap();
    assert!(layout.info_report().is_file());

    // Nothing has been gridded yet.
    assert!(matches!(
        pipeline.run_stage(&area, Stage::Mosaic),
        Err(PipelineError::EmptyInput { .. })
    ));
}

#[test]
fn kept_sources_are_not_gridded_alongside_filtered_copies() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = synthetic_config(tmp.path());
    config.filter.settings.delete_source = false;
    config.filter.settings.classes.enabled = true;
    config.filter.settings.classes.exclude = vec![7, 18];
    let pipeline = Pipeline::new(config).unwrap();
    let area = pipeline.config().areas[0].clone();
    let layout = pipeline.layout(&area);
    layout.create().unwrap();
    write_tile(
        &layout.las_dir().join("tile.las"),
        0.0,
        Some((10.25, 10.25, 80.0)),
    );

    for stage in [Stage::Filter, Stage::Rasterize, Stage::Mosaic] {
        pipeline.run_stage(&area, stage).unwrap();
    }

    // Class filtering ran on the outlier output only.
    assert_eq!(
        list_files(&layout.las_dir(), "las").unwrap(),
        vec![
            layout.las_dir().join("tile.las"),
            layout.las_dir().join("tile_rmv_out.las"),
            layout.las_dir().join("tile_rmv_out_rmv_cls.las"),
        ]
    );
    assert_eq!(
        list_files(&layout.tif_dir(), "tif").unwrap(),
        vec![layout.tif_dir().join("tile_rmv_out_rmv_cls.tif")]
    );

    let mosaic = read_geotiff(&layout.mosaic_path("bilinear")).unwrap();
    assert!(mosaic.statistics().max < 14.5);
}
