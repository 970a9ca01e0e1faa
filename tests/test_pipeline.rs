mod common;

use sardine_ard::core::{FilterFramework, SpeckleFilterType, TerrainModel, DB_NODATA};
use sardine_ard::io::archive::decode_band;
use sardine_ard::io::{CatalogQuery, SceneCatalog};
use sardine_ard::{Edit, ParameterSet, Pipeline, RawParameters, SarError, SarResult, Scene};
use std::collections::BTreeSet;
use tempfile::TempDir;

fn parameters(output_dir: &std::path::Path) -> ParameterSet {
    let json = format!(
        r#"{{
            "START_DATE": "2021-01-01",
            "STOP_DATE": "2021-07-01",
            "POLARIZATION": "VVVH",
            "ORBIT": "DESCENDING",
            "ROI": [5.71773, 52.65939, 5.7766, 52.7029],
            "APPLY_BORDER_NOISE_CORRECTION": true,
            "APPLY_SPECKLE_FILTERING": true,
            "SPECKLE_FILTER_FRAMEWORK": "MULTI",
            "SPECKLE_FILTER": "LEE",
            "SPECKLE_FILTER_KERNEL_SIZE": 9,
            "SPECKLE_FILTER_NR_OF_IMAGES": 10,
            "APPLY_TERRAIN_FLATTENING": true,
            "DEM": "{}",
            "TERRAIN_FLATTENING_MODEL": "VOLUME",
            "TERRAIN_FLATTENING_ADDITIONAL_LAYOVER_SHADOW_BUFFER": 0,
            "FORMAT": "DB",
            "CLIP_TO_ROI": true,
            "EXPORT": true,
            "OUTPUT_DIR": {:?}
        }}"#,
        common::DEM,
        output_dir.display().to_string()
    );
    ParameterSet::from_json_str(&json).expect("valid parameters")
}

#[test]
fn test_twelve_scene_multi_temporal_run() {
    common::init_logging();
    let dir = TempDir::new().expect("temp dir");
    let (backend, ids) = common::backend(12);
    let pipeline = Pipeline::new(parameters(dir.path()));

    let (scenes, report) = pipeline
        .run_and_export(&backend, &backend, &backend)
        .expect("pipeline run");
    let report = report.expect("export enabled");

    assert_eq!(scenes.len(), 12);
    assert_eq!(report.len(), 12);
    assert_eq!(report.succeeded(), 12);
    assert_eq!(report.to_string(), "12 of 12 scenes exported");

    for (result, id) in report.results().iter().zip(&ids) {
        assert_eq!(&result.scene_id, id);
        assert!(result.success);
        assert_eq!(
            result.written.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["VH", "VV", "angle"]
        );
    }

    let files: BTreeSet<String> = std::fs::read_dir(dir.path())
        .expect("output dir")
        .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files.len(), 36);
    assert!(files.contains("2021-01-05-VV.tif"));
    assert!(files.contains("2021-05-17-angle.tif"));

    for scene in &scenes {
        assert!(matches!(
            scene.edits.as_slice(),
            [
                Edit::BorderNoiseCorrected,
                Edit::SpeckleFiltered {
                    filter: SpeckleFilterType::Lee,
                    framework: FilterFramework::Multi,
                    ..
                },
                Edit::TerrainFlattened { model: TerrainModel::Volume },
                Edit::UnitConverted(_),
                Edit::Clipped,
            ]
        ));
        let vv = scene.band("VV").expect("VV band");
        assert!(vv.dim().0 < common::GRID.0 && vv.dim().1 < common::GRID.1);
        assert!(vv.iter().all(|v| v.is_finite() && *v != DB_NODATA && *v < 0.0));
    }

    // The exported raster is the processed raster
    let first = &scenes[0];
    let bytes = std::fs::read(dir.path().join("2021-01-05-VV.tif")).expect("exported VV");
    let decoded = decode_band(&bytes).expect("float tiff");
    assert_eq!(&decoded, first.band("VV").expect("VV band"));
}

#[test]
fn test_mono_filter_runs_without_neighbors() {
    common::init_logging();
    let (backend, _) = common::backend(1);
    let mut raw = RawParameters::default();
    raw.speckle_filter_framework = "MONO".into();
    raw.speckle_filter = "REFINED LEE".into();
    raw.speckle_filter_kernel_size = 5;
    raw.terrain_flattening_model = "DIRECT".into();
    raw.dem = common::DEM.into();

    let scenes = Pipeline::new(raw.validate().expect("valid parameters"))
        .run(&backend, &backend)
        .expect("pipeline run");
    assert_eq!(scenes.len(), 1);
    assert!(scenes[0].band("layover_shadow").is_some());
}

/// Catalog that answers with the scenes of another catalog in reverse order
struct ReversedCatalog<'a>(&'a dyn SceneCatalog);

impl SceneCatalog for ReversedCatalog<'_> {
    fn query_scenes(&self, query: &CatalogQuery) -> SarResult<Vec<Scene>> {
        let mut scenes = self.0.query_scenes(query)?;
        scenes.reverse();
        Ok(scenes)
    }
}

#[test]
fn test_collection_is_sorted_even_when_catalog_is_not() {
    common::init_logging();
    let (backend, ids) = common::backend(5);
    let mut raw = RawParameters::default();
    raw.apply_speckle_filtering = false;
    raw.apply_terrain_flattening = false;

    let scenes = Pipeline::new(raw.validate().expect("valid parameters"))
        .run(&ReversedCatalog(&backend), &backend)
        .expect("pipeline run");

    let got: Vec<&str> = scenes.iter().map(|s| s.id()).collect();
    let expected: Vec<&str> = ids.iter().map(String::as_str).collect();
    assert_eq!(got, expected);
    assert!(scenes
        .windows(2)
        .all(|w| w[0].scene.acquired() <= w[1].scene.acquired()));
}

#[test]
fn test_empty_date_range_reports_empty_collection() {
    let (backend, _) = common::backend(3);
    let mut raw = RawParameters::default();
    raw.start_date = "2022-01-01".into();
    raw.stop_date = "2022-02-01".into();

    let result = Pipeline::new(raw.validate().expect("valid parameters")).run(&backend, &backend);
    assert!(matches!(result, Err(SarError::EmptyCollection(_))));
}

#[test]
fn test_raw_export_uses_raw_suffix() {
    common::init_logging();
    let dir = TempDir::new().expect("temp dir");
    let (backend, _) = common::backend(2);
    let mut raw = parameters(dir.path()).to_raw();
    raw.skip_processing = true;

    let (scenes, report) = Pipeline::new(raw.validate().expect("valid parameters"))
        .run_and_export(&backend, &backend, &backend)
        .expect("pipeline run");
    let report = report.expect("export enabled");

    assert_eq!(report.succeeded(), 2);
    assert!(dir.path().join("2021-01-05-VV-raw.tif").exists());
    assert!(dir.path().join("2021-01-17-angle-raw.tif").exists());
    // Raw products stay linear and only get clipped
    assert_eq!(scenes[0].edits, vec![Edit::Clipped]);
    assert!(scenes[0].band("VV").expect("VV band").iter().all(|v| *v > 0.0));
}

#[test]
fn test_raster_load_failure_aborts_run_before_export() {
    common::init_logging();
    let dir = TempDir::new().expect("temp dir");
    let (mut backend, ids) = common::backend(4);
    backend.fail_load(&ids[2]);

    let result = Pipeline::new(parameters(dir.path())).run_and_export(&backend, &backend, &backend);

    match result {
        Err(SarError::Processing(message)) => assert!(message.contains(&ids[2])),
        other => panic!("expected a processing error, got {:?}", other.map(|(s, _)| s.len())),
    }
    assert_eq!(backend.fetch_count(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).expect("output dir").count(), 0);
}
