#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use ndarray::Array2;
use sardine_ard::io::dem::GeoTransform;
use sardine_ard::{BoundingBox, MemoryBackend, OrbitPass, Scene};
use std::collections::BTreeMap;

pub const DEM: &str = "USGS/SRTMGL1_003";
pub const GRID: (usize, usize) = (16, 16);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn footprint() -> BoundingBox {
    BoundingBox::from_rectangle([5.70, 52.64, 5.80, 52.72]).expect("valid footprint")
}

/// Sentinel-1 style identifier for an acquisition `days` after 2021-01-05
pub fn scene_id(days: i64, time: &str) -> String {
    let date = NaiveDate::from_ymd_opt(2021, 1, 5).expect("valid date") + Duration::days(days);
    let stamp = date.format("%Y%m%d");
    format!(
        "S1A_IW_GRDH_1SDV_{}T{}_{}T054142_035967_0436A1_8B59",
        stamp, time, stamp
    )
}

/// Multiplicative speckle around `base` from a small LCG
pub fn speckled(seed: u64, base: f32) -> Array2<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    Array2::from_shape_fn(GRID, |_| {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let u = ((state >> 33) as f32) / (u32::MAX >> 1) as f32;
        base * (0.5 + u)
    })
}

pub fn scene_bands(seed: u64) -> BTreeMap<String, Array2<f32>> {
    let mut bands = BTreeMap::new();
    bands.insert("VV".to_string(), speckled(seed, 0.08));
    bands.insert("VH".to_string(), speckled(seed + 1000, 0.02));
    bands.insert(
        "angle".to_string(),
        Array2::from_shape_fn(GRID, |(_, j)| 33.0 + j as f32 * 0.4),
    );
    bands
}

/// Backend with `count` descending scenes twelve days apart and a gently tilted DEM
pub fn backend(count: usize) -> (MemoryBackend, Vec<String>) {
    let mut backend = MemoryBackend::new();
    let mut ids = Vec::new();
    for i in 0..count {
        let id = scene_id(12 * i as i64, "054117");
        let scene = Scene::new(
            id.clone(),
            OrbitPass::Descending,
            footprint(),
            vec!["VV".into(), "VH".into(), "angle".into()],
        )
        .expect("valid scene id");
        backend.add_scene(scene, scene_bands(i as u64));
        ids.push(id);
    }
    let dem_bounds = BoundingBox::from_rectangle([5.0, 52.0, 6.0, 53.0]).expect("valid bounds");
    backend.add_elevation_raster(
        DEM,
        Array2::from_shape_fn((100, 100), |(i, j)| 20.0 * i as f32 + 15.0 * j as f32),
        GeoTransform::for_bounds(&dem_bounds, (100, 100)),
    );
    (backend, ids)
}
