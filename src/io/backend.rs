//! Interfaces to the system that stores scenes and serves processed products,
//! plus an in-process implementation used for local runs and tests.

use crate::core::terrain_flatten::ElevationModel;
use crate::io::archive::{ArchiveLayout, HttpArchiveSource};
use crate::io::dem::{elevation_model_from_raster, GeoTransform};
use crate::types::{
    BoundingBox, DateRange, OrbitSelection, ProcessedScene, SarError, SarRealImage, SarResult,
    Scene,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Scene search criteria sent to a catalog
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogQuery {
    pub date_range: DateRange,
    /// Bands a scene must carry (polarizations plus `angle`)
    pub required_bands: Vec<String>,
    pub orbit: OrbitSelection,
    pub region: BoundingBox,
}

impl CatalogQuery {
    pub fn matches(&self, scene: &Scene) -> bool {
        self.date_range.contains(&scene.acquired())
            && self.required_bands.iter().all(|b| scene.has_band(b))
            && self.orbit.accepts(scene.orbit_pass)
            && scene.footprint.intersects(&self.region)
    }
}

/// Source of scene metadata
pub trait SceneCatalog {
    /// Scenes matching the query, expected in ascending acquisition order
    fn query_scenes(&self, query: &CatalogQuery) -> SarResult<Vec<Scene>>;
}

/// Source of band rasters and elevation data
pub trait RasterSource {
    /// Linear intensity (or degrees for `angle`) of one band
    fn load_band(&self, scene: &Scene, band: &str) -> SarResult<SarRealImage>;

    /// Elevation resampled onto the grid of `scene`
    fn elevation_model(&self, reference: &str, scene: &Scene) -> SarResult<ElevationModel>;
}

/// Source of downloadable result archives for processed scenes
pub trait ArchiveSource: Send + Sync {
    fn fetch_archive(&self, scene: &ProcessedScene, bands: &[String]) -> SarResult<Vec<u8>>;
}

impl ArchiveSource for HttpArchiveSource {
    fn fetch_archive(&self, scene: &ProcessedScene, _bands: &[String]) -> SarResult<Vec<u8>> {
        self.download(scene.id())
    }
}

/// In-memory catalog, raster store and archive server.
///
/// Archives are packed on request from the processed scene's own bands, so
/// whatever the pipeline produced is what gets exported. Failures can be
/// injected per scene id.
#[derive(Default)]
pub struct MemoryBackend {
    scenes: Vec<Scene>,
    rasters: HashMap<(String, String), SarRealImage>,
    elevation: BTreeMap<String, ElevationModel>,
    elevation_rasters: BTreeMap<String, (SarRealImage, GeoTransform)>,
    failing_archives: HashSet<String>,
    dropped_bands: HashMap<String, HashSet<String>>,
    failing_loads: HashSet<String>,
    fetches: AtomicUsize,
    fetched_ids: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scene together with its band rasters
    pub fn add_scene(&mut self, scene: Scene, bands: BTreeMap<String, SarRealImage>) {
        for (band, raster) in bands {
            self.rasters.insert((scene.id().to_string(), band), raster);
        }
        self.scenes.push(scene);
    }

    /// Register an elevation model already on the scene grid
    pub fn add_elevation_model(&mut self, dem: ElevationModel) {
        self.elevation.insert(dem.reference.clone(), dem);
    }

    /// Register a georeferenced DEM raster, resampled onto each scene on request
    pub fn add_elevation_raster(&mut self, reference: &str, heights: SarRealImage, transform: GeoTransform) {
        self.elevation_rasters
            .insert(reference.to_string(), (heights, transform));
    }

    /// Make every archive request for `scene_id` fail
    pub fn fail_archive(&mut self, scene_id: &str) {
        self.failing_archives.insert(scene_id.to_string());
    }

    /// Leave `band` out of the archive served for `scene_id`
    pub fn drop_band_from_archive(&mut self, scene_id: &str, band: &str) {
        self.dropped_bands
            .entry(scene_id.to_string())
            .or_default()
            .insert(band.to_string());
    }

    /// Make raster loads for `scene_id` fail
    pub fn fail_load(&mut self, scene_id: &str) {
        self.failing_loads.insert(scene_id.to_string());
    }

    /// Number of archive requests served or refused so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Scene ids in the order their archives were requested
    pub fn fetched_ids(&self) -> Vec<String> {
        self.fetched_ids.lock().map(|ids| ids.clone()).unwrap_or_default()
    }
}

impl SceneCatalog for MemoryBackend {
    fn query_scenes(&self, query: &CatalogQuery) -> SarResult<Vec<Scene>> {
        let mut matches: Vec<Scene> = self.scenes.iter().filter(|s| query.matches(s)).cloned().collect();
        matches.sort_by_key(|s| s.acquired());
        Ok(matches)
    }
}

impl RasterSource for MemoryBackend {
    fn load_band(&self, scene: &Scene, band: &str) -> SarResult<SarRealImage> {
        if self.failing_loads.contains(scene.id()) {
            return Err(SarError::Processing(format!("Raster load of {} refused", scene.id())));
        }
        self.rasters
            .get(&(scene.id().to_string(), band.to_string()))
            .cloned()
            .ok_or_else(|| SarError::Processing(format!("Scene {} has no band {}", scene.id(), band)))
    }

    fn elevation_model(&self, reference: &str, scene: &Scene) -> SarResult<ElevationModel> {
        if let Some(dem) = self.elevation.get(reference) {
            return Ok(dem.clone());
        }
        let mismatch = |reason: &str| SarError::ElevationModelMismatch {
            scene: scene.id().to_string(),
            dem: reference.to_string(),
            reason: reason.to_string(),
        };
        let (heights, transform) = self
            .elevation_rasters
            .get(reference)
            .ok_or_else(|| mismatch("no such elevation model"))?;
        let shape = scene
            .bands
            .iter()
            .find_map(|band| self.rasters.get(&(scene.id().to_string(), band.clone())))
            .map(|raster| raster.dim())
            .ok_or_else(|| mismatch("scene has no rasters to define a grid"))?;
        elevation_model_from_raster(reference, heights, transform, &scene.footprint, shape)
    }
}

impl ArchiveSource for MemoryBackend {
    fn fetch_archive(&self, scene: &ProcessedScene, bands: &[String]) -> SarResult<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut ids) = self.fetched_ids.lock() {
            ids.push(scene.id().to_string());
        }

        if self.failing_archives.contains(scene.id()) {
            return Err(SarError::Http(format!("Archive request for {} failed", scene.id())));
        }

        let dropped = self.dropped_bands.get(scene.id());
        let layout = ArchiveLayout::download(bands.to_vec());
        layout.pack(
            bands
                .iter()
                .filter(|b| dropped.map_or(true, |d| !d.contains(*b)))
                .filter_map(|b| scene.bands.get(b).map(|r| (b.as_str(), r))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrbitPass;
    use chrono::NaiveDate;
    use ndarray::Array2;

    fn scene(id: &str, pass: OrbitPass, bands: &[&str]) -> Scene {
        Scene::new(
            id,
            pass,
            BoundingBox::from_rectangle([5.0, 52.0, 6.0, 53.0]).unwrap(),
            bands.iter().map(|b| b.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_query_filters_and_sorts() {
        let mut backend = MemoryBackend::new();
        let later = scene(
            "S1A_IW_GRDH_1SDV_20210115T054117_20210115T054142_035967_0436A1_8B59",
            OrbitPass::Descending,
            &["VV", "VH", "angle"],
        );
        let earlier = scene(
            "S1A_IW_GRDH_1SDV_20210103T054117_20210103T054142_035967_0436A1_8B59",
            OrbitPass::Descending,
            &["VV", "VH", "angle"],
        );
        let ascending = scene(
            "S1A_IW_GRDH_1SDV_20210105T171000_20210105T171025_035967_0436A1_8B59",
            OrbitPass::Ascending,
            &["VV", "VH", "angle"],
        );
        let single_pol = scene(
            "S1A_IW_GRDH_1SSV_20210107T054117_20210107T054142_035967_0436A1_8B59",
            OrbitPass::Descending,
            &["VV", "angle"],
        );
        for s in [later, earlier, ascending, single_pol] {
            backend.add_scene(s, BTreeMap::new());
        }

        let query = CatalogQuery {
            date_range: DateRange::new(
                NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2021, 2, 1).unwrap(),
            )
            .unwrap(),
            required_bands: vec!["VV".into(), "VH".into(), "angle".into()],
            orbit: OrbitSelection::Descending,
            region: BoundingBox::from_rectangle([5.5, 52.5, 5.6, 52.6]).unwrap(),
        };
        let ids: Vec<String> = backend
            .query_scenes(&query)
            .unwrap()
            .iter()
            .map(|s| s.id()[17..25].to_string())
            .collect();
        assert_eq!(ids, vec!["20210103", "20210115"]);
    }

    #[test]
    fn test_archive_respects_injected_failures() {
        let mut backend = MemoryBackend::new();
        let s = scene(
            "S1A_IW_GRDH_1SDV_20210103T054117_20210103T054142_035967_0436A1_8B59",
            OrbitPass::Descending,
            &["VV", "angle"],
        );
        let mut bands = BTreeMap::new();
        bands.insert("VV".to_string(), Array2::from_elem((2, 2), 0.1f32));
        bands.insert("angle".to_string(), Array2::from_elem((2, 2), 40.0f32));
        let processed = ProcessedScene::new(s.clone(), bands);
        let wanted = vec!["VV".to_string(), "angle".to_string()];

        backend.drop_band_from_archive(s.id(), "angle");
        let bytes = backend.fetch_archive(&processed, &wanted).unwrap();
        let contents = ArchiveLayout::download(wanted.clone()).extract(&bytes).unwrap();
        assert!(contents.bands.contains_key("VV"));
        assert!(!contents.bands.contains_key("angle"));

        backend.fail_archive(s.id());
        assert!(backend.fetch_archive(&processed, &wanted).is_err());
        assert_eq!(backend.fetch_count(), 2);
    }

    #[test]
    fn test_elevation_raster_is_resampled_to_scene_grid() {
        let mut backend = MemoryBackend::new();
        let mut s = scene(
            "S1A_IW_GRDH_1SDV_20210103T054117_20210103T054142_035967_0436A1_8B59",
            OrbitPass::Descending,
            &["VV", "angle"],
        );
        s.footprint = BoundingBox::from_rectangle([5.2, 52.2, 5.4, 52.4]).unwrap();
        let mut bands = BTreeMap::new();
        bands.insert("VV".to_string(), Array2::from_elem((8, 6), 0.1f32));
        backend.add_scene(s.clone(), bands);

        let dem_bounds = BoundingBox::from_rectangle([5.0, 52.0, 6.0, 53.0]).unwrap();
        backend.add_elevation_raster(
            "dem",
            Array2::from_elem((20, 20), 42.0f32),
            GeoTransform::for_bounds(&dem_bounds, (20, 20)),
        );

        let dem = backend.elevation_model("dem", &s).unwrap();
        assert_eq!(dem.heights.dim(), (8, 6));
        assert!(dem.bounds.contains(&s.footprint));
        assert!(dem.heights.iter().all(|h| (*h - 42.0).abs() < 1e-4));
        assert!(matches!(
            backend.elevation_model("other", &s),
            Err(SarError::ElevationModelMismatch { .. })
        ));
    }
}
