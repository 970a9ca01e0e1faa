//! Orchestration of a full preprocessing run.
//!
//! A run walks the collection through a fixed sequence of stages. Optional
//! stages are skipped according to the parameter set; every stage consumes
//! the whole collection and hands it to the next one, and the first error
//! aborts the run.

use crate::config::ParameterSet;
use crate::core::border_noise::BorderNoiseCorrector;
use crate::core::clip::clip_scene;
use crate::core::collection::CollectionFilter;
use crate::core::multitemporal::MultiTemporalFilter;
use crate::core::speckle_filter::{FilterFramework, SpeckleFilter};
use crate::core::terrain_flatten::TerrainFlattener;
use crate::core::units::{convert_scene, OutputUnit};
use crate::io::backend::{ArchiveSource, RasterSource, SceneCatalog};
use crate::io::export::{ExportManager, ExportOptions, ExportReport};
use crate::types::{Edit, ProcessedScene, SarError, SarResult, SceneCollection};
use std::collections::BTreeMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Processing stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStage {
    FilteredCollection,
    BorderNoiseCorrected,
    SpeckleFiltered,
    TerrainFlattened,
    UnitConverted,
    Clipped,
    Done,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStage::FilteredCollection => "filtered collection",
            PipelineStage::BorderNoiseCorrected => "border noise corrected",
            PipelineStage::SpeckleFiltered => "speckle filtered",
            PipelineStage::TerrainFlattened => "terrain flattened",
            PipelineStage::UnitConverted => "unit converted",
            PipelineStage::Clipped => "clipped",
            PipelineStage::Done => "done",
        };
        f.write_str(name)
    }
}

pub struct Pipeline {
    params: ParameterSet,
}

impl Pipeline {
    pub fn new(params: ParameterSet) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// Stages a run with these parameters passes through
    pub fn plan(&self) -> Vec<PipelineStage> {
        let p = &self.params;
        let mut stages = vec![PipelineStage::FilteredCollection];
        if !p.skip_processing() {
            if p.apply_border_noise_correction() {
                stages.push(PipelineStage::BorderNoiseCorrected);
            }
            if p.apply_speckle_filtering() {
                stages.push(PipelineStage::SpeckleFiltered);
            }
            if p.apply_terrain_flattening() {
                stages.push(PipelineStage::TerrainFlattened);
            }
            stages.push(PipelineStage::UnitConverted);
        }
        if p.clip_to_roi() {
            stages.push(PipelineStage::Clipped);
        }
        stages.push(PipelineStage::Done);
        stages
    }

    /// Select, load and process the scene collection
    pub fn run(
        &self,
        catalog: &dyn SceneCatalog,
        source: &dyn RasterSource,
    ) -> SarResult<Vec<ProcessedScene>> {
        let collection = CollectionFilter::select(&self.params, catalog)?;
        let mut scenes = self.load(collection, source)?;

        let plan = self.plan();
        let mut current = PipelineStage::FilteredCollection;
        log::info!("Pipeline stage: {} ({} scenes)", current, scenes.len());

        for &stage in &plan[1..] {
            scenes = match stage {
                PipelineStage::BorderNoiseCorrected => self.correct_border_noise(scenes),
                PipelineStage::SpeckleFiltered => self.filter_speckle(scenes)?,
                PipelineStage::TerrainFlattened => self.flatten_terrain(scenes, source)?,
                PipelineStage::UnitConverted => self.convert_units(scenes),
                PipelineStage::Clipped => self.clip(scenes)?,
                PipelineStage::FilteredCollection | PipelineStage::Done => scenes,
            };
            log::info!("Pipeline stage: {} -> {}", current, stage);
            current = stage;
        }

        Ok(scenes)
    }

    /// Run, then export the result when the parameter set asks for it
    pub fn run_and_export(
        &self,
        catalog: &dyn SceneCatalog,
        source: &dyn RasterSource,
        archives: &dyn ArchiveSource,
    ) -> SarResult<(Vec<ProcessedScene>, Option<ExportReport>)> {
        let scenes = self.run(catalog, source)?;
        let report = self
            .export_options()
            .map(|options| ExportManager::new(options).export(&scenes, archives));
        Ok((scenes, report))
    }

    /// Export options derived from the parameter set, `None` when export is off
    pub fn export_options(&self) -> Option<ExportOptions> {
        if !self.params.export() {
            return None;
        }
        let dir = self.params.output_dir()?;
        Some(
            ExportOptions::new(dir, self.params.polarization().required_bands())
                .raw(self.params.skip_processing()),
        )
    }

    fn load(&self, collection: SceneCollection, source: &dyn RasterSource) -> SarResult<Vec<ProcessedScene>> {
        let bands = self.params.polarization().required_bands();
        collection
            .into_scenes()
            .into_iter()
            .map(|scene| {
                let mut rasters = BTreeMap::new();
                for band in &bands {
                    rasters.insert(band.clone(), source.load_band(&scene, band)?);
                }
                log::debug!("Loaded {} bands of {}", rasters.len(), scene.id());
                Ok(ProcessedScene::new(scene, rasters))
            })
            .collect()
    }

    fn correct_border_noise(&self, mut scenes: Vec<ProcessedScene>) -> Vec<ProcessedScene> {
        let corrector = BorderNoiseCorrector::default();

        #[cfg(feature = "parallel")]
        scenes.par_iter_mut().for_each(|s| corrector.apply(s));
        #[cfg(not(feature = "parallel"))]
        scenes.iter_mut().for_each(|s| corrector.apply(s));

        scenes
    }

    fn filter_speckle(&self, scenes: Vec<ProcessedScene>) -> SarResult<Vec<ProcessedScene>> {
        let p = &self.params;
        let filter = SpeckleFilter::new(p.kernel_size());
        let edit = Edit::SpeckleFiltered {
            filter: p.speckle_filter(),
            framework: p.framework(),
            kernel: p.kernel_size(),
        };
        log::info!(
            "{} {} speckle filtering with {} window",
            p.framework(),
            p.speckle_filter(),
            p.kernel_size()
        );

        let mut filtered = match p.framework() {
            FilterFramework::Mono => {
                let filter_one = |mut scene: ProcessedScene| -> SarResult<ProcessedScene> {
                    for band in scene.polarization_bands() {
                        let out = filter.apply(p.speckle_filter(), &scene.bands[&band])?;
                        scene.bands.insert(band, out);
                    }
                    Ok(scene)
                };

                #[cfg(feature = "parallel")]
                let result: SarResult<Vec<ProcessedScene>> = scenes.into_par_iter().map(filter_one).collect();
                #[cfg(not(feature = "parallel"))]
                let result: SarResult<Vec<ProcessedScene>> = scenes.into_iter().map(filter_one).collect();

                result?
            }
            FilterFramework::Multi => {
                MultiTemporalFilter::new(filter, p.speckle_filter(), p.neighbor_count()).apply(scenes)?
            }
        };

        for scene in &mut filtered {
            scene.edits.push(edit.clone());
        }
        Ok(filtered)
    }

    fn flatten_terrain(
        &self,
        mut scenes: Vec<ProcessedScene>,
        source: &dyn RasterSource,
    ) -> SarResult<Vec<ProcessedScene>> {
        let flattener =
            TerrainFlattener::standard(self.params.terrain_model(), self.params.layover_shadow_buffer());
        log::info!(
            "Terrain flattening ({} model, {} m buffer) against {}",
            self.params.terrain_model(),
            self.params.layover_shadow_buffer(),
            self.params.dem()
        );

        for scene in &mut scenes {
            let dem = source.elevation_model(self.params.dem(), &scene.scene)?;
            flattener.flatten(scene, &dem)?;
        }
        Ok(scenes)
    }

    fn convert_units(&self, mut scenes: Vec<ProcessedScene>) -> Vec<ProcessedScene> {
        let unit: OutputUnit = self.params.output_unit();
        for scene in &mut scenes {
            convert_scene(scene, unit);
        }
        scenes
    }

    fn clip(&self, mut scenes: Vec<ProcessedScene>) -> SarResult<Vec<ProcessedScene>> {
        let region = self.params.region();
        for scene in &mut scenes {
            clip_scene(scene, &region).map_err(|e| {
                SarError::Processing(format!("Clipping {} failed: {}", scene.id(), e))
            })?;
        }
        Ok(scenes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawParameters;
    use crate::core::speckle_filter::SpeckleFilterType;
    use crate::core::terrain_flatten::ElevationModel;
    use crate::io::backend::MemoryBackend;
    use crate::types::{BoundingBox, OrbitPass, Scene, ANGLE_BAND, LAYOVER_SHADOW_BAND};
    use ndarray::Array2;

    fn footprint() -> BoundingBox {
        BoundingBox::from_rectangle([5.70, 52.64, 5.80, 52.72]).unwrap()
    }

    fn backend(days: &[u32]) -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        for &day in days {
            let id = format!(
                "S1A_IW_GRDH_1SDV_202103{:02}T054117_202103{:02}T054142_035967_0436A1_8B59",
                day, day
            );
            let scene = Scene::new(
                id,
                OrbitPass::Descending,
                footprint(),
                vec!["VV".into(), "VH".into(), ANGLE_BAND.into()],
            )
            .unwrap();
            let mut bands = BTreeMap::new();
            bands.insert(
                "VV".to_string(),
                Array2::from_shape_fn((8, 8), |(i, j)| 0.05 + 0.002 * ((i * 3 + j + day as usize) % 5) as f32),
            );
            bands.insert("VH".to_string(), Array2::from_elem((8, 8), 0.012f32));
            bands.insert(
                ANGLE_BAND.to_string(),
                Array2::from_shape_fn((8, 8), |(_, j)| 34.0 + j as f32 * 0.5),
            );
            backend.add_scene(scene, bands);
        }
        backend.add_elevation_model(ElevationModel {
            reference: "USGS/SRTMGL1_003".to_string(),
            bounds: BoundingBox::from_rectangle([5.0, 52.0, 6.0, 53.0]).unwrap(),
            pixel_spacing: (10.0, 10.0),
            heights: Array2::zeros((8, 8)),
        });
        backend
    }

    #[test]
    fn test_plan_follows_toggles() {
        let all = Pipeline::new(RawParameters::default().validate().unwrap());
        assert_eq!(
            all.plan(),
            vec![
                PipelineStage::FilteredCollection,
                PipelineStage::BorderNoiseCorrected,
                PipelineStage::SpeckleFiltered,
                PipelineStage::TerrainFlattened,
                PipelineStage::UnitConverted,
                PipelineStage::Clipped,
                PipelineStage::Done,
            ]
        );

        let mut raw = RawParameters::default();
        raw.skip_processing = true;
        raw.clip_to_roi = false;
        let skipped = Pipeline::new(raw.validate().unwrap());
        assert_eq!(skipped.plan(), vec![PipelineStage::FilteredCollection, PipelineStage::Done]);
    }

    #[test]
    fn test_run_records_edits_in_order() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut raw = RawParameters::default();
        raw.speckle_filter_kernel_size = 3;
        raw.speckle_filter_nr_of_images = 2;
        let pipeline = Pipeline::new(raw.validate().unwrap());

        let data = backend(&[2, 5, 8, 11]);
        let scenes = pipeline.run(&data, &data).unwrap();
        assert_eq!(scenes.len(), 4);
        for scene in &scenes {
            assert_eq!(scene.edits.len(), 5);
            assert_eq!(scene.edits[0], Edit::BorderNoiseCorrected);
            assert!(matches!(
                scene.edits[1],
                Edit::SpeckleFiltered { filter: SpeckleFilterType::Lee, framework: FilterFramework::Multi, .. }
            ));
            assert_eq!(scene.edits[3], Edit::UnitConverted(OutputUnit::Db));
            assert_eq!(scene.edits[4], Edit::Clipped);
            assert!(scene.band(LAYOVER_SHADOW_BAND).is_some());
            // Flat terrain: gamma0 stays finite and negative in dB
            assert!(scene.bands["VV"].iter().all(|v| v.is_finite() && *v < 0.0));
        }
    }

    #[test]
    fn test_skip_processing_loads_raw_linear_values() {
        let mut raw = RawParameters::default();
        raw.skip_processing = true;
        raw.clip_to_roi = false;
        let data = backend(&[2, 5]);
        let scenes = Pipeline::new(raw.validate().unwrap()).run(&data, &data).unwrap();

        assert!(scenes.iter().all(|s| s.edits.is_empty()));
        assert_eq!(scenes[0].bands["VH"][[0, 0]], 0.012);
    }

    #[test]
    fn test_multi_on_single_scene_aborts() {
        let data = backend(&[2]);
        let result = Pipeline::new(RawParameters::default().validate().unwrap()).run(&data, &data);
        assert!(matches!(result, Err(SarError::InsufficientNeighbors { available: 1 })));
    }

    #[test]
    fn test_missing_elevation_model_aborts() {
        let mut raw = RawParameters::default();
        raw.dem = "NASA/NASADEM_HGT/001".into();
        raw.speckle_filter_framework = "MONO".into();
        let data = backend(&[2, 5]);
        let result = Pipeline::new(raw.validate().unwrap()).run(&data, &data);
        assert!(matches!(result, Err(SarError::ElevationModelMismatch { .. })));
    }
}
