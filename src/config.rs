//! Processing parameters.
//!
//! [`RawParameters`] mirrors the JSON parameter file (keys in upper snake
//! case). It is only a carrier: every run needs a [`ParameterSet`], which is
//! produced by [`RawParameters::validate`] and cannot be changed afterwards.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::speckle_filter::{FilterFramework, KernelSize, SpeckleFilterType};
use crate::core::terrain_flatten::TerrainModel;
use crate::core::units::OutputUnit;
use crate::types::{BoundingBox, DateRange, OrbitSelection, PolarizationMode, SarError, SarResult};

/// Unvalidated parameters as read from a file or built by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct RawParameters {
    pub start_date: String,
    #[serde(alias = "END_DATE")]
    pub stop_date: String,
    pub polarization: String,
    pub orbit: String,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub roi: [f64; 4],
    pub apply_border_noise_correction: bool,
    pub apply_speckle_filtering: bool,
    pub speckle_filter_framework: String,
    pub speckle_filter: String,
    pub speckle_filter_kernel_size: usize,
    pub speckle_filter_nr_of_images: usize,
    pub apply_terrain_flattening: bool,
    pub dem: String,
    pub terrain_flattening_model: String,
    pub terrain_flattening_additional_layover_shadow_buffer: f64,
    pub format: String,
    pub clip_to_roi: bool,
    #[serde(alias = "SAVE_ASSET", alias = "SAVE_ASSETS")]
    pub export: bool,
    pub output_dir: Option<PathBuf>,
    pub skip_processing: bool,
}

impl Default for RawParameters {
    fn default() -> Self {
        Self {
            start_date: "2021-01-01".to_string(),
            stop_date: "2021-07-01".to_string(),
            polarization: "VVVH".to_string(),
            orbit: "DESCENDING".to_string(),
            roi: [5.71773, 52.65939, 5.7766, 52.7029],
            apply_border_noise_correction: true,
            apply_speckle_filtering: true,
            speckle_filter_framework: "MULTI".to_string(),
            speckle_filter: "LEE".to_string(),
            speckle_filter_kernel_size: 9,
            speckle_filter_nr_of_images: 10,
            apply_terrain_flattening: true,
            dem: "USGS/SRTMGL1_003".to_string(),
            terrain_flattening_model: "VOLUME".to_string(),
            terrain_flattening_additional_layover_shadow_buffer: 0.0,
            format: "DB".to_string(),
            clip_to_roi: true,
            export: false,
            output_dir: None,
            skip_processing: false,
        }
    }
}

fn parse_date(key: &str, value: &str) -> SarResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| SarError::Configuration(format!("{} '{}' is not YYYY-MM-DD: {}", key, value, e)))
}

impl RawParameters {
    /// Check every field and build the immutable parameter set
    pub fn validate(&self) -> SarResult<ParameterSet> {
        let date_range = DateRange::new(
            parse_date("START_DATE", &self.start_date)?,
            parse_date("STOP_DATE", &self.stop_date)?,
        )?;
        let polarization: PolarizationMode = self.polarization.parse()?;
        let orbit: OrbitSelection = self.orbit.parse()?;
        let region = BoundingBox::from_rectangle(self.roi)?;

        let speckle_filter: SpeckleFilterType = self.speckle_filter.parse()?;
        let framework: FilterFramework = self.speckle_filter_framework.parse()?;
        let kernel_size = KernelSize::new(self.speckle_filter_kernel_size).map_err(|_| {
            SarError::Configuration(format!(
                "SPECKLE_FILTER_KERNEL_SIZE {} must be a positive odd integer",
                self.speckle_filter_kernel_size
            ))
        })?;
        if self.apply_speckle_filtering
            && framework == FilterFramework::Multi
            && self.speckle_filter_nr_of_images == 0
        {
            return Err(SarError::Configuration(
                "SPECKLE_FILTER_NR_OF_IMAGES must be at least 1 for the MULTI framework".to_string(),
            ));
        }

        let terrain_model: TerrainModel = self.terrain_flattening_model.parse()?;
        let buffer = self.terrain_flattening_additional_layover_shadow_buffer;
        if !buffer.is_finite() || buffer < 0.0 {
            return Err(SarError::Configuration(format!(
                "TERRAIN_FLATTENING_ADDITIONAL_LAYOVER_SHADOW_BUFFER {} must be a non-negative number",
                buffer
            )));
        }
        if self.apply_terrain_flattening && self.dem.trim().is_empty() {
            return Err(SarError::Configuration("DEM must name an elevation model".to_string()));
        }

        let output_unit: OutputUnit = self.format.parse()?;

        if self.export && self.output_dir.is_none() {
            return Err(SarError::Configuration(
                "OUTPUT_DIR is required when export is enabled".to_string(),
            ));
        }

        Ok(ParameterSet {
            date_range,
            polarization,
            orbit,
            region,
            apply_border_noise_correction: self.apply_border_noise_correction,
            apply_speckle_filtering: self.apply_speckle_filtering,
            speckle_filter,
            framework,
            kernel_size,
            neighbor_count: self.speckle_filter_nr_of_images,
            apply_terrain_flattening: self.apply_terrain_flattening,
            terrain_model,
            dem: self.dem.trim().to_string(),
            layover_shadow_buffer: buffer,
            output_unit,
            clip_to_roi: self.clip_to_roi,
            export: self.export,
            output_dir: self.output_dir.clone(),
            skip_processing: self.skip_processing,
        })
    }
}

/// Validated, immutable processing parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    date_range: DateRange,
    polarization: PolarizationMode,
    orbit: OrbitSelection,
    region: BoundingBox,
    apply_border_noise_correction: bool,
    apply_speckle_filtering: bool,
    speckle_filter: SpeckleFilterType,
    framework: FilterFramework,
    kernel_size: KernelSize,
    neighbor_count: usize,
    apply_terrain_flattening: bool,
    terrain_model: TerrainModel,
    dem: String,
    layover_shadow_buffer: f64,
    output_unit: OutputUnit,
    clip_to_roi: bool,
    export: bool,
    output_dir: Option<PathBuf>,
    skip_processing: bool,
}

impl ParameterSet {
    pub fn from_json_str(json: &str) -> SarResult<Self> {
        let raw: RawParameters = serde_json::from_str(json)
            .map_err(|e| SarError::Configuration(format!("Invalid parameter file: {}", e)))?;
        raw.validate()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        let path = path.as_ref();
        log::info!("Loading parameters from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// The unvalidated form of this set, e.g. to derive a modified copy
    pub fn to_raw(&self) -> RawParameters {
        let r = &self.region;
        RawParameters {
            start_date: self.date_range.start.format("%Y-%m-%d").to_string(),
            stop_date: self.date_range.end.format("%Y-%m-%d").to_string(),
            polarization: format!("{:?}", self.polarization),
            orbit: format!("{:?}", self.orbit).to_uppercase(),
            roi: [r.min_lon, r.min_lat, r.max_lon, r.max_lat],
            apply_border_noise_correction: self.apply_border_noise_correction,
            apply_speckle_filtering: self.apply_speckle_filtering,
            speckle_filter_framework: self.framework.to_string(),
            speckle_filter: self.speckle_filter.to_string(),
            speckle_filter_kernel_size: self.kernel_size.get(),
            speckle_filter_nr_of_images: self.neighbor_count,
            apply_terrain_flattening: self.apply_terrain_flattening,
            dem: self.dem.clone(),
            terrain_flattening_model: self.terrain_model.to_string(),
            terrain_flattening_additional_layover_shadow_buffer: self.layover_shadow_buffer,
            format: self.output_unit.to_string(),
            clip_to_roi: self.clip_to_roi,
            export: self.export,
            output_dir: self.output_dir.clone(),
            skip_processing: self.skip_processing,
        }
    }

    pub fn date_range(&self) -> DateRange {
        self.date_range
    }

    pub fn polarization(&self) -> PolarizationMode {
        self.polarization
    }

    pub fn orbit(&self) -> OrbitSelection {
        self.orbit
    }

    pub fn region(&self) -> BoundingBox {
        self.region
    }

    pub fn apply_border_noise_correction(&self) -> bool {
        self.apply_border_noise_correction
    }

    pub fn apply_speckle_filtering(&self) -> bool {
        self.apply_speckle_filtering
    }

    pub fn speckle_filter(&self) -> SpeckleFilterType {
        self.speckle_filter
    }

    pub fn framework(&self) -> FilterFramework {
        self.framework
    }

    pub fn kernel_size(&self) -> KernelSize {
        self.kernel_size
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbor_count
    }

    pub fn apply_terrain_flattening(&self) -> bool {
        self.apply_terrain_flattening
    }

    pub fn terrain_model(&self) -> TerrainModel {
        self.terrain_model
    }

    pub fn dem(&self) -> &str {
        &self.dem
    }

    pub fn layover_shadow_buffer(&self) -> f64 {
        self.layover_shadow_buffer
    }

    pub fn output_unit(&self) -> OutputUnit {
        self.output_unit
    }

    pub fn clip_to_roi(&self) -> bool {
        self.clip_to_roi
    }

    pub fn export(&self) -> bool {
        self.export
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    pub fn skip_processing(&self) -> bool {
        self.skip_processing
    }
}
