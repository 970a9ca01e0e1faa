use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use ndarray::Array2;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::core::speckle_filter::{FilterFramework, KernelSize, SpeckleFilterType};
use crate::core::terrain_flatten::TerrainModel;
use crate::core::units::OutputUnit;

/// Real-valued intensity or amplitude data
pub type SarReal = f32;

/// 2D real SAR data array (rows x cols)
pub type SarRealImage = Array2<SarReal>;

/// Name of the incidence angle band carried by every GRD scene
pub const ANGLE_BAND: &str = "angle";

/// Name of the layover/shadow mask band added by terrain flattening
pub const LAYOVER_SHADOW_BAND: &str = "layover_shadow";

/// Single polarization channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
}

impl Polarization {
    pub fn band_name(&self) -> &'static str {
        match self {
            Polarization::VV => "VV",
            Polarization::VH => "VH",
        }
    }
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.band_name())
    }
}

/// Polarization selection requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolarizationMode {
    VV,
    VH,
    VVVH,
}

impl PolarizationMode {
    pub fn polarizations(&self) -> &'static [Polarization] {
        match self {
            PolarizationMode::VV => &[Polarization::VV],
            PolarizationMode::VH => &[Polarization::VH],
            PolarizationMode::VVVH => &[Polarization::VV, Polarization::VH],
        }
    }

    /// Bands a scene must carry to be selected: the polarizations plus `angle`
    pub fn required_bands(&self) -> Vec<String> {
        let mut bands: Vec<String> = self
            .polarizations()
            .iter()
            .map(|p| p.band_name().to_string())
            .collect();
        bands.push(ANGLE_BAND.to_string());
        bands
    }
}

impl std::str::FromStr for PolarizationMode {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "VV" => Ok(PolarizationMode::VV),
            "VH" => Ok(PolarizationMode::VH),
            "VVVH" => Ok(PolarizationMode::VVVH),
            other => Err(SarError::Configuration(format!("Invalid polarization: {}", other))),
        }
    }
}

/// Orbit pass of a single acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrbitPass {
    Ascending,
    Descending,
}

impl std::fmt::Display for OrbitPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrbitPass::Ascending => write!(f, "ASCENDING"),
            OrbitPass::Descending => write!(f, "DESCENDING"),
        }
    }
}

/// Orbit pass filter requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrbitSelection {
    Both,
    Ascending,
    Descending,
}

impl OrbitSelection {
    pub fn accepts(&self, pass: OrbitPass) -> bool {
        match self {
            OrbitSelection::Both => true,
            OrbitSelection::Ascending => pass == OrbitPass::Ascending,
            OrbitSelection::Descending => pass == OrbitPass::Descending,
        }
    }
}

impl std::str::FromStr for OrbitSelection {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BOTH" => Ok(OrbitSelection::Both),
            "ASCENDING" => Ok(OrbitSelection::Ascending),
            "DESCENDING" => Ok(OrbitSelection::Descending),
            other => Err(SarError::Configuration(format!("Invalid orbit: {}", other))),
        }
    }
}

/// Geospatial bounding box (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Build from `[min_lon, min_lat, max_lon, max_lat]`, the rectangle order used in parameter files
    pub fn from_rectangle(coords: [f64; 4]) -> SarResult<Self> {
        let [min_lon, min_lat, max_lon, max_lat] = coords;
        if coords.iter().any(|c| !c.is_finite()) || min_lon >= max_lon || min_lat >= max_lat {
            return Err(SarError::Configuration(format!(
                "Invalid region rectangle {:?}",
                coords
            )));
        }
        Ok(Self { min_lon, max_lon, min_lat, max_lat })
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon < other.max_lon
            && other.min_lon < self.max_lon
            && self.min_lat < other.max_lat
            && other.min_lat < self.max_lat
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.min_lon
            && self.max_lon >= other.max_lon
            && self.min_lat <= other.min_lat
            && self.max_lat >= other.max_lat
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BoundingBox {
            min_lon: self.min_lon.max(other.min_lon),
            max_lon: self.max_lon.min(other.max_lon),
            min_lat: self.min_lat.max(other.min_lat),
            max_lat: self.max_lat.min(other.max_lat),
        })
    }
}

/// Half-open calendar date range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> SarResult<Self> {
        if start >= end {
            return Err(SarError::Configuration(format!(
                "Date range start {} must be before end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, time: &DateTime<Utc>) -> bool {
        let date = time.date_naive();
        date >= self.start && date < self.end
    }
}

fn acquisition_token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"^(\d{8})T(\d{6})$").expect("static regex"))
}

/// Parse the acquisition start time embedded in a Sentinel-1 product identifier.
///
/// The identifier is split on `_`; the fifth token must be `YYYYMMDDTHHMMSS`,
/// e.g. `S1A_IW_GRDH_1SDV_20210103T054117_20210103T054142_035967_0436A1_8B59`.
pub fn parse_acquisition_time(scene_id: &str) -> SarResult<DateTime<Utc>> {
    let token = scene_id
        .split('_')
        .nth(4)
        .ok_or_else(|| SarError::InvalidSceneId(format!("{}: fewer than 5 '_' tokens", scene_id)))?;

    if !acquisition_token_regex().is_match(token) {
        return Err(SarError::InvalidSceneId(format!(
            "{}: token '{}' is not YYYYMMDDTHHMMSS",
            scene_id, token
        )));
    }

    let naive = NaiveDateTime::parse_from_str(token, "%Y%m%dT%H%M%S")
        .map_err(|e| SarError::InvalidSceneId(format!("{}: {}", scene_id, e)))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// One SAR acquisition as reported by the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    id: String,
    acquired: DateTime<Utc>,
    pub orbit_pass: OrbitPass,
    pub footprint: BoundingBox,
    pub bands: Vec<String>,
}

impl Scene {
    pub fn new(
        id: impl Into<String>,
        orbit_pass: OrbitPass,
        footprint: BoundingBox,
        bands: Vec<String>,
    ) -> SarResult<Self> {
        let id = id.into();
        let acquired = parse_acquisition_time(&id)?;
        Ok(Self { id, acquired, orbit_pass, footprint, bands })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn acquired(&self) -> DateTime<Utc> {
        self.acquired
    }

    pub fn has_band(&self, band: &str) -> bool {
        self.bands.iter().any(|b| b == band)
    }
}

/// Non-empty scene sequence ordered by acquisition time
#[derive(Debug, Clone)]
pub struct SceneCollection {
    scenes: Vec<Scene>,
}

impl SceneCollection {
    /// Wrap scenes that are already ordered; rejects empty or unordered input
    pub fn new(scenes: Vec<Scene>) -> SarResult<Self> {
        if scenes.is_empty() {
            return Err(SarError::EmptyCollection("no scenes supplied".to_string()));
        }
        if scenes.windows(2).any(|w| w[0].acquired > w[1].acquired) {
            return Err(SarError::Processing(
                "Scene collection is not ordered by acquisition time".to_string(),
            ));
        }
        Ok(Self { scenes })
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scene> {
        self.scenes.iter()
    }

    pub fn into_scenes(self) -> Vec<Scene> {
        self.scenes
    }
}

/// Processing step applied to a scene, recorded in order
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    BorderNoiseCorrected,
    SpeckleFiltered {
        filter: SpeckleFilterType,
        framework: FilterFramework,
        kernel: KernelSize,
    },
    TerrainFlattened { model: TerrainModel },
    UnitConverted(OutputUnit),
    Clipped,
}

/// A scene together with its band rasters and the edits applied so far
#[derive(Debug, Clone)]
pub struct ProcessedScene {
    pub scene: Scene,
    pub bands: BTreeMap<String, SarRealImage>,
    pub edits: Vec<Edit>,
}

impl ProcessedScene {
    pub fn new(scene: Scene, bands: BTreeMap<String, SarRealImage>) -> Self {
        Self { scene, bands, edits: Vec::new() }
    }

    pub fn id(&self) -> &str {
        self.scene.id()
    }

    pub fn band(&self, name: &str) -> Option<&SarRealImage> {
        self.bands.get(name)
    }

    /// Grid shape shared by all bands, taken from the first band
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.bands.values().next().map(|b| b.dim())
    }

    /// Names of the backscatter bands (everything except angle and mask bands)
    pub fn polarization_bands(&self) -> Vec<String> {
        self.bands
            .keys()
            .filter(|name| name.as_str() != ANGLE_BAND && name.as_str() != LAYOVER_SHADOW_BAND)
            .cloned()
            .collect()
    }
}

/// Error types for ARD processing
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Empty collection: {0}")]
    EmptyCollection(String),

    #[error("Insufficient neighbors for multi-temporal filtering: {available} scene(s) available, at least 2 required")]
    InsufficientNeighbors { available: usize },

    #[error("Invalid kernel size {0}: must be a positive odd integer")]
    InvalidKernelSize(usize),

    #[error("Elevation model '{dem}' does not cover scene {scene}: {reason}")]
    ElevationModelMismatch { scene: String, dem: String, reason: String },

    #[error("Failed to write band {band}: {reason}")]
    ExportBandWrite { band: String, reason: String },

    #[error("Invalid scene identifier {0}")]
    InvalidSceneId(String),

    #[error("Date key {date_key} already written by scene {previous}")]
    DateKeyCollision { date_key: String, previous: String },

    #[error("Export cancelled before scene {0} started")]
    Cancelled(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for SAR operations
pub type SarResult<T> = Result<T, SarError>;
