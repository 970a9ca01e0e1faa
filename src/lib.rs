//! SARdine ARD: analysis-ready Sentinel-1 GRD preprocessing
//!
//! Turns a catalog of Sentinel-1 GRD scenes into a time series of
//! border-noise corrected, speckle filtered, terrain flattened backscatter
//! images and exports them as date-keyed GeoTIFF files.
//!
//! ```no_run
//! use sardine_ard::{MemoryBackend, ParameterSet, Pipeline};
//!
//! # fn main() -> sardine_ard::SarResult<()> {
//! let params = ParameterSet::from_file("params.json")?;
//! let backend = MemoryBackend::new();
//! let (scenes, report) = Pipeline::new(params).run_and_export(&backend, &backend, &backend)?;
//! println!("{} scenes processed", scenes.len());
//! if let Some(report) = report {
//!     println!("{}", report);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod io;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use config::{ParameterSet, RawParameters};
pub use core::{Pipeline, PipelineStage};
pub use io::{ExportManager, ExportOptions, ExportReport, ExportResult, MemoryBackend};
pub use types::{
    BoundingBox, Edit, OrbitPass, OrbitSelection, Polarization, PolarizationMode, ProcessedScene,
    SarError, SarResult, Scene, SceneCollection,
};
