//! Core SAR processing modules

pub mod border_noise;
pub mod clip;
pub mod collection;
pub mod multitemporal;
pub mod pipeline;
pub mod speckle_filter;
pub mod terrain_flatten;
pub mod units;

// Re-export main types
pub use border_noise::{BorderNoiseCorrector, BorderNoiseParams};
pub use collection::CollectionFilter;
pub use multitemporal::{select_neighbors, FilterContext, MultiTemporalFilter};
pub use pipeline::{Pipeline, PipelineStage};
pub use speckle_filter::{FilterFramework, KernelSize, SpeckleFilter, SpeckleFilterParams, SpeckleFilterType};
pub use terrain_flatten::{ElevationModel, TerrainFlattener, TerrainFlatteningParams, TerrainModel};
pub use units::{db_to_linear, linear_to_db, OutputUnit, DB_NODATA};
