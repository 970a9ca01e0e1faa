//! Backend interfaces, result archives, export and DEM input

pub mod archive;
pub mod backend;
pub mod dem;
pub mod export;

pub use archive::{ArchiveLayout, HttpArchiveSource};
pub use backend::{ArchiveSource, CatalogQuery, MemoryBackend, RasterSource, SceneCatalog};
#[cfg(feature = "gdal")]
pub use dem::DemReader;
pub use export::{
    BandFailure, CancellationToken, CollisionPolicy, DateKey, ExportManager, ExportOptions,
    ExportReport, ExportResult,
};
