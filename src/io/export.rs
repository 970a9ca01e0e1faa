//! Download of processed scenes into date-keyed GeoTIFF files.
//!
//! Every scene yields one [`ExportResult`]; a failing scene never stops the
//! batch. Files are written as `<dir>/<YYYY-MM-DD>-<band>.tif` (with a
//! `-raw` suffix before the extension for unprocessed exports).

use crate::io::archive::ArchiveLayout;
use crate::io::backend::ArchiveSource;
use crate::types::{parse_acquisition_time, ProcessedScene, SarError, SarResult};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Calendar date of an acquisition, `YYYY-MM-DD`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateKey(String);

impl DateKey {
    /// Derive the key from the acquisition token of a scene identifier
    pub fn from_scene_id(scene_id: &str) -> SarResult<Self> {
        let acquired = parse_acquisition_time(scene_id)?;
        Ok(Self(acquired.format("%Y-%m-%d").to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to do when two scenes of one batch share a date key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Later scenes in input order overwrite earlier files
    #[default]
    LastWriteWins,
    /// Later scenes fail with [`SarError::DateKeyCollision`] and write nothing
    Error,
}

/// Shared flag that stops an export before the next scene starts
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub output_dir: PathBuf,
    /// Bands every scene must deliver
    pub bands: Vec<String>,
    /// Unprocessed export: adds the `-raw` suffix
    pub raw: bool,
    pub collision_policy: CollisionPolicy,
    /// Worker threads; 0 lets rayon decide
    pub workers: usize,
    pub cancellation: CancellationToken,
}

impl ExportOptions {
    pub fn new(output_dir: impl Into<PathBuf>, bands: Vec<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            bands,
            raw: false,
            collision_policy: CollisionPolicy::default(),
            workers: 0,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub fn collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Destination of one band of one date
    pub fn band_path(&self, date_key: &DateKey, band: &str) -> PathBuf {
        let suffix = if self.raw { "-raw" } else { "" };
        self.output_dir.join(format!("{}-{}{}.tif", date_key, band, suffix))
    }
}

/// A band that could not be delivered
#[derive(Debug, Clone, PartialEq)]
pub struct BandFailure {
    pub band: String,
    pub reason: String,
}

impl BandFailure {
    fn new(band: &str, reason: impl Into<String>) -> Self {
        Self { band: band.to_string(), reason: reason.into() }
    }

    pub fn to_error(&self) -> SarError {
        SarError::ExportBandWrite { band: self.band.clone(), reason: self.reason.clone() }
    }
}

/// Outcome of exporting one scene
#[derive(Debug)]
pub struct ExportResult {
    pub scene_id: String,
    pub date_key: Option<DateKey>,
    pub success: bool,
    /// Files written per band
    pub written: BTreeMap<String, PathBuf>,
    pub band_failures: Vec<BandFailure>,
    /// Failure that prevented the scene from being exported at all
    pub error: Option<SarError>,
    /// Earlier scene of the batch with the same date key
    pub collided_with: Option<String>,
}

impl ExportResult {
    fn new(scene_id: &str, date_key: Option<DateKey>) -> Self {
        Self {
            scene_id: scene_id.to_string(),
            date_key,
            success: false,
            written: BTreeMap::new(),
            band_failures: Vec::new(),
            error: None,
            collided_with: None,
        }
    }

    fn failed(mut self, error: SarError) -> Self {
        self.success = false;
        self.error = Some(error);
        self
    }
}

/// Per-scene results of one export batch, in input order
#[derive(Debug, Default)]
pub struct ExportReport {
    results: Vec<ExportResult>,
}

impl ExportReport {
    pub fn results(&self) -> &[ExportResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ExportResult> {
        self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExportResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

impl std::fmt::Display for ExportReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} of {} scenes exported", self.succeeded(), self.len())
    }
}

/// Writes processed scenes to disk through an [`ArchiveSource`]
pub struct ExportManager {
    options: ExportOptions,
    layout: ArchiveLayout,
}

impl ExportManager {
    pub fn new(options: ExportOptions) -> Self {
        let layout = ArchiveLayout::download(options.bands.clone());
        Self { options, layout }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Export every scene; never fails as a whole
    pub fn export(&self, scenes: &[ProcessedScene], source: &dyn ArchiveSource) -> ExportReport {
        log::info!(
            "Exporting {} scenes to {}",
            scenes.len(),
            self.options.output_dir.display()
        );

        // Scenes sharing a date key go to the same worker, in input order
        let mut slots: Vec<Option<ExportResult>> = (0..scenes.len()).map(|_| None).collect();
        let mut groups: BTreeMap<DateKey, Vec<usize>> = BTreeMap::new();
        for (index, scene) in scenes.iter().enumerate() {
            match DateKey::from_scene_id(scene.id()) {
                Ok(key) => groups.entry(key).or_default().push(index),
                Err(e) => {
                    log::warn!("Cannot derive date key for {}: {}", scene.id(), e);
                    slots[index] = Some(ExportResult::new(scene.id(), None).failed(e));
                }
            }
        }
        let groups: Vec<(DateKey, Vec<usize>)> = groups.into_iter().collect();

        for (index, result) in self.run_groups(&groups, scenes, source) {
            slots[index] = Some(result);
        }

        let report = ExportReport { results: slots.into_iter().flatten().collect() };
        log::info!("{}", report);
        for failure in report.failures() {
            if let Some(error) = &failure.error {
                log::warn!("{}: {}", failure.scene_id, error);
            }
            for band in &failure.band_failures {
                log::warn!("{}: {}", failure.scene_id, band.to_error());
            }
        }
        report
    }

    #[cfg(feature = "parallel")]
    fn run_groups(
        &self,
        groups: &[(DateKey, Vec<usize>)],
        scenes: &[ProcessedScene],
        source: &dyn ArchiveSource,
    ) -> Vec<(usize, ExportResult)> {
        let run = || -> Vec<(usize, ExportResult)> {
            groups
                .par_iter()
                .flat_map_iter(|(key, members)| self.export_group(key, members, scenes, source))
                .collect()
        };

        match rayon::ThreadPoolBuilder::new().num_threads(self.options.workers).build() {
            Ok(pool) => pool.install(run),
            Err(e) => {
                log::warn!("Failed to build export thread pool ({}), using the global pool", e);
                run()
            }
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn run_groups(
        &self,
        groups: &[(DateKey, Vec<usize>)],
        scenes: &[ProcessedScene],
        source: &dyn ArchiveSource,
    ) -> Vec<(usize, ExportResult)> {
        groups
            .iter()
            .flat_map(|(key, members)| self.export_group(key, members, scenes, source))
            .collect()
    }

    fn export_group(
        &self,
        key: &DateKey,
        members: &[usize],
        scenes: &[ProcessedScene],
        source: &dyn ArchiveSource,
    ) -> Vec<(usize, ExportResult)> {
        let mut results = Vec::with_capacity(members.len());
        let mut previous: Option<&str> = None;

        for &index in members {
            let scene = &scenes[index];
            let mut result = ExportResult::new(scene.id(), Some(key.clone()));

            if self.options.cancellation.is_cancelled() {
                results.push((index, result.failed(SarError::Cancelled(scene.id().to_string()))));
                continue;
            }

            if let Some(earlier) = previous {
                result.collided_with = Some(earlier.to_string());
                match self.options.collision_policy {
                    CollisionPolicy::Error => {
                        let error = SarError::DateKeyCollision {
                            date_key: key.to_string(),
                            previous: earlier.to_string(),
                        };
                        results.push((index, result.failed(error)));
                        continue;
                    }
                    CollisionPolicy::LastWriteWins => {
                        log::warn!("{} overwrites {} for date {}", scene.id(), earlier, key);
                    }
                }
            }

            let result = self.export_scene(scene, key, result, source);
            if !result.written.is_empty() {
                previous = Some(scene.id());
            }
            results.push((index, result));
        }
        results
    }

    fn export_scene(
        &self,
        scene: &ProcessedScene,
        key: &DateKey,
        mut result: ExportResult,
        source: &dyn ArchiveSource,
    ) -> ExportResult {
        log::debug!("Fetching archive for {}", scene.id());
        let fetched = source
            .fetch_archive(scene, &self.options.bands)
            .and_then(|archive| self.layout.extract(&archive));
        let mut contents = match fetched {
            Ok(contents) => contents,
            Err(e) => {
                result.band_failures = self
                    .options
                    .bands
                    .iter()
                    .map(|band| BandFailure::new(band, e.to_string()))
                    .collect();
                return result.failed(e);
            }
        };

        // All bands are staged before any destination is replaced
        let mut staged = Vec::with_capacity(self.options.bands.len());
        for band in &self.options.bands {
            if contents.duplicates.contains(band) {
                result
                    .band_failures
                    .push(BandFailure::new(band, "archive holds more than one entry for this band"));
                continue;
            }
            let Some(payload) = contents.bands.remove(band) else {
                result.band_failures.push(BandFailure::new(band, "band missing from archive"));
                continue;
            };
            match StagedFile::new(&self.options.band_path(key, band), &payload) {
                Ok(file) => staged.push((band, file)),
                Err(e) => result.band_failures.push(BandFailure::new(band, e.to_string())),
            }
        }
        if !result.band_failures.is_empty() {
            log::debug!("Discarding {} staged bands of {}", staged.len(), scene.id());
            return result;
        }

        for (band, file) in staged {
            match file.commit() {
                Ok(path) => {
                    log::debug!("Wrote {}", path.display());
                    result.written.insert(band.clone(), path);
                }
                Err(e) => result.band_failures.push(BandFailure::new(band, e.to_string())),
            }
        }

        result.success = result.band_failures.is_empty() && result.written.len() == self.options.bands.len();
        result
    }
}

/// Band payload held in a temporary file next to its destination
struct StagedFile {
    tmp: tempfile::NamedTempFile,
    path: PathBuf,
}

impl StagedFile {
    fn new(path: &Path, bytes: &[u8]) -> SarResult<Self> {
        if bytes.is_empty() {
            return Err(SarError::Archive("archive entry is empty".to_string()));
        }
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        Ok(Self { tmp, path: path.to_path_buf() })
    }

    /// Rename into place and check the destination is not empty
    fn commit(self) -> SarResult<PathBuf> {
        self.tmp.persist(&self.path).map_err(|e| SarError::Io(e.error))?;
        let written = std::fs::metadata(&self.path)?.len();
        if written == 0 {
            return Err(SarError::Archive(format!("{} is empty after writing", self.path.display())));
        }
        Ok(self.path)
    }
}

/// Write `bytes` to `path` through a temporary file in the same directory.
///
/// The destination either keeps its old content or receives the complete
/// new content. Empty payloads and empty results are rejected.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> SarResult<()> {
    StagedFile::new(path, bytes)?.commit().map(|_| ())
}
