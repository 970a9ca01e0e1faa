//! Result archives: zip files holding one single-band GeoTIFF per band.
//!
//! Entries are named `<prefix>.<band>.tif`; the band is recovered from the
//! second-to-last `.` segment of the entry name, so `download.VV.tif` and
//! `VV.tif` both map to `VV`.

use crate::types::{SarError, SarRealImage, SarResult};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::time::Duration;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

/// Band entries found in one archive
#[derive(Debug, Default)]
pub struct ArchiveContents {
    /// Entry payload per declared band
    pub bands: BTreeMap<String, Vec<u8>>,
    /// Declared bands with more than one matching entry; none of their payloads are kept
    pub duplicates: Vec<String>,
    /// Entries whose band token is not declared
    pub ignored: Vec<String>,
}

/// Naming convention of band entries inside a result archive
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    prefix: String,
    bands: Vec<String>,
}

impl ArchiveLayout {
    pub fn new(prefix: impl Into<String>, bands: Vec<String>) -> Self {
        Self { prefix: prefix.into(), bands }
    }

    /// Layout of archives produced by the processing backend
    pub fn download(bands: Vec<String>) -> Self {
        Self::new("download", bands)
    }

    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    pub fn entry_name(&self, band: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}.tif", band)
        } else {
            format!("{}.{}.tif", self.prefix, band)
        }
    }

    /// Band token of an entry: the second-to-last `.` segment of its file name
    pub fn band_token(entry_name: &str) -> Option<&str> {
        let file_name = entry_name.rsplit('/').next().unwrap_or(entry_name);
        let mut segments = file_name.rsplit('.');
        segments.next()?;
        segments.next().filter(|s| !s.is_empty())
    }

    /// Split an archive into its declared band entries
    pub fn extract(&self, bytes: &[u8]) -> SarResult<ArchiveContents> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| SarError::Archive(format!("Failed to open result archive: {}", e)))?;

        let mut contents = ArchiveContents::default();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let band = match Self::band_token(&name) {
                Some(token) if self.bands.iter().any(|b| b == token) => token.to_string(),
                _ => {
                    log::debug!("Ignoring archive entry {}", name);
                    contents.ignored.push(name);
                    continue;
                }
            };

            if contents.duplicates.contains(&band) {
                continue;
            }
            if contents.bands.remove(&band).is_some() {
                log::warn!("Archive holds more than one entry for band {}", band);
                contents.duplicates.push(band);
                continue;
            }

            let mut payload = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut payload)?;
            contents.bands.insert(band, payload);
        }
        Ok(contents)
    }

    /// Build an archive from named band rasters
    pub fn pack<'a, I>(&self, bands: I) -> SarResult<Vec<u8>>
    where
        I: IntoIterator<Item = (&'a str, &'a SarRealImage)>,
    {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for (band, raster) in bands {
            let encoded = encode_band(raster)?;
            writer.start_file(self.entry_name(band), options)?;
            writer.write_all(&encoded)?;
        }
        Ok(writer.finish()?.into_inner())
    }
}

/// Encode a raster as a single-band 32-bit float TIFF
pub fn encode_band(raster: &SarRealImage) -> SarResult<Vec<u8>> {
    let (rows, cols) = raster.dim();
    let data: Vec<f32> = raster.iter().copied().collect();

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut encoder = tiff::encoder::TiffEncoder::new(&mut buffer)?;
        encoder.write_image::<tiff::encoder::colortype::Gray32Float>(cols as u32, rows as u32, &data)?;
    }
    Ok(buffer.into_inner())
}

/// Decode a single-band 32-bit float TIFF written by [`encode_band`]
pub fn decode_band(bytes: &[u8]) -> SarResult<SarRealImage> {
    let mut decoder = tiff::decoder::Decoder::new(Cursor::new(bytes))?;
    let (width, height) = decoder.dimensions()?;
    match decoder.read_image()? {
        tiff::decoder::DecodingResult::F32(data) => {
            Array2::from_shape_vec((height as usize, width as usize), data)
                .map_err(|e| SarError::Archive(format!("TIFF raster has inconsistent size: {}", e)))
        }
        _ => Err(SarError::Archive("Band raster is not 32-bit float".to_string())),
    }
}

/// Fetches result archives over HTTP from a URL template containing `{id}`
pub struct HttpArchiveSource {
    client: reqwest::blocking::Client,
    url_template: String,
}

impl HttpArchiveSource {
    pub fn new(url_template: impl Into<String>) -> SarResult<Self> {
        let url_template = url_template.into();
        if !url_template.contains("{id}") {
            return Err(SarError::Configuration(format!(
                "Archive URL template '{}' has no {{id}} placeholder",
                url_template
            )));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .user_agent(concat!("sardine-ard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SarError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, url_template })
    }

    pub fn url_for(&self, scene_id: &str) -> String {
        self.url_template.replace("{id}", scene_id)
    }

    /// Download the archive of one scene
    pub fn download(&self, scene_id: &str) -> SarResult<Vec<u8>> {
        let url = self.url_for(scene_id);
        log::debug!("Requesting archive {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| SarError::Http(format!("Request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(SarError::Http(format!(
                "HTTP {} {}: {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or(""),
                url
            )));
        }

        let content = response
            .bytes()
            .map_err(|e| SarError::Http(format!("Failed to read response body: {}", e)))?;
        log::debug!("Downloaded {} bytes for {}", content.len(), scene_id);
        Ok(content.to_vec())
    }
}
