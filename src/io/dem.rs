use crate::core::terrain_flatten::ElevationModel;
use crate::types::{BoundingBox, SarResult};
use ndarray::Array2;

#[cfg(feature = "gdal")]
use crate::types::SarError;
#[cfg(feature = "gdal")]
use std::path::Path;

/// Mean earth radius used for degree to meter conversion
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// North-up affine transform of a geographic raster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub top_left_y: f64,
    /// Negative for north-up rasters
    pub pixel_height: f64,
}

impl GeoTransform {
    /// From the six GDAL coefficients; rotation terms must be zero
    pub fn from_coefficients(gt: [f64; 6]) -> Option<Self> {
        if gt[2] != 0.0 || gt[4] != 0.0 {
            return None;
        }
        Some(Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            top_left_y: gt[3],
            pixel_height: gt[5],
        })
    }

    /// Transform placing a `shape` grid exactly over `bounds`
    pub fn for_bounds(bounds: &BoundingBox, shape: (usize, usize)) -> Self {
        let (rows, cols) = shape;
        Self {
            top_left_x: bounds.min_lon,
            pixel_width: bounds.width() / cols.max(1) as f64,
            top_left_y: bounds.max_lat,
            pixel_height: -bounds.height() / rows.max(1) as f64,
        }
    }

    /// Area covered by a `shape` grid
    pub fn bounds(&self, shape: (usize, usize)) -> BoundingBox {
        let (rows, cols) = shape;
        let x1 = self.top_left_x + cols as f64 * self.pixel_width;
        let y1 = self.top_left_y + rows as f64 * self.pixel_height;
        BoundingBox {
            min_lon: self.top_left_x.min(x1),
            max_lon: self.top_left_x.max(x1),
            min_lat: self.top_left_y.min(y1),
            max_lat: self.top_left_y.max(y1),
        }
    }

    /// Pixel size in meters (x, y) at the grid's central latitude
    pub fn pixel_spacing_m(&self, shape: (usize, usize)) -> (f64, f64) {
        let center_lat = self.top_left_y + shape.0 as f64 * self.pixel_height / 2.0;
        let meters_per_degree = EARTH_RADIUS_M.to_radians();
        (
            (self.pixel_width * meters_per_degree * center_lat.to_radians().cos()).abs(),
            (self.pixel_height * meters_per_degree).abs(),
        )
    }
}

/// Resample a DEM onto a target grid with bilinear interpolation.
///
/// Target pixels are sampled at their centers. Pixels that fall outside the
/// source raster are NaN.
pub fn resample(
    dem: &Array2<f32>,
    source: &GeoTransform,
    target: &GeoTransform,
    target_shape: (usize, usize),
) -> Array2<f32> {
    let (source_height, source_width) = dem.dim();
    Array2::from_shape_fn(target_shape, |(i, j)| {
        let x = target.top_left_x + (j as f64 + 0.5) * target.pixel_width;
        let y = target.top_left_y + (i as f64 + 0.5) * target.pixel_height;

        // Continuous source coordinates relative to pixel centers
        let col = (x - source.top_left_x) / source.pixel_width - 0.5;
        let row = (y - source.top_left_y) / source.pixel_height - 0.5;

        if source_width == 0 || source_height == 0 {
            return f32::NAN;
        }
        let max_col = (source_width - 1) as f64;
        let max_row = (source_height - 1) as f64;
        if col < -0.5 || row < -0.5 || col > max_col + 0.5 || row > max_row + 0.5 {
            return f32::NAN;
        }
        let col = col.clamp(0.0, max_col);
        let row = row.clamp(0.0, max_row);

        let x1 = col.floor() as usize;
        let y1 = row.floor() as usize;
        let x2 = (x1 + 1).min(source_width - 1);
        let y2 = (y1 + 1).min(source_height - 1);
        let dx = col - x1 as f64;
        let dy = row - y1 as f64;

        let v11 = dem[[y1, x1]] as f64;
        let v12 = dem[[y2, x1]] as f64;
        let v21 = dem[[y1, x2]] as f64;
        let v22 = dem[[y2, x2]] as f64;

        (v11 * (1.0 - dx) * (1.0 - dy) + v21 * dx * (1.0 - dy) + v12 * (1.0 - dx) * dy + v22 * dx * dy)
            as f32
    })
}

/// Build an elevation model for a scene grid from an in-memory DEM raster
pub fn elevation_model_from_raster(
    reference: &str,
    dem: &Array2<f32>,
    transform: &GeoTransform,
    footprint: &BoundingBox,
    shape: (usize, usize),
) -> SarResult<ElevationModel> {
    let target = GeoTransform::for_bounds(footprint, shape);
    let heights = resample(dem, transform, &target, shape);
    Ok(ElevationModel {
        reference: reference.to_string(),
        bounds: transform.bounds(dem.dim()),
        pixel_spacing: target.pixel_spacing_m(shape),
        heights,
    })
}

/// Digital Elevation Model file reader
#[cfg(feature = "gdal")]
pub struct DemReader;

#[cfg(feature = "gdal")]
impl DemReader {
    /// Read the first band of a DEM file
    pub fn read<P: AsRef<Path>>(dem_path: P) -> SarResult<(Array2<f32>, GeoTransform)> {
        let dem_path = dem_path.as_ref();
        log::info!("Reading DEM from: {}", dem_path.display());

        let dataset = gdal::Dataset::open(dem_path)?;
        let coefficients = dataset.geo_transform()?;
        let transform = GeoTransform::from_coefficients(coefficients).ok_or_else(|| {
            SarError::Configuration(format!("DEM {} is not north-up", dem_path.display()))
        })?;
        let (width, height) = dataset.raster_size();
        log::debug!("DEM size: {}x{}, geotransform {:?}", width, height, coefficients);

        let rasterband = dataset.rasterband(1)?;
        let no_data = rasterband.no_data_value();
        let buffer = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
        let mut heights = Array2::from_shape_vec((height, width), buffer.data)
            .map_err(|e| SarError::Processing(format!("Failed to reshape DEM data: {}", e)))?;
        if let Some(no_data) = no_data {
            heights.mapv_inplace(|h| if (h as f64 - no_data).abs() < f64::EPSILON { f32::NAN } else { h });
        }
        Ok((heights, transform))
    }

    /// Read a DEM file and resample it onto the grid of a scene footprint
    pub fn elevation_model<P: AsRef<Path>>(
        dem_path: P,
        footprint: &BoundingBox,
        shape: (usize, usize),
    ) -> SarResult<ElevationModel> {
        let dem_path = dem_path.as_ref();
        let (heights, transform) = Self::read(dem_path)?;
        elevation_model_from_raster(&dem_path.display().to_string(), &heights, &transform, footprint, shape)
    }
}
