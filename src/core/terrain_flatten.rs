use crate::types::{
    BoundingBox, Edit, OrbitPass, ProcessedScene, SarError, SarRealImage, SarResult, ANGLE_BAND,
    LAYOVER_SHADOW_BAND,
};
use ndarray::{Array2, Zip};
use std::f32::consts::FRAC_PI_2;

/// Scattering model used to normalize backscatter for terrain slope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerrainModel {
    /// Surface scattering (cosine ratio of flat vs local incidence)
    Direct,
    /// Volume scattering (projected area ratio)
    Volume,
}

impl std::str::FromStr for TerrainModel {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DIRECT" => Ok(TerrainModel::Direct),
            "VOLUME" => Ok(TerrainModel::Volume),
            _ => Err(SarError::Configuration(format!("Unknown terrain flattening model: {}", s))),
        }
    }
}

impl std::fmt::Display for TerrainModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerrainModel::Direct => write!(f, "DIRECT"),
            TerrainModel::Volume => write!(f, "VOLUME"),
        }
    }
}

/// Elevation raster resampled onto a scene grid
#[derive(Debug, Clone)]
pub struct ElevationModel {
    /// Identifier of the source DEM (asset id or file path)
    pub reference: String,
    pub bounds: BoundingBox,
    /// Pixel spacing in meters (x, y)
    pub pixel_spacing: (f64, f64),
    pub heights: Array2<f32>,
}

/// Parameters for terrain flattening computation
#[derive(Debug, Clone)]
pub struct TerrainFlatteningParams {
    pub model: TerrainModel,
    /// Extra buffer around layover/shadow pixels in meters
    pub layover_shadow_buffer: f64,
    /// Satellite track heading in degrees, used when the angle band has no gradient
    pub ascending_heading: f32,
    pub descending_heading: f32,
}

impl Default for TerrainFlatteningParams {
    fn default() -> Self {
        Self {
            model: TerrainModel::Volume,
            layover_shadow_buffer: 0.0,
            ascending_heading: 348.0,   // Sentinel-1 near-polar orbit
            descending_heading: 192.0,
        }
    }
}

/// Terrain flattening processor
pub struct TerrainFlattener {
    params: TerrainFlatteningParams,
}

impl TerrainFlattener {
    /// Create a new terrain flattening processor
    pub fn new(params: TerrainFlatteningParams) -> Self {
        Self { params }
    }

    /// Create a terrain flattening processor with the given model and buffer
    pub fn standard(model: TerrainModel, layover_shadow_buffer: f64) -> Self {
        Self::new(TerrainFlatteningParams {
            model,
            layover_shadow_buffer,
            ..TerrainFlatteningParams::default()
        })
    }

    pub fn params(&self) -> &TerrainFlatteningParams {
        &self.params
    }

    /// Compute slope and aspect from DEM
    ///
    /// Returns (slope_radians, aspect_radians). Rows run north to south and
    /// columns west to east; aspect is the downslope direction clockwise from
    /// north.
    pub fn compute_slope_aspect(
        &self,
        dem: &Array2<f32>,
        pixel_spacing: (f64, f64),
    ) -> SarResult<(Array2<f32>, Array2<f32>)> {
        let (rows, cols) = dem.dim();
        let mut slope = Array2::<f32>::zeros((rows, cols));
        let mut aspect = Array2::<f32>::zeros((rows, cols));

        if rows < 3 || cols < 3 {
            log::warn!("DEM of {}x{} is too small for gradients, assuming flat terrain", rows, cols);
            return Ok((slope, aspect));
        }

        let dx_scale = pixel_spacing.0 as f32;
        let dy_scale = pixel_spacing.1 as f32;
        if dx_scale <= 0.0 || dy_scale <= 0.0 {
            return Err(SarError::Processing(format!(
                "DEM pixel spacing must be positive, got {:?}",
                pixel_spacing
            )));
        }

        for i in 1..rows - 1 {
            for j in 1..cols - 1 {
                // Calculate gradients using central differences
                let dz_dx = (dem[[i, j + 1]] - dem[[i, j - 1]]) / (2.0 * dx_scale);
                let dz_drow = (dem[[i + 1, j]] - dem[[i - 1, j]]) / (2.0 * dy_scale);

                slope[[i, j]] = (dz_dx * dz_dx + dz_drow * dz_drow).sqrt().atan();

                // Downslope vector: east = -dz/dx, north = +dz/drow
                let mut a = (-dz_dx).atan2(dz_drow);
                if a < 0.0 {
                    a += 2.0 * std::f32::consts::PI;
                }
                aspect[[i, j]] = a;
            }
        }

        // Handle edges by copying nearest valid values
        self.fill_edges(&mut slope);
        self.fill_edges(&mut aspect);

        Ok((slope, aspect))
    }

    /// Azimuth (radians, clockwise from north) pointing from the ground toward the sensor.
    ///
    /// Incidence angle grows with range, so the direction in which the angle
    /// band decreases points back at the sensor. Falls back to the nominal
    /// track heading of the orbit pass when the band carries no gradient.
    pub fn sensor_azimuth(&self, angle: &Array2<f32>, orbit_pass: OrbitPass) -> f32 {
        let (rows, cols) = angle.dim();
        let mut d_col = 0.0f64;
        let mut d_row = 0.0f64;
        let mut n = 0usize;

        for i in 0..rows.saturating_sub(1) {
            for j in 0..cols.saturating_sub(1) {
                let a = angle[[i, j]];
                let right = angle[[i, j + 1]];
                let below = angle[[i + 1, j]];
                if a.is_finite() && right.is_finite() && below.is_finite() {
                    d_col += (right - a) as f64;
                    d_row += (below - a) as f64;
                    n += 1;
                }
            }
        }

        if n > 0 {
            let (d_col, d_row) = (d_col / n as f64, d_row / n as f64);
            if d_col.hypot(d_row) > 1e-9 {
                // Toward decreasing angle: east = -d_col, north = +d_row
                let az = (-d_col).atan2(d_row) as f32;
                return az.rem_euclid(2.0 * std::f32::consts::PI);
            }
        }

        let heading = match orbit_pass {
            OrbitPass::Ascending => self.params.ascending_heading,
            OrbitPass::Descending => self.params.descending_heading,
        };
        // Right-looking sensor: ground-to-sensor direction is heading - 90
        (heading - 90.0).rem_euclid(360.0).to_radians()
    }

    /// Slope correction factor for one pixel (angles in radians)
    pub fn correction_factor(&self, theta_i: f32, alpha_r: f32, alpha_az: f32) -> f32 {
        let elevation = FRAC_PI_2 - theta_i;
        match self.params.model {
            TerrainModel::Direct => elevation.cos() / (alpha_az.cos() * (elevation + alpha_r).cos()),
            TerrainModel::Volume => (elevation + alpha_r).tan() / elevation.tan(),
        }
    }

    /// Check that the elevation model covers the scene on the same grid
    pub fn check_coverage(&self, scene: &ProcessedScene, dem: &ElevationModel) -> SarResult<()> {
        let mismatch = |reason: String| SarError::ElevationModelMismatch {
            scene: scene.id().to_string(),
            dem: dem.reference.clone(),
            reason,
        };

        if !dem.bounds.contains(&scene.scene.footprint) {
            return Err(mismatch(format!(
                "DEM bounds {:?} do not contain footprint {:?}",
                dem.bounds, scene.scene.footprint
            )));
        }
        if let Some(shape) = scene.shape() {
            if dem.heights.dim() != shape {
                return Err(mismatch(format!(
                    "DEM grid {:?} differs from scene grid {:?}",
                    dem.heights.dim(),
                    shape
                )));
            }
        }
        Ok(())
    }

    /// Apply terrain flattening to every polarization band of the scene.
    ///
    /// Layover and shadow pixels (plus the configured buffer) are set to 0.0
    /// in the backscatter bands and flagged with 1.0 in the
    /// `layover_shadow` band.
    pub fn flatten(&self, scene: &mut ProcessedScene, dem: &ElevationModel) -> SarResult<()> {
        log::debug!(
            "Terrain flattening {} with {} model against {}",
            scene.id(),
            self.params.model,
            dem.reference
        );

        self.check_coverage(scene, dem)?;

        let angle = scene.band(ANGLE_BAND).cloned().ok_or_else(|| {
            SarError::Processing(format!("Scene {} has no {} band", scene.id(), ANGLE_BAND))
        })?;

        let (slope, aspect) = self.compute_slope_aspect(&dem.heights, dem.pixel_spacing)?;
        let phi_i = self.sensor_azimuth(&angle, scene.scene.orbit_pass);

        // Per-pixel correction factor, NaN where layover/shadow
        let mut scf = Array2::<f32>::zeros(angle.dim());
        let compute = |s: &mut f32, &theta_deg: &f32, &alpha_s: &f32, &phi_s: &f32| {
            let theta_i = theta_deg.to_radians();
            let phi_r = phi_i - phi_s;
            let alpha_r = (alpha_s.tan() * phi_r.cos()).atan();
            let alpha_az = (alpha_s.tan() * phi_r.sin()).atan();

            let layover = is_layover(theta_i, alpha_r);
            let shadow = is_shadow(theta_i, alpha_r);
            let factor = self.correction_factor(theta_i, alpha_r, alpha_az);

            *s = if !theta_i.is_finite() || layover || shadow || !factor.is_finite() || factor <= 0.0 {
                f32::NAN
            } else {
                factor
            };
        };

        #[cfg(feature = "parallel")]
        Zip::from(&mut scf).and(&angle).and(&slope).and(&aspect).par_for_each(compute);
        #[cfg(not(feature = "parallel"))]
        Zip::from(&mut scf).and(&angle).and(&slope).and(&aspect).for_each(compute);

        let flagged = scf.mapv(|v| v.is_nan());
        let radius = self.buffer_radius(dem.pixel_spacing);
        let mask = if radius > 0 { dilate(&flagged, radius) } else { flagged };

        let flagged_count = mask.iter().filter(|&&m| m).count();
        if flagged_count > 0 {
            log::debug!("{}: {} layover/shadow pixels flagged", scene.id(), flagged_count);
        }

        for band in scene.polarization_bands() {
            let sigma0 = &scene.bands[&band];
            let gamma0 = Zip::from(sigma0)
                .and(&angle)
                .and(&scf)
                .and(&mask)
                .map_collect(|&s0, &theta_deg, &f, &m| {
                    if m {
                        0.0
                    } else if !(s0.is_finite() && s0 > 0.0) {
                        s0
                    } else {
                        s0 / theta_deg.to_radians().cos() / f
                    }
                });
            scene.bands.insert(band, gamma0);
        }

        let mask_band: SarRealImage = mask.mapv(|m| if m { 1.0 } else { 0.0 });
        scene.bands.insert(LAYOVER_SHADOW_BAND.to_string(), mask_band);
        scene.edits.push(Edit::TerrainFlattened { model: self.params.model });
        Ok(())
    }

    /// Buffer distance converted to whole pixels
    fn buffer_radius(&self, pixel_spacing: (f64, f64)) -> usize {
        let buffer = self.params.layover_shadow_buffer;
        let spacing = pixel_spacing.0.min(pixel_spacing.1);
        if buffer <= 0.0 || spacing <= 0.0 {
            return 0;
        }
        (buffer / spacing).ceil() as usize
    }

    /// Helper function to fill edge pixels
    fn fill_edges(&self, array: &mut Array2<f32>) {
        let (rows, cols) = array.dim();

        // Fill top and bottom edges
        for j in 0..cols {
            array[[0, j]] = array[[1, j]];
            array[[rows - 1, j]] = array[[rows - 2, j]];
        }

        // Fill left and right edges
        for i in 0..rows {
            array[[i, 0]] = array[[i, 1]];
            array[[i, cols - 1]] = array[[i, cols - 2]];
        }
    }
}

/// Grow a boolean mask by `radius` pixels (Euclidean disc)
fn dilate(mask: &Array2<bool>, radius: usize) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    let r = radius as isize;
    let r2 = (radius * radius) as isize;
    let mut out = mask.clone();

    for ((i, j), &set) in mask.indexed_iter() {
        if !set {
            continue;
        }
        for di in -r..=r {
            for dj in -r..=r {
                if di * di + dj * dj > r2 {
                    continue;
                }
                let (ii, jj) = (i as isize + di, j as isize + dj);
                if ii >= 0 && jj >= 0 && (ii as usize) < rows && (jj as usize) < cols {
                    out[[ii as usize, jj as usize]] = true;
                }
            }
        }
    }
    out
}

/// Range slope facing the sensor steeper than the incidence angle
fn is_layover(theta_i: f32, alpha_r: f32) -> bool {
    alpha_r > theta_i
}

/// Range slope facing away steeper than the grazing angle
fn is_shadow(theta_i: f32, alpha_r: f32) -> bool {
    alpha_r < -(FRAC_PI_2 - theta_i)
}
