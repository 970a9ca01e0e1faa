use crate::core::units::linear_to_db;
use crate::types::{Edit, Polarization, ProcessedScene, ANGLE_BAND};
use ndarray::{Array2, Zip};

/// Parameters for GRD border noise masking
#[derive(Debug, Clone, Copy)]
pub struct BorderNoiseParams {
    /// Pixels of the reference band darker than this (dB) are treated as noise
    pub backscatter_threshold_db: f32,
    /// Valid incidence angle interval in degrees, both ends excluded
    pub min_angle: f32,
    pub max_angle: f32,
}

impl Default for BorderNoiseParams {
    fn default() -> Self {
        Self {
            backscatter_threshold_db: -25.0,
            min_angle: 30.63993,
            max_angle: 45.23993,
        }
    }
}

/// Masks the low-backscatter fringe along GRD swath edges
#[derive(Debug, Clone, Default)]
pub struct BorderNoiseCorrector {
    params: BorderNoiseParams,
}

impl BorderNoiseCorrector {
    pub fn new(params: BorderNoiseParams) -> Self {
        Self { params }
    }

    /// Boolean mask of pixels to blank, using VV (or the first other polarization band) as reference
    pub fn noise_mask(&self, scene: &ProcessedScene) -> Option<Array2<bool>> {
        let bands = scene.polarization_bands();
        let reference_band = bands
            .iter()
            .find(|b| b.as_str() == Polarization::VV.band_name())
            .or_else(|| bands.first())?;
        let reference = scene.bands.get(reference_band.as_str())?;
        let threshold = self.params.backscatter_threshold_db;

        let mut mask = reference.mapv(|x| {
            // Pixels that are already no-data stay no-data
            x.is_finite() && x > 0.0 && linear_to_db(x) < threshold
        });

        match scene.bands.get(ANGLE_BAND) {
            Some(angle) if angle.dim() == mask.dim() => {
                let (lo, hi) = (self.params.min_angle, self.params.max_angle);
                Zip::from(&mut mask).and(angle).for_each(|m, &a| {
                    if !(a > lo && a < hi) {
                        *m = true;
                    }
                });
            }
            Some(angle) => log::warn!(
                "Angle band of {} has shape {:?}, expected {:?}; angle criterion skipped",
                scene.id(),
                angle.dim(),
                mask.dim()
            ),
            None => log::debug!("{} has no angle band, using backscatter threshold only", scene.id()),
        }

        Some(mask)
    }

    /// Zero out masked pixels in every polarization band
    pub fn apply(&self, scene: &mut ProcessedScene) {
        if let Some(mask) = self.noise_mask(scene) {
            let masked = mask.iter().filter(|&&m| m).count();
            log::debug!("Border noise: {} of {} pixels masked in {}", masked, mask.len(), scene.id());

            for band in scene.polarization_bands() {
                if let Some(raster) = scene.bands.get_mut(&band) {
                    if raster.dim() != mask.dim() {
                        continue;
                    }
                    Zip::from(raster).and(&mask).for_each(|v, &m| {
                        if m {
                            *v = 0.0;
                        }
                    });
                }
            }
        }
        scene.edits.push(Edit::BorderNoiseCorrected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, OrbitPass, Scene};
    use std::collections::BTreeMap;

    fn scene(vv: Array2<f32>, angle: Option<Array2<f32>>) -> ProcessedScene {
        let mut names = vec!["VV".to_string(), "VH".to_string()];
        let mut bands = BTreeMap::new();
        bands.insert("VH".to_string(), vv.mapv(|v| v * 0.2));
        bands.insert("VV".to_string(), vv);
        if let Some(angle) = angle {
            names.push(ANGLE_BAND.to_string());
            bands.insert(ANGLE_BAND.to_string(), angle);
        }
        let scene = Scene::new(
            "S1A_IW_GRDH_1SDV_20210103T054117_20210103T054142_035967_0436A1_8B59",
            OrbitPass::Descending,
            BoundingBox::from_rectangle([0.0, 0.0, 1.0, 1.0]).unwrap(),
            names,
        )
        .unwrap();
        ProcessedScene::new(scene, bands)
    }

    #[test]
    fn test_dark_pixels_are_masked_in_all_bands() {
        let mut vv = Array2::from_elem((3, 3), 0.05f32);
        vv[[1, 1]] = 0.001; // -30 dB
        let mut s = scene(vv, None);

        BorderNoiseCorrector::default().apply(&mut s);

        assert_eq!(s.bands["VV"][[1, 1]], 0.0);
        assert_eq!(s.bands["VH"][[1, 1]], 0.0);
        assert_eq!(s.bands["VV"][[0, 0]], 0.05);
        assert_eq!(s.edits, vec![Edit::BorderNoiseCorrected]);
    }

    #[test]
    fn test_out_of_range_angles_are_masked() {
        let vv = Array2::from_elem((1, 4), 0.05f32);
        let angle = Array2::from_shape_vec((1, 4), vec![29.0, 35.0, 45.0, 46.0]).unwrap();
        let mut s = scene(vv, Some(angle));

        BorderNoiseCorrector::default().apply(&mut s);

        let out: Vec<f32> = s.bands["VV"].iter().copied().collect();
        assert_eq!(out, vec![0.0, 0.05, 0.05, 0.0]);
        // The angle band itself is left alone
        assert_eq!(s.bands[ANGLE_BAND][[0, 0]], 29.0);
    }
}
