use crate::types::{Edit, ProcessedScene, SarError};

/// Value written for pixels whose linear intensity has no logarithm (x <= 0, NaN, inf)
pub const DB_NODATA: f32 = -9999.0;

/// Radiometric unit of the exported backscatter bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputUnit {
    Linear,
    Db,
}

impl std::str::FromStr for OutputUnit {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LINEAR" => Ok(OutputUnit::Linear),
            "DB" => Ok(OutputUnit::Db),
            _ => Err(SarError::Configuration(format!("Unknown output format: {}", s))),
        }
    }
}

impl std::fmt::Display for OutputUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputUnit::Linear => write!(f, "LINEAR"),
            OutputUnit::Db => write!(f, "DB"),
        }
    }
}

/// `10 * log10(x)` for finite positive `x`, [`DB_NODATA`] otherwise
#[inline]
pub fn linear_to_db(x: f32) -> f32 {
    if x.is_finite() && x > 0.0 {
        10.0 * x.log10()
    } else {
        DB_NODATA
    }
}

/// Inverse of [`linear_to_db`]; the no-data sentinel maps back to 0.0
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    if db == DB_NODATA || !db.is_finite() {
        0.0
    } else {
        10f32.powf(db / 10.0)
    }
}

/// Convert the backscatter bands of a scene to the requested unit.
///
/// Scenes arrive in linear intensity, so LINEAR leaves values untouched.
/// Angle and mask bands are never converted.
pub fn convert_scene(scene: &mut ProcessedScene, unit: OutputUnit) {
    if unit == OutputUnit::Db {
        for band in scene.polarization_bands() {
            if let Some(raster) = scene.bands.get_mut(&band) {
                raster.mapv_inplace(linear_to_db);
            }
        }
    }
    scene.edits.push(Edit::UnitConverted(unit));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, OrbitPass, Scene, ANGLE_BAND};
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use std::collections::BTreeMap;

    #[test]
    fn test_db_round_trip() {
        for v in [1e-6f32, 0.003, 0.1, 1.0, 2.5, 1234.5] {
            assert_relative_eq!(db_to_linear(linear_to_db(v)), v, max_relative = 1e-5);
        }
        assert_relative_eq!(linear_to_db(0.1), -10.0, epsilon = 1e-5);
    }

    #[test]
    fn test_non_positive_maps_to_sentinel() {
        for v in [0.0f32, -0.0, -1.0, f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let db = linear_to_db(v);
            assert_eq!(db, DB_NODATA);
            assert!(db.is_finite());
        }
        assert_eq!(db_to_linear(DB_NODATA), 0.0);
    }

    #[test]
    fn test_convert_scene_leaves_angle_band() {
        let scene = Scene::new(
            "S1A_IW_GRDH_1SDV_20210103T054117_20210103T054142_035967_0436A1_8B59",
            OrbitPass::Ascending,
            BoundingBox::from_rectangle([0.0, 0.0, 1.0, 1.0]).unwrap(),
            vec!["VV".into(), ANGLE_BAND.into()],
        )
        .unwrap();
        let mut bands = BTreeMap::new();
        bands.insert("VV".to_string(), Array2::from_elem((2, 2), 0.01f32));
        bands.insert(ANGLE_BAND.to_string(), Array2::from_elem((2, 2), 38.0f32));
        let mut processed = ProcessedScene::new(scene, bands);

        convert_scene(&mut processed, OutputUnit::Db);

        assert!(processed.bands["VV"].iter().all(|v| (v + 20.0).abs() < 1e-4));
        assert!(processed.bands[ANGLE_BAND].iter().all(|v| *v == 38.0));
        assert_eq!(processed.edits, vec![Edit::UnitConverted(OutputUnit::Db)]);
    }
}
