//! Python bindings

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::config::{ParameterSet, RawParameters};
use crate::core::multitemporal;
use crate::core::pipeline::Pipeline;
use crate::core::units;
use crate::io::export::DateKey;
use crate::types::SarError;

fn to_py_err(e: SarError) -> PyErr {
    match e {
        SarError::Configuration(_) | SarError::InvalidSceneId(_) | SarError::InvalidKernelSize(_) => {
            PyErr::new::<PyValueError, _>(e.to_string())
        }
        _ => PyErr::new::<PyRuntimeError, _>(e.to_string()),
    }
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyParameterSet>()?;
    m.add_function(wrap_pyfunction!(date_key, m)?)?;
    m.add_function(wrap_pyfunction!(select_neighbors, m)?)?;
    m.add_function(wrap_pyfunction!(to_db, m)?)?;
    m.add_function(wrap_pyfunction!(from_db, m)?)?;
    m.add("DB_NODATA", units::DB_NODATA)?;
    Ok(())
}

/// Python wrapper for ParameterSet
#[pyclass(name = "ParameterSet")]
struct PyParameterSet {
    inner: ParameterSet,
}

#[pymethods]
impl PyParameterSet {
    /// Validate a JSON parameter document, or the defaults when none is given
    #[new]
    #[pyo3(signature = (json=None))]
    fn new(json: Option<&str>) -> PyResult<Self> {
        let inner = match json {
            Some(json) => ParameterSet::from_json_str(json),
            None => RawParameters::default().validate(),
        }
        .map_err(to_py_err)?;
        Ok(PyParameterSet { inner })
    }

    #[staticmethod]
    fn from_file(path: String) -> PyResult<Self> {
        let inner = ParameterSet::from_file(&path).map_err(to_py_err)?;
        Ok(PyParameterSet { inner })
    }

    fn to_json(&self) -> PyResult<String> {
        serde_json::to_string_pretty(&self.inner.to_raw())
            .map_err(|e| PyErr::new::<PyRuntimeError, _>(e.to_string()))
    }

    /// Stage names a run with these parameters goes through
    fn stages(&self) -> Vec<String> {
        Pipeline::new(self.inner.clone())
            .plan()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[getter]
    fn polarization(&self) -> String {
        format!("{:?}", self.inner.polarization())
    }

    #[getter]
    fn speckle_filter(&self) -> String {
        self.inner.speckle_filter().to_string()
    }

    #[getter]
    fn framework(&self) -> String {
        self.inner.framework().to_string()
    }

    #[getter]
    fn kernel_size(&self) -> usize {
        self.inner.kernel_size().get()
    }

    #[getter]
    fn neighbor_count(&self) -> usize {
        self.inner.neighbor_count()
    }

    #[getter]
    fn terrain_model(&self) -> String {
        self.inner.terrain_model().to_string()
    }

    #[getter]
    fn output_format(&self) -> String {
        self.inner.output_unit().to_string()
    }

    #[getter]
    fn region(&self) -> (f64, f64, f64, f64) {
        let bbox = self.inner.region();
        (bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat)
    }

    fn __repr__(&self) -> String {
        format!(
            "ParameterSet(polarization={:?}, filter='{}', framework='{}', kernel={}, format='{}')",
            self.inner.polarization(),
            self.inner.speckle_filter(),
            self.inner.framework(),
            self.inner.kernel_size(),
            self.inner.output_unit()
        )
    }
}

/// `YYYY-MM-DD` export key of a scene identifier
#[pyfunction]
fn date_key(scene_id: &str) -> PyResult<String> {
    DateKey::from_scene_id(scene_id)
        .map(|k| k.to_string())
        .map_err(to_py_err)
}

/// Neighbor indices used by the multi-temporal filter
#[pyfunction]
fn select_neighbors(target: usize, len: usize, count: usize) -> Vec<usize> {
    multitemporal::select_neighbors(target, len, count)
}

#[pyfunction]
fn to_db(value: f32) -> f32 {
    units::linear_to_db(value)
}

#[pyfunction]
fn from_db(value: f32) -> f32 {
    units::db_to_linear(value)
}
