//! Python bindings for evdet with numpy support.
//!
//! Exposes event decoding, stacked histogram construction and detection
//! postprocessing. Decoded columns and histograms are returned as numpy
//! arrays, detections as plain dictionaries.

use evdet_core::{
    ClassTable, Error, EventDecoder, EventSet, Postprocessor, RawDetection, StackedHistogram,
};
use numpy::{IntoPyArray, PyArray1, PyArray3};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};

fn to_py_err(err: Error) -> PyErr {
    match err {
        Error::Io(e) => PyIOError::new_err(e.to_string()),
        other => PyValueError::new_err(other.to_string()),
    }
}

/// Time-sorted events in columnar format.
///
/// Each column is an independent numpy array; ordering is ascending
/// timestamp with ties kept in input order.
#[pyclass]
pub struct Events {
    inner: EventSet,
}

#[pymethods]
impl Events {
    /// Returns the number of events.
    fn __len__(&self) -> usize {
        self.inner.len()
    }

    fn __repr__(&self) -> String {
        match self.inner.time_range() {
            Some((t_min, t_max)) => format!(
                "Events(count={}, t=[{}, {}])",
                self.inner.len(),
                t_min,
                t_max
            ),
            None => "Events(count=0)".to_string(),
        }
    }

    /// Returns the X coordinates as a numpy array.
    #[getter]
    fn x<'py>(&self, py: Python<'py>) -> &'py PyArray1<i32> {
        self.inner.x().to_vec().into_pyarray(py)
    }

    /// Returns the Y coordinates as a numpy array.
    #[getter]
    fn y<'py>(&self, py: Python<'py>) -> &'py PyArray1<i32> {
        self.inner.y().to_vec().into_pyarray(py)
    }

    /// Returns the polarities as a numpy array.
    #[getter]
    fn p<'py>(&self, py: Python<'py>) -> &'py PyArray1<i32> {
        self.inner.polarity().to_vec().into_pyarray(py)
    }

    /// Returns the timestamps as a numpy array.
    #[getter]
    fn t<'py>(&self, py: Python<'py>) -> &'py PyArray1<i64> {
        self.inner.t().to_vec().into_pyarray(py)
    }

    /// Returns all columns as a dictionary.
    fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<PyObject> {
        let dict = PyDict::new(py);
        dict.set_item("x", self.x(py))?;
        dict.set_item("y", self.y(py))?;
        dict.set_item("p", self.p(py))?;
        dict.set_item("t", self.t(py))?;
        Ok(dict.into())
    }
}

/// Decodes a raw event buffer.
///
/// Args:
///     data: bytes holding 16-byte records of little-endian int32 x, y, p, t
///
/// Returns:
///     Events: time-sorted columns
///
/// Raises:
///     ValueError: if the buffer length is not a multiple of 16
#[pyfunction]
fn decode_bytes(py: Python<'_>, data: &[u8]) -> PyResult<Py<Events>> {
    let inner = EventDecoder::new().decode(data).map_err(to_py_err)?;
    Py::new(py, Events { inner })
}

/// Decodes a raw event file from disk.
#[pyfunction]
fn decode_file(py: Python<'_>, path: &str) -> PyResult<Py<Events>> {
    let inner = EventDecoder::new().decode_file(path).map_err(to_py_err)?;
    Py::new(py, Events { inner })
}

/// Builds a stacked histogram from a raw event buffer.
///
/// Returns:
///     numpy.ndarray: float32 counts shaped (2 * bins, height, width)
#[pyfunction]
#[pyo3(signature = (data, bins=10, height=720, width=1280, count_cutoff=None))]
fn construct_histogram<'py>(
    py: Python<'py>,
    data: &[u8],
    bins: usize,
    height: usize,
    width: usize,
    count_cutoff: Option<u32>,
) -> PyResult<&'py PyArray3<f32>> {
    let mut histogram = StackedHistogram::new(bins, height, width).map_err(to_py_err)?;
    if let Some(cutoff) = count_cutoff {
        histogram = histogram.with_count_cutoff(cutoff).map_err(to_py_err)?;
    }
    let events = EventDecoder::new().decode(data).map_err(to_py_err)?;
    let tensor = histogram.construct(&events);
    let shape = tensor.shape();
    tensor.into_vec().into_pyarray(py).reshape(shape)
}

/// Filters and suppresses raw predictions.
///
/// Args:
///     predictions: nested lists shaped [batch][anchors][5 + num_classes]
///     num_classes: class scores per row
///     conf_thre: minimum objectness x class score
///     nms_thre: IoU above which lower-scoring boxes are suppressed
///     classes: optional list of labels, defaults to the built-in table
///
/// Returns:
///     list: per batch item, None or a list of detection dicts
#[pyfunction]
#[pyo3(signature = (predictions, num_classes=3, conf_thre=0.1, nms_thre=0.45, classes=None, class_agnostic=false))]
fn postprocess(
    py: Python<'_>,
    predictions: Vec<Vec<Vec<f32>>>,
    num_classes: usize,
    conf_thre: f32,
    nms_thre: f32,
    classes: Option<Vec<String>>,
    class_agnostic: bool,
) -> PyResult<PyObject> {
    let raw = predictions
        .iter()
        .map(|item| {
            item.iter()
                .map(|row| RawDetection::from_row(row, num_classes))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(to_py_err)?;

    let table = classes.map(ClassTable::new).unwrap_or_default();
    let detections = Postprocessor::new(table)
        .class_agnostic(class_agnostic)
        .postprocess(&raw, num_classes, conf_thre, nms_thre)
        .map_err(to_py_err)?;

    let out = PyList::empty(py);
    for item in detections {
        match item {
            None => out.append(py.None())?,
            Some(dets) => {
                let list = PyList::empty(py);
                for det in dets {
                    let dict = PyDict::new(py);
                    dict.set_item("box", (det.bbox.x1, det.bbox.y1, det.bbox.x2, det.bbox.y2))?;
                    dict.set_item("score", det.score)?;
                    dict.set_item("objectness", det.objectness)?;
                    dict.set_item("class_confidence", det.class_confidence)?;
                    dict.set_item("class_id", det.class_id)?;
                    dict.set_item("class_label", det.class_label)?;
                    dict.set_item("anchor", det.anchor)?;
                    list.append(dict)?;
                }
                out.append(list)?;
            }
        }
    }
    Ok(out.into())
}

/// evdet module for Python.
#[pymodule]
fn _evdet(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(decode_bytes, m)?)?;
    m.add_function(wrap_pyfunction!(decode_file, m)?)?;
    m.add_function(wrap_pyfunction!(construct_histogram, m)?)?;
    m.add_function(wrap_pyfunction!(postprocess, m)?)?;
    m.add_class::<Events>()?;
    Ok(())
}
