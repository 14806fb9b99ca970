//! Core data types flowing through the pipeline.
//!
//! Events enter as [`EventSet`] columns, are binned into a [`HistogramTensor`],
//! and leave the model as [`RawPredictions`] that the postprocessor turns into
//! labeled [`Detection`]s.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// A single decoded sensor event.
///
/// Coordinates are kept signed: the decoder does not validate them against
/// the sensor geometry, the histogram encoder drops anything off-sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// X coordinate of the pixel
    pub x: i32,
    /// Y coordinate of the pixel
    pub y: i32,
    /// Event polarity: 0 = OFF (decrease), 1 = ON (increase in brightness)
    pub polarity: i32,
    /// Timestamp, widened from the 32-bit wire value
    pub t: i64,
}

impl Event {
    /// Creates a new event.
    #[inline]
    pub fn new(x: i32, y: i32, polarity: i32, t: i64) -> Self {
        Self { x, y, polarity, t }
    }
}

/// Time-ordered events stored as four parallel columns.
///
/// The columns are always sorted by ascending timestamp; events sharing a
/// timestamp keep the relative order they had in the input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSet {
    x: Vec<i32>,
    y: Vec<i32>,
    polarity: Vec<i32>,
    t: Vec<i64>,
}

impl EventSet {
    /// Builds an event set from unsorted columns, applying a stable
    /// timestamp sort to all four columns jointly.
    pub fn from_columns(
        x: Vec<i32>,
        y: Vec<i32>,
        polarity: Vec<i32>,
        t: Vec<i64>,
    ) -> Result<Self> {
        let len = t.len();
        if x.len() != len || y.len() != len || polarity.len() != len {
            return Err(Error::shape_mismatch(
                format!("{len} entries in every column"),
                format!(
                    "x={}, y={}, polarity={}, t={}",
                    x.len(),
                    y.len(),
                    polarity.len(),
                    len
                ),
            ));
        }
        Ok(Self::sorted(x, y, polarity, t))
    }

    fn sorted(x: Vec<i32>, y: Vec<i32>, polarity: Vec<i32>, t: Vec<i64>) -> Self {
        if t.windows(2).all(|w| w[0] <= w[1]) {
            return Self { x, y, polarity, t };
        }

        // `sort_by_key` is stable, ties keep their input order
        let mut order: Vec<usize> = (0..t.len()).collect();
        order.sort_by_key(|&i| t[i]);

        Self {
            x: order.iter().map(|&i| x[i]).collect(),
            y: order.iter().map(|&i| y[i]).collect(),
            polarity: order.iter().map(|&i| polarity[i]).collect(),
            t: order.iter().map(|&i| t[i]).collect(),
        }
    }

    /// Builds a sorted event set from individual events.
    pub fn from_events<I: IntoIterator<Item = Event>>(events: I) -> Self {
        let iter = events.into_iter();
        let (lower, _) = iter.size_hint();
        let mut x = Vec::with_capacity(lower);
        let mut y = Vec::with_capacity(lower);
        let mut polarity = Vec::with_capacity(lower);
        let mut t = Vec::with_capacity(lower);

        for event in iter {
            x.push(event.x);
            y.push(event.y);
            polarity.push(event.polarity);
            t.push(event.t);
        }

        Self::sorted(x, y, polarity, t)
    }

    /// Returns the number of events.
    #[inline]
    pub fn len(&self) -> usize {
        self.t.len()
    }

    /// Returns true if the set holds no events.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn x(&self) -> &[i32] {
        &self.x
    }

    pub fn y(&self) -> &[i32] {
        &self.y
    }

    pub fn polarity(&self) -> &[i32] {
        &self.polarity
    }

    pub fn t(&self) -> &[i64] {
        &self.t
    }

    /// Returns the event at `index`, if any.
    pub fn get(&self, index: usize) -> Option<Event> {
        (index < self.len()).then(|| {
            Event::new(
                self.x[index],
                self.y[index],
                self.polarity[index],
                self.t[index],
            )
        })
    }

    /// Returns `(t_min, t_max)`, or `None` for an empty set.
    pub fn time_range(&self) -> Option<(i64, i64)> {
        Some((*self.t.first()?, *self.t.last()?))
    }

    /// Iterates over the events in time order.
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        (0..self.len())
            .map(move |i| Event::new(self.x[i], self.y[i], self.polarity[i], self.t[i]))
    }
}

/// Dense `[channels, height, width]` tensor of `f32` event counts.
///
/// Layout is row-major: `data[(c * height + y) * width + x]`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramTensor {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl HistogramTensor {
    /// Creates a zero-filled tensor.
    ///
    /// Callers guarantee the cell count fits in `usize`.
    pub fn zeros(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
            data: vec![0.0; channels * height * width],
        }
    }

    /// Wraps existing data, checking it matches the declared shape.
    pub fn from_vec(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        let expected = channels
            .checked_mul(height)
            .and_then(|n| n.checked_mul(width))
            .ok_or_else(|| {
                Error::invalid_parameter(
                    "shape",
                    format!("[{channels}, {height}, {width}] is too large"),
                )
            })?;
        if data.len() != expected {
            return Err(Error::shape_mismatch(
                format!("{expected} values for shape [{channels}, {height}, {width}]"),
                data.len(),
            ));
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    /// Returns `[channels, height, width]`.
    #[inline]
    pub fn shape(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    #[inline]
    fn offset(&self, channel: usize, y: usize, x: usize) -> usize {
        (channel * self.height + y) * self.width + x
    }

    /// Returns the count at `(channel, y, x)`, or `None` out of range.
    pub fn get(&self, channel: usize, y: usize, x: usize) -> Option<f32> {
        if channel >= self.channels || y >= self.height || x >= self.width {
            return None;
        }
        Some(self.data[self.offset(channel, y, x)])
    }

    /// Returns one channel as a row-major `height * width` slice.
    pub fn channel(&self, channel: usize) -> Option<&[f32]> {
        let plane = self.height * self.width;
        let start = channel.checked_mul(plane)?;
        self.data.get(start..start + plane)
    }

    /// Increments a cell by one. Callers guarantee the index is in range.
    #[inline]
    pub(crate) fn increment(&mut self, channel: usize, y: usize, x: usize) {
        let idx = self.offset(channel, y, x);
        self.data[idx] += 1.0;
    }

    /// Clamps every cell to at most `max`.
    pub(crate) fn clamp_max(&mut self, max: f32) {
        for value in &mut self.data {
            *value = value.min(max);
        }
    }

    /// Adds `other` element-wise into `self`.
    pub fn add(&mut self, other: &HistogramTensor) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(Error::shape_mismatch(
                format!("{:?}", self.shape()),
                format!("{:?}", other.shape()),
            ));
        }
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
        Ok(())
    }

    /// Sum of all cells.
    pub fn total(&self) -> f64 {
        self.data.iter().map(|&v| v as f64).sum()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// Axis-aligned box in corner form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Converts a `(cx, cy, w, h)` box into corner form.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    /// Area of the box; inverted boxes have zero area.
    #[inline]
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection-over-union with `other`.
    ///
    /// Zero-area boxes overlap nothing, so the result is 0 rather than NaN.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let area_a = self.area();
        let area_b = other.area();
        if area_a <= 0.0 || area_b <= 0.0 {
            return 0.0;
        }

        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);

        let union = area_a + area_b - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// One row of model output: center-form box, objectness and class scores.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// Box as `(cx, cy, w, h)`
    pub center_box: [f32; 4],
    pub objectness: f32,
    pub class_scores: Vec<f32>,
}

impl RawDetection {
    pub fn new(center_box: [f32; 4], objectness: f32, class_scores: Vec<f32>) -> Self {
        Self {
            center_box,
            objectness,
            class_scores,
        }
    }

    /// Parses a `[cx, cy, w, h, objectness, scores...]` row.
    pub fn from_row(row: &[f32], num_classes: usize) -> Result<Self> {
        let expected = PREDICTION_PREFIX + num_classes;
        if row.len() != expected {
            return Err(Error::shape_mismatch(
                format!("row of {expected} values (5 + {num_classes} classes)"),
                row.len(),
            ));
        }
        Ok(Self {
            center_box: [row[0], row[1], row[2], row[3]],
            objectness: row[4],
            class_scores: row[PREDICTION_PREFIX..].to_vec(),
        })
    }
}

/// Number of leading values in a prediction row before the class scores.
pub const PREDICTION_PREFIX: usize = 5;

/// Dense `[batch, anchors, row_len]` model output.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPredictions {
    batch: usize,
    anchors: usize,
    row_len: usize,
    data: Vec<f32>,
}

impl RawPredictions {
    /// Wraps a flat buffer, checking it matches the declared shape.
    pub fn new(batch: usize, anchors: usize, row_len: usize, data: Vec<f32>) -> Result<Self> {
        let expected = Self::element_count(batch, anchors, row_len)?;
        if data.len() != expected {
            return Err(Error::shape_mismatch(
                format!("{expected} values for shape [{batch}, {anchors}, {row_len}]"),
                data.len(),
            ));
        }
        Ok(Self {
            batch,
            anchors,
            row_len,
            data,
        })
    }

    /// Number of values a `[batch, anchors, row_len]` buffer holds.
    ///
    /// Fails with [`Error::MalformedInput`] when the product overflows.
    pub fn element_count(batch: usize, anchors: usize, row_len: usize) -> Result<usize> {
        batch
            .checked_mul(anchors)
            .and_then(|n| n.checked_mul(row_len))
            .ok_or_else(|| {
                Error::MalformedInput(format!(
                    "prediction shape [{batch}, {anchors}, {row_len}] is too large"
                ))
            })
    }

    /// Returns `[batch, anchors, row_len]`.
    pub fn shape(&self) -> [usize; 3] {
        [self.batch, self.anchors, self.row_len]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Splits the buffer into per-item detection rows.
    ///
    /// Fails with a shape mismatch when `row_len != 5 + num_classes`.
    pub fn to_detections(&self, num_classes: usize) -> Result<Vec<Vec<RawDetection>>> {
        if self.row_len != PREDICTION_PREFIX + num_classes {
            return Err(Error::shape_mismatch(
                format!("row length {}", PREDICTION_PREFIX + num_classes),
                self.row_len,
            ));
        }
        let item_len = self.anchors * self.row_len;
        (0..self.batch)
            .map(|b| {
                let item = &self.data[b * item_len..(b + 1) * item_len];
                item.chunks_exact(self.row_len)
                    .map(|row| RawDetection::from_row(row, num_classes))
                    .collect()
            })
            .collect()
    }
}

/// A filtered, labeled detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Objectness times the best class score
    pub score: f32,
    pub objectness: f32,
    /// The best class score on its own
    pub class_confidence: f32,
    pub class_id: usize,
    pub class_label: String,
    /// Index of the originating row in the model output
    pub anchor: usize,
}

/// Label returned for class ids missing from a [`ClassTable`].
pub const UNKNOWN_LABEL: &str = "unknown";

/// Read-only mapping from class id to label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTable {
    labels: BTreeMap<usize, String>,
}

impl ClassTable {
    /// Builds a table where label `i` maps to class id `i`.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .enumerate()
                .map(|(i, label)| (i, label.into()))
                .collect(),
        }
    }

    /// Returns the label for `class_id`, or `"unknown"`.
    pub fn label(&self, class_id: usize) -> &str {
        self.labels
            .get(&class_id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::new(["pedestrian", "vehicle", "micromobility"])
    }
}
