//! Output writers for events, histograms, predictions and detections.
//!
//! Binary dumps share one header layout: an 8-byte magic, a `u32` version and
//! three `u32` dimensions, followed by little-endian `f32` data.

use crate::error::{Error, Result};
use crate::types::{Detection, EventSet, HistogramTensor, RawPredictions};
use byteorder::{LittleEndian, WriteBytesExt};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Magic bytes opening a histogram dump.
pub const HISTOGRAM_MAGIC: &[u8; 8] = b"EVDHIST\0";
/// Magic bytes opening a prediction dump.
pub const PREDICTIONS_MAGIC: &[u8; 8] = b"EVDPRED\0";
/// Version written into every dump header.
pub const DUMP_VERSION: u32 = 1;

/// Field ordering for event CSV output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldOrder {
    /// x, y, p, t (default, matches the wire order)
    #[default]
    XYPT,
    /// t, x, y, p
    TXYP,
    /// x, y, t, p
    XYTP,
    /// Custom order specified by indices
    Custom([usize; 4]),
}

impl std::str::FromStr for FieldOrder {
    type Err = Error;

    /// Parses a field order from a format string like "x,y,p,t" or "t,x,y,p".
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<String> = s.split(',').map(|p| p.trim().to_lowercase()).collect();

        if parts.len() != 4 {
            return Err(Error::invalid_parameter(
                "format",
                "must have exactly 4 fields: x, y, p, t",
            ));
        }

        // x=0, y=1, p=2, t=3
        let mut indices = [0usize; 4];
        let mut used = [false; 4];

        for (i, part) in parts.iter().enumerate() {
            let field_idx = match part.as_str() {
                "x" => 0,
                "y" => 1,
                "p" | "pol" | "polarity" => 2,
                "t" | "time" | "timestamp" => 3,
                _ => {
                    return Err(Error::invalid_parameter(
                        "format",
                        format!("unknown field: {part}. Use x, y, p, t"),
                    ))
                }
            };

            if used[field_idx] {
                return Err(Error::invalid_parameter(
                    "format",
                    format!("duplicate field: {part}"),
                ));
            }

            indices[i] = field_idx;
            used[field_idx] = true;
        }

        Ok(match indices {
            [0, 1, 2, 3] => Self::XYPT,
            [3, 0, 1, 2] => Self::TXYP,
            [0, 1, 3, 2] => Self::XYTP,
            _ => Self::Custom(indices),
        })
    }
}

impl FieldOrder {
    fn indices(&self) -> [usize; 4] {
        match self {
            Self::XYPT => [0, 1, 2, 3],
            Self::TXYP => [3, 0, 1, 2],
            Self::XYTP => [0, 1, 3, 2],
            Self::Custom(indices) => *indices,
        }
    }

    /// Returns the CSV header line for this field order.
    pub fn header(&self) -> String {
        const NAMES: [&str; 4] = ["x", "y", "polarity", "timestamp"];
        self.indices().map(|i| NAMES[i]).join(",")
    }
}

/// CSV output writer for decoded events.
pub struct EventCsvWriter<W: Write> {
    writer: BufWriter<W>,
    field_order: FieldOrder,
}

impl<W: Write> EventCsvWriter<W> {
    pub fn new(writer: W, field_order: FieldOrder) -> Self {
        Self {
            writer: BufWriter::new(writer),
            field_order,
        }
    }

    /// Writes the column header.
    pub fn write_header(&mut self) -> Result<()> {
        writeln!(self.writer, "{}", self.field_order.header())?;
        Ok(())
    }

    /// Writes every event in time order.
    pub fn write_events(&mut self, events: &EventSet) -> Result<()> {
        let indices = self.field_order.indices();
        for event in events.iter() {
            let values = [
                event.x as i64,
                event.y as i64,
                event.polarity as i64,
                event.t,
            ];
            writeln!(
                self.writer,
                "{},{},{},{}",
                values[indices[0]], values[indices[1]], values[indices[2]], values[indices[3]]
            )?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes a dump header followed by `data`.
fn write_dump<W: Write>(
    writer: &mut W,
    magic: &[u8; 8],
    dims: [usize; 3],
    data: &[f32],
) -> Result<()> {
    writer.write_all(magic)?;
    writer.write_u32::<LittleEndian>(DUMP_VERSION)?;
    for dim in dims {
        let dim = u32::try_from(dim)
            .map_err(|_| Error::invalid_parameter("dimension", format!("{dim} exceeds u32")))?;
        writer.write_u32::<LittleEndian>(dim)?;
    }
    for &value in data {
        writer.write_f32::<LittleEndian>(value)?;
    }
    Ok(())
}

/// Writes a histogram as `EVDHIST` dump: channels, height, width, data.
pub fn write_histogram<W: Write>(writer: W, tensor: &HistogramTensor) -> Result<()> {
    let mut writer = BufWriter::new(writer);
    write_dump(&mut writer, HISTOGRAM_MAGIC, tensor.shape(), tensor.as_slice())?;
    writer.flush()?;
    Ok(())
}

/// Writes a histogram dump to a file.
pub fn write_histogram_file<P: AsRef<Path>>(path: P, tensor: &HistogramTensor) -> Result<()> {
    write_histogram(File::create(path)?, tensor)
}

/// Writes model output as `EVDPRED` dump: batch, anchors, row length, data.
pub fn write_predictions<W: Write>(writer: W, predictions: &RawPredictions) -> Result<()> {
    let mut writer = BufWriter::new(writer);
    write_dump(
        &mut writer,
        PREDICTIONS_MAGIC,
        predictions.shape(),
        predictions.as_slice(),
    )?;
    writer.flush()?;
    Ok(())
}

/// Writes a prediction dump to a file.
pub fn write_predictions_file<P: AsRef<Path>>(path: P, predictions: &RawPredictions) -> Result<()> {
    write_predictions(File::create(path)?, predictions)
}

/// CSV header used by [`write_detections_csv`].
pub const DETECTION_CSV_HEADER: &str = "batch,anchor,class_id,label,score,x1,y1,x2,y2";

/// Writes detections as CSV, one row per detection.
pub fn write_detections_csv<W: Write>(
    writer: W,
    detections: &[Option<Vec<Detection>>],
) -> Result<()> {
    let mut writer = BufWriter::new(writer);
    writeln!(writer, "{DETECTION_CSV_HEADER}")?;
    for (batch, item) in detections.iter().enumerate() {
        for det in item.iter().flatten() {
            writeln!(
                writer,
                "{},{},{},{},{},{},{},{},{}",
                batch,
                det.anchor,
                det.class_id,
                det.class_label,
                det.score,
                det.bbox.x1,
                det.bbox.y1,
                det.bbox.x2,
                det.bbox.y2
            )?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct BatchDetections<'a> {
    batch: usize,
    detections: Option<&'a [Detection]>,
}

/// Writes detections as a pretty-printed JSON array of batch items.
pub fn write_detections_json<W: Write>(
    writer: W,
    detections: &[Option<Vec<Detection>>],
) -> Result<()> {
    let items: Vec<BatchDetections<'_>> = detections
        .iter()
        .enumerate()
        .map(|(batch, item)| BatchDetections {
            batch,
            detections: item.as_deref(),
        })
        .collect();

    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, &items).map_err(std::io::Error::from)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}
