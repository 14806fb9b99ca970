//! Raw event buffer decoding.
//!
//! Turns a byte buffer of fixed-size records into a time-sorted [`EventSet`].
//! Only the structure of the buffer is validated here; coordinate ranges are
//! the histogram encoder's concern.

use crate::error::{Error, Result};
use crate::output::{DUMP_VERSION, PREDICTIONS_MAGIC};
use crate::parser::{self, RECORD_SIZE};
use crate::types::{EventSet, RawPredictions};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

/// Stateless decoder for raw event buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventDecoder;

impl EventDecoder {
    /// Creates a new decoder.
    pub fn new() -> Self {
        Self
    }

    /// Decodes a raw buffer into a time-sorted event set.
    ///
    /// Fails with [`Error::MalformedInput`] when the buffer length is not a
    /// multiple of the record size.
    pub fn decode(&self, buffer: &[u8]) -> Result<EventSet> {
        if buffer.len() % RECORD_SIZE != 0 {
            return Err(Error::MalformedInput(format!(
                "buffer length {} is not a multiple of {}",
                buffer.len(),
                RECORD_SIZE
            )));
        }

        let count = buffer.len() / RECORD_SIZE;
        let mut x = Vec::with_capacity(count);
        let mut y = Vec::with_capacity(count);
        let mut polarity = Vec::with_capacity(count);
        let mut t = Vec::with_capacity(count);

        for record in buffer.chunks_exact(RECORD_SIZE) {
            x.push(parser::record_get_x(record));
            y.push(parser::record_get_y(record));
            polarity.push(parser::record_get_polarity(record));
            t.push(parser::record_get_time(record));
        }

        let events = EventSet::from_columns(x, y, polarity, t)?;
        debug!(
            events = events.len(),
            time_range = ?events.time_range(),
            "decoded event buffer"
        );
        Ok(events)
    }

    /// Reads a stream to its end and decodes it.
    pub fn decode_reader<R: Read>(&self, mut reader: R) -> Result<EventSet> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        self.decode(&buffer)
    }

    /// Decodes a raw event file from disk.
    pub fn decode_file<P: AsRef<Path>>(&self, path: P) -> Result<EventSet> {
        let file = File::open(path.as_ref())?;
        self.decode_reader(BufReader::new(file))
    }
}

/// Reads a prediction dump written by [`crate::output::write_predictions`].
pub fn read_predictions<R: Read>(mut reader: R) -> Result<RawPredictions> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != PREDICTIONS_MAGIC {
        return Err(Error::MalformedInput(
            "missing prediction dump magic".to_string(),
        ));
    }

    let version = reader.read_u32::<LittleEndian>()?;
    if version != DUMP_VERSION {
        return Err(Error::MalformedInput(format!(
            "unsupported prediction dump version {version}"
        )));
    }

    let batch = reader.read_u32::<LittleEndian>()? as usize;
    let anchors = reader.read_u32::<LittleEndian>()? as usize;
    let row_len = reader.read_u32::<LittleEndian>()? as usize;

    let count = RawPredictions::element_count(batch, anchors, row_len)?;
    let expected_bytes = count.checked_mul(4).ok_or_else(|| {
        Error::MalformedInput(format!(
            "prediction shape [{batch}, {anchors}, {row_len}] is too large"
        ))
    })?;

    // One byte past the declared payload is enough to detect trailing data
    let mut rest = Vec::new();
    reader
        .take((expected_bytes as u64).saturating_add(1))
        .read_to_end(&mut rest)?;
    if rest.len() != expected_bytes {
        return Err(Error::shape_mismatch(
            format!("{expected_bytes} payload bytes for shape [{batch}, {anchors}, {row_len}]"),
            rest.len(),
        ));
    }
    let mut data = vec![0.0f32; count];
    LittleEndian::read_f32_into(&rest, &mut data);

    RawPredictions::new(batch, anchors, row_len, data)
}

/// Reads a prediction dump from disk.
pub fn read_predictions_file<P: AsRef<Path>>(path: P) -> Result<RawPredictions> {
    let file = File::open(path.as_ref())?;
    read_predictions(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;

    #[test]
    fn test_decode_empty_buffer() {
        let events = EventDecoder::new().decode(&[]).unwrap();
        assert!(events.is_empty());
        assert_eq!(events.time_range(), None);
    }

    #[test]
    fn test_decode_rejects_partial_record() {
        let err = EventDecoder::new().decode(&[0u8; 15]).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));

        let err = EventDecoder::new().decode(&[0u8; 33]).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn test_decode_sorts_by_time() {
        let input = [
            Event::new(10, 1, 1, 300),
            Event::new(20, 2, 0, 100),
            Event::new(30, 3, 1, 200),
        ];
        let buffer = parser::encode_events(&input);

        let events = EventDecoder::new().decode(&buffer).unwrap();
        assert_eq!(events.t(), &[100, 200, 300]);
        assert_eq!(events.x(), &[20, 30, 10]);
        assert_eq!(events.y(), &[2, 3, 1]);
        assert_eq!(events.polarity(), &[0, 1, 1]);
    }

    #[test]
    fn test_decode_keeps_tie_order() {
        let input = [
            Event::new(0, 0, 0, 7),
            Event::new(1, 0, 0, 3),
            Event::new(2, 0, 1, 7),
            Event::new(3, 0, 1, 3),
            Event::new(4, 0, 0, 7),
        ];
        let buffer = parser::encode_events(&input);

        let events = EventDecoder::new().decode(&buffer).unwrap();
        assert_eq!(events.x(), &[1, 3, 0, 2, 4]);
    }

    #[test]
    fn test_decode_tolerates_off_sensor_coordinates() {
        let buffer = parser::encode_events(&[Event::new(-4, 100_000, 1, 0)]);
        let events = EventDecoder::new().decode(&buffer).unwrap();
        assert_eq!(events.get(0), Some(Event::new(-4, 100_000, 1, 0)));
    }

    fn prediction_header(batch: u32, anchors: u32, row_len: u32) -> Vec<u8> {
        use byteorder::WriteBytesExt;
        let mut bytes = PREDICTIONS_MAGIC.to_vec();
        for value in [DUMP_VERSION, batch, anchors, row_len] {
            bytes.write_u32::<LittleEndian>(value).unwrap();
        }
        bytes
    }

    #[test]
    fn test_read_predictions_rejects_oversized_shape() {
        let bytes = prediction_header(1 << 31, 1 << 30, 8);
        let err = read_predictions(&bytes[..]).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedInput(_) | Error::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn test_read_predictions_payload_length() {
        let mut bytes = prediction_header(1, 1, 6);
        bytes.extend([0u8; 6 * 4]);
        let predictions = read_predictions(&bytes[..]).unwrap();
        assert_eq!(predictions.shape(), [1, 1, 6]);
        assert_eq!(predictions.to_detections(1).unwrap()[0].len(), 1);

        // Trailing bytes and short payloads both disagree with the header
        bytes.push(0);
        assert!(matches!(
            read_predictions(&bytes[..]),
            Err(Error::ShapeMismatch { .. })
        ));
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            read_predictions(&bytes[..]),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_read_predictions_bad_magic() {
        let bytes = b"NOTAPRED\x01\x00\x00\x00".to_vec();
        let err = read_predictions(&bytes[..]).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }
}
