//! Low-level parsing of raw 16-byte event records.
//!
//! Each record is four little-endian 32-bit signed integers:
//!
//! ```text
//! bytes [0..4)   x
//! bytes [4..8)   y
//! bytes [8..12)  polarity
//! bytes [12..16) timestamp
//! ```

use crate::types::Event;
use byteorder::{ByteOrder, LittleEndian};

/// Size of one encoded event in bytes.
pub const RECORD_SIZE: usize = 16;

const X_OFFSET: usize = 0;
const Y_OFFSET: usize = 4;
const POLARITY_OFFSET: usize = 8;
const TIME_OFFSET: usize = 12;

/// Extracts the X coordinate from a record.
#[inline]
pub fn record_get_x(record: &[u8]) -> i32 {
    LittleEndian::read_i32(&record[X_OFFSET..Y_OFFSET])
}

/// Extracts the Y coordinate from a record.
#[inline]
pub fn record_get_y(record: &[u8]) -> i32 {
    LittleEndian::read_i32(&record[Y_OFFSET..POLARITY_OFFSET])
}

/// Extracts the polarity from a record.
#[inline]
pub fn record_get_polarity(record: &[u8]) -> i32 {
    LittleEndian::read_i32(&record[POLARITY_OFFSET..TIME_OFFSET])
}

/// Extracts the timestamp from a record, widened to 64 bit.
#[inline]
pub fn record_get_time(record: &[u8]) -> i64 {
    LittleEndian::read_i32(&record[TIME_OFFSET..RECORD_SIZE]) as i64
}

/// Parses a full 16-byte record.
#[inline]
pub fn parse_record(record: &[u8]) -> Event {
    Event::new(
        record_get_x(record),
        record_get_y(record),
        record_get_polarity(record),
        record_get_time(record),
    )
}

/// Appends the wire encoding of `event` to `out`.
///
/// The timestamp is truncated to 32 bits, matching what the wire carries.
pub fn encode_record(event: &Event, out: &mut Vec<u8>) {
    let mut record = [0u8; RECORD_SIZE];
    LittleEndian::write_i32(&mut record[X_OFFSET..Y_OFFSET], event.x);
    LittleEndian::write_i32(&mut record[Y_OFFSET..POLARITY_OFFSET], event.y);
    LittleEndian::write_i32(&mut record[POLARITY_OFFSET..TIME_OFFSET], event.polarity);
    LittleEndian::write_i32(&mut record[TIME_OFFSET..RECORD_SIZE], event.t as i32);
    out.extend_from_slice(&record);
}

/// Encodes a sequence of events into a raw buffer.
pub fn encode_events<'a, I>(events: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut out = Vec::new();
    for event in events {
        encode_record(event, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_field_parsing() {
        // x=300, y=-2, polarity=1, t=0x01020304
        let record: [u8; 16] = [
            0x2C, 0x01, 0x00, 0x00, //
            0xFE, 0xFF, 0xFF, 0xFF, //
            0x01, 0x00, 0x00, 0x00, //
            0x04, 0x03, 0x02, 0x01,
        ];
        assert_eq!(record_get_x(&record), 300);
        assert_eq!(record_get_y(&record), -2);
        assert_eq!(record_get_polarity(&record), 1);
        assert_eq!(record_get_time(&record), 0x0102_0304);
    }

    #[test]
    fn test_negative_timestamp_widening() {
        let mut record = [0u8; 16];
        record[12..16].copy_from_slice(&(-5i32).to_le_bytes());
        assert_eq!(record_get_time(&record), -5i64);
    }

    #[test]
    fn test_encode_record_layout() {
        let mut out = Vec::new();
        encode_record(&Event::new(1, 2, 0, 3), &mut out);
        assert_eq!(out.len(), RECORD_SIZE);
        assert_eq!(&out[0..4], &1i32.to_le_bytes());
        assert_eq!(&out[4..8], &2i32.to_le_bytes());
        assert_eq!(&out[8..12], &0i32.to_le_bytes());
        assert_eq!(&out[12..16], &3i32.to_le_bytes());
        assert_eq!(parse_record(&out), Event::new(1, 2, 0, 3));
    }
}
