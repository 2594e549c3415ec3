//! Wire codec for the handset sensor stream.
//!
//! The handset sends ASCII records over TCP. A record is a `<...>` header
//! span, then 17 comma-separated decimal fields, then the literal `<EOF>`
//! terminator. One record may arrive split across several reads, so the
//! decoder buffers bytes until the terminator shows up.
//!
//! Field order on the wire: device timestamp, orientation quaternion
//! (x, y, z, w), angular rate (x, y, z), acceleration (x, y, z),
//! gravity (x, y, z), magnetic field (x, y, z).

use nalgebra::{Quaternion, Vector3};
use thiserror::Error;

/// Number of comma-separated fields in one record.
pub const FIELD_COUNT: usize = 17;

/// Terminator marking a complete record.
pub const EOF_MARKER: &str = "<EOF>";

/// One fully decoded, not-yet-smoothed sensor record.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSample {
    /// Capture timestamp reported by the handset. Carried but not consumed.
    pub device_time: f64,
    /// Raw orientation quaternion as sent (not normalized yet).
    pub orientation: Quaternion<f64>,
    pub angular_rate: Vector3<f64>,
    pub acceleration: Vector3<f64>,
    pub gravity: Vector3<f64>,
    pub magnetic: Vector3<f64>,
}

impl RawSample {
    /// The handset sends the identity quaternion until its gyro has produced
    /// a first reading. Such samples carry acceleration but no orientation.
    pub fn has_orientation(&self) -> bool {
        self.orientation != Quaternion::identity()
    }

    pub fn accel_magnitude(&self) -> f64 {
        self.acceleration.norm()
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record is missing its payload delimiters")]
    MissingDelimiter,
    #[error("expected {FIELD_COUNT} fields, got {0}")]
    FieldCount(usize),
    #[error("field {index} is not a number: {text:?}")]
    BadNumber { index: usize, text: String },
}

/// Streaming record assembler.
///
/// Feed raw TCP bytes via [`push_bytes`](FrameDecoder::push_bytes). `None`
/// means no complete record yet; `Some(Err(..))` is a malformed record that
/// was consumed and should be dropped by the caller. Either way the buffer
/// is cleared once the terminator has been seen, so a bad record never
/// poisons the ones that follow.
#[derive(Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, data: &[u8]) -> Option<Result<RawSample, DecodeError>> {
        self.buffer.push_str(&String::from_utf8_lossy(data));
        if !self.buffer.contains(EOF_MARKER) {
            return None;
        }
        let record = std::mem::take(&mut self.buffer);
        Some(parse_record(&record))
    }

    /// Bytes buffered while waiting for the terminator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Decode one complete record. The payload is the text between the first
/// `>` and the `<` that follows it.
pub fn parse_record(record: &str) -> Result<RawSample, DecodeError> {
    let after_header = record
        .split('>')
        .nth(1)
        .ok_or(DecodeError::MissingDelimiter)?;
    let payload = after_header.split('<').next().unwrap_or("");

    let fields: Vec<&str> = payload.split(',').collect();
    if fields.len() != FIELD_COUNT {
        return Err(DecodeError::FieldCount(fields.len()));
    }

    let mut values = [0.0f64; FIELD_COUNT];
    for (index, text) in fields.iter().enumerate() {
        values[index] = text.trim().parse().map_err(|_| DecodeError::BadNumber {
            index,
            text: (*text).to_string(),
        })?;
    }

    Ok(RawSample {
        device_time: values[0],
        // Wire order is x, y, z, w; nalgebra's constructor takes w first.
        orientation: Quaternion::new(values[4], values[1], values[2], values[3]),
        angular_rate: Vector3::new(values[5], values[6], values[7]),
        acceleration: Vector3::new(values[8], values[9], values[10]),
        gravity: Vector3::new(values[11], values[12], values[13]),
        magnetic: Vector3::new(values[14], values[15], values[16]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(fields: &[f64]) -> String {
        let payload = fields
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!("<DATA>{payload}<EOF>")
    }

    fn seventeen() -> Vec<f64> {
        (0..FIELD_COUNT).map(|i| i as f64 * 0.5).collect()
    }

    #[test]
    fn test_field_order() {
        let fields = seventeen();
        let sample = parse_record(&make_record(&fields)).unwrap();

        assert_eq!(sample.device_time, 0.0);
        assert_eq!(sample.orientation.coords.x, 0.5); // qx
        assert_eq!(sample.orientation.coords.y, 1.0); // qy
        assert_eq!(sample.orientation.coords.z, 1.5); // qz
        assert_eq!(sample.orientation.coords.w, 2.0); // qw
        assert_eq!(sample.angular_rate, Vector3::new(2.5, 3.0, 3.5));
        assert_eq!(sample.acceleration, Vector3::new(4.0, 4.5, 5.0));
        assert_eq!(sample.gravity, Vector3::new(5.5, 6.0, 6.5));
        assert_eq!(sample.magnetic, Vector3::new(7.0, 7.5, 8.0));
    }

    #[test]
    fn test_wrong_field_count() {
        let short: Vec<f64> = (0..16).map(|i| i as f64).collect();
        let long: Vec<f64> = (0..18).map(|i| i as f64).collect();

        assert!(matches!(
            parse_record(&make_record(&short)),
            Err(DecodeError::FieldCount(16))
        ));
        assert!(matches!(
            parse_record(&make_record(&long)),
            Err(DecodeError::FieldCount(18))
        ));
    }

    #[test]
    fn test_non_numeric_field() {
        let mut record = make_record(&seventeen());
        record = record.replace("4.5", "oops");
        assert!(matches!(
            parse_record(&record),
            Err(DecodeError::BadNumber { .. })
        ));
    }

    #[test]
    fn test_missing_header() {
        assert!(matches!(
            parse_record("1,2,3<EOF>"),
            Err(DecodeError::MissingDelimiter)
        ));
    }

    #[test]
    fn test_fragmented_record() {
        let record = make_record(&seventeen());
        let (a, rest) = record.split_at(7);
        let (b, c) = rest.split_at(rest.len() / 2);

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_bytes(a.as_bytes()).is_none());
        assert!(decoder.push_bytes(b.as_bytes()).is_none());
        let sample = decoder.push_bytes(c.as_bytes()).unwrap().unwrap();
        assert_eq!(sample.acceleration, Vector3::new(4.0, 4.5, 5.0));
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_buffer_cleared_after_bad_record() {
        let mut decoder = FrameDecoder::new();
        let bad: Vec<f64> = (0..5).map(|i| i as f64).collect();
        assert!(decoder
            .push_bytes(make_record(&bad).as_bytes())
            .unwrap()
            .is_err());
        assert_eq!(decoder.pending_len(), 0);

        // The next well-formed record still decodes.
        let sample = decoder
            .push_bytes(make_record(&seventeen()).as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(sample.device_time, 0.0);
    }

    #[test]
    fn test_identity_sentinel() {
        let mut fields = vec![0.0; FIELD_COUNT];
        fields[4] = 1.0; // qw = 1, qx = qy = qz = 0
        let sample = parse_record(&make_record(&fields)).unwrap();
        assert!(!sample.has_orientation());

        let mut fields = vec![0.0; FIELD_COUNT];
        fields[1] = 1.0; // a real rotation
        let sample = parse_record(&make_record(&fields)).unwrap();
        assert!(sample.has_orientation());
    }

    #[test]
    fn test_accel_magnitude() {
        let mut fields = vec![0.0; FIELD_COUNT];
        fields[8] = 3.0;
        fields[9] = 4.0;
        let sample = parse_record(&make_record(&fields)).unwrap();
        assert_eq!(sample.accel_magnitude(), 5.0);
    }
}
