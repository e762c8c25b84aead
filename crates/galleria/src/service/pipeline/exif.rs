//! EXIF metadata extraction for image uploads.
//!
//! Extraction is strictly best-effort: any parse failure yields `None` and
//! the upload proceeds without metadata.

use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{Exif, In, Reader, Tag, Value};
use serde::Serialize;

use super::GpsCoordinates;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsCoordinates>,
}

impl ImageMetadata {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Extracts EXIF metadata from an image payload, if any is present.
#[must_use]
pub fn extract(bytes: &[u8]) -> Option<ImageMetadata> {
    let exif = match jpeg_exif_payload(bytes) {
        Some(payload) => parse_payload(payload),
        None => Reader::new()
            .read_from_container(&mut std::io::Cursor::new(bytes))
            .ok(),
    }?;

    let metadata = ImageMetadata {
        camera_make: ascii_field(&exif, Tag::Make),
        camera_model: ascii_field(&exif, Tag::Model),
        taken_at: taken_at(&exif),
        orientation: short_field(&exif, Tag::Orientation),
        gps: gps(&exif),
    };
    (!metadata.is_empty()).then_some(metadata)
}

/// Parses a raw APP1 payload. Some producers prefix the TIFF structure
/// with the `Exif\0\0` marker and some don't, so the stripped variant is
/// tried first and the raw bytes second.
fn parse_payload(payload: &[u8]) -> Option<Exif> {
    let reader = Reader::new();
    let stripped = payload.strip_prefix(b"Exif\x00\x00").unwrap_or(payload);
    reader
        .read_raw(stripped.to_vec())
        .or_else(|_| reader.read_raw(payload.to_vec()))
        .ok()
}

/// Locates the EXIF APP1 segment in a JPEG stream.
fn jpeg_exif_payload(bytes: &[u8]) -> Option<&[u8]> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut i = 2;
    while i + 4 <= bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        // Start of scan, no more metadata segments follow.
        if marker == 0xDA {
            return None;
        }
        let length = usize::from(u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]));
        let end = i + 2 + length;
        if length < 2 || end > bytes.len() {
            return None;
        }
        let payload = &bytes[i + 4..end];
        if marker == 0xE1 && payload.starts_with(b"Exif\x00\x00") {
            return Some(payload);
        }
        i = end;
    }
    None
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Ascii(values) = &field.value {
        let text = String::from_utf8_lossy(values.first()?).trim().to_string();
        (!text.is_empty()).then_some(text)
    } else {
        None
    }
}

fn short_field(exif: &Exif, tag: Tag) -> Option<u16> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Short(values) = &field.value {
        values.first().copied()
    } else {
        None
    }
}

/// EXIF timestamps carry no zone; they are recorded as UTC.
fn taken_at(exif: &Exif) -> Option<DateTime<Utc>> {
    let raw = ascii_field(exif, Tag::DateTimeOriginal)
        .or_else(|| ascii_field(exif, Tag::DateTime))?;
    let naive = NaiveDateTime::parse_from_str(&raw, "%Y:%m:%d %H:%M:%S").ok()?;
    Some(naive.and_utc())
}

fn gps(exif: &Exif) -> Option<GpsCoordinates> {
    let latitude = gps_axis(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S")?;
    let longitude = gps_axis(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W")?;
    Some(GpsCoordinates {
        latitude,
        longitude,
    })
}

/// Converts one degrees/minutes/seconds triple to a signed decimal value;
/// `negative_ref` is the hemisphere letter that flips the sign.
fn gps_axis(exif: &Exif, value_tag: Tag, ref_tag: Tag, negative_ref: &str) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    let reference = ascii_field(exif, ref_tag)?;
    dms_to_decimal(parts, reference.eq_ignore_ascii_case(negative_ref))
}

fn dms_to_decimal(parts: &[exif::Rational], negative: bool) -> Option<f64> {
    if parts.len() < 3 {
        return None;
    }
    let decimal =
        parts[0].to_f64() + parts[1].to_f64() / 60.0 + parts[2].to_f64() / 3600.0;
    Some(if negative { -decimal } else { decimal })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal TIFF-structured EXIF block: little-endian header plus one
    /// IFD carrying an Orientation entry with value 6.
    fn raw_exif_orientation_6() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"II\x2a\x00");
        buf.extend_from_slice(&8u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&0x0112u16.to_le_bytes());
        buf.extend_from_slice(&3u16.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&6u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf
    }

    fn jpeg_with_app1(payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0xFF, 0xD8];
        buf.extend_from_slice(&[0xFF, 0xE1]);
        let length = u16::try_from(payload.len() + 2).unwrap();
        buf.extend_from_slice(&length.to_be_bytes());
        buf.extend_from_slice(payload);
        // Start of scan terminates the segment walk.
        buf.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02]);
        buf
    }

    #[test]
    fn finds_app1_payload_in_jpeg() {
        let mut payload = b"Exif\x00\x00".to_vec();
        payload.extend_from_slice(&raw_exif_orientation_6());
        let jpeg = jpeg_with_app1(&payload);
        assert_eq!(jpeg_exif_payload(&jpeg), Some(payload.as_slice()));
    }

    #[test]
    fn extracts_orientation_from_prefixed_payload() {
        let mut payload = b"Exif\x00\x00".to_vec();
        payload.extend_from_slice(&raw_exif_orientation_6());
        let jpeg = jpeg_with_app1(&payload);
        let metadata = extract(&jpeg).unwrap();
        assert_eq!(metadata.orientation, Some(6));
    }

    #[test]
    fn unprefixed_payload_falls_back_to_second_parse() {
        assert!(parse_payload(&raw_exif_orientation_6()).is_some());
    }

    #[test]
    fn garbage_yields_none() {
        assert_eq!(extract(b"not an image at all"), None);
        assert_eq!(extract(&[]), None);
    }

    #[test]
    fn dms_conversion_negates_southern_latitudes() {
        // 52 deg 31' 12"
        let parts = [
            exif::Rational { num: 52, denom: 1 },
            exif::Rational { num: 31, denom: 1 },
            exif::Rational { num: 12, denom: 1 },
        ];
        assert!((dms_to_decimal(&parts, true).unwrap() + 52.52).abs() < 1e-9);
        assert!((dms_to_decimal(&parts, false).unwrap() - 52.52).abs() < 1e-9);
        assert_eq!(dms_to_decimal(&parts[..2], false), None);
    }

    #[test]
    fn exif_timestamp_parses_colon_format() {
        let naive =
            NaiveDateTime::parse_from_str("2024:06:01 14:30:05", "%Y:%m:%d %H:%M:%S").unwrap();
        assert_eq!(naive.and_utc().to_rfc3339(), "2024-06-01T14:30:05+00:00");
    }
}
