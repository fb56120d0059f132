//! Decoders for the positioning payloads carried in SDS messages.
//!
//! All offsets below are byte offsets into the payload; the payload itself is
//! a hex string as echoed by the terminal. Fields that are missing or not valid
//! hex are left as `None` on the produced fix.

use std::fmt;

use crate::hex;

/// Fixed-point scale of 32-bit latitude/longitude fields.
pub const DEGREE_SCALE: f64 = 1_000_000.0;
/// Divisor of the 24-bit compact latitude/longitude fields.
pub const COMPACT_SCALE: f64 = 131_072.0;
/// Payload prefix of a compact position report.
pub const COMPACT_PREFIX: &str = "0A";
/// Exact length in hex characters of a compact position report.
pub const COMPACT_HEX_LEN: usize = 22;
/// Payload prefixes of route-reporting (LRRP) position reports.
pub const ROUTE_PREFIXES: [&str; 2] = ["01", "81"];

/// Which payload layout a fix was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Standard,
    Long,
    Compact,
    RouteReport,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "LIP"),
            Self::Long => write!(f, "Long LIP"),
            Self::Compact => write!(f, "Compact LIP"),
            Self::RouteReport => write!(f, "LRRP"),
        }
    }
}

/// Calibration applied to compact reports after scaling.
///
/// Both offsets are subtracted from the scaled value. They depend on the
/// deployment's reference point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactCalibration {
    pub lat_offset: f64,
    pub lon_offset: f64,
}

impl Default for CompactCalibration {
    fn default() -> Self {
        Self {
            lat_offset: 1.554_624,
            lon_offset: 43.044_569,
        }
    }
}

/// A position decoded from one SDS payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFix {
    /// ISSI of the reporting terminal.
    pub source: String,
    pub encoding: Encoding,
    /// Latitude in decimal degrees (negative = South).
    pub latitude: f64,
    /// Longitude in decimal degrees. `None` when the report was cut short.
    pub longitude: Option<f64>,
    /// Speed in km/h.
    pub speed: Option<f64>,
    /// Heading in degrees.
    pub heading: Option<u16>,
    /// Horizontal accuracy in metres.
    pub accuracy: Option<u8>,
    /// Altitude in metres.
    pub altitude: Option<u16>,
}

impl PositionFix {
    fn new(source: &str, encoding: Encoding, latitude: f64) -> Self {
        Self {
            source: source.to_string(),
            encoding,
            latitude,
            longitude: None,
            speed: None,
            heading: None,
            accuracy: None,
            altitude: None,
        }
    }

    /// Returns `true` if both coordinates are present.
    pub fn is_complete(&self) -> bool {
        self.longitude.is_some()
    }
}

impl fmt::Display for PositionFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {:.6}", self.encoding, self.source, self.latitude)?;
        match self.longitude {
            Some(lon) => write!(f, ", {lon:.6}")?,
            None => write!(f, ", longitude missing")?,
        }
        if let Some(speed) = self.speed {
            write!(f, " {speed:.1} km/h")?;
        }
        if let Some(heading) = self.heading {
            write!(f, " {heading}°")?;
        }
        if let Some(accuracy) = self.accuracy {
            write!(f, " ±{accuracy} m")?;
        }
        if let Some(altitude) = self.altitude {
            write!(f, " {altitude} m")?;
        }
        Ok(())
    }
}

/// Read a 32-bit little-endian degree field spanning bytes `start..start + 4`.
fn degrees_at(hex: &str, start: usize) -> Option<f64> {
    let field = hex::byte_field(hex, start, start + 4)?;
    hex::parse_le_i32(field).map(|raw| raw as f64 / DEGREE_SCALE)
}

/// Decode a standard LIP report.
///
/// Layout: bytes 5–8 latitude, 9–12 longitude, 13–14 speed (tenths of km/h,
/// byte-swapped), 15–16 heading (byte-swapped), 17 accuracy. Every field after
/// the latitude is optional. Returns `None` only if the latitude is unreadable.
pub fn decode_standard(hex: &str, source: &str) -> Option<PositionFix> {
    let latitude = degrees_at(hex, 5)?;
    let mut fix = PositionFix::new(source, Encoding::Standard, latitude);

    fix.longitude = degrees_at(hex, 9);
    fix.speed = hex::byte_field(hex, 13, 15)
        .and_then(hex::parse_swapped_u16)
        .map(|tenths| tenths as f64 / 10.0);
    fix.heading = hex::byte_field(hex, 15, 17).and_then(hex::parse_swapped_u16);
    fix.accuracy = hex::byte_field(hex, 17, 18).and_then(hex::parse_u8);

    Some(fix)
}

/// Minimum payload length in bytes for the long layout.
const LONG_MIN_BYTES: usize = 20;

/// Decode a long LIP report: the standard coordinates plus a byte-swapped
/// altitude in metres at bytes 13–14.
pub fn decode_long(hex: &str, source: &str) -> Option<PositionFix> {
    if hex.len() < LONG_MIN_BYTES * 2 {
        return None;
    }
    let latitude = degrees_at(hex, 5)?;
    let mut fix = PositionFix::new(source, Encoding::Long, latitude);
    fix.longitude = degrees_at(hex, 9);
    fix.altitude = hex::byte_field(hex, 13, 15).and_then(hex::parse_swapped_u16);
    Some(fix)
}

/// Decode a compact LIP report (exactly 11 bytes).
///
/// Bytes 2–4 and 5–7 hold signed 24-bit latitude and longitude, scaled by
/// [`COMPACT_SCALE`] and shifted by the calibration offsets. Bytes 8, 9 and 10
/// are raw speed, heading and accuracy.
pub fn decode_compact(
    hex: &str,
    source: &str,
    calibration: &CompactCalibration,
) -> Option<PositionFix> {
    if hex.len() != COMPACT_HEX_LEN {
        return None;
    }
    let lat_raw = hex::byte_field(hex, 2, 5).and_then(hex::parse_i24)?;
    let latitude = lat_raw as f64 / COMPACT_SCALE - calibration.lat_offset;

    let mut fix = PositionFix::new(source, Encoding::Compact, latitude);
    fix.longitude = hex::byte_field(hex, 5, 8)
        .and_then(hex::parse_i24)
        .map(|raw| raw as f64 / COMPACT_SCALE - calibration.lon_offset);
    fix.speed = hex::byte_field(hex, 8, 9)
        .and_then(hex::parse_u8)
        .map(f64::from);
    fix.heading = hex::byte_field(hex, 9, 10)
        .and_then(hex::parse_u8)
        .map(u16::from);
    fix.accuracy = hex::byte_field(hex, 10, 11).and_then(hex::parse_u8);
    Some(fix)
}

/// Minimum payload length in bytes for a route report.
const ROUTE_MIN_BYTES: usize = 14;

/// Decode a route-reporting (LRRP) payload: latitude at bytes 6–9 and
/// longitude at bytes 10–13, same scale as the standard layout.
pub fn decode_route(hex: &str, source: &str) -> Option<PositionFix> {
    if hex.len() < ROUTE_MIN_BYTES * 2 {
        return None;
    }
    let latitude = degrees_at(hex, 6)?;
    let mut fix = PositionFix::new(source, Encoding::RouteReport, latitude);
    fix.longitude = degrees_at(hex, 10);
    Some(fix)
}
