//! Japanese standard grid square codes (JIS X 0410).
//!
//! National census population is published per grid square. A code is a
//! string of 4 to 10 digits whose prefix identifies the enclosing square at
//! each coarser level:
//!
//! | level | edge   | digits |
//! |-------|--------|--------|
//! | 1     | ~80 km | 4      |
//! | 2     | ~10 km | 6      |
//! | 3     | ~1 km  | 8      |
//! | 4     | ~500 m | 9      |
//! | 5     | ~250 m | 10     |

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geo::{Bounds, GeoPoint};

const CODE_PATTERN: &str = r"^\d{4}(\d{2}(\d{2}([1-4]([1-4])?)?)?)?$";

fn code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The pattern is a compile-time constant covered by tests.
    RE.get_or_init(|| Regex::new(CODE_PATTERN).expect("mesh code pattern is valid"))
}

/// Grid square level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MeshLevel {
    /// Primary square, 40' latitude by 1° longitude.
    First,
    /// Secondary square, 1/8 of a primary.
    Second,
    /// Standard square, 1/10 of a secondary.
    Third,
    /// Half square.
    Fourth,
    /// Quarter square.
    Fifth,
}

impl MeshLevel {
    /// Level from its number (1-5).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for any other number.
    pub fn from_number(n: u8) -> Result<Self> {
        match n {
            1 => Ok(Self::First),
            2 => Ok(Self::Second),
            3 => Ok(Self::Third),
            4 => Ok(Self::Fourth),
            5 => Ok(Self::Fifth),
            _ => Err(Error::invalid(format!("mesh level must be 1-5, got {n}"))),
        }
    }

    /// Level number (1-5).
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Self::First => 1,
            Self::Second => 2,
            Self::Third => 3,
            Self::Fourth => 4,
            Self::Fifth => 5,
        }
    }

    /// Number of digits in a code of this level.
    #[must_use]
    pub fn digits(self) -> usize {
        match self {
            Self::First => 4,
            Self::Second => 6,
            Self::Third => 8,
            Self::Fourth => 9,
            Self::Fifth => 10,
        }
    }

    fn from_digits(len: usize) -> Option<Self> {
        match len {
            4 => Some(Self::First),
            6 => Some(Self::Second),
            8 => Some(Self::Third),
            9 => Some(Self::Fourth),
            10 => Some(Self::Fifth),
            _ => None,
        }
    }

    /// Cell height in degrees of latitude.
    #[must_use]
    pub fn lat_span(self) -> f64 {
        match self {
            Self::First => 2.0 / 3.0,
            Self::Second => 1.0 / 12.0,
            Self::Third => 1.0 / 120.0,
            Self::Fourth => 1.0 / 240.0,
            Self::Fifth => 1.0 / 480.0,
        }
    }

    /// Cell width in degrees of longitude.
    #[must_use]
    pub fn lng_span(self) -> f64 {
        match self {
            Self::First => 1.0,
            Self::Second => 1.0 / 8.0,
            Self::Third => 1.0 / 80.0,
            Self::Fourth => 1.0 / 160.0,
            Self::Fifth => 1.0 / 320.0,
        }
    }
}

/// A decoded grid square.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshCell {
    /// The code this cell was decoded from.
    pub code: String,
    /// Level of the code.
    pub level: MeshLevel,
    /// Extent of the square.
    pub bounds: Bounds,
    /// Centre of the square.
    pub center: GeoPoint,
}

/// Whether `code` is a well-formed mesh code.
#[must_use]
pub fn is_valid(code: &str) -> bool {
    if !code_regex().is_match(code) {
        return false;
    }
    // Secondary subdivisions run 0-7
    let bytes = code.as_bytes();
    bytes.len() < 6 || (bytes[4] < b'8' && bytes[5] < b'8')
}

/// Split `value` into its integer cell index (bounded by `parts - 1`) and the
/// scaled remainder for the next level.
fn subdivide(value: f64, parts: u32) -> (u32, f64) {
    let scaled = value * f64::from(parts);
    // Floor of a non-negative, bounded value
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let idx = (scaled.floor().max(0.0) as u32).min(parts - 1);
    (idx, scaled - f64::from(idx))
}

/// Encode a point as a mesh code of the given level.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when the point lies outside the domain of
/// the Japanese grid (latitude 0-66.6°, longitude 100-180°).
pub fn encode(point: GeoPoint, level: MeshLevel) -> Result<String> {
    point.validate()?;
    let y = point.lat * 1.5;
    let x = point.lng - 100.0;
    if !(0.0..100.0).contains(&y) || !(0.0..80.0).contains(&x) {
        return Err(Error::invalid(format!(
            "point {point} is outside the mesh code domain"
        )));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (p, u) = (y.floor() as u32, x.floor() as u32);
    let mut code = format!("{p:02}{u:02}");
    if level == MeshLevel::First {
        return Ok(code);
    }

    let (q, ry) = subdivide(y - f64::from(p), 8);
    let (v, rx) = subdivide(x - f64::from(u), 8);
    code.push_str(&format!("{q}{v}"));
    if level == MeshLevel::Second {
        return Ok(code);
    }

    let (r, ry) = subdivide(ry, 10);
    let (w, rx) = subdivide(rx, 10);
    code.push_str(&format!("{r}{w}"));
    if level == MeshLevel::Third {
        return Ok(code);
    }

    let (s, ry) = subdivide(ry, 2);
    let (t, rx) = subdivide(rx, 2);
    code.push_str(&(s * 2 + t + 1).to_string());
    if level == MeshLevel::Fourth {
        return Ok(code);
    }

    let (s, _) = subdivide(ry, 2);
    let (t, _) = subdivide(rx, 2);
    code.push_str(&(s * 2 + t + 1).to_string());
    Ok(code)
}

fn digit(bytes: &[u8], i: usize) -> f64 {
    f64::from(bytes[i] - b'0')
}

/// Decode a mesh code into its square.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for malformed codes.
pub fn decode(code: &str) -> Result<MeshCell> {
    if !is_valid(code) {
        return Err(Error::invalid(format!("invalid mesh code: {code}")));
    }
    let bytes = code.as_bytes();
    let level = MeshLevel::from_digits(bytes.len())
        .ok_or_else(|| Error::invalid(format!("invalid mesh code length: {code}")))?;

    let mut south = (digit(bytes, 0) * 10.0 + digit(bytes, 1)) / 1.5;
    let mut west = 100.0 + digit(bytes, 2) * 10.0 + digit(bytes, 3);

    if level >= MeshLevel::Second {
        south += digit(bytes, 4) * MeshLevel::Second.lat_span();
        west += digit(bytes, 5) * MeshLevel::Second.lng_span();
    }
    if level >= MeshLevel::Third {
        south += digit(bytes, 6) * MeshLevel::Third.lat_span();
        west += digit(bytes, 7) * MeshLevel::Third.lng_span();
    }
    for (i, sub) in [(8, MeshLevel::Fourth), (9, MeshLevel::Fifth)] {
        if level >= sub {
            let quadrant = bytes[i] - b'1';
            south += f64::from(quadrant / 2) * sub.lat_span();
            west += f64::from(quadrant % 2) * sub.lng_span();
        }
    }

    let bounds = Bounds {
        north: south + level.lat_span(),
        south,
        east: west + level.lng_span(),
        west,
    };
    Ok(MeshCell {
        code: code.to_string(),
        level,
        center: bounds.center(),
        bounds,
    })
}

/// Truncate a code to a coarser level.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `code` is malformed or already coarser
/// than `level`.
pub fn parent(code: &str, level: MeshLevel) -> Result<String> {
    if !is_valid(code) {
        return Err(Error::invalid(format!("invalid mesh code: {code}")));
    }
    if code.len() < level.digits() {
        return Err(Error::invalid(format!(
            "mesh code {code} is coarser than level {}",
            level.number()
        )));
    }
    Ok(code[..level.digits()].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tokyo Station
    const TOKYO_STATION: GeoPoint = GeoPoint {
        lat: 35.681_236,
        lng: 139.767_125,
    };

    #[test]
    fn test_pattern_compiles() {
        assert!(Regex::new(CODE_PATTERN).is_ok());
    }

    #[test]
    fn test_is_valid() {
        assert!(is_valid("5339"));
        assert!(is_valid("533946"));
        assert!(is_valid("53394611"));
        assert!(is_valid("533946113"));
        assert!(is_valid("5339461132"));
        assert!(!is_valid("533"));
        assert!(!is_valid("53394"));
        assert!(!is_valid("533946115"));
        assert!(!is_valid("5339461130"));
        assert!(!is_valid("538946"));
        assert!(!is_valid("53a946"));
        assert!(!is_valid(""));
    }

    #[test]
    fn test_encode_tokyo_station() {
        assert_eq!(encode(TOKYO_STATION, MeshLevel::First).unwrap(), "5339");
        assert_eq!(encode(TOKYO_STATION, MeshLevel::Second).unwrap(), "533946");
        assert_eq!(encode(TOKYO_STATION, MeshLevel::Third).unwrap(), "53394611");
    }

    #[test]
    fn test_encode_prefixes_are_consistent() {
        let fifth = encode(TOKYO_STATION, MeshLevel::Fifth).unwrap();
        assert_eq!(fifth.len(), 10);
        for level in [MeshLevel::First, MeshLevel::Second, MeshLevel::Third, MeshLevel::Fourth] {
            let code = encode(TOKYO_STATION, level).unwrap();
            assert_eq!(code.len(), level.digits());
            assert!(fifth.starts_with(&code));
        }
    }

    #[test]
    fn test_decode_contains_encoded_point() {
        for level in [
            MeshLevel::First,
            MeshLevel::Second,
            MeshLevel::Third,
            MeshLevel::Fourth,
            MeshLevel::Fifth,
        ] {
            let code = encode(TOKYO_STATION, level).unwrap();
            let cell = decode(&code).unwrap();
            assert_eq!(cell.level, level);
            assert!(
                cell.bounds.contains(&TOKYO_STATION),
                "level {} cell {:?} misses point",
                level.number(),
                cell.bounds
            );
        }
    }

    #[test]
    fn test_decode_first_level_bounds() {
        let cell = decode("5339").unwrap();
        assert!((cell.bounds.south - 35.333_333).abs() < 1e-5);
        assert!((cell.bounds.north - 36.0).abs() < 1e-9);
        assert!((cell.bounds.west - 139.0).abs() < 1e-9);
        assert!((cell.bounds.east - 140.0).abs() < 1e-9);
    }

    #[test]
    fn test_fourth_level_quadrants() {
        let base = decode("53394611").unwrap();
        let sw = decode("533946111").unwrap();
        let ne = decode("533946114").unwrap();
        assert!((sw.bounds.south - base.bounds.south).abs() < 1e-12);
        assert!((sw.bounds.west - base.bounds.west).abs() < 1e-12);
        assert!((ne.bounds.north - base.bounds.north).abs() < 1e-9);
        assert!((ne.bounds.east - base.bounds.east).abs() < 1e-9);
    }

    #[test]
    fn test_encode_outside_domain() {
        let london = GeoPoint { lat: 51.5, lng: -0.12 };
        assert!(encode(london, MeshLevel::Third).is_err());
        let south = GeoPoint { lat: -33.9, lng: 151.2 };
        assert!(encode(south, MeshLevel::First).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("12").is_err());
        assert!(decode("abcd").is_err());
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent("5339461132", MeshLevel::Third).unwrap(), "53394611");
        assert!(parent("5339", MeshLevel::Second).is_err());
    }

    #[test]
    fn test_level_numbers() {
        for n in 1..=5 {
            assert_eq!(MeshLevel::from_number(n).unwrap().number(), n);
        }
        assert!(MeshLevel::from_number(6).is_err());
    }
}
