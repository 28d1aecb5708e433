//! Coordinate frames and the projections behind them.
//!
//! A [`CoordinateFrame`] is only a comparable tag (`EPSG:3488`). The
//! [`FrameRegistry`] maps tags to [`Projection`] implementations, which is
//! the only place projection math lives. All built-in frames share one datum
//! (WGS84 and NAD83 are treated as coincident).

use crate::error::JoinError;
use geo::Coord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// GRS80 semi-major axis in metres (also the Web Mercator sphere radius).
pub const GRS80_A: f64 = 6_378_137.0;
pub const GRS80_INV_F: f64 = 298.257_222_101;

/// Web Mercator latitude limit.
pub const MERCATOR_MAX_LAT: f64 = 85.051_128_78;

pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;
pub const MIN_LAT: f64 = -90.0;
pub const MAX_LAT: f64 = 90.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameParseError {
    #[error("frame '{0}' must look like AUTHORITY:CODE, e.g. EPSG:3488")]
    Malformed(String),
    #[error("frame '{0}' has a non-numeric code")]
    BadCode(String),
}

/// Tag identifying a spatial reference system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CoordinateFrame {
    authority: String,
    code: u32,
}

impl CoordinateFrame {
    pub fn new(authority: &str, code: u32) -> Self {
        Self {
            authority: authority.trim().to_ascii_uppercase(),
            code,
        }
    }

    pub fn epsg(code: u32) -> Self {
        Self::new("EPSG", code)
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn code(&self) -> u32 {
        self.code
    }
}

impl fmt::Display for CoordinateFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.authority, self.code)
    }
}

impl FromStr for CoordinateFrame {
    type Err = FrameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (authority, code) = s
            .split_once(':')
            .ok_or_else(|| FrameParseError::Malformed(s.to_string()))?;
        if authority.trim().is_empty() {
            return Err(FrameParseError::Malformed(s.to_string()));
        }
        let code = code
            .trim()
            .parse::<u32>()
            .map_err(|_| FrameParseError::BadCode(s.to_string()))?;
        Ok(Self::new(authority, code))
    }
}

impl TryFrom<String> for CoordinateFrame {
    type Error = FrameParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CoordinateFrame> for String {
    fn from(frame: CoordinateFrame) -> Self {
        frame.to_string()
    }
}

/// Maps between geographic lon/lat (degrees, `x` = lon, `y` = lat) and a
/// frame's own coordinates. `None` means the coordinate has no image.
pub trait Projection: Send + Sync + fmt::Debug {
    fn is_geographic(&self) -> bool {
        false
    }

    fn forward(&self, lonlat: Coord<f64>) -> Option<Coord<f64>>;

    fn inverse(&self, xy: Coord<f64>) -> Option<Coord<f64>>;
}

/// Longitude/latitude in degrees.
#[derive(Debug, Clone, Copy, Default)]
pub struct Geographic;

impl Projection for Geographic {
    fn is_geographic(&self) -> bool {
        true
    }

    fn forward(&self, lonlat: Coord<f64>) -> Option<Coord<f64>> {
        in_geographic_range(lonlat).then_some(lonlat)
    }

    fn inverse(&self, xy: Coord<f64>) -> Option<Coord<f64>> {
        in_geographic_range(xy).then_some(xy)
    }
}

pub fn in_geographic_range(c: Coord<f64>) -> bool {
    (MIN_LON..=MAX_LON).contains(&c.x) && (MIN_LAT..=MAX_LAT).contains(&c.y)
}

/// Spherical Web Mercator (EPSG:3857).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercator;

impl Projection for WebMercator {
    fn forward(&self, lonlat: Coord<f64>) -> Option<Coord<f64>> {
        if !in_geographic_range(lonlat) || lonlat.y.abs() > MERCATOR_MAX_LAT {
            return None;
        }
        let lat_rad = lonlat.y.to_radians();
        Some(Coord {
            x: GRS80_A * lonlat.x.to_radians(),
            y: GRS80_A * (FRAC_PI_4 + lat_rad / 2.0).tan().ln(),
        })
    }

    fn inverse(&self, xy: Coord<f64>) -> Option<Coord<f64>> {
        let lon = (xy.x / GRS80_A).to_degrees();
        let lat = (2.0 * (xy.y / GRS80_A).exp().atan() - FRAC_PI_2).to_degrees();
        let c = Coord { x: lon, y: lat };
        (c.x.is_finite() && c.y.is_finite() && in_geographic_range(c)).then_some(c)
    }
}

/// Parameters of an Albers equal-area conic frame, in degrees and metres.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AlbersParams {
    pub standard_parallel_1: f64,
    pub standard_parallel_2: f64,
    pub latitude_of_origin: f64,
    pub central_meridian: f64,
    #[serde(default)]
    pub false_easting: f64,
    #[serde(default)]
    pub false_northing: f64,
}

/// Ellipsoidal Albers equal-area conic on GRS80 (Snyder, eq. 14-1 to 14-21).
#[derive(Debug, Clone)]
pub struct AlbersEqualArea {
    params: AlbersParams,
    e: f64,
    e2: f64,
    n: f64,
    c: f64,
    rho0: f64,
}

impl AlbersEqualArea {
    pub fn new(params: AlbersParams) -> Self {
        let f = 1.0 / GRS80_INV_F;
        let e2 = 2.0 * f - f * f;
        let e = e2.sqrt();

        let phi1 = params.standard_parallel_1.to_radians();
        let phi2 = params.standard_parallel_2.to_radians();
        let phi0 = params.latitude_of_origin.to_radians();

        let m1 = albers_m(phi1, e2);
        let m2 = albers_m(phi2, e2);
        let q0 = albers_q(phi0, e, e2);
        let q1 = albers_q(phi1, e, e2);
        let q2 = albers_q(phi2, e, e2);

        let n = if (phi1 - phi2).abs() < 1e-12 {
            phi1.sin()
        } else {
            (m1 * m1 - m2 * m2) / (q2 - q1)
        };
        let c = m1 * m1 + n * q1;
        let rho0 = GRS80_A * (c - n * q0).sqrt() / n;

        Self {
            params,
            e,
            e2,
            n,
            c,
            rho0,
        }
    }

    /// California Albers (EPSG:3310 and EPSG:3488 share these parameters).
    pub fn california() -> Self {
        Self::new(AlbersParams {
            standard_parallel_1: 34.0,
            standard_parallel_2: 40.5,
            latitude_of_origin: 0.0,
            central_meridian: -120.0,
            false_easting: 0.0,
            false_northing: -4_000_000.0,
        })
    }

    /// CONUS Albers (EPSG:5070).
    pub fn conus() -> Self {
        Self::new(AlbersParams {
            standard_parallel_1: 29.5,
            standard_parallel_2: 45.5,
            latitude_of_origin: 23.0,
            central_meridian: -96.0,
            false_easting: 0.0,
            false_northing: 0.0,
        })
    }

    pub fn params(&self) -> &AlbersParams {
        &self.params
    }
}

fn albers_m(phi: f64, e2: f64) -> f64 {
    let s = phi.sin();
    phi.cos() / (1.0 - e2 * s * s).sqrt()
}

fn albers_q(phi: f64, e: f64, e2: f64) -> f64 {
    let s = phi.sin();
    (1.0 - e2)
        * (s / (1.0 - e2 * s * s) - (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln())
}

impl Projection for AlbersEqualArea {
    fn forward(&self, lonlat: Coord<f64>) -> Option<Coord<f64>> {
        if !in_geographic_range(lonlat) {
            return None;
        }
        let q = albers_q(lonlat.y.to_radians(), self.e, self.e2);
        let rho = GRS80_A * (self.c - self.n * q).max(0.0).sqrt() / self.n;
        let theta = self.n * (lonlat.x - self.params.central_meridian).to_radians();
        let out = Coord {
            x: rho * theta.sin() + self.params.false_easting,
            y: self.rho0 - rho * theta.cos() + self.params.false_northing,
        };
        (out.x.is_finite() && out.y.is_finite()).then_some(out)
    }

    fn inverse(&self, xy: Coord<f64>) -> Option<Coord<f64>> {
        let x = xy.x - self.params.false_easting;
        let y = self.rho0 - (xy.y - self.params.false_northing);
        let sign = self.n.signum();
        let rho = sign * (x * x + y * y).sqrt();
        let theta = (sign * x).atan2(sign * y);
        let q = (self.c - (rho * self.n / GRS80_A).powi(2)) / self.n;

        // Limit of q at the poles; anything beyond is outside the ellipsoid.
        let q_pole = albers_q(FRAC_PI_2, self.e, self.e2);
        if !q.is_finite() || q.abs() > q_pole + 1e-12 {
            return None;
        }
        let mut phi = (q / 2.0).clamp(-1.0, 1.0).asin();
        if (q.abs() - q_pole).abs() <= 1e-12 {
            phi = FRAC_PI_2.copysign(q);
        } else {
            for _ in 0..15 {
                let s = phi.sin();
                let one_minus = 1.0 - self.e2 * s * s;
                let delta = one_minus * one_minus / (2.0 * phi.cos())
                    * (q / (1.0 - self.e2) - s / one_minus
                        + (1.0 / (2.0 * self.e)) * ((1.0 - self.e * s) / (1.0 + self.e * s)).ln());
                phi += delta;
                if delta.abs() < 1e-14 {
                    break;
                }
            }
        }

        let lon = self.params.central_meridian + (theta / self.n).to_degrees();
        let out = Coord {
            x: lon,
            y: phi.to_degrees(),
        };
        (out.x.is_finite() && out.y.is_finite() && in_geographic_range(out)).then_some(out)
    }
}

/// Resolves frame tags to projections. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct FrameRegistry {
    frames: HashMap<CoordinateFrame, Arc<dyn Projection>>,
}

impl FrameRegistry {
    /// An empty registry; every lookup fails until frames are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the frames used for US tract analysis.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CoordinateFrame::epsg(4326), Geographic);
        registry.register(CoordinateFrame::epsg(4269), Geographic);
        registry.register(CoordinateFrame::epsg(3857), WebMercator);
        registry.register(CoordinateFrame::epsg(3310), AlbersEqualArea::california());
        registry.register(CoordinateFrame::epsg(3488), AlbersEqualArea::california());
        registry.register(CoordinateFrame::epsg(5070), AlbersEqualArea::conus());
        registry
    }

    pub fn register<P: Projection + 'static>(&mut self, frame: CoordinateFrame, projection: P) {
        self.frames.insert(frame, Arc::new(projection));
    }

    pub fn contains(&self, frame: &CoordinateFrame) -> bool {
        self.frames.contains_key(frame)
    }

    pub fn resolve(&self, frame: &CoordinateFrame) -> Result<Arc<dyn Projection>, JoinError> {
        self.frames
            .get(frame)
            .cloned()
            .ok_or_else(|| JoinError::UnknownFrame {
                frame: frame.clone(),
            })
    }

    /// Builds the coordinate mapping from `source` into `target`.
    pub fn transform(
        &self,
        source: &CoordinateFrame,
        target: &CoordinateFrame,
    ) -> Result<FrameTransform, JoinError> {
        let from = self.resolve(source)?;
        let to = self.resolve(target)?;
        Ok(FrameTransform {
            identity: source == target,
            from,
            to,
        })
    }
}

/// A resolved mapping between two frames.
#[derive(Debug, Clone)]
pub struct FrameTransform {
    from: Arc<dyn Projection>,
    to: Arc<dyn Projection>,
    identity: bool,
}

impl FrameTransform {
    pub fn source_is_geographic(&self) -> bool {
        self.from.is_geographic()
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Re-expresses `c` in the target frame, or `None` if it has no image.
    pub fn apply(&self, c: Coord<f64>) -> Option<Coord<f64>> {
        if !(c.x.is_finite() && c.y.is_finite()) {
            return None;
        }
        if self.identity {
            if self.from.is_geographic() && !in_geographic_range(c) {
                return None;
            }
            return Some(c);
        }
        let lonlat = self.from.inverse(c)?;
        self.to.forward(lonlat)
    }
}
