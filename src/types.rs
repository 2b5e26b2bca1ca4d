use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Geographic bounding box, always ordered (min-lon, max-lon, min-lat, max-lat)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl Region {
    /// Create a region, rejecting inverted or non-finite bounds
    pub fn new(min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) -> PlotResult<Self> {
        let bounds = [min_lon, max_lon, min_lat, max_lat];
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err(PlotError::InputResolution(format!(
                "Region bounds must be finite: {:?}",
                bounds
            )));
        }
        if min_lon >= max_lon || min_lat >= max_lat {
            return Err(PlotError::InputResolution(format!(
                "Region must be ordered (min-lon, max-lon, min-lat, max-lat), got {:?}",
                bounds
            )));
        }

        Ok(Self { min_lon, max_lon, min_lat, max_lat })
    }

    /// Bounding region of a WKT polygon, e.g. `POLYGON((-155.7 19.3,-155.5 19.3,-155.5 19.5,-155.7 19.3))`
    pub fn from_polygon(polygon: &str) -> PlotResult<Self> {
        let start = polygon.find("((");
        let end = polygon.rfind("))");
        let body = match (start, end) {
            (Some(s), Some(e)) if e > s => &polygon[s + 2..e],
            _ => polygon.trim(),
        };

        let mut lons = Vec::new();
        let mut lats = Vec::new();
        for vertex in body.split(',') {
            let mut parts = vertex.split_whitespace();
            let (Some(lon), Some(lat), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(PlotError::InputResolution(format!(
                    "Invalid polygon vertex '{}' in '{}'",
                    vertex.trim(),
                    polygon
                )));
            };
            let parse = |s: &str| {
                s.parse::<f64>().map_err(|e| {
                    PlotError::InputResolution(format!("Invalid polygon coordinate '{}': {}", s, e))
                })
            };
            lons.push(parse(lon)?);
            lats.push(parse(lat)?);
        }

        if lons.len() < 3 {
            return Err(PlotError::InputResolution(format!(
                "Polygon needs at least three vertices: '{}'",
                polygon
            )));
        }

        let min = |v: &[f64]| v.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = |v: &[f64]| v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Self::new(min(&lons), max(&lons), min(&lats), max(&lats))
    }

    /// Region centred on a point, extended by the given half-widths in degrees
    pub fn around(center: LatLon, half_lat: f64, half_lon: f64) -> PlotResult<Self> {
        Self::new(
            center.lon - half_lon,
            center.lon + half_lon,
            center.lat - half_lat,
            center.lat + half_lat,
        )
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn contains(&self, point: LatLon) -> bool {
        point.lon >= self.min_lon
            && point.lon <= self.max_lon
            && point.lat >= self.min_lat
            && point.lat <= self.max_lat
    }

    /// Bounds as the (min-lon, max-lon, min-lat, max-lat) tuple
    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.min_lon, self.max_lon, self.min_lat, self.max_lat)
    }

    pub fn approx_eq(&self, other: &Region, tolerance: f64) -> bool {
        (self.min_lon - other.min_lon).abs() <= tolerance
            && (self.max_lon - other.max_lon).abs() <= tolerance
            && (self.min_lat - other.min_lat).abs() <= tolerance
            && (self.max_lat - other.max_lat).abs() <= tolerance
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.min_lon, self.max_lon, self.min_lat, self.max_lat
        )
    }
}

/// Latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl FromStr for LatLon {
    type Err = PlotError;

    /// Parses `"lat,lon"` or `"lat lon"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() != 2 {
            return Err(PlotError::InputResolution(format!(
                "Expected 'lat,lon', got '{}'",
                s
            )));
        }
        let parse = |p: &str| {
            p.parse::<f64>()
                .map_err(|e| PlotError::InputResolution(format!("Invalid coordinate '{}': {}", p, e)))
        };
        Ok(Self::new(parse(parts[0])?, parse(parts[1])?))
    }
}

/// Opaque RGB colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color(pub u8, pub u8, pub u8);

impl Color {
    pub const BLACK: Color = Color(0, 0, 0);
    pub const WHITE: Color = Color(255, 255, 255);
    pub const RED: Color = Color(255, 0, 0);
    pub const PURPLE: Color = Color(128, 0, 128);
    pub const GRAY: Color = Color(128, 128, 128);

    /// Linear blend between two colours, `t` in 0..1
    pub fn lerp(self, other: Color, t: f64) -> Color {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Color(mix(self.0, other.0), mix(self.1, other.1), mix(self.2, other.2))
    }
}

impl FromStr for Color {
    type Err = PlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        if let Some(hex) = name.strip_prefix('#') {
            if hex.len() == 6 && hex.is_ascii() {
                let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
                if let (Ok(r), Ok(g), Ok(b)) = (channel(0), channel(2), channel(4)) {
                    return Ok(Color(r, g, b));
                }
            }
            return Err(PlotError::InputResolution(format!("Invalid hex colour '{}'", s)));
        }

        match name.as_str() {
            "black" | "k" => Ok(Color::BLACK),
            "white" | "w" => Ok(Color::WHITE),
            "red" | "r" => Ok(Color::RED),
            "purple" => Ok(Color::PURPLE),
            "gray" | "grey" => Ok(Color::GRAY),
            "blue" | "b" => Ok(Color(0, 0, 255)),
            "green" | "g" => Ok(Color(0, 128, 0)),
            "orange" => Ok(Color(255, 165, 0)),
            "brown" => Ok(Color(165, 42, 42)),
            "yellow" | "y" => Ok(Color(255, 255, 0)),
            _ => Err(PlotError::InputResolution(format!("Unknown colour '{}'", s))),
        }
    }
}

/// Colour ramps available for relief and data overlays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    Jet,
    Terrain,
    Gray,
}

impl Colormap {
    /// Colour at normalized position `t` (clamped to 0..1)
    pub fn sample(&self, t: f64) -> Color {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        match self {
            Colormap::Jet => {
                let four_t = 4.0 * t;
                let channel = |offset: f64| {
                    let v = 1.5 - (four_t - offset).abs();
                    (v.clamp(0.0, 1.0) * 255.0).round() as u8
                };
                Color(channel(3.0), channel(2.0), channel(1.0))
            }
            Colormap::Terrain => {
                const STOPS: [(f64, Color); 6] = [
                    (0.00, Color(51, 51, 153)),
                    (0.15, Color(0, 153, 255)),
                    (0.25, Color(0, 204, 102)),
                    (0.50, Color(255, 255, 153)),
                    (0.75, Color(128, 92, 84)),
                    (1.00, Color(255, 255, 255)),
                ];
                for pair in STOPS.windows(2) {
                    let (t0, c0) = pair[0];
                    let (t1, c1) = pair[1];
                    if t <= t1 {
                        return c0.lerp(c1, (t - t0) / (t1 - t0));
                    }
                }
                STOPS[STOPS.len() - 1].1
            }
            Colormap::Gray => Color::BLACK.lerp(Color::WHITE, t),
        }
    }
}

impl FromStr for Colormap {
    type Err = PlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "jet" => Ok(Colormap::Jet),
            "terrain" => Ok(Colormap::Terrain),
            "gray" | "grey" => Ok(Colormap::Gray),
            other => Err(PlotError::InputResolution(format!("Unknown colormap '{}'", other))),
        }
    }
}

/// Marker categories that can be placed on a map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Earthquake,
    Volcano,
    Gps,
}

impl LocationKind {
    /// Built-in rendering preset for this category
    pub fn marker_style(&self) -> MarkerStyle {
        match self {
            LocationKind::Earthquake => MarkerStyle {
                shape: MarkerShape::Circle,
                color: Color::PURPLE,
                alpha: 0.5,
            },
            LocationKind::Volcano | LocationKind::Gps => MarkerStyle {
                shape: MarkerShape::Triangle,
                color: Color::RED,
                alpha: 1.0,
            },
        }
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationKind::Earthquake => write!(f, "earthquake"),
            LocationKind::Volcano => write!(f, "volcano"),
            LocationKind::Gps => write!(f, "gps"),
        }
    }
}

impl FromStr for LocationKind {
    type Err = PlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "earthquake" => Ok(LocationKind::Earthquake),
            "volcano" => Ok(LocationKind::Volcano),
            "gps" => Ok(LocationKind::Gps),
            other => Err(PlotError::InputResolution(format!("Unknown location type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerShape {
    Circle,
    Triangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerStyle {
    pub shape: MarkerShape,
    pub color: Color,
    pub alpha: f64,
}

/// Error types for map composition and product preparation
#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Input resolution error: {0}")]
    InputResolution(String),

    #[error("Data fetch error: {context}: {source}")]
    DataFetch {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Insufficient input: no {kind} file left for requested slot {requested}")]
    InsufficientInput { kind: String, requested: usize },

    #[error("External process '{program}' failed: {detail}")]
    ExternalProcess { program: String, detail: String },

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Render error: {0}")]
    Render(String),
}

impl PlotError {
    pub fn fetch<E>(context: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        PlotError::DataFetch {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Result type for plotting and preparation operations
pub type PlotResult<T> = Result<T, PlotError>;
