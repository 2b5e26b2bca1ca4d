use crate::io::file_handler::{GdalRasterReader, RasterReader};
use crate::types::{LatLon, PlotError, PlotResult, Region};
use ndarray::Array2;
use regex::Regex;
use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Angular unit of a relief resolution string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcUnit {
    Degree,
    Minute,
    Second,
}

impl ArcUnit {
    fn letter(&self) -> char {
        match self {
            ArcUnit::Degree => 'd',
            ArcUnit::Minute => 'm',
            ArcUnit::Second => 's',
        }
    }

    fn degrees(&self) -> f64 {
        match self {
            ArcUnit::Degree => 1.0,
            ArcUnit::Minute => 1.0 / 60.0,
            ArcUnit::Second => 1.0 / 3600.0,
        }
    }
}

/// Grid spacing of a relief request, written as digits plus a unit letter (`"01m"`, `"30s"`)
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    value: f64,
    unit: ArcUnit,
    label: String,
}

impl Resolution {
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> ArcUnit {
        self.unit
    }

    /// Grid spacing in decimal degrees
    pub fn degrees(&self) -> f64 {
        self.value * self.unit.degrees()
    }

    /// One tenth of the spacing with the same unit: `"01m"` becomes `"0.1m"`
    pub fn interpolated(&self) -> Resolution {
        let value = self.value / 10.0;
        Resolution {
            value,
            unit: self.unit,
            label: format!("{:?}{}", value, self.unit.letter()),
        }
    }
}

impl FromStr for Resolution {
    type Err = PlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pattern = Regex::new(r"^(\d+(?:\.\d+)?)([dms])$")
            .map_err(|e| PlotError::InputResolution(format!("Resolution pattern: {}", e)))?;
        let caps = pattern.captures(s.trim()).ok_or_else(|| {
            PlotError::InputResolution(format!(
                "Invalid relief resolution '{}', expected digits followed by d, m or s",
                s
            ))
        })?;

        let value: f64 = caps[1]
            .parse()
            .map_err(|e| PlotError::InputResolution(format!("Invalid resolution '{}': {}", s, e)))?;
        if value <= 0.0 {
            return Err(PlotError::InputResolution(format!(
                "Resolution must be positive: '{}'",
                s
            )));
        }
        let unit = match &caps[2] {
            "d" => ArcUnit::Degree,
            "m" => ArcUnit::Minute,
            _ => ArcUnit::Second,
        };

        Ok(Resolution {
            value,
            unit,
            label: s.trim().to_string(),
        })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Gridline-registered coordinates from `min` to `max`, spaced as close to `step` as
/// the extent allows. Matches the labels of `ReliefGrid::lons`/`lats` for the same count.
pub fn grid_axis(min: f64, max: f64, step: f64) -> Vec<f64> {
    let count = ((max - min) / step).round().max(1.0) as usize + 1;
    linspace(min, max, count)
}

/// Evenly spaced values including both ends
pub fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            let last = count - 1;
            (0..count)
                .map(|k| if k == last { end } else { start + k as f64 * step })
                .collect()
        }
    }
}

/// Elevation samples over a region; row 0 is the southern edge, column 0 the western edge
#[derive(Debug, Clone)]
pub struct ReliefGrid {
    pub region: Region,
    pub values: Array2<f32>,
}

impl ReliefGrid {
    pub fn new(region: Region, values: Array2<f32>) -> PlotResult<Self> {
        let (rows, cols) = values.dim();
        if rows < 2 || cols < 2 {
            return Err(PlotError::InputResolution(format!(
                "Relief grid needs at least 2x2 samples, got {}x{}",
                rows, cols
            )));
        }
        Ok(Self { region, values })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn lons(&self) -> Vec<f64> {
        linspace(self.region.min_lon, self.region.max_lon, self.values.ncols())
    }

    pub fn lats(&self) -> Vec<f64> {
        linspace(self.region.min_lat, self.region.max_lat, self.values.nrows())
    }

    /// Set negative and void elevations (ocean, missing data) to zero
    pub fn clamp_negative(&mut self) {
        self.values.mapv_inplace(|v| if v >= 0.0 { v } else { 0.0 });
    }

    pub fn min_max(&self) -> (f32, f32) {
        self.values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    /// Bilinear elevation at a point; NaN outside the grid
    pub fn sample(&self, point: LatLon) -> f32 {
        let (rows, cols) = self.values.dim();
        let col = (point.lon - self.region.min_lon) / self.region.width() * (cols - 1) as f64;
        let row = (point.lat - self.region.min_lat) / self.region.height() * (rows - 1) as f64;

        if !(0.0..=(cols - 1) as f64).contains(&col) || !(0.0..=(rows - 1) as f64).contains(&row) {
            return f32::NAN;
        }

        let x1 = (col.floor() as usize).min(cols - 2);
        let y1 = (row.floor() as usize).min(rows - 2);
        let dx = col - x1 as f64;
        let dy = row - y1 as f64;

        let v11 = self.values[[y1, x1]] as f64;
        let v21 = self.values[[y1, x1 + 1]] as f64;
        let v12 = self.values[[y1 + 1, x1]] as f64;
        let v22 = self.values[[y1 + 1, x1 + 1]] as f64;

        let interpolated = v11 * (1.0 - dx) * (1.0 - dy)
            + v21 * dx * (1.0 - dy)
            + v12 * (1.0 - dx) * dy
            + v22 * dx * dy;
        interpolated as f32
    }

    /// Resample onto a new gridline-registered grid over `region` using bilinear interpolation
    pub fn resample(&self, region: &Region, step_degrees: f64) -> PlotResult<ReliefGrid> {
        let lons = grid_axis(region.min_lon, region.max_lon, step_degrees);
        let lats = grid_axis(region.min_lat, region.max_lat, step_degrees);
        log::debug!(
            "Resampling relief {:?} -> {}x{} at {} deg",
            self.dim(),
            lats.len(),
            lons.len(),
            step_degrees
        );

        let mut values = Array2::zeros((lats.len(), lons.len()));
        for (i, &lat) in lats.iter().enumerate() {
            for (j, &lon) in lons.iter().enumerate() {
                values[[i, j]] = self.sample(LatLon::new(lat, lon));
            }
        }

        ReliefGrid::new(*region, values)
    }
}

/// Provider of elevation grids for a region at a given resolution
pub trait ReliefSource {
    fn load(&self, region: &Region, resolution: &Resolution) -> PlotResult<ReliefGrid>;
}

/// Relief from a local DEM file (GeoTIFF, or the `height` dataset of a MintPy geometry file)
pub struct GdalDemSource {
    path: PathBuf,
    reader: GdalRasterReader,
    cached: OnceCell<ReliefGrid>,
}

impl GdalDemSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reader: GdalRasterReader::with_dataset("height"),
            cached: OnceCell::new(),
        }
    }

    fn full_grid(&self) -> PlotResult<&ReliefGrid> {
        if let Some(grid) = self.cached.get() {
            return Ok(grid);
        }
        log::info!("Reading DEM from: {}", self.path.display());
        let product = self.reader.read(&self.path)?;
        let grid = ReliefGrid::new(product.region, product.data)?;
        Ok(self.cached.get_or_init(|| grid))
    }
}

impl ReliefSource for GdalDemSource {
    fn load(&self, region: &Region, resolution: &Resolution) -> PlotResult<ReliefGrid> {
        let dem = self.full_grid()?;
        dem.resample(region, resolution.degrees())
    }
}

/// One 1x1 degree SRTM `.hgt` tile
#[derive(Debug, Clone)]
pub struct HgtTile {
    pub lat0: i32,
    pub lon0: i32,
    size: usize,
    heights: Vec<f32>,
}

impl HgtTile {
    const VOID: i16 = -32768;

    /// Parse big-endian 16-bit samples; the tile's south-west corner is (`lat0`, `lon0`)
    pub fn from_bytes(lat0: i32, lon0: i32, bytes: &[u8]) -> PlotResult<Self> {
        let samples = bytes.len() / 2;
        let size = (samples as f64).sqrt().round() as usize;
        if size < 2 || size * size * 2 != bytes.len() {
            return Err(PlotError::MalformedRecord(format!(
                "HGT tile {} has {} bytes, not a square grid of 16-bit samples",
                tile_name(lat0, lon0),
                bytes.len()
            )));
        }

        let heights = bytes
            .chunks_exact(2)
            .map(|pair| {
                let v = i16::from_be_bytes([pair[0], pair[1]]);
                if v == Self::VOID {
                    f32::NAN
                } else {
                    v as f32
                }
            })
            .collect();

        Ok(Self { lat0, lon0, size, heights })
    }

    /// Bilinear elevation; row 0 of an HGT file is the northern edge
    pub fn elevation(&self, lat: f64, lon: f64) -> f32 {
        let n = (self.size - 1) as f64;
        let row = ((self.lat0 + 1) as f64 - lat) * n;
        let col = (lon - self.lon0 as f64) * n;
        if !(0.0..=n).contains(&row) || !(0.0..=n).contains(&col) {
            return f32::NAN;
        }

        let r1 = (row.floor() as usize).min(self.size - 2);
        let c1 = (col.floor() as usize).min(self.size - 2);
        let dr = (row - r1 as f64) as f32;
        let dc = (col - c1 as f64) as f32;
        let at = |r: usize, c: usize| self.heights[r * self.size + c];

        at(r1, c1) * (1.0 - dr) * (1.0 - dc)
            + at(r1, c1 + 1) * (1.0 - dr) * dc
            + at(r1 + 1, c1) * dr * (1.0 - dc)
            + at(r1 + 1, c1 + 1) * dr * dc
    }
}

/// SRTM naming convention, e.g. `N19W156`
pub fn tile_name(lat: i32, lon: i32) -> String {
    let lat_prefix = if lat >= 0 { "N" } else { "S" };
    let lon_prefix = if lon >= 0 { "E" } else { "W" };
    format!("{}{:02}{}{:03}", lat_prefix, lat.abs(), lon_prefix, lon.abs())
}

/// South-west corners of the 1x1 degree tiles covering a region
pub fn tiles_for(region: &Region) -> Vec<(i32, i32)> {
    let min_lat = region.min_lat.floor() as i32;
    let max_lat = (region.max_lat.ceil() as i32).max(min_lat + 1);
    let min_lon = region.min_lon.floor() as i32;
    let max_lon = (region.max_lon.ceil() as i32).max(min_lon + 1);

    let mut tiles = Vec::new();
    for lat in min_lat..max_lat {
        for lon in min_lon..max_lon {
            tiles.push((lat, lon));
        }
    }
    tiles
}

/// Relief from SRTM 1-arcsecond tiles on the public AWS mirror, cached on disk
pub struct SrtmTileSource {
    cache_dir: PathBuf,
    base_url: String,
    timeout: Duration,
}

impl SrtmTileSource {
    pub const DEFAULT_URL: &'static str = "https://s3.amazonaws.com/elevation-tiles-prod/skadi";

    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            base_url: Self::DEFAULT_URL.to_string(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Cache under the user's cache directory
    pub fn with_default_cache() -> PlotResult<Self> {
        let base = dirs::cache_dir().ok_or_else(|| {
            PlotError::InputResolution("No user cache directory available for relief tiles".to_string())
        })?;
        Ok(Self::new(base.join("plotdata").join("srtm")))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Tile from cache, downloading it when absent; `None` for tiles the mirror does not have (open sea)
    fn tile(&self, client: &reqwest::blocking::Client, lat: i32, lon: i32) -> PlotResult<Option<HgtTile>> {
        let name = tile_name(lat, lon);
        let hgt_path = self.cache_dir.join(format!("{}.hgt", name));
        let missing_marker = self.cache_dir.join(format!("{}.missing", name));

        if missing_marker.exists() {
            return Ok(None);
        }
        if !hgt_path.exists() {
            std::fs::create_dir_all(&self.cache_dir)?;
            match self.download_tile(client, &name)? {
                Some(bytes) => std::fs::write(&hgt_path, bytes)?,
                None => {
                    log::warn!("SRTM tile {} not available, treating as sea level", name);
                    std::fs::write(&missing_marker, b"")?;
                    return Ok(None);
                }
            }
        } else {
            log::debug!("SRTM tile {} found in cache", name);
        }

        let bytes = std::fs::read(&hgt_path)?;
        HgtTile::from_bytes(lat, lon, &bytes).map(Some)
    }

    fn download_tile(&self, client: &reqwest::blocking::Client, name: &str) -> PlotResult<Option<Vec<u8>>> {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let url = format!("{}/{}/{}.hgt.gz", self.base_url, &name[0..3], name);
        log::info!("Downloading SRTM tile from: {}", url);

        let response = client
            .get(&url)
            .send()
            .map_err(|e| PlotError::fetch(format!("SRTM request {}", url), e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(PlotError::fetch(
                format!("SRTM request {}", url),
                format!("HTTP {}", status),
            ));
        }

        let content = response
            .bytes()
            .map_err(|e| PlotError::fetch(format!("SRTM body {}", url), e))?;
        log::debug!("Downloaded {} bytes", content.len());

        let mut decoder = GzDecoder::new(content.as_ref());
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| PlotError::fetch(format!("Decompressing {}", url), e))?;

        Ok(Some(decompressed))
    }
}

impl ReliefSource for SrtmTileSource {
    fn load(&self, region: &Region, resolution: &Resolution) -> PlotResult<ReliefGrid> {
        log::info!("Loading SRTM relief for {} at {}", region, resolution);

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("plotdata/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlotError::fetch("Failed to create HTTP client", e))?;

        let mut tiles: HashMap<(i32, i32), Option<HgtTile>> = HashMap::new();
        for (lat, lon) in tiles_for(region) {
            tiles.insert((lat, lon), self.tile(&client, lat, lon)?);
        }

        let lookup = |lat: f64, lon: f64| -> f32 {
            let lat_key = lat.floor() as i32;
            let lon_key = lon.floor() as i32;
            // points on a tile's northern or eastern edge belong to the tile below/left as well
            let candidates = [
                (lat_key, lon_key),
                (lat_key - 1, lon_key),
                (lat_key, lon_key - 1),
                (lat_key - 1, lon_key - 1),
            ];
            for key in candidates {
                if let Some(entry) = tiles.get(&key) {
                    return match entry {
                        Some(tile) => tile.elevation(lat, lon),
                        None => 0.0,
                    };
                }
            }
            0.0
        };

        let step = resolution.degrees();
        let lons = grid_axis(region.min_lon, region.max_lon, step);
        let lats = grid_axis(region.min_lat, region.max_lat, step);
        let mut values = Array2::zeros((lats.len(), lons.len()));
        for (i, &lat) in lats.iter().enumerate() {
            for (j, &lon) in lons.iter().enumerate() {
                values[[i, j]] = lookup(lat, lon);
            }
        }

        log::debug!("Relief grid size: {}x{}", lats.len(), lons.len());
        ReliefGrid::new(*region, values)
    }
}
