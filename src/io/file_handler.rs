use crate::types::{PlotError, PlotResult, Region};
use chrono::NaiveDate;
use gdal::{Dataset, Metadata as _};
use ndarray::{s, Array2};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Key/value attributes attached to a raster product (MintPy attribute style)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Build from GDAL `KEY=VALUE` metadata lines
    pub fn from_gdal_lines(lines: &[String]) -> Self {
        let mut metadata = Self::new();
        for line in lines {
            if let Some((key, value)) = line.split_once('=') {
                // HDF5 root attributes may come back with a leading separator
                let key = key.trim_start_matches(|c| c == '/' || c == '_');
                metadata.insert(key, value.trim());
            }
        }
        metadata
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Add entries from `other` without overwriting existing keys
    pub fn merge_missing(&mut self, other: Metadata) {
        for (key, value) in other.entries {
            self.entries.entry(key).or_insert(value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value of the first key present, in the given order
    pub fn first_of<'a>(&'a self, keys: &[&str]) -> Option<&'a str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn require(&self, key: &str) -> PlotResult<&str> {
        self.get(key)
            .ok_or_else(|| PlotError::Metadata(format!("Missing metadata key '{}'", key)))
    }

    pub fn get_f64(&self, key: &str) -> PlotResult<Option<f64>> {
        self.get(key)
            .map(|v| {
                v.trim().parse::<f64>().map_err(|e| {
                    PlotError::Metadata(format!("Key '{}' is not a number ('{}'): {}", key, v, e))
                })
            })
            .transpose()
    }

    pub fn require_f64(&self, key: &str) -> PlotResult<f64> {
        self.get_f64(key)?
            .ok_or_else(|| PlotError::Metadata(format!("Missing metadata key '{}'", key)))
    }

    /// Parse a `YYYYMMDD` date attribute
    pub fn date(&self, key: &str) -> PlotResult<NaiveDate> {
        let raw = self.require(key)?;
        NaiveDate::parse_from_str(raw.trim(), "%Y%m%d")
            .map_err(|e| PlotError::Metadata(format!("Key '{}' is not a YYYYMMDD date ('{}'): {}", key, raw, e)))
    }

    /// Region covered by a geocoded product, if the geocoding keys are present
    pub fn region(&self) -> PlotResult<Option<Region>> {
        let keys = ["X_FIRST", "X_STEP", "WIDTH", "Y_FIRST", "Y_STEP", "LENGTH"];
        if !keys.iter().all(|k| self.contains(k)) {
            return Ok(None);
        }

        let x_first = self.require_f64("X_FIRST")?;
        let x_step = self.require_f64("X_STEP")?;
        let width = self.require_f64("WIDTH")?;
        let y_first = self.require_f64("Y_FIRST")?;
        let y_step = self.require_f64("Y_STEP")?;
        let length = self.require_f64("LENGTH")?;

        let lon_end = x_first + x_step * width;
        let lat_end = y_first + y_step * length;

        Region::new(
            x_first.min(lon_end),
            x_first.max(lon_end),
            y_first.min(lat_end),
            y_first.max(lat_end),
        )
        .map(Some)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A loaded raster product: grid stored south row first, plus its attributes
#[derive(Debug, Clone)]
pub struct RasterProduct {
    pub data: Array2<f32>,
    pub metadata: Metadata,
    pub region: Region,
}

/// Reader for geocoded raster products
pub trait RasterReader {
    fn read(&self, path: &Path) -> PlotResult<RasterProduct>;

    /// Attributes only; readers that can avoid loading the grid should override this
    fn metadata(&self, path: &Path) -> PlotResult<Metadata> {
        Ok(self.read(path)?.metadata)
    }
}

/// GDAL-backed reader for HDF5 (MintPy) and GeoTIFF products
#[derive(Debug, Clone, Default)]
pub struct GdalRasterReader {
    /// Dataset inside a multi-dataset container; first one when unset
    pub dataset_name: Option<String>,
}

impl GdalRasterReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(name: impl Into<String>) -> Self {
        Self {
            dataset_name: Some(name.into()),
        }
    }

    fn select_subdataset(&self, container: &Dataset, path: &Path) -> PlotResult<String> {
        let lines = container.metadata_domain("SUBDATASETS").unwrap_or_default();
        let names: Vec<String> = lines
            .iter()
            .filter_map(|line| line.split_once('='))
            .filter(|(key, _)| key.ends_with("_NAME"))
            .map(|(_, value)| value.to_string())
            .collect();

        let selected = match &self.dataset_name {
            Some(wanted) => names.into_iter().find(|name| {
                name.ends_with(&format!("//{}", wanted)) || name.ends_with(&format!("/{}", wanted))
            }),
            None => names.into_iter().next(),
        };

        selected.ok_or_else(|| {
            PlotError::InputResolution(format!(
                "No raster dataset{} found in {}",
                self.dataset_name
                    .as_ref()
                    .map(|n| format!(" '{}'", n))
                    .unwrap_or_default(),
                path.display()
            ))
        })
    }

    fn open(&self, path: &Path) -> PlotResult<(Dataset, Metadata)> {
        let container = Dataset::open(path)?;
        let mut metadata =
            Metadata::from_gdal_lines(&container.metadata_domain("").unwrap_or_default());

        let dataset = if container.raster_count() > 0 {
            container
        } else {
            let name = self.select_subdataset(&container, path)?;
            log::debug!("Opening subdataset {}", name);
            let sub = Dataset::open(Path::new(&name))?;
            metadata.merge_missing(Metadata::from_gdal_lines(
                &sub.metadata_domain("").unwrap_or_default(),
            ));
            sub
        };

        Ok((dataset, metadata))
    }
}

impl RasterReader for GdalRasterReader {
    fn read(&self, path: &Path) -> PlotResult<RasterProduct> {
        log::info!("Reading raster product: {}", path.display());

        let (dataset, metadata) = self.open(path)?;
        let (width, height) = dataset.raster_size();
        log::debug!("Raster size: {}x{}", width, height);

        let band = dataset.rasterband(1)?;
        let no_data = band.no_data_value();
        let buffer = band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let mut data = Array2::from_shape_vec((height, width), buffer.data)
            .map_err(|e| PlotError::Metadata(format!("Failed to reshape raster data: {}", e)))?;
        if let Some(nd) = no_data {
            data.mapv_inplace(|v| if (v as f64 - nd).abs() < f64::EPSILON { f32::NAN } else { v });
        }

        let geo_transform = dataset.geo_transform().ok();
        let north_up = match metadata.get_f64("Y_STEP")? {
            Some(step) => step < 0.0,
            None => geo_transform.map(|gt| gt[5] < 0.0).unwrap_or(false),
        };

        let region = match metadata.region()? {
            Some(region) => region,
            None => match geo_transform {
                Some(gt) => region_from_geotransform(&gt, width, height)?,
                None => {
                    return Err(PlotError::Metadata(format!(
                        "{} carries neither geocoding metadata nor a geotransform",
                        path.display()
                    )))
                }
            },
        };

        Ok(RasterProduct {
            data: south_up(data, north_up),
            metadata,
            region,
        })
    }

    fn metadata(&self, path: &Path) -> PlotResult<Metadata> {
        Ok(self.open(path)?.1)
    }
}

fn region_from_geotransform(gt: &[f64; 6], width: usize, height: usize) -> PlotResult<Region> {
    let x0 = gt[0];
    let x1 = gt[0] + gt[1] * width as f64;
    let y0 = gt[3];
    let y1 = gt[3] + gt[5] * height as f64;
    Region::new(x0.min(x1), x0.max(x1), y0.min(y1), y0.max(y1))
}

/// Reorder rows so that row 0 is the southernmost line
pub fn south_up(data: Array2<f32>, north_up: bool) -> Array2<f32> {
    if north_up {
        data.slice(s![..;-1, ..]).to_owned()
    } else {
        data
    }
}

/// A geocoded product on disk with its spatial and temporal extent
#[derive(Debug, Clone)]
pub struct FileHandler {
    pub path: PathBuf,
    pub data: Array2<f32>,
    pub metadata: Metadata,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub region: Region,
}

impl FileHandler {
    pub fn open<P: AsRef<Path>>(path: P, reader: &dyn RasterReader) -> PlotResult<Self> {
        let product = reader.read(path.as_ref())?;
        Self::from_product(path, product)
    }

    pub fn from_product<P: AsRef<Path>>(path: P, product: RasterProduct) -> PlotResult<Self> {
        let start = product.metadata.date("START_DATE")?;
        let end = product.metadata.date("END_DATE")?;

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            data: product.data,
            metadata: product.metadata,
            start,
            end,
            region: product.region,
        })
    }

    /// Length of the acquisition window in years
    pub fn span_years(&self) -> f64 {
        (self.end - self.start).num_days() as f64 / 365.25
    }

    /// Cumulative displacement over the acquisition window, for a per-year velocity grid
    pub fn displacement(&self) -> Array2<f32> {
        let years = self.span_years() as f32;
        self.data.mapv(|v| v * years)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn geocoded_metadata() -> Metadata {
        Metadata::from_pairs([
            ("X_FIRST", "-155.7"),
            ("X_STEP", "0.1"),
            ("WIDTH", "2"),
            ("Y_FIRST", "19.5"),
            ("Y_STEP", "-0.1"),
            ("LENGTH", "2"),
            ("START_DATE", "20200101"),
            ("END_DATE", "20210101"),
        ])
    }

    #[test]
    fn test_region_from_metadata() {
        let region = geocoded_metadata().region().unwrap().unwrap();
        assert!((region.min_lon + 155.7).abs() < 1e-9);
        assert!((region.max_lon + 155.5).abs() < 1e-9);
        assert!((region.min_lat - 19.3).abs() < 1e-9);
        assert!((region.max_lat - 19.5).abs() < 1e-9);

        let radar = Metadata::from_pairs([("WIDTH", "10")]);
        assert!(radar.region().unwrap().is_none());
    }

    #[test]
    fn test_gdal_lines_strip_prefix() {
        let lines = vec!["/START_DATE=20200101".to_string(), "REF_LAT=19.4".to_string()];
        let metadata = Metadata::from_gdal_lines(&lines);
        assert_eq!(metadata.get("START_DATE"), Some("20200101"));
        assert_eq!(metadata.first_of(&["LAT_REF1", "REF_LAT"]), Some("19.4"));
    }

    #[test]
    fn test_bad_date_is_metadata_error() {
        let metadata = Metadata::from_pairs([("START_DATE", "2020-01-01")]);
        assert!(matches!(metadata.date("START_DATE"), Err(PlotError::Metadata(_))));
    }

    #[test]
    fn test_south_up_flips_rows() {
        let data = array![[1.0f32, 2.0], [3.0, 4.0]];
        let flipped = south_up(data.clone(), true);
        assert_eq!(flipped, array![[3.0f32, 4.0], [1.0, 2.0]]);
        assert_eq!(south_up(data.clone(), false), data);
    }

    #[test]
    fn test_file_handler_displacement() {
        let metadata = geocoded_metadata();
        let product = RasterProduct {
            data: array![[0.0365f32, 0.0], [0.0, -0.0365]],
            region: metadata.region().unwrap().unwrap(),
            metadata,
        };
        let handler = FileHandler::from_product("up.h5", product).unwrap();
        assert_eq!(handler.start, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(handler.file_name(), "up.h5");

        let disp = handler.displacement();
        let years = 366.0 / 365.25;
        assert!((disp[[0, 0]] - 0.0365 * years as f32).abs() < 1e-6);
    }
}
