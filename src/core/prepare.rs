use crate::core::plot_driver::{FileKind, InputFiles, PlotType};
use crate::io::file_handler::{RasterProduct, RasterReader};
use crate::io::toolkit::{
    parse_date_listing, AscDescToHorzVert, Geocode, GeodesyToolkit, ListDates, Mask, ReferencePoint,
    SaveGbis, SaveGdal, TimeseriesToVelocity,
};
use crate::types::{LatLon, PlotError, PlotResult};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings of one preparation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareConfig {
    /// Root holding `<Project><Track>/mintpy` inputs and receiving `<Project>/<Track>` outputs
    pub scratch_dir: PathBuf,
    /// Track directories, relative to `scratch_dir` unless absolute
    pub data_dirs: Vec<PathBuf>,
    pub plot_type: PlotType,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub ref_lalo: Option<LatLon>,
    /// Latitude step for geocoding; taken from the product when unset
    #[serde(default)]
    pub lat_step: Option<f64>,
    /// Minimum temporal coherence kept by the mask
    #[serde(default = "PrepareConfig::default_mask_vmin")]
    pub mask_vmin: f64,
    /// Half-size in pixels of the reference-point search window
    #[serde(default = "PrepareConfig::default_window_size")]
    pub window_size: usize,
    #[serde(default)]
    pub save_gbis: bool,
}

impl PrepareConfig {
    fn default_mask_vmin() -> f64 {
        0.7
    }

    fn default_window_size() -> usize {
        3
    }

    pub fn new<P: AsRef<Path>>(scratch_dir: P, data_dirs: Vec<PathBuf>, plot_type: PlotType) -> Self {
        Self {
            scratch_dir: scratch_dir.as_ref().to_path_buf(),
            data_dirs,
            plot_type,
            start_date: None,
            end_date: None,
            ref_lalo: None,
            lat_step: None,
            mask_vmin: Self::default_mask_vmin(),
            window_size: Self::default_window_size(),
            save_gbis: false,
        }
    }

    pub fn validate(&self) -> PlotResult<()> {
        if self.plot_type != PlotType::ShadedRelief && self.data_dirs.is_empty() {
            return Err(PlotError::InputResolution(format!(
                "Plot type {} needs at least one data directory",
                self.plot_type
            )));
        }
        if !(0.0..=1.0).contains(&self.mask_vmin) {
            return Err(PlotError::InputResolution(format!(
                "Coherence threshold {} must lie in 0..1",
                self.mask_vmin
            )));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start >= end {
                return Err(PlotError::InputResolution(format!(
                    "Start date {} is not before end date {}",
                    start, end
                )));
            }
        }
        if let Some(step) = self.lat_step {
            if !(step.is_finite() && step != 0.0) {
                return Err(PlotError::InputResolution(format!("Invalid latitude step {}", step)));
            }
        }
        Ok(())
    }
}

/// File locations of one track
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectPaths {
    pub project: String,
    pub track: String,
    pub direction: FileKind,
    pub mintpy_dir: PathBuf,
    /// `<scratch>/<Project>`: holds the decomposition products
    pub project_dir: PathBuf,
    /// `<scratch>/<Project>/<Track>`: holds this track's products
    pub out_dir: PathBuf,
    pub eos_file: PathBuf,
    pub geometry_file: PathBuf,
    pub velocity: PathBuf,
    pub coherence: PathBuf,
}

impl ProjectPaths {
    /// Lay out the paths of a track directory such as `MaunaLoaSenDT87`
    pub fn resolve<P: AsRef<Path>>(scratch_dir: &Path, data_dir: P) -> PlotResult<Self> {
        let data_dir = data_dir.as_ref();
        let work_dir = if data_dir.is_absolute() {
            data_dir.to_path_buf()
        } else {
            scratch_dir.join(data_dir)
        };

        let (track_dir, mintpy_dir) = if work_dir.file_name().map_or(false, |n| n == "mintpy") {
            let parent = work_dir.parent().map(Path::to_path_buf).unwrap_or_default();
            (parent, work_dir.clone())
        } else {
            (work_dir.clone(), work_dir.join("mintpy"))
        };

        let dir_name = track_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                PlotError::InputResolution(format!("Cannot name the track of {}", work_dir.display()))
            })?;

        let pattern = Regex::new(r"^(.*?)(Sen([AD])T\d+)$")
            .map_err(|e| PlotError::InputResolution(format!("Track pattern: {}", e)))?;
        let caps = pattern.captures(&dir_name).ok_or_else(|| {
            PlotError::InputResolution(format!(
                "Directory '{}' does not end in a Sentinel track name like SenDT87",
                dir_name
            ))
        })?;
        let project = caps[1].to_string();
        let track = caps[2].to_string();
        let direction = if &caps[3] == "A" {
            FileKind::Ascending
        } else {
            FileKind::Descending
        };
        if project.is_empty() {
            return Err(PlotError::InputResolution(format!(
                "Directory '{}' has no project prefix before the track name",
                dir_name
            )));
        }

        let project_dir = scratch_dir.join(&project);
        let out_dir = project_dir.join(&track);

        Ok(Self {
            eos_file: find_eos_file(&mintpy_dir)?,
            geometry_file: mintpy_dir.join("inputs").join("geometryRadar.h5"),
            velocity: out_dir.join("velocity.h5"),
            coherence: out_dir.join("geo_temporalCoherence.tif"),
            project,
            track,
            direction,
            mintpy_dir,
            project_dir,
            out_dir,
        })
    }

    /// Geocoded velocity written by `geocode.py`
    pub fn geo_velocity(&self) -> PathBuf {
        self.out_dir.join("geo_velocity.h5")
    }
}

/// First HDF-EOS time series in the MintPy directory, else `timeseries.h5`
fn find_eos_file(mintpy_dir: &Path) -> PlotResult<PathBuf> {
    if !mintpy_dir.is_dir() {
        return Ok(mintpy_dir.join("timeseries.h5"));
    }
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(mintpy_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map_or(false, |ext| ext == "he5"))
        .collect();
    candidates.sort();
    Ok(candidates
        .into_iter()
        .next()
        .unwrap_or_else(|| mintpy_dir.join("timeseries.h5")))
}

/// Product path with `_msk` inserted before the extension
pub fn masked_path(product: &Path) -> PathBuf {
    let stem = product
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    product.with_file_name(format!("{}_msk.h5", stem))
}

fn nearest(available: &[NaiveDate], wanted: NaiveDate) -> NaiveDate {
    available
        .iter()
        .copied()
        .min_by_key(|d| ((*d - wanted).num_days().abs(), *d))
        .unwrap_or(wanted)
}

/// Acquisition dates closest to the requested bounds; first and last when unset
pub fn nearest_dates(
    available: &[NaiveDate],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> PlotResult<(NaiveDate, NaiveDate)> {
    let (Some(&first), Some(&last)) = (available.first(), available.last()) else {
        return Err(PlotError::Metadata("Time series lists no acquisition dates".to_string()));
    };
    let start = start.map_or(first, |d| nearest(available, d));
    let end = end.map_or(last, |d| nearest(available, d));
    if start >= end {
        return Err(PlotError::InputResolution(format!(
            "Nearest acquisitions {} and {} do not span a time window",
            start, end
        )));
    }
    Ok((start, end))
}

fn pixel_of(product: &RasterProduct, point: LatLon) -> Option<(usize, usize)> {
    let (rows, cols) = product.data.dim();
    let region = &product.region;
    if rows == 0 || cols == 0 || !region.contains(point) {
        return None;
    }
    let col = ((point.lon - region.min_lon) / region.width() * cols as f64).floor() as usize;
    let row = ((point.lat - region.min_lat) / region.height() * rows as f64).floor() as usize;
    Some((row.min(rows - 1), col.min(cols - 1)))
}

fn pixel_center(product: &RasterProduct, row: usize, col: usize) -> LatLon {
    let (rows, cols) = product.data.dim();
    let region = &product.region;
    LatLon::new(
        region.min_lat + (row as f64 + 0.5) * region.height() / rows as f64,
        region.min_lon + (col as f64 + 0.5) * region.width() / cols as f64,
    )
}

fn usable(value: f32) -> bool {
    value.is_finite() && value != 0.0
}

/// Reference point valid in both products, nearest to `target` within `±window` pixels
pub fn select_common_reference(
    first: &RasterProduct,
    second: &RasterProduct,
    target: LatLon,
    window: usize,
) -> PlotResult<LatLon> {
    let (row0, col0) = pixel_of(first, target).ok_or_else(|| {
        PlotError::InputResolution(format!("Reference point {:?} lies outside {}", target, first.region))
    })?;
    let (rows, cols) = first.data.dim();
    let w = window as isize;

    let mut candidates: Vec<(isize, usize, usize)> = Vec::new();
    for dr in -w..=w {
        for dc in -w..=w {
            let r = row0 as isize + dr;
            let c = col0 as isize + dc;
            if r < 0 || c < 0 || r >= rows as isize || c >= cols as isize {
                continue;
            }
            candidates.push((dr * dr + dc * dc, r as usize, c as usize));
        }
    }
    candidates.sort();

    for (_, r, c) in candidates {
        if !usable(first.data[[r, c]]) {
            continue;
        }
        let point = pixel_center(first, r, c);
        if let Some((r2, c2)) = pixel_of(second, point) {
            if usable(second.data[[r2, c2]]) {
                log::debug!("Common reference pixel ({}, {}) at {:?}", r, c, point);
                return Ok(point);
            }
        }
    }

    Err(PlotError::InputResolution(format!(
        "No pixel valid in both products within {} pixels of {:?}",
        window, target
    )))
}

/// Masked product of one track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackProducts {
    pub paths: ProjectPaths,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub masked: PathBuf,
    /// Velocity was re-estimated in this run, so downstream products were rebuilt
    pub refreshed: bool,
}

/// Files produced by [`run_prepare`], ready to feed the plot driver
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedProducts {
    pub tracks: Vec<TrackProducts>,
    pub horizontal: Option<PathBuf>,
    pub vertical: Option<PathBuf>,
}

impl PreparedProducts {
    pub fn into_input_files(self) -> InputFiles {
        let mut files = InputFiles::new();
        for track in self.tracks {
            files.push(track.paths.direction, track.masked);
        }
        if let Some(hz) = self.horizontal {
            files.push(FileKind::Horizontal, hz);
        }
        if let Some(up) = self.vertical {
            files.push(FileKind::Vertical, up);
        }
        files
    }
}

/// Drive the external toolkit through velocity, geocoding, masking and decomposition
///
/// Steps whose outputs already exist are skipped. The first failing command
/// aborts the run.
pub fn run_prepare(
    config: &PrepareConfig,
    toolkit: &dyn GeodesyToolkit,
    reader: &dyn RasterReader,
) -> PlotResult<PreparedProducts> {
    config.validate()?;
    let mut products = PreparedProducts::default();

    if config.plot_type == PlotType::ShadedRelief {
        log::info!("Shaded relief needs no prepared products");
        return Ok(products);
    }

    for data_dir in &config.data_dirs {
        let paths = ProjectPaths::resolve(&config.scratch_dir, data_dir)?;
        log::info!("Preparing {} {} from {}", paths.project, paths.track, paths.mintpy_dir.display());
        products.tracks.push(prepare_track(config, paths, toolkit, reader)?);
    }

    if config.plot_type.needs_decomposition() {
        let (horizontal, vertical) = decompose(config, &products.tracks, toolkit, reader)?;
        products.horizontal = horizontal;
        products.vertical = vertical;
    }

    if config.save_gbis {
        for track in &products.tracks {
            toolkit.run(&SaveGbis {
                file: track.masked.clone(),
                geometry: track.paths.geometry_file.clone(),
                out_dir: track.paths.out_dir.clone(),
            })?;
        }
    }

    Ok(products)
}

fn prepare_track(
    config: &PrepareConfig,
    paths: ProjectPaths,
    toolkit: &dyn GeodesyToolkit,
    reader: &dyn RasterReader,
) -> PlotResult<TrackProducts> {
    std::fs::create_dir_all(&paths.out_dir)?;

    let listing = toolkit.run(&ListDates {
        timeseries: paths.eos_file.clone(),
    })?;
    let available = parse_date_listing(&listing)?;
    let (start_date, end_date) = nearest_dates(&available, config.start_date, config.end_date)?;
    log::info!("Using acquisitions {} to {}", start_date, end_date);

    let velocity_command = TimeseriesToVelocity {
        timeseries: paths.eos_file.clone(),
        start_date,
        end_date,
        output: paths.velocity.clone(),
    };
    let mut metadata = if paths.velocity.exists() {
        Some(reader.metadata(&paths.velocity)?)
    } else {
        None
    };
    let up_to_date = match &metadata {
        Some(m) => m.date("START_DATE").ok() == Some(start_date) && m.date("END_DATE").ok() == Some(end_date),
        None => false,
    };
    if !up_to_date {
        log::info!("Estimating velocity for {} to {}", start_date, end_date);
        toolkit.run(&velocity_command)?;
        metadata = None;
    }
    let metadata = match metadata {
        Some(m) => m,
        None => reader.metadata(&paths.velocity)?,
    };

    let geocoded = if metadata.contains("Y_STEP") {
        log::warn!("{} already geocoded, skipping", paths.velocity.display());
        paths.velocity.clone()
    } else if up_to_date && paths.geo_velocity().exists() {
        log::warn!("{} exists, skipping geocode", paths.geo_velocity().display());
        paths.geo_velocity()
    } else {
        let ref_lat = match config.ref_lalo {
            Some(lalo) => lalo.lat,
            None => {
                let raw = metadata.first_of(&["LAT_REF1", "REF_LAT"]).ok_or_else(|| {
                    PlotError::Metadata(format!(
                        "{} has no LAT_REF1/REF_LAT and no reference point was given",
                        paths.velocity.display()
                    ))
                })?;
                raw.trim().parse::<f64>().map_err(|e| {
                    PlotError::Metadata(format!("Invalid reference latitude '{}': {}", raw, e))
                })?
            }
        };
        let lat_step = match config.lat_step {
            Some(step) => step,
            None => {
                let raw = metadata.require("mintpy.geocode.laloStep")?;
                let first = raw.split(',').next().unwrap_or(raw).trim();
                first.parse::<f64>().map_err(|e| {
                    PlotError::Metadata(format!("Invalid mintpy.geocode.laloStep '{}': {}", raw, e))
                })?
            }
        };
        let lon_step = lat_step.abs() / ref_lat.to_radians().cos();

        log::info!("Geocoding with steps {} {}", lat_step, lon_step);
        toolkit.run(&Geocode {
            file: paths.velocity.clone(),
            lat_step,
            lon_step,
            outdir: paths.out_dir.clone(),
        })?;
        paths.geo_velocity()
    };

    let masked = masked_path(&geocoded);
    if up_to_date && masked.exists() {
        log::warn!("{} exists, skipping mask", masked.display());
    } else {
        if !paths.coherence.exists() {
            toolkit.run(&SaveGdal {
                file: paths.eos_file.clone(),
                dataset: "temporalCoherence".to_string(),
                output: paths.coherence.clone(),
            })?;
        }
        toolkit.run(&Mask {
            file: geocoded.clone(),
            mask: paths.coherence.clone(),
            mask_vmin: config.mask_vmin,
            outfile: masked.clone(),
        })?;
    }

    Ok(TrackProducts {
        paths,
        start_date,
        end_date,
        masked,
        refreshed: !up_to_date,
    })
}

fn single_track(tracks: &[TrackProducts], kind: FileKind) -> PlotResult<&TrackProducts> {
    let mut matching = tracks.iter().filter(|t| t.paths.direction == kind);
    match (matching.next(), matching.next()) {
        (Some(track), None) => Ok(track),
        (None, _) => Err(PlotError::InputResolution(format!("Decomposition needs a {} track", kind))),
        (Some(_), Some(_)) => Err(PlotError::InputResolution(format!(
            "Decomposition needs exactly one {} track",
            kind
        ))),
    }
}

fn decompose(
    config: &PrepareConfig,
    tracks: &[TrackProducts],
    toolkit: &dyn GeodesyToolkit,
    reader: &dyn RasterReader,
) -> PlotResult<(Option<PathBuf>, Option<PathBuf>)> {
    let Some(project_dir) = tracks.first().map(|t| t.paths.project_dir.clone()) else {
        return Ok((None, None));
    };
    let horizontal = project_dir.join("hz.h5");
    let vertical = project_dir.join("up.h5");

    let refreshed = tracks.iter().any(|t| t.refreshed);
    if !refreshed && horizontal.exists() && vertical.exists() {
        log::warn!("Decomposition products exist in {}, skipping", project_dir.display());
        return Ok((Some(horizontal), Some(vertical)));
    }

    let Some(ref_lalo) = config.ref_lalo else {
        log::warn!("No reference point given, skipping horizontal/vertical decomposition");
        return Ok((None, None));
    };

    let ascending = single_track(tracks, FileKind::Ascending)?;
    let descending = single_track(tracks, FileKind::Descending)?;

    let reference = select_common_reference(
        &reader.read(&ascending.masked)?,
        &reader.read(&descending.masked)?,
        ref_lalo,
        config.window_size,
    )?;
    log::info!("Referencing both tracks to {:.5}, {:.5}", reference.lat, reference.lon);

    for track in [ascending, descending] {
        toolkit.run(&ReferencePoint {
            file: track.masked.clone(),
            lalo: reference,
        })?;
    }

    toolkit.run(&AscDescToHorzVert {
        ascending: ascending.masked.clone(),
        descending: descending.masked.clone(),
        horizontal: horizontal.clone(),
        vertical: vertical.clone(),
    })?;

    Ok((Some(horizontal), Some(vertical)))
}
