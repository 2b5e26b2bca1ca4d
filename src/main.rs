//! plotdata CLI: prepare MintPy products, plot maps, chart earthquakes

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use plotdata::core::earthquake::{parse_date, Earthquake, EarthquakeQuery, SearchRadius};
use plotdata::core::globe::LocatorGlobe;
use plotdata::core::mapper::{Location, OverlayStyle};
use plotdata::core::plot_driver::{FileKind, InputFiles, PlotDriver, PlotOptions, PlotType, SlotKind};
use plotdata::core::prepare::{run_prepare, PrepareConfig};
use plotdata::io::{GdalDemSource, GdalRasterReader, MintpyCli, ReliefSource, SrtmTileSource, UsgsClient};
use plotdata::types::{Color, Colormap, LatLon, LocationKind};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "plotdata")]
#[command(author, version, about = "InSAR maps and earthquake charts from MintPy products", long_about = None)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by `prepare` and `plot` when products are prepared on the fly
#[derive(clap::Args, Debug)]
struct PrepareArgs {
    /// Track directories such as MaunaLoaSenDT87 (relative to the scratch directory)
    #[arg(long = "data-dir", num_args = 1..)]
    data_dirs: Vec<PathBuf>,

    /// Root of the processing tree
    #[arg(long, env = "SCRATCHDIR", default_value = ".")]
    scratch_dir: PathBuf,

    /// First date of the velocity window (YYYYMMDD)
    #[arg(long, value_parser = date_arg)]
    start_date: Option<NaiveDate>,

    /// Last date of the velocity window
    #[arg(long, value_parser = date_arg)]
    end_date: Option<NaiveDate>,

    /// Common reference point "lat,lon" for the decomposition
    #[arg(long, value_parser = lalo_arg)]
    ref_lalo: Option<LatLon>,

    /// Latitude step for geocoding, degrees
    #[arg(long)]
    lat_step: Option<f64>,

    /// Minimum temporal coherence kept by the mask
    #[arg(long, default_value_t = 0.7)]
    mask_vmin: f64,

    /// Half-size in pixels of the reference-point search window
    #[arg(long, default_value_t = 3)]
    window_size: usize,

    /// Also export GBIS inputs
    #[arg(long)]
    save_gbis: bool,

    /// Directory holding the MintPy executables
    #[arg(long)]
    mintpy_bin: Option<PathBuf>,

    /// Kill a MintPy command running longer than this many seconds
    #[arg(long)]
    tool_timeout: Option<u64>,
}

impl PrepareArgs {
    fn config(&self, plot_type: PlotType) -> PrepareConfig {
        let mut config = PrepareConfig::new(&self.scratch_dir, self.data_dirs.clone(), plot_type);
        config.start_date = self.start_date;
        config.end_date = self.end_date;
        config.ref_lalo = self.ref_lalo;
        config.lat_step = self.lat_step;
        config.mask_vmin = self.mask_vmin;
        config.window_size = self.window_size;
        config.save_gbis = self.save_gbis;
        config
    }

    fn toolkit(&self) -> MintpyCli {
        let mut cli = MintpyCli::new();
        if let Some(dir) = &self.mintpy_bin {
            cli = cli.with_bin_dir(dir);
        }
        if let Some(secs) = self.tool_timeout {
            cli = cli.with_timeout(Duration::from_secs(secs));
        }
        cli
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MintPy steps that produce masked geocoded velocities
    Prepare {
        /// Plot the products are meant for; decides whether to decompose
        #[arg(long, value_parser = plot_type_arg, default_value = "velocity")]
        plot_type: PlotType,

        #[command(flatten)]
        prepare: PrepareArgs,
    },
    /// Compose map panels into a PNG
    Plot {
        #[arg(value_parser = plot_type_arg)]
        plot_type: PlotType,

        /// Output PNG
        #[arg(short, long, default_value = "plot.png")]
        output: PathBuf,

        /// Panels to draw, overriding the plot type's defaults
        #[arg(long, value_parser = slot_arg, num_args = 1..)]
        panels: Vec<SlotKind>,

        #[arg(long, num_args = 1..)]
        ascending: Vec<PathBuf>,
        #[arg(long, num_args = 1..)]
        descending: Vec<PathBuf>,
        #[arg(long, num_args = 1..)]
        horizontal: Vec<PathBuf>,
        #[arg(long, num_args = 1..)]
        vertical: Vec<PathBuf>,

        /// Panel options as JSON; flags below override it
        #[arg(long)]
        options: Option<PathBuf>,

        /// pixel or scatter
        #[arg(long, value_parser = style_arg)]
        style: Option<OverlayStyle>,
        #[arg(long, allow_negative_numbers = true)]
        vmin: Option<f32>,
        #[arg(long, allow_negative_numbers = true)]
        vmax: Option<f32>,
        #[arg(long)]
        colorbar: bool,
        #[arg(long)]
        no_dem: bool,
        /// WKT polygon bounding the shaded-relief panels
        #[arg(long)]
        polygon: Option<String>,

        /// Colour of the contour lines, by name or #rrggbb
        #[arg(long, value_parser = color_arg)]
        isoline_color: Option<Color>,
        /// Colour ramp for un-shaded relief: jet, terrain or gray
        #[arg(long, value_parser = cmap_arg)]
        relief_cmap: Option<Colormap>,
        /// Extra marker "lat,lon,kind[,label]"; kind is volcano, earthquake or gps
        #[arg(long = "location", value_parser = location_arg)]
        locations: Vec<Location>,
        /// Pixel size of each panel "WIDTHxHEIGHT"
        #[arg(long, value_parser = size_arg)]
        panel_size: Option<(u32, u32)>,

        /// Relief from this DEM instead of SRTM tiles
        #[arg(long)]
        dem: Option<PathBuf>,
        /// Mirror serving SRTM `.hgt.gz` tiles
        #[arg(long)]
        srtm_url: Option<String>,

        /// Mark this volcano and the earthquakes around it
        #[arg(long)]
        volcano: Option<String>,
        /// Start of the earthquake window; the prepared start date when unset
        #[arg(long, value_parser = date_arg)]
        eq_start: Option<NaiveDate>,

        #[command(flatten)]
        prepare: PrepareArgs,
    },
    /// Chart earthquakes around a volcano
    Earthquakes {
        volcano: String,
        #[arg(value_parser = date_arg)]
        start: NaiveDate,
        #[arg(value_parser = date_arg)]
        end: Option<NaiveDate>,
        /// Search half-width in kilometres
        #[arg(long, conflicts_with = "deg")]
        km: Option<f64>,
        /// Search half-width in degrees
        #[arg(long)]
        deg: Option<f64>,
        #[arg(long, default_value_t = 3.0)]
        magnitude: f64,
        #[arg(short, long, default_value = "earthquakes.png")]
        output: PathBuf,
    },
    /// Draw a locator globe centred on one or more "lat,lon" points
    Globe {
        #[arg(value_parser = lalo_arg, num_args = 1.., required = true)]
        points: Vec<LatLon>,
        /// Image width and height in pixels
        #[arg(long, default_value_t = 600)]
        size: u32,
        #[arg(short, long, default_value = "globe.png")]
        output: PathBuf,
    },
}

fn date_arg(s: &str) -> Result<NaiveDate, String> {
    parse_date(s).map_err(|e| e.to_string())
}

fn lalo_arg(s: &str) -> Result<LatLon, String> {
    s.parse().map_err(|e: plotdata::PlotError| e.to_string())
}

fn color_arg(s: &str) -> Result<Color, String> {
    s.parse().map_err(|e: plotdata::PlotError| e.to_string())
}

fn cmap_arg(s: &str) -> Result<Colormap, String> {
    s.parse().map_err(|e: plotdata::PlotError| e.to_string())
}

fn location_arg(s: &str) -> Result<Location, String> {
    s.parse().map_err(|e: plotdata::PlotError| e.to_string())
}

fn size_arg(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("Expected WIDTHxHEIGHT, got '{}'", s))?;
    let parse = |v: &str| v.trim().parse::<u32>().map_err(|e| format!("Invalid size '{}': {}", v, e));
    Ok((parse(w)?, parse(h)?))
}

fn plot_type_arg(s: &str) -> Result<PlotType, String> {
    s.parse().map_err(|e: plotdata::PlotError| e.to_string())
}

fn slot_arg(s: &str) -> Result<SlotKind, String> {
    s.parse().map_err(|e: plotdata::PlotError| e.to_string())
}

fn style_arg(s: &str) -> Result<OverlayStyle, String> {
    s.parse().map_err(|e: plotdata::PlotError| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();

    match cli.command {
        Commands::Prepare { plot_type, prepare } => {
            let reader = GdalRasterReader::new();
            let products = run_prepare(&prepare.config(plot_type), &prepare.toolkit(), &reader)?;
            for track in &products.tracks {
                println!("{}: {}", track.paths.track, track.masked.display());
            }
            for path in products.horizontal.iter().chain(products.vertical.iter()) {
                println!("{}", path.display());
            }
        }
        Commands::Plot {
            plot_type,
            output,
            panels,
            ascending,
            descending,
            horizontal,
            vertical,
            options,
            style,
            vmin,
            vmax,
            colorbar,
            no_dem,
            polygon,
            isoline_color,
            relief_cmap,
            locations,
            panel_size,
            dem,
            srtm_url,
            volcano,
            eq_start,
            prepare,
        } => {
            let reader = GdalRasterReader::new();

            let mut opts = match &options {
                Some(path) => PlotOptions::from_json_file(path)
                    .with_context(|| format!("reading plot options {}", path.display()))?,
                None => PlotOptions::default(),
            };
            if let Some(style) = style {
                opts.style = style;
            }
            opts.vmin = vmin.or(opts.vmin);
            opts.vmax = vmax.or(opts.vmax);
            opts.colorbar |= colorbar;
            opts.no_dem |= no_dem;
            if polygon.is_some() {
                opts.polygon = polygon;
            }
            if let Some(color) = isoline_color {
                opts.isolines.color = color;
            }
            if let Some(cmap) = relief_cmap {
                opts.relief.cmap = cmap;
            }
            opts.locations.extend(locations);

            let mut files = InputFiles::new();
            let mut prepared_start = None;
            if !prepare.data_dirs.is_empty() {
                let products = run_prepare(&prepare.config(plot_type), &prepare.toolkit(), &reader)?;
                prepared_start = products.tracks.first().map(|t| t.start_date);
                files = products.into_input_files();
            }
            for (kind, paths) in [
                (FileKind::Ascending, ascending),
                (FileKind::Descending, descending),
                (FileKind::Horizontal, horizontal),
                (FileKind::Vertical, vertical),
            ] {
                for path in paths {
                    files.push(kind, path);
                }
            }

            let relief: Rc<dyn ReliefSource> = match dem {
                Some(path) => Rc::new(GdalDemSource::new(path)),
                None => {
                    let mut tiles = SrtmTileSource::with_default_cache()?;
                    if let Some(url) = srtm_url {
                        tiles = tiles.with_base_url(url);
                    }
                    Rc::new(tiles)
                }
            };

            let earthquake = match &volcano {
                Some(name) => {
                    let Some(start) = eq_start.or(prepared_start) else {
                        bail!("--volcano needs --eq-start when no products were prepared");
                    };
                    let query = EarthquakeQuery::new(name.clone(), start);
                    let quake = Earthquake::new(query, &UsgsClient::new())?;
                    opts.locations.push(Location::new(quake.volcano(), name.clone(), LocationKind::Volcano));
                    Some(quake)
                }
                None => None,
            };

            let mut driver = PlotDriver::new(relief, &reader);
            if let Some(quake) = &earthquake {
                driver = driver.with_earthquakes(quake.records());
            }
            let mut figure = driver.run(plot_type, &panels, &mut files, &opts)?;
            if let Some((width, height)) = panel_size {
                figure = figure.with_panel_size(width, height);
            }
            figure.save_png(&output)?;
            println!("Saved {}", output.display());
        }
        Commands::Earthquakes {
            volcano,
            start,
            end,
            km,
            deg,
            magnitude,
            output,
        } => {
            let mut query = EarthquakeQuery::new(volcano, start);
            query.end = end;
            query.radius = SearchRadius::from_options(km, deg)?;
            query.min_magnitude = magnitude;

            let quake = Earthquake::new(query, &UsgsClient::new())?;
            if quake.records().is_empty() {
                log::warn!("No earthquakes found around {}", quake.volcano_name());
            }
            println!(
                "{} earthquakes of M{:.1}+ around {}",
                quake.records().len(),
                quake.min_magnitude(),
                quake.volcano_name()
            );
            for line in quake.summary_lines() {
                println!("{}", line);
            }
            quake.save_charts(&output, (1000, 800))?;
            println!("Saved {}", output.display());
        }
        Commands::Globe { points, size, output } => {
            LocatorGlobe::around(&points)?.save_png(&output, size)?;
            println!("Saved {}", output.display());
        }
    }

    Ok(())
}
