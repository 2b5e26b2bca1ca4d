use crate::core::mapper::{IsolineOptions, Location, Mapper, OverlayStyle, ReliefOptions};
use crate::core::render::{Figure, GridLayout};
use crate::io::catalog::EarthquakeRecords;
use crate::io::file_handler::{FileHandler, RasterReader};
use crate::io::relief::ReliefSource;
use crate::types::{Color, LatLon, PlotError, PlotResult, Region};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::str::FromStr;

/// Figure kinds the driver can compose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotType {
    Velocity,
    Displacement,
    Horzvert,
    Horizontal,
    Vertical,
    ShadedRelief,
    Vectors,
}

impl PlotType {
    /// Panels drawn when the caller gives no explicit worklist
    pub fn default_worklist(&self) -> Vec<SlotKind> {
        match self {
            PlotType::Velocity | PlotType::Displacement => vec![SlotKind::Ascending, SlotKind::Descending],
            PlotType::Horzvert => vec![SlotKind::Horizontal, SlotKind::Vertical],
            PlotType::Horizontal => vec![SlotKind::Horizontal],
            PlotType::Vertical => vec![SlotKind::Vertical],
            PlotType::ShadedRelief => vec![SlotKind::ShadedRelief],
            PlotType::Vectors => vec![SlotKind::Vectors],
        }
    }

    /// Whether the plot needs the horizontal/vertical decomposition products
    pub fn needs_decomposition(&self) -> bool {
        matches!(
            self,
            PlotType::Horzvert | PlotType::Horizontal | PlotType::Vertical | PlotType::Vectors
        )
    }
}

impl fmt::Display for PlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlotType::Velocity => "velocity",
            PlotType::Displacement => "displacement",
            PlotType::Horzvert => "horzvert",
            PlotType::Horizontal => "horizontal",
            PlotType::Vertical => "vertical",
            PlotType::ShadedRelief => "shaded_relief",
            PlotType::Vectors => "vectors",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for PlotType {
    type Err = PlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "velocity" => Ok(PlotType::Velocity),
            "displacement" => Ok(PlotType::Displacement),
            "horzvert" => Ok(PlotType::Horzvert),
            "horizontal" => Ok(PlotType::Horizontal),
            "vertical" => Ok(PlotType::Vertical),
            "shaded_relief" => Ok(PlotType::ShadedRelief),
            "vectors" => Ok(PlotType::Vectors),
            other => Err(PlotError::InputResolution(format!("Unknown plot type '{}'", other))),
        }
    }
}

/// Category of input file held by [`InputFiles`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Ascending,
    Descending,
    Horizontal,
    Vertical,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileKind::Ascending => "ascending",
            FileKind::Descending => "descending",
            FileKind::Horizontal => "horizontal",
            FileKind::Vertical => "vertical",
        };
        write!(f, "{}", name)
    }
}

/// What one panel of the figure shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Ascending,
    Descending,
    Horizontal,
    Vertical,
    ShadedRelief,
    Vectors,
}

impl SlotKind {
    /// File category a data slot consumes; `None` for relief and vector slots
    pub fn file_kind(&self) -> Option<FileKind> {
        match self {
            SlotKind::Ascending => Some(FileKind::Ascending),
            SlotKind::Descending => Some(FileKind::Descending),
            SlotKind::Horizontal => Some(FileKind::Horizontal),
            SlotKind::Vertical => Some(FileKind::Vertical),
            SlotKind::ShadedRelief | SlotKind::Vectors => None,
        }
    }
}

impl FromStr for SlotKind {
    type Err = PlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "ascending" => Ok(SlotKind::Ascending),
            "descending" => Ok(SlotKind::Descending),
            "horizontal" => Ok(SlotKind::Horizontal),
            "vertical" => Ok(SlotKind::Vertical),
            "shaded_relief" => Ok(SlotKind::ShadedRelief),
            "vectors" => Ok(SlotKind::Vectors),
            other => Err(PlotError::InputResolution(format!("Unknown panel kind '{}'", other))),
        }
    }
}

/// Input files per category; each file is handed out once
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputFiles {
    ascending: VecDeque<PathBuf>,
    descending: VecDeque<PathBuf>,
    horizontal: VecDeque<PathBuf>,
    vertical: VecDeque<PathBuf>,
    taken: [usize; 4],
}

impl InputFiles {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(kind: FileKind) -> usize {
        match kind {
            FileKind::Ascending => 0,
            FileKind::Descending => 1,
            FileKind::Horizontal => 2,
            FileKind::Vertical => 3,
        }
    }

    fn list(&self, kind: FileKind) -> &VecDeque<PathBuf> {
        match kind {
            FileKind::Ascending => &self.ascending,
            FileKind::Descending => &self.descending,
            FileKind::Horizontal => &self.horizontal,
            FileKind::Vertical => &self.vertical,
        }
    }

    fn list_mut(&mut self, kind: FileKind) -> &mut VecDeque<PathBuf> {
        match kind {
            FileKind::Ascending => &mut self.ascending,
            FileKind::Descending => &mut self.descending,
            FileKind::Horizontal => &mut self.horizontal,
            FileKind::Vertical => &mut self.vertical,
        }
    }

    pub fn push<P: AsRef<Path>>(&mut self, kind: FileKind, path: P) {
        self.list_mut(kind).push_back(path.as_ref().to_path_buf());
    }

    pub fn with<P: AsRef<Path>>(mut self, kind: FileKind, path: P) -> Self {
        self.push(kind, path);
        self
    }

    pub fn len(&self, kind: FileKind) -> usize {
        self.list(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        self.ascending.is_empty()
            && self.descending.is_empty()
            && self.horizontal.is_empty()
            && self.vertical.is_empty()
    }

    /// Remove and return the next file of a category
    pub fn take(&mut self, kind: FileKind) -> PlotResult<PathBuf> {
        let slot = Self::index(kind);
        self.taken[slot] += 1;
        let requested = self.taken[slot];
        self.list_mut(kind)
            .pop_front()
            .ok_or_else(|| PlotError::InsufficientInput {
                kind: kind.to_string(),
                requested,
            })
    }

    /// Next file of any category without consuming it
    pub fn peek(&self) -> Option<&Path> {
        [
            FileKind::Ascending,
            FileKind::Descending,
            FileKind::Horizontal,
            FileKind::Vertical,
        ]
        .iter()
        .find_map(|kind| self.list(*kind).front())
        .map(PathBuf::as_path)
    }
}

/// Straight cross-section trace drawn on data maps
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectionLine {
    pub start: LatLon,
    pub end: LatLon,
}

/// Everything that shapes the panels besides the input files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotOptions {
    pub style: OverlayStyle,
    pub vmin: Option<f32>,
    pub vmax: Option<f32>,
    /// Skip the relief background on data maps
    pub no_dem: bool,
    pub relief: ReliefOptions,
    pub isolines: IsolineOptions,
    pub region: Option<Region>,
    pub polygon: Option<String>,
    pub section: Option<SectionLine>,
    pub locations: Vec<Location>,
    pub colorbar: bool,
    /// Keep every n-th row and column for vector arrows
    pub vector_step: usize,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            style: OverlayStyle::Pixel,
            vmin: None,
            vmax: None,
            no_dem: false,
            relief: ReliefOptions::default(),
            isolines: IsolineOptions::default(),
            region: None,
            polygon: None,
            section: None,
            locations: Vec::new(),
            colorbar: false,
            vector_step: 5,
        }
    }
}

impl PlotOptions {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> PlotResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Composes figures from input files, a relief source and a raster reader
pub struct PlotDriver<'a> {
    relief: Rc<dyn ReliefSource>,
    reader: &'a dyn RasterReader,
    earthquakes: Option<&'a EarthquakeRecords>,
}

impl<'a> PlotDriver<'a> {
    pub fn new(relief: Rc<dyn ReliefSource>, reader: &'a dyn RasterReader) -> Self {
        Self {
            relief,
            reader,
            earthquakes: None,
        }
    }

    /// Mark these events on every data map
    pub fn with_earthquakes(mut self, records: &'a EarthquakeRecords) -> Self {
        self.earthquakes = Some(records);
        self
    }

    /// Build one panel per worklist entry, row-major on a near-square grid
    ///
    /// An empty worklist falls back to the plot type's default panels. Files are
    /// consumed from `files` as the panels need them.
    pub fn run(
        &self,
        plot_type: PlotType,
        worklist: &[SlotKind],
        files: &mut InputFiles,
        options: &PlotOptions,
    ) -> PlotResult<Figure> {
        let worklist = if worklist.is_empty() {
            plot_type.default_worklist()
        } else {
            worklist.to_vec()
        };

        let layout = GridLayout::for_count(worklist.len());
        log::info!(
            "Plotting {} with {} panel(s) on a {}x{} grid",
            plot_type,
            worklist.len(),
            layout.rows,
            layout.cols
        );

        let mut figure = Figure::new(layout);
        for (index, slot) in worklist.iter().enumerate() {
            log::debug!("Panel {} at {:?}: {:?}", index, layout.position(index), slot);
            let panel = match slot {
                SlotKind::ShadedRelief => self.shaded_relief(files, options)?,
                SlotKind::Vectors => self.vectors(files, options)?,
                data_slot => {
                    let kind = data_slot.file_kind().ok_or_else(|| {
                        PlotError::InputResolution(format!("Panel {:?} has no data file", data_slot))
                    })?;
                    self.data_map(plot_type, kind, files, options)?
                }
            };
            figure.push(panel);
        }

        Ok(figure)
    }

    fn open(&self, path: &Path) -> PlotResult<FileHandler> {
        FileHandler::open(path, self.reader)
    }

    fn data_map(
        &self,
        plot_type: PlotType,
        kind: FileKind,
        files: &mut InputFiles,
        options: &PlotOptions,
    ) -> PlotResult<Mapper> {
        let path = files.take(kind)?;
        let file = self.open(&path)?;
        let mut mapper = Mapper::from_file(&file, self.relief.clone())
            .with_title(format!("{} {}", kind, file.file_name()))
            .with_colorbar(options.colorbar);

        if plot_type == PlotType::Displacement {
            log::info!(
                "Converting {} to displacement over {:.2} years",
                file.file_name(),
                file.span_years()
            );
            mapper = mapper.with_data(file.displacement());
        }

        if !options.no_dem {
            mapper.add_colormap(&options.relief, None)?;
        }
        mapper.add_file(options.style, options.vmin, options.vmax, None)?;
        if options.isolines.levels > 0 {
            mapper.add_isolines(&options.isolines, None)?;
        }
        self.annotate(&mut mapper, options, true);

        Ok(mapper)
    }

    fn vectors(&self, files: &mut InputFiles, options: &PlotOptions) -> PlotResult<Mapper> {
        let horizontal = self.open(&files.take(FileKind::Horizontal)?)?;
        let vertical = self.open(&files.take(FileKind::Vertical)?)?;
        if horizontal.data.dim() != vertical.data.dim() {
            return Err(PlotError::InputResolution(format!(
                "Horizontal {:?} and vertical {:?} grids differ in size",
                horizontal.data.dim(),
                vertical.data.dim()
            )));
        }

        let mut mapper = Mapper::from_file(&vertical, self.relief.clone())
            .with_title(format!("vectors {}", horizontal.file_name()))
            .with_colorbar(options.colorbar);

        if !options.no_dem {
            mapper.add_colormap(&options.relief, None)?;
        }
        mapper.add_file(options.style, options.vmin, options.vmax, None)?;
        mapper.add_vectors(&horizontal.data, options.vector_step, Color::BLACK, None)?;
        if options.isolines.levels > 0 {
            mapper.add_isolines(&options.isolines, None)?;
        }
        self.annotate(&mut mapper, options, true);

        Ok(mapper)
    }

    fn shaded_relief(&self, files: &InputFiles, options: &PlotOptions) -> PlotResult<Mapper> {
        let mut mapper = if options.region.is_some() || options.polygon.is_some() {
            Mapper::resolve(None, options.region, options.polygon.as_deref(), self.relief.clone())?
        } else if let Some(path) = files.peek() {
            log::debug!("Shaded relief takes its region from {}", path.display());
            let region = self.reader.read(path)?.region;
            Mapper::from_region(region, self.relief.clone())
        } else {
            return Err(PlotError::InputResolution(
                "Shaded relief needs a region, a polygon or an input file".to_string(),
            ));
        };
        mapper = mapper.with_title("shaded relief");

        mapper.add_colormap(&options.relief, None)?;
        if options.isolines.levels > 0 {
            mapper.add_isolines(&options.isolines, None)?;
        }
        self.annotate(&mut mapper, options, false);

        Ok(mapper)
    }

    /// Section line, locations, earthquakes and the legend
    fn annotate(&self, mapper: &mut Mapper, options: &PlotOptions, with_earthquakes: bool) {
        if let Some(section) = options.section {
            mapper.add_section(section.start, section.end, Color::BLACK, None);
        }
        for location in &options.locations {
            mapper.add_location(location, None);
        }
        if let (true, Some(records)) = (with_earthquakes, self.earthquakes) {
            mapper.add_earthquakes(records, None);
        }
        if !mapper.location_types().is_empty() {
            mapper.add_legend(None);
        }
    }
}

/// Compose a figure with the plot type's default panels
pub fn run_plot(
    plot_type: PlotType,
    files: &mut InputFiles,
    options: &PlotOptions,
    relief: Rc<dyn ReliefSource>,
    reader: &dyn RasterReader,
) -> PlotResult<Figure> {
    PlotDriver::new(relief, reader).run(plot_type, &[], files, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plot_type_parsing() {
        assert_eq!("shaded-relief".parse::<PlotType>().unwrap(), PlotType::ShadedRelief);
        assert_eq!("HORZVERT".parse::<PlotType>().unwrap(), PlotType::Horzvert);
        assert!("timeseries".parse::<PlotType>().is_err());
        assert_eq!(PlotType::ShadedRelief.to_string(), "shaded_relief");
    }

    #[test]
    fn test_default_worklists() {
        assert_eq!(
            PlotType::Velocity.default_worklist(),
            vec![SlotKind::Ascending, SlotKind::Descending]
        );
        assert_eq!(
            PlotType::Horzvert.default_worklist(),
            vec![SlotKind::Horizontal, SlotKind::Vertical]
        );
        assert!(PlotType::Vectors.needs_decomposition());
        assert!(!PlotType::Velocity.needs_decomposition());
    }

    #[test]
    fn test_take_pops_once() {
        let mut files = InputFiles::new()
            .with(FileKind::Horizontal, "hz.h5")
            .with(FileKind::Vertical, "up.h5");
        assert_eq!(files.peek(), Some(Path::new("hz.h5")));
        assert_eq!(files.take(FileKind::Horizontal).unwrap(), PathBuf::from("hz.h5"));
        assert_eq!(files.len(FileKind::Horizontal), 0);

        match files.take(FileKind::Horizontal) {
            Err(PlotError::InsufficientInput { kind, requested }) => {
                assert_eq!(kind, "horizontal");
                assert_eq!(requested, 2);
            }
            other => panic!("expected InsufficientInput, got {:?}", other),
        }
        assert!(!files.is_empty());
    }

    #[test]
    fn test_options_from_json() {
        let json = r#"{"style": "scatter", "vmin": -0.5, "no_dem": true, "isolines": {"levels": 0}}"#;
        let options: PlotOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.style, OverlayStyle::Scatter);
        assert_eq!(options.vmin, Some(-0.5));
        assert!(options.no_dem);
        assert_eq!(options.isolines.levels, 0);
        assert_eq!(options.isolines.resolution, "01m");
        assert_eq!(options.vector_step, 5);
    }
}
