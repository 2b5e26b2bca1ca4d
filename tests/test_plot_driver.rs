use approx::assert_relative_eq;
use ndarray::{array, Array2};
use plotdata::core::mapper::{LayerKind, OverlayStyle};
use plotdata::core::plot_driver::{FileKind, InputFiles, PlotDriver, PlotOptions, PlotType, SlotKind};
use plotdata::io::file_handler::{Metadata, RasterProduct, RasterReader};
use plotdata::io::relief::{grid_axis, ReliefGrid, ReliefSource, Resolution};
use plotdata::types::{PlotError, PlotResult, Region};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

struct MemoryReader {
    products: HashMap<PathBuf, RasterProduct>,
}

impl MemoryReader {
    fn new() -> Self {
        Self {
            products: HashMap::new(),
        }
    }

    fn with(mut self, path: &str, data: Array2<f32>) -> Self {
        let metadata = Metadata::from_pairs([("START_DATE", "20200101"), ("END_DATE", "20210101")]);
        self.products.insert(
            PathBuf::from(path),
            RasterProduct {
                data,
                metadata,
                region: region(),
            },
        );
        self
    }
}

impl RasterReader for MemoryReader {
    fn read(&self, path: &Path) -> PlotResult<RasterProduct> {
        self.products
            .get(path)
            .cloned()
            .ok_or_else(|| PlotError::InputResolution(format!("no product {}", path.display())))
    }
}

/// Elevation rising to the north-east
struct RampRelief;

impl ReliefSource for RampRelief {
    fn load(&self, region: &Region, resolution: &Resolution) -> PlotResult<ReliefGrid> {
        let lons = grid_axis(region.min_lon, region.max_lon, resolution.degrees());
        let lats = grid_axis(region.min_lat, region.max_lat, resolution.degrees());
        let values = Array2::from_shape_fn((lats.len(), lons.len()), |(i, j)| (i + j) as f32 * 50.0);
        ReliefGrid::new(*region, values)
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn region() -> Region {
    Region::new(-155.7, -155.5, 19.3, 19.5).unwrap()
}

fn reader() -> MemoryReader {
    MemoryReader::new()
        .with("asc.h5", array![[0.01, 0.02], [0.03, 0.04]])
        .with("desc.h5", array![[-0.01, -0.02], [-0.03, -0.04]])
        .with("hz.h5", array![[0.1, 0.2], [0.3, 0.4]])
        .with("up.h5", array![[1.0, 2.0], [3.0, 4.0]])
}

#[test]
fn test_horzvert_fills_two_panels_and_consumes_inputs() {
    init_logging();
    let reader = reader();
    let driver = PlotDriver::new(Rc::new(RampRelief), &reader);
    let mut files = InputFiles::new()
        .with(FileKind::Horizontal, "hz.h5")
        .with(FileKind::Vertical, "up.h5");

    let figure = driver
        .run(PlotType::Horzvert, &[], &mut files, &PlotOptions::default())
        .unwrap();

    assert_eq!(figure.len(), 2);
    assert_eq!((figure.layout.rows, figure.layout.cols), (2, 1));
    assert!(files.is_empty());
    assert_eq!(figure.panels[0].region(), &region());
}

#[test]
fn test_second_slot_without_file_is_insufficient_input() {
    init_logging();
    let reader = reader();
    let driver = PlotDriver::new(Rc::new(RampRelief), &reader);
    let mut files = InputFiles::new().with(FileKind::Horizontal, "hz.h5");

    let result = driver.run(
        PlotType::Horizontal,
        &[SlotKind::Horizontal, SlotKind::Horizontal],
        &mut files,
        &PlotOptions::default(),
    );

    match result {
        Err(PlotError::InsufficientInput { kind, .. }) => assert_eq!(kind, FileKind::Horizontal.to_string()),
        other => panic!("expected insufficient input, got {:?}", other.map(|f| f.len())),
    }
}

#[test]
fn test_scatter_overlay_has_one_point_per_cell() {
    init_logging();
    let reader = reader();
    let driver = PlotDriver::new(Rc::new(RampRelief), &reader);
    let mut files = InputFiles::new().with(FileKind::Ascending, "asc.h5");
    let options = PlotOptions {
        style: OverlayStyle::Scatter,
        no_dem: true,
        ..PlotOptions::default()
    };

    let figure = driver
        .run(PlotType::Velocity, &[SlotKind::Ascending], &mut files, &options)
        .unwrap();

    let scatter = figure.panels[0]
        .layers()
        .iter()
        .find_map(|layer| match &layer.kind {
            LayerKind::Scatter(scatter) => Some(scatter),
            _ => None,
        })
        .expect("scatter layer");

    let points: Vec<(f64, f64, f32)> = scatter.points().collect();
    assert_eq!(points.len(), 4);
    assert_relative_eq!(points[0].0, -155.7, epsilon = 1e-9);
    assert_relative_eq!(points[0].1, 19.3, epsilon = 1e-9);
    assert_relative_eq!(points[3].0, -155.5, epsilon = 1e-9);
    assert_relative_eq!(points[3].1, 19.5, epsilon = 1e-9);
    assert_relative_eq!(points[3].2, 0.04);
}

#[test]
fn test_no_dem_skips_relief_layer() {
    init_logging();
    let reader = reader();
    let driver = PlotDriver::new(Rc::new(RampRelief), &reader);
    let mut files = InputFiles::new().with(FileKind::Ascending, "asc.h5");
    let options = PlotOptions {
        no_dem: true,
        ..PlotOptions::default()
    };

    let figure = driver
        .run(PlotType::Velocity, &[SlotKind::Ascending], &mut files, &options)
        .unwrap();
    assert!(!figure.panels[0]
        .layers()
        .iter()
        .any(|layer| matches!(layer.kind, LayerKind::Relief(_))));
}

#[test]
fn test_displacement_scales_by_acquisition_window() {
    init_logging();
    let reader = reader();
    let driver = PlotDriver::new(Rc::new(RampRelief), &reader);
    let mut files = InputFiles::new().with(FileKind::Ascending, "asc.h5");

    let figure = driver
        .run(PlotType::Displacement, &[SlotKind::Ascending], &mut files, &PlotOptions::default())
        .unwrap();

    let data = figure.panels[0].data().unwrap();
    let years = 366.0 / 365.25;
    assert_relative_eq!(data[[1, 1]] as f64, 0.04 * years, epsilon = 1e-6);
}

#[test]
fn test_shaded_relief_takes_region_from_first_file() {
    init_logging();
    let reader = reader();
    let driver = PlotDriver::new(Rc::new(RampRelief), &reader);
    let mut files = InputFiles::new().with(FileKind::Descending, "desc.h5");

    let figure = driver
        .run(PlotType::ShadedRelief, &[], &mut files, &PlotOptions::default())
        .unwrap();
    assert_eq!(figure.panels[0].region(), &region());
    // peeked, not consumed
    assert_eq!(files.len(FileKind::Descending), 1);

    let mut empty = InputFiles::new();
    assert!(matches!(
        driver.run(PlotType::ShadedRelief, &[], &mut empty, &PlotOptions::default()),
        Err(PlotError::InputResolution(_))
    ));
}

#[test]
fn test_vectors_reject_mismatched_grids() {
    init_logging();
    let reader = reader().with("small_up.h5", array![[1.0]]);
    let driver = PlotDriver::new(Rc::new(RampRelief), &reader);
    let mut files = InputFiles::new()
        .with(FileKind::Horizontal, "hz.h5")
        .with(FileKind::Vertical, "small_up.h5");

    assert!(driver
        .run(PlotType::Vectors, &[], &mut files, &PlotOptions::default())
        .is_err());
}
