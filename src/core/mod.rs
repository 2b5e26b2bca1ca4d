//! Map composition, earthquake analysis and product preparation

pub mod terrain;
pub mod mapper;
pub mod render;
pub mod globe;
pub mod volcanoes;
pub mod earthquake;
pub mod plot_driver;
pub mod prepare;

// Re-export main types
pub use terrain::{contour_levels, marching_squares, ContourLine, LightSource};
pub use mapper::{IsolineOptions, Layer, LayerKind, Location, Mapper, OverlayStyle, ReliefOptions};
pub use render::{Figure, GridLayout};
pub use globe::LocatorGlobe;
pub use earthquake::{Earthquake, EarthquakeQuery, SearchRadius};
pub use plot_driver::{run_plot, FileKind, InputFiles, PlotDriver, PlotOptions, PlotType, SlotKind};
pub use prepare::{run_prepare, PrepareConfig, PreparedProducts, ProjectPaths};
