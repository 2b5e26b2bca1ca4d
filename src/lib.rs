//! plotdata: maps and earthquake charts from MintPy InSAR products
//!
//! The `prepare` stage drives the MintPy command-line tools to turn a
//! time series into geocoded, masked velocity products (and optionally a
//! horizontal/vertical decomposition). The `plot` stage composes those
//! products over shaded relief into a grid of map panels rendered to PNG.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{Color, Colormap, LatLon, LocationKind, PlotError, PlotResult, Region};

pub use io::{FileHandler, GdalRasterReader, MintpyCli, SrtmTileSource, UsgsClient};
pub use core::{run_plot, run_prepare, Figure, Mapper, PlotOptions, PlotType, PrepareConfig};
