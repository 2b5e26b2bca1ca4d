//! I/O modules for raster products, relief, the earthquake catalog and external tools

pub mod file_handler;
pub mod relief;
pub mod catalog;
pub mod toolkit;

pub use file_handler::{FileHandler, GdalRasterReader, Metadata, RasterProduct, RasterReader};
pub use relief::{GdalDemSource, ReliefGrid, ReliefSource, Resolution, SrtmTileSource};
pub use catalog::{CatalogClient, CatalogQuery, EarthquakeRecords, UsgsClient};
pub use toolkit::{GeodesyToolkit, MintpyCli, ToolCommand};
