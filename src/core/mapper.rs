use crate::core::terrain::{contour_levels, marching_squares, ContourLine, LightSource};
use crate::io::catalog::EarthquakeRecords;
use crate::io::file_handler::FileHandler;
use crate::io::relief::{linspace, ReliefGrid, ReliefSource, Resolution};
use crate::types::{Color, Colormap, LatLon, LocationKind, MarkerStyle, PlotError, PlotResult, Region};
use indexmap::IndexMap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::str::FromStr;

/// Tolerance used when checking that several region sources agree
const REGION_TOLERANCE: f64 = 1e-9;

/// How a raster product is drawn over the map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayStyle {
    #[default]
    Pixel,
    Scatter,
}

impl FromStr for OverlayStyle {
    type Err = PlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pixel" => Ok(OverlayStyle::Pixel),
            "scatter" => Ok(OverlayStyle::Scatter),
            other => Err(PlotError::InputResolution(format!("Unknown overlay style '{}'", other))),
        }
    }
}

/// Contour line settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolineOptions {
    pub resolution: String,
    pub color: Color,
    pub linewidth: f64,
    pub levels: usize,
    pub inline: bool,
}

impl Default for IsolineOptions {
    fn default() -> Self {
        Self {
            resolution: "01m".to_string(),
            color: Color::BLACK,
            linewidth: 0.5,
            levels: 10,
            inline: false,
        }
    }
}

/// Relief background settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliefOptions {
    pub cmap: Colormap,
    pub resolution: String,
    /// Resample to a tenth of the grid spacing before drawing
    pub interpolate: bool,
    pub shade: bool,
}

impl Default for ReliefOptions {
    fn default() -> Self {
        Self {
            cmap: Colormap::Terrain,
            resolution: "01m".to_string(),
            interpolate: false,
            shade: true,
        }
    }
}

/// A labelled point to mark on a map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub point: LatLon,
    #[serde(default)]
    pub label: String,
    pub kind: LocationKind,
    #[serde(default = "Location::default_size")]
    pub size: f64,
}

impl Location {
    fn default_size() -> f64 {
        10.0
    }

    pub fn new(point: LatLon, label: impl Into<String>, kind: LocationKind) -> Self {
        Self {
            point,
            label: label.into(),
            kind,
            size: Self::default_size(),
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }
}

impl FromStr for Location {
    type Err = PlotError;

    /// Parses `"lat,lon,kind"` or `"lat,lon,kind,label"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(4, ',').map(str::trim).collect();
        if parts.len() < 3 {
            return Err(PlotError::InputResolution(format!(
                "Expected 'lat,lon,kind[,label]', got '{}'",
                s
            )));
        }
        let point: LatLon = format!("{},{}", parts[0], parts[1]).parse()?;
        let kind: LocationKind = parts[2].parse()?;
        let label = parts.get(3).copied().unwrap_or_default();
        Ok(Location::new(point, label, kind))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shading {
    /// Illumination intensity in 0..1, drawn in gray at half opacity
    Hillshade,
    /// Raw elevation through a colour ramp
    Colormap(Colormap),
}

#[derive(Debug, Clone)]
pub struct ReliefLayer {
    pub region: Region,
    pub values: Array2<f32>,
    pub shading: Shading,
}

#[derive(Debug, Clone)]
pub struct IsolineLayer {
    pub lines: Vec<ContourLine>,
    pub color: Color,
    pub linewidth: f64,
    pub inline: bool,
}

#[derive(Debug, Clone)]
pub struct RasterLayer {
    pub region: Region,
    pub values: Array2<f32>,
    pub cmap: Colormap,
    pub vmin: Option<f32>,
    pub vmax: Option<f32>,
}

/// Grid values flattened into one point per cell
#[derive(Debug, Clone)]
pub struct ScatterLayer {
    pub lons: Vec<f64>,
    pub lats: Vec<f64>,
    pub values: Vec<f32>,
    pub size: u32,
    pub cmap: Colormap,
    pub vmin: Option<f32>,
    pub vmax: Option<f32>,
}

impl ScatterLayer {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64, f32)> + '_ {
        self.lons
            .iter()
            .zip(&self.lats)
            .zip(&self.values)
            .map(|((lon, lat), v)| (*lon, *lat, *v))
    }
}

/// East-west arrow anchored at a grid point; `east` is in degrees of longitude
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arrow {
    pub origin: LatLon,
    pub east: f64,
}

#[derive(Debug, Clone)]
pub struct VectorLayer {
    pub arrows: Vec<Arrow>,
    pub color: Color,
}

#[derive(Debug, Clone)]
pub struct LocationLayer {
    pub location: Location,
    pub style: MarkerStyle,
}

#[derive(Debug, Clone)]
pub struct SectionLayer {
    pub start: LatLon,
    pub end: LatLon,
    pub color: Color,
}

#[derive(Debug, Clone)]
pub enum LayerKind {
    Relief(ReliefLayer),
    Isolines(IsolineLayer),
    Raster(RasterLayer),
    Scatter(ScatterLayer),
    Vectors(VectorLayer),
    Location(LocationLayer),
    Section(SectionLayer),
    Legend(Vec<(LocationKind, MarkerStyle)>),
}

#[derive(Debug, Clone)]
pub struct Layer {
    pub zorder: i32,
    pub kind: LayerKind,
}

/// One map panel: a region, optional raster data, and the layers drawn over it
///
/// Layers without an explicit z-order take the next value of a per-map counter
/// starting at 0, so later calls stack above earlier ones.
pub struct Mapper {
    region: Region,
    data: Option<Array2<f32>>,
    relief: Rc<dyn ReliefSource>,
    next_zorder: i32,
    location_types: IndexMap<LocationKind, MarkerStyle>,
    layers: Vec<Layer>,
    title: Option<String>,
    colorbar: bool,
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("region", &self.region)
            .field("has_data", &self.data.is_some())
            .field("next_zorder", &self.next_zorder)
            .field("layers", &self.layers.len())
            .field("title", &self.title)
            .finish()
    }
}

impl Mapper {
    /// Resolve the map region from a file, an explicit region or a WKT polygon
    ///
    /// Precedence is file, then region, then polygon. Every source given must
    /// describe the same area.
    pub fn resolve(
        file: Option<&FileHandler>,
        region: Option<Region>,
        polygon: Option<&str>,
        relief: Rc<dyn ReliefSource>,
    ) -> PlotResult<Self> {
        let mut candidates: Vec<(&str, Region)> = Vec::new();
        if let Some(file) = file {
            candidates.push(("file", file.region));
        }
        if let Some(region) = region {
            candidates.push(("region", region));
        }
        if let Some(polygon) = polygon {
            candidates.push(("polygon", Region::from_polygon(polygon)?));
        }

        let Some(&(source, resolved)) = candidates.first() else {
            return Err(PlotError::InputResolution(
                "No map region given: need a file, a region or a polygon".to_string(),
            ));
        };

        for (other, candidate) in candidates.iter().skip(1) {
            if !resolved.approx_eq(candidate, REGION_TOLERANCE) {
                return Err(PlotError::InputResolution(format!(
                    "Conflicting map regions: {} {} vs {} {}",
                    source, resolved, other, candidate
                )));
            }
        }

        log::debug!("Map region {} taken from {}", resolved, source);
        Ok(Self {
            region: resolved,
            data: file.map(|f| f.data.clone()),
            relief,
            next_zorder: 0,
            location_types: IndexMap::new(),
            layers: Vec::new(),
            title: None,
            colorbar: false,
        })
    }

    pub fn from_region(region: Region, relief: Rc<dyn ReliefSource>) -> Self {
        Self {
            region,
            data: None,
            relief,
            next_zorder: 0,
            location_types: IndexMap::new(),
            layers: Vec::new(),
            title: None,
            colorbar: false,
        }
    }

    pub fn from_file(file: &FileHandler, relief: Rc<dyn ReliefSource>) -> Self {
        let mut mapper = Self::from_region(file.region, relief);
        mapper.data = Some(file.data.clone());
        mapper
    }

    /// Replace the raster drawn by `add_file` (e.g. with a displacement grid)
    pub fn with_data(mut self, data: Array2<f32>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_colorbar(mut self, colorbar: bool) -> Self {
        self.colorbar = colorbar;
        self
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn data(&self) -> Option<&Array2<f32>> {
        self.data.as_ref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn colorbar(&self) -> bool {
        self.colorbar
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Layers in drawing order; equal z-orders keep insertion order
    pub fn layers_by_zorder(&self) -> Vec<&Layer> {
        let mut sorted: Vec<&Layer> = self.layers.iter().collect();
        sorted.sort_by_key(|layer| layer.zorder);
        sorted
    }

    pub fn location_types(&self) -> &IndexMap<LocationKind, MarkerStyle> {
        &self.location_types
    }

    /// Hand out the current counter value and advance it
    pub fn next_zorder(&mut self) -> i32 {
        let z = self.next_zorder;
        self.next_zorder += 1;
        z
    }

    fn zorder_or_next(&mut self, zorder: Option<i32>) -> i32 {
        match zorder {
            Some(z) => z,
            None => self.next_zorder(),
        }
    }

    fn push(&mut self, zorder: i32, kind: LayerKind) -> i32 {
        self.layers.push(Layer { zorder, kind });
        zorder
    }

    fn load_relief(&self, resolution: &Resolution) -> PlotResult<ReliefGrid> {
        self.relief.load(&self.region, resolution)
    }

    /// Contour lines of the relief, negative elevations treated as sea level
    pub fn add_isolines(&mut self, options: &IsolineOptions, zorder: Option<i32>) -> PlotResult<i32> {
        log::info!("Adding isolines");

        let resolution: Resolution = options.resolution.parse()?;
        let mut grid = self.load_relief(&resolution)?;
        grid.clamp_negative();

        let (min, max) = grid.min_max();
        let lons = grid.lons();
        let lats = grid.lats();
        let levels = contour_levels(min as f64, max as f64, options.levels);
        let contour = |level: f64| marching_squares(&grid.values, &lons, &lats, level);

        #[cfg(feature = "parallel")]
        let lines: Vec<ContourLine> = {
            use rayon::prelude::*;
            levels.into_par_iter().map(contour).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let lines: Vec<ContourLine> = levels.into_iter().map(contour).collect();
        log::debug!("Contoured {} levels between {} and {}", lines.len(), min, max);

        let zorder = self.zorder_or_next(zorder);
        Ok(self.push(
            zorder,
            LayerKind::Isolines(IsolineLayer {
                lines,
                color: options.color,
                linewidth: options.linewidth,
                inline: options.inline,
            }),
        ))
    }

    /// Relief background, hillshaded or colour-mapped
    pub fn add_colormap(&mut self, options: &ReliefOptions, zorder: Option<i32>) -> PlotResult<i32> {
        log::info!("Adding colormap");

        let resolution: Resolution = options.resolution.parse()?;
        let mut grid = self.load_relief(&resolution)?;

        if options.interpolate {
            let finer = resolution.interpolated();
            log::warn!(
                "Interpolating relief from {} to {}, accuracy may be lost",
                resolution,
                finer
            );
            grid = grid.resample(&self.region, finer.degrees())?;
        }

        grid.clamp_negative();

        let layer = if options.shade {
            log::info!("Shading the elevation data");
            ReliefLayer {
                region: grid.region,
                values: LightSource::default().hillshade(&grid.values, 1.5, 1.0, 1.0),
                shading: Shading::Hillshade,
            }
        } else {
            ReliefLayer {
                region: grid.region,
                values: grid.values,
                shading: Shading::Colormap(options.cmap),
            }
        };

        let zorder = self.zorder_or_next(zorder);
        Ok(self.push(zorder, LayerKind::Relief(layer)))
    }

    /// Draw the map's raster data as an image or as a point cloud
    pub fn add_file(
        &mut self,
        style: OverlayStyle,
        vmin: Option<f32>,
        vmax: Option<f32>,
        zorder: Option<i32>,
    ) -> PlotResult<i32> {
        let data = self.data.as_ref().ok_or_else(|| {
            PlotError::InputResolution("Map has no raster data to overlay".to_string())
        })?;

        let kind = match style {
            OverlayStyle::Pixel => LayerKind::Raster(RasterLayer {
                region: self.region,
                values: data.clone(),
                cmap: Colormap::Jet,
                vmin,
                vmax,
            }),
            OverlayStyle::Scatter => {
                let (rows, cols) = data.dim();
                let x = linspace(self.region.min_lon, self.region.max_lon, cols);
                let y = linspace(self.region.min_lat, self.region.max_lat, rows);

                let mut lons = Vec::with_capacity(rows * cols);
                let mut lats = Vec::with_capacity(rows * cols);
                let mut values = Vec::with_capacity(rows * cols);
                for (i, &lat) in y.iter().enumerate() {
                    for (j, &lon) in x.iter().enumerate() {
                        lons.push(lon);
                        lats.push(lat);
                        values.push(data[[i, j]]);
                    }
                }

                LayerKind::Scatter(ScatterLayer {
                    lons,
                    lats,
                    values,
                    size: 2,
                    cmap: Colormap::Jet,
                    vmin,
                    vmax,
                })
            }
        };

        let zorder = self.zorder_or_next(zorder);
        Ok(self.push(zorder, kind))
    }

    /// Marker plus label; the category's first style is kept for the legend
    pub fn add_location(&mut self, location: &Location, zorder: Option<i32>) -> i32 {
        let zorder = self.zorder_or_next(zorder);
        let style = location.kind.marker_style();
        self.location_types.entry(location.kind).or_insert(style);

        self.push(
            zorder,
            LayerKind::Location(LocationLayer {
                location: location.clone(),
                style,
            }),
        )
    }

    /// Straight trace between two points, e.g. a cross-section
    pub fn add_section(&mut self, start: LatLon, end: LatLon, color: Color, zorder: Option<i32>) -> i32 {
        let zorder = self.zorder_or_next(zorder);
        self.push(zorder, LayerKind::Section(SectionLayer { start, end, color }))
    }

    /// East-west arrows from a horizontal velocity grid covering the map region
    ///
    /// Every `step`-th row and column is kept; the longest arrow spans one
    /// decimated cell.
    pub fn add_vectors(
        &mut self,
        horizontal: &Array2<f32>,
        step: usize,
        color: Color,
        zorder: Option<i32>,
    ) -> PlotResult<i32> {
        let (rows, cols) = horizontal.dim();
        if rows == 0 || cols == 0 {
            return Err(PlotError::InputResolution("Empty horizontal grid for vectors".to_string()));
        }
        let step = step.max(1);

        let lons = linspace(self.region.min_lon, self.region.max_lon, cols);
        let lats = linspace(self.region.min_lat, self.region.max_lat, rows);
        let max_abs = horizontal
            .iter()
            .filter(|v| v.is_finite())
            .fold(0.0f32, |acc, v| acc.max(v.abs()));
        let cell = self.region.width() / cols as f64 * step as f64;

        let mut arrows = Vec::new();
        if max_abs > 0.0 {
            for i in (0..rows).step_by(step) {
                for j in (0..cols).step_by(step) {
                    let v = horizontal[[i, j]];
                    if v.is_finite() && v != 0.0 {
                        arrows.push(Arrow {
                            origin: LatLon::new(lats[i], lons[j]),
                            east: (v / max_abs) as f64 * cell,
                        });
                    }
                }
            }
        }
        log::debug!("Placed {} vectors (step {})", arrows.len(), step);

        let zorder = self.zorder_or_next(zorder);
        Ok(self.push(zorder, LayerKind::Vectors(VectorLayer { arrows, color })))
    }

    /// Catalog events as earthquake markers sized by magnitude, sharing one z-order
    pub fn add_earthquakes(&mut self, records: &EarthquakeRecords, zorder: Option<i32>) -> i32 {
        let zorder = self.zorder_or_next(zorder);
        for (_, point, magnitude) in records.iter() {
            let location = Location::new(point, "", LocationKind::Earthquake).with_size(magnitude * 2.0);
            self.add_location(&location, Some(zorder));
        }
        zorder
    }

    /// One legend entry per registered location category
    pub fn add_legend(&mut self, zorder: Option<i32>) -> i32 {
        let zorder = self.zorder_or_next(zorder);
        let entries = self
            .location_types
            .iter()
            .map(|(kind, style)| (*kind, *style))
            .collect();
        self.push(zorder, LayerKind::Legend(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarkerShape;
    use ndarray::array;

    struct SlopeRelief;

    impl ReliefSource for SlopeRelief {
        fn load(&self, region: &Region, resolution: &Resolution) -> PlotResult<ReliefGrid> {
            let lons = crate::io::relief::grid_axis(region.min_lon, region.max_lon, resolution.degrees());
            let lats = crate::io::relief::grid_axis(region.min_lat, region.max_lat, resolution.degrees());
            // sea below the southern half, land rising northwards
            let values = Array2::from_shape_fn((lats.len(), lons.len()), |(i, _)| i as f32 * 100.0 - 500.0);
            ReliefGrid::new(*region, values)
        }
    }

    fn region() -> Region {
        Region::new(-155.7, -155.5, 19.3, 19.5).unwrap()
    }

    fn mapper() -> Mapper {
        Mapper::from_region(region(), Rc::new(SlopeRelief))
    }

    #[test]
    fn test_resolve_requires_a_source() {
        let relief: Rc<dyn ReliefSource> = Rc::new(SlopeRelief);
        assert!(matches!(
            Mapper::resolve(None, None, None, relief.clone()),
            Err(PlotError::InputResolution(_))
        ));

        let polygon = "POLYGON((-155.7 19.3,-155.5 19.3,-155.5 19.5,-155.7 19.5,-155.7 19.3))";
        let agreed = Mapper::resolve(None, Some(region()), Some(polygon), relief.clone()).unwrap();
        assert_eq!(*agreed.region(), region());

        let other = "POLYGON((-155.0 19.3,-154.5 19.3,-154.5 19.5,-155.0 19.3))";
        assert!(Mapper::resolve(None, Some(region()), Some(other), relief).is_err());
    }

    #[test]
    fn test_default_zorders_increase_from_zero() {
        let mut map = mapper();
        let a = map.add_section(LatLon::new(19.3, -155.7), LatLon::new(19.5, -155.5), Color::BLACK, None);
        let b = map.add_location(&Location::new(LatLon::new(19.4, -155.6), "K", LocationKind::Volcano), None);
        let c = map.add_legend(None);
        assert_eq!((a, b, c), (0, 1, 2));
    }

    struct MissingRelief;

    impl ReliefSource for MissingRelief {
        fn load(&self, _region: &Region, resolution: &Resolution) -> PlotResult<ReliefGrid> {
            Err(PlotError::InputResolution(format!("no tiles at {}", resolution)))
        }
    }

    #[test]
    fn test_failed_relief_does_not_consume_zorder() {
        let mut map = Mapper::from_region(region(), Rc::new(MissingRelief));
        assert!(map.add_colormap(&ReliefOptions::default(), None).is_err());
        assert!(map.add_isolines(&IsolineOptions::default(), None).is_err());
        let bad = IsolineOptions {
            resolution: "1x".to_string(),
            ..IsolineOptions::default()
        };
        assert!(map.add_isolines(&bad, None).is_err());

        let z = map.add_legend(None);
        assert_eq!(z, 0);
        assert!(map.layers().iter().all(|layer| !matches!(layer.kind, LayerKind::Relief(_))));
    }

    #[test]
    fn test_location_parsing() {
        let loc: Location = "19.42, -155.29, volcano, Kilauea summit".parse().unwrap();
        assert_eq!(loc.point, LatLon::new(19.42, -155.29));
        assert_eq!(loc.kind, LocationKind::Volcano);
        assert_eq!(loc.label, "Kilauea summit");

        let unlabelled: Location = "19.4,-155.3,gps".parse().unwrap();
        assert_eq!(unlabelled.label, "");
        assert!("19.4,-155.3".parse::<Location>().is_err());
        assert!("19.4,-155.3,city".parse::<Location>().is_err());
    }

    #[test]
    fn test_explicit_zero_is_an_override() {
        let mut map = mapper();
        map.next_zorder();
        let z = map.add_section(LatLon::new(19.3, -155.7), LatLon::new(19.5, -155.5), Color::BLACK, Some(0));
        assert_eq!(z, 0);
        assert_eq!(map.next_zorder(), 1);
    }

    #[test]
    fn test_layers_sorted_by_zorder() {
        let mut map = mapper();
        map.add_section(LatLon::new(19.3, -155.7), LatLon::new(19.5, -155.5), Color::BLACK, Some(5));
        map.add_legend(None);
        let order: Vec<i32> = map.layers_by_zorder().iter().map(|l| l.zorder).collect();
        assert_eq!(order, vec![0, 5]);
    }

    #[test]
    fn test_registry_first_style_wins() {
        let mut map = mapper();
        let point = LatLon::new(19.4, -155.6);
        map.add_location(&Location::new(point, "first", LocationKind::Earthquake).with_size(4.0), None);
        map.add_location(&Location::new(point, "second", LocationKind::Earthquake).with_size(12.0), None);
        map.add_location(&Location::new(point, "Kilauea", LocationKind::Volcano), None);
        map.add_legend(None);

        assert_eq!(map.location_types().len(), 2);
        let Some(Layer { kind: LayerKind::Legend(entries), .. }) = map.layers().last() else {
            panic!("legend layer expected");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, LocationKind::Earthquake);
        assert_eq!(entries[0].1.shape, MarkerShape::Circle);
        assert_eq!(entries[1].1.shape, MarkerShape::Triangle);
    }

    #[test]
    fn test_colormap_clamps_negative_relief() {
        let mut map = mapper();
        let options = ReliefOptions {
            shade: false,
            ..Default::default()
        };
        map.add_colormap(&options, None).unwrap();
        let LayerKind::Relief(layer) = &map.layers()[0].kind else {
            panic!("relief layer expected");
        };
        assert!(layer.values.iter().all(|&v| v >= 0.0));
        assert_eq!(layer.shading, Shading::Colormap(Colormap::Terrain));
    }

    #[test]
    fn test_interpolated_relief_is_finer() {
        let mut map = mapper();
        let coarse = ReliefOptions::default();
        let fine = ReliefOptions {
            interpolate: true,
            ..Default::default()
        };
        map.add_colormap(&coarse, None).unwrap();
        map.add_colormap(&fine, None).unwrap();

        let dims: Vec<(usize, usize)> = map
            .layers()
            .iter()
            .filter_map(|l| match &l.kind {
                LayerKind::Relief(r) => Some(r.values.dim()),
                _ => None,
            })
            .collect();
        assert!(dims[1].0 > dims[0].0 && dims[1].1 > dims[0].1);
        assert_eq!(map.layers()[0].zorder, 0);
        assert_eq!(map.layers()[1].zorder, 1);
    }

    #[test]
    fn test_isolines_levels() {
        let mut map = mapper();
        let options = IsolineOptions {
            levels: 4,
            ..Default::default()
        };
        map.add_isolines(&options, None).unwrap();
        let LayerKind::Isolines(layer) = &map.layers()[0].kind else {
            panic!("isoline layer expected");
        };
        assert_eq!(layer.lines.len(), 4);
        assert!(layer.lines.iter().all(|l| !l.segments.is_empty()));
    }

    #[test]
    fn test_add_file_without_data_fails() {
        let mut map = mapper();
        assert!(map.add_file(OverlayStyle::Pixel, None, None, None).is_err());
    }

    #[test]
    fn test_vectors_decimated() {
        let mut map = mapper().with_data(Array2::zeros((4, 4)));
        let horizontal = array![
            [1.0f32, 0.5, -1.0, 2.0],
            [0.0, 0.0, 0.0, 0.0],
            [f32::NAN, 1.0, -2.0, 0.0],
            [0.0, 0.0, 0.0, 0.0]
        ];
        map.add_vectors(&horizontal, 2, Color::BLACK, None).unwrap();
        let LayerKind::Vectors(layer) = &map.layers()[0].kind else {
            panic!("vector layer expected");
        };
        // kept cells: (0,0)=1, (0,2)=-1, (2,0)=NaN, (2,2)=-2
        assert_eq!(layer.arrows.len(), 3);
        let longest = layer.arrows.iter().map(|a| a.east.abs()).fold(0.0, f64::max);
        assert!((longest - region().width() / 4.0 * 2.0).abs() < 1e-12);
    }
}
