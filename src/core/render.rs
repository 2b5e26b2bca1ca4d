use crate::core::mapper::{
    IsolineLayer, LayerKind, Mapper, RasterLayer, ReliefLayer, ScatterLayer, Shading, VectorLayer,
};
use crate::types::{Color as MapColor, Colormap, LocationKind, MarkerShape, MarkerStyle, PlotError, PlotResult, Region};
use ndarray::Array2;
use plotters::coord::cartesian::Cartesian2d;
use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::Path;

type MapChart<'a, 'b> = ChartContext<'a, BitMapBackend<'b>, Cartesian2d<RangedCoordf64, RangedCoordf64>>;
type Area<'b> = DrawingArea<BitMapBackend<'b>, Shift>;

pub(crate) fn render_error<E: std::fmt::Display>(e: E) -> PlotError {
    PlotError::Render(e.to_string())
}

fn rgb(color: MapColor) -> RGBColor {
    RGBColor(color.0, color.1, color.2)
}

/// Rows and columns of a panel grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub rows: usize,
    pub cols: usize,
}

impl GridLayout {
    /// Near-square layout: `rows = ceil(sqrt(n))`, `cols = ceil(n / rows)`
    pub fn for_count(n: usize) -> Self {
        if n == 0 {
            return Self { rows: 0, cols: 0 };
        }
        let rows = (n as f64).sqrt().ceil() as usize;
        let cols = n.div_ceil(rows);
        Self { rows, cols }
    }

    pub fn capacity(&self) -> usize {
        self.rows * self.cols
    }

    /// Row-major (row, col) position of a slot
    pub fn position(&self, slot: usize) -> (usize, usize) {
        (slot / self.cols.max(1), slot % self.cols.max(1))
    }
}

/// A grid of map panels written to one image
#[derive(Debug)]
pub struct Figure {
    pub layout: GridLayout,
    pub panels: Vec<Mapper>,
    pub panel_size: (u32, u32),
}

impl Figure {
    pub fn new(layout: GridLayout) -> Self {
        Self {
            layout,
            panels: Vec::with_capacity(layout.capacity()),
            panel_size: (640, 640),
        }
    }

    pub fn with_panel_size(mut self, width: u32, height: u32) -> Self {
        self.panel_size = (width, height);
        self
    }

    pub fn push(&mut self, panel: Mapper) {
        self.panels.push(panel);
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    /// Render every panel, row-major, to a PNG file
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> PlotResult<()> {
        let path = path.as_ref();
        let rows = self.layout.rows.max(1);
        let cols = self.layout.cols.max(1);
        let size = (self.panel_size.0 * cols as u32, self.panel_size.1 * rows as u32);
        log::info!("Rendering {} panel(s) ({}x{}) to {}", self.panels.len(), rows, cols, path.display());

        let root = BitMapBackend::new(path, size).into_drawing_area();
        root.fill(&WHITE).map_err(render_error)?;

        let areas = root.split_evenly((rows, cols));
        for (panel, area) in self.panels.iter().zip(areas.iter()) {
            draw_panel(area, panel)?;
        }

        root.present().map_err(render_error)?;
        Ok(())
    }
}

/// Colour limits: explicit values win, the rest come from the finite data range
fn color_limits(values: impl Iterator<Item = f32>, vmin: Option<f32>, vmax: Option<f32>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let lo = vmin.unwrap_or(if lo.is_finite() { lo } else { 0.0 }) as f64;
    let hi = vmax.unwrap_or(if hi.is_finite() { hi } else { 1.0 }) as f64;
    (lo, hi)
}

fn normalize(v: f64, lo: f64, hi: f64) -> f64 {
    if (hi - lo).abs() < 1e-12 {
        0.5
    } else {
        (v - lo) / (hi - lo)
    }
}

fn draw_panel(area: &Area<'_>, mapper: &Mapper) -> PlotResult<()> {
    let overlay_limits = mapper.layers().iter().find_map(|layer| match &layer.kind {
        LayerKind::Raster(r) => Some(color_limits(r.values.iter().copied(), r.vmin, r.vmax)),
        LayerKind::Scatter(s) => Some(color_limits(s.values.iter().copied(), s.vmin, s.vmax)),
        _ => None,
    });

    let (map_area, colorbar_area) = match overlay_limits {
        Some(_) if mapper.colorbar() => {
            let (w, _) = area.dim_in_pixel();
            let (left, right) = area.split_horizontally(w.saturating_sub(90) as i32);
            (left, Some(right))
        }
        _ => (area.clone(), None),
    };

    let region = *mapper.region();
    let mut builder = ChartBuilder::on(&map_area);
    builder.margin(10).x_label_area_size(30).y_label_area_size(50);
    if let Some(title) = mapper.title() {
        builder.caption(title, ("sans-serif", 18));
    }
    let mut chart = builder
        .build_cartesian_2d(region.min_lon..region.max_lon, region.min_lat..region.max_lat)
        .map_err(render_error)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(5)
        .y_labels(5)
        .x_label_formatter(&|v| format!("{:.2}", v))
        .y_label_formatter(&|v| format!("{:.2}", v))
        .label_style(("sans-serif", 12))
        .draw()
        .map_err(render_error)?;

    for layer in mapper.layers_by_zorder() {
        match &layer.kind {
            LayerKind::Relief(relief) => draw_relief(&mut chart, relief)?,
            LayerKind::Isolines(isolines) => draw_isolines(&mut chart, isolines)?,
            LayerKind::Raster(raster) => draw_raster(&mut chart, raster)?,
            LayerKind::Scatter(scatter) => draw_scatter(&mut chart, scatter)?,
            LayerKind::Vectors(vectors) => draw_vectors(&mut chart, vectors, &region)?,
            LayerKind::Location(marker) => {
                let loc = &marker.location;
                let coord = (loc.point.lon, loc.point.lat);
                draw_marker(&mut chart, coord, &marker.style, loc.size.round().max(1.0) as i32)?;
                if !loc.label.is_empty() {
                    let style = ("sans-serif", 11).into_font().color(&rgb(marker.style.color));
                    chart
                        .draw_series(std::iter::once(Text::new(loc.label.clone(), coord, style)))
                        .map_err(render_error)?;
                }
            }
            LayerKind::Section(section) => {
                let line = vec![
                    (section.start.lon, section.start.lat),
                    (section.end.lon, section.end.lat),
                ];
                chart
                    .draw_series(std::iter::once(PathElement::new(
                        line,
                        rgb(section.color).mix(0.7).stroke_width(2),
                    )))
                    .map_err(render_error)?;
            }
            LayerKind::Legend(entries) => draw_legend(&mut chart, entries, &region)?,
        }
    }

    if let (Some(cb_area), Some((lo, hi))) = (colorbar_area, overlay_limits) {
        draw_colorbar(&cb_area, lo, hi)?;
    }

    Ok(())
}

/// How grid values relate to the region they are drawn over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    /// Values are cells; the region spans the outer cell edges
    Pixel,
    /// Values are nodes; the region spans the outer nodes
    Gridline,
}

/// Extent along one axis of cell `index` out of `count`, clipped to `min..max`
fn cell_span(index: usize, count: usize, min: f64, max: f64, registration: Registration) -> (f64, f64) {
    match registration {
        Registration::Pixel => {
            let d = (max - min) / count as f64;
            (min + index as f64 * d, min + (index + 1) as f64 * d)
        }
        Registration::Gridline if count < 2 => (min, max),
        Registration::Gridline => {
            let d = (max - min) / (count - 1) as f64;
            let node = min + index as f64 * d;
            ((node - d / 2.0).max(min), (node + d / 2.0).min(max))
        }
    }
}

/// Cells of a south-row-first grid laid over `region`
fn cell_rectangles<'g, F>(
    values: &'g Array2<f32>,
    region: Region,
    registration: Registration,
    style_of: F,
) -> impl Iterator<Item = Rectangle<(f64, f64)>> + 'g
where
    F: Fn(f32) -> Option<ShapeStyle> + 'g,
{
    let (rows, cols) = values.dim();
    values.indexed_iter().filter_map(move |((i, j), &v)| {
        let style = style_of(v)?;
        let (x0, x1) = cell_span(j, cols, region.min_lon, region.max_lon, registration);
        let (y0, y1) = cell_span(i, rows, region.min_lat, region.max_lat, registration);
        Some(Rectangle::new([(x0, y0), (x1, y1)], style))
    })
}

fn draw_relief(chart: &mut MapChart<'_, '_>, relief: &ReliefLayer) -> PlotResult<()> {
    match relief.shading {
        Shading::Hillshade => {
            let cells = cell_rectangles(&relief.values, relief.region, Registration::Gridline, |v| {
                let level = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
                Some(RGBColor(level, level, level).mix(0.5).filled())
            });
            chart.draw_series(cells).map_err(render_error)?;
        }
        Shading::Colormap(cmap) => {
            let (lo, hi) = color_limits(relief.values.iter().copied(), None, None);
            let cells = cell_rectangles(&relief.values, relief.region, Registration::Gridline, move |v| {
                v.is_finite()
                    .then(|| rgb(cmap.sample(normalize(v as f64, lo, hi))).filled())
            });
            chart.draw_series(cells).map_err(render_error)?;
        }
    }
    Ok(())
}

fn draw_raster(chart: &mut MapChart<'_, '_>, raster: &RasterLayer) -> PlotResult<()> {
    let (lo, hi) = color_limits(raster.values.iter().copied(), raster.vmin, raster.vmax);
    let cmap = raster.cmap;
    let cells = cell_rectangles(&raster.values, raster.region, Registration::Pixel, move |v| {
        v.is_finite()
            .then(|| rgb(cmap.sample(normalize(v as f64, lo, hi))).filled())
    });
    chart.draw_series(cells).map_err(render_error)?;
    Ok(())
}

fn draw_scatter(chart: &mut MapChart<'_, '_>, scatter: &ScatterLayer) -> PlotResult<()> {
    let (lo, hi) = color_limits(scatter.values.iter().copied(), scatter.vmin, scatter.vmax);
    let size = scatter.size as i32;
    let cmap = scatter.cmap;
    let points = scatter.points().filter(|(_, _, v)| v.is_finite()).map(|(lon, lat, v)| {
        let color = rgb(cmap.sample(normalize(v as f64, lo, hi)));
        Circle::new((lon, lat), size, color.filled())
    });
    chart.draw_series(points).map_err(render_error)?;
    Ok(())
}

fn draw_isolines(chart: &mut MapChart<'_, '_>, isolines: &IsolineLayer) -> PlotResult<()> {
    let width = (isolines.linewidth * 2.0).round().max(1.0) as u32;
    let style = rgb(isolines.color).stroke_width(width);
    for line in &isolines.lines {
        let segments = line
            .segments
            .iter()
            .map(|&(a, b)| PathElement::new(vec![a, b], style));
        chart.draw_series(segments).map_err(render_error)?;

        if isolines.inline {
            if let Some(&((x0, y0), (x1, y1))) = line.segments.get(line.segments.len() / 2) {
                let label = Text::new(
                    format!("{:.0}", line.level),
                    ((x0 + x1) / 2.0, (y0 + y1) / 2.0),
                    ("sans-serif", 8).into_font().color(&rgb(isolines.color)),
                );
                chart.draw_series(std::iter::once(label)).map_err(render_error)?;
            }
        }
    }
    Ok(())
}

fn draw_vectors(chart: &mut MapChart<'_, '_>, vectors: &VectorLayer, region: &Region) -> PlotResult<()> {
    let style = rgb(vectors.color).stroke_width(1);
    let head = region.height() * 0.01;
    let arrows = vectors.arrows.iter().flat_map(|arrow| {
        let (x0, y0) = (arrow.origin.lon, arrow.origin.lat);
        let tip = x0 + arrow.east;
        let back = tip - arrow.east.signum() * head;
        [
            PathElement::new(vec![(x0, y0), (tip, y0)], style),
            PathElement::new(vec![(back, y0 + head), (tip, y0), (back, y0 - head)], style),
        ]
    });
    chart.draw_series(arrows).map_err(render_error)?;
    Ok(())
}

fn draw_marker(chart: &mut MapChart<'_, '_>, coord: (f64, f64), style: &MarkerStyle, size: i32) -> PlotResult<()> {
    let color = rgb(style.color).mix(style.alpha).filled();
    match style.shape {
        MarkerShape::Circle => chart
            .draw_series(std::iter::once(Circle::new(coord, size, color)))
            .map_err(render_error)?,
        MarkerShape::Triangle => chart
            .draw_series(std::iter::once(TriangleMarker::new(coord, size, color)))
            .map_err(render_error)?,
    };
    Ok(())
}

/// Boxed legend in the upper right corner
fn draw_legend(
    chart: &mut MapChart<'_, '_>,
    entries: &[(LocationKind, MarkerStyle)],
    region: &Region,
) -> PlotResult<()> {
    if entries.is_empty() {
        return Ok(());
    }

    let row = region.height() * 0.06;
    let x1 = region.max_lon - region.width() * 0.02;
    let x0 = x1 - region.width() * 0.28;
    let y1 = region.max_lat - region.height() * 0.02;
    let y0 = y1 - row * entries.len() as f64 - row * 0.5;

    chart
        .draw_series([
            Rectangle::new([(x0, y0), (x1, y1)], WHITE.mix(0.8).filled()),
            Rectangle::new([(x0, y0), (x1, y1)], BLACK.stroke_width(1)),
        ])
        .map_err(render_error)?;

    for (k, (kind, style)) in entries.iter().enumerate() {
        let y = y1 - row * (k as f64 + 0.75);
        let marker_x = x0 + region.width() * 0.04;
        draw_marker(chart, (marker_x, y), style, 5)?;
        chart
            .draw_series(std::iter::once(Text::new(
                kind.to_string(),
                (marker_x + region.width() * 0.04, y + row * 0.25),
                ("sans-serif", 12).into_font(),
            )))
            .map_err(render_error)?;
    }
    Ok(())
}

fn draw_colorbar(area: &Area<'_>, lo: f64, hi: f64) -> PlotResult<()> {
    let (lo, hi) = if (hi - lo).abs() < 1e-12 { (lo, lo + 1e-12) } else { (lo, hi) };
    let mut chart = ChartBuilder::on(area)
        .margin_top(20)
        .margin_bottom(40)
        .margin_right(10)
        .set_label_area_size(LabelAreaPosition::Left, 55)
        .build_cartesian_2d(0.0..1.0, lo..hi)
        .map_err(render_error)?;

    chart
        .configure_mesh()
        .disable_x_axis()
        .disable_mesh()
        .y_label_formatter(&|v| format!("{:.3}", v))
        .label_style(("sans-serif", 11))
        .draw()
        .map_err(render_error)?;

    let steps = 128;
    let delta = (hi - lo) / steps as f64;
    let bands = (0..steps).map(|k| {
        let v0 = lo + delta * k as f64;
        let color = rgb(Colormap::Jet.sample((k as f64 + 0.5) / steps as f64));
        Rectangle::new([(0.0, v0), (1.0, v0 + delta)], color.filled())
    });
    chart.draw_series(bands).map_err(render_error)?;
    Ok(())
}
