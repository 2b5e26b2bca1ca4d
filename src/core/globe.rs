use crate::core::render::render_error;
use crate::types::{LatLon, PlotError, PlotResult};
use plotters::prelude::*;
use std::path::Path;

/// Orthographic locator globe centred on a point of interest.
///
/// Draws the limb, a graticule and a triangle at the centre. There is no
/// shoreline dataset in the crate, so coastlines are not drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatorGlobe {
    pub centre: LatLon,
    /// Graticule spacing in degrees
    pub spacing: f64,
    /// Marker size in pixels
    pub marker_size: i32,
}

impl LocatorGlobe {
    pub fn new(centre: LatLon) -> Self {
        Self {
            centre,
            spacing: 30.0,
            marker_size: 12,
        }
    }

    /// Globe centred on the mean position of `points`
    pub fn around(points: &[LatLon]) -> PlotResult<Self> {
        if points.is_empty() {
            return Err(PlotError::InsufficientInput {
                kind: "globe point".to_string(),
                requested: 1,
            });
        }
        let n = points.len() as f64;
        let lat = points.iter().map(|p| p.lat).sum::<f64>() / n;
        let lon = points.iter().map(|p| p.lon).sum::<f64>() / n;
        Ok(Self::new(LatLon::new(lat, lon)))
    }

    pub fn with_marker_size(mut self, size: i32) -> Self {
        self.marker_size = size;
        self
    }

    /// Unit-disc coordinates of a point; `None` on the far hemisphere
    pub fn project(&self, point: LatLon) -> Option<(f64, f64)> {
        let (lat0, lon0) = (self.centre.lat.to_radians(), self.centre.lon.to_radians());
        let (lat, lon) = (point.lat.to_radians(), point.lon.to_radians());
        let dlon = lon - lon0;

        let cos_c = lat0.sin() * lat.sin() + lat0.cos() * lat.cos() * dlon.cos();
        if cos_c < 0.0 {
            return None;
        }
        let x = lat.cos() * dlon.sin();
        let y = lat0.cos() * lat.sin() - lat0.sin() * lat.cos() * dlon.cos();
        Some((x, y))
    }

    /// Visible stretches of parallels and meridians
    pub fn graticule(&self) -> Vec<Vec<(f64, f64)>> {
        let mut lines = Vec::new();
        let spacing = self.spacing.max(1.0);

        let mut lat = -90.0 + spacing;
        while lat < 90.0 - 1e-9 {
            let parallel: Vec<LatLon> = (0..=360).map(|k| LatLon::new(lat, -180.0 + k as f64)).collect();
            self.visible_runs(&parallel, &mut lines);
            lat += spacing;
        }

        let mut lon = -180.0;
        while lon < 180.0 - 1e-9 {
            let meridian: Vec<LatLon> = (0..=180).map(|k| LatLon::new(-90.0 + k as f64, lon)).collect();
            self.visible_runs(&meridian, &mut lines);
            lon += spacing;
        }
        lines
    }

    fn visible_runs(&self, points: &[LatLon], lines: &mut Vec<Vec<(f64, f64)>>) {
        let mut run = Vec::new();
        for &point in points {
            match self.project(point) {
                Some(xy) => run.push(xy),
                None => {
                    if run.len() > 1 {
                        lines.push(std::mem::take(&mut run));
                    }
                    run.clear();
                }
            }
        }
        if run.len() > 1 {
            lines.push(run);
        }
    }

    /// Square PNG of `size` pixels
    pub fn save_png<P: AsRef<Path>>(&self, path: P, size: u32) -> PlotResult<()> {
        let path = path.as_ref();
        log::info!(
            "Rendering locator globe at ({:.3}, {:.3}) to {}",
            self.centre.lat,
            self.centre.lon,
            path.display()
        );

        let root = BitMapBackend::new(path, (size, size)).into_drawing_area();
        root.fill(&WHITE).map_err(render_error)?;

        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .build_cartesian_2d(-1.02f64..1.02f64, -1.02f64..1.02f64)
            .map_err(render_error)?;

        chart
            .draw_series(
                self.graticule()
                    .into_iter()
                    .map(|line| PathElement::new(line, RGBColor(170, 170, 170).stroke_width(1))),
            )
            .map_err(render_error)?;

        let limb: Vec<(f64, f64)> = (0..=360)
            .map(|k| {
                let a = (k as f64).to_radians();
                (a.cos(), a.sin())
            })
            .collect();
        chart
            .draw_series(std::iter::once(PathElement::new(limb, BLACK.stroke_width(2))))
            .map_err(render_error)?;

        chart
            .draw_series([
                TriangleMarker::new((0.0, 0.0), self.marker_size, RED.filled()),
                TriangleMarker::new((0.0, 0.0), self.marker_size, BLACK.stroke_width(1)),
            ])
            .map_err(render_error)?;

        root.present().map_err(render_error)?;
        Ok(())
    }
}
