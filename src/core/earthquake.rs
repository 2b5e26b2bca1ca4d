use crate::core::volcanoes;
use crate::io::catalog::{parse_feature_collection, CatalogClient, CatalogQuery, EarthquakeRecords};
use crate::types::{LatLon, PlotError, PlotResult, Region};
use chrono::{Duration, Local, NaiveDate};
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Mean Earth radius used for great-circle distances
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres per degree of latitude
pub const KM_PER_DEGREE: f64 = 111.32;

/// Half-size of the search box around the volcano
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchRadius {
    Kilometers(f64),
    Degrees(f64),
}

impl Default for SearchRadius {
    fn default() -> Self {
        SearchRadius::Kilometers(20.0)
    }
}

impl SearchRadius {
    /// Pick the radius from the two mutually exclusive knobs, 20 km when neither is set
    pub fn from_options(distance_km: Option<f64>, distance_deg: Option<f64>) -> PlotResult<Self> {
        let radius = match (distance_km, distance_deg) {
            (Some(_), Some(_)) => {
                return Err(PlotError::InputResolution(
                    "Give the search distance in kilometres or in degrees, not both".to_string(),
                ))
            }
            (Some(km), None) => SearchRadius::Kilometers(km),
            (None, Some(deg)) => SearchRadius::Degrees(deg),
            (None, None) => SearchRadius::default(),
        };

        match radius {
            SearchRadius::Kilometers(v) | SearchRadius::Degrees(v) if !(v > 0.0) => Err(
                PlotError::InputResolution(format!("Search distance must be positive, got {}", v)),
            ),
            _ => Ok(radius),
        }
    }

    /// (half latitude, half longitude) extent in degrees at the given latitude
    pub fn half_extent(&self, lat: f64) -> (f64, f64) {
        match *self {
            SearchRadius::Degrees(deg) => (deg, deg),
            SearchRadius::Kilometers(km) => {
                let cos_lat = lat.to_radians().cos().abs().max(1e-6);
                (km / KM_PER_DEGREE, km / (KM_PER_DEGREE * cos_lat))
            }
        }
    }
}

/// Parse an 8-digit `YYYYMMDD` date
pub fn parse_date(value: &str) -> PlotResult<NaiveDate> {
    let value = value.trim();
    if value.len() != 8 || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(PlotError::InputResolution(format!(
            "Expected a YYYYMMDD date, got '{}'",
            value
        )));
    }
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .map_err(|e| PlotError::InputResolution(format!("Invalid date '{}': {}", value, e)))
}

/// Box centred on `center` spanning the search radius
pub fn search_region(center: LatLon, radius: &SearchRadius) -> PlotResult<Region> {
    let (half_lat, half_lon) = radius.half_extent(center.lat);
    Region::around(center, half_lat, half_lon)
}

/// Great-circle distance in kilometres (haversine)
pub fn haversine_km(a: LatLon, b: LatLon) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Upper bound of the distance axis: largest distance plus 5%
pub fn distance_axis_limit(distances: &[f64]) -> f64 {
    let max = distances.iter().cloned().fold(0.0, f64::max);
    if max > 0.0 {
        max * 1.05
    } else {
        1.0
    }
}

/// What to ask the catalog for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarthquakeQuery {
    pub volcano: String,
    pub start: NaiveDate,
    /// Today when unset
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub radius: SearchRadius,
    #[serde(default = "EarthquakeQuery::default_magnitude")]
    pub min_magnitude: f64,
}

impl EarthquakeQuery {
    fn default_magnitude() -> f64 {
        3.0
    }

    pub fn new(volcano: impl Into<String>, start: NaiveDate) -> Self {
        Self {
            volcano: volcano.into(),
            start,
            end: None,
            radius: SearchRadius::default(),
            min_magnitude: Self::default_magnitude(),
        }
    }
}

/// Earthquakes around a volcano, fetched once at construction
#[derive(Debug, Clone)]
pub struct Earthquake {
    volcano_name: String,
    volcano: LatLon,
    start: NaiveDate,
    end: NaiveDate,
    region: Region,
    min_magnitude: f64,
    records: EarthquakeRecords,
}

impl Earthquake {
    /// Resolve the volcano and search box, then query the catalog
    pub fn new(query: EarthquakeQuery, client: &dyn CatalogClient) -> PlotResult<Self> {
        let volcano = volcanoes::lookup(&query.volcano)?;
        let end = query.end.unwrap_or_else(|| Local::now().date_naive());
        if end < query.start {
            return Err(PlotError::InputResolution(format!(
                "End date {} is before start date {}",
                end, query.start
            )));
        }
        let region = search_region(volcano, &query.radius)?;

        log::info!(
            "Fetching earthquakes M>={} around {} ({}) from {} to {}",
            query.min_magnitude,
            query.volcano,
            region,
            query.start,
            end
        );

        let catalog_query = CatalogQuery {
            region,
            start: query.start,
            end,
            min_magnitude: query.min_magnitude,
        };
        let body = client.fetch(&catalog_query)?;
        let records = parse_feature_collection(&body, query.min_magnitude)?;

        Ok(Self {
            volcano_name: query.volcano,
            volcano,
            start: query.start,
            end,
            region,
            min_magnitude: query.min_magnitude,
            records,
        })
    }

    pub fn volcano(&self) -> LatLon {
        self.volcano
    }

    pub fn volcano_name(&self) -> &str {
        &self.volcano_name
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn min_magnitude(&self) -> f64 {
        self.min_magnitude
    }

    pub fn records(&self) -> &EarthquakeRecords {
        &self.records
    }

    /// Distance of each event to the volcano, in record order
    pub fn distances(&self) -> Vec<f64> {
        self.records.lalo.iter().map(|p| haversine_km(*p, self.volcano)).collect()
    }

    /// One line per event: date, magnitude, position and distance
    pub fn summary_lines(&self) -> Vec<String> {
        self.records
            .iter()
            .zip(self.distances())
            .map(|((date, point, magnitude), km)| {
                format!(
                    "{}  M{:.1}  ({:.4}, {:.4})  {:.1} km from {}",
                    date, magnitude, point.lat, point.lon, km, self.volcano_name
                )
            })
            .collect()
    }

    /// Magnitude over time (top) and magnitude over distance (bottom), as a PNG
    pub fn save_charts<P: AsRef<Path>>(&self, path: P, size: (u32, u32)) -> PlotResult<()> {
        let path = path.as_ref();
        log::info!("Writing earthquake charts to {}", path.display());

        let root = BitMapBackend::new(path, size).into_drawing_area();
        root.fill(&WHITE).map_err(render_error)?;
        let (top, bottom) = root.split_vertically((size.1 / 2) as i32);

        let span_days = ((self.end - self.start).num_days() as f64).max(1.0);
        let start = self.start;
        let events: Vec<(f64, f64)> = self
            .records
            .iter()
            .map(|(date, _, magnitude)| ((date - start).num_days() as f64, magnitude))
            .collect();

        let mut by_date = ChartBuilder::on(&top)
            .caption("Earthquake Magnitudes Over Time", ("sans-serif", 20))
            .margin(15)
            .x_label_area_size(35)
            .y_label_area_size(45)
            .build_cartesian_2d(0.0..span_days, 0.0..10.0)
            .map_err(render_error)?;
        by_date
            .configure_mesh()
            .x_desc("Date")
            .y_desc("Magnitude")
            .x_labels(6)
            .x_label_formatter(&|d| (start + Duration::days(d.round() as i64)).format("%Y-%m-%d").to_string())
            .draw()
            .map_err(render_error)?;
        draw_stems(&mut by_date, &events)?;

        let distances = self.distances();
        let stems: Vec<(f64, f64)> = distances
            .iter()
            .zip(&self.records.magnitude)
            .map(|(d, m)| (*d, *m))
            .collect();
        let mut by_distance = ChartBuilder::on(&bottom)
            .caption("Earthquake Magnitudes from Volcano", ("sans-serif", 20))
            .margin(15)
            .x_label_area_size(35)
            .y_label_area_size(45)
            .build_cartesian_2d(0.0..distance_axis_limit(&distances), 0.0..10.0)
            .map_err(render_error)?;
        by_distance
            .configure_mesh()
            .x_desc("Distance in KM")
            .y_desc("Magnitude")
            .draw()
            .map_err(render_error)?;
        draw_stems(&mut by_distance, &stems)?;

        root.present().map_err(render_error)?;
        Ok(())
    }
}

type StemChart<'a, 'b> = ChartContext<
    'a,
    BitMapBackend<'b>,
    plotters::coord::cartesian::Cartesian2d<
        plotters::coord::types::RangedCoordf64,
        plotters::coord::types::RangedCoordf64,
    >,
>;

/// Drop lines from each value to zero, capped by a dot
fn draw_stems(chart: &mut StemChart<'_, '_>, points: &[(f64, f64)]) -> PlotResult<()> {
    chart
        .draw_series(
            points
                .iter()
                .map(|&(x, y)| PathElement::new(vec![(x, y), (x, 0.0)], BLACK.stroke_width(1))),
        )
        .map_err(render_error)?;
    chart
        .draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 3, BLACK.filled())))
        .map_err(render_error)?;
    Ok(())
}

fn render_error<E: std::fmt::Display>(e: E) -> PlotError {
    PlotError::Render(e.to_string())
}
