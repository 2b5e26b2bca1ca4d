use chrono::NaiveDate;
use ndarray::Array2;
use plotdata::core::mapper::{
    IsolineOptions, LayerKind, Location, Mapper, OverlayStyle, ReliefOptions, Shading,
};
use plotdata::io::catalog::EarthquakeRecords;
use plotdata::io::relief::{grid_axis, ReliefGrid, ReliefSource, Resolution};
use plotdata::types::{Color, LatLon, LocationKind, PlotResult, Region};
use std::rc::Rc;

/// Cone centred on the region
struct ConeRelief;

impl ReliefSource for ConeRelief {
    fn load(&self, region: &Region, resolution: &Resolution) -> PlotResult<ReliefGrid> {
        let lons = grid_axis(region.min_lon, region.max_lon, resolution.degrees());
        let lats = grid_axis(region.min_lat, region.max_lat, resolution.degrees());
        let (cy, cx) = (lats.len() as f32 / 2.0, lons.len() as f32 / 2.0);
        let values = Array2::from_shape_fn((lats.len(), lons.len()), |(i, j)| {
            let r = ((i as f32 - cy).powi(2) + (j as f32 - cx).powi(2)).sqrt();
            4000.0 - 300.0 * r
        });
        ReliefGrid::new(*region, values)
    }
}

fn mapper() -> Mapper {
    let region = Region::new(-155.7, -155.5, 19.3, 19.5).unwrap();
    Mapper::from_region(region, Rc::new(ConeRelief))
}

#[test]
fn test_earthquakes_share_one_zorder_and_register_once() {
    let mut map = mapper();
    let mut records = EarthquakeRecords::default();
    let day = NaiveDate::from_ymd_opt(2020, 6, 1).unwrap();
    records.push(day, LatLon::new(19.40, -155.60), 3.0);
    records.push(day, LatLon::new(19.45, -155.55), 4.5);

    map.add_location(&Location::new(LatLon::new(19.475, -155.608), "Mauna Loa", LocationKind::Volcano), None);
    let z = map.add_earthquakes(&records, None);
    let legend = map.add_legend(None);

    assert_eq!(z, 1);
    assert_eq!(legend, 2);

    let sizes: Vec<f64> = map
        .layers()
        .iter()
        .filter_map(|layer| match &layer.kind {
            LayerKind::Location(loc) if loc.location.kind == LocationKind::Earthquake => {
                assert_eq!(layer.zorder, 1);
                Some(loc.location.size)
            }
            _ => None,
        })
        .collect();
    assert_eq!(sizes, vec![6.0, 9.0]);

    let kinds: Vec<LocationKind> = map.location_types().keys().copied().collect();
    assert_eq!(kinds, vec![LocationKind::Volcano, LocationKind::Earthquake]);
}

#[test]
fn test_layers_sorted_by_zorder_keep_insertion_order_on_ties() {
    let mut map = mapper();
    let start = LatLon::new(19.3, -155.7);
    let end = LatLon::new(19.5, -155.5);
    map.add_section(start, end, Color::BLACK, Some(5));
    map.add_section(start, end, Color::RED, Some(1));
    map.add_section(start, end, Color::WHITE, Some(5));

    let colors: Vec<Color> = map
        .layers_by_zorder()
        .iter()
        .map(|layer| match &layer.kind {
            LayerKind::Section(section) => section.color,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(colors, vec![Color::RED, Color::BLACK, Color::WHITE]);
}

#[test]
fn test_relief_and_isolines_from_source() {
    let mut map = mapper();
    let relief = map
        .add_colormap(
            &ReliefOptions {
                shade: false,
                ..ReliefOptions::default()
            },
            None,
        )
        .unwrap();
    let isolines = map
        .add_isolines(
            &IsolineOptions {
                levels: 4,
                ..IsolineOptions::default()
            },
            None,
        )
        .unwrap();
    assert_eq!((relief, isolines), (0, 1));

    match &map.layers()[0].kind {
        LayerKind::Relief(layer) => {
            assert!(matches!(layer.shading, Shading::Colormap(_)));
            assert!(layer.values.iter().all(|v| *v >= 0.0));
        }
        other => panic!("unexpected layer {:?}", other),
    }
    match &map.layers()[1].kind {
        LayerKind::Isolines(layer) => {
            assert_eq!(layer.lines.len(), 4);
            assert!(layer.lines.iter().all(|line| !line.segments.is_empty()));
        }
        other => panic!("unexpected layer {:?}", other),
    }
}

#[test]
fn test_hillshade_stays_in_unit_range() {
    let mut map = mapper();
    map.add_colormap(&ReliefOptions::default(), None).unwrap();
    match &map.layers()[0].kind {
        LayerKind::Relief(layer) => {
            assert_eq!(layer.shading, Shading::Hillshade);
            assert!(layer.values.iter().all(|v| (0.0..=1.0).contains(v)));
        }
        other => panic!("unexpected layer {:?}", other),
    }
}

#[test]
fn test_overlay_without_data_fails() {
    let mut map = mapper();
    assert!(map
        .add_file(OverlayStyle::Pixel, None, None, None)
        .is_err());
}
