use crate::types::{LatLon, PlotError, PlotResult, Region};
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use std::time::Duration;

/// USGS FDSN event query endpoint (GeoJSON output)
pub const USGS_ENDPOINT: &str = "https://earthquake.usgs.gov/fdsnws/event/1/query.geojson";

/// Filters of one catalog query
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogQuery {
    pub region: Region,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub min_magnitude: f64,
}

impl CatalogQuery {
    /// Query string parameters in the order the service documents them
    pub fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("eventtype", "earthquake".to_string()),
            ("orderby", "time".to_string()),
            ("starttime", format!("{}T00:00:00", self.start.format("%Y-%m-%d"))),
            ("endtime", format!("{}T23:59:59", self.end.format("%Y-%m-%d"))),
            ("minmagnitude", self.min_magnitude.to_string()),
            ("maxlatitude", self.region.max_lat.to_string()),
            ("minlatitude", self.region.min_lat.to_string()),
            ("maxlongitude", self.region.max_lon.to_string()),
            ("minlongitude", self.region.min_lon.to_string()),
        ]
    }
}

/// Transport for catalog queries; returns the raw response body
pub trait CatalogClient {
    fn fetch(&self, query: &CatalogQuery) -> PlotResult<String>;
}

/// Blocking HTTP client for the USGS event service
#[derive(Debug, Clone)]
pub struct UsgsClient {
    endpoint: String,
    timeout: Duration,
}

impl Default for UsgsClient {
    fn default() -> Self {
        Self {
            endpoint: USGS_ENDPOINT.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl UsgsClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl CatalogClient for UsgsClient {
    fn fetch(&self, query: &CatalogQuery) -> PlotResult<String> {
        log::info!("Querying USGS catalog for {} from {} to {}", query.region, query.start, query.end);

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PlotError::fetch("Failed to create HTTP client", e))?;

        let response = client
            .get(&self.endpoint)
            .query(&query.params())
            .send()
            .map_err(|e| PlotError::fetch(format!("Catalog request to {}", self.endpoint), e))?;

        let response = response
            .error_for_status()
            .map_err(|e| PlotError::fetch("Catalog returned an error status", e))?;

        response
            .text()
            .map_err(|e| PlotError::fetch("Failed to read catalog response", e))
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    properties: Properties,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Properties {
    /// Origin time, milliseconds since the Unix epoch
    time: i64,
    mag: f64,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    coordinates: Vec<f64>,
}

/// Catalog events as parallel sequences of equal length
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EarthquakeRecords {
    pub date: Vec<NaiveDate>,
    pub lalo: Vec<LatLon>,
    pub magnitude: Vec<f64>,
}

impl EarthquakeRecords {
    pub fn len(&self) -> usize {
        self.date.len()
    }

    pub fn is_empty(&self) -> bool {
        self.date.is_empty()
    }

    pub fn push(&mut self, date: NaiveDate, lalo: LatLon, magnitude: f64) {
        self.date.push(date);
        self.lalo.push(lalo);
        self.magnitude.push(magnitude);
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, LatLon, f64)> + '_ {
        self.date
            .iter()
            .zip(&self.lalo)
            .zip(&self.magnitude)
            .map(|((d, p), m)| (*d, *p, *m))
    }
}

/// Parse a GeoJSON FeatureCollection strictly: any feature missing a field fails the whole document
pub fn parse_feature_collection(body: &str, min_magnitude: f64) -> PlotResult<EarthquakeRecords> {
    let collection: FeatureCollection = serde_json::from_str(body)
        .map_err(|e| PlotError::MalformedRecord(format!("Catalog response is not a feature collection: {}", e)))?;

    let mut records = EarthquakeRecords::default();
    for (index, feature) in collection.features.into_iter().enumerate() {
        let coordinates = &feature.geometry.coordinates;
        if coordinates.len() < 2 {
            return Err(PlotError::MalformedRecord(format!(
                "Feature {} has {} coordinates, expected at least longitude and latitude",
                index,
                coordinates.len()
            )));
        }

        let date = DateTime::from_timestamp_millis(feature.properties.time)
            .ok_or_else(|| {
                PlotError::MalformedRecord(format!(
                    "Feature {} has an out-of-range time {}",
                    index, feature.properties.time
                ))
            })?
            .date_naive();

        let magnitude = feature.properties.mag;
        if magnitude < min_magnitude {
            log::warn!(
                "Dropping event {} on {} with magnitude {} below requested minimum {}",
                index,
                date,
                magnitude,
                min_magnitude
            );
            continue;
        }

        records.push(date, LatLon::new(coordinates[1], coordinates[0]), magnitude);
    }

    log::info!("Parsed {} catalog events", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature",
             "properties": {"mag": 3.4, "time": 1577836800000},
             "geometry": {"type": "Point", "coordinates": [-155.28, 19.41, 2.1]}},
            {"type": "Feature",
             "properties": {"mag": 4.1, "time": 1580515200000},
             "geometry": {"type": "Point", "coordinates": [-155.60, 19.47, 5.0]}}
        ]
    }"#;

    #[test]
    fn test_query_params() {
        let query = CatalogQuery {
            region: Region::new(-155.5, -155.1, 19.2, 19.6).unwrap(),
            start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            min_magnitude: 3.0,
        };
        let params = query.params();
        let keys: Vec<&str> = params.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec![
                "eventtype",
                "orderby",
                "starttime",
                "endtime",
                "minmagnitude",
                "maxlatitude",
                "minlatitude",
                "maxlongitude",
                "minlongitude"
            ]
        );
        assert_eq!(params[2].1, "2020-01-01T00:00:00");
        assert_eq!(params[4].1, "3");
        assert_eq!(params[8].1, "-155.5");
    }

    #[test]
    fn test_parse_features() {
        let records = parse_feature_collection(SAMPLE, 3.0).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.date[0], NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(records.lalo[0], LatLon::new(19.41, -155.28));
        assert_eq!(records.magnitude[1], 4.1);
    }

    #[test]
    fn test_below_minimum_dropped() {
        let records = parse_feature_collection(SAMPLE, 4.0).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records.magnitude.iter().all(|&m| m >= 4.0));
    }

    #[test]
    fn test_missing_magnitude_fails() {
        let body = r#"{"features": [
            {"properties": {"mag": null, "time": 1577836800000},
             "geometry": {"coordinates": [-155.28, 19.41]}}
        ]}"#;
        assert!(matches!(
            parse_feature_collection(body, 0.0),
            Err(PlotError::MalformedRecord(_))
        ));

        let short = r#"{"features": [
            {"properties": {"mag": 3.0, "time": 1577836800000},
             "geometry": {"coordinates": [-155.28]}}
        ]}"#;
        assert!(matches!(
            parse_feature_collection(short, 0.0),
            Err(PlotError::MalformedRecord(_))
        ));
    }

    /// Serve one canned HTTP response on a local port and return the endpoint URL
    fn serve_once(status: &'static str, body: &'static str) -> String {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = [0u8; 4096];
                let _ = stream.read(&mut request);
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{}/fdsnws/event/1/query", addr)
    }

    fn query() -> CatalogQuery {
        CatalogQuery {
            region: Region::new(-156.0, -155.0, 19.0, 20.0).unwrap(),
            start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2020, 2, 1).unwrap(),
            min_magnitude: 3.0,
        }
    }

    #[test]
    fn test_fetch_success() {
        let client = UsgsClient::new().with_endpoint(serve_once("200 OK", SAMPLE));
        let body = client.fetch(&query()).unwrap();
        assert_eq!(parse_feature_collection(&body, 3.0).unwrap().len(), 2);
    }

    #[test]
    fn test_error_status_is_fetch_error() {
        let client = UsgsClient::new()
            .with_endpoint(serve_once("500 Internal Server Error", ""))
            .with_timeout(Duration::from_secs(5));
        match client.fetch(&query()) {
            Err(PlotError::DataFetch { context, .. }) => assert!(context.contains("error status"), "{}", context),
            other => panic!("expected DataFetch, got {:?}", other),
        }
    }

    #[test]
    fn test_unreachable_endpoint_is_fetch_error() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = closed.local_addr().unwrap();
        drop(closed);

        let client = UsgsClient::new()
            .with_endpoint(format!("http://{}/query", addr))
            .with_timeout(Duration::from_secs(5));
        assert!(matches!(client.fetch(&query()), Err(PlotError::DataFetch { .. })));
    }
}
