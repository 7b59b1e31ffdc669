// API models and HTTP client for the Cercanías GTFS API
//
// Endpoints consumed (every response is wrapped in { "status": "ok", "data": ... }):
// - Stop names:        GET /stops/names?limit=
// - Stop search:       GET /stops/search?q=&limit=
// - Single stop:       GET /stops/{stop_id}
// - Upcoming trains:   GET /stops/{stop_id}/upcoming?current_time=HH:MM:SS&limit=
// - Schedule:          GET /schedule?stop_id=&date=YYYY-MM-DD&limit=
// - Stops of a route:  GET /routes/{route_id}/stops

use chrono::NaiveDate;
use reqwest::blocking;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    #[serde(deserialize_with = "id_string")]
    pub stop_id: String,
    #[serde(default)]
    pub stop_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub stop_lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub stop_lon: Option<f64>,
}

impl Stop {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.stop_lat?, self.stop_lon?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopName {
    #[serde(deserialize_with = "id_string")]
    pub stop_id: String,
    #[serde(default)]
    pub stop_name: Option<String>,
}

/// One scheduled call of a trip at the selected stop, as returned by `/schedule`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRow {
    #[serde(default, deserialize_with = "id_string")]
    pub trip_id: String,
    #[serde(default)]
    pub arrival_time: Option<String>,
    #[serde(default)]
    pub departure_time: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub stop_id: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<u32>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub route_id: Option<String>,
    #[serde(default)]
    pub route_short_name: Option<String>,
    #[serde(default)]
    pub trip_headsign: Option<String>,
    #[serde(default)]
    pub service_date: Option<String>,
}

impl ScheduleRow {
    /// Arrival time when known, otherwise departure time.
    pub fn time(&self) -> Option<&str> {
        non_empty(self.arrival_time.as_deref()).or_else(|| non_empty(self.departure_time.as_deref()))
    }

    pub fn route_label(&self) -> Option<&str> {
        route_label(self.route_short_name.as_deref(), self.route_id.as_deref())
    }

    pub fn serves_route(&self, route: &str) -> bool {
        self.route_short_name.as_deref() == Some(route) || self.route_id.as_deref() == Some(route)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpcomingTrain {
    #[serde(default, deserialize_with = "id_string")]
    pub trip_id: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub route_id: Option<String>,
    #[serde(default)]
    pub route_short_name: Option<String>,
    #[serde(default)]
    pub route_long_name: Option<String>,
    #[serde(default)]
    pub trip_headsign: Option<String>,
    // Older API builds send `headsign` instead of `trip_headsign`
    #[serde(default)]
    pub headsign: Option<String>,
    #[serde(default)]
    pub direction_id: Option<i64>,
    #[serde(default)]
    pub scheduled_time: Option<String>,
    #[serde(default)]
    pub departure_time: Option<String>,
    #[serde(default)]
    pub arrival_time: Option<String>,
    #[serde(default)]
    pub minutes_until: Option<i64>,
    #[serde(default)]
    pub stop_sequence: Option<u32>,
}

impl UpcomingTrain {
    pub fn route_label(&self) -> Option<&str> {
        route_label(self.route_short_name.as_deref(), self.route_id.as_deref())
    }

    pub fn headsign(&self) -> Option<&str> {
        non_empty(self.trip_headsign.as_deref()).or_else(|| non_empty(self.headsign.as_deref()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpcomingTrains {
    #[serde(default, deserialize_with = "id_string")]
    pub stop_id: String,
    #[serde(default)]
    pub stop_name: Option<String>,
    #[serde(default)]
    pub current_time: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub departures: Vec<UpcomingTrain>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub arrivals: Vec<UpcomingTrain>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    #[serde(default)]
    pub direction_id: Option<i64>,
    #[serde(default)]
    pub stop_sequence: Option<u32>,
    #[serde(deserialize_with = "id_string")]
    pub stop_id: String,
    #[serde(default)]
    pub stop_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub stop_lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub stop_lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[allow(dead_code)]
    status: Option<String>,
    data: Option<T>,
}

/// Short name when present and non-empty, otherwise the route id.
pub fn route_label<'a>(short_name: Option<&'a str>, route_id: Option<&'a str>) -> Option<&'a str> {
    non_empty(short_name).or_else(|| non_empty(route_id))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

// ============================================================================
// Lenient field decoding (the API mixes numeric and string ids)
// ============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
        }
    }
}

fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?
        .map(Scalar::into_string)
        .unwrap_or_default())
}

fn opt_id_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(Scalar::into_string))
}

fn lenient_f64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<f64>, D::Error> {
    Ok(match Option::<Scalar>::deserialize(deserializer)? {
        Some(Scalar::Float(f)) => Some(f),
        Some(Scalar::Int(i)) => Some(i as f64),
        Some(Scalar::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid date {0:?}: expected YYYY-MM-DD between 2020-01-01 and one year from today")]
    InvalidDate(String),

    #[error("Request superseded by a newer one")]
    Superseded,

    #[error("Dashboard state error: {0}")]
    StateError(String),
}

pub type Result<T> = std::result::Result<T, TransitError>;

// ============================================================================
// Client
// ============================================================================

/// The remote transit API as seen by the dashboard.
pub trait TransitApi: Send + Sync {
    fn stop_names(&self, limit: usize) -> Result<Vec<StopName>>;

    fn search_stops(&self, query: &str, limit: usize) -> Result<Vec<Stop>>;

    fn stop(&self, stop_id: &str) -> Result<Stop>;

    fn upcoming(&self, stop_id: &str, current_time: &str, limit: usize) -> Result<UpcomingTrains>;

    fn schedule(&self, stop_id: &str, date: NaiveDate, limit: usize) -> Result<Vec<ScheduleRow>>;

    fn route_stops(&self, route_id: &str) -> Result<Vec<RouteStop>>;
}

pub struct HttpTransitApi {
    base_url: Url,
    client: blocking::Client,
}

impl HttpTransitApi {
    /// Must be called outside of an async context: the blocking client owns its own runtime.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TransitError::ParseError(format!("Invalid API base URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(TransitError::ParseError(format!("API base URL {} cannot hold paths", base_url)));
        }

        let client = blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransitError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpTransitApi { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        endpoint_url(&self.base_url, segments)
    }

    fn get_data<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<Option<T>> {
        debug!(%url, ?query, "GET {}", what);

        let response = self.client.get(url)
            .query(query)
            .send()
            .map_err(|e| TransitError::NetworkError(format!("Failed to fetch {}: {}", what, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TransitError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            return Err(TransitError::NetworkError(format!("API returned error for {}: {}", what, status)));
        }

        let body = response.text()
            .map_err(|e| TransitError::NetworkError(format!("Failed to read {} response: {}", what, e)))?;

        decode_envelope(&body, what)
    }
}

impl TransitApi for HttpTransitApi {
    fn stop_names(&self, limit: usize) -> Result<Vec<StopName>> {
        let url = self.endpoint(&["stops", "names"])?;
        let names = self.get_data(url, &[("limit", limit.to_string())], "stop names")?;
        Ok(names.unwrap_or_default())
    }

    fn search_stops(&self, query: &str, limit: usize) -> Result<Vec<Stop>> {
        let url = self.endpoint(&["stops", "search"])?;
        let stops = self.get_data(
            url,
            &[("q", query.to_string()), ("limit", limit.to_string())],
            "stop search",
        )?;
        Ok(stops.unwrap_or_default())
    }

    fn stop(&self, stop_id: &str) -> Result<Stop> {
        let url = self.endpoint(&["stops", stop_id])?;
        let what = format!("stop '{}'", stop_id);
        self.get_data(url, &[], &what)?
            .ok_or(TransitError::NotFound(what))
    }

    fn upcoming(&self, stop_id: &str, current_time: &str, limit: usize) -> Result<UpcomingTrains> {
        let url = self.endpoint(&["stops", stop_id, "upcoming"])?;
        let upcoming = self.get_data(
            url,
            &[("current_time", current_time.to_string()), ("limit", limit.to_string())],
            "upcoming trains",
        )?;
        Ok(upcoming.unwrap_or_else(|| UpcomingTrains {
            stop_id: stop_id.to_string(),
            current_time: Some(current_time.to_string()),
            ..UpcomingTrains::default()
        }))
    }

    fn schedule(&self, stop_id: &str, date: NaiveDate, limit: usize) -> Result<Vec<ScheduleRow>> {
        let url = self.endpoint(&["schedule"])?;
        let rows = self.get_data(
            url,
            &[
                ("stop_id", stop_id.to_string()),
                ("date", date.format("%Y-%m-%d").to_string()),
                ("limit", limit.to_string()),
            ],
            "schedule",
        )?;
        Ok(rows.unwrap_or_default())
    }

    fn route_stops(&self, route_id: &str) -> Result<Vec<RouteStop>> {
        let url = self.endpoint(&["routes", route_id, "stops"])?;
        let stops = self.get_data(url, &[], "route stops")?;
        Ok(stops.unwrap_or_default())
    }
}

fn endpoint_url(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| TransitError::ParseError(format!("API base URL {} cannot hold paths", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn decode_envelope<T: DeserializeOwned>(body: &str, what: &str) -> Result<Option<T>> {
    let envelope: Envelope<T> = serde_json::from_str(body)
        .map_err(|e| TransitError::ParseError(format!("Invalid {} response: {}", what, e)))?;
    Ok(envelope.data)
}

// ============================================================================
// In-memory API for tests
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn schedule_rows_decode_with_missing_and_numeric_fields() {
        let body = r#"{
            "status": "ok",
            "data": [
                {"trip_id": "T1", "arrival_time": "08:00:00", "departure_time": "08:01:00",
                 "stop_id": 65000, "stop_sequence": 4, "route_id": "R1", "route_short_name": "C1"},
                {"trip_id": 42, "departure_time": "08:10:00", "route_id": null}
            ]
        }"#;

        let rows: Vec<ScheduleRow> = decode_envelope(body, "schedule").unwrap().unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].stop_id.as_deref(), Some("65000"));
        assert_eq!(rows[0].time(), Some("08:00:00"));
        assert_eq!(rows[0].route_label(), Some("C1"));
        assert_eq!(rows[1].trip_id, "42");
        assert_eq!(rows[1].time(), Some("08:10:00"));
        assert_eq!(rows[1].route_label(), None);
    }

    #[test]
    fn null_data_decodes_as_none() {
        let rows: Option<Vec<ScheduleRow>> = decode_envelope(r#"{"status":"ok","data":null}"#, "schedule").unwrap();
        assert!(rows.is_none());

        let rows: Option<Vec<ScheduleRow>> = decode_envelope(r#"{"status":"ok"}"#, "schedule").unwrap();
        assert!(rows.is_none());
    }

    #[test]
    fn malformed_body_is_a_parse_error() {
        let err = decode_envelope::<Vec<ScheduleRow>>("<html>", "schedule").unwrap_err();
        assert!(matches!(err, TransitError::ParseError(_)));
    }

    #[test]
    fn stop_coordinates_accept_numeric_strings() {
        let body = r#"{"data": {"stop_id": "18000", "stop_name": "Madrid-Atocha", "stop_lat": "40.406", "stop_lon": -3.69}}"#;
        let stop: Stop = decode_envelope(body, "stop").unwrap().unwrap();
        assert_eq!(stop.coordinates(), Some((40.406, -3.69)));

        let body = r#"{"data": {"stop_id": "18000", "stop_lat": "", "stop_lon": -3.69}}"#;
        let stop: Stop = decode_envelope(body, "stop").unwrap().unwrap();
        assert_eq!(stop.coordinates(), None);
    }

    #[test]
    fn upcoming_lists_tolerate_null() {
        let body = r#"{"data": {"stop_id": "18000", "current_time": "10:00:00",
                       "departures": null,
                       "arrivals": [{"trip_id": "T9", "headsign": "Alcalá", "scheduled_time": "10:04:00", "minutes_until": 4}]}}"#;
        let upcoming: UpcomingTrains = decode_envelope(body, "upcoming").unwrap().unwrap();

        assert!(upcoming.departures.is_empty());
        assert_eq!(upcoming.arrivals[0].headsign(), Some("Alcalá"));
        assert_eq!(upcoming.arrivals[0].minutes_until, Some(4));
    }

    #[test]
    fn route_label_skips_empty_short_name() {
        assert_eq!(route_label(Some(""), Some("R7")), Some("R7"));
        assert_eq!(route_label(Some("C4"), Some("R7")), Some("C4"));
        assert_eq!(route_label(Some(""), Some("")), None);
        assert_eq!(route_label(None, None), None);
    }

    #[test]
    fn endpoints_extend_the_base_path() {
        let base = Url::parse("http://localhost:8000/api/").unwrap();
        let url = endpoint_url(&base, &["stops", "65000", "upcoming"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/stops/65000/upcoming");

        let base = Url::parse("http://localhost:8000").unwrap();
        let url = endpoint_url(&base, &["routes", "C1 norte", "stops"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/routes/C1%20norte/stops");
    }
}
