use crate::config::CoordinateSource;
use crate::error::*;
use crate::service::*;
use crate::structs::*;

use chrono::{DateTime, FixedOffset};
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "http://transport.opendata.ch/v1";
pub const GEOIP_URL: &str = "http://ip-api.com/json";

const AGENT: &str = concat!("puenktli/", env!("CARGO_PKG_VERSION"));

fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

//////////////////////////////////////////////////////////
// Transport API
//////////////////////////////////////////////////////////
#[derive(Debug, Clone)]
pub struct TransportClient {
    client: reqwest::Client,
    base_url: String,
}

impl TransportClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Closest station with an id. The API orders stations by distance.
    pub async fn nearest_stop(&self, location: &Location) -> Result<Stop, ResolutionError> {
        // x is the latitude and y the longitude on this API
        let resp = self
            .client
            .get(format!("{}/locations", self.base_url))
            .query(&[
                ("x", location.latitude.to_string()),
                ("y", location.longitude.to_string()),
                ("type", "station".to_string()),
            ])
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, AGENT)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ResolutionError::Status(resp.status()));
        }
        let body = resp.text().await?;
        let json: Value =
            serde_json::from_str(&body).map_err(|e| ResolutionError::Malformed(e.to_string()))?;

        parse_stations(&json)?
            .into_iter()
            .next()
            .ok_or(ResolutionError::NoStopFound {
                latitude: location.latitude,
                longitude: location.longitude,
            })
    }

    pub async fn get_stationboard(
        &self,
        stop: &Stop,
        limit: usize,
    ) -> Result<Vec<Connection>, FetchError> {
        let resp = self
            .client
            .get(format!("{}/stationboard", self.base_url))
            .query(&[("id", stop.id.clone()), ("limit", limit.to_string())])
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, AGENT)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status()));
        }
        let body = resp.text().await?;
        let json: Value =
            serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))?;

        parse_stationboard(&json, &stop.id)
    }
}

impl StationboardSource for TransportClient {
    async fn stationboard(&self, stop: &Stop, limit: usize) -> Result<Vec<Connection>, FetchError> {
        self.get_stationboard(stop, limit).await
    }
}

//////////////////////////////////////////////////////////
// IP geolocation
//////////////////////////////////////////////////////////
#[derive(Debug, Clone)]
pub struct GeoIpClient {
    client: reqwest::Client,
    url: String,
}

impl GeoIpClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(timeout)?,
            url: GEOIP_URL.to_string(),
        })
    }

    pub async fn fetch_location(&self) -> Result<Location, ResolutionError> {
        let resp = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, AGENT)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ResolutionError::Status(resp.status()));
        }
        let body = resp.text().await?;
        let json: Value =
            serde_json::from_str(&body).map_err(|e| ResolutionError::Malformed(e.to_string()))?;

        parse_geoip(&json)
    }
}

/// Resolves the configured coordinates, or the machine's IP location, to the
/// nearest stop.
#[derive(Debug, Clone)]
pub struct NearestStop {
    coordinates: CoordinateSource,
    transport: TransportClient,
    geoip: GeoIpClient,
}

impl NearestStop {
    pub fn new(coordinates: CoordinateSource, transport: TransportClient, geoip: GeoIpClient) -> Self {
        Self {
            coordinates,
            transport,
            geoip,
        }
    }
}

impl StopLocator for NearestStop {
    async fn locate(&self) -> Result<Stop, ResolutionError> {
        let location = match &self.coordinates {
            CoordinateSource::Fixed(location) => location.clone(),
            CoordinateSource::GeoIp => {
                let location = self.geoip.fetch_location().await?;
                log::info!(
                    "IP location: {} ({}, {})",
                    location.name.as_deref().unwrap_or("Unknown Location"),
                    location.latitude,
                    location.longitude
                );
                location
            }
        };
        self.transport.nearest_stop(&location).await
    }
}

//////////////////////////////////////////////////////////
// Response parsing
//////////////////////////////////////////////////////////

/// Stations with a usable id, in response order. Address matches come back
/// without an id and are skipped.
pub fn parse_stations(json: &Value) -> Result<Vec<Stop>, ResolutionError> {
    let stations = json["stations"]
        .as_array()
        .ok_or_else(|| ResolutionError::Malformed("missing `stations` array".to_string()))?;

    Ok(stations
        .iter()
        .filter_map(|s| {
            let id = string_or_number(&s["id"])?;
            if id.is_empty() {
                return None;
            }
            let name = s["name"].as_str().unwrap_or("Unknown").to_string();
            Some(Stop { id, name })
        })
        .collect())
}

/// Stationboard entries as connections of `stop_id`. Entries without a
/// parseable departure are skipped one by one.
pub fn parse_stationboard(json: &Value, stop_id: &str) -> Result<Vec<Connection>, FetchError> {
    let entries = json["stationboard"]
        .as_array()
        .ok_or_else(|| FetchError::Malformed("missing `stationboard` array".to_string()))?;

    let mut connections = vec![];
    for entry in entries.iter() {
        match parse_entry(entry, stop_id) {
            Some(c) => connections.push(c),
            None => log::debug!("Skipping stationboard entry: {}", entry),
        }
    }
    Ok(connections)
}

fn parse_entry(entry: &Value, stop_id: &str) -> Option<Connection> {
    let stop = &entry["stop"];
    let departure = parse_departure_time(stop["departure"].as_str()?)?;

    let category = entry["category"].as_str().unwrap_or("");
    let number = string_or_number(&entry["number"]).unwrap_or_default();
    let line = format!("{} {}", category, number).trim().to_string();

    let platform = string_or_number(&stop["platform"]).filter(|p| !p.trim().is_empty());

    Some(Connection {
        line,
        destination: entry["to"].as_str()?.to_string(),
        departure,
        platform,
        delay: stop["delay"].as_i64(),
        stop_id: stop_id.to_string(),
    })
}

/// Parses an ISO-8601 timestamp with offset, e.g. `2024-06-01T14:05:00+0200`
/// or `2024-06-01T14:05:00+02:00`. Timestamps without an offset are rejected.
pub fn parse_departure_time(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
}

fn parse_geoip(json: &Value) -> Result<Location, ResolutionError> {
    if let Some(status) = json["status"].as_str() {
        if status != "success" {
            let reason = json["message"].as_str().unwrap_or(status);
            return Err(ResolutionError::Malformed(format!("geolocation failed: {}", reason)));
        }
    }
    let latitude = json["lat"]
        .as_f64()
        .ok_or_else(|| ResolutionError::Malformed("missing `lat`".to_string()))?;
    let longitude = json["lon"]
        .as_f64()
        .ok_or_else(|| ResolutionError::Malformed("missing `lon`".to_string()))?;
    let name = json["city"].as_str().map(ToOwned::to_owned);
    Ok(Location::new(latitude, longitude, name))
}

fn string_or_number(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
