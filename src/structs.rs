use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Deserializer};

/// A coordinate pair in degrees, optionally named.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct Location {
    #[serde(rename = "lat", deserialize_with = "number_or_string")]
    pub latitude: f64,
    #[serde(rename = "lon", deserialize_with = "number_or_string")]
    pub longitude: f64,
    #[serde(default)]
    pub name: Option<String>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64, name: Option<String>) -> Self {
        Self {
            latitude,
            longitude,
            name,
        }
    }
}

/// Station files written by hand often quote their coordinates.
fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid coordinate: {:?}", s))),
    }
}

/// The stop a stationboard is requested for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stop {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Category and number, e.g. "S 3" or "B 10"
    pub line: String,
    pub destination: String,
    /// Scheduled departure, keeps the upstream offset
    pub departure: DateTime<FixedOffset>,
    pub platform: Option<String>,
    /// Delay in minutes as reported upstream
    pub delay: Option<i64>,
    pub stop_id: String,
}

impl Connection {
    pub fn departure_utc(&self) -> DateTime<Utc> {
        self.departure.with_timezone(&Utc)
    }

    pub fn formatted_delay(&self) -> String {
        match self.delay {
            Some(d) if d != 0 => format!("+{}", d),
            _ => "-".to_string(),
        }
    }

    /// Platform or an empty string, never a made-up value.
    pub fn platform_label(&self) -> &str {
        self.platform.as_deref().unwrap_or("")
    }
}
