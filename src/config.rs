use crate::api::DEFAULT_API_BASE;
use crate::error::ConfigError;
use crate::io::first_station_file;
use crate::service::RefreshPolicy;
use crate::structs::*;
use crate::window::WindowPolicy;

use clap::Parser;
use std::{path::PathBuf, time::Duration};

pub const STATION_FILES: [&str; 2] = ["station.json", "/boot/station.json"];

pub const FALLBACK_LAT: f64 = 46.9480;
pub const FALLBACK_LON: f64 = 7.4474;
pub const FALLBACK_NAME: &str = "Bern (Fallback)";

pub const ENV_LAT: &str = "GLEIS_LAT";
pub const ENV_LON: &str = "GLEIS_LON";
pub const ENV_NAME: &str = "GLEIS_NAME";
const ENV_DEFAULT_NAME: &str = "Unknown";

/// Upper bound for every duration flag (one week).
pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "puenktli",
    version,
    about = "Live departure board for the stop nearest to you"
)]
pub struct Cli {
    /// Latitude of the position to look up stops for
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Longitude of the position to look up stops for
    #[arg(long, allow_hyphen_values = true)]
    pub lon: Option<f64>,

    /// Display name for --lat/--lon
    #[arg(long)]
    pub name: Option<String>,

    /// Station file to read instead of ./station.json and /boot/station.json
    #[arg(long = "station-file", value_name = "PATH")]
    pub station_file: Option<PathBuf>,

    /// Locate via IP geolocation when no coordinates are configured
    #[arg(long)]
    pub geoip: bool,

    /// Base URL of the transport API
    #[arg(long = "api-base", env = "PUENKTLI_API", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Departures fetched per refresh
    #[arg(long, default_value = "20")]
    pub limit: usize,

    /// Seconds between refreshes
    #[arg(long = "refresh-secs", default_value = "60", value_name = "SECONDS")]
    pub refresh_secs: u64,

    /// Seconds without a successful refresh before the board is flagged stale
    #[arg(long = "stale-secs", default_value = "180", value_name = "SECONDS")]
    pub stale_secs: u64,

    /// Keep showing departures for this many seconds after they left
    #[arg(long = "grace-secs", default_value = "0", value_name = "SECONDS")]
    pub grace_secs: u64,

    /// Seconds before the nearest stop is looked up again
    #[arg(long = "relocate-secs", default_value = "1800", value_name = "SECONDS")]
    pub relocate_secs: u64,

    /// Rows shown on the board
    #[arg(long = "display-limit", default_value = "10", value_name = "N")]
    pub display_limit: usize,

    /// Timeout for each HTTP request
    #[arg(long = "timeout-secs", default_value = "10", value_name = "SECONDS")]
    pub timeout_secs: u64,
}

/// Where the coordinates for the stop lookup come from.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinateSource {
    Fixed(Location),
    GeoIp,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub explicit: Option<Location>,
    pub station_files: Vec<PathBuf>,
    /// Coordinates from `GLEIS_*`, tried after the station files
    pub env_location: Option<Location>,
    pub geoip: bool,
    pub api_base: String,
    pub batch_size: usize,
    pub refresh_interval: Duration,
    pub stale_after: chrono::Duration,
    pub grace: chrono::Duration,
    pub relocate_after: chrono::Duration,
    pub display_limit: usize,
    pub timeout: Duration,
}

impl TryFrom<&Cli> for Settings {
    type Error = ConfigError;

    fn try_from(cli: &Cli) -> Result<Self, Self::Error> {
        let explicit = match (cli.lat, cli.lon) {
            (Some(lat), Some(lon)) => Some(Location::new(lat, lon, cli.name.clone())),
            (None, None) => None,
            _ => return Err(ConfigError::PartialCoordinates),
        };
        if let Some(location) = &explicit {
            check_range(location)?;
        }

        if cli.limit == 0 {
            return Err(ConfigError::Zero("--limit"));
        }
        if cli.refresh_secs == 0 {
            return Err(ConfigError::Zero("--refresh-secs"));
        }
        if cli.display_limit == 0 {
            return Err(ConfigError::Zero("--display-limit"));
        }
        if cli.timeout_secs == 0 {
            return Err(ConfigError::Zero("--timeout-secs"));
        }

        let refresh_secs = bounded("--refresh-secs", cli.refresh_secs)?;
        let stale_after = to_chrono("--stale-secs", cli.stale_secs)?;
        let grace = to_chrono("--grace-secs", cli.grace_secs)?;
        let relocate_after = to_chrono("--relocate-secs", cli.relocate_secs)?;
        let timeout_secs = bounded("--timeout-secs", cli.timeout_secs)?;

        if cli.stale_secs <= cli.refresh_secs {
            return Err(ConfigError::StaleNotAboveRefresh {
                stale: cli.stale_secs,
                refresh: cli.refresh_secs,
            });
        }

        let station_files = match &cli.station_file {
            Some(path) => vec![path.to_owned()],
            None => STATION_FILES.iter().map(PathBuf::from).collect(),
        };

        Ok(Self {
            explicit,
            station_files,
            env_location: location_from_env(|key| std::env::var(key).ok()),
            geoip: cli.geoip,
            api_base: cli.api_base.clone(),
            batch_size: cli.limit,
            refresh_interval: Duration::from_secs(refresh_secs),
            stale_after,
            grace,
            relocate_after,
            display_limit: cli.display_limit,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

impl Settings {
    /// Picks the first available source: `--lat/--lon`, a station file,
    /// `GLEIS_*` variables, IP geolocation if enabled, then the built-in
    /// fallback.
    pub fn coordinate_source(&self) -> CoordinateSource {
        if let Some(location) = &self.explicit {
            log::info!("Configuration loaded from command line");
            return CoordinateSource::Fixed(location.clone());
        }
        if let Some((path, location)) = first_station_file(&self.station_files) {
            log::info!(
                "Configuration loaded from {}: {}",
                path.display(),
                location.name.as_deref().unwrap_or_default()
            );
            return CoordinateSource::Fixed(location);
        }
        if let Some(location) = &self.env_location {
            log::info!(
                "Configuration loaded from environment variables: {}",
                location.name.as_deref().unwrap_or_default()
            );
            return CoordinateSource::Fixed(location.clone());
        }
        if self.geoip {
            log::info!("No configuration found, locating via IP geolocation");
            return CoordinateSource::GeoIp;
        }
        log::warn!("No configuration found! Using fallback location (Bern).");
        CoordinateSource::Fixed(Location::new(
            FALLBACK_LAT,
            FALLBACK_LON,
            Some(FALLBACK_NAME.to_string()),
        ))
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            batch_size: self.batch_size,
            relocate_after: self.relocate_after,
            window: WindowPolicy {
                grace: self.grace,
                stale_after: self.stale_after,
            },
        }
    }
}

/// Coordinates from `GLEIS_LAT`/`GLEIS_LON` (and optionally `GLEIS_NAME`).
/// Missing, unparseable or out-of-range values yield `None`.
pub fn location_from_env<F>(lookup: F) -> Option<Location>
where
    F: Fn(&str) -> Option<String>,
{
    let lat = lookup(ENV_LAT).filter(|v| !v.trim().is_empty())?;
    let lon = lookup(ENV_LON).filter(|v| !v.trim().is_empty())?;

    let (latitude, longitude) = match (lat.trim().parse::<f64>(), lon.trim().parse::<f64>()) {
        (Ok(lat), Ok(lon)) => (lat, lon),
        _ => {
            log::warn!("Error parsing environment variables: {}={}, {}={}", ENV_LAT, lat, ENV_LON, lon);
            return None;
        }
    };
    let name = lookup(ENV_NAME).unwrap_or_else(|| ENV_DEFAULT_NAME.to_string());
    let location = Location::new(latitude, longitude, Some(name));
    if let Err(e) = check_range(&location) {
        log::warn!("Ignoring environment variables: {}", e);
        return None;
    }
    Some(location)
}

fn check_range(location: &Location) -> Result<(), ConfigError> {
    if !(-90.0..=90.0).contains(&location.latitude) {
        return Err(ConfigError::LatitudeOutOfRange(location.latitude));
    }
    if !(-180.0..=180.0).contains(&location.longitude) {
        return Err(ConfigError::LongitudeOutOfRange(location.longitude));
    }
    Ok(())
}

fn bounded(flag: &'static str, secs: u64) -> Result<u64, ConfigError> {
    if secs > MAX_DURATION_SECS {
        return Err(ConfigError::TooLarge {
            flag,
            max: MAX_DURATION_SECS,
        });
    }
    Ok(secs)
}

fn to_chrono(flag: &'static str, secs: u64) -> Result<chrono::Duration, ConfigError> {
    chrono::Duration::from_std(Duration::from_secs(bounded(flag, secs)?)).map_err(|_| {
        ConfigError::TooLarge {
            flag,
            max: MAX_DURATION_SECS,
        }
    })
}
