use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Location lookup failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Location lookup returned status {0}")]
    Status(StatusCode),
    #[error("No stop found near {latitude}, {longitude}")]
    NoStopFound { latitude: f64, longitude: f64 },
    #[error("Malformed location response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Stationboard request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Stationboard returned status {0}")]
    Status(StatusCode),
    #[error("Malformed stationboard: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("--lat and --lon must be given together")]
    PartialCoordinates,
    #[error("Latitude {0} out of range")]
    LatitudeOutOfRange(f64),
    #[error("Longitude {0} out of range")]
    LongitudeOutOfRange(f64),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("Stale threshold ({stale}s) must exceed the refresh interval ({refresh}s)")]
    StaleNotAboveRefresh { stale: u64, refresh: u64 },
    #[error("{flag} must be at most {max} seconds")]
    TooLarge { flag: &'static str, max: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_no_stop() {
        let err = ResolutionError::NoStopFound {
            latitude: 46.948,
            longitude: 7.4474,
        };
        assert_eq!(err.to_string(), "No stop found near 46.948, 7.4474");
    }

    #[test]
    fn refresh_error_is_transparent() {
        let err: RefreshError = FetchError::Malformed("missing stationboard".into()).into();
        assert_eq!(err.to_string(), "Malformed stationboard: missing stationboard");
        assert!(matches!(err, RefreshError::Fetch(_)));
    }

    #[test]
    fn error_display_too_large() {
        let err = ConfigError::TooLarge {
            flag: "--grace-secs",
            max: 604800,
        };
        assert_eq!(err.to_string(), "--grace-secs must be at most 604800 seconds");
    }

    #[test]
    fn error_from_status() {
        let err = FetchError::Status(StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains("503"));
    }
}
