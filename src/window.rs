use crate::structs::*;

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Filtering and staleness parameters shared by the refresh side and the
/// render side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPolicy {
    /// Departures less than this far in the past are still shown.
    pub grace: Duration,
    /// Age of the last successful fetch after which the data counts as stale.
    pub stale_after: Duration,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::zero(),
            stale_after: Duration::seconds(180),
        }
    }
}

/// One batch of departures, fetched at once for a single stop.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionWindow {
    stop: Stop,
    fetched_at: DateTime<Utc>,
    connections: Vec<Connection>,
}

impl ConnectionWindow {
    /// Builds a window for `stop`. Connections fetched for another stop are
    /// dropped, the rest are ordered by departure instant.
    pub fn new(stop: Stop, fetched_at: DateTime<Utc>, mut connections: Vec<Connection>) -> Self {
        let before = connections.len();
        connections.retain(|c| c.stop_id == stop.id);
        if connections.len() != before {
            log::warn!(
                "Dropped {} connections not belonging to stop {}",
                before - connections.len(),
                stop.id
            );
        }
        connections.sort_by_key(|c| c.departure_utc());
        Self {
            stop,
            fetched_at,
            connections,
        }
    }

    pub fn stop(&self) -> &Stop {
        &self.stop
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Connections departing at or after `now - grace`, earliest first.
    pub fn view(&self, now: DateTime<Utc>, grace: Duration) -> Vec<Connection> {
        let cutoff = now - grace;
        let mut upcoming: Vec<Connection> = self
            .connections
            .iter()
            .filter(|c| c.departure_utc() >= cutoff)
            .cloned()
            .collect();
        // Stable, so equal instants keep their upstream order.
        upcoming.sort_by_key(|c| c.departure_utc());
        upcoming
    }

    /// True when the batch had departures but every one of them is gone.
    pub fn is_exhausted(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        let cutoff = now - grace;
        !self.connections.is_empty() && self.connections.iter().all(|c| c.departure_utc() < cutoff)
    }
}

/// A failed refresh, kept for the status line.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshFailure {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// The value held in the shared slot: the last good window plus the outcome
/// of the most recent refresh attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowState {
    pub window: Option<Arc<ConnectionWindow>>,
    pub last_error: Option<RefreshFailure>,
}

impl WindowState {
    pub fn current_view(&self, now: DateTime<Utc>, policy: &WindowPolicy) -> Vec<Connection> {
        match &self.window {
            Some(window) => window.view(now, policy.grace),
            None => vec![],
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, policy: &WindowPolicy) -> bool {
        if self.last_error.is_some() {
            return true;
        }
        match &self.window {
            Some(window) => {
                now.signed_duration_since(window.fetched_at()) > policy.stale_after
                    || window.is_exhausted(now, policy.grace)
            }
            None => false,
        }
    }

    pub fn location_name(&self) -> Option<&str> {
        self.window.as_ref().map(|w| w.stop().name.as_str())
    }

    pub fn has_fetched(&self) -> bool {
        self.window.is_some()
    }
}
