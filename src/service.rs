use crate::error::*;
use crate::structs::*;
use crate::window::*;

use chrono::{DateTime, Duration, Utc};
use std::{future::Future, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};

/// Maps the current position to the stop departures are fetched for.
pub trait StopLocator {
    fn locate(&self) -> impl Future<Output = Result<Stop, ResolutionError>> + Send;
}

/// Fetches upcoming departures for a stop.
pub trait StationboardSource {
    fn stationboard(
        &self,
        stop: &Stop,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Connection>, FetchError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    /// Departures requested per fetch
    pub batch_size: usize,
    /// How long a resolved stop is reused before it is looked up again
    pub relocate_after: Duration,
    pub window: WindowPolicy,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            batch_size: 20,
            relocate_after: Duration::minutes(30),
            window: WindowPolicy::default(),
        }
    }
}

//////////////////////////////////////////////////////////
// Window manager
//////////////////////////////////////////////////////////

/// Owns the shared departure window. Only `refresh` writes to it; every
/// write replaces the whole `WindowState` in one step.
pub struct WindowManager<L, S> {
    locator: L,
    source: S,
    policy: RefreshPolicy,
    resolved: Option<(Stop, DateTime<Utc>)>,
    tx: watch::Sender<Arc<WindowState>>,
}

impl<L, S> WindowManager<L, S>
where
    L: StopLocator,
    S: StationboardSource,
{
    pub fn new(locator: L, source: S, policy: RefreshPolicy) -> Self {
        let (tx, _) = watch::channel(Arc::new(WindowState::default()));
        Self {
            locator,
            source,
            policy,
            resolved: None,
            tx,
        }
    }

    /// A read handle for the render side.
    pub fn reader(&self) -> WindowReader {
        WindowReader {
            rx: self.tx.subscribe(),
            policy: self.policy.window,
        }
    }

    pub async fn refresh(&mut self) -> Result<usize, RefreshError> {
        self.refresh_at(Utc::now()).await
    }

    /// Fetches a new batch and swaps it in. On failure the previous window
    /// stays in place untouched and the failure is recorded next to it.
    pub async fn refresh_at(&mut self, now: DateTime<Utc>) -> Result<usize, RefreshError> {
        match self.fetch_window(now).await {
            Ok(window) => {
                let count = window.len();
                log::info!(
                    "Fetched {} departures for {} ({})",
                    count,
                    window.stop().name,
                    window.stop().id
                );
                self.tx.send_replace(Arc::new(WindowState {
                    window: Some(Arc::new(window)),
                    last_error: None,
                }));
                Ok(count)
            }
            Err(e) => {
                log::warn!("Refresh failed, keeping previous departures: {}", e);
                // Look the stop up again next time, it may be what broke.
                self.resolved = None;
                let previous = self.tx.borrow().window.clone();
                self.tx.send_replace(Arc::new(WindowState {
                    window: previous,
                    last_error: Some(RefreshFailure {
                        at: now,
                        message: e.to_string(),
                    }),
                }));
                Err(e)
            }
        }
    }

    async fn fetch_window(&mut self, now: DateTime<Utc>) -> Result<ConnectionWindow, RefreshError> {
        let stop = self.resolve_stop(now).await?;
        let connections = self
            .source
            .stationboard(&stop, self.policy.batch_size)
            .await?;
        Ok(ConnectionWindow::new(stop, now, connections))
    }

    async fn resolve_stop(&mut self, now: DateTime<Utc>) -> Result<Stop, ResolutionError> {
        if let Some((stop, resolved_at)) = &self.resolved {
            if now.signed_duration_since(*resolved_at) < self.policy.relocate_after {
                return Ok(stop.clone());
            }
        }
        let stop = self.locator.locate().await?;
        log::info!("Using stop {} ({})", stop.name, stop.id);
        self.resolved = Some((stop.clone(), now));
        Ok(stop)
    }

    pub fn snapshot(&self) -> Arc<WindowState> {
        self.tx.borrow().clone()
    }

    pub fn current_view(&self, now: DateTime<Utc>) -> Vec<Connection> {
        self.tx.borrow().current_view(now, &self.policy.window)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.tx.borrow().is_stale(now, &self.policy.window)
    }
}

//////////////////////////////////////////////////////////
// Render-side handle
//////////////////////////////////////////////////////////
#[derive(Clone)]
pub struct WindowReader {
    rx: watch::Receiver<Arc<WindowState>>,
    policy: WindowPolicy,
}

impl WindowReader {
    pub fn snapshot(&self) -> Arc<WindowState> {
        self.rx.borrow().clone()
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    pub fn current_view(&self, now: DateTime<Utc>) -> Vec<Connection> {
        self.snapshot().current_view(now, &self.policy)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.snapshot().is_stale(now, &self.policy)
    }

    /// Resolves when the manager swaps in a new state. Errors once the
    /// manager is gone.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.rx.changed().await
    }
}

//////////////////////////////////////////////////////////
// Refresh loop
//////////////////////////////////////////////////////////

/// Refreshes on every tick of `every` (the first tick fires immediately) and
/// whenever a manual trigger arrives. A failed refresh waits for the next
/// tick.
pub async fn run_refresh_loop<L, S>(
    mut manager: WindowManager<L, S>,
    every: std::time::Duration,
    mut manual: mpsc::Receiver<()>,
) where
    L: StopLocator + Send + Sync,
    S: StationboardSource + Send + Sync,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = manager.refresh().await {
                    log::debug!("Scheduled refresh failed, retrying on next tick: {}", e);
                }
            }
            Some(()) = manual.recv() => {
                log::debug!("Manual refresh requested");
                if manager.refresh().await.is_ok() {
                    ticker.reset();
                }
            }
        }
    }
}
