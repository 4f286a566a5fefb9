pub mod structs;
pub mod api;
pub mod io;
pub mod config;
pub mod error;
pub mod window;
pub mod service;
pub mod tui;
#[cfg(test)]
mod tests;

use api::*;
use config::*;
use service::*;
use tui::*;

use chrono::Utc;
use clap::Parser;
use crossterm::event::{self, Event};
use std::{error::Error, time::Duration};
use tokio::sync::mpsc;

type AppResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> AppResult {
    dotenv::dotenv().ok();
    pretty_env_logger::init();

    let cli = Cli::parse();
    let settings = Settings::try_from(&cli)?;
    log::info!("Starting Pünktli ...");

    let transport = TransportClient::new(&settings.api_base, settings.timeout)?;
    let geoip = GeoIpClient::new(settings.timeout)?;
    let locator = NearestStop::new(settings.coordinate_source(), transport.clone(), geoip);

    let manager = WindowManager::new(locator, transport, settings.refresh_policy());
    let reader = manager.reader();

    let (refresh_tx, refresh_rx) = mpsc::channel(1);
    let refresh_task = tokio::spawn(run_refresh_loop(
        manager,
        settings.refresh_interval,
        refresh_rx,
    ));

    let (key_tx, key_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || forward_keys(key_tx));

    let mut tui = Tui::setup()?;
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        restore_terminal();
        original_hook(info);
    }));

    let result = render_loop(&mut tui, reader, settings.display_limit, refresh_tx, key_rx).await;

    // Dropping an in-flight refresh is fine, the window is only ever swapped whole.
    refresh_task.abort();
    tui.teardown();
    log::info!("Exiting Pünktli ...");
    result
}

/// Redraws every second and whenever a refresh lands.
async fn render_loop(
    tui: &mut Tui<std::io::Stdout>,
    mut reader: WindowReader,
    display_limit: usize,
    refresh_tx: mpsc::Sender<()>,
    mut keys: mpsc::UnboundedReceiver<Action>,
) -> AppResult {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut updates_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = reader.changed(), if updates_open => {
                if changed.is_err() {
                    log::warn!("Refresh task stopped, showing last known departures");
                    updates_open = false;
                }
            }
            action = keys.recv() => match action {
                Some(Action::Refresh) => {
                    if refresh_tx.try_send(()).is_err() {
                        log::debug!("Refresh already pending");
                    }
                }
                Some(Action::Quit) | None => break,
            }
        }

        let frame = Frame::build(&reader.snapshot(), reader.policy(), Utc::now(), display_limit);
        tui.draw(&frame)?;
    }
    Ok(())
}

/// Blocking key reader, runs on its own thread until the receiver is gone.
fn forward_keys(tx: mpsc::UnboundedSender<Action>) {
    loop {
        if tx.is_closed() {
            break;
        }
        match event::poll(Duration::from_millis(250)) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                log::warn!("Reading terminal events failed: {}", e);
                break;
            }
        }
        if let Ok(Event::Key(key)) = event::read() {
            if let Some(action) = key_action(&key) {
                if tx.send(action).is_err() {
                    break;
                }
            }
        }
    }
}
