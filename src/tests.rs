use crate::api::parse_departure_time;
use crate::error::*;
use crate::service::*;
use crate::structs::*;
use crate::window::*;

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::mpsc;

//////////////////////////////////////////////////////////
// Fakes
//////////////////////////////////////////////////////////
#[derive(Clone, Default)]
struct FakeLocator {
    calls: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl StopLocator for FakeLocator {
    async fn locate(&self) -> Result<Stop, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ResolutionError::NoStopFound {
                latitude: 46.948,
                longitude: 7.4474,
            });
        }
        Ok(bern())
    }
}

#[derive(Clone, Default)]
struct FakeBoard {
    responses: Arc<Mutex<VecDeque<Result<Vec<Connection>, FetchError>>>>,
    limits: Arc<Mutex<Vec<usize>>>,
}

impl FakeBoard {
    fn push(&self, response: Result<Vec<Connection>, FetchError>) {
        self.responses.lock().unwrap().push_back(response);
    }
}

impl StationboardSource for FakeBoard {
    async fn stationboard(&self, _stop: &Stop, limit: usize) -> Result<Vec<Connection>, FetchError> {
        self.limits.lock().unwrap().push(limit);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![]))
    }
}

fn bern() -> Stop {
    Stop {
        id: "8507000".to_string(),
        name: "Bern".to_string(),
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn conn(line: &str, departure: DateTime<Utc>) -> Connection {
    Connection {
        line: line.to_string(),
        destination: "Thun".to_string(),
        departure: departure.fixed_offset(),
        platform: Some("3".to_string()),
        delay: None,
        stop_id: "8507000".to_string(),
    }
}

fn network_error() -> FetchError {
    FetchError::Status(reqwest::StatusCode::BAD_GATEWAY)
}

fn manager(board: &FakeBoard, locator: &FakeLocator) -> WindowManager<FakeLocator, FakeBoard> {
    WindowManager::new(locator.clone(), board.clone(), RefreshPolicy::default())
}

fn lines(view: &[Connection]) -> Vec<&str> {
    view.iter().map(|c| c.line.as_str()).collect()
}

//////////////////////////////////////////////////////////
// Sliding window
//////////////////////////////////////////////////////////
#[tokio::test]
async fn view_drops_departed_connections() {
    let board = FakeBoard::default();
    board.push(Ok(vec![
        conn("S 1", t0() + Duration::minutes(3)),
        conn("S 2", t0() + Duration::minutes(7)),
        conn("S 3", t0() + Duration::minutes(20)),
    ]));
    let mut manager = manager(&board, &FakeLocator::default());

    assert_eq!(manager.refresh_at(t0()).await.unwrap(), 3);
    let view = manager.current_view(t0() + Duration::minutes(5));
    assert_eq!(lines(&view), vec!["S 2", "S 3"]);
    assert_eq!(board.limits.lock().unwrap().as_slice(), &[20]);
}

#[tokio::test]
async fn view_shrinks_as_time_advances() {
    let board = FakeBoard::default();
    board.push(Ok(vec![
        conn("S 4", t0() + Duration::minutes(12)),
        conn("S 1", t0() + Duration::minutes(1)),
        conn("S 3", t0() + Duration::minutes(8)),
        conn("S 2", t0() + Duration::minutes(8)),
    ]));
    let mut manager = manager(&board, &FakeLocator::default());
    manager.refresh_at(t0()).await.unwrap();

    let mut previous = manager.current_view(t0());
    assert_eq!(previous.len(), 4);
    for step in 1..=30 {
        let now = t0() + Duration::seconds(step * 30);
        let view = manager.current_view(now);
        // Only the front of the list drops away.
        assert!(previous.ends_with(&view), "not a suffix at step {}", step);
        assert!(view.iter().all(|c| c.departure_utc() >= now));
        previous = view;
    }
    assert!(previous.is_empty());
}

#[tokio::test]
async fn view_honours_grace() {
    let board = FakeBoard::default();
    board.push(Ok(vec![conn("S 1", t0()), conn("S 2", t0() + Duration::minutes(5))]));
    let policy = RefreshPolicy {
        window: WindowPolicy {
            grace: Duration::seconds(30),
            ..WindowPolicy::default()
        },
        ..RefreshPolicy::default()
    };
    let mut manager = WindowManager::new(FakeLocator::default(), board.clone(), policy);
    manager.refresh_at(t0()).await.unwrap();

    assert_eq!(manager.current_view(t0() + Duration::seconds(30)).len(), 2);
    let view = manager.current_view(t0() + Duration::seconds(31));
    assert_eq!(lines(&view), vec!["S 2"]);
}

#[test]
fn offsets_filter_and_sort_identically() {
    let zurich = parse_departure_time("2024-06-01T14:05:00+02:00").unwrap();
    let utc = parse_departure_time("2024-06-01T12:05:00+00:00").unwrap();
    let earlier = parse_departure_time("2024-06-01T13:04:00+01:00").unwrap();

    let mk = |line: &str, departure| Connection {
        departure,
        ..conn(line, t0())
    };
    let window = ConnectionWindow::new(
        bern(),
        t0(),
        vec![mk("local", zurich), mk("earlier", earlier), mk("utc", utc)],
    );

    // 12:04:30Z: the 13:04+01:00 departure (12:04Z) is gone, both 12:05Z remain.
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 4, 30).unwrap();
    let view = window.view(now, Duration::zero());
    assert_eq!(lines(&view), vec!["local", "utc"]);

    let after = window.view(now + Duration::seconds(31), Duration::zero());
    assert!(after.is_empty());
}

//////////////////////////////////////////////////////////
// Refresh outcomes
//////////////////////////////////////////////////////////
#[tokio::test]
async fn empty_fetch_is_not_stale() {
    let board = FakeBoard::default();
    board.push(Ok(vec![]));
    let mut manager = manager(&board, &FakeLocator::default());

    assert_eq!(manager.refresh_at(t0()).await.unwrap(), 0);
    assert!(manager.current_view(t0()).is_empty());
    assert!(!manager.is_stale(t0()));
    assert!(!manager.is_stale(t0() + Duration::minutes(2)));
}

#[tokio::test]
async fn failed_refresh_keeps_window() {
    let board = FakeBoard::default();
    board.push(Ok(vec![
        conn("S 1", t0() + Duration::minutes(3)),
        conn("S 2", t0() + Duration::minutes(7)),
    ]));
    board.push(Err(network_error()));
    let mut manager = manager(&board, &FakeLocator::default());

    manager.refresh_at(t0()).await.unwrap();
    let before = manager.snapshot();

    let err = manager.refresh_at(t0() + Duration::minutes(1)).await.unwrap_err();
    assert!(matches!(err, RefreshError::Fetch(_)));

    let after = manager.snapshot();
    let (old, new) = (before.window.as_ref().unwrap(), after.window.as_ref().unwrap());
    assert!(Arc::ptr_eq(old, new));
    assert_eq!(new.fetched_at(), t0());
    assert_eq!(after.last_error.as_ref().unwrap().at, t0() + Duration::minutes(1));

    assert!(manager.is_stale(t0() + Duration::minutes(1)));
    let view = manager.current_view(t0() + Duration::minutes(5));
    assert_eq!(lines(&view), vec!["S 2"]);
}

#[tokio::test]
async fn stale_after_threshold_until_next_success() {
    let board = FakeBoard::default();
    board.push(Ok(vec![conn("S 1", t0() + Duration::hours(1))]));
    board.push(Ok(vec![conn("S 2", t0() + Duration::hours(2))]));
    let mut manager = manager(&board, &FakeLocator::default());
    manager.refresh_at(t0()).await.unwrap();

    let threshold = RefreshPolicy::default().window.stale_after;
    assert!(!manager.is_stale(t0() + threshold));
    let late = t0() + threshold + Duration::seconds(1);
    assert!(manager.is_stale(late));

    manager.refresh_at(late).await.unwrap();
    assert!(!manager.is_stale(late));
}

#[tokio::test]
async fn exhausted_window_is_stale() {
    let board = FakeBoard::default();
    board.push(Ok(vec![conn("S 1", t0() + Duration::minutes(1))]));
    let mut manager = manager(&board, &FakeLocator::default());
    manager.refresh_at(t0()).await.unwrap();

    assert!(!manager.is_stale(t0()));
    assert!(manager.is_stale(t0() + Duration::minutes(2)));
}

#[tokio::test]
async fn success_clears_previous_failure() {
    let board = FakeBoard::default();
    board.push(Err(network_error()));
    board.push(Ok(vec![]));
    let mut manager = manager(&board, &FakeLocator::default());

    assert!(manager.refresh_at(t0()).await.is_err());
    assert!(manager.is_stale(t0()));
    assert!(manager.snapshot().window.is_none());

    manager.refresh_at(t0() + Duration::minutes(1)).await.unwrap();
    assert!(!manager.is_stale(t0() + Duration::minutes(1)));
    assert!(manager.snapshot().last_error.is_none());
}

//////////////////////////////////////////////////////////
// Stop resolution
//////////////////////////////////////////////////////////
#[tokio::test]
async fn stop_is_reused_between_refreshes() {
    let board = FakeBoard::default();
    let locator = FakeLocator::default();
    let mut manager = manager(&board, &locator);

    manager.refresh_at(t0()).await.unwrap();
    manager.refresh_at(t0() + Duration::minutes(1)).await.unwrap();
    assert_eq!(locator.calls.load(Ordering::SeqCst), 1);

    manager.refresh_at(t0() + Duration::minutes(31)).await.unwrap();
    assert_eq!(locator.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stop_is_resolved_again_after_failure() {
    let board = FakeBoard::default();
    board.push(Ok(vec![conn("S 1", t0() + Duration::minutes(10))]));
    board.push(Err(network_error()));
    let locator = FakeLocator::default();
    let mut manager = manager(&board, &locator);

    manager.refresh_at(t0()).await.unwrap();
    assert!(manager.refresh_at(t0() + Duration::minutes(1)).await.is_err());
    manager.refresh_at(t0() + Duration::minutes(2)).await.unwrap();
    assert_eq!(locator.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn resolution_error_keeps_window() {
    let board = FakeBoard::default();
    board.push(Ok(vec![conn("S 1", t0() + Duration::minutes(10))]));
    let locator = FakeLocator::default();
    let mut manager = manager(&board, &locator);
    manager.refresh_at(t0()).await.unwrap();

    locator.fail.store(true, Ordering::SeqCst);
    let later = t0() + Duration::minutes(31);
    let err = manager.refresh_at(later).await.unwrap_err();
    assert!(matches!(err, RefreshError::Resolution(_)));

    assert_eq!(manager.current_view(t0() + Duration::minutes(5)).len(), 1);
    assert_eq!(manager.snapshot().location_name(), Some("Bern"));
    assert!(manager.is_stale(later));
}

//////////////////////////////////////////////////////////
// Reader and refresh loop
//////////////////////////////////////////////////////////
#[tokio::test]
async fn reader_sees_swapped_window() {
    let board = FakeBoard::default();
    board.push(Ok(vec![conn("S 1", t0() + Duration::minutes(10))]));
    board.push(Ok(vec![conn("S 9", t0() + Duration::minutes(15))]));
    let mut manager = manager(&board, &FakeLocator::default());
    let reader = manager.reader();
    assert!(reader.current_view(t0()).is_empty());

    manager.refresh_at(t0()).await.unwrap();
    assert_eq!(lines(&reader.current_view(t0())), vec!["S 1"]);

    manager.refresh_at(t0() + Duration::minutes(1)).await.unwrap();
    assert_eq!(lines(&reader.current_view(t0())), vec!["S 9"]);
    assert!(!reader.is_stale(t0() + Duration::minutes(1)));
}

#[tokio::test]
async fn loop_refreshes_at_start_and_on_demand() {
    let soon = Utc::now() + Duration::minutes(10);
    let board = FakeBoard::default();
    board.push(Ok(vec![conn("S 1", soon)]));
    board.push(Ok(vec![conn("S 1", soon), conn("S 2", soon + Duration::minutes(5))]));
    let manager = manager(&board, &FakeLocator::default());
    let mut reader = manager.reader();

    let (tx, rx) = mpsc::channel(1);
    let task = tokio::spawn(run_refresh_loop(
        manager,
        std::time::Duration::from_secs(3600),
        rx,
    ));
    let wait = std::time::Duration::from_secs(5);

    tokio::time::timeout(wait, reader.changed()).await.unwrap().unwrap();
    assert_eq!(reader.current_view(Utc::now()).len(), 1);

    tx.send(()).await.unwrap();
    tokio::time::timeout(wait, reader.changed()).await.unwrap().unwrap();
    assert_eq!(reader.current_view(Utc::now()).len(), 2);

    task.abort();
}
