use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use vellum::config::{FlagStore, APP_RUN_FLAG};
use vellum::governor::{GovernorPolicy, IoEvent, IoGovernor};

fn governor(max_per_minute: u32, tick: Duration) -> Arc<IoGovernor> {
    Arc::new(IoGovernor::new(GovernorPolicy {
        max_events_per_minute: max_per_minute,
        tick_interval: tick,
    }))
}

#[test]
fn test_window_limit_scales_to_tick_interval() {
    // 1000/min over a 10 s window → 166 events per window.
    let policy = GovernorPolicy::default();
    assert_eq!(policy.window_limit(), 166);

    // 6/min over a 60 s window → 6 events per window.
    let policy = GovernorPolicy {
        max_events_per_minute: 6,
        tick_interval: Duration::from_secs(60),
    };
    assert_eq!(policy.window_limit(), 6);

    // Sub-second windows never degenerate to zero.
    let policy = GovernorPolicy {
        max_events_per_minute: 6,
        tick_interval: Duration::from_millis(50),
    };
    assert_eq!(policy.window_limit(), 1);
}

#[test]
fn test_first_n_events_pass_then_limit_trips() {
    let governor = governor(6, Duration::from_secs(60));
    for i in 0..6 {
        let event = if i % 2 == 0 { IoEvent::Write } else { IoEvent::Read };
        governor.record(event).unwrap_or_else(|e| panic!("event {i} rejected: {e}"));
    }

    let err = governor.record(IoEvent::Write).unwrap_err();
    assert_eq!(err.limit, 6);
    assert_eq!(err.recorded, 7);
    // The rejected event still counts against the window.
    assert_eq!(governor.events_in_window(), 7);
}

#[test]
fn test_window_reset_rearms_the_limit() {
    let governor = governor(6, Duration::from_secs(60));
    for _ in 0..6 {
        governor.record(IoEvent::Write).unwrap();
    }
    governor.record(IoEvent::Write).unwrap_err();

    governor.reset_window();
    for _ in 0..6 {
        governor.record(IoEvent::Write).unwrap();
    }
    governor.record(IoEvent::Write).unwrap_err();
}

#[test]
fn test_background_tick_clears_the_window() {
    let dir = TempDir::new().unwrap();
    let flags = Arc::new(FlagStore::new(dir.path()));
    flags.raise(APP_RUN_FLAG).unwrap();

    let governor = governor(1000, Duration::from_millis(50));
    let handle = Arc::clone(&governor).start(Arc::clone(&flags)).unwrap();

    governor.record(IoEvent::Write).unwrap();
    governor.record(IoEvent::Read).unwrap();
    assert!(governor.events_in_window() >= 1);

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(governor.events_in_window(), 0);
    assert!(handle.is_ticking());
    handle.shutdown();
}

#[test]
fn test_tick_without_app_run_flag_is_fatal() {
    let dir = TempDir::new().unwrap();
    // No app_run flag raised: the first tick must kill the tick thread.
    let flags = Arc::new(FlagStore::new(dir.path()));

    let governor = governor(1000, Duration::from_millis(50));
    let handle = Arc::clone(&governor).start(flags).unwrap();

    std::thread::sleep(Duration::from_millis(200));
    assert!(!handle.is_ticking());
    handle.shutdown();
}

#[test]
fn test_shutdown_stops_future_ticks() {
    let dir = TempDir::new().unwrap();
    let flags = Arc::new(FlagStore::new(dir.path()));
    flags.raise(APP_RUN_FLAG).unwrap();

    let governor = governor(1000, Duration::from_millis(50));
    let handle = Arc::clone(&governor).start(flags).unwrap();
    handle.shutdown();

    // With the tick gone, recorded events are never cleared.
    governor.record(IoEvent::Write).unwrap();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(governor.events_in_window(), 1);
}
