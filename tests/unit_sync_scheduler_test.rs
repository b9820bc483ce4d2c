// tests/unit_sync_scheduler_test.rs

use specular::core::state::SyncScheduler;
use std::time::Duration;

const FAST: Duration = Duration::from_secs(5 * 60);
const DEFAULT: Duration = Duration::from_secs(30 * 60);
const SLOW: Duration = Duration::from_secs(60 * 60);

#[tokio::test(start_paused = true)]
async fn test_starts_at_default_interval() {
    let scheduler = SyncScheduler::default();
    assert_eq!(scheduler.current_interval(), DEFAULT);
}

#[tokio::test(start_paused = true)]
async fn test_error_drops_to_fast_interval() {
    let scheduler = SyncScheduler::default();
    scheduler.record_result(false);
    assert_eq!(scheduler.current_interval(), FAST);
}

#[tokio::test(start_paused = true)]
async fn test_success_after_error_returns_to_default() {
    let scheduler = SyncScheduler::default();
    scheduler.record_result(false);
    scheduler.record_result(true);
    // The error is still recent; the slow interval stays gated.
    assert_eq!(scheduler.current_interval(), DEFAULT);
}

#[tokio::test(start_paused = true)]
async fn test_slow_interval_after_two_quiet_hours() {
    let scheduler = SyncScheduler::default();
    scheduler.record_result(true);
    tokio::time::advance(Duration::from_secs(2 * 60 * 60 + 1)).await;
    assert_eq!(scheduler.current_interval(), SLOW);
}

#[tokio::test(start_paused = true)]
async fn test_slow_interval_gated_on_quiet_window_after_error() {
    let scheduler = SyncScheduler::default();
    scheduler.record_result(false);
    scheduler.record_result(true);
    tokio::time::advance(Duration::from_secs(60 * 60)).await;
    // Only one quiet hour since the error: not slow yet.
    assert_eq!(scheduler.current_interval(), DEFAULT);
    tokio::time::advance(Duration::from_secs(60 * 60 + 1)).await;
    assert_eq!(scheduler.current_interval(), SLOW);
}

#[tokio::test(start_paused = true)]
async fn test_settles_after_consecutive_successes() {
    let scheduler = SyncScheduler::default();
    for _ in 0..5 {
        scheduler.record_result(true);
    }
    tokio::time::advance(Duration::from_secs(3 * 60 * 60)).await;
    assert_eq!(scheduler.current_interval(), SLOW);
    // One failure drops straight back to the fast interval.
    scheduler.record_result(false);
    assert_eq!(scheduler.current_interval(), FAST);
}
