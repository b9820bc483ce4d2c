// tests/unit_limiter_test.rs

use specular::core::limiter::RateLimiter;
use std::time::Duration;

#[tokio::test]
async fn test_fresh_channel_has_full_budget() {
    let limiter = RateLimiter::new();
    assert_eq!(limiter.channel_budget("chan"), 5);
}

#[tokio::test]
async fn test_budget_decreases_with_records() {
    let limiter = RateLimiter::new();
    for _ in 0..3 {
        limiter.record_request("chan");
    }
    assert_eq!(limiter.channel_budget("chan"), 2);
    assert_eq!(limiter.channel_budget("other"), 5);
}

#[tokio::test]
async fn test_wait_returns_immediately_with_budget() {
    let limiter = RateLimiter::new();
    // Must not suspend; a generous timeout guards regressions.
    tokio::time::timeout(Duration::from_secs(1), limiter.wait_for_request("chan"))
        .await
        .expect("wait must not block with budget available");
}

#[tokio::test(start_paused = true)]
async fn test_wait_suspends_until_channel_window_frees() {
    let limiter = RateLimiter::new();
    for _ in 0..5 {
        limiter.record_request("chan");
    }
    let started = tokio::time::Instant::now();
    limiter.wait_for_request("chan").await;
    // The paused clock auto-advances through the sleep; the wait must
    // have covered the rest of the 60-second window.
    assert!(started.elapsed() >= Duration::from_secs(59));
}

#[tokio::test(start_paused = true)]
async fn test_channel_window_slides() {
    let limiter = RateLimiter::new();
    for _ in 0..5 {
        limiter.record_request("chan");
    }
    assert_eq!(limiter.channel_budget("chan"), 0);
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(limiter.channel_budget("chan"), 5);
}

#[tokio::test(start_paused = true)]
async fn test_global_window_slides() {
    let limiter = RateLimiter::new();
    for n in 0..50 {
        limiter.record_request(&format!("chan-{n}"));
    }
    let started = tokio::time::Instant::now();
    limiter.wait_for_request("fresh-channel").await;
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_drops_drained_buckets() {
    let limiter = RateLimiter::new();
    limiter.record_request("chan");
    assert_eq!(limiter.bucket_count(), 1);
    tokio::time::advance(Duration::from_secs(61)).await;
    limiter.sweep();
    assert_eq!(limiter.bucket_count(), 0);
}
