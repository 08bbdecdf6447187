use std::sync::Arc;
use std::time::Duration;

use mxlimit_rate_limit::{ConcurrencyTracker, FixedWindowLimiter, LimitSpec, RateCheck};
use mxlimit_store::{CounterStore, MemoryStore};

#[test]
fn test_limit_spec_forms() {
    assert_eq!(LimitSpec::parse("20/1h"), Some(LimitSpec { limit: 20, ttl_secs: 3600 }));
    assert_eq!(LimitSpec::parse("5"), Some(LimitSpec { limit: 5, ttl_secs: 60 }));
    assert_eq!(LimitSpec::parse("0"), Some(LimitSpec { limit: 0, ttl_secs: 60 }));
    assert_eq!(LimitSpec::parse("abc"), None);
}

#[tokio::test(start_paused = true)]
async fn test_fixed_window_basic() {
    let store = MemoryStore::new();
    let limiter = FixedWindowLimiter::new(Arc::new(store.clone()));

    // Should allow 5 hits per 1-second window
    for n in 1..=5 {
        let check = limiter.hit("test-client", "5/1s").await.unwrap();
        assert_eq!(check, RateCheck::Within { count: n, limit: 5 });
    }

    // 6th should be denied
    assert!(limiter.hit("test-client", "5/1s").await.unwrap().is_exceeded());

    tokio::time::advance(Duration::from_secs(1)).await;
    let check = limiter.hit("test-client", "5/1s").await.unwrap();
    assert_eq!(check, RateCheck::Within { count: 1, limit: 5 });
}

#[tokio::test]
async fn test_fixed_window_different_keys() {
    let limiter = FixedWindowLimiter::new(Arc::new(MemoryStore::new()));

    assert!(!limiter.hit("client-a", "2").await.unwrap().is_exceeded());
    assert!(!limiter.hit("client-a", "2").await.unwrap().is_exceeded());
    assert!(limiter.hit("client-a", "2").await.unwrap().is_exceeded());

    // Different client should have its own window
    assert!(!limiter.hit("client-b", "2").await.unwrap().is_exceeded());
    assert!(!limiter.hit("client-b", "2").await.unwrap().is_exceeded());
    assert!(limiter.hit("client-b", "2").await.unwrap().is_exceeded());
}

#[tokio::test(start_paused = true)]
async fn test_window_expiry_set_on_first_hit_only() {
    let store = MemoryStore::new();
    let limiter = FixedWindowLimiter::new(Arc::new(store.clone()));

    limiter.hit("k", "10/1m").await.unwrap();
    assert_eq!(store.ttl("k"), Some(Duration::from_secs(60)));

    // Later hits leave the window where it is.
    store.expire("k", 5).await.unwrap();
    limiter.hit("k", "10/1m").await.unwrap();
    assert_eq!(store.ttl("k"), Some(Duration::from_secs(5)));
}

#[tokio::test]
async fn test_concurrency_round_trip() {
    let store = MemoryStore::new();
    let tracker = ConcurrencyTracker::new(Arc::new(store.clone()));

    for expected in 1..=3 {
        assert_eq!(tracker.connect("concurrency|192.0.2.1").await.unwrap().occupancy.count, expected);
    }
    for expected in (0..3).rev() {
        assert_eq!(tracker.disconnect("concurrency|192.0.2.1").await.unwrap(), expected);
    }
    assert_eq!(store.get("concurrency|192.0.2.1").await.unwrap(), Some(0));
}
