#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use dustbox::clock::Clock;
use dustbox::registry::Registry;
use dustbox::store::MemoryStore;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Deterministic clock for integration tests: settable time, counter-based
/// tokens so consecutive mints are always distinct.
pub struct TestClock {
    now_millis: AtomicI64,
    counter: AtomicU64,
}

impl TestClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now_millis: AtomicI64::new(now.timestamp_millis()),
            counter: AtomicU64::new(0),
        }
    }

    pub fn advance_days(&self, days: i64) {
        self.now_millis
            .fetch_add(days * 24 * 3600 * 1000, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_millis.load(Ordering::SeqCst))
            .unwrap_or_default()
    }

    fn new_token(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("test-token-{n:08}")
    }
}

pub fn jan1_2024() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Registry over a fresh in-memory store, pinned to 2024-01-01 with a
/// 30-day credential validity.
pub fn test_registry() -> (Arc<TestClock>, Arc<Registry>) {
    let clock = Arc::new(TestClock::at(jan1_2024()));
    let registry = Arc::new(Registry::new(
        clock.clone(),
        Arc::new(MemoryStore::new()),
        30,
    ));
    (clock, registry)
}

/// Seed a user with one registered, linked device.
pub async fn seed_user_with_device(registry: &Registry, userid: &str, did: &str) {
    registry.register_user(userid).await.expect("seed user");
    registry
        .register_device(did, "ls1ok3", "atom", "DEEBOT", "livingroom", "eco-ng")
        .await
        .expect("seed device");
    registry.link_device(userid, did).await.expect("link device");
}
