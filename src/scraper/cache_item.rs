use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Cached value with its creation time. Expiry is only ever checked, never
/// enforced on write.
#[derive(Debug, Clone)]
pub struct CacheItem<T> {
    value: T,
    created: Instant,
    created_at: DateTime<Utc>,
}

impl<T> CacheItem<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            created: Instant::now(),
            created_at: Utc::now(),
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.is_expired_at(Instant::now(), max_age)
    }

    // An item exactly `max_age` old is expired.
    pub fn is_expired_at(&self, now: Instant, max_age: Duration) -> bool {
        now.saturating_duration_since(self.created) >= max_age
    }
}

impl<T: Clone> CacheItem<T> {
    pub fn to_snapshot(&self) -> Snapshot<T> {
        Snapshot {
            timestamp: self.created_at,
            value: self.value.clone(),
        }
    }
}

/// Value stamped with the moment it was acquired from the remote API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot<T> {
    pub timestamp: DateTime<Utc>,
    pub value: T,
}
