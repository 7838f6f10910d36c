use super::sensor::Cleanable;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Periodic eviction sweep, on its own cadence independent of refresh.
pub struct AutoClean {
    sensor: Arc<dyn Cleanable>,
    clean_interval: Duration,
    max_age: Duration,
}

impl AutoClean {
    pub fn new(sensor: Arc<dyn Cleanable>, clean_interval: Duration, max_age: Duration) -> Self {
        Self {
            sensor,
            clean_interval,
            max_age,
        }
    }

    pub fn start(&self, cancel: &CancellationToken) {
        let sensor = self.sensor.clone();
        let max_age = self.max_age;
        let period = self.clean_interval;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        log::info!("[{}] cleanup stopped", sensor.name());
                        return;
                    }
                    _ = ticker.tick() => {
                        sensor.clean(max_age);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::sensor_cache::SensorCache;
    use crate::vsphere::{EntityKind, EntityRef};
    use serde_json::Value;

    struct CacheOnly {
        cache: SensorCache<u32>,
    }

    impl Cleanable for CacheOnly {
        fn name(&self) -> &'static str {
            "cache_only"
        }

        fn matches(&self, name: &str) -> bool {
            name == "cache_only"
        }

        fn clean(&self, max_age: Duration) {
            self.cache.clean(max_age);
        }

        fn dump(&self) -> Value {
            Value::Null
        }
    }

    #[tokio::test]
    async fn test_sweeps_expired_items() {
        let sensor = Arc::new(CacheOnly {
            cache: SensorCache::new("cache_only"),
        });
        sensor.cache.update(EntityRef::new(EntityKind::Folder, "group-1"), 1);

        let cancel = CancellationToken::new();
        let auto = AutoClean::new(sensor.clone(), Duration::from_millis(10), Duration::from_millis(30));
        auto.start(&cancel);

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(sensor.cache.len(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(sensor.cache.is_empty());
        cancel.cancel();
    }
}
