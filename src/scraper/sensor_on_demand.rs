use super::sensor::Cleanable;
use super::sensor_cache::SensorCache;
use super::sensor_metrics::{SensorMetric, SensorStats, Stopwatch};
use crate::error::ScraperError;
use crate::helper::{cancellable, Matcher};
use crate::pool::VCenterPool;
use crate::vsphere::{EntityRef, ManagedEntity};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ON_DEMAND_PROPERTIES: &[&str] = &["name", "parent"];
const ON_DEMAND_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const MATCHER: Matcher = Matcher::new(&["on_demand"]);

/// Lazily filled cache for references no scheduled sensor owns. Only
/// name and parent are fetched, which is all the parent chain needs.
pub struct OnDemandSensor {
    pool: Arc<VCenterPool>,
    cache: SensorCache<ManagedEntity>,
    stats: SensorStats,
    query_timeout: Duration,
}

impl OnDemandSensor {
    pub fn new(pool: Arc<VCenterPool>) -> Self {
        Self {
            pool,
            cache: SensorCache::new(MATCHER.first()),
            stats: SensorStats::averaged(),
            query_timeout: ON_DEMAND_QUERY_TIMEOUT,
        }
    }

    /// Cached entity, or fetch it now. Failures are logged and read as a miss.
    pub async fn get(&self, r: &EntityRef, cancel: &CancellationToken) -> Option<ManagedEntity> {
        if let Some(entity) = self.cache.get(r) {
            return Some(entity);
        }
        log::debug!("[on_demand] query {}", r);
        match self.query(r, cancel).await {
            Ok(Some(entity)) => {
                self.stats.success();
                self.cache.update(r.clone(), entity.clone());
                Some(entity)
            }
            Ok(None) => {
                self.stats.success();
                log::debug!("[on_demand] {} not found", r);
                None
            }
            Err(e) => {
                self.stats.fail();
                log::error!("[on_demand] failed to get {}: {}", r, e);
                None
            }
        }
    }

    pub fn get_cached(&self, r: &EntityRef) -> Option<ManagedEntity> {
        self.cache.get(r)
    }

    async fn query(
        &self,
        r: &EntityRef,
        cancel: &CancellationToken,
    ) -> Result<Option<ManagedEntity>, ScraperError> {
        let mut stopwatch = Stopwatch::start();
        let lease = self.pool.acquire(cancel).await?;
        stopwatch.mark();
        let res = tokio::time::timeout(
            self.query_timeout,
            cancellable(
                cancel,
                self.pool
                    .api()
                    .retrieve_one(lease.session(), r, ON_DEMAND_PROPERTIES),
            ),
        )
        .await;
        lease.release();
        self.stats.upload(stopwatch.finish());

        match res.map_err(|_| ScraperError::Timeout(self.query_timeout))?? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    pub fn health_metrics(&self) -> Vec<SensorMetric> {
        self.stats.compose(self.name())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Cleanable for OnDemandSensor {
    fn name(&self) -> &'static str {
        MATCHER.first()
    }

    fn matches(&self, name: &str) -> bool {
        MATCHER.matches(name)
    }

    fn clean(&self, max_age: Duration) {
        self.cache.clean(max_age);
    }

    fn dump(&self) -> Value {
        self.cache.dump()
    }
}
