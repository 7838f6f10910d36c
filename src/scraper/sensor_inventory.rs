use super::cache_item::Snapshot;
use super::objects::{
    parse_objects, Cluster, ComputeResource, Datacenter, Datastore, Folder, Host,
    InventoryObject, ResourcePool, StoragePod,
};
use super::sensor::{Cleanable, Sensor};
use super::sensor_cache::SensorCache;
use super::sensor_metrics::{SensorStats, Stopwatch};
use super::started_check::StartedCheck;
use crate::error::ScraperError;
use crate::helper::cancellable;
use crate::pool::VCenterPool;
use crate::vsphere::EntityRef;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub type ClusterSensor = InventorySensor<Cluster>;
pub type ComputeResourceSensor = InventorySensor<ComputeResource>;
pub type DatacenterSensor = InventorySensor<Datacenter>;
pub type DatastoreSensor = InventorySensor<Datastore>;
pub type FolderSensor = InventorySensor<Folder>;
pub type HostSensor = InventorySensor<Host>;
pub type ResourcePoolSensor = InventorySensor<ResourcePool>;
pub type StoragePodSensor = InventorySensor<StoragePod>;

/// Scheduled cache of every object of one kind. A refresh fetches the
/// whole kind with a fixed property set in one query.
pub struct InventorySensor<T: InventoryObject> {
    pool: Arc<VCenterPool>,
    cache: SensorCache<T>,
    stats: SensorStats,
    started: StartedCheck,
}

impl<T: InventoryObject> InventorySensor<T> {
    pub fn new(pool: Arc<VCenterPool>) -> Self {
        Self {
            pool,
            cache: SensorCache::new(T::MATCHER.first()),
            stats: SensorStats::averaged(),
            started: StartedCheck::new(),
        }
    }

    pub fn get(&self, r: &EntityRef) -> Option<T> {
        self.cache.get(r)
    }

    pub fn get_all(&self) -> Vec<T> {
        self.cache.get_all()
    }

    pub fn get_all_snapshots(&self) -> Vec<Snapshot<T>> {
        self.cache.get_all_snapshots()
    }

    pub fn get_all_refs(&self) -> Vec<EntityRef> {
        self.cache.get_all_refs()
    }

    pub fn update(&self, object: T) {
        self.cache.update(object.self_ref().clone(), object);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl<T: InventoryObject> Cleanable for InventorySensor<T> {
    fn name(&self) -> &'static str {
        T::MATCHER.first()
    }

    fn matches(&self, name: &str) -> bool {
        T::MATCHER.matches(name)
    }

    fn clean(&self, max_age: Duration) {
        self.cache.clean(max_age);
    }

    fn dump(&self) -> Value {
        self.cache.dump()
    }
}

#[async_trait]
impl<T: InventoryObject> Sensor for InventorySensor<T> {
    async fn refresh(&self, cancel: &CancellationToken) -> Result<(), ScraperError> {
        let mut stopwatch = Stopwatch::start();
        let lease = self.pool.acquire(cancel).await?;
        stopwatch.mark();
        let res = cancellable(
            cancel,
            self.pool
                .api()
                .retrieve_all(lease.session(), &T::KIND, None, T::PROPERTIES),
        )
        .await;
        lease.release();
        self.stats.upload(stopwatch.finish());

        let objects: Vec<T> = parse_objects(self.name(), res?);
        let count = objects.len();
        for object in objects {
            self.update(object);
        }
        log::debug!("[{}] refreshed {} objects", self.name(), count);
        Ok(())
    }

    fn stats(&self) -> &SensorStats {
        &self.stats
    }

    fn started(&self) -> &StartedCheck {
        &self.started
    }
}
