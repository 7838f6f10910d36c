use super::sensor::{Cleanable, Sensor};
use super::sensor_cache::SensorCache;
use super::sensor_metrics::{SensorStats, Stopwatch};
use super::started_check::StartedCheck;
use crate::error::ScraperError;
use crate::helper::{cancellable, Matcher};
use crate::pool::{RestLease, VCenterPool};
use crate::vsphere::EntityRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const MATCHER: Matcher = Matcher::new(&["tags", "tag"]);

/// Tags attached to one object, keyed by category name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSet {
    pub object: EntityRef,
    pub tags: BTreeMap<String, String>,
}

impl TagSet {
    pub fn get_tag(&self, category: &str) -> Option<&str> {
        self.tags.get(category).map(String::as_str)
    }
}

pub struct TagsSensor {
    pool: Arc<VCenterPool>,
    categories: Vec<String>,
    cache: SensorCache<TagSet>,
    stats: SensorStats,
    started: StartedCheck,
}

impl TagsSensor {
    /// `categories` limits collection to those category names; empty means all.
    pub fn new(pool: Arc<VCenterPool>, categories: Vec<String>) -> Self {
        Self {
            pool,
            categories,
            cache: SensorCache::new(MATCHER.first()),
            stats: SensorStats::last_value(),
            started: StartedCheck::new(),
        }
    }

    pub fn get(&self, r: &EntityRef) -> Option<TagSet> {
        self.cache.get(r)
    }

    pub fn get_all(&self) -> Vec<TagSet> {
        self.cache.get_all()
    }

    async fn collect(
        &self,
        lease: &RestLease,
        cancel: &CancellationToken,
    ) -> Result<HashMap<EntityRef, TagSet>, ScraperError> {
        let api = self.pool.api();
        let rest = lease.session();
        let categories = cancellable(cancel, api.list_tag_categories(rest)).await?;

        let mut object_tags: HashMap<EntityRef, TagSet> = HashMap::new();
        for cat in categories
            .iter()
            .filter(|c| self.categories.is_empty() || self.categories.contains(&c.name))
        {
            let tags = cancellable(cancel, api.list_tags_for_category(rest, &cat.id)).await?;
            for tag in tags {
                let attached = cancellable(cancel, api.list_attached_objects(rest, &tag.id)).await?;
                for object in attached {
                    object_tags
                        .entry(object.clone())
                        .or_insert_with(|| TagSet {
                            object,
                            tags: BTreeMap::new(),
                        })
                        .tags
                        .insert(cat.name.clone(), tag.name.clone());
                }
            }
        }
        Ok(object_tags)
    }
}

impl Cleanable for TagsSensor {
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

#[async_trait]
impl Sensor for TagsSensor {
    async fn refresh(&self, cancel: &CancellationToken) -> Result<(), ScraperError> {
        let mut stopwatch = Stopwatch::start();
        let lease = self.pool.acquire_rest(cancel).await?;
        stopwatch.mark();
        let res = self.collect(&lease, cancel).await;
        lease.release();
        self.stats.upload(stopwatch.finish());

        let object_tags = res?;
        log::debug!("[tags] refreshed tags of {} objects", object_tags.len());
        for (r, tag_set) in object_tags {
            self.cache.update(r, tag_set);
        }
        Ok(())
    }

    fn stats(&self) -> &SensorStats {
        &self.stats
    }

    fn started(&self) -> &StartedCheck {
        &self.started
    }
}
