use super::cache_item::{CacheItem, Snapshot};
use crate::vsphere::EntityRef;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};

/// Reference-keyed TTL store for one entity kind.
pub struct SensorCache<T> {
    name: &'static str,
    items: DashMap<EntityRef, CacheItem<T>>,
}

impl<T: Clone> SensorCache<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            items: DashMap::new(),
        }
    }

    pub fn get(&self, r: &EntityRef) -> Option<T> {
        self.items.get(r).map(|item| item.value().value().clone())
    }

    pub fn get_all(&self) -> Vec<T> {
        self.items.iter().map(|e| e.value().value().clone()).collect()
    }

    pub fn get_all_snapshots(&self) -> Vec<Snapshot<T>> {
        self.items.iter().map(|e| e.value().to_snapshot()).collect()
    }

    /// Sorted so that fan-out and dumps are deterministic.
    pub fn get_all_refs(&self) -> Vec<EntityRef> {
        let mut refs: Vec<EntityRef> = self.items.iter().map(|e| e.key().clone()).collect();
        refs.sort();
        refs
    }

    pub fn update(&self, r: EntityRef, value: T) {
        self.items.insert(r, CacheItem::new(value));
    }

    /// Drop every item at least `max_age` old. Returns how many were removed.
    pub fn clean(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let before = self.items.len();
        self.items.retain(|_, item| !item.is_expired_at(now, max_age));
        let removed = before.saturating_sub(self.items.len());
        if removed > 0 {
            log::debug!("[{}] cleaned {} objects from sensor cache", self.name, removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone + Serialize> SensorCache<T> {
    /// `{id: {timestamp, object}}` for every cached item.
    pub fn dump(&self) -> Value {
        let mut out = Map::new();
        for entry in self.items.iter() {
            out.insert(
                entry.key().id.clone(),
                json!({
                    "timestamp": entry.value().created_at(),
                    "object": entry.value().value(),
                }),
            );
        }
        Value::Object(out)
    }
}
