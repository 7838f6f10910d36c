use super::cache_item::Snapshot;
use super::objects::{parse_objects, InventoryObject, VirtualMachine};
use super::sensor::{Cleanable, Sensor};
use super::sensor_cache::SensorCache;
use super::sensor_inventory::HostSensor;
use super::sensor_metrics::{RefreshStats, SensorStats, Stopwatch};
use super::started_check::StartedCheck;
use crate::error::ScraperError;
use crate::helper::cancellable;
use crate::pool::VCenterPool;
use crate::vsphere::EntityRef;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Virtual machines are listed per host: one sub-query per known host, run
/// concurrently and bounded by the pool size.
pub struct VirtualMachineSensor {
    pool: Arc<VCenterPool>,
    hosts: Arc<HostSensor>,
    cache: SensorCache<VirtualMachine>,
    stats: SensorStats,
    started: StartedCheck,
}

impl VirtualMachineSensor {
    pub fn new(pool: Arc<VCenterPool>, hosts: Arc<HostSensor>) -> Self {
        Self {
            pool,
            hosts,
            cache: SensorCache::new(VirtualMachine::MATCHER.first()),
            stats: SensorStats::averaged(),
            started: StartedCheck::new(),
        }
    }

    pub fn get(&self, r: &EntityRef) -> Option<VirtualMachine> {
        self.cache.get(r)
    }

    pub fn get_all(&self) -> Vec<VirtualMachine> {
        self.cache.get_all()
    }

    pub fn get_all_snapshots(&self) -> Vec<Snapshot<VirtualMachine>> {
        self.cache.get_all_snapshots()
    }

    pub fn get_all_refs(&self) -> Vec<EntityRef> {
        self.cache.get_all_refs()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

async fn query_vms_for_host(
    pool: &VCenterPool,
    host: &EntityRef,
    cancel: &CancellationToken,
) -> Result<(Vec<VirtualMachine>, RefreshStats), ScraperError> {
    let mut stopwatch = Stopwatch::start();
    let lease = pool.acquire(cancel).await?;
    stopwatch.mark();
    let res = cancellable(
        cancel,
        pool.api().retrieve_all(
            lease.session(),
            &VirtualMachine::KIND,
            Some(host),
            VirtualMachine::PROPERTIES,
        ),
    )
    .await;
    lease.release();
    let stats = stopwatch.finish();
    Ok((parse_objects("vm", res?), stats))
}

/// Merge per-host results. A VM seen under several hosts (mid-migration)
/// keeps the copy with the latest change version; ties keep the first seen.
/// A missing or unreadable change version counts as "now".
pub fn merge_by_change_version(
    vms: impl IntoIterator<Item = VirtualMachine>,
) -> Vec<VirtualMachine> {
    let now = Utc::now();
    let version = |vm: &VirtualMachine| vm.change_version().unwrap_or(now);
    let mut merged: HashMap<EntityRef, VirtualMachine> = HashMap::new();
    for vm in vms {
        match merged.entry(vm.self_ref.clone()) {
            Entry::Occupied(mut e) => {
                if version(&vm) > version(e.get()) {
                    e.insert(vm);
                }
            }
            Entry::Vacant(e) => {
                e.insert(vm);
            }
        }
    }
    let mut out: Vec<VirtualMachine> = merged.into_values().collect();
    out.sort_by(|a, b| a.self_ref.cmp(&b.self_ref));
    out
}

impl Cleanable for VirtualMachineSensor {
    fn name(&self) -> &'static str {
        VirtualMachine::MATCHER.first()
    }

    fn matches(&self, name: &str) -> bool {
        VirtualMachine::MATCHER.matches(name)
    }

    fn clean(&self, max_age: Duration) {
        self.cache.clean(max_age);
    }

    fn dump(&self) -> Value {
        self.cache.dump()
    }
}

#[async_trait]
impl Sensor for VirtualMachineSensor {
    async fn refresh(&self, cancel: &CancellationToken) -> Result<(), ScraperError> {
        // An empty host cache before startup does not mean there are no hosts.
        cancellable(cancel, async {
            self.hosts.started().wait().await;
            Ok(())
        })
        .await?;

        let hosts = self.hosts.get_all_refs();
        if hosts.is_empty() {
            log::debug!("[vm] no hosts known, nothing to refresh");
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        for host in hosts.iter().cloned() {
            let pool = self.pool.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let res = query_vms_for_host(&pool, &host, &cancel).await;
                (host, res)
            });
        }

        let mut failed = 0;
        let mut found = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok((vms, stats)))) => {
                    self.stats.upload(stats);
                    found.extend(vms);
                }
                Ok((host, Err(e))) => {
                    failed += 1;
                    log::warn!("[vm] failed to get vms for host {}: {}", host.id, e);
                }
                Err(e) => {
                    failed += 1;
                    log::error!("[vm] host query task failed: {}", e);
                }
            }
        }
        if failed == hosts.len() {
            return Err(ScraperError::AllHostQueriesFailed(failed));
        }

        let merged = merge_by_change_version(found);
        log::debug!(
            "[vm] refreshed {} vms from {} of {} hosts",
            merged.len(),
            hosts.len() - failed,
            hosts.len()
        );
        for vm in merged {
            self.cache.update(vm.self_ref.clone(), vm);
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
