use super::auto_clean::AutoClean;
use super::auto_refresh::AutoRefresh;
use super::objects::{
    Cluster, ComputeResource, Datacenter, Datastore, Folder, Host, InventoryObject, ResourcePool,
    StoragePod, VirtualMachine,
};
use super::parent_chain::{walk_parent_chain, EntityLookup, EntityNode, ParentChain};
use super::scraper_config::{ScraperConfig, SensorConfig};
use super::sensor::{Cleanable, Sensor};
use super::sensor_inventory::{
    ClusterSensor, ComputeResourceSensor, DatacenterSensor, DatastoreSensor, FolderSensor,
    HostSensor, InventorySensor, ResourcePoolSensor, StoragePodSensor,
};
use super::sensor_metrics::SensorMetric;
use super::sensor_on_demand::OnDemandSensor;
use super::sensor_perf::{PerfSensor, HOST_PERF_MATCHER, VM_PERF_MATCHER};
use super::sensor_tags::{self, TagsSensor};
use super::sensor_virtual_machine::VirtualMachineSensor;
use crate::error::ScraperError;
use crate::pool::VCenterPool;
use crate::vsphere::{EntityKind, EntityRef, RestVSphereApi, VSphereApi};
use async_trait::async_trait;
use rand::Rng;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Refresh and clean schedulers of one enabled sensor.
struct SensorRunner {
    refresh: AutoRefresh,
    clean: AutoClean,
}

impl SensorRunner {
    fn new<S: Sensor + 'static>(sensor: &Arc<S>, config: &SensorConfig) -> Self {
        let refreshable: Arc<dyn Sensor> = sensor.clone();
        let cleanable: Arc<dyn Cleanable> = sensor.clone();
        Self {
            refresh: AutoRefresh::new(refreshable, config.refresh_interval),
            clean: AutoClean::new(cleanable, config.clean_interval, config.max_age),
        }
    }

    fn sensor(&self) -> &Arc<dyn Sensor> {
        self.refresh.sensor()
    }
}

/// Build the sensor only when enabled and register its schedulers.
fn schedule<S, F>(config: &SensorConfig, runners: &mut Vec<SensorRunner>, make: F) -> Option<Arc<S>>
where
    S: Sensor + 'static,
    F: FnOnce() -> S,
{
    if !config.enabled {
        return None;
    }
    let sensor = Arc::new(make());
    runners.push(SensorRunner::new(&sensor, config));
    Some(sensor)
}

fn start_delay(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

fn cached_node<T: InventoryObject>(
    sensor: &Option<Arc<InventorySensor<T>>>,
    r: &EntityRef,
) -> Option<EntityNode> {
    sensor.as_ref()?.get(r).map(|o| EntityNode::of(&o))
}

/// Owns the connection pool and every enabled sensor of one vCenter.
pub struct VCenterScraper {
    config: ScraperConfig,
    pool: Arc<VCenterPool>,
    cancel: CancellationToken,

    cluster: Option<Arc<ClusterSensor>>,
    compute_resource: Option<Arc<ComputeResourceSensor>>,
    datacenter: Option<Arc<DatacenterSensor>>,
    datastore: Option<Arc<DatastoreSensor>>,
    folder: Option<Arc<FolderSensor>>,
    host: Option<Arc<HostSensor>>,
    resource_pool: Option<Arc<ResourcePoolSensor>>,
    storage_pod: Option<Arc<StoragePodSensor>>,
    virtual_machine: Option<Arc<VirtualMachineSensor>>,
    tags: Option<Arc<TagsSensor>>,
    host_perf: Option<Arc<PerfSensor>>,
    virtual_machine_perf: Option<Arc<PerfSensor>>,
    on_demand: Arc<OnDemandSensor>,

    runners: Vec<SensorRunner>,
    on_demand_clean: AutoClean,
}

impl VCenterScraper {
    pub fn new(config: ScraperConfig) -> Result<Self, ScraperError> {
        config.validate()?;
        let api = RestVSphereApi::new(
            config.endpoint()?,
            config.username.clone(),
            config.password.clone(),
            config.insecure,
        )?;
        Self::with_api(config, Arc::new(api))
    }

    pub fn with_api(config: ScraperConfig, api: Arc<dyn VSphereApi>) -> Result<Self, ScraperError> {
        config.validate()?;
        let pool = Arc::new(VCenterPool::new(
            api,
            config.client_pool_size,
            config.reauth_backoff,
        )?);
        let mut runners = Vec::new();

        let cluster = schedule(&config.cluster, &mut runners, || {
            ClusterSensor::new(pool.clone())
        });
        let compute_resource = schedule(&config.compute_resource, &mut runners, || {
            ComputeResourceSensor::new(pool.clone())
        });
        let datacenter = schedule(&config.datacenter, &mut runners, || {
            DatacenterSensor::new(pool.clone())
        });
        let datastore = schedule(&config.datastore, &mut runners, || {
            DatastoreSensor::new(pool.clone())
        });
        let folder = schedule(&config.folder, &mut runners, || FolderSensor::new(pool.clone()));
        let host = schedule(&config.host, &mut runners, || HostSensor::new(pool.clone()));
        let resource_pool = schedule(&config.resource_pool, &mut runners, || {
            ResourcePoolSensor::new(pool.clone())
        });
        let storage_pod = schedule(&config.storage_pod, &mut runners, || {
            StoragePodSensor::new(pool.clone())
        });
        let virtual_machine = match &host {
            Some(hosts) => schedule(&config.virtual_machine, &mut runners, || {
                VirtualMachineSensor::new(pool.clone(), hosts.clone())
            }),
            None => None,
        };
        let tags = schedule(&config.tags.sensor_config(), &mut runners, || {
            TagsSensor::new(pool.clone(), config.tags.category_to_collect.clone())
        });
        let host_perf = match &host {
            Some(hosts) => schedule(&config.host_perf.sensor_config(), &mut runners, || {
                PerfSensor::host(hosts.clone(), pool.clone(), &config.host_perf)
            }),
            None => None,
        };
        let virtual_machine_perf = match &virtual_machine {
            Some(vms) => schedule(
                &config.virtual_machine_perf.sensor_config(),
                &mut runners,
                || PerfSensor::virtual_machine(vms.clone(), pool.clone(), &config.virtual_machine_perf),
            ),
            None => None,
        };

        let on_demand = Arc::new(OnDemandSensor::new(pool.clone()));
        let on_demand_clean = AutoClean::new(
            on_demand.clone(),
            config.on_demand.clean_interval,
            config.on_demand.max_age,
        );

        Ok(Self {
            config,
            pool,
            cancel: CancellationToken::new(),
            cluster,
            compute_resource,
            datacenter,
            datastore,
            folder,
            host,
            resource_pool,
            storage_pod,
            virtual_machine,
            tags,
            host_perf,
            virtual_machine_perf,
            on_demand,
            runners,
            on_demand_clean,
        })
    }

    /// Log in, launch every scheduler and wait until each sensor has
    /// completed its first refresh.
    pub async fn start(&self) -> Result<(), ScraperError> {
        self.pool.init().await?;
        for runner in &self.runners {
            runner
                .refresh
                .start(&self.cancel, start_delay(self.config.start_jitter))?;
            runner.clean.start(&self.cancel);
        }
        self.on_demand_clean.start(&self.cancel);
        log::info!("[scraper] started {} sensors", self.runners.len());

        let startup = async {
            for runner in &self.runners {
                runner.refresh.wait_till_startup().await;
            }
        };
        if tokio::time::timeout(self.config.startup_timeout, startup)
            .await
            .is_err()
        {
            let not_started: Vec<String> = self
                .sensors()
                .filter(|s| !s.started().is_started())
                .map(|s| s.name().to_string())
                .collect();
            log::error!("[scraper] sensors not started in time: {:?}", not_started);
            return Err(ScraperError::StartupTimeout(not_started));
        }
        log::info!("[scraper] all sensors started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        for runner in &self.runners {
            runner.refresh.stop();
        }
        self.pool.destroy().await;
        log::info!("[scraper] stopped");
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<VCenterPool> {
        &self.pool
    }

    /// Every enabled scheduled sensor.
    pub fn sensors(&self) -> impl Iterator<Item = &Arc<dyn Sensor>> {
        self.runners.iter().map(SensorRunner::sensor)
    }

    pub fn cluster(&self) -> Option<&Arc<ClusterSensor>> {
        self.cluster.as_ref()
    }

    pub fn compute_resource(&self) -> Option<&Arc<ComputeResourceSensor>> {
        self.compute_resource.as_ref()
    }

    pub fn datacenter(&self) -> Option<&Arc<DatacenterSensor>> {
        self.datacenter.as_ref()
    }

    pub fn datastore(&self) -> Option<&Arc<DatastoreSensor>> {
        self.datastore.as_ref()
    }

    pub fn folder(&self) -> Option<&Arc<FolderSensor>> {
        self.folder.as_ref()
    }

    pub fn host(&self) -> Option<&Arc<HostSensor>> {
        self.host.as_ref()
    }

    pub fn resource_pool(&self) -> Option<&Arc<ResourcePoolSensor>> {
        self.resource_pool.as_ref()
    }

    pub fn storage_pod(&self) -> Option<&Arc<StoragePodSensor>> {
        self.storage_pod.as_ref()
    }

    pub fn virtual_machine(&self) -> Option<&Arc<VirtualMachineSensor>> {
        self.virtual_machine.as_ref()
    }

    pub fn tags(&self) -> Option<&Arc<TagsSensor>> {
        self.tags.as_ref()
    }

    pub fn host_perf(&self) -> Option<&Arc<PerfSensor>> {
        self.host_perf.as_ref()
    }

    pub fn virtual_machine_perf(&self) -> Option<&Arc<PerfSensor>> {
        self.virtual_machine_perf.as_ref()
    }

    pub fn on_demand(&self) -> &Arc<OnDemandSensor> {
        &self.on_demand
    }

    pub async fn get_parent_chain(&self, r: &EntityRef) -> ParentChain {
        walk_parent_chain(self, r).await
    }

    /// Queue a manual refresh on every sensor matching one of `names`.
    /// Nothing is queued unless every matching sensor is running.
    /// Returns the names of the triggered sensors.
    pub fn refresh_sensors<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<&'static str>, ScraperError> {
        let matching: Vec<&SensorRunner> = self
            .runners
            .iter()
            .filter(|runner| names.iter().any(|n| runner.sensor().matches(n.as_ref())))
            .collect();
        if matching.is_empty() {
            return Err(ScraperError::SensorNotFound(join_names(names)));
        }
        if let Some(stopped) = matching.iter().find(|runner| !runner.refresh.is_running()) {
            return Err(ScraperError::SensorNotRunning(stopped.sensor().name().to_string()));
        }

        let mut triggered = Vec::with_capacity(matching.len());
        let mut first_err = None;
        for runner in matching {
            let name = runner.sensor().name();
            match runner.refresh.trigger_refresh() {
                Ok(()) => triggered.push(name),
                Err(e) => {
                    log::warn!("[scraper] manual refresh of {} failed: {}", name, e);
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) if triggered.is_empty() => Err(e),
            _ => Ok(triggered),
        }
    }

    /// Cached content of every sensor matching one of `names`, keyed by
    /// sensor name.
    pub fn dump<S: AsRef<str>>(&self, names: &[S]) -> Result<Value, ScraperError> {
        let mut out = Map::new();
        for sensor in self.sensors() {
            if names.iter().any(|n| sensor.matches(n.as_ref())) {
                out.insert(sensor.name().to_string(), sensor.dump());
            }
        }
        if names.iter().any(|n| self.on_demand.matches(n.as_ref())) {
            out.insert(self.on_demand.name().to_string(), self.on_demand.dump());
        }
        if out.is_empty() {
            return Err(ScraperError::SensorNotFound(join_names(names)));
        }
        Ok(Value::Object(out))
    }

    /// Health metrics of every sensor, plus an `enabled` gauge per known
    /// sensor.
    pub fn sensor_metrics(&self) -> Vec<SensorMetric> {
        let mut metrics: Vec<SensorMetric> = self
            .sensors()
            .flat_map(|s| s.health_metrics())
            .collect();
        metrics.extend(self.on_demand.health_metrics());
        for (name, enabled) in self.enabled_flags() {
            metrics.push(SensorMetric::new(
                name,
                "enabled",
                if enabled { 1.0 } else { 0.0 },
                "boolean",
            ));
        }
        metrics
    }

    fn enabled_flags(&self) -> [(&'static str, bool); 12] {
        [
            (Cluster::MATCHER.first(), self.cluster.is_some()),
            (ComputeResource::MATCHER.first(), self.compute_resource.is_some()),
            (Datacenter::MATCHER.first(), self.datacenter.is_some()),
            (Datastore::MATCHER.first(), self.datastore.is_some()),
            (Folder::MATCHER.first(), self.folder.is_some()),
            (Host::MATCHER.first(), self.host.is_some()),
            (ResourcePool::MATCHER.first(), self.resource_pool.is_some()),
            (StoragePod::MATCHER.first(), self.storage_pod.is_some()),
            (VirtualMachine::MATCHER.first(), self.virtual_machine.is_some()),
            (sensor_tags::MATCHER.first(), self.tags.is_some()),
            (HOST_PERF_MATCHER.first(), self.host_perf.is_some()),
            (VM_PERF_MATCHER.first(), self.virtual_machine_perf.is_some()),
        ]
    }
}

fn join_names<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| n.as_ref())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl EntityLookup for VCenterScraper {
    /// Scheduled caches first, on-demand fetch for anything they miss.
    async fn lookup(&self, r: &EntityRef) -> Option<EntityNode> {
        let cached = match r.kind {
            EntityKind::Cluster => cached_node(&self.cluster, r),
            EntityKind::ComputeResource => cached_node(&self.compute_resource, r),
            EntityKind::Datacenter => cached_node(&self.datacenter, r),
            EntityKind::Datastore => cached_node(&self.datastore, r),
            EntityKind::Folder => cached_node(&self.folder, r),
            EntityKind::Host => cached_node(&self.host, r),
            EntityKind::ResourcePool => cached_node(&self.resource_pool, r),
            EntityKind::StoragePod => cached_node(&self.storage_pod, r),
            EntityKind::VirtualMachine => self
                .virtual_machine
                .as_ref()
                .and_then(|s| s.get(r))
                .map(|vm| EntityNode::of(&vm)),
            EntityKind::Other(_) => None,
        };
        if cached.is_some() {
            return cached;
        }
        self.on_demand
            .get(r, &self.cancel)
            .await
            .map(EntityNode::from)
    }
}
