use super::performance::{PerfMetric, PerfSampler};
use super::scraper_config::PerfSensorConfig;
use super::sensor::{Cleanable, Sensor};
use super::sensor_inventory::HostSensor;
use super::sensor_metrics::SensorStats;
use super::sensor_virtual_machine::VirtualMachineSensor;
use super::started_check::StartedCheck;
use crate::error::ScraperError;
use crate::helper::{cancellable, dedup, Matcher};
use crate::pool::VCenterPool;
use crate::vsphere::EntityRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn default_host_perf_metrics() -> Vec<String> {
    [
        "cpu.usagemhz.average",
        "cpu.demand.average",
        "cpu.latency.average",
        "cpu.entitlement.latest",
        "cpu.ready.summation",
        "cpu.readiness.average",
        "cpu.costop.summation",
        "cpu.maxlimited.summation",
        "mem.entitlement.average",
        "mem.active.average",
        "mem.shared.average",
        "mem.vmmemctl.average",
        "mem.swapped.average",
        "mem.consumed.average",
        "net.bytesRx.average",
        "net.bytesTx.average",
        "net.errorsRx.summation",
        "net.errorsTx.summation",
        "net.droppedRx.summation",
        "net.droppedTx.summation",
        "datastore.read.average",
        "datastore.write.average",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub fn default_vm_perf_metrics() -> Vec<String> {
    [
        "cpu.usagemhz.average",
        "cpu.capacity.provisioned.average",
        "cpu.readiness.average",
        "cpu.costop.summation",
        "cpu.maxlimited.summation",
        "cpu.ready.summation",
        "mem.active.average",
        "mem.granted.average",
        "mem.consumed.average",
        "disk.throughput.contention.average",
        "disk.throughput.usage.average",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub const HOST_PERF_MATCHER: Matcher =
    Matcher::new(&["host_perf", "perfhost", "perf_host", "perfesx", "perf_esx"]);
pub const VM_PERF_MATCHER: Matcher = Matcher::new(&[
    "vm_perf",
    "perfvm",
    "perf_virtual_machine",
    "vm-perf",
    "vmperf",
]);

/// Where a perf sensor gets the entities to sample.
pub trait RefSource: Send + Sync {
    fn refs(&self) -> Vec<EntityRef>;

    fn source_started(&self) -> &StartedCheck;
}

impl RefSource for HostSensor {
    fn refs(&self) -> Vec<EntityRef> {
        self.get_all_refs()
    }

    fn source_started(&self) -> &StartedCheck {
        self.started()
    }
}

impl RefSource for VirtualMachineSensor {
    fn refs(&self) -> Vec<EntityRef> {
        self.get_all_refs()
    }

    fn source_started(&self) -> &StartedCheck {
        self.started()
    }
}

/// Periodically samples performance counters of every entity its
/// inventory sensor knows about.
pub struct PerfSensor {
    matcher: Matcher,
    source: Arc<dyn RefSource>,
    sampler: PerfSampler,
    metrics: Vec<String>,
    started: StartedCheck,
}

impl PerfSensor {
    fn new(
        matcher: Matcher,
        source: Arc<dyn RefSource>,
        pool: Arc<VCenterPool>,
        config: &PerfSensorConfig,
        defaults: Vec<String>,
    ) -> Self {
        let mut metrics = if config.default_metrics {
            defaults
        } else {
            Vec::new()
        };
        metrics.extend(config.extra_metrics.iter().cloned());
        Self {
            matcher: matcher.clone(),
            source,
            sampler: PerfSampler::new(
                matcher.first(),
                pool,
                config.max_sample_window,
                config.sample_interval,
            ),
            metrics: dedup(metrics),
            started: StartedCheck::new(),
        }
    }

    pub fn host(hosts: Arc<HostSensor>, pool: Arc<VCenterPool>, config: &PerfSensorConfig) -> Self {
        Self::new(
            HOST_PERF_MATCHER,
            hosts,
            pool,
            config,
            default_host_perf_metrics(),
        )
    }

    pub fn virtual_machine(
        vms: Arc<VirtualMachineSensor>,
        pool: Arc<VCenterPool>,
        config: &PerfSensorConfig,
    ) -> Self {
        Self::new(
            VM_PERF_MATCHER,
            vms,
            pool,
            config,
            default_vm_perf_metrics(),
        )
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn sampler(&self) -> &PerfSampler {
        &self.sampler
    }

    pub fn pop_all(&self, r: &EntityRef) -> Vec<PerfMetric> {
        self.sampler.pop_all(r)
    }

    pub fn pop_older_or_equal_than(&self, r: &EntityRef, t: DateTime<Utc>) -> Vec<PerfMetric> {
        self.sampler.pop_older_or_equal_than(r, t)
    }
}

impl Cleanable for PerfSensor {
    fn name(&self) -> &'static str {
        self.matcher.first()
    }

    fn matches(&self, name: &str) -> bool {
        self.matcher.matches(name)
    }

    fn clean(&self, max_age: Duration) {
        self.sampler.clean(max_age);
    }

    fn dump(&self) -> Value {
        self.sampler.dump()
    }
}

#[async_trait]
impl Sensor for PerfSensor {
    async fn refresh(&self, cancel: &CancellationToken) -> Result<(), ScraperError> {
        cancellable(cancel, async {
            self.source.source_started().wait().await;
            Ok(())
        })
        .await?;
        let refs = self.source.refs();
        self.sampler
            .query_entity_metrics(&refs, &self.metrics, cancel)
            .await?;
        Ok(())
    }

    fn stats(&self) -> &SensorStats {
        self.sampler.stats()
    }

    fn started(&self) -> &StartedCheck {
        &self.started
    }
}
