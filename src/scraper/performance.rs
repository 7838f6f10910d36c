// Performance counter sampling into per-entity time queues.
use super::sensor_metrics::{SensorStats, Stopwatch};
use crate::error::ScraperError;
use crate::helper::cancellable;
use crate::pool::VCenterPool;
use crate::timequeue::{TimeQueue, Timestamped};
use crate::vsphere::{EntityMetricSeries, EntityRef, PerfQuerySpec};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_SAMPLES: i32 = 20;
pub const ALL_INSTANCES: &str = "*";

/// One sample of one counter for one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerfMetric {
    #[serde(rename = "ref")]
    pub entity: EntityRef,
    pub name: String,
    pub unit: String,
    pub instance: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Timestamped for PerfMetric {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Builder for a windowed counter query.
#[derive(Debug, Clone)]
pub struct PerfQuery {
    metrics: Vec<String>,
    instance: String,
    max_sample: i32,
    sample_interval: Duration,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Default for PerfQuery {
    fn default() -> Self {
        let end = Utc::now();
        Self {
            metrics: Vec::new(),
            instance: ALL_INSTANCES.to_string(),
            max_sample: DEFAULT_MAX_SAMPLES,
            sample_interval: Duration::from_secs(20),
            begin: end - chrono::Duration::minutes(5),
            end,
        }
    }
}

impl PerfQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_samples(mut self, n: i32) -> Self {
        self.max_sample = n;
        self
    }

    pub fn interval(mut self, d: Duration) -> Self {
        self.sample_interval = d;
        self
    }

    pub fn window(mut self, begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.begin = begin;
        self.end = end;
        self
    }

    pub fn metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    pub fn instance(mut self, instance: &str) -> Self {
        self.instance = instance.to_string();
        self
    }

    pub fn to_spec(&self, entities: Vec<EntityRef>) -> PerfQuerySpec {
        PerfQuerySpec {
            entities,
            metrics: self.metrics.clone(),
            instance: self.instance.clone(),
            interval_id: i32::try_from(self.sample_interval.as_secs()).unwrap_or(i32::MAX),
            max_sample: self.max_sample,
            start_time: self.begin,
            end_time: self.end,
        }
    }
}

/// Flatten one entity's series into per-sample metrics. Without one raw
/// value per sample, every sample carries the series average.
pub fn entity_metric_to_metrics(series: &EntityMetricSeries) -> Vec<PerfMetric> {
    let mut out = Vec::with_capacity(series.sample_info.len() * series.value.len());
    for (i, sample) in series.sample_info.iter().enumerate() {
        for counter in &series.value {
            let value = match &counter.value {
                Some(values) if values.len() == series.sample_info.len() => values[i] as f64,
                Some(values) if !values.is_empty() => {
                    values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64
                }
                _ => 0.0,
            };
            out.push(PerfMetric {
                entity: series.entity.clone(),
                name: counter.name.clone(),
                unit: counter.unit.clone(),
                instance: counter.instance.clone(),
                value,
                timestamp: sample.timestamp,
            });
        }
    }
    out
}

/// Samples counters for batches of entities and keeps the results queued
/// per entity until they are popped.
pub struct PerfSampler {
    name: &'static str,
    pool: Arc<VCenterPool>,
    max_sample_window: Duration,
    sample_interval: Duration,
    last_query_time: SyncMutex<Option<DateTime<Utc>>>,
    running: Mutex<()>,
    queues: DashMap<EntityRef, TimeQueue<PerfMetric>>,
    stats: SensorStats,
}

impl PerfSampler {
    pub fn new(
        name: &'static str,
        pool: Arc<VCenterPool>,
        max_sample_window: Duration,
        sample_interval: Duration,
    ) -> Self {
        Self {
            name,
            pool,
            max_sample_window,
            sample_interval,
            last_query_time: SyncMutex::new(None),
            running: Mutex::new(()),
            queues: DashMap::new(),
            stats: SensorStats::last_value(),
        }
    }

    pub fn stats(&self) -> &SensorStats {
        &self.stats
    }

    pub fn last_query_time(&self) -> Option<DateTime<Utc>> {
        *self.last_query_time.lock()
    }

    /// Sample `metrics` for all `refs` over `[max(last, now - window), now]`
    /// and queue the results. Returns the number of queued samples. The
    /// window start only moves forward after a successful pull.
    pub async fn query_entity_metrics(
        &self,
        refs: &[EntityRef],
        metrics: &[String],
        cancel: &CancellationToken,
    ) -> Result<usize, ScraperError> {
        let _running = self
            .running
            .try_lock()
            .map_err(|_| ScraperError::SensorAlreadyRunning)?;
        if refs.is_empty() || metrics.is_empty() {
            return Ok(0);
        }

        let window_end = Utc::now();
        let max_window = chrono::Duration::from_std(self.max_sample_window).map_err(|_| {
            ScraperError::InvalidConfig(format!(
                "max sample window {:?} out of range",
                self.max_sample_window
            ))
        })?;
        let last = self.last_query_time();
        let window_begin = match last {
            Some(last) if last > window_end - max_window => last,
            _ => window_end - max_window,
        };
        let spec = PerfQuery::new()
            .max_samples(DEFAULT_MAX_SAMPLES)
            .interval(self.sample_interval)
            .window(window_begin, window_end)
            .metrics(metrics.iter().cloned())
            .to_spec(refs.to_vec());

        let mut stopwatch = Stopwatch::start();
        let lease = self.pool.acquire(cancel).await?;
        stopwatch.mark();
        let res = cancellable(cancel, self.pool.api().query_perf(lease.session(), &spec)).await;
        lease.release();
        self.stats.upload(stopwatch.finish());
        let series = res?;

        let mut count = 0;
        for s in &series {
            let samples = entity_metric_to_metrics(s);
            count += samples.len();
            self.queues.entry(s.entity.clone()).or_default().extend(samples);
        }
        *self.last_query_time.lock() = Some(window_end);
        log::debug!(
            "[{}] queued {} samples for {} entities",
            self.name,
            count,
            series.len()
        );
        Ok(count)
    }

    pub fn pop_all(&self, r: &EntityRef) -> Vec<PerfMetric> {
        self.queues
            .get_mut(r)
            .map(|mut q| q.pop_all())
            .unwrap_or_default()
    }

    pub fn pop_older_or_equal_than(&self, r: &EntityRef, t: DateTime<Utc>) -> Vec<PerfMetric> {
        self.queues
            .get_mut(r)
            .map(|mut q| q.pop_older_or_equal_than(t))
            .unwrap_or_default()
    }

    pub fn queued(&self, r: &EntityRef) -> usize {
        self.queues.get(r).map(|q| q.len()).unwrap_or(0)
    }

    pub fn refs(&self) -> Vec<EntityRef> {
        let mut refs: Vec<EntityRef> = self.queues.iter().map(|e| e.key().clone()).collect();
        refs.sort();
        refs
    }

    /// Drop samples older than `max_age` that nobody pulled.
    pub fn clean(&self, max_age: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(max_age) {
            Ok(d) => Utc::now() - d,
            Err(_) => return 0,
        };
        let mut removed = 0;
        for mut q in self.queues.iter_mut() {
            removed += q.pop_older_or_equal_than(cutoff).len();
        }
        self.queues.retain(|_, q| !q.is_empty());
        if removed > 0 {
            log::warn!("[{}] removed {} samples which were not yet pulled", self.name, removed);
        }
        removed
    }

    pub fn dump(&self) -> Value {
        let mut out = Map::new();
        for entry in self.queues.iter() {
            let samples: Vec<&PerfMetric> = entry.value().iter().collect();
            out.insert(
                entry.key().id.clone(),
                serde_json::to_value(samples).unwrap_or(Value::Null),
            );
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeVSphere;
    use crate::vsphere::{EntityKind, MetricSeries, SampleInfo};
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn host(id: &str) -> EntityRef {
        EntityRef::new(EntityKind::Host, id)
    }

    fn series(entity: EntityRef, at: &[i64], counters: Vec<(&str, Option<Vec<i64>>)>) -> EntityMetricSeries {
        EntityMetricSeries {
            entity,
            sample_info: at
                .iter()
                .map(|s| SampleInfo {
                    timestamp: ts(*s),
                    interval: 20,
                })
                .collect(),
            value: counters
                .into_iter()
                .map(|(name, value)| MetricSeries {
                    name: name.into(),
                    unit: "MHz".into(),
                    instance: "".into(),
                    value,
                })
                .collect(),
        }
    }

    async fn sampler(fake: Arc<FakeVSphere>) -> PerfSampler {
        let pool = VCenterPool::new(fake, 1, Duration::from_millis(10)).unwrap();
        pool.init().await.unwrap();
        PerfSampler::new(
            "host_perf",
            Arc::new(pool),
            Duration::from_secs(300),
            Duration::from_secs(20),
        )
    }

    #[test]
    fn test_entity_metric_conversion() {
        let s = series(
            host("host-1"),
            &[0, 20, 40],
            vec![
                ("cpu.usagemhz.average", Some(vec![100, 200, 300])),
                ("mem.active.average", Some(vec![10, 20])),
                ("cpu.ready.summation", None),
            ],
        );
        let metrics = entity_metric_to_metrics(&s);
        assert_eq!(metrics.len(), 9);

        let cpu: Vec<f64> = metrics
            .iter()
            .filter(|m| m.name == "cpu.usagemhz.average")
            .map(|m| m.value)
            .collect();
        assert_eq!(cpu, vec![100.0, 200.0, 300.0]);
        assert!(metrics
            .iter()
            .filter(|m| m.name == "mem.active.average")
            .all(|m| m.value == 15.0));
        assert!(metrics
            .iter()
            .filter(|m| m.name == "cpu.ready.summation")
            .all(|m| m.value == 0.0));
        assert_eq!(metrics[0].timestamp, ts(0));
        assert_eq!(metrics[8].timestamp, ts(40));
    }

    #[test]
    fn test_query_builder_spec() {
        let spec = PerfQuery::new()
            .interval(Duration::from_secs(20))
            .window(ts(0), ts(300))
            .metrics(["cpu.usagemhz.average"])
            .to_spec(vec![host("host-1")]);
        assert_eq!(spec.instance, "*");
        assert_eq!(spec.max_sample, 20);
        assert_eq!(spec.interval_id, 20);
        assert_eq!(spec.start_time, ts(0));
        assert_eq!(spec.metrics, vec!["cpu.usagemhz.average".to_string()]);
    }

    #[tokio::test]
    async fn test_query_queues_and_pops_in_order() {
        let fake = Arc::new(FakeVSphere::new());
        fake.set_perf_series(vec![
            series(host("host-1"), &[40, 0, 20], vec![("cpu.usagemhz.average", Some(vec![3, 1, 2]))]),
            series(host("host-2"), &[0], vec![("cpu.usagemhz.average", Some(vec![7]))]),
        ]);
        let sampler = sampler(fake.clone()).await;
        let refs = vec![host("host-1"), host("host-2")];
        let metrics = vec!["cpu.usagemhz.average".to_string()];

        let n = sampler
            .query_entity_metrics(&refs, &metrics, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(n, 4);

        let older = sampler.pop_older_or_equal_than(&host("host-1"), ts(20));
        assert_eq!(older.iter().map(|m| m.value).collect::<Vec<_>>(), vec![1.0, 2.0]);
        let rest = sampler.pop_all(&host("host-1"));
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].timestamp, ts(40));
        assert!(sampler.pop_all(&host("host-1")).is_empty());
        assert_eq!(sampler.queued(&host("host-2")), 1);
    }

    #[tokio::test]
    async fn test_window_advances_only_on_success() {
        let fake = Arc::new(FakeVSphere::new());
        let sampler = sampler(fake.clone()).await;
        let refs = vec![host("host-1")];
        let metrics = vec!["cpu.usagemhz.average".to_string()];
        let cancel = CancellationToken::new();

        sampler.query_entity_metrics(&refs, &metrics, &cancel).await.unwrap();
        let first_end = sampler.last_query_time().unwrap();
        let first = fake.perf_requests()[0].clone();
        assert_eq!(first.end_time - first.start_time, chrono::Duration::seconds(300));

        fake.fail_next_perf(1);
        assert!(sampler.query_entity_metrics(&refs, &metrics, &cancel).await.is_err());
        assert_eq!(sampler.last_query_time(), Some(first_end));

        sampler.query_entity_metrics(&refs, &metrics, &cancel).await.unwrap();
        let requests = fake.perf_requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].start_time, first_end);
        assert_eq!(requests[2].start_time, first_end);
    }

    #[tokio::test]
    async fn test_clean_drops_stale_samples() {
        let fake = Arc::new(FakeVSphere::new());
        let now = Utc::now();
        let mut s = series(host("host-1"), &[0], vec![("cpu.usagemhz.average", Some(vec![1]))]);
        s.sample_info.push(SampleInfo {
            timestamp: now,
            interval: 20,
        });
        s.value[0].value = Some(vec![1, 2]);
        fake.set_perf_series(vec![s]);
        let sampler = sampler(fake).await;
        sampler
            .query_entity_metrics(
                &[host("host-1")],
                &["cpu.usagemhz.average".to_string()],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(sampler.clean(Duration::from_secs(600)), 1);
        let left = sampler.pop_all(&host("host-1"));
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].value, 2.0);
    }
}
