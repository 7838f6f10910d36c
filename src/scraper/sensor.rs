use super::sensor_metrics::{SensorMetric, SensorStats};
use super::started_check::StartedCheck;
use crate::error::ScraperError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Anything holding cached data that ages out.
pub trait Cleanable: Send + Sync {
    /// Short name used in logs, metrics and dumps (`host`, `vm_perf`, ..).
    fn name(&self) -> &'static str;

    fn matches(&self, name: &str) -> bool;

    fn clean(&self, max_age: Duration);

    fn dump(&self) -> Value;
}

/// A cache of one entity kind that knows how to refresh itself from the
/// remote API.
#[async_trait]
pub trait Sensor: Cleanable {
    async fn refresh(&self, cancel: &CancellationToken) -> Result<(), ScraperError>;

    fn stats(&self) -> &SensorStats;

    /// Opened by the scheduler after the first successful refresh.
    fn started(&self) -> &StartedCheck;

    fn health_metrics(&self) -> Vec<SensorMetric> {
        self.stats().compose(self.name())
    }
}
