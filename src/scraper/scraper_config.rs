use crate::error::ScraperError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Durations are written as whole seconds in config files.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// max_age must exceed refresh_interval by more than this.
const MAX_AGE_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub enabled: bool,
    #[serde(with = "duration_secs")]
    pub max_age: Duration,
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,
    #[serde(with = "duration_secs")]
    pub clean_interval: Duration,
}

impl SensorConfig {
    pub fn new(max_age: u64, refresh_interval: u64) -> Self {
        Self {
            enabled: true,
            max_age: Duration::from_secs(max_age),
            refresh_interval: Duration::from_secs(refresh_interval),
            clean_interval: Duration::from_secs(5),
        }
    }

    fn validate(&self, sensor: &str) -> Result<(), ScraperError> {
        if !self.enabled {
            return Ok(());
        }
        if self.refresh_interval.is_zero() || self.clean_interval.is_zero() {
            return Err(ScraperError::InvalidConfig(format!(
                "{}: refresh_interval and clean_interval must be positive",
                sensor
            )));
        }
        if self.max_age <= self.refresh_interval + MAX_AGE_MARGIN {
            return Err(ScraperError::InvalidConfig(format!(
                "{}: max_age ({}s) must exceed refresh_interval ({}s) by more than {}s",
                sensor,
                self.max_age.as_secs(),
                self.refresh_interval.as_secs(),
                MAX_AGE_MARGIN.as_secs()
            )));
        }
        Ok(())
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self::new(120, 60)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagsSensorConfig {
    pub enabled: bool,
    #[serde(with = "duration_secs")]
    pub max_age: Duration,
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,
    #[serde(with = "duration_secs")]
    pub clean_interval: Duration,
    /// Category names to collect; empty collects every category.
    pub category_to_collect: Vec<String>,
}

impl TagsSensorConfig {
    pub fn sensor_config(&self) -> SensorConfig {
        SensorConfig {
            enabled: self.enabled,
            max_age: self.max_age,
            refresh_interval: self.refresh_interval,
            clean_interval: self.clean_interval,
        }
    }
}

impl Default for TagsSensorConfig {
    fn default() -> Self {
        let sensor = SensorConfig::new(600, 290);
        Self {
            enabled: sensor.enabled,
            max_age: sensor.max_age,
            refresh_interval: sensor.refresh_interval,
            clean_interval: sensor.clean_interval,
            category_to_collect: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfSensorConfig {
    pub enabled: bool,
    #[serde(with = "duration_secs")]
    pub max_age: Duration,
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,
    #[serde(with = "duration_secs")]
    pub clean_interval: Duration,
    #[serde(with = "duration_secs")]
    pub max_sample_window: Duration,
    #[serde(with = "duration_secs")]
    pub sample_interval: Duration,
    pub default_metrics: bool,
    pub extra_metrics: Vec<String>,
}

impl PerfSensorConfig {
    pub fn sensor_config(&self) -> SensorConfig {
        SensorConfig {
            enabled: self.enabled,
            max_age: self.max_age,
            refresh_interval: self.refresh_interval,
            clean_interval: self.clean_interval,
        }
    }
}

impl Default for PerfSensorConfig {
    fn default() -> Self {
        let sensor = SensorConfig::new(600, 60);
        Self {
            enabled: sensor.enabled,
            max_age: sensor.max_age,
            refresh_interval: sensor.refresh_interval,
            clean_interval: sensor.clean_interval,
            max_sample_window: Duration::from_secs(300),
            sample_interval: Duration::from_secs(20),
            default_metrics: true,
            extra_metrics: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnDemandConfig {
    #[serde(with = "duration_secs")]
    pub max_age: Duration,
    #[serde(with = "duration_secs")]
    pub clean_interval: Duration,
}

impl Default for OnDemandConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(300),
            clean_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub vcenter: String,
    pub username: String,
    pub password: String,
    /// Accept self-signed certificates.
    pub insecure: bool,
    pub client_pool_size: usize,
    #[serde(with = "duration_secs")]
    pub reauth_backoff: Duration,
    #[serde(with = "duration_secs")]
    pub startup_timeout: Duration,
    /// Upper bound of the random delay before each sensor's first refresh.
    #[serde(with = "duration_secs")]
    pub start_jitter: Duration,
    pub listen_address: String,

    pub cluster: SensorConfig,
    pub compute_resource: SensorConfig,
    pub datacenter: SensorConfig,
    pub datastore: SensorConfig,
    pub folder: SensorConfig,
    pub host: SensorConfig,
    pub resource_pool: SensorConfig,
    pub storage_pod: SensorConfig,
    pub virtual_machine: SensorConfig,
    pub tags: TagsSensorConfig,
    pub host_perf: PerfSensorConfig,
    pub virtual_machine_perf: PerfSensorConfig,
    pub on_demand: OnDemandConfig,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            vcenter: "https://localhost".to_string(),
            username: String::new(),
            password: String::new(),
            insecure: false,
            client_pool_size: 5,
            reauth_backoff: Duration::from_secs(5),
            startup_timeout: Duration::from_secs(120),
            start_jitter: Duration::from_secs(5),
            listen_address: "0.0.0.0:9752".to_string(),
            cluster: SensorConfig::new(120, 60),
            compute_resource: SensorConfig::new(120, 60),
            datacenter: SensorConfig::new(120, 60),
            datastore: SensorConfig::new(120, 30),
            folder: SensorConfig::new(120, 60),
            host: SensorConfig::new(120, 30),
            resource_pool: SensorConfig::new(120, 60),
            storage_pod: SensorConfig::new(120, 60),
            virtual_machine: SensorConfig::new(120, 60),
            tags: TagsSensorConfig::default(),
            host_perf: PerfSensorConfig::default(),
            virtual_machine_perf: PerfSensorConfig::default(),
            on_demand: OnDemandConfig::default(),
        }
    }
}

impl ScraperConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScraperError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ScraperError> {
        Ok(toml::from_str(text)?)
    }

    /// Normalised endpoint: `https://` unless a scheme is given, no
    /// trailing slash.
    pub fn endpoint(&self) -> Result<Url, ScraperError> {
        let raw = self.vcenter.trim().trim_end_matches('/');
        if raw.is_empty() {
            return Err(ScraperError::InvalidUrl(self.vcenter.clone()));
        }
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{}", raw)
        };
        let url =
            Url::parse(&with_scheme).map_err(|_| ScraperError::InvalidUrl(self.vcenter.clone()))?;
        match url.scheme() {
            "http" | "https" if url.host_str().is_some() => Ok(url),
            _ => Err(ScraperError::InvalidUrl(self.vcenter.clone())),
        }
    }

    pub fn validate(&self) -> Result<(), ScraperError> {
        self.endpoint()?;
        if self.client_pool_size < 1 {
            return Err(ScraperError::InvalidConfig(
                "client_pool_size cannot be smaller than 1".into(),
            ));
        }
        if self.virtual_machine.enabled && !self.host.enabled {
            return Err(ScraperError::InvalidConfig(
                "host sensor must be enabled when the virtual_machine sensor is enabled".into(),
            ));
        }
        if self.host_perf.enabled && !self.host.enabled {
            return Err(ScraperError::InvalidConfig(
                "host sensor must be enabled when the host_perf sensor is enabled".into(),
            ));
        }
        if self.virtual_machine_perf.enabled && !self.virtual_machine.enabled {
            return Err(ScraperError::InvalidConfig(
                "virtual_machine sensor must be enabled when the virtual_machine_perf sensor is enabled"
                    .into(),
            ));
        }
        let sensors = [
            ("cluster", self.cluster.clone()),
            ("compute_resource", self.compute_resource.clone()),
            ("datacenter", self.datacenter.clone()),
            ("datastore", self.datastore.clone()),
            ("folder", self.folder.clone()),
            ("host", self.host.clone()),
            ("resource_pool", self.resource_pool.clone()),
            ("storage_pod", self.storage_pod.clone()),
            ("virtual_machine", self.virtual_machine.clone()),
            ("tags", self.tags.sensor_config()),
            ("host_perf", self.host_perf.sensor_config()),
            ("virtual_machine_perf", self.virtual_machine_perf.sensor_config()),
        ];
        for (name, sensor) in &sensors {
            sensor.validate(name)?;
        }
        if self.on_demand.clean_interval.is_zero() {
            return Err(ScraperError::InvalidConfig(
                "on_demand: clean_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}
