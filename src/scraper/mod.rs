pub mod auto_clean;
pub mod auto_refresh;
pub mod cache_item;
pub mod objects;
pub mod parent_chain;
pub mod performance;
#[allow(clippy::module_inception)]
pub mod scraper;
pub mod scraper_config;
pub mod sensor;
pub mod sensor_cache;
pub mod sensor_inventory;
pub mod sensor_metrics;
pub mod sensor_on_demand;
pub mod sensor_perf;
pub mod sensor_tags;
pub mod sensor_virtual_machine;
pub mod started_check;

pub use parent_chain::ParentChain;
pub use performance::PerfMetric;
pub use scraper::VCenterScraper;
pub use scraper_config::{OnDemandConfig, PerfSensorConfig, ScraperConfig, SensorConfig, TagsSensorConfig};
pub use sensor::{Cleanable, Sensor};
pub use sensor_metrics::SensorMetric;
