pub mod api;
pub mod entity;
pub mod rest_client;

pub use api::{
    EntityMetricSeries, MetricSeries, PerfQuerySpec, RestSession, SampleInfo, Session, Tag,
    TagCategory, VSphereApi,
};
pub use entity::{EntityKind, EntityRef, ManagedEntity};
pub use rest_client::RestVSphereApi;
