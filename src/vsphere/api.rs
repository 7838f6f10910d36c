// Remote virtualization API seam.
use super::entity::{EntityKind, EntityRef};
use crate::error::ScraperError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Authenticated session with the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
}

/// Session for the REST (tagging) endpoints, derived from a pooled session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestSession {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfQuerySpec {
    pub entities: Vec<EntityRef>,
    pub metrics: Vec<String>,
    pub instance: String,
    pub interval_id: i32,
    pub max_sample: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleInfo {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub interval: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub instance: String,
    #[serde(default)]
    pub value: Option<Vec<i64>>,
}

/// Samples of every requested counter for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetricSeries {
    pub entity: EntityRef,
    #[serde(default)]
    pub sample_info: Vec<SampleInfo>,
    #[serde(default)]
    pub value: Vec<MetricSeries>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCategory {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub category_id: String,
}

#[async_trait]
pub trait VSphereApi: Send + Sync {
    async fn login(&self) -> Result<Session, ScraperError>;

    async fn logout(&self, session: &Session) -> Result<(), ScraperError>;

    /// `Ok(false)` when the remote side no longer knows the session.
    async fn session_active(&self, session: &Session) -> Result<bool, ScraperError>;

    async fn rest_login(&self, session: &Session) -> Result<RestSession, ScraperError>;

    /// Every object of `kind` below `root` (the inventory root when `None`),
    /// with only `properties` filled in.
    async fn retrieve_all(
        &self,
        session: &Session,
        kind: &EntityKind,
        root: Option<&EntityRef>,
        properties: &[&str],
    ) -> Result<Vec<Value>, ScraperError>;

    async fn retrieve_one(
        &self,
        session: &Session,
        entity: &EntityRef,
        properties: &[&str],
    ) -> Result<Option<Value>, ScraperError>;

    async fn query_perf(
        &self,
        session: &Session,
        spec: &PerfQuerySpec,
    ) -> Result<Vec<EntityMetricSeries>, ScraperError>;

    async fn list_tag_categories(&self, rest: &RestSession)
        -> Result<Vec<TagCategory>, ScraperError>;

    async fn list_tags_for_category(
        &self,
        rest: &RestSession,
        category_id: &str,
    ) -> Result<Vec<Tag>, ScraperError>;

    async fn list_attached_objects(
        &self,
        rest: &RestSession,
        tag_id: &str,
    ) -> Result<Vec<EntityRef>, ScraperError>;
}
