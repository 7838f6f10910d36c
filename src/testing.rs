// In-memory stand-in for the remote API.
use crate::error::ScraperError;
use crate::scraper::ScraperConfig;
use crate::vsphere::{
    EntityKind, EntityMetricSeries, EntityRef, PerfQuerySpec, RestSession, Session, Tag,
    TagCategory, VSphereApi,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub(crate) struct FakeVSphere {
    inventory: Mutex<HashMap<EntityKind, Vec<Value>>>,
    vms_by_host: Mutex<HashMap<String, Vec<Value>>>,
    failing_hosts: Mutex<HashSet<String>>,
    objects: Mutex<HashMap<EntityRef, Value>>,
    perf_series: Mutex<Vec<EntityMetricSeries>>,
    perf_requests: Mutex<Vec<PerfQuerySpec>>,
    categories: Mutex<Vec<TagCategory>>,
    tags: Mutex<HashMap<String, Vec<Tag>>>,
    attached: Mutex<HashMap<String, Vec<EntityRef>>>,
    active_session: Mutex<Option<String>>,
    login_delay: Mutex<Duration>,
    retrieve_delay: Mutex<Duration>,
    fail_retrieves: AtomicUsize,
    fail_perf: AtomicUsize,
    fail_login: AtomicUsize,
    pub login_count: AtomicUsize,
    pub retrieve_all_count: AtomicUsize,
    pub retrieve_one_count: AtomicUsize,
    pub perf_count: AtomicUsize,
}

pub(crate) fn entity(kind: EntityKind, id: &str, name: &str, parent: Option<EntityRef>) -> Value {
    json!({
        "self": EntityRef::new(kind, id),
        "name": name,
        "parent": parent,
    })
}

pub(crate) fn vm(id: &str, name: &str, change_version: &str, parent: Option<EntityRef>) -> Value {
    json!({
        "self": EntityRef::new(EntityKind::VirtualMachine, id),
        "name": name,
        "parent": parent,
        "config": { "changeVersion": change_version },
    })
}

impl FakeVSphere {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_inventory(&self, kind: EntityKind, objects: Vec<Value>) {
        self.inventory.lock().insert(kind, objects);
    }

    pub fn set_host_vms(&self, host_id: &str, vms: Vec<Value>) {
        self.vms_by_host.lock().insert(host_id.to_string(), vms);
    }

    pub fn fail_host(&self, host_id: &str) {
        self.failing_hosts.lock().insert(host_id.to_string());
    }

    pub fn add_object(&self, object: Value) {
        let r: EntityRef = serde_json::from_value(object["self"].clone()).unwrap();
        self.objects.lock().insert(r, object);
    }

    pub fn set_perf_series(&self, series: Vec<EntityMetricSeries>) {
        *self.perf_series.lock() = series;
    }

    pub fn perf_requests(&self) -> Vec<PerfQuerySpec> {
        self.perf_requests.lock().clone()
    }

    pub fn set_tags(
        &self,
        categories: Vec<TagCategory>,
        tags: Vec<Tag>,
        attached: Vec<(&str, Vec<EntityRef>)>,
    ) {
        *self.categories.lock() = categories;
        let mut by_cat: HashMap<String, Vec<Tag>> = HashMap::new();
        for tag in tags {
            by_cat.entry(tag.category_id.clone()).or_default().push(tag);
        }
        *self.tags.lock() = by_cat;
        *self.attached.lock() = attached
            .into_iter()
            .map(|(id, refs)| (id.to_string(), refs))
            .collect();
    }

    pub fn set_login_delay(&self, d: Duration) {
        *self.login_delay.lock() = d;
    }

    pub fn set_retrieve_delay(&self, d: Duration) {
        *self.retrieve_delay.lock() = d;
    }

    /// Fail the next `n` inventory retrievals.
    pub fn fail_next_retrieves(&self, n: usize) {
        self.fail_retrieves.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_perf(&self, n: usize) {
        self.fail_perf.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_logins(&self, n: usize) {
        self.fail_login.store(n, Ordering::SeqCst);
    }

    pub fn expire_session(&self) {
        *self.active_session.lock() = None;
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_session(&self, session: &Session) -> Result<(), ScraperError> {
        if self.active_session.lock().as_deref() == Some(session.id.as_str()) {
            Ok(())
        } else {
            Err(ScraperError::Http(StatusCode::UNAUTHORIZED, "not authenticated".into()))
        }
    }
}

#[async_trait]
impl VSphereApi for FakeVSphere {
    async fn login(&self) -> Result<Session, ScraperError> {
        let delay = *self.login_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.fail_login) {
            return Err(ScraperError::LoginFailed("invalid credentials".into()));
        }
        let n = self.login_count.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("session-{}", n);
        *self.active_session.lock() = Some(id.clone());
        Ok(Session { id })
    }

    async fn logout(&self, session: &Session) -> Result<(), ScraperError> {
        let mut active = self.active_session.lock();
        if active.as_deref() == Some(session.id.as_str()) {
            *active = None;
        }
        Ok(())
    }

    async fn session_active(&self, session: &Session) -> Result<bool, ScraperError> {
        Ok(self.check_session(session).is_ok())
    }

    async fn rest_login(&self, session: &Session) -> Result<RestSession, ScraperError> {
        self.check_session(session)?;
        Ok(RestSession {
            id: format!("rest-{}", session.id),
        })
    }

    async fn retrieve_all(
        &self,
        session: &Session,
        kind: &EntityKind,
        root: Option<&EntityRef>,
        _properties: &[&str],
    ) -> Result<Vec<Value>, ScraperError> {
        self.check_session(session)?;
        self.retrieve_all_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.retrieve_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.fail_retrieves) {
            return Err(ScraperError::Http(
                StatusCode::SERVICE_UNAVAILABLE,
                "remote busy".into(),
            ));
        }
        match root {
            Some(host) if host.kind == EntityKind::Host => {
                if self.failing_hosts.lock().contains(&host.id) {
                    return Err(ScraperError::Http(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("host {} unreachable", host.id),
                    ));
                }
                Ok(self
                    .vms_by_host
                    .lock()
                    .get(&host.id)
                    .cloned()
                    .unwrap_or_default())
            }
            _ => Ok(self.inventory.lock().get(kind).cloned().unwrap_or_default()),
        }
    }

    async fn retrieve_one(
        &self,
        session: &Session,
        entity: &EntityRef,
        _properties: &[&str],
    ) -> Result<Option<Value>, ScraperError> {
        self.check_session(session)?;
        self.retrieve_one_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects.lock().get(entity).cloned())
    }

    async fn query_perf(
        &self,
        session: &Session,
        spec: &PerfQuerySpec,
    ) -> Result<Vec<EntityMetricSeries>, ScraperError> {
        self.check_session(session)?;
        self.perf_count.fetch_add(1, Ordering::SeqCst);
        self.perf_requests.lock().push(spec.clone());
        if Self::take_failure(&self.fail_perf) {
            return Err(ScraperError::Http(
                StatusCode::SERVICE_UNAVAILABLE,
                "perf manager busy".into(),
            ));
        }
        Ok(self
            .perf_series
            .lock()
            .iter()
            .filter(|s| spec.entities.contains(&s.entity))
            .cloned()
            .collect())
    }

    async fn list_tag_categories(
        &self,
        _rest: &RestSession,
    ) -> Result<Vec<TagCategory>, ScraperError> {
        Ok(self.categories.lock().clone())
    }

    async fn list_tags_for_category(
        &self,
        _rest: &RestSession,
        category_id: &str,
    ) -> Result<Vec<Tag>, ScraperError> {
        Ok(self.tags.lock().get(category_id).cloned().unwrap_or_default())
    }

    async fn list_attached_objects(
        &self,
        _rest: &RestSession,
        tag_id: &str,
    ) -> Result<Vec<EntityRef>, ScraperError> {
        Ok(self.attached.lock().get(tag_id).cloned().unwrap_or_default())
    }
}

/// Only the host sensor enabled, no start jitter, short startup timeout.
pub(crate) fn host_only_config() -> ScraperConfig {
    let mut config = ScraperConfig {
        start_jitter: Duration::ZERO,
        startup_timeout: Duration::from_secs(5),
        reauth_backoff: Duration::from_millis(10),
        ..ScraperConfig::default()
    };
    for sensor in [
        &mut config.cluster,
        &mut config.compute_resource,
        &mut config.datacenter,
        &mut config.datastore,
        &mut config.folder,
        &mut config.resource_pool,
        &mut config.storage_pod,
        &mut config.virtual_machine,
    ] {
        sensor.enabled = false;
    }
    config.tags.enabled = false;
    config.host_perf.enabled = false;
    config.virtual_machine_perf.enabled = false;
    config
}
