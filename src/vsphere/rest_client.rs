// HTTP client for the remote API.
use super::api::{
    EntityMetricSeries, PerfQuerySpec, RestSession, Session, Tag, TagCategory, VSphereApi,
};
use super::entity::{EntityKind, EntityRef};
use crate::error::ScraperError;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const SESSION_HEADER: &str = "vmware-api-session-id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct RestVSphereApi {
    client: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
}

impl RestVSphereApi {
    pub fn new(
        base_url: Url,
        username: impl Into<String>,
        password: impl Into<String>,
        insecure: bool,
    ) -> Result<Self, ScraperError> {
        let client = reqwest::ClientBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(insecure)
            .build()?;
        Ok(Self {
            client,
            base_url,
            username: username.into(),
            password: password.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<(StatusCode, String), ScraperError> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            ScraperError::Http(status, format!("Failed to read response: {}", e))
        })?;
        Ok((status, body))
    }

    async fn send_ok(&self, req: reqwest::RequestBuilder) -> Result<String, ScraperError> {
        match self.send(req).await? {
            (status, body) if status.is_success() => Ok(body),
            (status, body) => Err(ScraperError::Http(status, body)),
        }
    }
}

#[derive(Deserialize)]
struct RetrieveResponse {
    objects: Vec<Value>,
}

#[derive(Deserialize)]
struct PerfResponse {
    series: Vec<EntityMetricSeries>,
}

#[derive(Deserialize)]
struct RestValue<T> {
    value: T,
}

#[async_trait]
impl VSphereApi for RestVSphereApi {
    async fn login(&self) -> Result<Session, ScraperError> {
        let req = self
            .client
            .post(self.url("api/session"))
            .basic_auth(&self.username, Some(&self.password));
        let (status, body) = self
            .send(req)
            .await
            .map_err(|e| ScraperError::LoginFailed(e.to_string()))?;
        if !status.is_success() {
            return Err(ScraperError::LoginFailed(format!("{}: {}", status, body)));
        }
        let id: String = serde_json::from_str(&body)?;
        Ok(Session { id })
    }

    async fn logout(&self, session: &Session) -> Result<(), ScraperError> {
        let req = self
            .client
            .delete(self.url("api/session"))
            .header(SESSION_HEADER, &session.id);
        self.send_ok(req).await.map(|_| ())
    }

    async fn session_active(&self, session: &Session) -> Result<bool, ScraperError> {
        let req = self
            .client
            .get(self.url("api/session"))
            .header(SESSION_HEADER, &session.id);
        match self.send(req).await? {
            (StatusCode::UNAUTHORIZED, _) => Ok(false),
            (status, _) if status.is_success() => Ok(true),
            (status, body) => Err(ScraperError::Http(status, body)),
        }
    }

    async fn rest_login(&self, session: &Session) -> Result<RestSession, ScraperError> {
        let req = self
            .client
            .post(self.url("rest/com/vmware/cis/session"))
            .header(SESSION_HEADER, &session.id)
            .basic_auth(&self.username, Some(&self.password));
        let body = self.send_ok(req).await?;
        let token: RestValue<String> = serde_json::from_str(&body)?;
        Ok(RestSession { id: token.value })
    }

    async fn retrieve_all(
        &self,
        session: &Session,
        kind: &EntityKind,
        root: Option<&EntityRef>,
        properties: &[&str],
    ) -> Result<Vec<Value>, ScraperError> {
        let payload = json!({
            "type": kind,
            "root": root,
            "properties": properties,
        });
        let req = self
            .client
            .post(self.url("api/inventory/retrieve"))
            .header(SESSION_HEADER, &session.id)
            .json(&payload);
        let body = self.send_ok(req).await?;
        let resp: RetrieveResponse = serde_json::from_str(&body)?;
        Ok(resp.objects)
    }

    async fn retrieve_one(
        &self,
        session: &Session,
        entity: &EntityRef,
        properties: &[&str],
    ) -> Result<Option<Value>, ScraperError> {
        let payload = json!({
            "ref": entity,
            "properties": properties,
        });
        let req = self
            .client
            .post(self.url("api/inventory/retrieve-one"))
            .header(SESSION_HEADER, &session.id)
            .json(&payload);
        match self.send(req).await? {
            (StatusCode::NOT_FOUND, _) => Ok(None),
            (status, body) if status.is_success() => Ok(Some(serde_json::from_str(&body)?)),
            (status, body) => Err(ScraperError::Http(status, body)),
        }
    }

    async fn query_perf(
        &self,
        session: &Session,
        spec: &PerfQuerySpec,
    ) -> Result<Vec<EntityMetricSeries>, ScraperError> {
        let req = self
            .client
            .post(self.url("api/performance/query"))
            .header(SESSION_HEADER, &session.id)
            .json(spec);
        let body = self.send_ok(req).await?;
        let resp: PerfResponse = serde_json::from_str(&body)?;
        Ok(resp.series)
    }

    async fn list_tag_categories(
        &self,
        rest: &RestSession,
    ) -> Result<Vec<TagCategory>, ScraperError> {
        let req = self
            .client
            .get(self.url("api/cis/tagging/category"))
            .header(SESSION_HEADER, &rest.id);
        let body = self.send_ok(req).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn list_tags_for_category(
        &self,
        rest: &RestSession,
        category_id: &str,
    ) -> Result<Vec<Tag>, ScraperError> {
        let req = self
            .client
            .get(self.url(&format!("api/cis/tagging/category/{}/tags", category_id)))
            .header(SESSION_HEADER, &rest.id);
        let body = self.send_ok(req).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn list_attached_objects(
        &self,
        rest: &RestSession,
        tag_id: &str,
    ) -> Result<Vec<EntityRef>, ScraperError> {
        let req = self
            .client
            .get(self.url(&format!("api/cis/tagging/tag/{}/attached-objects", tag_id)))
            .header(SESSION_HEADER, &rest.id);
        let body = self.send_ok(req).await?;
        Ok(serde_json::from_str(&body)?)
    }
}
