//! HTTP client for the dashboard's REST API.
//!
//! Implements the cache's fetch interface plus the write calls used by
//! mutations. Every failure is mapped into `RemoteError`, carrying the
//! server's `message` field when the response has one.

use std::str::FromStr;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use crate::cache::{Record, ResourceFetcher, ResourceKey};
use crate::config::ApiSettings;
use crate::domain::error::RemoteError;
use crate::domain::resources::Resource;

use super::error::InfraError;

const DATA_FIELD: &str = "data";

/// Result of a bulk student import.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImportSummary {
    pub imported: usize,
    #[serde(default)]
    pub skipped: usize,
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base: Url,
    bearer_token: Option<String>,
}

impl ApiClient {
    pub fn new(settings: &ApiSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(settings.timeout)
            .build()
            .map_err(InfraError::ClientBuild)?;
        Ok(Self {
            client,
            base: settings.base_url.clone(),
            bearer_token: settings.bearer_token.clone(),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("examdash/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, RemoteError> {
        self.base
            .join(path)
            .map_err(|err| RemoteError::transport(format!("invalid request path `{path}`: {err}")))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, RemoteError> {
        let url = self.url(path)?;
        let mut request = self.client.request(method, url);
        if let Some(token) = self.bearer_token.as_deref() {
            request = request.bearer_auth(token);
        }
        Ok(request)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, RemoteError> {
        let response = request.send().await.map_err(map_transport)?;
        Self::handle(response).await
    }

    async fn handle(response: Response) -> Result<Value, RemoteError> {
        let status = response.status();
        let bytes = response.bytes().await.map_err(map_transport)?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes);
            debug!(status = status.as_u16(), body = %text, "API request failed");
            return Err(RemoteError::status(
                status.as_u16(),
                RemoteError::message_from_body(&text),
            ));
        }
        if bytes.is_empty() || status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| RemoteError::decode(format!("failed to parse body: {err}")))
    }

    /// GET the full collection of `resource`.
    #[instrument(skip_all, fields(resource = %resource))]
    pub async fn list(&self, resource: Resource) -> Result<Vec<Record>, RemoteError> {
        let payload = self.send(self.request(Method::GET, resource.path())?).await?;
        collection_from_payload(payload)
    }

    #[instrument(skip_all, fields(resource = %resource))]
    pub async fn create(&self, resource: Resource, body: &Value) -> Result<Record, RemoteError> {
        let request = self.request(Method::POST, resource.path())?.json(body);
        Ok(unwrap_data(self.send(request).await?))
    }

    #[instrument(skip_all, fields(resource = %resource))]
    pub async fn update(
        &self,
        resource: Resource,
        id: &str,
        body: &Value,
    ) -> Result<Record, RemoteError> {
        let path = format!("{}/{id}", resource.path());
        let request = self.request(Method::PUT, &path)?.json(body);
        Ok(unwrap_data(self.send(request).await?))
    }

    #[instrument(skip_all, fields(resource = %resource))]
    pub async fn delete(&self, resource: Resource, id: &str) -> Result<(), RemoteError> {
        let path = format!("{}/{id}", resource.path());
        self.send(self.request(Method::DELETE, &path)?).await?;
        Ok(())
    }

    /// Bulk-create students from already-parsed rows.
    #[instrument(skip_all, fields(rows = rows.len()))]
    pub async fn import_students(&self, rows: &[Value]) -> Result<ImportSummary, RemoteError> {
        let path = format!("{}/import", Resource::Students.path());
        let request = self
            .request(Method::POST, &path)?
            .json(&json!({ "students": rows }));
        let payload = unwrap_data(self.send(request).await?);
        if payload.is_null() {
            return Ok(ImportSummary {
                imported: rows.len(),
                skipped: 0,
            });
        }
        serde_json::from_value(payload)
            .map_err(|err| RemoteError::decode(format!("invalid import summary: {err}")))
    }
}

#[async_trait]
impl ResourceFetcher for ApiClient {
    async fn fetch(&self, key: &ResourceKey) -> Result<Vec<Record>, RemoteError> {
        let resource = Resource::from_str(key.as_str())
            .map_err(|err| RemoteError::aborted(err.to_string()))?;
        self.list(resource).await
    }
}

fn map_transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::transport(err.to_string())
    }
}

/// Accept either a bare JSON array or `{"data": [...]}`.
fn collection_from_payload(payload: Value) -> Result<Vec<Record>, RemoteError> {
    match payload {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut object) => match object.remove(DATA_FIELD) {
            Some(Value::Array(rows)) => Ok(rows),
            _ => Err(RemoteError::decode(
                "expected an array or an object with a `data` array",
            )),
        },
        other => Err(RemoteError::decode(format!(
            "expected an array, got {}",
            json_kind(&other)
        ))),
    }
}

fn unwrap_data(payload: Value) -> Value {
    match payload {
        Value::Object(mut object) if object.contains_key(DATA_FIELD) => {
            object.remove(DATA_FIELD).unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
