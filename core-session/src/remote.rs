//! Remote authoritative store.
//!
//! The remote store exposes two operations on the `User/` resource:
//!
//! - `GET  {server}/User/{id}` returns the full entity graph
//! - `POST {server}/User/` with `{}` creates an entity and returns it with
//!   its server-assigned id

use std::sync::Arc;

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use core_runtime::config::CoreConfig;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{Result, SessionError};
use crate::model::{EntityId, EntityPayload, NewEntity};

const USER_RESOURCE: &str = "User/";

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the entity graph for `id`.
    async fn fetch(&self, id: &EntityId) -> Result<EntityPayload>;

    /// Create a new entity. The returned payload carries the assigned id.
    async fn create(&self, entity: &NewEntity) -> Result<EntityPayload>;
}

/// [`RemoteStore`] over the host's [`HttpClient`].
pub struct HttpRemoteStore {
    http: Arc<dyn HttpClient>,
    base: Url,
    retry: RetryPolicy,
}

impl HttpRemoteStore {
    pub fn new(http: Arc<dyn HttpClient>, server_url: &Url, retry: RetryPolicy) -> Result<Self> {
        let base = server_url
            .join(USER_RESOURCE)
            .map_err(core_runtime::Error::from)?;
        Ok(Self { http, base, retry })
    }

    pub fn from_config(http: Arc<dyn HttpClient>, config: &CoreConfig) -> Result<Self> {
        Ok(Self {
            http,
            base: config.endpoint(USER_RESOURCE)?,
            retry: config.remote_retry.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn entity_url(&self, id: &EntityId) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                core_runtime::Error::Config(format!("Server URL {} cannot carry a path", self.base))
            })?
            .pop_if_empty()
            .push(id.as_str());
        Ok(url)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    #[instrument(skip(self), fields(entity_id = %id))]
    async fn fetch(&self, id: &EntityId) -> Result<EntityPayload> {
        let url = self.entity_url(id)?;
        debug!(%url, "Fetching entity");

        let request = HttpRequest::new(HttpMethod::Get, url.as_str()).accept_json();
        let response = self
            .http
            .execute_with_retry(request, self.retry.clone())
            .await
            .map_err(|e| SessionError::RemoteFetch {
                id: id.to_string(),
                message: e.to_string(),
            })?;

        if response.status == 404 {
            return Err(SessionError::RemoteFetch {
                id: id.to_string(),
                message: "not found".to_string(),
            });
        }
        if !response.is_success() {
            return Err(SessionError::RemoteFetch {
                id: id.to_string(),
                message: status_message(&response),
            });
        }
        parse_payload(&response)
    }

    #[instrument(skip(self, entity))]
    async fn create(&self, entity: &NewEntity) -> Result<EntityPayload> {
        let request = HttpRequest::new(HttpMethod::Post, self.base.as_str())
            .accept_json()
            .json(entity)
            .map_err(|e| SessionError::RemoteCreate {
                message: e.to_string(),
            })?;

        let response = self
            .http
            .execute_with_retry(request, self.retry.clone())
            .await
            .map_err(|e| SessionError::RemoteCreate {
                message: e.to_string(),
            })?;

        if !response.is_success() {
            return Err(SessionError::RemoteCreate {
                message: status_message(&response),
            });
        }

        let payload = parse_payload(&response)?;
        debug!(entity_id = %payload.id, "Remote store created entity");
        Ok(payload)
    }
}

fn status_message(response: &HttpResponse) -> String {
    match response.text() {
        Ok(body) if !body.is_empty() => format!("status {}: {}", response.status, body),
        _ => format!("status {}", response.status),
    }
}

fn parse_payload(response: &HttpResponse) -> Result<EntityPayload> {
    serde_json::from_slice(&response.body)
        .map_err(|e| SessionError::InvalidPayload(format!("entity body: {}", e)))
}
