//! Registry client surface (spec §4.3): registration, heartbeat,
//! discovery, and event/schema catalog lookups against the Registry
//! service's `/v1/agents`, `/v1/events`, `/v1/schemas` HTTP surface (spec
//! §6.2).

use async_trait::async_trait;
use reqwest::Client;

use crate::entities::{AgentDefinition, AgentRecord, DiscoverFilter, EventDefinition, PayloadSchema};
use crate::error::RuntimeError;
use crate::identity::Identity;
use crate::transport::{ok_or_api_error, parse_json_response};

/// The Registry surface an agent links against (spec §4.3).
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn register_agent(&self, definition: AgentDefinition) -> Result<AgentRecord, RuntimeError>;

    /// Refresh `agent_id`'s TTL. A 404 means the record expired and the
    /// agent must re-register (spec §4.3 failure model).
    async fn heartbeat(&self, agent_id: &str) -> Result<AgentRecord, RuntimeError>;

    async fn deregister(&self, agent_id: &str) -> Result<(), RuntimeError>;

    async fn discover(&self, filter: DiscoverFilter) -> Result<Vec<AgentRecord>, RuntimeError>;

    async fn register_event(&self, definition: EventDefinition) -> Result<EventDefinition, RuntimeError>;

    async fn list_events(&self, tenant_scope: Option<&str>) -> Result<Vec<EventDefinition>, RuntimeError>;

    async fn register_schema(&self, schema: PayloadSchema) -> Result<PayloadSchema, RuntimeError>;

    async fn get_schema(&self, schema_name: &str) -> Result<PayloadSchema, RuntimeError>;
}

/// Real HTTP implementation of [`RegistryClient`].
pub struct HttpRegistryClient {
    http: Client,
    base_url: String,
    identity: Identity,
}

impl HttpRegistryClient {
    pub fn new(base_url: impl Into<String>, identity: Identity) -> Self {
        Self { http: Client::new(), base_url: base_url.into(), identity }
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn register_agent(&self, definition: AgentDefinition) -> Result<AgentRecord, RuntimeError> {
        let url = format!("{}/v1/agents", self.base_url);
        let response = self.identity.apply(self.http.post(&url).json(&definition)).send().await?;
        parse_json_response(response).await
    }

    async fn heartbeat(&self, agent_id: &str) -> Result<AgentRecord, RuntimeError> {
        let url = format!("{}/v1/agents/{agent_id}/heartbeat", self.base_url);
        let response = self.identity.apply(self.http.put(&url)).send().await?;
        parse_json_response(response).await
    }

    async fn deregister(&self, agent_id: &str) -> Result<(), RuntimeError> {
        let url = format!("{}/v1/agents/{agent_id}", self.base_url);
        let response = self.identity.apply(self.http.delete(&url)).send().await?;
        ok_or_api_error(response).await
    }

    async fn discover(&self, filter: DiscoverFilter) -> Result<Vec<AgentRecord>, RuntimeError> {
        let url = format!("{}/v1/agents", self.base_url);
        let mut request = self.identity.apply(self.http.get(&url));
        if let Some(capability) = &filter.capability {
            request = request.query(&[("capability", capability)]);
        }
        if let Some(event) = &filter.consumes_event {
            request = request.query(&[("consumes_event", event)]);
        }
        if let Some(event) = &filter.produces_event {
            request = request.query(&[("produces_event", event)]);
        }
        if let Some(scope) = &filter.tenant_scope {
            request = request.query(&[("tenant_scope", scope)]);
        }
        let response = request.send().await?;
        parse_json_response(response).await
    }

    async fn register_event(&self, definition: EventDefinition) -> Result<EventDefinition, RuntimeError> {
        let url = format!("{}/v1/events", self.base_url);
        let response = self.identity.apply(self.http.post(&url).json(&definition)).send().await?;
        parse_json_response(response).await
    }

    async fn list_events(&self, tenant_scope: Option<&str>) -> Result<Vec<EventDefinition>, RuntimeError> {
        let url = format!("{}/v1/events", self.base_url);
        let mut request = self.identity.apply(self.http.get(&url));
        if let Some(scope) = tenant_scope {
            request = request.query(&[("tenant_scope", scope)]);
        }
        let response = request.send().await?;
        parse_json_response(response).await
    }

    async fn register_schema(&self, schema: PayloadSchema) -> Result<PayloadSchema, RuntimeError> {
        let url = format!("{}/v1/schemas", self.base_url);
        let response = self.identity.apply(self.http.post(&url).json(&schema)).send().await?;
        parse_json_response(response).await
    }

    async fn get_schema(&self, schema_name: &str) -> Result<PayloadSchema, RuntimeError> {
        let url = format!("{}/v1/schemas/{schema_name}", self.base_url);
        let response = self.identity.apply(self.http.get(&url)).send().await?;
        parse_json_response(response).await
    }
}
