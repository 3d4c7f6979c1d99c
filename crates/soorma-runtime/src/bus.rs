//! Bus client surface (spec §4.2 / §4.5): publish, ack, subscribe-and-
//! filter over the Event Bus service's `/v1/events` HTTP surface (spec
//! §6.2).

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use reqwest_eventsource::{Event as SseLifecycleEvent, EventSource};
use soorma_envelope::Envelope;
use soorma_types::Topic;
use tracing::warn;
use uuid::Uuid;

use crate::error::RuntimeError;
use crate::identity::Identity;
use crate::transport::{ok_or_api_error, parse_json_response};

/// Envelope stream returned by [`BusClient::subscribe`] — lazy, infinite,
/// and (for the HTTP implementation) resumable across reconnects via
/// `Last-Event-ID` (spec §4.5 "Subscribe-and-filter").
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Envelope> + Send>>;

/// Filter applied to a subscription (spec §4.2 routing rules). Unlike the
/// raw HTTP query string, `tenant_id` isn't part of this struct — it's
/// always the client's own [`Identity`].
#[derive(Debug, Clone, Default)]
pub struct SubscribeFilter {
    /// Prefix match against `event_type`.
    pub event_type: Option<String>,
    /// Competing-consumers group name.
    pub queue_group: Option<String>,
    /// This subscriber's own agent identity, for `assigned_to` targeting.
    pub assigned_to: Option<String>,
}

/// The Event Bus surface an agent links against (spec §4.5).
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Publish an envelope, returning the stored copy (with `event_id`/
    /// `occurred_at` filled in if they were absent).
    async fn publish(&self, envelope: Envelope) -> Result<Envelope, RuntimeError>;

    /// Acknowledge delivery of `event_id` for a queue-group subscription.
    async fn ack(&self, event_id: Uuid) -> Result<(), RuntimeError>;

    /// Subscribe to `topic`, filtered by `filter`. One call opens one
    /// long-lived connection; envelopes are delivered one at a time as
    /// the returned stream is polled.
    async fn subscribe(&self, topic: Topic, filter: SubscribeFilter) -> Result<EnvelopeStream, RuntimeError>;
}

/// Real HTTP implementation of [`BusClient`].
pub struct HttpBusClient {
    http: Client,
    base_url: String,
    identity: Identity,
}

impl HttpBusClient {
    /// Build a client against `base_url` (e.g. `http://bus:8081`),
    /// authenticating as `identity`.
    pub fn new(base_url: impl Into<String>, identity: Identity) -> Self {
        Self { http: Client::new(), base_url: base_url.into(), identity }
    }
}

#[async_trait]
impl BusClient for HttpBusClient {
    async fn publish(&self, envelope: Envelope) -> Result<Envelope, RuntimeError> {
        let url = format!("{}/v1/events", self.base_url);
        let response = self.identity.apply(self.http.post(&url).json(&envelope)).send().await?;
        parse_json_response(response).await
    }

    async fn ack(&self, event_id: Uuid) -> Result<(), RuntimeError> {
        let url = format!("{}/v1/events/ack", self.base_url);
        let body = serde_json::json!({ "event_id": event_id });
        let response = self.identity.apply(self.http.post(&url).json(&body)).send().await?;
        ok_or_api_error(response).await
    }

    async fn subscribe(&self, topic: Topic, filter: SubscribeFilter) -> Result<EnvelopeStream, RuntimeError> {
        let mut url = format!(
            "{}/v1/events/stream?topic={}&tenant_id={}",
            self.base_url,
            topic.as_str(),
            self.identity.tenant_id
        );
        if let Some(event_type) = &filter.event_type {
            url.push_str(&format!("&event_type={event_type}"));
        }
        if let Some(group) = &filter.queue_group {
            url.push_str(&format!("&queue_group={group}"));
        }
        if let Some(assigned_to) = &filter.assigned_to {
            url.push_str(&format!("&assigned_to={assigned_to}"));
        }

        let request = self.identity.apply(self.http.get(&url));
        let mut source = EventSource::new(request).map_err(|err| RuntimeError::Internal(err.to_string()))?;

        let stream = async_stream::stream! {
            while let Some(event) = source.next().await {
                match event {
                    Ok(SseLifecycleEvent::Open) => continue,
                    Ok(SseLifecycleEvent::Message(message)) => {
                        match serde_json::from_str::<Envelope>(&message.data) {
                            Ok(envelope) => yield envelope,
                            Err(err) => warn!(%err, "dropping envelope that failed to decode"),
                        }
                    }
                    Err(err) => {
                        warn!(%err, "event stream closed");
                        source.close();
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
