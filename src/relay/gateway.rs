//! Ingestion gateway.
//!
//! Turns one inbound feed message into at most one queue record. Routing
//! metadata comes from the topic path, the dedup key from the JSON body.
//! Malformed input and unsupported event types are dropped with a log
//! event; only storage I/O failures are returned as errors.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::generate_message_id;
use crate::observability::metrics::record_ingest;
use crate::storage::{run_blocking, QueueStore, StoreError};

/// JSON field carrying the application-supplied dedup key.
pub const DEDUP_FIELD: &str = "deduplicationId";

/// Routing metadata extracted from `{root}/{app_id}/device/{device_id}/event/{event_type}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRoute {
    pub app_id: String,
    pub device_id: String,
    pub event_type: String,
}

/// Reasons an inbound message cannot be admitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedInput {
    #[error("topic '{0}' does not match {{root}}/{{app}}/device/{{device}}/event/{{type}}")]
    Topic(String),

    #[error("payload is not a JSON object: {0}")]
    Payload(String),

    #[error("payload has no string field '{DEDUP_FIELD}'")]
    MissingDedupId,
}

/// Why a message was dropped rather than queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed(MalformedInput),
    UnsupportedEvent(String),
}

/// Outcome of admitting one message. All variants are successful handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Queued { message_id: String, dedup_id: String },
    /// Already queued by an earlier delivery of the same event
    Duplicate { dedup_id: String },
    Dropped(DropReason),
}

impl Admission {
    fn outcome_label(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::Duplicate { .. } => "duplicate",
            Self::Dropped(DropReason::Malformed(_)) => "malformed",
            Self::Dropped(DropReason::UnsupportedEvent(_)) => "unsupported",
        }
    }
}

/// Parse a hierarchical event topic.
pub fn parse_topic(topic: &str) -> Result<TopicRoute, MalformedInput> {
    let parts: Vec<&str> = topic.split('/').collect();
    match parts.as_slice() {
        [root, app_id, "device", device_id, "event", event_type]
            if !root.is_empty()
                && !app_id.is_empty()
                && !device_id.is_empty()
                && !event_type.is_empty() =>
        {
            Ok(TopicRoute {
                app_id: (*app_id).to_string(),
                device_id: (*device_id).to_string(),
                event_type: (*event_type).to_string(),
            })
        }
        _ => Err(MalformedInput::Topic(topic.to_string())),
    }
}

/// Extract the dedup key from a JSON object payload.
pub fn extract_dedup_id(payload: &[u8]) -> Result<String, MalformedInput> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| MalformedInput::Payload(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| MalformedInput::Payload("top-level value is not an object".into()))?;

    match object.get(DEDUP_FIELD).and_then(serde_json::Value::as_str) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(MalformedInput::MissingDedupId),
    }
}

/// Admits inbound events into the durable queue.
#[derive(Clone)]
pub struct Gateway {
    store: QueueStore,
    event_types: Arc<HashSet<String>>,
}

impl Gateway {
    pub fn new<I, S>(store: QueueStore, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            store,
            event_types: Arc::new(event_types.into_iter().map(Into::into).collect()),
        }
    }

    /// Admit one message.
    ///
    /// # Errors
    ///
    /// Only storage I/O failures; the caller should leave the message
    /// unacknowledged so the feed can redeliver it.
    #[tracing::instrument(skip(self, payload), fields(message_id))]
    pub async fn admit(&self, topic: &str, payload: &[u8]) -> Result<Admission, StoreError> {
        let admission = match self.classify(topic, payload) {
            Ok((route, dedup_id)) => self.enqueue(route, dedup_id, payload.to_vec()).await?,
            Err(reason) => {
                match &reason {
                    DropReason::Malformed(cause) => {
                        tracing::warn!(topic, error = %cause, "Dropping malformed message");
                    }
                    DropReason::UnsupportedEvent(event_type) => {
                        tracing::debug!(topic, event_type = %event_type, "Skipping unsupported event type");
                    }
                }
                Admission::Dropped(reason)
            }
        };

        record_ingest(admission.outcome_label());
        Ok(admission)
    }

    fn classify(&self, topic: &str, payload: &[u8]) -> Result<(TopicRoute, String), DropReason> {
        let route = parse_topic(topic).map_err(DropReason::Malformed)?;
        if !self.event_types.contains(&route.event_type) {
            return Err(DropReason::UnsupportedEvent(route.event_type));
        }
        let dedup_id = extract_dedup_id(payload).map_err(DropReason::Malformed)?;
        Ok((route, dedup_id))
    }

    async fn enqueue(
        &self,
        route: TopicRoute,
        dedup_id: String,
        payload: Vec<u8>,
    ) -> Result<Admission, StoreError> {
        let message_id = generate_message_id();
        tracing::Span::current().record("message_id", message_id.as_str());

        let store = self.store.clone();
        let (mid, did) = (message_id.clone(), dedup_id.clone());
        let result = run_blocking(move || store.enqueue(&mid, &did, &payload)).await;

        match result {
            Ok(sequence) => {
                tracing::info!(
                    app_id = %route.app_id,
                    device_id = %route.device_id,
                    event_type = %route.event_type,
                    dedup_id = %dedup_id,
                    sequence,
                    "Queued event for uplink"
                );
                Ok(Admission::Queued {
                    message_id,
                    dedup_id,
                })
            }
            Err(StoreError::DuplicateKey) => {
                tracing::debug!(dedup_id = %dedup_id, "Event already queued, ignoring redelivery");
                Ok(Admission::Duplicate { dedup_id })
            }
            Err(e) => {
                tracing::warn!(dedup_id = %dedup_id, error = %e, "Failed to queue event");
                record_ingest("store_error");
                Err(e)
            }
        }
    }
}
