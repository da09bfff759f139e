//! Delivery sink: where drained records are forwarded.
//!
//! The drain worker depends only on the success/failure contract of
//! [`DeliverySink`]. The production sink POSTs the original payload bytes
//! to an HTTP endpoint; anything but HTTP 200 is a failed delivery.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use thiserror::Error;

use crate::storage::QueueRecord;

/// A failed delivery. Always transient from the relay's point of view:
/// the record stays queued and is retried on a later cycle.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("sink responded with HTTP {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid sink endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Downstream consumer of queued records.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Forward one record. `Ok` means the consumer confirmed receipt.
    async fn deliver(&self, record: &QueueRecord) -> Result<(), DeliveryError>;
}

/// HTTP sink: `POST` of the raw payload with `Content-Type: application/json`.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpSink {
    /// Create a sink for `endpoint` with a per-request timeout.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| DeliveryError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl DeliverySink for HttpSink {
    async fn deliver(&self, record: &QueueRecord) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(record.payload.clone())
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(DeliveryError::Status(status.as_u16())),
        }
    }
}
