//! Liveness probes.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Checks whether a target answers at all.
///
/// Any HTTP response counts as an answer; only the status code is kept.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, address: &str) -> Result<u16, ProbeError>;
}

/// `GET` probe with a per-request timeout. The response body is ignored.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn probe(&self, address: &str) -> Result<u16, ProbeError> {
        let response = self.client.get(address).send().await?;
        Ok(response.status().as_u16())
    }
}
