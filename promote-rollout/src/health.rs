//! HTTP probe of the deployment verification endpoint.

use std::time::Duration;

use async_trait::async_trait;

use promote_core::{HealthProbe, PromoteError};

use crate::error::KubectlError;

#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration, accept_invalid_certs: bool) -> Result<Self, KubectlError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .user_agent(concat!("promote/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(KubectlError::HttpClient)?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str) -> Result<u16, PromoteError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| KubectlError::Probe {
                url: url.to_string(),
                timeout: self.timeout,
                source,
            })?;
        let status = response.status().as_u16();
        tracing::debug!(url, status, "health probe");
        Ok(status)
    }
}
