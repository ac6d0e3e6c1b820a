//! Opaque domain callouts
//!
//! Wallet and fleet lookups wrap third-party APIs the gateway knows nothing
//! about beyond "send the user id, get human-readable text back". When no
//! endpoint is configured the tools answer with an unavailability notice
//! instead of erroring, so the model can apologize gracefully.

use async_trait::async_trait;

use crate::{Error, Result};

/// Outbound adapter for domain lookups
#[async_trait]
pub trait DomainLookup: Send + Sync {
    /// Current wallet balance as human-readable text
    async fn wallet_balance(&self, user_id: &str) -> Result<String>;

    /// Fleet status as human-readable text
    async fn fleet_status(&self, user_id: &str) -> Result<String>;
}

/// HTTP adapter against the configured domain API
pub struct HttpDomainGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDomainGateway {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_text(&self, path: &str) -> Result<String> {
        let url = format!("{}/{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Model(format!("domain lookup failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Model(format!(
                "domain lookup error {}",
                response.status()
            )));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl DomainLookup for HttpDomainGateway {
    async fn wallet_balance(&self, user_id: &str) -> Result<String> {
        self.fetch_text(&format!("wallet/{user_id}/balance")).await
    }

    async fn fleet_status(&self, user_id: &str) -> Result<String> {
        self.fetch_text(&format!("fleet/{user_id}/status")).await
    }
}
