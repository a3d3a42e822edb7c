//! HTTP client for the external license-verification endpoint.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use url::Url;

use crate::APP_USER_AGENT;

/// Every call carries this timeout; a slow license server degrades to the
/// grace-period policy instead of blocking logins.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// License descriptor as returned by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLicense {
    pub id: String,
    pub key: String,
    pub tier: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Clone)]
pub struct LicenseClient {
    http: reqwest::Client,
    base_url: Url,
}

impl LicenseClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: Url) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build license client")?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid license endpoint path: {path}"))
    }

    /// `POST /licenses/create`
    ///
    /// # Errors
    /// Returns an error on network failure or a non-success response.
    pub async fn create(&self, tier: &str, email: &str) -> Result<RemoteLicense> {
        let url = self.endpoint("licenses/create")?;
        let response = self
            .http
            .post(url)
            .json(&json!({"tier": tier, "email": email}))
            .send()
            .await
            .context("license create request failed")?;
        decode(response).await
    }

    /// `POST /licenses/verify`
    ///
    /// # Errors
    /// Returns an error on network failure or a non-success response.
    pub async fn verify(&self, key: &str, device_id: &str) -> Result<RemoteLicense> {
        let url = self.endpoint("licenses/verify")?;
        let response = self
            .http
            .post(url)
            .json(&json!({"key": key, "device_id": device_id}))
            .send()
            .await
            .context("license verify request failed")?;
        decode(response).await
    }

    /// `POST /licenses/ping`, the periodic liveness/validation call.
    ///
    /// # Errors
    /// Returns an error on network failure or a non-success response.
    pub async fn ping(&self, key: &str, device_id: &str) -> Result<RemoteLicense> {
        let url = self.endpoint("licenses/ping")?;
        let response = self
            .http
            .post(url)
            .json(&json!({"key": key, "device_id": device_id}))
            .send()
            .await
            .context("license ping request failed")?;
        decode(response).await
    }

    /// `GET /licenses/key/:key`
    ///
    /// # Errors
    /// Returns an error on network failure or a non-success response.
    pub async fn get_by_key(&self, key: &str) -> Result<RemoteLicense> {
        let url = self.endpoint(&format!("licenses/key/{key}"))?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("license lookup request failed")?;
        decode(response).await
    }

    /// `POST /licenses/:id/deactivate`
    ///
    /// # Errors
    /// Returns an error on network failure or a non-success response.
    pub async fn deactivate(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&format!("licenses/{id}/deactivate"))?;
        let response = self
            .http
            .post(url)
            .send()
            .await
            .context("license deactivate request failed")?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow!(
                "license server rejected deactivation: {}",
                response.status()
            ))
        }
    }
}

async fn decode(response: reqwest::Response) -> Result<RemoteLicense> {
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("license server returned {status}"));
    }
    response
        .json::<RemoteLicense>()
        .await
        .context("failed to decode license response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn endpoint_joins_paths() {
        let client = LicenseClient::new(Url::parse("https://licenses.sesamo.dev/").unwrap())
            .unwrap();
        let url = client.endpoint("licenses/ping").unwrap();
        assert_eq!(url.as_str(), "https://licenses.sesamo.dev/licenses/ping");
    }
}
