//! DNS record synchronization.
//!
//! Keeps exactly one A record per node in a single zone. DNS is a soft
//! dependency: callers treat `NotConfigured` (and any other failure)
//! as a warning, never a lifecycle abort.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

/// DNS synchronization errors.
#[derive(Debug, Error)]
pub enum DnsError {
    /// Token or zone id missing; safe to call, reported as soft failure.
    #[error("DNS not configured: {0}")]
    NotConfigured(&'static str),

    #[error("DNS API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("DNS transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A-record synchronization against a single zone.
#[async_trait]
pub trait DnsSync: Send + Sync {
    /// Update the record if it exists, otherwise create it.
    async fn upsert(&self, name: &str, address: Ipv4Addr) -> Result<(), DnsError>;

    /// Delete the record if present; absence is a no-op.
    async fn delete(&self, name: &str) -> Result<(), DnsError>;
}

const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";
const RECORD_TTL: u32 = 300;

/// Cloudflare DNS synchronizer.
pub struct CloudflareDns {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    zone_id: Option<String>,
    domain: String,
}

impl CloudflareDns {
    pub fn new(token: Option<String>, zone_id: Option<String>, domain: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
            zone_id,
            domain: domain.to_string(),
        }
    }

    /// Override the API endpoint (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn credentials(&self) -> Result<(&str, &str), DnsError> {
        let token = self
            .token
            .as_deref()
            .ok_or(DnsError::NotConfigured("CLOUDFLARE_API_TOKEN"))?;
        let zone_id = self
            .zone_id
            .as_deref()
            .ok_or(DnsError::NotConfigured("BNODE_CLOUDFLARE_ZONE_ID"))?;
        Ok((token, zone_id))
    }

    /// Look up the record id for `{name}.{domain}`, if any.
    async fn find_record(&self, name: &str) -> Result<Option<String>, DnsError> {
        let (token, zone_id) = self.credentials()?;
        let fqdn = format!("{name}.{}", self.domain);
        let url = format!(
            "{}/zones/{zone_id}/dns_records?type=A&name={fqdn}",
            self.base_url
        );

        let response = self.client.get(&url).bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DnsError::Api { status: status.as_u16(), body });
        }

        let listing: RecordListing = response.json().await?;
        Ok(listing.result.into_iter().next().map(|r| r.id))
    }

    async fn send_record(
        &self,
        method: reqwest::Method,
        path: &str,
        name: &str,
        address: Ipv4Addr,
    ) -> Result<(), DnsError> {
        let (token, zone_id) = self.credentials()?;
        let url = format!("{}/zones/{zone_id}/{path}", self.base_url);

        let response = self
            .client
            .request(method, &url)
            .bearer_auth(token)
            .json(&json!({
                "type": "A",
                "name": name,
                "content": address.to_string(),
                "ttl": RECORD_TTL,
                "proxied": false,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DnsError::Api { status: status.as_u16(), body });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RecordListing {
    #[serde(default)]
    result: Vec<RecordEntry>,
}

#[derive(Debug, Deserialize)]
struct RecordEntry {
    id: String,
}

#[async_trait]
impl DnsSync for CloudflareDns {
    async fn upsert(&self, name: &str, address: Ipv4Addr) -> Result<(), DnsError> {
        match self.find_record(name).await? {
            Some(record_id) => {
                info!(name = %name, address = %address, "Updating DNS record");
                self.send_record(
                    reqwest::Method::PUT,
                    &format!("dns_records/{record_id}"),
                    name,
                    address,
                )
                .await
            }
            None => {
                info!(name = %name, address = %address, "Creating DNS record");
                self.send_record(reqwest::Method::POST, "dns_records", name, address)
                    .await
            }
        }
    }

    async fn delete(&self, name: &str) -> Result<(), DnsError> {
        let Some(record_id) = self.find_record(name).await? else {
            debug!(name = %name, "No DNS record to delete");
            return Ok(());
        };

        let (token, zone_id) = self.credentials()?;
        info!(name = %name, record_id = %record_id, "Deleting DNS record");
        let url = format!("{}/zones/{zone_id}/dns_records/{record_id}", self.base_url);
        let response = self.client.delete(&url).bearer_auth(token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DnsError::Api { status: status.as_u16(), body });
        }
        Ok(())
    }
}
