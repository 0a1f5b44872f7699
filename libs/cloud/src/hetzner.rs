//! Hetzner Cloud adapter.
//!
//! Talks to the Hetzner Cloud v1 API with a bearer token. Servers are
//! started at create time (`start_after_create`), and the root volume
//! dies with the server, so there is no external-volume cleanup here.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::CloudError;
use crate::provider::{
    PowerState, Provider, ProviderKind, ProviderSpec, ServerRecord, VolumeRecord,
};

const DEFAULT_BASE_URL: &str = "https://api.hetzner.cloud/v1";

/// Hetzner Cloud provider adapter.
pub struct HetznerProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HetznerProvider {
    /// Create an adapter. A missing token surfaces as
    /// [`CloudError::Auth`] on first use, before any resource exists.
    pub fn new(token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
        }
    }

    /// Override the API endpoint (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn token(&self) -> Result<&str, CloudError> {
        self.token
            .as_deref()
            .ok_or_else(|| CloudError::Auth("HETZNER_API_TOKEN not configured".to_string()))
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, CloudError> {
        let token = self.token()?;
        let url = format!("{}/{}", self.base_url, path);
        debug!(method = %method, url = %url, "Hetzner API request");

        let mut request = self.client.request(method, &url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Hetzner API error");
            return Err(CloudError::from_status(status.as_u16(), body));
        }

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(serde_json::Value::Null);
        }
        let text = response.text().await?;
        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| CloudError::Api { status: status.as_u16(), body: e.to_string() })
    }
}

#[derive(Debug, Deserialize)]
struct HetznerServer {
    id: i64,
    name: String,
    status: String,
    server_type: HetznerServerType,
    #[serde(default)]
    public_net: Option<HetznerPublicNet>,
}

#[derive(Debug, Deserialize)]
struct HetznerServerType {
    name: String,
}

#[derive(Debug, Deserialize)]
struct HetznerPublicNet {
    #[serde(default)]
    ipv4: Option<HetznerIpv4>,
}

#[derive(Debug, Deserialize)]
struct HetznerIpv4 {
    ip: String,
}

impl HetznerServer {
    fn into_record(self) -> ServerRecord {
        let address = self
            .public_net
            .and_then(|net| net.ipv4)
            .and_then(|v4| v4.ip.parse::<Ipv4Addr>().ok());

        ServerRecord {
            id: self.id.to_string(),
            name: self.name,
            address,
            status: self.status,
            server_type: self.server_type.name,
        }
    }
}

#[async_trait]
impl Provider for HetznerProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Hetzner
    }

    async fn create(&self, spec: &ProviderSpec, name: &str) -> Result<ServerRecord, CloudError> {
        let mut body = json!({
            "name": name,
            "server_type": spec.server_type,
            "image": spec.image,
            "location": spec.zone,
            "start_after_create": true,
        });
        if let Some(map) = body.as_object_mut() {
            for (key, value) in &spec.extra {
                map.insert(key.clone(), value.clone());
            }
        }

        info!(name = %name, server_type = %spec.server_type, "Creating Hetzner server");
        let data = self.request(reqwest::Method::POST, "servers", Some(body)).await?;

        let server: HetznerServer = serde_json::from_value(data["server"].clone())
            .map_err(|e| CloudError::Api { status: 200, body: e.to_string() })?;
        Ok(server.into_record())
    }

    async fn list(&self) -> Result<Vec<ServerRecord>, CloudError> {
        let data = self.request(reqwest::Method::GET, "servers", None).await?;
        let servers: Vec<HetznerServer> = serde_json::from_value(data["servers"].clone())
            .map_err(|e| CloudError::Api { status: 200, body: e.to_string() })?;
        Ok(servers.into_iter().map(HetznerServer::into_record).collect())
    }

    async fn get(&self, id: &str) -> Result<ServerRecord, CloudError> {
        let data = self
            .request(reqwest::Method::GET, &format!("servers/{id}"), None)
            .await?;
        let server: HetznerServer = serde_json::from_value(data["server"].clone())
            .map_err(|e| CloudError::Api { status: 200, body: e.to_string() })?;
        Ok(server.into_record())
    }

    async fn destroy(&self, id: &str) -> Result<(), CloudError> {
        info!(server_id = %id, "Destroying Hetzner server");
        match self
            .request(reqwest::Method::DELETE, &format!("servers/{id}"), None)
            .await
        {
            Ok(_) => Ok(()),
            // Already gone counts as destroyed.
            Err(e) if e.is_not_found() => {
                debug!(server_id = %id, "Server already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn snapshot(&self, id: &str) -> Result<Vec<String>, CloudError> {
        info!(server_id = %id, "Creating Hetzner snapshot");
        let data = self
            .request(
                reqwest::Method::POST,
                &format!("servers/{id}/actions/create_image"),
                Some(json!({
                    "description": "bnode-snapshot",
                    "type": "snapshot",
                })),
            )
            .await?;

        let image_id = data["image"]["id"]
            .as_i64()
            .map(|v| v.to_string())
            .ok_or_else(|| CloudError::Api {
                status: 200,
                body: "create_image response missing image id".to_string(),
            })?;
        Ok(vec![image_id])
    }

    async fn set_power(&self, id: &str, state: PowerState) -> Result<(), CloudError> {
        let action = match state {
            PowerState::On => "poweron",
            PowerState::Off => "poweroff",
        };
        info!(server_id = %id, action = %action, "Changing Hetzner power state");
        self.request(
            reqwest::Method::POST,
            &format!("servers/{id}/actions/{action}"),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    async fn attached_volumes(&self, _id: &str) -> Result<Vec<VolumeRecord>, CloudError> {
        // Hetzner root volumes are deleted with the server.
        Ok(Vec::new())
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<(), CloudError> {
        debug!(volume_id = %volume_id, "No external volumes on Hetzner, nothing to delete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_spec() -> ProviderSpec {
        ProviderSpec {
            kind: ProviderKind::Hetzner,
            server_type: "cx22".to_string(),
            image: "ubuntu-22.04".to_string(),
            zone: "fsn1".to_string(),
            monthly_cost_eur: 3.49,
            extra: serde_json::Map::new(),
        }
    }

    fn server_json(id: i64, name: &str, ip: Option<&str>) -> serde_json::Value {
        json!({
            "id": id,
            "name": name,
            "status": "running",
            "server_type": {"name": "cx22"},
            "public_net": {"ipv4": ip.map(|ip| json!({"ip": ip}))},
        })
    }

    async fn provider(server: &MockServer) -> HetznerProvider {
        HetznerProvider::new(Some("test-token".to_string())).with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_missing_token_is_auth_error() {
        let adapter = HetznerProvider::new(None);
        let err = adapter.list().await.unwrap_err();
        assert!(matches!(err, CloudError::Auth(_)));
    }

    #[tokio::test]
    async fn test_create_starts_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servers"))
            .and(body_partial_json(json!({
                "name": "b1",
                "server_type": "cx22",
                "start_after_create": true,
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"server": server_json(42, "b1", Some("203.0.113.9"))})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let record = provider(&server).await.create(&test_spec(), "b1").await.unwrap();
        assert_eq!(record.id, "42");
        assert_eq!(record.address, Some("203.0.113.9".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_list_tolerates_missing_address() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "servers": [server_json(1, "b1", None), server_json(2, "b2", Some("203.0.113.2"))],
            })))
            .mount(&server)
            .await;

        let records = provider(&server).await.list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].address.is_none());
        assert!(records[1].address.is_some());
    }

    #[tokio::test]
    async fn test_destroy_absent_server_is_noop() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/servers/99"))
            .respond_with(ResponseTemplate::new(404).set_body_string("server not found"))
            .mount(&server)
            .await;

        provider(&server).await.destroy("99").await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_returns_image_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servers/42/actions/create_image"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"image": {"id": 777}})),
            )
            .mount(&server)
            .await;

        let ids = provider(&server).await.snapshot("42").await.unwrap();
        assert_eq!(ids, vec!["777".to_string()]);
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = provider(&server).await.list().await.unwrap_err();
        assert!(err.is_transient());
    }
}
