//! Scaleway adapter.
//!
//! Talks to the Instance API for servers and to the Block Storage API
//! for SBS volumes and their snapshots. Scaleway servers are created
//! stopped and need an explicit `poweron` action, and SBS volumes
//! outlive the server, which is why this adapter reports them for
//! cleanup after destroy.

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

/// Volume type string for block-storage volumes in the Instance API.
const SBS_VOLUME_TYPE: &str = "sbs_volume";

/// Scaleway credentials and project scope.
#[derive(Debug, Clone, Default)]
pub struct ScalewayCredentials {
    pub secret_key: Option<String>,
    pub project_id: Option<String>,
}

/// Scaleway provider adapter.
pub struct ScalewayProvider {
    client: reqwest::Client,
    instance_url: String,
    block_url: String,
    credentials: ScalewayCredentials,
}

impl ScalewayProvider {
    /// Create an adapter scoped to one zone. A missing secret key
    /// surfaces as [`CloudError::Auth`] on first use.
    pub fn new(credentials: ScalewayCredentials, zone: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            instance_url: format!("https://api.scaleway.com/instance/v1/zones/{zone}"),
            block_url: format!("https://api.scaleway.com/block/v1/zones/{zone}"),
            credentials,
        }
    }

    /// Override both API endpoints (tests).
    pub fn with_base_urls(
        mut self,
        instance_url: impl Into<String>,
        block_url: impl Into<String>,
    ) -> Self {
        self.instance_url = instance_url.into();
        self.block_url = block_url.into();
        self
    }

    fn secret_key(&self) -> Result<&str, CloudError> {
        self.credentials
            .secret_key
            .as_deref()
            .ok_or_else(|| CloudError::Auth("SCALEWAY_SECRET_KEY not configured".to_string()))
    }

    async fn request(
        &self,
        method: reqwest::Method,
        base_url: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, CloudError> {
        let secret_key = self.secret_key()?;
        let url = format!("{base_url}/{path}");
        debug!(method = %method, url = %url, "Scaleway API request");

        let mut request = self
            .client
            .request(method, &url)
            .header("X-Auth-Token", secret_key);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Scaleway API error");
            return Err(CloudError::from_status(status.as_u16(), body));
        }

        let text = response.text().await?;
        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| CloudError::Api { status: status.as_u16(), body: e.to_string() })
    }

    async fn fetch_server(&self, id: &str) -> Result<ScalewayServer, CloudError> {
        let data = self
            .request(
                reqwest::Method::GET,
                &self.instance_url,
                &format!("servers/{id}"),
                None,
            )
            .await?;
        serde_json::from_value(data["server"].clone())
            .map_err(|e| CloudError::Api { status: 200, body: e.to_string() })
    }

    async fn server_action(&self, id: &str, action: &str) -> Result<(), CloudError> {
        self.request(
            reqwest::Method::POST,
            &self.instance_url,
            &format!("servers/{id}/action"),
            Some(json!({ "action": action })),
        )
        .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ScalewayServer {
    id: String,
    name: String,
    state: String,
    commercial_type: String,
    #[serde(default)]
    public_ip: Option<ScalewayPublicIp>,
    #[serde(default)]
    volumes: std::collections::BTreeMap<String, ScalewayVolume>,
}

#[derive(Debug, Deserialize)]
struct ScalewayPublicIp {
    address: String,
}

#[derive(Debug, Deserialize)]
struct ScalewayVolume {
    id: String,
    #[serde(default = "default_volume_type")]
    volume_type: String,
}

fn default_volume_type() -> String {
    "l_ssd".to_string()
}

impl ScalewayServer {
    fn into_record(self) -> ServerRecord {
        let address = self
            .public_ip
            .and_then(|ip| ip.address.parse::<Ipv4Addr>().ok());

        ServerRecord {
            id: self.id,
            name: self.name,
            address,
            status: self.state,
            server_type: self.commercial_type,
        }
    }
}

#[async_trait]
impl Provider for ScalewayProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Scaleway
    }

    async fn create(&self, spec: &ProviderSpec, name: &str) -> Result<ServerRecord, CloudError> {
        let mut body = json!({
            "name": name,
            "commercial_type": spec.server_type,
            "image": spec.image,
            "dynamic_ip_required": true,
        });
        if let Some(map) = body.as_object_mut() {
            if let Some(project) = &self.credentials.project_id {
                map.insert("project".to_string(), json!(project));
            }
            for (key, value) in &spec.extra {
                map.insert(key.clone(), value.clone());
            }
        }

        info!(name = %name, commercial_type = %spec.server_type, "Creating Scaleway server");
        let data = self
            .request(reqwest::Method::POST, &self.instance_url, "servers", Some(body))
            .await?;
        let server: ScalewayServer = serde_json::from_value(data["server"].clone())
            .map_err(|e| CloudError::Api { status: 200, body: e.to_string() })?;

        // Scaleway servers come up stopped; boot explicitly.
        self.server_action(&server.id, "poweron").await?;

        Ok(server.into_record())
    }

    async fn list(&self) -> Result<Vec<ServerRecord>, CloudError> {
        let data = self
            .request(reqwest::Method::GET, &self.instance_url, "servers", None)
            .await?;
        let servers: Vec<ScalewayServer> = serde_json::from_value(data["servers"].clone())
            .map_err(|e| CloudError::Api { status: 200, body: e.to_string() })?;
        Ok(servers.into_iter().map(ScalewayServer::into_record).collect())
    }

    async fn get(&self, id: &str) -> Result<ServerRecord, CloudError> {
        Ok(self.fetch_server(id).await?.into_record())
    }

    async fn destroy(&self, id: &str) -> Result<(), CloudError> {
        info!(server_id = %id, "Destroying Scaleway server");
        match self
            .request(
                reqwest::Method::DELETE,
                &self.instance_url,
                &format!("servers/{id}"),
                None,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(server_id = %id, "Server already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn snapshot(&self, id: &str) -> Result<Vec<String>, CloudError> {
        let server = self.fetch_server(id).await?;
        let mut snapshot_ids = Vec::new();

        for (key, volume) in &server.volumes {
            info!(
                volume_id = %volume.id,
                volume_type = %volume.volume_type,
                "Creating Scaleway snapshot"
            );

            // SBS volumes snapshot through the Block Storage API,
            // local volumes through the Instance API.
            let data = if volume.volume_type == SBS_VOLUME_TYPE {
                let mut body = json!({
                    "volume_id": volume.id,
                    "name": format!("bnode-snapshot-{key}"),
                });
                if let Some(project) = &self.credentials.project_id {
                    body["project_id"] = json!(project);
                }
                self.request(reqwest::Method::POST, &self.block_url, "snapshots", Some(body))
                    .await?
            } else {
                let mut body = json!({
                    "volume_id": volume.id,
                    "name": format!("bnode-snapshot-{key}"),
                });
                if let Some(project) = &self.credentials.project_id {
                    body["project"] = json!(project);
                }
                self.request(reqwest::Method::POST, &self.instance_url, "snapshots", Some(body))
                    .await?
            };

            if let Some(snapshot_id) = data["snapshot"]["id"].as_str() {
                snapshot_ids.push(snapshot_id.to_string());
            }
        }

        Ok(snapshot_ids)
    }

    async fn set_power(&self, id: &str, state: PowerState) -> Result<(), CloudError> {
        let action = match state {
            PowerState::On => "poweron",
            PowerState::Off => "poweroff",
        };
        info!(server_id = %id, action = %action, "Changing Scaleway power state");
        self.server_action(id, action).await
    }

    async fn attached_volumes(&self, id: &str) -> Result<Vec<VolumeRecord>, CloudError> {
        let server = self.fetch_server(id).await?;
        Ok(server
            .volumes
            .into_values()
            .filter(|v| v.volume_type == SBS_VOLUME_TYPE)
            .map(|v| VolumeRecord {
                id: v.id,
                volume_type: v.volume_type,
            })
            .collect())
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<(), CloudError> {
        info!(volume_id = %volume_id, "Deleting Scaleway volume");
        match self
            .request(
                reqwest::Method::DELETE,
                &self.block_url,
                &format!("volumes/{volume_id}"),
                None,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
