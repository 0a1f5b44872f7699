//! Scriptable in-memory provider for tests and development.
//!
//! Behaves like a vendor with configurable warts: address assignment
//! can be delayed past any polling bound, create/destroy can be made
//! to fail with a chosen error class, and every call is counted so
//! tests can assert on invariants like "create called exactly once".

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::error::CloudError;
use crate::provider::{
    PowerState, Provider, ProviderKind, ProviderSpec, ServerRecord, VolumeRecord,
};

/// Error class a scripted failure should surface as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Auth,
    Transient,
}

impl FailureClass {
    fn to_error(self, what: &str) -> CloudError {
        match self {
            Self::Auth => CloudError::Auth(format!("mock auth failure: {what}")),
            Self::Transient => CloudError::Transient(format!("mock transient failure: {what}")),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    servers: Vec<ServerRecord>,
    volumes: Vec<VolumeRecord>,
    deleted_volumes: Vec<String>,
    power_events: Vec<(String, PowerState)>,
    destroyed: Vec<String>,
}

/// In-memory mock provider.
pub struct MockProvider {
    state: Mutex<MockState>,
    create_calls: AtomicUsize,
    list_calls: AtomicUsize,
    id_counter: AtomicUsize,

    address: Ipv4Addr,
    /// Number of list/get calls before a created server gets its
    /// address. `usize::MAX` means the address never appears.
    address_after_calls: usize,

    fail_create: Option<FailureClass>,
    fail_list: Option<FailureClass>,
    fail_destroy: Option<FailureClass>,
    fail_power_off: bool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            create_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            id_counter: AtomicUsize::new(0),
            address: Ipv4Addr::new(203, 0, 113, 10),
            address_after_calls: 0,
            fail_create: None,
            fail_list: None,
            fail_destroy: None,
            fail_power_off: false,
        }
    }

    /// Address appears only after `calls` list/get calls.
    pub fn with_address_after_calls(mut self, calls: usize) -> Self {
        self.address_after_calls = calls;
        self
    }

    /// Address never appears; address polling must hit its bound.
    pub fn never_assigns_address(mut self) -> Self {
        self.address_after_calls = usize::MAX;
        self
    }

    /// `create` fails with the given class.
    pub fn failing_create(mut self, class: FailureClass) -> Self {
        self.fail_create = Some(class);
        self
    }

    /// `list` fails with the given class.
    pub fn failing_list(mut self, class: FailureClass) -> Self {
        self.fail_list = Some(class);
        self
    }

    /// `destroy` fails with the given class.
    pub fn failing_destroy(mut self, class: FailureClass) -> Self {
        self.fail_destroy = Some(class);
        self
    }

    /// `set_power(Off)` fails with a transient error.
    pub fn failing_power_off(mut self) -> Self {
        self.fail_power_off = true;
        self
    }

    /// Pre-attach external volumes reported for every server.
    pub fn with_volumes(self, ids: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.volumes = ids
                .iter()
                .map(|id| VolumeRecord {
                    id: id.to_string(),
                    volume_type: "sbs_volume".to_string(),
                })
                .collect();
        }
        self
    }

    /// Seed an already-running server, as if created by an earlier run.
    pub fn with_existing_server(self, id: &str, name: &str, address: Ipv4Addr) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.servers.push(ServerRecord {
                id: id.to_string(),
                name: name.to_string(),
                address: Some(address),
                status: "running".to_string(),
                server_type: "mock-1s".to_string(),
            });
        }
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.state.lock().unwrap().destroyed.clone()
    }

    pub fn deleted_volumes(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_volumes.clone()
    }

    pub fn power_events(&self) -> Vec<(String, PowerState)> {
        self.state.lock().unwrap().power_events.clone()
    }

    /// Reveal addresses once enough polls have happened.
    fn settle_addresses(&self) {
        let polls = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if polls < self.address_after_calls {
            return;
        }
        let mut state = self.state.lock().unwrap();
        for server in &mut state.servers {
            if server.address.is_none() {
                debug!(server = %server.name, "[MOCK] Assigning address");
                server.address = Some(self.address);
            }
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Hetzner
    }

    async fn create(&self, spec: &ProviderSpec, name: &str) -> Result<ServerRecord, CloudError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(class) = self.fail_create {
            return Err(class.to_error("create"));
        }

        let id = format!("mock-{}", self.id_counter.fetch_add(1, Ordering::SeqCst));
        let record = ServerRecord {
            id: id.clone(),
            name: name.to_string(),
            // Address pending until enough polls, like a real vendor.
            address: if self.address_after_calls == 0 {
                Some(self.address)
            } else {
                None
            },
            status: "starting".to_string(),
            server_type: spec.server_type.clone(),
        };

        let mut state = self.state.lock().unwrap();
        state.servers.push(record.clone());
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<ServerRecord>, CloudError> {
        if let Some(class) = self.fail_list {
            return Err(class.to_error("list"));
        }
        self.settle_addresses();
        Ok(self.state.lock().unwrap().servers.clone())
    }

    async fn get(&self, id: &str) -> Result<ServerRecord, CloudError> {
        self.settle_addresses();
        let state = self.state.lock().unwrap();
        state
            .servers
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("server {id}")))
    }

    async fn destroy(&self, id: &str) -> Result<(), CloudError> {
        if let Some(class) = self.fail_destroy {
            return Err(class.to_error("destroy"));
        }
        // Destroying an absent server is a no-op success.
        let mut state = self.state.lock().unwrap();
        state.servers.retain(|s| s.id != id);
        state.destroyed.push(id.to_string());
        Ok(())
    }

    async fn snapshot(&self, id: &str) -> Result<Vec<String>, CloudError> {
        let state = self.state.lock().unwrap();
        if !state.servers.iter().any(|s| s.id == id) {
            return Err(CloudError::NotFound(format!("server {id}")));
        }
        Ok(vec![format!("snap-{id}")])
    }

    async fn set_power(&self, id: &str, power: PowerState) -> Result<(), CloudError> {
        if self.fail_power_off && power == PowerState::Off {
            return Err(CloudError::Transient("mock poweroff failure".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.power_events.push((id.to_string(), power));
        if let Some(server) = state.servers.iter_mut().find(|s| s.id == id) {
            server.status = match power {
                PowerState::On => "running".to_string(),
                PowerState::Off => "stopped".to_string(),
            };
        }
        Ok(())
    }

    async fn attached_volumes(&self, _id: &str) -> Result<Vec<VolumeRecord>, CloudError> {
        Ok(self.state.lock().unwrap().volumes.clone())
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        state.volumes.retain(|v| v.id != volume_id);
        state.deleted_volumes.push(volume_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::default_specs;

    fn spec() -> ProviderSpec {
        default_specs().remove(&ProviderKind::Hetzner).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let mock = MockProvider::new();
        let record = mock.create(&spec(), "b1").await.unwrap();
        assert_eq!(record.name, "b1");
        assert!(record.address.is_some());

        let servers = mock.list().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(mock.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_address_appears_after_polls() {
        let mock = MockProvider::new().with_address_after_calls(3);
        let record = mock.create(&spec(), "b1").await.unwrap();
        assert!(record.address.is_none());

        assert!(mock.list().await.unwrap()[0].address.is_none());
        assert!(mock.list().await.unwrap()[0].address.is_none());
        assert!(mock.list().await.unwrap()[0].address.is_some());
    }

    #[tokio::test]
    async fn test_destroy_absent_is_noop() {
        let mock = MockProvider::new();
        mock.destroy("nothing-here").await.unwrap();
        assert_eq!(mock.destroyed(), vec!["nothing-here".to_string()]);
    }

    #[tokio::test]
    async fn test_power_off_marks_stopped() {
        let mock = MockProvider::new();
        let record = mock.create(&spec(), "b1").await.unwrap();
        mock.set_power(&record.id, PowerState::Off).await.unwrap();
        assert_eq!(mock.get(&record.id).await.unwrap().status, "stopped");
    }

    #[tokio::test]
    async fn test_failing_list() {
        let mock = MockProvider::new().failing_list(FailureClass::Transient);
        let err = mock.list().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_failing_create() {
        let mock = MockProvider::new().failing_create(FailureClass::Auth);
        let err = mock.create(&spec(), "b1").await.unwrap_err();
        assert!(matches!(err, CloudError::Auth(_)));
        assert_eq!(mock.create_calls(), 1);
    }
}
