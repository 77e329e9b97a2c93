use std::sync::Arc;

use fleetops_core::{ClientId, DeviceStatus};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::ClientConfig;
use crate::error::EngineError;
use crate::executor::RemoteTarget;

/// A managed host together with its last observed status.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub name: String,
    #[serde(flatten)]
    pub target: RemoteTarget,
    pub status: DeviceStatus,
    /// Latency of the last probe or command, in milliseconds.
    pub response_time_ms: Option<f64>,
}

/// A customer and the devices operated on its behalf.
#[derive(Debug, Clone, Serialize)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub contact_email: Option<String>,
    pub devices: Vec<Device>,
}

impl Client {
    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }
}

/// A device to probe, flattened out of its client.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub client_id: ClientId,
    pub name: String,
    pub target: RemoteTarget,
}

/// Clients and devices loaded from configuration.
///
/// The set of clients is fixed at startup; only device status annotations
/// change afterwards.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    clients: Arc<RwLock<Vec<Client>>>,
}

impl DeviceRegistry {
    pub fn new(clients: Vec<Client>) -> Self {
        Self {
            clients: Arc::new(RwLock::new(clients)),
        }
    }

    pub fn from_config(clients: &[ClientConfig]) -> Self {
        let clients = clients
            .iter()
            .map(|c| Client {
                id: c.id,
                name: c.name.clone(),
                contact_email: c.contact_email.clone().filter(|e| !e.is_empty()),
                devices: c
                    .devices
                    .iter()
                    .map(|d| Device {
                        name: d.name.clone(),
                        target: RemoteTarget {
                            address: d.address.clone(),
                            port: d.port,
                            username: d.username.clone(),
                            password: d.password.clone(),
                            identity_file: d.identity_file.clone(),
                        },
                        status: DeviceStatus::Unknown,
                        response_time_ms: None,
                    })
                    .collect(),
            })
            .collect();

        Self::new(clients)
    }

    pub async fn clients(&self) -> Vec<Client> {
        self.clients.read().await.clone()
    }

    pub async fn client(&self, id: ClientId) -> Option<Client> {
        self.clients.read().await.iter().find(|c| c.id == id).cloned()
    }

    /// Look up a device by name within one client.
    pub async fn resolve(&self, client_id: ClientId, device: &str) -> Result<Device, EngineError> {
        let clients = self.clients.read().await;
        let client = clients
            .iter()
            .find(|c| c.id == client_id)
            .ok_or(EngineError::ClientNotFound(client_id))?;

        client
            .device(device)
            .cloned()
            .ok_or_else(|| EngineError::DeviceNotFound {
                client_id,
                device: device.to_string(),
            })
    }

    /// Names of every registered device, in registry order.
    pub async fn device_names(&self) -> Vec<String> {
        self.clients
            .read()
            .await
            .iter()
            .flat_map(|c| c.devices.iter().map(|d| d.name.clone()))
            .collect()
    }

    pub async fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.clients
            .read()
            .await
            .iter()
            .flat_map(|c| {
                c.devices.iter().map(|d| ProbeTarget {
                    client_id: c.id,
                    name: d.name.clone(),
                    target: d.target.clone(),
                })
            })
            .collect()
    }

    /// Annotate a device with its latest status. Unknown devices are ignored.
    pub async fn mark_status(
        &self,
        client_id: ClientId,
        device: &str,
        status: DeviceStatus,
        response_time_ms: Option<f64>,
    ) {
        let mut clients = self.clients.write().await;
        let Some(entry) = clients
            .iter_mut()
            .find(|c| c.id == client_id)
            .and_then(|c| c.devices.iter_mut().find(|d| d.name == device))
        else {
            return;
        };

        entry.status = status;
        if response_time_ms.is_some() {
            entry.response_time_ms = response_time_ms;
        }
    }
}
