/*
 *  Copyright 2025-2026 Corral Maintainers
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! The container runtime seam.
//!
//! Corral never talks to a virtualization API directly. Everything it needs
//! from the host runtime goes through [`RuntimeProvider`], addressed by
//! instance name.

use crate::error::ProviderError;
use crate::models::job::{CreateInstanceSpec, PortMapping, StateAction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Interface whose addresses are recorded on the instance.
pub const PRIMARY_INTERFACE: &str = "eth0";

/// An instance as the runtime lists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInstance {
    pub name: String,
    /// Runtime status in whatever case the runtime reports.
    pub status: String,
    pub instance_type: String,
    /// Runtime config keys such as `limits.cpu` and `volatile.base_image`.
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Inet,
    Inet6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceAddress {
    pub interface: String,
    pub family: AddressFamily,
    pub address: String,
}

/// Live state of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceState {
    pub status: String,
    pub addresses: Vec<InterfaceAddress>,
}

impl InstanceState {
    /// First IPv4 and first IPv6 address of the primary interface.
    pub fn primary_addresses(&self) -> (Option<&str>, Option<&str>) {
        let on_primary = |family: AddressFamily| {
            self.addresses
                .iter()
                .find(|a| a.interface == PRIMARY_INTERFACE && a.family == family)
                .map(|a| a.address.as_str())
        };
        (on_primary(AddressFamily::Inet), on_primary(AddressFamily::Inet6))
    }
}

/// Network settings handed to the runtime when creating an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAssignment {
    pub address: String,
    pub gateway: String,
    pub prefix_len: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Operations the control plane consumes from the host runtime.
///
/// Implementations classify failures: [`ProviderError::Transient`] is retried
/// by workers, [`ProviderError::Fatal`] fails the job at once and
/// [`ProviderError::NotFound`] reports a missing instance.
#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<ProviderInstance>, ProviderError>;

    async fn get_state(&self, name: &str) -> Result<InstanceState, ProviderError>;

    async fn create_instance(
        &self,
        spec: &CreateInstanceSpec,
        network: Option<&NetworkAssignment>,
    ) -> Result<(), ProviderError>;

    async fn delete_instance(&self, name: &str) -> Result<(), ProviderError>;

    async fn change_state(&self, name: &str, action: StateAction) -> Result<(), ProviderError>;

    /// Applies provider config keys (`limits.cpu`, `limits.memory`).
    async fn update_limits(
        &self,
        name: &str,
        limits: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError>;

    async fn list_snapshots(&self, name: &str) -> Result<Vec<Snapshot>, ProviderError>;

    async fn create_snapshot(&self, name: &str, snapshot: &str) -> Result<(), ProviderError>;

    async fn restore_snapshot(&self, name: &str, snapshot: &str) -> Result<(), ProviderError>;

    async fn delete_snapshot(&self, name: &str, snapshot: &str) -> Result<(), ProviderError>;

    async fn list_ports(&self, name: &str) -> Result<Vec<PortMapping>, ProviderError>;

    async fn add_port(&self, name: &str, mapping: &PortMapping) -> Result<(), ProviderError>;

    async fn remove_port(&self, name: &str, host_port: u16) -> Result<(), ProviderError>;

    async fn list_files(&self, name: &str, path: &str) -> Result<Vec<FileEntry>, ProviderError>;

    async fn delete_file(&self, name: &str, path: &str) -> Result<(), ProviderError>;
}
