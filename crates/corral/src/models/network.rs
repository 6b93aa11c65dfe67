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

//! Network pool and IP lease domain models.

use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// An IPv4 address pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: UniversalUuid,
    pub name: String,
    pub cidr: String,
    pub gateway: String,
    pub dns1: Option<String>,
    pub vlan_id: Option<i32>,
    pub is_public: bool,
    pub created_at: UniversalTimestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNetwork {
    pub name: String,
    pub cidr: String,
    pub gateway: String,
    pub dns1: Option<String>,
    pub vlan_id: Option<i32>,
    pub is_public: bool,
}

impl NewNetwork {
    pub fn new(
        name: impl Into<String>,
        cidr: impl Into<String>,
        gateway: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cidr: cidr.into(),
            gateway: gateway.into(),
            dns1: None,
            vlan_id: None,
            is_public: false,
        }
    }

    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }
}

/// Whether a lease row is owned or merely pre-populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseStatus {
    Allocated,
    Reserved,
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseStatus::Allocated => write!(f, "allocated"),
            LeaseStatus::Reserved => write!(f, "reserved"),
        }
    }
}

/// One row of the lease table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpLease {
    pub ip: String,
    pub instance_name: Option<String>,
    pub allocated_at: Option<UniversalTimestamp>,
    pub network_id: UniversalUuid,
}

impl IpLease {
    pub fn status(&self) -> LeaseStatus {
        if self.instance_name.is_some() {
            LeaseStatus::Allocated
        } else {
            LeaseStatus::Reserved
        }
    }
}

/// A successful address claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub address: Ipv4Addr,
    pub network_id: UniversalUuid,
    pub gateway: String,
    pub prefix_len: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub network: Network,
    pub total_ips: u64,
    pub used_ips: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDetails {
    pub stats: NetworkStats,
    pub leases: Vec<IpLease>,
}
