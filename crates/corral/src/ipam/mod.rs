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

//! IP address management.
//!
//! Pools are IPv4 CIDR blocks. A pool may be sparse (lease rows appear on
//! first claim) or pre-populated with unowned "reserved" rows; both are
//! served by the same scan-and-claim loop:
//!
//! 1. snapshot the owned addresses of the pool,
//! 2. walk `[network + 2, broadcast)` in ascending order skipping owned ones,
//! 3. claim the first free candidate in an immediate transaction,
//! 4. on a lost race discard that candidate and keep walking.
//!
//! The store transaction is the only coordination between concurrent
//! allocators.

pub mod cidr;

pub use cidr::Ipv4Cidr;

use crate::dal::{NetworkDeletion, DAL};
use crate::database::universal_types::UniversalUuid;
use crate::error::IpamError;
use crate::models::network::{
    Allocation, IpLease, Network, NetworkDetails, NetworkStats, NewNetwork,
};
use crate::tier::PoolPolicy;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

fn parse_cidr(network: &Network) -> Result<Ipv4Cidr, IpamError> {
    network
        .cidr
        .parse()
        .map_err(|reason| IpamError::InvalidCidr {
            cidr: network.cidr.clone(),
            reason,
        })
}

fn build_stats(network: Network, used_ips: u64) -> NetworkStats {
    let total_ips = network
        .cidr
        .parse::<Ipv4Cidr>()
        .map(|cidr| cidr.usable_count())
        .unwrap_or(0);
    let usage_percent = if total_ips == 0 {
        0.0
    } else {
        used_ips as f64 / total_ips as f64 * 100.0
    };
    NetworkStats {
        network,
        total_ips,
        used_ips,
        usage_percent,
    }
}

/// Allocates and releases instance addresses across all configured pools.
#[derive(Clone, Debug)]
pub struct IpPoolManager {
    dal: DAL,
    pool_policy: PoolPolicy,
}

impl IpPoolManager {
    pub fn new(dal: DAL, pool_policy: PoolPolicy) -> Self {
        Self { dal, pool_policy }
    }

    /// Returns an address for `instance_name`, reusing its existing lease if
    /// it already owns one.
    ///
    /// Candidate pools are tried in creation order, restricted by the tier's
    /// pool policy. Fails with [`IpamError::PoolExhausted`] when no pool has a
    /// free address.
    pub async fn allocate_ip(&self, instance_name: &str) -> Result<Allocation, IpamError> {
        if let Some(existing) = self.existing_allocation(instance_name).await? {
            debug!(
                instance = instance_name,
                ip = %existing.address,
                "Instance already owns an address"
            );
            return Ok(existing);
        }

        let candidates = self
            .dal
            .network()
            .list_filtered(self.pool_policy.public_filter())
            .await?;

        for network in &candidates {
            match self.claim_in(network, instance_name).await {
                Ok(Some(allocation)) => return Ok(allocation),
                Ok(None) => debug!(network = %network.name, "Pool has no free address"),
                Err(IpamError::InvalidCidr { cidr, reason }) => {
                    warn!(network = %network.name, %cidr, %reason, "Skipping pool with invalid CIDR")
                }
                Err(e) => return Err(e),
            }
        }

        warn!(instance = instance_name, pools = candidates.len(), "IP pools exhausted");
        Err(IpamError::PoolExhausted)
    }

    /// Like [`allocate_ip`](Self::allocate_ip) but draws only from one pool.
    pub async fn allocate_in_network(
        &self,
        network_id: UniversalUuid,
        instance_name: &str,
    ) -> Result<Allocation, IpamError> {
        if let Some(existing) = self.existing_allocation(instance_name).await? {
            return Ok(existing);
        }

        let network = self.require_network(network_id).await?;
        self.claim_in(&network, instance_name)
            .await?
            .ok_or(IpamError::PoolExhausted)
    }

    async fn existing_allocation(
        &self,
        instance_name: &str,
    ) -> Result<Option<Allocation>, IpamError> {
        let Some(lease) = self.dal.network().lease_for_instance(instance_name).await? else {
            return Ok(None);
        };
        let network = self.require_network(lease.network_id).await?;
        let cidr = parse_cidr(&network)?;
        let address = lease
            .ip
            .parse()
            .map_err(|_| IpamError::InvalidAddress(lease.ip.clone()))?;

        Ok(Some(Allocation {
            address,
            network_id: network.id,
            gateway: network.gateway,
            prefix_len: cidr.prefix_len(),
        }))
    }

    async fn require_network(&self, network_id: UniversalUuid) -> Result<Network, IpamError> {
        self.dal
            .network()
            .get(network_id)
            .await?
            .ok_or_else(|| IpamError::NetworkNotFound(network_id.to_string()))
    }

    async fn claim_in(
        &self,
        network: &Network,
        instance_name: &str,
    ) -> Result<Option<Allocation>, IpamError> {
        let cidr = parse_cidr(network)?;
        let gateway: Option<Ipv4Addr> = network.gateway.parse().ok();
        let owned = self.dal.network().owned_addresses(network.id).await?;

        for address in cidr.usable_addresses() {
            if Some(address) == gateway {
                continue;
            }
            let ip = address.to_string();
            if owned.contains(&ip) {
                continue;
            }

            if self
                .dal
                .network()
                .claim_address(network.id, &ip, instance_name)
                .await?
            {
                info!(
                    instance = instance_name,
                    ip = %ip,
                    network = %network.name,
                    "Allocated IP address"
                );
                return Ok(Some(Allocation {
                    address,
                    network_id: network.id,
                    gateway: network.gateway.clone(),
                    prefix_len: cidr.prefix_len(),
                }));
            }
            debug!(ip = %ip, "Candidate address taken concurrently");
        }

        Ok(None)
    }

    /// Clears the instance's ownership of its lease. Returns how many leases
    /// were released.
    pub async fn release_ip(&self, instance_name: &str) -> Result<usize, IpamError> {
        let released = self.dal.network().release(instance_name).await?;
        if released > 0 {
            info!(instance = instance_name, released, "Released IP address");
        }
        Ok(released)
    }

    pub async fn get_instance_ip(&self, instance_name: &str) -> Result<Option<String>, IpamError> {
        Ok(self
            .dal
            .network()
            .lease_for_instance(instance_name)
            .await?
            .map(|lease| lease.ip))
    }

    /// Registers a new pool. The CIDR is stored in normalized form.
    pub async fn create_network(&self, mut new_network: NewNetwork) -> Result<Network, IpamError> {
        let cidr: Ipv4Cidr = new_network
            .cidr
            .parse()
            .map_err(|reason| IpamError::InvalidCidr {
                cidr: new_network.cidr.clone(),
                reason,
            })?;
        let gateway: Ipv4Addr = new_network
            .gateway
            .parse()
            .map_err(|_| IpamError::InvalidAddress(new_network.gateway.clone()))?;
        if !cidr.contains(gateway) {
            warn!(cidr = %cidr, gateway = %gateway, "Gateway lies outside the pool");
        }

        new_network.cidr = cidr.to_string();
        let network = self.dal.network().create(new_network).await?;
        info!(network = %network.name, cidr = %network.cidr, "Created network pool");
        Ok(network)
    }

    /// Pre-populates up to `count` unowned lease rows at the start of a
    /// pool's usable range. Returns how many new rows were written.
    pub async fn reserve_range(
        &self,
        network_id: UniversalUuid,
        count: usize,
    ) -> Result<usize, IpamError> {
        let network = self.require_network(network_id).await?;
        let cidr = parse_cidr(&network)?;
        let gateway: Option<Ipv4Addr> = network.gateway.parse().ok();

        let ips: Vec<String> = cidr
            .usable_addresses()
            .filter(|addr| Some(*addr) != gateway)
            .take(count)
            .map(|addr| addr.to_string())
            .collect();

        Ok(self.dal.network().reserve_addresses(network_id, ips).await?)
    }

    pub async fn get_networks_with_stats(&self) -> Result<Vec<NetworkStats>, IpamError> {
        let networks = self.dal.network().list().await?;
        let mut stats = Vec::with_capacity(networks.len());
        for network in networks {
            let used = self.dal.network().count_owned(network.id).await?;
            stats.push(build_stats(network, used.max(0) as u64));
        }
        Ok(stats)
    }

    /// A pool with its stats and every lease row, ordered by address.
    pub async fn get_network_details(
        &self,
        network_id: UniversalUuid,
    ) -> Result<NetworkDetails, IpamError> {
        let network = self.require_network(network_id).await?;
        let mut leases: Vec<IpLease> = self.dal.network().leases(network_id).await?;
        leases.sort_by_key(|lease| lease.ip.parse::<Ipv4Addr>().map(u32::from).unwrap_or(u32::MAX));

        let used = leases
            .iter()
            .filter(|lease| lease.instance_name.is_some())
            .count() as u64;

        Ok(NetworkDetails {
            stats: build_stats(network, used),
            leases,
        })
    }

    /// Deletes a pool and its reserved rows. Refuses while any address is owned.
    pub async fn delete_network(&self, network_id: UniversalUuid) -> Result<(), IpamError> {
        match self.dal.network().delete(network_id).await? {
            NetworkDeletion::Deleted => {
                info!(network_id = %network_id, "Deleted network pool");
                Ok(())
            }
            NetworkDeletion::NotFound => Err(IpamError::NetworkNotFound(network_id.to_string())),
            NetworkDeletion::InUse(count) => Err(IpamError::NetworkInUse(count)),
        }
    }
}
