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

use super::{parse_id, Context};
use anyhow::{Context as _, Result};
use corral::models::network::NewNetwork;
use tracing::info;

pub async fn list(ctx: &Context) -> Result<()> {
    let pools = ctx
        .ipam()
        .get_networks_with_stats()
        .await
        .context("Failed to list networks")?;

    if pools.is_empty() {
        println!("No networks");
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:<18}  {:<15}  {:<6}  USAGE",
        "ID", "NAME", "CIDR", "GATEWAY", "PUBLIC"
    );
    for stats in pools {
        let network = &stats.network;
        println!(
            "{:<36}  {:<16}  {:<18}  {:<15}  {:<6}  {}/{} ({:.1}%)",
            network.id,
            network.name,
            network.cidr,
            network.gateway,
            network.is_public,
            stats.used_ips,
            stats.total_ips,
            stats.usage_percent
        );
    }
    Ok(())
}

pub async fn show(ctx: &Context, id: &str) -> Result<()> {
    let network_id = parse_id(id)?;
    let details = ctx
        .ipam()
        .get_network_details(network_id)
        .await
        .context("Failed to load network")?;
    let network = &details.stats.network;

    println!("id:      {}", network.id);
    println!("name:    {}", network.name);
    println!("cidr:    {}", network.cidr);
    println!("gateway: {}", network.gateway);
    println!("dns:     {}", network.dns1.as_deref().unwrap_or("-"));
    if let Some(vlan) = network.vlan_id {
        println!("vlan:    {}", vlan);
    }
    println!(
        "usage:   {}/{} ({:.1}%)",
        details.stats.used_ips, details.stats.total_ips, details.stats.usage_percent
    );

    if !details.leases.is_empty() {
        println!();
        println!("{:<15}  {:<9}  INSTANCE", "IP", "STATUS");
        for lease in &details.leases {
            println!(
                "{:<15}  {:<9}  {}",
                lease.ip,
                lease.status().to_string(),
                lease.instance_name.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

pub async fn create(ctx: &Context, network: NewNetwork) -> Result<()> {
    let network = ctx
        .ipam()
        .create_network(network)
        .await
        .context("Failed to create network")?;
    info!("Created network {} ({}) with id {}", network.name, network.cidr, network.id);
    Ok(())
}

pub async fn reserve(ctx: &Context, id: &str, count: usize) -> Result<()> {
    let network_id = parse_id(id)?;
    let reserved = ctx
        .ipam()
        .reserve_range(network_id, count)
        .await
        .context("Failed to reserve addresses")?;
    info!("Reserved {} new address(es) in network {}", reserved, network_id);
    Ok(())
}

pub async fn delete(ctx: &Context, id: &str) -> Result<()> {
    let network_id = parse_id(id)?;
    ctx.ipam()
        .delete_network(network_id)
        .await
        .context("Failed to delete network")?;
    info!("Deleted network {}", network_id);
    Ok(())
}
