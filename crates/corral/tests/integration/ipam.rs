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

use crate::fixtures::TestFixture;
use corral::error::IpamError;
use corral::models::network::{LeaseStatus, NewNetwork};
use corral::tier::PoolPolicy;
use corral::IpPoolManager;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;

#[tokio::test]
async fn test_slash_29_yields_five_addresses_in_order() {
    let fixture = TestFixture::new().await;
    let ipam = fixture.ipam_with_pool("10.0.0.0/29", "10.0.0.1").await;

    let stats = ipam.get_networks_with_stats().await.unwrap();
    assert_eq!(stats[0].total_ips, 5);

    for (i, expected) in (2..=6).enumerate() {
        let allocation = ipam.allocate_ip(&format!("vm-{}", i)).await.unwrap();
        assert_eq!(allocation.address, Ipv4Addr::new(10, 0, 0, expected));
        assert_eq!(allocation.prefix_len, 29);
        assert_eq!(allocation.gateway, "10.0.0.1");
    }

    let err = ipam.allocate_ip("vm-6").await.unwrap_err();
    assert!(matches!(err, IpamError::PoolExhausted));
}

#[tokio::test]
async fn test_allocation_is_idempotent_per_instance() {
    let fixture = TestFixture::new().await;
    let ipam = fixture.ipam_with_pool("10.0.0.0/24", "10.0.0.1").await;

    let first = ipam.allocate_ip("web-1").await.unwrap();
    let again = ipam.allocate_ip("web-1").await.unwrap();
    assert_eq!(first, again);
    assert_eq!(
        ipam.get_instance_ip("web-1").await.unwrap().as_deref(),
        Some("10.0.0.2")
    );
}

#[tokio::test]
async fn test_concurrent_allocations_are_distinct() {
    let fixture = TestFixture::new().await;
    let ipam = fixture.ipam_with_pool("10.0.0.0/24", "10.0.0.1").await;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let ipam = ipam.clone();
            tokio::spawn(async move { ipam.allocate_ip(&format!("vm-{}", i)).await })
        })
        .collect();

    let mut seen = HashSet::new();
    for result in futures::future::join_all(handles).await {
        let allocation = result.unwrap().unwrap();
        assert!(seen.insert(allocation.address), "duplicate {}", allocation.address);
    }
    assert_eq!(seen.len(), 20);
}

#[tokio::test]
async fn test_concurrent_allocations_beyond_capacity() {
    let fixture = TestFixture::new().await;
    let ipam = fixture.ipam_with_pool("10.0.0.0/29", "10.0.0.1").await;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ipam = ipam.clone();
            tokio::spawn(async move { ipam.allocate_ip(&format!("vm-{}", i)).await })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    let granted: HashSet<_> = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|a| a.address)
        .collect();
    let exhausted = results
        .iter()
        .filter(|r| matches!(r, Err(IpamError::PoolExhausted)))
        .count();

    assert_eq!(granted.len(), 5);
    assert_eq!(exhausted, 3);
}

#[tokio::test]
async fn test_released_address_is_reused() {
    let fixture = TestFixture::new().await;
    let ipam = fixture.ipam_with_pool("10.0.0.0/29", "10.0.0.1").await;

    let first = ipam.allocate_ip("web-1").await.unwrap();
    let second = ipam.allocate_ip("web-2").await.unwrap();
    assert_ne!(first.address, second.address);

    assert_eq!(ipam.release_ip("web-1").await.unwrap(), 1);
    assert_eq!(ipam.release_ip("web-1").await.unwrap(), 0);
    assert!(ipam.get_instance_ip("web-1").await.unwrap().is_none());

    // The freed slot is the lowest free candidate again.
    let third = ipam.allocate_ip("web-3").await.unwrap();
    assert_eq!(third.address, first.address);
}

#[tokio::test]
async fn test_reserved_rows_are_claimed_before_new_rows() {
    let fixture = TestFixture::new().await;
    let ipam = fixture.ipam_with_pool("10.0.0.0/29", "10.0.0.1").await;
    let network_id = ipam.get_networks_with_stats().await.unwrap()[0].network.id;

    assert_eq!(ipam.reserve_range(network_id, 3).await.unwrap(), 3);
    // Reserving again writes nothing new.
    assert_eq!(ipam.reserve_range(network_id, 3).await.unwrap(), 0);

    let allocation = ipam.allocate_ip("web-1").await.unwrap();
    assert_eq!(allocation.address, Ipv4Addr::new(10, 0, 0, 2));

    let details = ipam.get_network_details(network_id).await.unwrap();
    assert_eq!(details.stats.used_ips, 1);
    assert_eq!(details.leases.len(), 3);
    assert_eq!(details.leases[0].ip, "10.0.0.2");
    assert_eq!(details.leases[0].status(), LeaseStatus::Allocated);
    assert_eq!(details.leases[1].status(), LeaseStatus::Reserved);
    assert_eq!(details.leases[2].ip, "10.0.0.4");
}

#[tokio::test]
async fn test_pools_are_tried_in_creation_order() {
    let fixture = TestFixture::new().await;
    let ipam = IpPoolManager::new(fixture.dal(), PoolPolicy::Any);

    // A /30 has a single usable address.
    ipam.create_network(NewNetwork::new("small", "10.0.0.0/30", "10.0.0.1"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    ipam.create_network(NewNetwork::new("large", "10.1.0.0/24", "10.1.0.1"))
        .await
        .unwrap();

    let a = ipam.allocate_ip("web-1").await.unwrap();
    let b = ipam.allocate_ip("web-2").await.unwrap();
    assert_eq!(a.address, Ipv4Addr::new(10, 0, 0, 2));
    assert_eq!(b.address, Ipv4Addr::new(10, 1, 0, 2));
}

#[tokio::test]
async fn test_private_only_policy_skips_public_pools() {
    let fixture = TestFixture::new().await;
    let ipam = IpPoolManager::new(fixture.dal(), PoolPolicy::PrivateOnly);
    ipam.create_network(NewNetwork::new("edge", "203.0.113.0/29", "203.0.113.1").public())
        .await
        .unwrap();

    let err = ipam.allocate_ip("web-1").await.unwrap_err();
    assert!(matches!(err, IpamError::PoolExhausted));

    let any = IpPoolManager::new(fixture.dal(), PoolPolicy::Any);
    let allocation = any.allocate_ip("web-1").await.unwrap();
    assert_eq!(allocation.address, Ipv4Addr::new(203, 0, 113, 2));
}

#[tokio::test]
async fn test_allocate_in_specific_network() {
    let fixture = TestFixture::new().await;
    let ipam = IpPoolManager::new(fixture.dal(), PoolPolicy::Any);
    ipam.create_network(NewNetwork::new("a", "10.0.0.0/24", "10.0.0.1"))
        .await
        .unwrap();
    let b = ipam
        .create_network(NewNetwork::new("b", "10.9.0.0/24", "10.9.0.1"))
        .await
        .unwrap();

    let allocation = ipam.allocate_in_network(b.id, "web-1").await.unwrap();
    assert_eq!(allocation.network_id, b.id);
    assert_eq!(allocation.address, Ipv4Addr::new(10, 9, 0, 2));

    let err = ipam
        .allocate_in_network(corral::UniversalUuid::new_v4(), "web-2")
        .await
        .unwrap_err();
    assert!(matches!(err, IpamError::NetworkNotFound(_)));
}

#[tokio::test]
async fn test_create_network_validates_and_normalizes() {
    let fixture = TestFixture::new().await;
    let ipam = IpPoolManager::new(fixture.dal(), PoolPolicy::Any);

    let err = ipam
        .create_network(NewNetwork::new("bad", "10.0.0.0/33", "10.0.0.1"))
        .await
        .unwrap_err();
    assert!(matches!(err, IpamError::InvalidCidr { .. }));

    let err = ipam
        .create_network(NewNetwork::new("bad-gw", "10.0.0.0/24", "gateway"))
        .await
        .unwrap_err();
    assert!(matches!(err, IpamError::InvalidAddress(_)));

    let network = ipam
        .create_network(NewNetwork::new("ok", "10.0.0.77/24", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(network.cidr, "10.0.0.0/24");
}

#[tokio::test]
async fn test_delete_network_refuses_while_in_use() {
    let fixture = TestFixture::new().await;
    let ipam = fixture.ipam_with_pool("10.0.0.0/29", "10.0.0.1").await;
    let network_id = ipam.get_networks_with_stats().await.unwrap()[0].network.id;
    ipam.reserve_range(network_id, 2).await.unwrap();
    ipam.allocate_ip("web-1").await.unwrap();

    let err = ipam.delete_network(network_id).await.unwrap_err();
    assert!(matches!(err, IpamError::NetworkInUse(1)));

    ipam.release_ip("web-1").await.unwrap();
    ipam.delete_network(network_id).await.unwrap();
    assert!(ipam.get_networks_with_stats().await.unwrap().is_empty());

    let err = ipam.delete_network(network_id).await.unwrap_err();
    assert!(matches!(err, IpamError::NetworkNotFound(_)));
}

#[tokio::test]
async fn test_usage_stats() {
    let fixture = TestFixture::new().await;
    let ipam = fixture.ipam_with_pool("10.0.0.0/29", "10.0.0.1").await;
    ipam.allocate_ip("web-1").await.unwrap();
    ipam.allocate_ip("web-2").await.unwrap();

    let stats = &ipam.get_networks_with_stats().await.unwrap()[0];
    assert_eq!(stats.total_ips, 5);
    assert_eq!(stats.used_ips, 2);
    assert!((stats.usage_percent - 40.0).abs() < 1e-9);
}
