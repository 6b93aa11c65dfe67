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

//! Network pools and the IP lease table.
//!
//! Leases are keyed by address alone, so an address is unique across every
//! pool. A lease row either carries an owner or is a pre-populated
//! "reserved" row waiting to be claimed.

use super::models::{IpLeaseRow, NetworkRow};
use super::DAL;
use crate::database::schema::{ip_leases, networks};
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::DatabaseError;
use crate::models::network::{IpLease, Network, NewNetwork};
use diesel::prelude::*;
use std::collections::HashSet;
use tracing::debug;

/// Result of a pool deletion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkDeletion {
    Deleted,
    NotFound,
    /// The pool still has this many owned leases.
    InUse(i64),
}

/// Data access for the `networks` and `ip_leases` tables.
#[derive(Clone)]
pub struct NetworkDAL<'a> {
    dal: &'a DAL,
}

impl<'a> NetworkDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    pub async fn create(&self, new_network: NewNetwork) -> Result<Network, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;

        let row = NetworkRow {
            id: UniversalUuid::new_v4().to_string(),
            name: new_network.name,
            cidr: new_network.cidr,
            gateway: new_network.gateway,
            dns1: new_network.dns1,
            vlan_id: new_network.vlan_id,
            is_public: new_network.is_public,
            created_at: UniversalTimestamp::now().to_naive(),
        };

        let insert = row.clone();
        conn.interact(move |conn| {
            diesel::insert_into(networks::table)
                .values(&insert)
                .execute(conn)
        })
        .await
        .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        Network::try_from(row)
    }

    pub async fn get(&self, network_id: UniversalUuid) -> Result<Option<Network>, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let id = network_id.to_string();

        let row: Option<NetworkRow> = conn
            .interact(move |conn| {
                networks::table
                    .find(id)
                    .select(NetworkRow::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        row.map(Network::try_from).transpose()
    }

    /// All pools in creation order.
    pub async fn list(&self) -> Result<Vec<Network>, DatabaseError> {
        self.list_filtered(None).await
    }

    /// Pools in creation order, optionally restricted to public or private ones.
    pub async fn list_filtered(
        &self,
        is_public: Option<bool>,
    ) -> Result<Vec<Network>, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;

        let rows: Vec<NetworkRow> = conn
            .interact(move |conn| {
                let mut query = networks::table
                    .order(networks::created_at.asc())
                    .select(NetworkRow::as_select())
                    .into_boxed();
                if let Some(public) = is_public {
                    query = query.filter(networks::is_public.eq(public));
                }
                query.load(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        rows.into_iter().map(Network::try_from).collect()
    }

    /// Snapshot of the addresses currently owned in a pool.
    pub async fn owned_addresses(
        &self,
        network_id: UniversalUuid,
    ) -> Result<HashSet<String>, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let id = network_id.to_string();

        let owned: Vec<String> = conn
            .interact(move |conn| {
                ip_leases::table
                    .filter(ip_leases::network_id.eq(id))
                    .filter(ip_leases::instance_name.is_not_null())
                    .select(ip_leases::ip)
                    .load(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        Ok(owned.into_iter().collect())
    }

    pub async fn count_owned(&self, network_id: UniversalUuid) -> Result<i64, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let id = network_id.to_string();

        let count = conn
            .interact(move |conn| {
                ip_leases::table
                    .filter(ip_leases::network_id.eq(id))
                    .filter(ip_leases::instance_name.is_not_null())
                    .count()
                    .get_result::<i64>(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        Ok(count)
    }

    /// Every lease row of a pool, owned or reserved.
    pub async fn leases(&self, network_id: UniversalUuid) -> Result<Vec<IpLease>, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let id = network_id.to_string();

        let rows: Vec<IpLeaseRow> = conn
            .interact(move |conn| {
                ip_leases::table
                    .filter(ip_leases::network_id.eq(id))
                    .select(IpLeaseRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        rows.into_iter().map(IpLease::try_from).collect()
    }

    pub async fn lease_for_instance(
        &self,
        instance_name: &str,
    ) -> Result<Option<IpLease>, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let name = instance_name.to_string();

        let row: Option<IpLeaseRow> = conn
            .interact(move |conn| {
                ip_leases::table
                    .filter(ip_leases::instance_name.eq(name))
                    .order(ip_leases::allocated_at.asc())
                    .select(IpLeaseRow::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        row.map(IpLease::try_from).transpose()
    }

    /// Claims `ip` for `instance_name` in one immediate transaction.
    ///
    /// An existing row is only taken over while it has no owner; a missing row
    /// is inserted already owned. Returns `false` when the address was taken
    /// in the meantime (zero rows affected, unique violation or a failed
    /// commit); the caller moves on to the next candidate.
    pub async fn claim_address(
        &self,
        network_id: UniversalUuid,
        ip: &str,
        instance_name: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let now = UniversalTimestamp::now().to_naive();
        let row = IpLeaseRow {
            ip: ip.to_string(),
            instance_name: Some(instance_name.to_string()),
            allocated_at: Some(now),
            network_id: network_id.to_string(),
        };

        let outcome = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    let exists: bool = diesel::select(diesel::dsl::exists(
                        ip_leases::table.filter(ip_leases::ip.eq(&row.ip)),
                    ))
                    .get_result(conn)?;

                    let affected = if exists {
                        diesel::update(
                            ip_leases::table
                                .filter(ip_leases::ip.eq(&row.ip))
                                .filter(ip_leases::instance_name.is_null()),
                        )
                        .set((
                            ip_leases::instance_name.eq(&row.instance_name),
                            ip_leases::allocated_at.eq(row.allocated_at),
                            ip_leases::network_id.eq(&row.network_id),
                        ))
                        .execute(conn)?
                    } else {
                        diesel::insert_into(ip_leases::table)
                            .values(&row)
                            .execute(conn)?
                    };

                    if affected != 1 {
                        return Err(diesel::result::Error::RollbackTransaction);
                    }
                    Ok(())
                })
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))?;

        match outcome {
            Ok(()) => Ok(true),
            Err(diesel::result::Error::RollbackTransaction) => Ok(false),
            Err(diesel::result::Error::DatabaseError(kind, info)) => {
                debug!(
                    ip,
                    kind = ?kind,
                    message = info.message(),
                    "Address claim lost to a concurrent writer"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Clears ownership of every lease held by `instance_name`. The rows stay.
    pub async fn release(&self, instance_name: &str) -> Result<usize, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let name = instance_name.to_string();

        let released = conn
            .interact(move |conn| {
                diesel::update(ip_leases::table.filter(ip_leases::instance_name.eq(name)))
                    .set((
                        ip_leases::instance_name.eq(None::<String>),
                        ip_leases::allocated_at.eq(None::<chrono::NaiveDateTime>),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        Ok(released)
    }

    /// Inserts unowned lease rows for `ips`, skipping addresses that already
    /// have a row. Returns how many rows were created.
    pub async fn reserve_addresses(
        &self,
        network_id: UniversalUuid,
        ips: Vec<String>,
    ) -> Result<usize, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let id = network_id.to_string();

        let inserted = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let mut inserted = 0;
                    for ip in ips {
                        let row = IpLeaseRow {
                            ip,
                            instance_name: None,
                            allocated_at: None,
                            network_id: id.clone(),
                        };
                        inserted += diesel::insert_or_ignore_into(ip_leases::table)
                            .values(&row)
                            .execute(conn)?;
                    }
                    Ok(inserted)
                })
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        Ok(inserted)
    }

    /// Deletes a pool and its lease rows unless any lease is still owned.
    pub async fn delete(&self, network_id: UniversalUuid) -> Result<NetworkDeletion, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let id = network_id.to_string();

        let outcome = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let owned: i64 = ip_leases::table
                        .filter(ip_leases::network_id.eq(&id))
                        .filter(ip_leases::instance_name.is_not_null())
                        .count()
                        .get_result(conn)?;
                    if owned > 0 {
                        return Ok(NetworkDeletion::InUse(owned));
                    }

                    diesel::delete(ip_leases::table.filter(ip_leases::network_id.eq(&id)))
                        .execute(conn)?;
                    let deleted = diesel::delete(networks::table.find(&id)).execute(conn)?;

                    Ok(if deleted == 0 {
                        NetworkDeletion::NotFound
                    } else {
                        NetworkDeletion::Deleted
                    })
                })
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        Ok(outcome)
    }
}
