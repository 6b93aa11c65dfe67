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

//! Diesel row models for the SQLite schema.
//!
//! Ids are stored as UUID text and timestamps as naive UTC. Conversions into
//! domain types validate the enum columns and report unknown values as
//! corrupt records rather than panicking.

use crate::database::schema::{instances, ip_leases, jobs, networks};
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::DatabaseError;
use crate::models::instance::{BackupPolicy, Instance, DEFAULT_BACKUP_RETENTION};
use crate::models::job::{Job, JobStatus, JobType};
use crate::models::network::{IpLease, Network};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use std::collections::BTreeMap;

fn parse_uuid(entity: &'static str, raw: &str) -> Result<UniversalUuid, DatabaseError> {
    raw.parse().map_err(|e: uuid::Error| DatabaseError::Corrupt {
        entity,
        id: raw.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobRow {
    pub id: String,
    pub job_type: String,
    pub target: String,
    pub payload: String,
    pub status: String,
    pub error: Option<String>,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
    pub attempt_count: i32,
    pub requested_by: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = parse_uuid("job", &row.id)?;
        let job_type = JobType::from_str(&row.job_type).ok_or_else(|| DatabaseError::Corrupt {
            entity: "job",
            id: row.id.clone(),
            message: format!("unknown job type '{}'", row.job_type),
        })?;
        let status = JobStatus::from_str(&row.status).ok_or_else(|| DatabaseError::Corrupt {
            entity: "job",
            id: row.id.clone(),
            message: format!("unknown status '{}'", row.status),
        })?;

        Ok(Job {
            id,
            job_type,
            target: row.target,
            payload: row.payload,
            status,
            error: row.error,
            created_at: UniversalTimestamp::from_naive(row.created_at),
            started_at: row.started_at.map(UniversalTimestamp::from_naive),
            finished_at: row.finished_at.map(UniversalTimestamp::from_naive),
            attempt_count: row.attempt_count,
            requested_by: row.requested_by,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = instances)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct InstanceRow {
    pub name: String,
    pub image: String,
    pub limits: String,
    pub user_data: Option<String>,
    pub instance_type: String,
    pub backup_schedule: String,
    pub backup_retention: i32,
    pub backup_enabled: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TryFrom<InstanceRow> for Instance {
    type Error = DatabaseError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        let limits: BTreeMap<String, String> =
            serde_json::from_str(&row.limits).map_err(|e| DatabaseError::Corrupt {
                entity: "instance",
                id: row.name.clone(),
                message: format!("limits are not a string map: {}", e),
            })?;
        let retention = if row.backup_retention == 0 {
            DEFAULT_BACKUP_RETENTION
        } else {
            row.backup_retention
        };

        Ok(Instance {
            name: row.name,
            image: row.image,
            limits,
            user_data: row.user_data,
            instance_type: row.instance_type,
            backup: BackupPolicy {
                schedule: row.backup_schedule,
                retention,
                enabled: row.backup_enabled,
            },
            created_at: UniversalTimestamp::from_naive(row.created_at),
            updated_at: UniversalTimestamp::from_naive(row.updated_at),
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = networks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NetworkRow {
    pub id: String,
    pub name: String,
    pub cidr: String,
    pub gateway: String,
    pub dns1: Option<String>,
    pub vlan_id: Option<i32>,
    pub is_public: bool,
    pub created_at: NaiveDateTime,
}

impl TryFrom<NetworkRow> for Network {
    type Error = DatabaseError;

    fn try_from(row: NetworkRow) -> Result<Self, Self::Error> {
        Ok(Network {
            id: parse_uuid("network", &row.id)?,
            name: row.name,
            cidr: row.cidr,
            gateway: row.gateway,
            dns1: row.dns1,
            vlan_id: row.vlan_id,
            is_public: row.is_public,
            created_at: UniversalTimestamp::from_naive(row.created_at),
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = ip_leases)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct IpLeaseRow {
    pub ip: String,
    pub instance_name: Option<String>,
    pub allocated_at: Option<NaiveDateTime>,
    pub network_id: String,
}

impl TryFrom<IpLeaseRow> for IpLease {
    type Error = DatabaseError;

    fn try_from(row: IpLeaseRow) -> Result<Self, Self::Error> {
        Ok(IpLease {
            network_id: parse_uuid("ip lease", &row.network_id)?,
            ip: row.ip,
            instance_name: row.instance_name,
            allocated_at: row.allocated_at.map(UniversalTimestamp::from_naive),
        })
    }
}
