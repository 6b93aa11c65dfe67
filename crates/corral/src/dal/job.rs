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

//! Job store.
//!
//! Creation and reads live here; status transitions are in `job::state` and
//! the retention and stuck-job sweeps in `job::recovery`.

mod recovery;
mod state;

use super::models::JobRow;
use super::DAL;
use crate::database::schema::jobs;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::DatabaseError;
use crate::models::job::{Job, JobStatus, JobType, NewJob};
use diesel::prelude::*;

const TERMINAL_STATUSES: [&str; 2] = ["COMPLETED", "FAILED"];

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, DatabaseError> {
    rows.into_iter().map(Job::try_from).collect()
}

/// Data access for the `jobs` table.
#[derive(Clone)]
pub struct JobDAL<'a> {
    dal: &'a DAL,
}

impl<'a> JobDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Persists a new job as PENDING with zero attempts.
    pub async fn create(&self, new_job: NewJob) -> Result<Job, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;

        let row = JobRow {
            id: UniversalUuid::new_v4().to_string(),
            job_type: new_job.payload.job_type().as_str().to_string(),
            target: new_job.target,
            payload: new_job.payload.to_json()?,
            status: JobStatus::Pending.as_str().to_string(),
            error: None,
            created_at: UniversalTimestamp::now().to_naive(),
            started_at: None,
            finished_at: None,
            attempt_count: 0,
            requested_by: new_job.requested_by,
        };

        let insert = row.clone();
        conn.interact(move |conn| {
            diesel::insert_into(jobs::table)
                .values(&insert)
                .execute(conn)
        })
        .await
        .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        Job::try_from(row)
    }

    pub async fn get(&self, job_id: UniversalUuid) -> Result<Option<Job>, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let id = job_id.to_string();

        let row: Option<JobRow> = conn
            .interact(move |conn| {
                jobs::table
                    .find(id)
                    .select(JobRow::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        row.map(Job::try_from).transpose()
    }

    /// Newest jobs first.
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<Job>, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;

        let rows: Vec<JobRow> = conn
            .interact(move |conn| {
                jobs::table
                    .order(jobs::created_at.desc())
                    .limit(limit)
                    .select(JobRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        into_jobs(rows)
    }

    /// Jobs still waiting for a worker, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<Job>, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;

        let rows: Vec<JobRow> = conn
            .interact(move |conn| {
                jobs::table
                    .filter(jobs::status.eq(JobStatus::Pending.as_str()))
                    .order(jobs::created_at.asc())
                    .select(JobRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        into_jobs(rows)
    }

    pub async fn list_by_target(&self, target: &str) -> Result<Vec<Job>, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let target = target.to_string();

        let rows: Vec<JobRow> = conn
            .interact(move |conn| {
                jobs::table
                    .filter(jobs::target.eq(target))
                    .order(jobs::created_at.desc())
                    .select(JobRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        into_jobs(rows)
    }

    /// Most recent finished backup job for a target, if any.
    pub async fn get_last_backup_job(&self, target: &str) -> Result<Option<Job>, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let target = target.to_string();

        let row: Option<JobRow> = conn
            .interact(move |conn| {
                jobs::table
                    .filter(jobs::target.eq(target))
                    .filter(jobs::job_type.eq(JobType::Backup.as_str()))
                    .filter(jobs::status.eq_any(TERMINAL_STATUSES))
                    .order(jobs::created_at.desc())
                    .select(JobRow::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        row.map(Job::try_from).transpose()
    }
}
