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

//! Job status transitions.
//!
//! Each transition is a single conditional `UPDATE ... WHERE status = ?`, so a
//! terminal job can never be moved and two workers racing for the same job
//! cannot both claim it.

use super::JobDAL;
use crate::database::schema::jobs;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::DatabaseError;
use crate::models::job::JobStatus;
use diesel::prelude::*;

impl<'a> JobDAL<'a> {
    /// Claims a PENDING job for execution.
    ///
    /// Returns `false` when the job is no longer PENDING; the caller lost a
    /// race or received a stale dispatch signal.
    pub async fn mark_in_progress(&self, job_id: UniversalUuid) -> Result<bool, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let id = job_id.to_string();
        let now = UniversalTimestamp::now().to_naive();

        let updated = conn
            .interact(move |conn| {
                diesel::update(
                    jobs::table
                        .filter(jobs::id.eq(id))
                        .filter(jobs::status.eq(JobStatus::Pending.as_str())),
                )
                .set((
                    jobs::status.eq(JobStatus::InProgress.as_str()),
                    jobs::started_at.eq(Some(now)),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        Ok(updated == 1)
    }

    pub async fn mark_completed(&self, job_id: UniversalUuid) -> Result<(), DatabaseError> {
        self.finish(job_id, JobStatus::Completed, None).await
    }

    pub async fn mark_failed(
        &self,
        job_id: UniversalUuid,
        error: &str,
    ) -> Result<(), DatabaseError> {
        self.finish(job_id, JobStatus::Failed, Some(error.to_string()))
            .await
    }

    async fn finish(
        &self,
        job_id: UniversalUuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let id = job_id.to_string();
        let now = UniversalTimestamp::now().to_naive();

        let updated = conn
            .interact(move |conn| {
                diesel::update(
                    jobs::table
                        .filter(jobs::id.eq(id))
                        .filter(jobs::status.eq(JobStatus::InProgress.as_str())),
                )
                .set((
                    jobs::status.eq(status.as_str()),
                    jobs::error.eq(error),
                    jobs::finished_at.eq(Some(now)),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        if updated == 0 {
            return Err(DatabaseError::InvalidTransition {
                job_id: job_id.to_string(),
                expected: JobStatus::InProgress.as_str(),
            });
        }
        Ok(())
    }

    /// Records a failed attempt on an IN_PROGRESS job and returns the new
    /// attempt count.
    pub async fn record_retry(
        &self,
        job_id: UniversalUuid,
        error: &str,
    ) -> Result<i32, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let id = job_id.to_string();
        let error = error.to_string();

        let attempts: Option<i32> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let updated = diesel::update(
                        jobs::table
                            .filter(jobs::id.eq(&id))
                            .filter(jobs::status.eq(JobStatus::InProgress.as_str())),
                    )
                    .set((
                        jobs::attempt_count.eq(jobs::attempt_count + 1),
                        jobs::error.eq(Some(error)),
                    ))
                    .execute(conn)?;

                    if updated == 0 {
                        return Ok(None);
                    }

                    jobs::table
                        .find(&id)
                        .select(jobs::attempt_count)
                        .first(conn)
                        .map(Some)
                })
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        attempts.ok_or_else(|| DatabaseError::InvalidTransition {
            job_id: job_id.to_string(),
            expected: JobStatus::InProgress.as_str(),
        })
    }
}
