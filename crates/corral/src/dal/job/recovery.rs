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

//! Retention cleanup and stuck-job recovery.

use super::{JobDAL, TERMINAL_STATUSES};
use crate::database::schema::jobs;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::DatabaseError;
use crate::models::job::JobStatus;
use diesel::prelude::*;
use std::time::Duration;

impl<'a> JobDAL<'a> {
    /// Deletes COMPLETED and FAILED jobs that finished more than `age` ago.
    pub async fn delete_old_jobs(&self, age: Duration) -> Result<usize, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let cutoff = UniversalTimestamp::ago(age).to_naive();

        let deleted = conn
            .interact(move |conn| {
                diesel::delete(
                    jobs::table
                        .filter(jobs::status.eq_any(TERMINAL_STATUSES))
                        .filter(jobs::finished_at.lt(cutoff)),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        Ok(deleted)
    }

    /// Counts the jobs `delete_old_jobs` would remove.
    pub async fn count_old_jobs(&self, age: Duration) -> Result<i64, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let cutoff = UniversalTimestamp::ago(age).to_naive();

        let count = conn
            .interact(move |conn| {
                jobs::table
                    .filter(jobs::status.eq_any(TERMINAL_STATUSES))
                    .filter(jobs::finished_at.lt(cutoff))
                    .count()
                    .get_result::<i64>(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        Ok(count)
    }

    /// Returns IN_PROGRESS jobs started more than `stale_after` ago to PENDING.
    ///
    /// Each recovered job has its attempt count incremented and `started_at`
    /// cleared. Returns the ids of the recovered jobs so they can be
    /// re-dispatched.
    pub async fn recover_stuck_jobs(
        &self,
        stale_after: Duration,
    ) -> Result<Vec<UniversalUuid>, DatabaseError> {
        self.recover_stuck_jobs_excluding(stale_after, Vec::new()).await
    }

    /// Like [`recover_stuck_jobs`](Self::recover_stuck_jobs), but leaves jobs
    /// on `busy_targets` alone. A target is busy while a live worker holds its
    /// lock, so its IN_PROGRESS job is still running rather than stuck.
    pub async fn recover_stuck_jobs_excluding(
        &self,
        stale_after: Duration,
        busy_targets: Vec<String>,
    ) -> Result<Vec<UniversalUuid>, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let cutoff = UniversalTimestamp::ago(stale_after).to_naive();

        let ids: Vec<String> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let stuck: Vec<String> = jobs::table
                        .filter(jobs::status.eq(JobStatus::InProgress.as_str()))
                        .filter(jobs::started_at.lt(cutoff))
                        .select((jobs::id, jobs::target))
                        .load::<(String, String)>(conn)?
                        .into_iter()
                        .filter(|(_, target)| !busy_targets.contains(target))
                        .map(|(id, _)| id)
                        .collect();

                    if stuck.is_empty() {
                        return Ok(stuck);
                    }

                    diesel::update(
                        jobs::table
                            .filter(jobs::id.eq_any(&stuck))
                            .filter(jobs::status.eq(JobStatus::InProgress.as_str())),
                    )
                    .set((
                        jobs::status.eq(JobStatus::Pending.as_str()),
                        jobs::started_at.eq(None::<chrono::NaiveDateTime>),
                        jobs::attempt_count.eq(jobs::attempt_count + 1),
                    ))
                    .execute(conn)?;

                    Ok(stuck)
                })
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        ids.into_iter()
            .map(|id| {
                id.parse().map_err(|e: uuid::Error| DatabaseError::Corrupt {
                    entity: "job",
                    id,
                    message: e.to_string(),
                })
            })
            .collect()
    }
}
