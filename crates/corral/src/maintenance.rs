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

//! Periodic housekeeping: retention cleanup, stuck-job recovery and
//! re-dispatch of pending jobs whose signal was lost.

use crate::dal::DAL;
use crate::dispatcher::Dispatcher;
use crate::executor::{ExecutorSettings, JobTimeouts, RetryPolicy, TargetLockManager};
use crate::tier::Tier;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSettings {
    /// Terminal jobs older than this are deleted.
    pub retention: Duration,
    /// IN_PROGRESS jobs started longer ago than this are recovered.
    pub stale_after: Duration,
    pub interval: Duration,
}

/// Slack added on top of the execution budget before a job counts as stuck.
pub const STALE_GRACE: Duration = Duration::from_secs(5 * 60);

impl MaintenanceSettings {
    /// The smallest useful stale threshold for the given executor settings.
    pub fn stale_after_for(executor: &ExecutorSettings) -> Duration {
        executor.execution_budget().saturating_add(STALE_GRACE)
    }
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        let executor = ExecutorSettings {
            retry: RetryPolicy::default(),
            timeouts: JobTimeouts::default(),
            tier: Tier::default().policy(),
        };
        Self {
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            stale_after: Self::stale_after_for(&executor),
            interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub deleted: usize,
    pub recovered: usize,
    pub redispatched: usize,
}

#[derive(Clone)]
pub struct MaintenanceScheduler {
    dal: DAL,
    dispatcher: Dispatcher,
    settings: MaintenanceSettings,
    locks: Option<TargetLockManager>,
}

impl MaintenanceScheduler {
    pub fn new(dal: DAL, dispatcher: Dispatcher, settings: MaintenanceSettings) -> Self {
        Self {
            dal,
            dispatcher,
            settings,
            locks: None,
        }
    }

    /// Shares the executor's lock table. Jobs whose target is locked are
    /// still running and are never recovered.
    pub fn with_locks(mut self, locks: TargetLockManager) -> Self {
        self.locks = Some(locks);
        self
    }

    /// One pass. Each step logs its own failure and the pass carries on.
    pub async fn run_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.dal.job().delete_old_jobs(self.settings.retention).await {
            Ok(deleted) => report.deleted = deleted,
            Err(e) => error!("Job retention cleanup failed: {}", e),
        }

        let busy = self
            .locks
            .as_ref()
            .map(TargetLockManager::held_targets)
            .unwrap_or_default();
        match self
            .dal
            .job()
            .recover_stuck_jobs_excluding(self.settings.stale_after, busy)
            .await
        {
            Ok(recovered) => {
                report.recovered = recovered.len();
                for job_id in &recovered {
                    info!(job_id = %job_id, "Recovered stuck job");
                }
            }
            Err(e) => error!("Stuck job recovery failed: {}", e),
        }

        // Recovered jobs are PENDING now, so this also re-dispatches them.
        match self.dal.job().list_pending().await {
            Ok(pending) => {
                report.redispatched = pending
                    .iter()
                    .filter(|job| self.dispatcher.dispatch_job(job.id))
                    .count();
            }
            Err(e) => error!("Failed to list pending jobs: {}", e),
        }

        if report != MaintenanceReport::default() {
            info!(
                deleted = report.deleted,
                recovered = report.recovered,
                redispatched = report.redispatched,
                "Maintenance pass finished"
            );
        }
        report
    }

    /// Runs a pass immediately, then every `interval` until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.settings.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.recv() => {
                    debug!("Maintenance scheduler shutting down");
                    break;
                }
            }
        }
    }
}
