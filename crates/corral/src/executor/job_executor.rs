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

//! Executes a single job end to end.
//!
//! For each dispatched id a worker calls [`JobExecutor::process`], which:
//!
//! 1. reloads the job and skips it unless it is PENDING,
//! 2. takes the target lock or re-dispatches the job after a delay,
//! 3. claims the job (PENDING -> IN_PROGRESS),
//! 4. runs the provider call in its own task under the job type's timeout,
//!    retrying transient failures with backoff,
//! 5. applies store side effects and marks the job COMPLETED or FAILED,
//! 6. publishes the outcome and drops the lock.
//!
//! Running the provider call in a separate task turns a panic into a FAILED
//! job instead of a dead worker, and the lock guard held by `process` is
//! released on every path.

use super::retry::RetryPolicy;
use super::target_lock::TargetLockManager;
use crate::dal::DAL;
use crate::database::universal_types::UniversalUuid;
use crate::dispatcher::Dispatcher;
use crate::error::{DatabaseError, ExecutorError, ProviderError};
use crate::events::{Event, EventBus};
use crate::ipam::IpPoolManager;
use crate::models::instance::{
    BackupPolicy, NewInstance, DEFAULT_BACKUP_RETENTION, KEY_CPU, KEY_IPV4, KEY_MEMORY, KEY_STATUS,
};
use crate::models::job::{Job, JobPayload, JobStatus, JobType, PortMapping, PortProtocol, TimeoutClass};
use crate::models::network::Allocation;
use crate::provider::{NetworkAssignment, RuntimeProvider};
use crate::tier::TierPolicy;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Prefix of snapshots taken by backup jobs; pruning only touches these.
pub const BACKUP_SNAPSHOT_PREFIX: &str = "backup-";

/// Execution deadlines per timeout class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTimeouts {
    pub long: Duration,
    pub short: Duration,
}

impl Default for JobTimeouts {
    fn default() -> Self {
        Self {
            long: Duration::from_secs(600),
            short: Duration::from_secs(120),
        }
    }
}

impl JobTimeouts {
    pub fn for_job(&self, job_type: JobType) -> Duration {
        match job_type.timeout_class() {
            TimeoutClass::Long => self.long,
            TimeoutClass::Short => self.short,
        }
    }
}

/// Tunables for job execution.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub retry: RetryPolicy,
    pub timeouts: JobTimeouts,
    pub tier: TierPolicy,
}

impl ExecutorSettings {
    /// Longest a live worker can keep one job IN_PROGRESS: every attempt
    /// running into the long timeout, plus the capped backoff between them.
    pub fn execution_budget(&self) -> Duration {
        let attempts = self.retry.max_attempts.max(1) as u32;
        self.timeouts
            .long
            .max(self.timeouts.short)
            .saturating_mul(attempts)
            .saturating_add(self.retry.max_delay.saturating_mul(attempts - 1))
    }
}

/// What happened to a dispatched job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Missing, not PENDING, or claimed by someone else.
    Skipped,
    /// Target was busy; the id was re-dispatched.
    Requeued,
    Completed,
    Failed,
}

fn limit_changes(cpu: &Option<String>, memory: &Option<String>) -> BTreeMap<String, String> {
    let mut changes = BTreeMap::new();
    if let Some(cpu) = cpu {
        changes.insert(KEY_CPU.to_string(), cpu.clone());
    }
    if let Some(memory) = memory {
        changes.insert(KEY_MEMORY.to_string(), memory.clone());
    }
    changes
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Clone)]
pub struct JobExecutor {
    dal: DAL,
    provider: Arc<dyn RuntimeProvider>,
    ipam: IpPoolManager,
    locks: TargetLockManager,
    dispatcher: Dispatcher,
    events: Arc<EventBus>,
    settings: ExecutorSettings,
}

impl JobExecutor {
    pub fn new(
        dal: DAL,
        provider: Arc<dyn RuntimeProvider>,
        ipam: IpPoolManager,
        dispatcher: Dispatcher,
        events: Arc<EventBus>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            dal,
            provider,
            ipam,
            locks: TargetLockManager::new(),
            dispatcher,
            events,
            settings,
        }
    }

    pub fn locks(&self) -> &TargetLockManager {
        &self.locks
    }

    /// Handles one dispatch signal.
    pub async fn process(&self, job_id: UniversalUuid) -> Result<ProcessOutcome, ExecutorError> {
        let Some(job) = self.dal.job().get(job_id).await? else {
            debug!(job_id = %job_id, "Job no longer exists, skipping");
            return Ok(ProcessOutcome::Skipped);
        };
        if job.status != JobStatus::Pending {
            debug!(job_id = %job_id, status = %job.status, "Job is not pending, skipping");
            return Ok(ProcessOutcome::Skipped);
        }

        let Some(guard) = self.locks.try_acquire(&job.target) else {
            debug!(job_id = %job_id, target = %job.target, "Target busy, re-dispatching later");
            self.dispatcher.requeue_later(job_id);
            return Ok(ProcessOutcome::Requeued);
        };

        if !self.dal.job().mark_in_progress(job_id).await? {
            debug!(job_id = %job_id, "Job was claimed elsewhere");
            return Ok(ProcessOutcome::Skipped);
        }
        info!(
            job_id = %job_id,
            job_type = %job.job_type,
            target = %job.target,
            attempt_count = job.attempt_count,
            "Job started"
        );
        self.publish_job_update(job_id).await;

        let outcome = self.run(job).await;
        drop(guard);
        Ok(outcome)
    }

    async fn run(&self, job: Job) -> ProcessOutcome {
        if !self.settings.retry.allows_attempt(job.attempt_count) {
            let error = ExecutorError::AttemptsExhausted(job.attempt_count);
            return self.fail(&job, None, error).await;
        }

        let payload = match job.decode_payload() {
            Ok(payload) => payload,
            Err(e) => {
                let error = ExecutorError::Payload(e.to_string());
                return self.fail(&job, None, error).await;
            }
        };

        let executor = self.clone();
        let task_job = job.clone();
        let task_payload = payload.clone();
        let joined =
            tokio::spawn(async move { executor.execute(&task_job, &task_payload).await }).await;

        let result = match joined {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => Err(ExecutorError::Panicked(
                panic_message(join_error.into_panic()),
            )),
            Err(join_error) => Err(ExecutorError::Panicked(join_error.to_string())),
        };

        match result {
            Ok(allocation) => match self.apply_side_effects(&job, &payload, allocation).await {
                Ok(()) => self.complete(&job).await,
                Err(error) => self.fail(&job, None, error).await,
            },
            Err(error) => self.fail(&job, Some(&payload), error).await,
        }
    }

    /// Provider work, including retries. Runs inside its own task.
    async fn execute(
        &self,
        job: &Job,
        payload: &JobPayload,
    ) -> Result<Option<Allocation>, ExecutorError> {
        let allocation = match payload {
            JobPayload::CreateInstance(spec) => Some(self.ipam.allocate_ip(&spec.name).await?),
            _ => None,
        };
        let assignment = allocation.as_ref().map(|a| NetworkAssignment {
            address: a.address.to_string(),
            gateway: a.gateway.clone(),
            prefix_len: a.prefix_len,
        });

        let deadline = self.settings.timeouts.for_job(job.job_type);
        let mut attempts = job.attempt_count;

        loop {
            let result = match tokio::time::timeout(
                deadline,
                self.perform(job, payload, assignment.as_ref()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ExecutorError::Timeout(deadline)),
            };

            match result {
                Ok(()) => return Ok(allocation),
                Err(error)
                    if error.is_transient() && self.settings.retry.allows_attempt(attempts + 1) =>
                {
                    attempts = self.dal.job().record_retry(job.id, &error.to_string()).await?;
                    let delay = self.settings.retry.calculate_delay(attempts);
                    warn!(
                        job_id = %job.id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying: {}",
                        error
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn perform(
        &self,
        job: &Job,
        payload: &JobPayload,
        assignment: Option<&NetworkAssignment>,
    ) -> Result<(), ExecutorError> {
        let name = job.target.as_str();
        match payload {
            JobPayload::CreateInstance(spec) => {
                self.provider.create_instance(spec, assignment).await?
            }
            JobPayload::DeleteInstance => match self.provider.delete_instance(name).await {
                Ok(()) => {}
                Err(ProviderError::NotFound(_)) => {
                    debug!(instance = name, "Instance already absent from runtime")
                }
                Err(e) => return Err(e.into()),
            },
            JobPayload::StateChange { action } => self.provider.change_state(name, *action).await?,
            JobPayload::UpdateLimits { cpu, memory } => {
                self.provider
                    .update_limits(name, &limit_changes(cpu, memory))
                    .await?
            }
            JobPayload::CreateSnapshot { snapshot_name } => {
                self.provider.create_snapshot(name, snapshot_name).await?
            }
            JobPayload::RestoreSnapshot { snapshot_name } => {
                self.provider.restore_snapshot(name, snapshot_name).await?
            }
            JobPayload::DeleteSnapshot { snapshot_name } => {
                self.provider.delete_snapshot(name, snapshot_name).await?
            }
            JobPayload::AddPort(mapping) => {
                self.check_port_limit(name, mapping).await?;
                self.provider.add_port(name, mapping).await?
            }
            JobPayload::RemovePort { host_port } => {
                self.provider.remove_port(name, *host_port).await?
            }
            JobPayload::Backup => self.run_backup(name).await?,
        }
        Ok(())
    }

    async fn check_port_limit(
        &self,
        name: &str,
        mapping: &PortMapping,
    ) -> Result<(), ExecutorError> {
        let limit = match mapping.protocol {
            PortProtocol::Tcp => self.settings.tier.max_tcp_ports,
            PortProtocol::Udp => self.settings.tier.max_udp_ports,
        };
        let Some(limit) = limit else {
            return Ok(());
        };

        let existing = self
            .provider
            .list_ports(name)
            .await?
            .iter()
            .filter(|p| p.protocol == mapping.protocol)
            .count();
        if existing >= limit {
            return Err(ExecutorError::PortLimit {
                protocol: mapping.protocol.to_string(),
                limit,
            });
        }
        Ok(())
    }

    /// Takes a backup snapshot, then prunes old backups beyond the
    /// instance's retention.
    async fn run_backup(&self, name: &str) -> Result<(), ExecutorError> {
        let snapshot = format!(
            "{}{}",
            BACKUP_SNAPSHOT_PREFIX,
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        );
        self.provider.create_snapshot(name, &snapshot).await?;

        let retention = self
            .dal
            .instance()
            .get(name)
            .await?
            .map(|instance| instance.backup.retention)
            .unwrap_or(DEFAULT_BACKUP_RETENTION)
            .max(1) as usize;

        let mut backups: Vec<String> = self
            .provider
            .list_snapshots(name)
            .await?
            .into_iter()
            .map(|s| s.name)
            .filter(|n| n.starts_with(BACKUP_SNAPSHOT_PREFIX))
            .collect();
        backups.sort();

        let excess = backups.len().saturating_sub(retention);
        for old in backups.into_iter().take(excess) {
            if let Err(e) = self.provider.delete_snapshot(name, &old).await {
                warn!(instance = name, snapshot = %old, "Failed to prune backup: {}", e);
            }
        }
        Ok(())
    }

    /// Store updates that follow a successful provider call.
    async fn apply_side_effects(
        &self,
        job: &Job,
        payload: &JobPayload,
        allocation: Option<Allocation>,
    ) -> Result<(), ExecutorError> {
        match payload {
            JobPayload::CreateInstance(spec) => {
                let mut limits = spec.limits.clone();
                if let Some(allocation) = &allocation {
                    limits.insert(KEY_IPV4.to_string(), allocation.address.to_string());
                }
                self.dal
                    .instance()
                    .upsert(NewInstance {
                        name: spec.name.clone(),
                        image: spec.image.clone(),
                        limits,
                        user_data: spec.user_data.clone(),
                        instance_type: spec.instance_type.clone(),
                        backup: BackupPolicy::default(),
                    })
                    .await?;
            }
            JobPayload::DeleteInstance => {
                self.ipam.release_ip(&job.target).await?;
                self.dal.instance().delete(&job.target).await?;
            }
            JobPayload::StateChange { action } => {
                let status = action.resulting_status();
                let changes = BTreeMap::from([(KEY_STATUS.to_string(), status.to_string())]);
                self.merge_tracked(&job.target, changes).await?;
                self.events
                    .publish(Event::state_change(Some(job.id), &job.target, status));
            }
            JobPayload::UpdateLimits { cpu, memory } => {
                self.merge_tracked(&job.target, limit_changes(cpu, memory))
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Merges limits into the instance row if the instance is tracked.
    async fn merge_tracked(
        &self,
        name: &str,
        changes: BTreeMap<String, String>,
    ) -> Result<(), DatabaseError> {
        match self.dal.instance().merge_limits(name, changes).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(instance = name, "Instance not tracked, skipping store update");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn complete(&self, job: &Job) -> ProcessOutcome {
        if let Err(e) = self.dal.job().mark_completed(job.id).await {
            error!(job_id = %job.id, "Failed to mark job completed: {}", e);
            return ProcessOutcome::Failed;
        }
        info!(job_id = %job.id, job_type = %job.job_type, target = %job.target, "Job completed");
        self.publish_job_update(job.id).await;
        ProcessOutcome::Completed
    }

    async fn fail(
        &self,
        job: &Job,
        payload: Option<&JobPayload>,
        error: ExecutorError,
    ) -> ProcessOutcome {
        if let Some(JobPayload::CreateInstance(spec)) = payload {
            self.release_unused_address(&spec.name).await;
        }

        error!(
            job_id = %job.id,
            job_type = %job.job_type,
            target = %job.target,
            "Job failed: {}",
            error
        );
        if let Err(e) = self.dal.job().mark_failed(job.id, &error.to_string()).await {
            error!(job_id = %job.id, "Failed to mark job failed: {}", e);
        }
        self.publish_job_update(job.id).await;
        ProcessOutcome::Failed
    }

    /// Releases the lease of a failed create unless a tracked instance owns it.
    async fn release_unused_address(&self, name: &str) {
        match self.dal.instance().exists(name).await {
            Ok(false) => {
                if let Err(e) = self.ipam.release_ip(name).await {
                    error!(instance = name, "Failed to release address of failed create: {}", e);
                }
            }
            Ok(true) => {}
            Err(e) => error!(instance = name, "Failed to check instance before release: {}", e),
        }
    }

    async fn publish_job_update(&self, job_id: UniversalUuid) {
        match self.dal.job().get(job_id).await {
            Ok(Some(job)) => {
                self.events.publish(Event::job_update(&job));
            }
            Ok(None) => {}
            Err(e) => warn!(job_id = %job_id, "Failed to load job for event: {}", e),
        }
    }
}
