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

//! Job admission: validate, check quota, persist, dispatch.
//!
//! Everything here is synchronous with respect to the caller. A request that
//! fails validation or does not fit the global quota never creates a job row.

use crate::dal::DAL;
use crate::dispatcher::Dispatcher;
use crate::error::AdmissionError;
use crate::limits::{parse_cpu_cores, parse_memory_mb, ResourceUsage};
use crate::models::job::{
    CreateInstanceSpec, Job, JobPayload, NewJob, PortMapping, StateAction,
};
use crate::quota::QuotaGovernor;
use tracing::{info, warn};

const MAX_NAME_LENGTH: usize = 63;

/// Checks an instance or snapshot name: 1-63 characters of ASCII letters,
/// digits and `-`, starting with a letter and not ending with `-`.
pub fn validate_name(kind: &str, name: &str) -> Result<(), AdmissionError> {
    let invalid = |reason: &str| {
        Err(AdmissionError::Validation(format!(
            "{} name '{}' {}",
            kind, name, reason
        )))
    };

    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return invalid(&format!("must be 1-{} characters", MAX_NAME_LENGTH));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return invalid("must start with a letter");
    }
    if name.ends_with('-') {
        return invalid("must not end with '-'");
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return invalid("may only contain letters, digits and '-'");
    }
    Ok(())
}

/// A lifecycle request before it becomes a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub target: String,
    pub payload: JobPayload,
    pub requested_by: Option<String>,
}

impl JobRequest {
    pub fn new(target: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            target: target.into(),
            payload,
            requested_by: None,
        }
    }

    pub fn create_instance(spec: CreateInstanceSpec) -> Self {
        Self::new(spec.name.clone(), JobPayload::CreateInstance(spec))
    }

    pub fn delete_instance(name: impl Into<String>) -> Self {
        Self::new(name, JobPayload::DeleteInstance)
    }

    pub fn change_state(name: impl Into<String>, action: StateAction) -> Self {
        Self::new(name, JobPayload::StateChange { action })
    }

    pub fn update_limits(
        name: impl Into<String>,
        cpu: Option<String>,
        memory: Option<String>,
    ) -> Self {
        Self::new(name, JobPayload::UpdateLimits { cpu, memory })
    }

    pub fn create_snapshot(name: impl Into<String>, snapshot_name: impl Into<String>) -> Self {
        Self::new(
            name,
            JobPayload::CreateSnapshot {
                snapshot_name: snapshot_name.into(),
            },
        )
    }

    pub fn restore_snapshot(name: impl Into<String>, snapshot_name: impl Into<String>) -> Self {
        Self::new(
            name,
            JobPayload::RestoreSnapshot {
                snapshot_name: snapshot_name.into(),
            },
        )
    }

    pub fn delete_snapshot(name: impl Into<String>, snapshot_name: impl Into<String>) -> Self {
        Self::new(
            name,
            JobPayload::DeleteSnapshot {
                snapshot_name: snapshot_name.into(),
            },
        )
    }

    pub fn add_port(name: impl Into<String>, mapping: PortMapping) -> Self {
        Self::new(name, JobPayload::AddPort(mapping))
    }

    pub fn remove_port(name: impl Into<String>, host_port: u16) -> Self {
        Self::new(name, JobPayload::RemovePort { host_port })
    }

    pub fn backup(name: impl Into<String>) -> Self {
        Self::new(name, JobPayload::Backup)
    }

    pub fn with_requested_by(mut self, requested_by: impl Into<String>) -> Self {
        self.requested_by = Some(requested_by.into());
        self
    }

    /// Shape checks that need no I/O.
    pub fn validate(&self) -> Result<(), AdmissionError> {
        validate_name("Instance", &self.target)?;

        match &self.payload {
            JobPayload::CreateInstance(spec) => {
                if spec.name != self.target {
                    return Err(AdmissionError::Validation(format!(
                        "create target '{}' does not match instance name '{}'",
                        self.target, spec.name
                    )));
                }
                if spec.image.trim().is_empty() {
                    return Err(AdmissionError::Validation("image is required".into()));
                }
            }
            JobPayload::UpdateLimits { cpu, memory } => {
                if cpu.is_none() && memory.is_none() {
                    return Err(AdmissionError::Validation(
                        "at least one of cpu or memory is required".into(),
                    ));
                }
                if let Some(cpu) = cpu {
                    parse_cpu_cores(cpu).ok_or_else(|| {
                        AdmissionError::Validation(format!("invalid cpu limit '{}'", cpu))
                    })?;
                }
                if let Some(memory) = memory {
                    parse_memory_mb(memory).ok_or_else(|| {
                        AdmissionError::Validation(format!("invalid memory limit '{}'", memory))
                    })?;
                }
            }
            JobPayload::CreateSnapshot { snapshot_name }
            | JobPayload::RestoreSnapshot { snapshot_name }
            | JobPayload::DeleteSnapshot { snapshot_name } => {
                validate_name("Snapshot", snapshot_name)?;
            }
            JobPayload::AddPort(mapping) => {
                if mapping.host_port == 0 || mapping.container_port == 0 {
                    return Err(AdmissionError::Validation("ports must be non-zero".into()));
                }
            }
            JobPayload::RemovePort { host_port } => {
                if *host_port == 0 {
                    return Err(AdmissionError::Validation("port must be non-zero".into()));
                }
            }
            JobPayload::DeleteInstance | JobPayload::StateChange { .. } | JobPayload::Backup => {}
        }
        Ok(())
    }

    /// Capacity this request asks for, if it consumes any.
    ///
    /// For limit updates the new values are counted in full, without
    /// subtracting what the instance already holds.
    pub fn requested_capacity(&self) -> Option<ResourceUsage> {
        match &self.payload {
            JobPayload::CreateInstance(spec) => Some(ResourceUsage::from_limits(&spec.limits)),
            JobPayload::UpdateLimits { cpu, memory } => Some(ResourceUsage {
                cpu: cpu.as_deref().and_then(parse_cpu_cores).unwrap_or(0),
                memory_mb: memory.as_deref().and_then(parse_memory_mb).unwrap_or(0),
            }),
            _ => None,
        }
    }
}

/// Front door for lifecycle requests.
#[derive(Clone)]
pub struct JobAdmission {
    dal: DAL,
    quota: QuotaGovernor,
    dispatcher: Dispatcher,
}

impl JobAdmission {
    pub fn new(dal: DAL, quota: QuotaGovernor, dispatcher: Dispatcher) -> Self {
        Self {
            dal,
            quota,
            dispatcher,
        }
    }

    pub fn quota(&self) -> &QuotaGovernor {
        &self.quota
    }

    /// Validates, quota-checks, persists and dispatches a request.
    ///
    /// The returned job is PENDING. A lost dispatch signal is not an error:
    /// the maintenance sweep re-dispatches pending jobs.
    pub async fn submit(&self, request: JobRequest) -> Result<Job, AdmissionError> {
        request.validate()?;

        if let JobPayload::CreateInstance(spec) = &request.payload {
            if self.dal.instance().exists(&spec.name).await? {
                return Err(AdmissionError::Validation(format!(
                    "instance '{}' already exists",
                    spec.name
                )));
            }
        }

        if let Some(requested) = request.requested_capacity() {
            self.quota.check_global_quota(requested).await?;
        }

        let mut new_job = NewJob::new(request.target, request.payload);
        new_job.requested_by = request.requested_by;
        let job = self.dal.job().create(new_job).await?;

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            target = %job.target,
            "Job accepted"
        );
        if !self.dispatcher.dispatch_job(job.id) {
            warn!(job_id = %job.id, "Dispatch signal dropped; maintenance will re-dispatch");
        }
        Ok(job)
    }
}
