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

//! Job domain model.
//!
//! A job is the durable record of one lifecycle operation against one target
//! instance. The payload is stored as tagged JSON so the store never needs to
//! know the shape of any particular operation.

use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default instance type for create requests that do not name one.
pub const DEFAULT_INSTANCE_TYPE: &str = "container";

/// Lifecycle status of a job.
///
/// `Pending -> InProgress -> {Completed, Failed}`, plus the single recovery
/// edge `InProgress -> Pending` taken by the stuck-job sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "IN_PROGRESS" => Some(JobStatus::InProgress),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which execution deadline applies to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    /// Image pulls, restores and backups.
    Long,
    /// Everything else.
    Short,
}

/// Kind of operation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    CreateInstance,
    DeleteInstance,
    StateChange,
    UpdateLimits,
    CreateSnapshot,
    RestoreSnapshot,
    DeleteSnapshot,
    AddPort,
    RemovePort,
    Backup,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::CreateInstance => "create_instance",
            JobType::DeleteInstance => "delete_instance",
            JobType::StateChange => "state_change",
            JobType::UpdateLimits => "update_limits",
            JobType::CreateSnapshot => "create_snapshot",
            JobType::RestoreSnapshot => "restore_snapshot",
            JobType::DeleteSnapshot => "delete_snapshot",
            JobType::AddPort => "add_port",
            JobType::RemovePort => "remove_port",
            JobType::Backup => "backup",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "create_instance" => Some(JobType::CreateInstance),
            "delete_instance" => Some(JobType::DeleteInstance),
            "state_change" => Some(JobType::StateChange),
            "update_limits" => Some(JobType::UpdateLimits),
            "create_snapshot" => Some(JobType::CreateSnapshot),
            "restore_snapshot" => Some(JobType::RestoreSnapshot),
            "delete_snapshot" => Some(JobType::DeleteSnapshot),
            "add_port" => Some(JobType::AddPort),
            "remove_port" => Some(JobType::RemovePort),
            "backup" => Some(JobType::Backup),
            _ => None,
        }
    }

    pub fn timeout_class(&self) -> TimeoutClass {
        match self {
            JobType::CreateInstance | JobType::RestoreSnapshot | JobType::Backup => {
                TimeoutClass::Long
            }
            _ => TimeoutClass::Short,
        }
    }

    /// Job kinds that grow the compute footprint and go through the quota check.
    pub fn consumes_capacity(&self) -> bool {
        matches!(self, JobType::CreateInstance | JobType::UpdateLimits)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Power-state transitions accepted by a state-change job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateAction {
    Start,
    Stop,
    Restart,
    Freeze,
    Unfreeze,
}

impl StateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateAction::Start => "start",
            StateAction::Stop => "stop",
            StateAction::Restart => "restart",
            StateAction::Freeze => "freeze",
            StateAction::Unfreeze => "unfreeze",
        }
    }

    /// Status the instance reports once the action has taken effect.
    pub fn resulting_status(&self) -> &'static str {
        match self {
            StateAction::Start | StateAction::Restart | StateAction::Unfreeze => "RUNNING",
            StateAction::Stop => "STOPPED",
            StateAction::Freeze => "FROZEN",
        }
    }
}

impl fmt::Display for StateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    Tcp,
    Udp,
}

impl PortProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortProtocol::Tcp => "tcp",
            PortProtocol::Udp => "udp",
        }
    }
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A host-to-instance port forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: PortProtocol,
}

/// Everything needed to create an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInstanceSpec {
    pub name: String,
    pub image: String,
    /// Provider config keys, e.g. `limits.cpu` and `limits.memory`.
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
}

fn default_instance_type() -> String {
    DEFAULT_INSTANCE_TYPE.to_string()
}

impl CreateInstanceSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            limits: BTreeMap::new(),
            user_data: None,
            instance_type: default_instance_type(),
        }
    }

    pub fn with_limit(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.limits.insert(key.into(), value.into());
        self
    }

    pub fn with_user_data(mut self, user_data: impl Into<String>) -> Self {
        self.user_data = Some(user_data.into());
        self
    }
}

/// Operation-specific job parameters, stored as tagged JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    CreateInstance(CreateInstanceSpec),
    DeleteInstance,
    StateChange {
        action: StateAction,
    },
    UpdateLimits {
        #[serde(default)]
        cpu: Option<String>,
        #[serde(default)]
        memory: Option<String>,
    },
    CreateSnapshot {
        snapshot_name: String,
    },
    RestoreSnapshot {
        snapshot_name: String,
    },
    DeleteSnapshot {
        snapshot_name: String,
    },
    AddPort(PortMapping),
    RemovePort {
        host_port: u16,
    },
    Backup,
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::CreateInstance(_) => JobType::CreateInstance,
            JobPayload::DeleteInstance => JobType::DeleteInstance,
            JobPayload::StateChange { .. } => JobType::StateChange,
            JobPayload::UpdateLimits { .. } => JobType::UpdateLimits,
            JobPayload::CreateSnapshot { .. } => JobType::CreateSnapshot,
            JobPayload::RestoreSnapshot { .. } => JobType::RestoreSnapshot,
            JobPayload::DeleteSnapshot { .. } => JobType::DeleteSnapshot,
            JobPayload::AddPort(_) => JobType::AddPort,
            JobPayload::RemovePort { .. } => JobType::RemovePort,
            JobPayload::Backup => JobType::Backup,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// A persisted job (domain type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: UniversalUuid,
    pub job_type: JobType,
    /// Name of the instance the job operates on; the lock key.
    pub target: String,
    /// Tagged JSON encoding of a [`JobPayload`].
    pub payload: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: UniversalTimestamp,
    pub started_at: Option<UniversalTimestamp>,
    pub finished_at: Option<UniversalTimestamp>,
    pub attempt_count: i32,
    pub requested_by: Option<String>,
}

impl Job {
    pub fn decode_payload(&self) -> Result<JobPayload, serde_json::Error> {
        JobPayload::from_json(&self.payload)
    }
}

/// A job to be persisted by the job store.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub target: String,
    pub payload: JobPayload,
    pub requested_by: Option<String>,
}

impl NewJob {
    pub fn new(target: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            target: target.into(),
            payload,
            requested_by: None,
        }
    }

    pub fn with_requested_by(mut self, requested_by: impl Into<String>) -> Self {
        self.requested_by = Some(requested_by.into());
        self
    }
}
