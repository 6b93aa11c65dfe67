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

//! Error types for each layer of the control plane.
//!
//! Admission errors are returned to the caller synchronously. Execution errors
//! never reach a caller: workers record them on the job row and publish them
//! on the event bus.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    #[error("Database error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Unsupported database URL '{0}': only SQLite paths are supported")]
    UnsupportedBackend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt {entity} record '{id}': {message}")]
    Corrupt {
        entity: &'static str,
        id: String,
        message: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state transition for job {job_id}: job is not {expected}")]
    InvalidTransition {
        job_id: String,
        expected: &'static str,
    },
}

impl DatabaseError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DatabaseError::NotFound { .. } | DatabaseError::Query(diesel::result::Error::NotFound)
        )
    }
}

/// Errors reported by a runtime provider, classified for retry decisions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Errors returned synchronously by job admission.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(
        "Quota exceeded: requested {requested_cpu} vCPU / {requested_memory_mb} MB with \
         {used_cpu} vCPU / {used_memory_mb} MB in use (ceiling {max_cpu} vCPU / {max_memory_mb} MB)"
    )]
    QuotaExceeded {
        requested_cpu: u64,
        requested_memory_mb: u64,
        used_cpu: u64,
        used_memory_mb: u64,
        max_cpu: u64,
        max_memory_mb: u64,
    },

    #[error("Failed to query runtime provider: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl AdmissionError {
    /// Status code an HTTP front end should answer with for this rejection.
    /// Accepted jobs map to 202.
    pub fn http_status(&self) -> u16 {
        match self {
            AdmissionError::Validation(_) => 400,
            AdmissionError::QuotaExceeded { .. } => 409,
            AdmissionError::Provider(_) => 502,
            AdmissionError::Database(_) => 500,
        }
    }
}

/// Errors from IP address management.
#[derive(Debug, Error)]
pub enum IpamError {
    #[error("No IP addresses available in any pool")]
    PoolExhausted,

    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("Invalid CIDR '{cidr}': {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("Invalid IPv4 address '{0}'")]
    InvalidAddress(String),

    #[error("Network still has {0} allocated addresses")]
    NetworkInUse(i64),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<diesel::result::Error> for IpamError {
    fn from(e: diesel::result::Error) -> Self {
        IpamError::Database(DatabaseError::Query(e))
    }
}

/// Errors raised while a worker executes a job.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    #[error("IP allocation failed: {0}")]
    Ipam(#[from] IpamError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Invalid job payload: {0}")]
    Payload(String),

    #[error("Attempt ceiling reached after {0} attempts")]
    AttemptsExhausted(i32),

    #[error("Invalid state transition for job {0}")]
    InvalidTransition(String),

    #[error("Job execution panicked: {0}")]
    Panicked(String),

    #[error("Port limit reached: tier allows {limit} {protocol} forwards")]
    PortLimit { protocol: String, limit: usize },
}

impl ExecutorError {
    /// Transient failures are retried with backoff; everything else fails the job.
    pub fn is_transient(&self) -> bool {
        match self {
            ExecutorError::Provider(e) => e.is_transient(),
            ExecutorError::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Errors that abort a reconciliation sweep.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to list instances from runtime provider: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors starting or stopping the control plane runtime.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Control plane requires a runtime provider")]
    MissingProvider,

    #[error("Control plane is already shut down")]
    ShutDown,
}
