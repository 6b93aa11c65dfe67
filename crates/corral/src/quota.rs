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

//! Global compute quota.
//!
//! Usage is summed over every instance the runtime reports, not over the job
//! store, so instances created outside the control plane count too.

use crate::error::{AdmissionError, ProviderError};
use crate::limits::ResourceUsage;
use crate::provider::RuntimeProvider;
use std::sync::Arc;
use tracing::{debug, warn};

/// Host-wide ceiling on allocated vCPUs and memory (MiB).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCeiling {
    pub max_cpu: u64,
    pub max_memory_mb: u64,
}

impl Default for QuotaCeiling {
    fn default() -> Self {
        Self {
            max_cpu: 8,
            max_memory_mb: 8192,
        }
    }
}

#[derive(Clone)]
pub struct QuotaGovernor {
    provider: Arc<dyn RuntimeProvider>,
    ceiling: QuotaCeiling,
}

impl QuotaGovernor {
    pub fn new(provider: Arc<dyn RuntimeProvider>, ceiling: QuotaCeiling) -> Self {
        Self { provider, ceiling }
    }

    pub fn ceiling(&self) -> QuotaCeiling {
        self.ceiling
    }

    /// Sum of the limits of every live instance.
    pub async fn current_usage(&self) -> Result<ResourceUsage, ProviderError> {
        let instances = self.provider.list_instances().await?;
        Ok(instances
            .iter()
            .map(|instance| ResourceUsage::from_limits(&instance.config))
            .sum())
    }

    /// Rejects the request when current usage plus the request would exceed
    /// the ceiling. Landing exactly on the ceiling is allowed.
    pub async fn check_global_quota(&self, requested: ResourceUsage) -> Result<(), AdmissionError> {
        let used = self.current_usage().await?;
        let projected = used + requested;

        if projected.cpu > self.ceiling.max_cpu || projected.memory_mb > self.ceiling.max_memory_mb
        {
            warn!(
                requested_cpu = requested.cpu,
                requested_memory_mb = requested.memory_mb,
                used_cpu = used.cpu,
                used_memory_mb = used.memory_mb,
                "Rejecting request over global quota"
            );
            return Err(AdmissionError::QuotaExceeded {
                requested_cpu: requested.cpu,
                requested_memory_mb: requested.memory_mb,
                used_cpu: used.cpu,
                used_memory_mb: used.memory_mb,
                max_cpu: self.ceiling.max_cpu,
                max_memory_mb: self.ceiling.max_memory_mb,
            });
        }

        debug!(
            cpu = projected.cpu,
            memory_mb = projected.memory_mb,
            "Request fits within global quota"
        );
        Ok(())
    }
}
