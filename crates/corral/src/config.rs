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

//! Configuration for the control plane runtime.
//!
//! Built in code with [`ControlPlaneConfig::builder`], or loaded from a TOML
//! file with [`ControlPlaneConfig::from_toml_file`]. File values are applied
//! on top of the defaults; every key is optional.
//!
//! ```toml
//! database_url = "/var/lib/corral/corral.db"
//! worker_count = 4
//! tier = "standard"
//!
//! [quota]
//! max_cpu = 16
//! max_memory_mb = 32768
//!
//! [timeouts]
//! long_secs = 900
//! ```

use crate::error::ConfigError;
use crate::executor::{ExecutorSettings, JobTimeouts, RetryPolicy};
use crate::maintenance::MaintenanceSettings;
use crate::quota::QuotaCeiling;
use crate::tier::Tier;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ControlPlaneConfig {
    database_url: String,
    worker_count: usize,
    dispatch_queue_capacity: usize,
    event_bus_capacity: usize,
    requeue_delay: Duration,
    max_attempts: i32,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
    retry_jitter: bool,
    long_job_timeout: Duration,
    short_job_timeout: Duration,
    max_cpu: u64,
    max_memory_mb: u64,
    tier: Tier,
    stale_job_threshold: Duration,
    job_retention: Duration,
    maintenance_interval: Duration,
    enable_startup_sync: bool,
    enable_maintenance: bool,
}

impl ControlPlaneConfig {
    pub fn builder() -> ControlPlaneConfigBuilder {
        ControlPlaneConfigBuilder::default()
    }

    /// Loads a TOML file over the defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(raw)?;
        let config = file.apply(Self::builder()).build();
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("worker_count", self.worker_count),
            ("dispatch_queue_capacity", self.dispatch_queue_capacity),
            ("event_bus_capacity", self.event_bus_capacity),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be at least 1", name)));
            }
        }
        if self.max_attempts < 1 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.maintenance_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "maintenance_interval must be non-zero".into(),
            ));
        }
        if self.long_job_timeout.is_zero() || self.short_job_timeout.is_zero() {
            return Err(ConfigError::Invalid("job timeouts must be non-zero".into()));
        }
        // A shorter threshold would recover jobs a live worker is still running.
        let budget = self.executor_settings().execution_budget();
        if self.stale_job_threshold <= budget {
            return Err(ConfigError::Invalid(format!(
                "stale_job_threshold ({:?}) must exceed the execution budget ({:?})",
                self.stale_job_threshold, budget
            )));
        }
        Ok(())
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn dispatch_queue_capacity(&self) -> usize {
        self.dispatch_queue_capacity
    }

    pub fn event_bus_capacity(&self) -> usize {
        self.event_bus_capacity
    }

    pub fn requeue_delay(&self) -> Duration {
        self.requeue_delay
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn enable_startup_sync(&self) -> bool {
        self.enable_startup_sync
    }

    pub fn enable_maintenance(&self) -> bool {
        self.enable_maintenance
    }

    pub fn quota_ceiling(&self) -> QuotaCeiling {
        QuotaCeiling {
            max_cpu: self.max_cpu,
            max_memory_mb: self.max_memory_mb,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            jitter: self.retry_jitter,
        }
    }

    pub fn job_timeouts(&self) -> JobTimeouts {
        JobTimeouts {
            long: self.long_job_timeout,
            short: self.short_job_timeout,
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            retry: self.retry_policy(),
            timeouts: self.job_timeouts(),
            tier: self.tier.policy(),
        }
    }

    pub fn maintenance_settings(&self) -> MaintenanceSettings {
        MaintenanceSettings {
            retention: self.job_retention,
            stale_after: self.stale_job_threshold,
            interval: self.maintenance_interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlPlaneConfigBuilder {
    config: ControlPlaneConfig,
    stale_job_threshold: Option<Duration>,
}

impl Default for ControlPlaneConfigBuilder {
    fn default() -> Self {
        let maintenance = MaintenanceSettings::default();
        let retry = RetryPolicy::default();
        let timeouts = JobTimeouts::default();
        let ceiling = QuotaCeiling::default();
        Self {
            config: ControlPlaneConfig {
                database_url: "corral.db".to_string(),
                worker_count: 2,
                dispatch_queue_capacity: 100,
                event_bus_capacity: 1000,
                requeue_delay: Duration::from_secs(2),
                max_attempts: retry.max_attempts,
                retry_base_delay: retry.base_delay,
                retry_max_delay: retry.max_delay,
                retry_jitter: retry.jitter,
                long_job_timeout: timeouts.long,
                short_job_timeout: timeouts.short,
                max_cpu: ceiling.max_cpu,
                max_memory_mb: ceiling.max_memory_mb,
                tier: Tier::default(),
                stale_job_threshold: maintenance.stale_after,
                job_retention: maintenance.retention,
                maintenance_interval: maintenance.interval,
                enable_startup_sync: true,
                enable_maintenance: true,
            },
            stale_job_threshold: None,
        }
    }
}

impl ControlPlaneConfigBuilder {
    pub fn database_url(mut self, value: impl Into<String>) -> Self {
        self.config.database_url = value.into();
        self
    }

    pub fn worker_count(mut self, value: usize) -> Self {
        self.config.worker_count = value;
        self
    }

    pub fn dispatch_queue_capacity(mut self, value: usize) -> Self {
        self.config.dispatch_queue_capacity = value;
        self
    }

    pub fn event_bus_capacity(mut self, value: usize) -> Self {
        self.config.event_bus_capacity = value;
        self
    }

    pub fn requeue_delay(mut self, value: Duration) -> Self {
        self.config.requeue_delay = value;
        self
    }

    pub fn max_attempts(mut self, value: i32) -> Self {
        self.config.max_attempts = value;
        self
    }

    pub fn retry_base_delay(mut self, value: Duration) -> Self {
        self.config.retry_base_delay = value;
        self
    }

    pub fn retry_max_delay(mut self, value: Duration) -> Self {
        self.config.retry_max_delay = value;
        self
    }

    pub fn retry_jitter(mut self, value: bool) -> Self {
        self.config.retry_jitter = value;
        self
    }

    pub fn long_job_timeout(mut self, value: Duration) -> Self {
        self.config.long_job_timeout = value;
        self
    }

    pub fn short_job_timeout(mut self, value: Duration) -> Self {
        self.config.short_job_timeout = value;
        self
    }

    pub fn max_cpu(mut self, value: u64) -> Self {
        self.config.max_cpu = value;
        self
    }

    pub fn max_memory_mb(mut self, value: u64) -> Self {
        self.config.max_memory_mb = value;
        self
    }

    pub fn tier(mut self, value: Tier) -> Self {
        self.config.tier = value;
        self
    }

    /// Defaults to the execution budget plus
    /// [`STALE_GRACE`](crate::maintenance::STALE_GRACE), recomputed from
    /// the final timeouts and retry policy.
    pub fn stale_job_threshold(mut self, value: Duration) -> Self {
        self.stale_job_threshold = Some(value);
        self
    }

    pub fn job_retention(mut self, value: Duration) -> Self {
        self.config.job_retention = value;
        self
    }

    pub fn maintenance_interval(mut self, value: Duration) -> Self {
        self.config.maintenance_interval = value;
        self
    }

    pub fn enable_startup_sync(mut self, value: bool) -> Self {
        self.config.enable_startup_sync = value;
        self
    }

    pub fn enable_maintenance(mut self, value: bool) -> Self {
        self.config.enable_maintenance = value;
        self
    }

    pub fn build(mut self) -> ControlPlaneConfig {
        self.config.stale_job_threshold = match self.stale_job_threshold {
            Some(value) => value,
            None => MaintenanceSettings::stale_after_for(&self.config.executor_settings()),
        };
        self.config
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        ControlPlaneConfigBuilder::default().build()
    }
}

/// On-disk shape of the configuration file. Durations are whole seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    database_url: Option<String>,
    worker_count: Option<usize>,
    dispatch_queue_capacity: Option<usize>,
    event_bus_capacity: Option<usize>,
    requeue_delay_secs: Option<u64>,
    tier: Option<Tier>,
    enable_startup_sync: Option<bool>,
    #[serde(default)]
    retry: RetrySection,
    #[serde(default)]
    timeouts: TimeoutSection,
    #[serde(default)]
    quota: QuotaSection,
    #[serde(default)]
    maintenance: MaintenanceSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetrySection {
    max_attempts: Option<i32>,
    base_delay_secs: Option<u64>,
    max_delay_secs: Option<u64>,
    jitter: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimeoutSection {
    long_secs: Option<u64>,
    short_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct QuotaSection {
    max_cpu: Option<u64>,
    max_memory_mb: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MaintenanceSection {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    stale_after_secs: Option<u64>,
    retention_days: Option<u64>,
}

impl ConfigFile {
    fn apply(self, mut builder: ControlPlaneConfigBuilder) -> ControlPlaneConfigBuilder {
        let secs = Duration::from_secs;

        if let Some(v) = self.database_url {
            builder = builder.database_url(v);
        }
        if let Some(v) = self.worker_count {
            builder = builder.worker_count(v);
        }
        if let Some(v) = self.dispatch_queue_capacity {
            builder = builder.dispatch_queue_capacity(v);
        }
        if let Some(v) = self.event_bus_capacity {
            builder = builder.event_bus_capacity(v);
        }
        if let Some(v) = self.requeue_delay_secs {
            builder = builder.requeue_delay(secs(v));
        }
        if let Some(v) = self.tier {
            builder = builder.tier(v);
        }
        if let Some(v) = self.enable_startup_sync {
            builder = builder.enable_startup_sync(v);
        }

        if let Some(v) = self.retry.max_attempts {
            builder = builder.max_attempts(v);
        }
        if let Some(v) = self.retry.base_delay_secs {
            builder = builder.retry_base_delay(secs(v));
        }
        if let Some(v) = self.retry.max_delay_secs {
            builder = builder.retry_max_delay(secs(v));
        }
        if let Some(v) = self.retry.jitter {
            builder = builder.retry_jitter(v);
        }

        if let Some(v) = self.timeouts.long_secs {
            builder = builder.long_job_timeout(secs(v));
        }
        if let Some(v) = self.timeouts.short_secs {
            builder = builder.short_job_timeout(secs(v));
        }

        if let Some(v) = self.quota.max_cpu {
            builder = builder.max_cpu(v);
        }
        if let Some(v) = self.quota.max_memory_mb {
            builder = builder.max_memory_mb(v);
        }

        if let Some(v) = self.maintenance.enabled {
            builder = builder.enable_maintenance(v);
        }
        if let Some(v) = self.maintenance.interval_secs {
            builder = builder.maintenance_interval(secs(v));
        }
        if let Some(v) = self.maintenance.stale_after_secs {
            builder = builder.stale_job_threshold(secs(v));
        }
        if let Some(v) = self.maintenance.retention_days {
            builder = builder.job_retention(secs(v.saturating_mul(24 * 60 * 60)));
        }

        builder
    }
}
