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

//! Instance domain model.

use crate::database::universal_types::UniversalTimestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Limits key holding the uppercase runtime status.
pub const KEY_STATUS: &str = "status";
/// Limits key holding the primary interface IPv4 address.
pub const KEY_IPV4: &str = "volatile.ipv4";
/// Limits key holding the primary interface IPv6 address.
pub const KEY_IPV6: &str = "volatile.ipv6";
/// Provider config key naming the image an instance was built from.
pub const KEY_BASE_IMAGE: &str = "volatile.base_image";
pub const KEY_CPU: &str = "limits.cpu";
pub const KEY_MEMORY: &str = "limits.memory";

pub const DEFAULT_BACKUP_SCHEDULE: &str = "@daily";
pub const DEFAULT_BACKUP_RETENTION: i32 = 7;

/// Backup settings carried on every instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPolicy {
    pub schedule: String,
    pub retention: i32,
    pub enabled: bool,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_BACKUP_SCHEDULE.to_string(),
            retention: DEFAULT_BACKUP_RETENTION,
            enabled: false,
        }
    }
}

/// A tracked instance (domain type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub image: String,
    /// Provider config plus the recorded status and addresses.
    pub limits: BTreeMap<String, String>,
    pub user_data: Option<String>,
    pub instance_type: String,
    pub backup: BackupPolicy,
    pub created_at: UniversalTimestamp,
    pub updated_at: UniversalTimestamp,
}

impl Instance {
    pub fn status(&self) -> Option<&str> {
        self.limits.get(KEY_STATUS).map(String::as_str)
    }

    pub fn ipv4(&self) -> Option<&str> {
        self.limits.get(KEY_IPV4).map(String::as_str)
    }
}

/// An instance row to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInstance {
    pub name: String,
    pub image: String,
    pub limits: BTreeMap<String, String>,
    pub user_data: Option<String>,
    pub instance_type: String,
    pub backup: BackupPolicy,
}
