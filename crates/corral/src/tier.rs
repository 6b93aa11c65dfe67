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

//! Service tiers and the limits attached to each.
//!
//! This table is the only place tier limits are defined. Both IP pool
//! selection and port-forward limits read from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which pools an allocation may draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPolicy {
    PrivateOnly,
    Any,
}

impl PoolPolicy {
    /// The `is_public` filter to apply when listing candidate pools.
    pub fn public_filter(&self) -> Option<bool> {
        match self {
            PoolPolicy::PrivateOnly => Some(false),
            PoolPolicy::Any => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    /// `None` means unlimited.
    pub max_tcp_ports: Option<usize>,
    pub max_udp_ports: Option<usize>,
    pub pool_policy: PoolPolicy,
}

impl Tier {
    pub fn policy(&self) -> TierPolicy {
        match self {
            Tier::Free => TierPolicy {
                max_tcp_ports: Some(3),
                max_udp_ports: Some(1),
                pool_policy: PoolPolicy::PrivateOnly,
            },
            Tier::Standard => TierPolicy {
                max_tcp_ports: None,
                max_udp_ports: None,
                pool_policy: PoolPolicy::Any,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Standard => "standard",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "standard" | "pro" => Ok(Tier::Standard),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}
