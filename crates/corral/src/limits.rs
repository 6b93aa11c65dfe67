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

//! Parsing of runtime resource limit strings.

use crate::models::instance::{KEY_CPU, KEY_MEMORY};
use std::collections::BTreeMap;

/// vCPUs assumed when an instance or request does not set `limits.cpu`.
pub const DEFAULT_CPU: u64 = 1;
/// Memory in MiB assumed when `limits.memory` is not set.
pub const DEFAULT_MEMORY_MB: u64 = 512;

const MIB: f64 = 1024.0 * 1024.0;

/// CPU and memory demand of one instance or request. Memory is in MiB, the
/// same unit as the quota ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub cpu: u64,
    pub memory_mb: u64,
}

impl ResourceUsage {
    /// Reads `limits.cpu` / `limits.memory`, falling back to the defaults for
    /// missing or unparseable values.
    pub fn from_limits(limits: &BTreeMap<String, String>) -> Self {
        let cpu = limits
            .get(KEY_CPU)
            .and_then(|v| parse_cpu_cores(v))
            .unwrap_or(DEFAULT_CPU);
        let memory_mb = limits
            .get(KEY_MEMORY)
            .and_then(|v| parse_memory_mb(v))
            .unwrap_or(DEFAULT_MEMORY_MB);
        Self { cpu, memory_mb }
    }
}

impl std::ops::Add for ResourceUsage {
    type Output = ResourceUsage;

    fn add(self, rhs: Self) -> Self::Output {
        ResourceUsage {
            cpu: self.cpu.saturating_add(rhs.cpu),
            memory_mb: self.memory_mb.saturating_add(rhs.memory_mb),
        }
    }
}

impl std::iter::Sum for ResourceUsage {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ResourceUsage::default(), |acc, u| acc + u)
    }
}

/// Number of cores described by a CPU limit.
///
/// Accepts a count (`"2"`), an inclusive range (`"0-3"`) or a list of cores
/// and ranges (`"0,2,4-5"`). Counts that do not fit in a `u64` are rejected.
pub fn parse_cpu_cores(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if !raw.contains(',') && !raw.contains('-') {
        return raw.parse().ok();
    }

    let mut cores = 0u64;
    for part in raw.split(',') {
        let part = part.trim();
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u64 = start.trim().parse().ok()?;
                let end: u64 = end.trim().parse().ok()?;
                if end < start {
                    return None;
                }
                let span = (end - start).checked_add(1)?;
                cores = cores.checked_add(span)?;
            }
            None => {
                part.parse::<u64>().ok()?;
                cores = cores.checked_add(1)?;
            }
        }
    }
    Some(cores)
}

/// Memory limit in MiB, rounded to the nearest MiB.
///
/// Accepts `kB/MB/GB/TB` and `KiB/MiB/GiB/TiB` suffixes; a bare number is
/// bytes. `"8GiB"` is exactly 8192.
pub fn parse_memory_mb(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.parse().ok()?;

    let multiplier = match unit.trim() {
        "" | "B" => 1.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };

    Some((value * multiplier / MIB).round() as u64)
}
