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

//! Implementation of the `admin` commands.

use super::Context;
use anyhow::{anyhow, Context as _, Result};
use std::time::Duration;
use tracing::info;

/// Parse a duration string like "7d", "24h", "1h30m" into a `Duration`.
///
/// Supported units: `d`, `h`, `m`, `s`. Units may be combined ("7d12h").
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err(anyhow!("Duration string cannot be empty"));
    }

    let mut total: u64 = 0;
    let mut current_num = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            current_num.push(c);
            continue;
        }
        if current_num.is_empty() {
            return Err(anyhow!(
                "Invalid duration format: expected number before '{}'",
                c
            ));
        }

        let num: u64 = current_num
            .parse()
            .with_context(|| format!("Invalid number in duration: {}", current_num))?;
        current_num.clear();

        let unit_secs = match c {
            'd' => 24 * 60 * 60,
            'h' => 60 * 60,
            'm' => 60,
            's' => 1,
            _ => return Err(anyhow!("Unknown duration unit: '{}'. Use d, h, m, or s", c)),
        };
        total = num
            .checked_mul(unit_secs)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| anyhow!("Duration '{}' is too large", s))?;
    }

    if !current_num.is_empty() {
        return Err(anyhow!(
            "Duration '{}' is missing a unit. Use d (days), h (hours), m (minutes), or s (seconds)",
            s
        ));
    }
    if total == 0 {
        return Err(anyhow!("Duration must be greater than zero"));
    }

    Ok(Duration::from_secs(total))
}

/// Deletes COMPLETED and FAILED jobs that finished more than `older_than` ago.
pub async fn cleanup_jobs(ctx: &Context, older_than: &str, dry_run: bool) -> Result<()> {
    let age = parse_duration(older_than)
        .with_context(|| format!("Invalid duration: '{}'", older_than))?;

    if dry_run {
        let count = ctx
            .dal
            .job()
            .count_old_jobs(age)
            .await
            .context("Failed to count jobs")?;
        if count == 0 {
            info!("No finished jobs older than {}", older_than);
        } else {
            info!("[DRY RUN] Would delete {} job(s) older than {}", count, older_than);
        }
        return Ok(());
    }

    let deleted = ctx
        .dal
        .job()
        .delete_old_jobs(age)
        .await
        .context("Failed to delete jobs")?;
    if deleted == 0 {
        info!("No finished jobs older than {}", older_than);
    } else {
        info!("Deleted {} job(s) older than {}", deleted, older_than);
    }
    Ok(())
}

/// Returns stale IN_PROGRESS jobs to PENDING. A running control plane picks
/// them up on its next maintenance pass.
pub async fn recover_jobs(ctx: &Context, stale_after: &str) -> Result<()> {
    let threshold = parse_duration(stale_after)
        .with_context(|| format!("Invalid duration: '{}'", stale_after))?;

    let recovered = ctx
        .dal
        .job()
        .recover_stuck_jobs(threshold)
        .await
        .context("Failed to recover stuck jobs")?;

    if recovered.is_empty() {
        info!("No jobs stuck longer than {}", stale_after);
    } else {
        for id in &recovered {
            info!("Recovered job {}", id);
        }
        info!("Recovered {} job(s)", recovered.len());
    }
    Ok(())
}
