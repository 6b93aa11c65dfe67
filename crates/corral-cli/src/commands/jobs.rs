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

use super::{parse_id, Context};
use anyhow::{anyhow, Context as _, Result};

pub async fn list(ctx: &Context, limit: i64) -> Result<()> {
    let jobs = ctx
        .dal
        .job()
        .list_recent(limit)
        .await
        .context("Failed to list jobs")?;

    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:<20}  {:<11}  {:>3}  CREATED",
        "ID", "TYPE", "TARGET", "STATUS", "TRY"
    );
    for job in jobs {
        println!(
            "{:<36}  {:<16}  {:<20}  {:<11}  {:>3}  {}",
            job.id,
            job.job_type.as_str(),
            job.target,
            job.status.as_str(),
            job.attempt_count,
            job.created_at
        );
    }
    Ok(())
}

pub async fn show(ctx: &Context, id: &str) -> Result<()> {
    let job_id = parse_id(id)?;
    let job = ctx
        .dal
        .job()
        .get(job_id)
        .await
        .context("Failed to load job")?
        .ok_or_else(|| anyhow!("Job {} not found", job_id))?;

    let optional = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());

    println!("id:           {}", job.id);
    println!("type:         {}", job.job_type.as_str());
    println!("target:       {}", job.target);
    println!("status:       {}", job.status);
    println!("attempts:     {}", job.attempt_count);
    println!("requested by: {}", optional(job.requested_by.clone()));
    println!("created:      {}", job.created_at);
    println!("started:      {}", optional(job.started_at.map(|t| t.to_string())));
    println!("finished:     {}", optional(job.finished_at.map(|t| t.to_string())));
    println!("error:        {}", optional(job.error.clone()));
    println!("payload:      {}", job.payload);
    Ok(())
}
