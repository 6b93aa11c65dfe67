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

//! Corral CLI - administration for the Corral control plane store.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::Context;

/// Corral - single-host container control plane
#[derive(Parser)]
#[command(name = "corral")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL or path (can also be set via DATABASE_URL environment variable)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Job store maintenance
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
    /// Inspect jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Manage IP address pools
    Network {
        #[command(subcommand)]
        command: NetworkCommands,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Delete finished jobs older than a duration
    CleanupJobs {
        /// Delete jobs that finished before this long ago (e.g., "7d", "24h")
        #[arg(long, default_value = "7d")]
        older_than: String,

        /// Preview what would be deleted without actually deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Return jobs stuck IN_PROGRESS to PENDING. Run while the control plane
    /// is stopped; a live one recovers stuck jobs on its own.
    RecoverJobs {
        /// Treat jobs started before this long ago as stuck (e.g., "5m")
        #[arg(long, default_value = "5m")]
        stale_after: String,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// List the most recent jobs
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Show one job
    Show { id: String },
}

#[derive(Subcommand)]
enum NetworkCommands {
    /// List pools with usage
    List,
    /// Show a pool and its leases
    Show { id: String },
    /// Register a new pool
    Create {
        #[arg(long)]
        name: String,
        /// IPv4 block, e.g. 10.0.0.0/24
        #[arg(long)]
        cidr: String,
        #[arg(long)]
        gateway: String,
        #[arg(long)]
        dns: Option<String>,
        #[arg(long)]
        vlan: Option<i32>,
        /// Make the pool available to tiers allowed public addresses
        #[arg(long)]
        public: bool,
    },
    /// Pre-populate reserved lease rows
    Reserve {
        id: String,
        #[arg(long)]
        count: usize,
    },
    /// Delete a pool with no allocated addresses
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let ctx = Context::open(cli.config.as_deref(), cli.database_url.as_deref()).await?;

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::CleanupJobs {
                older_than,
                dry_run,
            } => commands::admin::cleanup_jobs(&ctx, &older_than, dry_run).await?,
            AdminCommands::RecoverJobs { stale_after } => {
                commands::admin::recover_jobs(&ctx, &stale_after).await?
            }
        },
        Commands::Jobs { command } => match command {
            JobCommands::List { limit } => commands::jobs::list(&ctx, limit).await?,
            JobCommands::Show { id } => commands::jobs::show(&ctx, &id).await?,
        },
        Commands::Network { command } => match command {
            NetworkCommands::List => commands::network::list(&ctx).await?,
            NetworkCommands::Show { id } => commands::network::show(&ctx, &id).await?,
            NetworkCommands::Create {
                name,
                cidr,
                gateway,
                dns,
                vlan,
                public,
            } => {
                let mut network = corral::models::network::NewNetwork::new(name, cidr, gateway);
                network.dns1 = dns;
                network.vlan_id = vlan;
                network.is_public = public;
                commands::network::create(&ctx, network).await?
            }
            NetworkCommands::Reserve { id, count } => {
                commands::network::reserve(&ctx, &id, count).await?
            }
            NetworkCommands::Delete { id } => commands::network::delete(&ctx, &id).await?,
        },
    }

    Ok(())
}
