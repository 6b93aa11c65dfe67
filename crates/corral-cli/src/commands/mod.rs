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

pub mod admin;
pub mod jobs;
pub mod network;

use anyhow::{Context as _, Result};
use corral::dal::DAL;
use corral::{ControlPlaneConfig, Database, IpPoolManager, UniversalUuid};
use std::path::Path;
use tracing::debug;

/// Store handles shared by every command.
pub struct Context {
    pub config: ControlPlaneConfig,
    pub dal: DAL,
}

impl Context {
    /// Loads the configuration and opens the migrated store.
    ///
    /// `--database-url` / `DATABASE_URL` wins over the configuration file.
    pub async fn open(config_path: Option<&Path>, database_url: Option<&str>) -> Result<Self> {
        let config = match config_path {
            Some(path) => ControlPlaneConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => ControlPlaneConfig::default(),
        };

        let url = database_url.unwrap_or(config.database_url()).to_string();
        debug!(url = %url, "Opening database");
        let database = Database::try_new(&url).context("Failed to connect to database")?;
        database
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;

        Ok(Self {
            config,
            dal: DAL::new(database),
        })
    }

    pub fn ipam(&self) -> IpPoolManager {
        IpPoolManager::new(self.dal.clone(), self.config.tier().policy().pool_policy)
    }
}

pub fn parse_id(raw: &str) -> Result<UniversalUuid> {
    raw.parse()
        .with_context(|| format!("'{}' is not a valid id", raw))
}
