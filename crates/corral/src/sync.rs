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

//! Reconciliation between the runtime and the instance store.
//!
//! The runtime is the source of truth for which instances exist and what
//! state they are in. A sweep imports instances the store has never seen and
//! refreshes the recorded status and primary addresses of known ones. Running
//! it again without runtime changes writes nothing.

use crate::dal::DAL;
use crate::error::{DatabaseError, SyncError};
use crate::models::instance::{
    BackupPolicy, Instance, NewInstance, KEY_BASE_IMAGE, KEY_IPV4, KEY_IPV6, KEY_STATUS,
};
use crate::provider::{ProviderInstance, RuntimeProvider};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub imported: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

enum Reconciled {
    Imported,
    Updated,
    Unchanged,
}

#[derive(Clone)]
pub struct ReconciliationSync {
    dal: DAL,
    provider: Arc<dyn RuntimeProvider>,
}

impl ReconciliationSync {
    pub fn new(dal: DAL, provider: Arc<dyn RuntimeProvider>) -> Self {
        Self { dal, provider }
    }

    /// Runs one sweep over every instance the runtime lists.
    ///
    /// Failures on individual instances are logged and counted; only a
    /// failure to list instances aborts the sweep.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let live = self.provider.list_instances().await?;
        let mut report = SyncReport::default();

        for instance in &live {
            match self.reconcile(instance).await {
                Ok(Reconciled::Imported) => report.imported += 1,
                Ok(Reconciled::Updated) => report.updated += 1,
                Ok(Reconciled::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    error!(instance = %instance.name, "Failed to reconcile instance: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            imported = report.imported,
            updated = report.updated,
            unchanged = report.unchanged,
            failed = report.failed,
            "Reconciliation sweep finished"
        );
        Ok(report)
    }

    async fn reconcile(&self, live: &ProviderInstance) -> Result<Reconciled, DatabaseError> {
        match self.dal.instance().get(&live.name).await? {
            None => {
                let limits = self.refreshed_limits(live, live.config.clone()).await;
                self.dal
                    .instance()
                    .create(NewInstance {
                        name: live.name.clone(),
                        image: live.config.get(KEY_BASE_IMAGE).cloned().unwrap_or_default(),
                        limits,
                        user_data: None,
                        instance_type: live.instance_type.clone(),
                        backup: BackupPolicy::default(),
                    })
                    .await?;
                info!(instance = %live.name, "Imported instance from runtime");
                Ok(Reconciled::Imported)
            }
            Some(existing) => self.refresh(live, existing).await,
        }
    }

    async fn refresh(
        &self,
        live: &ProviderInstance,
        existing: Instance,
    ) -> Result<Reconciled, DatabaseError> {
        let limits = self.refreshed_limits(live, existing.limits.clone()).await;
        if limits == existing.limits {
            debug!(instance = %live.name, "Instance unchanged");
            return Ok(Reconciled::Unchanged);
        }

        self.dal.instance().update_limits(&live.name, &limits).await?;
        debug!(instance = %live.name, "Refreshed instance status and addresses");
        Ok(Reconciled::Updated)
    }

    /// Applies live status and primary addresses to `limits`.
    ///
    /// When the state query fails only the status from the listing is
    /// applied and recorded addresses are left alone.
    async fn refreshed_limits(
        &self,
        live: &ProviderInstance,
        mut limits: BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        match self.provider.get_state(&live.name).await {
            Ok(state) => {
                let (ipv4, ipv6) = state.primary_addresses();
                set_or_remove(&mut limits, KEY_IPV4, ipv4);
                set_or_remove(&mut limits, KEY_IPV6, ipv6);
                limits.insert(KEY_STATUS.to_string(), state.status.to_uppercase());
            }
            Err(e) => {
                warn!(instance = %live.name, "State query failed, refreshing status only: {}", e);
                limits.insert(KEY_STATUS.to_string(), live.status.to_uppercase());
            }
        }
        limits
    }
}

fn set_or_remove(limits: &mut BTreeMap<String, String>, key: &str, value: Option<&str>) {
    match value {
        Some(value) => {
            limits.insert(key.to_string(), value.to_string());
        }
        None => {
            limits.remove(key);
        }
    }
}
