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

//! Runtime wiring for the control plane.
//!
//! [`ControlPlane`] owns one instance of every component, built from a single
//! [`ControlPlaneConfig`]:
//!
//! ```text
//! submit ─► JobAdmission ─► jobs table ─► Dispatcher ─► WorkerPool ─► JobExecutor
//!                                                                     │
//!                                      RuntimeProvider ◄──────────────┤
//!                                      IpPoolManager   ◄──────────────┤
//!                                      EventBus        ◄──────────────┘
//! ```
//!
//! Startup runs migrations, reconciles the instance table against the
//! provider, then starts the workers and the maintenance scheduler. The
//! scheduler's first pass re-dispatches every PENDING job left over from a
//! previous run.

use crate::admission::{JobAdmission, JobRequest};
use crate::config::ControlPlaneConfig;
use crate::dal::DAL;
use crate::database::universal_types::UniversalUuid;
use crate::database::Database;
use crate::dispatcher::Dispatcher;
use crate::error::{AdmissionError, ControlPlaneError, DatabaseError, SyncError};
use crate::events::{Event, EventBus};
use crate::executor::{JobExecutor, WorkerPool};
use crate::ipam::IpPoolManager;
use crate::maintenance::{MaintenanceReport, MaintenanceScheduler};
use crate::models::job::Job;
use crate::provider::RuntimeProvider;
use crate::quota::QuotaGovernor;
use crate::sync::{ReconciliationSync, SyncReport};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Background tasks owned by a running control plane.
struct RuntimeHandles {
    worker_pool: Option<WorkerPool>,
    maintenance_handle: Option<JoinHandle<()>>,
    shutdown_sender: Option<broadcast::Sender<()>>,
}

#[derive(Clone)]
pub struct ControlPlane {
    config: ControlPlaneConfig,
    dal: DAL,
    admission: JobAdmission,
    ipam: IpPoolManager,
    events: Arc<EventBus>,
    dispatcher: Dispatcher,
    sync: ReconciliationSync,
    maintenance: MaintenanceScheduler,
    runtime_handles: Arc<RwLock<RuntimeHandles>>,
}

impl ControlPlane {
    pub fn builder() -> ControlPlaneBuilder {
        ControlPlaneBuilder::new()
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    pub fn dal(&self) -> &DAL {
        &self.dal
    }

    pub fn ipam(&self) -> &IpPoolManager {
        &self.ipam
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Hands out the event stream. Only the first caller gets it.
    pub fn take_event_receiver(&self) -> Option<mpsc::Receiver<Event>> {
        self.events.take_receiver()
    }

    /// Admits a job request and hands it to the workers.
    ///
    /// Returns as soon as the job is persisted; the caller follows progress
    /// through [`ControlPlane::job`] or the event stream.
    pub async fn submit(&self, request: JobRequest) -> Result<Job, AdmissionError> {
        self.admission.submit(request).await
    }

    pub async fn job(&self, job_id: UniversalUuid) -> Result<Option<Job>, DatabaseError> {
        self.dal.job().get(job_id).await
    }

    pub async fn recent_jobs(&self, limit: i64) -> Result<Vec<Job>, DatabaseError> {
        self.dal.job().list_recent(limit).await
    }

    pub async fn sync_now(&self) -> Result<SyncReport, SyncError> {
        self.sync.run().await
    }

    pub async fn maintenance_now(&self) -> MaintenanceReport {
        self.maintenance.run_once().await
    }

    pub async fn is_running(&self) -> bool {
        self.runtime_handles.read().await.shutdown_sender.is_some()
    }

    async fn start_background_services(
        &self,
        executor: JobExecutor,
        receiver: mpsc::Receiver<UniversalUuid>,
    ) {
        let mut handles = self.runtime_handles.write().await;

        let (shutdown_tx, _) = broadcast::channel(1);

        let pool = WorkerPool::spawn(self.config.worker_count(), executor, receiver, &shutdown_tx);
        info!(workers = pool.worker_count(), "Worker pool started");
        handles.worker_pool = Some(pool);

        if self.config.enable_maintenance() {
            let scheduler = self.maintenance.clone();
            let shutdown_rx = shutdown_tx.subscribe();
            handles.maintenance_handle = Some(tokio::spawn(scheduler.run(shutdown_rx)));
            info!("Maintenance scheduler started");
        } else {
            self.redispatch_pending().await;
        }

        handles.shutdown_sender = Some(shutdown_tx);
    }

    async fn redispatch_pending(&self) {
        match self.dal.job().list_pending().await {
            Ok(jobs) => {
                for job in jobs {
                    if !self.dispatcher.dispatch_job(job.id) {
                        warn!(job_id = %job.id, "Dispatch queue full while re-dispatching pending job");
                    }
                }
            }
            Err(e) => error!("Failed to load pending jobs: {}", e),
        }
    }

    /// Stops accepting work and waits for the background tasks.
    ///
    /// Jobs already executing finish first. Jobs still queued stay PENDING
    /// in the store and are picked up on the next start.
    pub async fn shutdown(&self) -> Result<(), ControlPlaneError> {
        let mut handles = self.runtime_handles.write().await;

        let Some(sender) = handles.shutdown_sender.take() else {
            return Err(ControlPlaneError::ShutDown);
        };
        info!("Shutting down control plane");
        let _ = sender.send(());

        if let Some(pool) = handles.worker_pool.take() {
            pool.join().await;
        }
        if let Some(handle) = handles.maintenance_handle.take() {
            if let Err(e) = handle.await {
                error!("Maintenance task ended abnormally: {}", e);
            }
        }

        info!("Control plane stopped");
        Ok(())
    }
}

/// Builds a [`ControlPlane`].
///
/// A runtime provider is required. The database is opened from the
/// configured URL unless one is supplied with [`ControlPlaneBuilder::database`].
pub struct ControlPlaneBuilder {
    config: ControlPlaneConfig,
    provider: Option<Arc<dyn RuntimeProvider>>,
    database: Option<Database>,
}

impl Default for ControlPlaneBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPlaneBuilder {
    pub fn new() -> Self {
        Self {
            config: ControlPlaneConfig::default(),
            provider: None,
            database: None,
        }
    }

    pub fn with_config(mut self, config: ControlPlaneConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn RuntimeProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    pub async fn build(self) -> Result<ControlPlane, ControlPlaneError> {
        let config = self.config;
        config.validate()?;
        let provider = self.provider.ok_or(ControlPlaneError::MissingProvider)?;

        let database = match self.database {
            Some(database) => database,
            None => Database::try_new(config.database_url())?,
        };
        database.run_migrations().await?;
        info!(url = %database.url(), "Database ready");

        let dal = DAL::new(database);
        let events = Arc::new(EventBus::new(config.event_bus_capacity()));
        let (dispatcher, receiver) =
            Dispatcher::new(config.dispatch_queue_capacity(), config.requeue_delay());

        let ipam = IpPoolManager::new(dal.clone(), config.tier().policy().pool_policy);
        let quota = QuotaGovernor::new(provider.clone(), config.quota_ceiling());
        let admission = JobAdmission::new(dal.clone(), quota, dispatcher.clone());
        let executor = JobExecutor::new(
            dal.clone(),
            provider.clone(),
            ipam.clone(),
            dispatcher.clone(),
            events.clone(),
            config.executor_settings(),
        );
        let sync = ReconciliationSync::new(dal.clone(), provider);
        let maintenance = MaintenanceScheduler::new(
            dal.clone(),
            dispatcher.clone(),
            config.maintenance_settings(),
        )
        .with_locks(executor.locks().clone());

        if config.enable_startup_sync() {
            if let Err(e) = sync.run().await {
                error!("Startup reconciliation failed: {}", e);
            }
        }

        let control_plane = ControlPlane {
            config,
            dal,
            admission,
            ipam,
            events,
            dispatcher,
            sync,
            maintenance,
            runtime_handles: Arc::new(RwLock::new(RuntimeHandles {
                worker_pool: None,
                maintenance_handle: None,
                shutdown_sender: None,
            })),
        };
        control_plane
            .start_background_services(executor, receiver)
            .await;

        info!(tier = %control_plane.config.tier(), "Control plane started");
        Ok(control_plane)
    }
}
