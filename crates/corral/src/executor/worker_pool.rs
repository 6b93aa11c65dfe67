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

//! Fixed-size pool of workers draining the dispatch queue.

use super::job_executor::JobExecutor;
use crate::database::universal_types::UniversalUuid;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `worker_count` workers sharing one receiver.
    ///
    /// Workers stop taking new ids once `shutdown` fires; a job already being
    /// processed runs to completion first.
    pub fn spawn(
        worker_count: usize,
        executor: JobExecutor,
        receiver: mpsc::Receiver<UniversalUuid>,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let handles = (0..worker_count.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let executor = executor.clone();
                let mut shutdown_rx = shutdown.subscribe();

                tokio::spawn(async move {
                    debug!(worker_id, "Worker started");
                    loop {
                        let next = tokio::select! {
                            _ = shutdown_rx.recv() => {
                                info!(worker_id, "Worker received shutdown signal");
                                break;
                            }
                            job_id = async { receiver.lock().await.recv().await } => job_id,
                        };

                        let Some(job_id) = next else {
                            debug!(worker_id, "Dispatch queue closed");
                            break;
                        };

                        if let Err(e) = executor.process(job_id).await {
                            error!(worker_id, job_id = %job_id, "Failed to process job: {}", e);
                        }
                    }
                    debug!(worker_id, "Worker stopped");
                })
            })
            .collect();

        Self { handles }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Waits for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }
    }
}
