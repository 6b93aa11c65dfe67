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

//! In-memory hand-off of job ids to the worker pool.
//!
//! Only the id travels; the job store holds the state. A signal that is
//! dropped because the queue is full is recovered by the maintenance sweep,
//! and a duplicate signal is harmless because workers skip jobs that are no
//! longer PENDING.

use crate::database::universal_types::UniversalUuid;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct Dispatcher {
    sender: mpsc::Sender<UniversalUuid>,
    requeue_delay: Duration,
}

impl Dispatcher {
    /// Creates the dispatcher and the receiving end for the worker pool.
    pub fn new(capacity: usize, requeue_delay: Duration) -> (Self, mpsc::Receiver<UniversalUuid>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                requeue_delay,
            },
            receiver,
        )
    }

    /// Non-blocking enqueue. Returns whether the signal was accepted.
    pub fn dispatch_job(&self, job_id: UniversalUuid) -> bool {
        match self.sender.try_send(job_id) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(job_id = %job_id, "Dispatch queue full, dropping signal");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(job_id = %job_id, "Dispatch queue closed");
                false
            }
        }
    }

    /// Re-dispatches the job after the configured delay, without blocking the
    /// caller.
    pub fn requeue_later(&self, job_id: UniversalUuid) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(dispatcher.requeue_delay).await;
            dispatcher.dispatch_job(job_id);
        });
    }

    pub fn requeue_delay(&self) -> Duration {
        self.requeue_delay
    }
}
